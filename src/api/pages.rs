//! Minimal HTML for the browser-facing payment flow.

use crate::services::webhook_ingestor::ResultPage;

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape(title),
        body
    )
}

/// Form that posts itself to the gateway on load, with a button for
/// browsers that block scripts.
pub fn auto_submit_form(action_url: &str, fields: &[(String, String)]) -> String {
    let inputs: String = fields
        .iter()
        .map(|(name, value)| {
            format!(
                "<input type=\"hidden\" name=\"{}\" value=\"{}\">\n",
                escape(name),
                escape(value)
            )
        })
        .collect();

    layout(
        "Redirecting to payment",
        &format!(
            "<form id=\"payment-form\" method=\"post\" action=\"{}\">\n{}\
             <noscript><button type=\"submit\">Continue to payment</button></noscript>\n</form>\n\
             <script>document.getElementById('payment-form').submit();</script>",
            escape(action_url),
            inputs
        ),
    )
}

pub fn result_page(page: &ResultPage) -> String {
    match page {
        ResultPage::Success {
            order_reference,
            amount,
            ticket_url,
            ..
        } => layout(
            "Payment successful",
            &format!(
                "<h1>Payment successful</h1>\n<p>Order {} has been paid (NT$ {}).</p>\n\
                 <p><a href=\"{}\">View your ticket</a></p>",
                escape(order_reference),
                amount,
                escape(ticket_url)
            ),
        ),
        ResultPage::Failure {
            order_reference,
            reason,
        } => layout(
            "Payment failed",
            &format!(
                "<h1>Payment failed</h1>\n{}<p>{}</p>",
                reference_line(order_reference.as_deref()),
                escape(reason)
            ),
        ),
        ResultPage::ContactSupport { reference } => layout(
            "Payment received",
            &format!(
                "<h1>We could not match your payment</h1>\n{}\
                 <p>Please contact support and quote the reference above. \
                 You will not be charged twice.</p>",
                reference_line(reference.as_deref())
            ),
        ),
        ResultPage::TryAgainLater { reference } => layout(
            "Payment pending",
            &format!(
                "<h1>Your payment is still being confirmed</h1>\n{}\
                 <p>Please refresh this page in a moment.</p>",
                reference_line(reference.as_deref())
            ),
        ),
    }
}

pub fn cancel_page(order_reference: Option<&str>) -> String {
    layout(
        "Payment cancelled",
        &format!(
            "<h1>Payment cancelled</h1>\n{}<p>Your order is still waiting for payment.</p>",
            reference_line(order_reference)
        ),
    )
}

fn reference_line(reference: Option<&str>) -> String {
    reference
        .map(|r| format!("<p>Order reference: {}</p>\n", escape(r)))
        .unwrap_or_default()
}
