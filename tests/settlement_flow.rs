mod common;

use common::{newebpay_failure, newebpay_success, Harness};
use futures::future::join_all;
use std::collections::HashSet;
use voucher_gateway::api::pages;
use voucher_gateway::orders::model::{OrderStatus, TicketState};
use voucher_gateway::orders::repository::OrderRepository;
use voucher_gateway::payments::types::{CallbackChannel, ProviderName, RawCallback};
use voucher_gateway::services::notification::Notice;
use voucher_gateway::services::webhook_ingestor::{IngestResponse, ResultPage};

const REF: &str = "ORD10191230451234";

fn ack(response: IngestResponse) -> (bool, String) {
    match response {
        IngestResponse::Ack { accepted, body } => (accepted, body),
        other => panic!("expected an ack, got {:?}", other),
    }
}

fn page(response: IngestResponse) -> ResultPage {
    match response {
        IngestResponse::Page(page) => page,
        other => panic!("expected a page, got {:?}", other),
    }
}

#[tokio::test]
async fn notify_settles_once_and_redelivery_is_a_no_op() {
    let h = Harness::new().await;
    let order = h.pending_order(ProviderName::Newebpay, REF).await;
    assert_eq!(order.amount, 2500);
    let raw = h.newebpay_callback(&newebpay_success(REF, 2500));

    let first = ack(
        h.ingestor
            .ingest(CallbackChannel::Notify, ProviderName::Newebpay, &raw)
            .await,
    );
    assert_eq!(first, (true, "1|OK".to_string()));

    let paid = h.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(paid.ticket_state, TicketState::Unused);
    assert_eq!(paid.provider_transaction_reference.as_deref(), Some("24101912000012345"));
    assert_eq!(paid.card_mask.as_deref(), Some("400022******1111"));
    assert_eq!(paid.amount, paid.unit_price * paid.quantity as i64);
    let code = paid.ticket_code.clone().expect("ticket issued");

    let second = ack(
        h.ingestor
            .ingest(CallbackChannel::Notify, ProviderName::Newebpay, &raw)
            .await,
    );
    assert_eq!(second, (true, "1|OK".to_string()));

    let again = h.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(again.ticket_code.as_deref(), Some(code.as_str()));
    assert_eq!(again.paid_at, paid.paid_at);

    let sent = h.notifier.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        &sent[0].1,
        Notice::TicketIssued { ticket_code, .. } if *ticket_code == code
    ));
}

#[tokio::test]
async fn return_after_notify_links_to_the_ticket_without_revealing_it() {
    let h = Harness::new().await;
    let order = h.pending_order(ProviderName::Newebpay, REF).await;
    let raw = h.newebpay_callback(&newebpay_success(REF, 2500));

    h.ingestor
        .ingest(CallbackChannel::Notify, ProviderName::Newebpay, &raw)
        .await;
    let result = page(
        h.ingestor
            .ingest(CallbackChannel::Return, ProviderName::Newebpay, &raw)
            .await,
    );

    let stored = h.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(
        result,
        ResultPage::Success {
            order_id: order.id,
            order_reference: REF.to_string(),
            amount: 2500,
            ticket_url: format!("/api/orders/{}/ticket", order.id),
        }
    );

    let code = stored.ticket_code.unwrap();
    let html = pages::result_page(&result);
    assert!(!html.contains(&code));
    assert!(!serde_json::to_string(&result).unwrap().contains(&code));
}

#[tokio::test]
async fn tampered_checksum_mutates_nothing() {
    let h = Harness::new().await;
    let order = h.pending_order(ProviderName::Newebpay, REF).await;
    let mut raw = h.newebpay_callback(&newebpay_success(REF, 2500));
    raw.form.insert("TradeSha".to_string(), "0".repeat(64));

    let (accepted, body) = ack(
        h.ingestor
            .ingest(CallbackChannel::Notify, ProviderName::Newebpay, &raw)
            .await,
    );
    assert!(!accepted);
    assert!(body.starts_with("0|"));

    let result = page(
        h.ingestor
            .ingest(CallbackChannel::Return, ProviderName::Newebpay, &raw)
            .await,
    );
    assert!(matches!(result, ResultPage::Failure { .. }));

    let stored = h.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored, order);
    assert!(h.notifier.sent.lock().await.is_empty());
}

#[tokio::test]
async fn missing_fields_are_rejected() {
    let h = Harness::new().await;
    h.pending_order(ProviderName::Newebpay, REF).await;

    let (accepted, _) = ack(
        h.ingestor
            .ingest(
                CallbackChannel::Notify,
                ProviderName::Newebpay,
                &RawCallback::default(),
            )
            .await,
    );
    assert!(!accepted);
}

#[tokio::test]
async fn unknown_order_asks_customer_to_contact_support() {
    let h = Harness::new().await;
    let raw = h.newebpay_callback(&newebpay_success("ORD00000000000000", 2500));

    let (accepted, body) = ack(
        h.ingestor
            .ingest(CallbackChannel::Notify, ProviderName::Newebpay, &raw)
            .await,
    );
    assert!(!accepted);
    assert_eq!(body, "0|Order Not Found");

    let result = page(
        h.ingestor
            .ingest(CallbackChannel::Return, ProviderName::Newebpay, &raw)
            .await,
    );
    assert_eq!(
        result,
        ResultPage::ContactSupport {
            reference: Some("ORD00000000000000".to_string())
        }
    );
}

#[tokio::test]
async fn reported_amount_mismatch_leaves_order_pending() {
    let h = Harness::new().await;
    let order = h.pending_order(ProviderName::Newebpay, REF).await;
    let raw = h.newebpay_callback(&newebpay_success(REF, 9999));

    let (accepted, body) = ack(
        h.ingestor
            .ingest(CallbackChannel::Notify, ProviderName::Newebpay, &raw)
            .await,
    );
    assert!(!accepted);
    assert_eq!(body, "0|Amount Mismatch");
    let stored = h.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);

    let result = page(
        h.ingestor
            .ingest(CallbackChannel::Return, ProviderName::Newebpay, &raw)
            .await,
    );
    assert_eq!(result, ResultPage::ContactSupport { reference: None });
}

#[tokio::test]
async fn failure_is_final_even_if_success_arrives_later() {
    let h = Harness::new().await;
    let order = h.pending_order(ProviderName::Newebpay, REF).await;

    let failed = ack(
        h.ingestor
            .ingest(
                CallbackChannel::Notify,
                ProviderName::Newebpay,
                &h.newebpay_callback(&newebpay_failure(REF)),
            )
            .await,
    );
    assert_eq!(failed, (true, "1|OK".to_string()));

    let late = h.newebpay_callback(&newebpay_success(REF, 2500));
    let result = page(
        h.ingestor
            .ingest(CallbackChannel::Return, ProviderName::Newebpay, &late)
            .await,
    );
    assert!(matches!(result, ResultPage::Failure { .. }));

    let stored = h.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Failed);
    assert!(stored.ticket_code.is_none());
    assert!(stored.provider_payload.is_some());
}

#[tokio::test]
async fn racing_deliveries_settle_exactly_once() {
    let h = Harness::new().await;
    let order = h.pending_order(ProviderName::Newebpay, REF).await;
    let raw = h.newebpay_callback(&newebpay_success(REF, 2500));

    let deliveries = (0..12).map(|i| {
        let ingestor = h.ingestor.clone();
        let raw = raw.clone();
        let channel = if i % 3 == 0 {
            CallbackChannel::Return
        } else {
            CallbackChannel::Notify
        };
        tokio::spawn(async move {
            ingestor
                .ingest(channel, ProviderName::Newebpay, &raw)
                .await
        })
    });
    let responses: Vec<IngestResponse> = join_all(deliveries)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let stored = h.orders.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);

    let mut shown_orders = HashSet::new();
    for response in responses {
        match response {
            IngestResponse::Ack { accepted, body } => {
                assert!(accepted);
                assert_eq!(body, "1|OK");
            }
            IngestResponse::Page(ResultPage::Success { order_id, .. }) => {
                shown_orders.insert(order_id);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }
    assert_eq!(shown_orders, HashSet::from([order.id]));
    assert!(stored.ticket_code.is_some());
    assert_eq!(h.notifier.sent.lock().await.len(), 1);
}

#[tokio::test]
async fn disabled_provider_is_refused_on_notify() {
    let h = Harness::new().await;
    let (accepted, body) = ack(
        h.ingestor
            .ingest(
                CallbackChannel::Notify,
                ProviderName::Linepay,
                &RawCallback::default(),
            )
            .await,
    );
    assert!(!accepted);
    assert!(!body.is_empty());
}
