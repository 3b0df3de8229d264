use crate::orders::model::Order;
use crate::payments::error::PaymentError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    /// Encrypted form gateway.
    Newebpay,
    /// Signed REST gateway.
    Linepay,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Newebpay => "newebpay",
            ProviderName::Linepay => "linepay",
        }
    }

    /// Prefix of the provider order reference issued at checkout.
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            ProviderName::Newebpay => "ORD",
            ProviderName::Linepay => "LP",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "newebpay" => Ok(ProviderName::Newebpay),
            "linepay" | "line_pay" | "line-pay" => Ok(ProviderName::Linepay),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CallbackChannel {
    /// Browser redirect; answered with a result page.
    Return,
    /// Server-to-server; answered with an acknowledgement token.
    Notify,
}

impl CallbackChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackChannel::Return => "return",
            CallbackChannel::Notify => "notify",
        }
    }
}

impl std::fmt::Display for CallbackChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Success,
    Failure { reason: String },
}

impl PaymentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PaymentOutcome::Success)
    }
}

/// Provider-specific settlement data: a few named fields plus the raw payload
/// kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderPayload {
    Newebpay {
        trade_no: Option<String>,
        message: Option<String>,
        raw: JsonValue,
    },
    Linepay {
        transaction_id: String,
        return_code: String,
        return_message: Option<String>,
        raw: JsonValue,
    },
}

impl ProviderPayload {
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementPayload {
    pub transaction_reference: Option<String>,
    pub payment_method: Option<String>,
    pub card_mask: Option<String>,
    pub details: ProviderPayload,
}

/// What an adapter needs to know about an order to build its outbound request.
#[derive(Debug, Clone)]
pub struct OrderSnapshot {
    pub order_id: Uuid,
    pub provider_order_reference: String,
    pub amount: i64,
    pub item_description: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub customer_email: Option<String>,
    /// Set when a pending order is being paid again.
    pub is_retry: bool,
}

impl OrderSnapshot {
    pub fn from_order(order: &Order, customer_email: Option<String>, is_retry: bool) -> Self {
        Self {
            order_id: order.id,
            provider_order_reference: order.provider_order_reference.clone(),
            amount: order.amount,
            item_description: order.item_description.clone(),
            quantity: order.quantity,
            unit_price: order.unit_price,
            customer_email,
            is_retry,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundRequest {
    /// Fields POSTed to the gateway by an auto-submitting form.
    AutoSubmitForm {
        action_url: String,
        fields: Vec<(String, String)>,
    },
    /// Hosted payment page; the transaction id is stored on the order.
    Redirect {
        url: String,
        provider_transaction_id: String,
    },
}

/// Unparsed callback as received on the HTTP boundary.
#[derive(Debug, Clone, Default)]
pub struct RawCallback {
    pub form: HashMap<String, String>,
    pub query: HashMap<String, String>,
}

impl RawCallback {
    pub fn from_form(form: HashMap<String, String>) -> Self {
        Self {
            form,
            query: HashMap::new(),
        }
    }

    pub fn from_query(query: HashMap<String, String>) -> Self {
        Self {
            form: HashMap::new(),
            query,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.form
            .get(name)
            .or_else(|| self.query.get(name))
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub enum CallbackVerdict {
    /// Authentic callback for a known order that is still pending.
    Verified {
        order: Order,
        outcome: PaymentOutcome,
        settlement: Option<SettlementPayload>,
    },
    /// Authentic callback for an order that has already left `pending`.
    Stale { order: Order },
    /// Authenticity could not be established. Nothing may be mutated.
    Rejected { error: PaymentError },
}

impl CallbackVerdict {
    pub fn verified(&self) -> bool {
        !matches!(self, CallbackVerdict::Rejected { .. })
    }
}
