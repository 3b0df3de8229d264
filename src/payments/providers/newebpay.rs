use crate::orders::repository::OrderRepository;
use crate::payments::crypto::CryptoCodec;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::ProviderAdapter;
use crate::payments::types::{
    CallbackChannel, CallbackVerdict, OrderSnapshot, OutboundRequest, PaymentOutcome,
    ProviderName, ProviderPayload, RawCallback, SettlementPayload,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct NewebpayConfig {
    pub merchant_id: String,
    pub hash_key: String,
    pub hash_iv: String,
    pub gateway_url: String,
    pub return_url: String,
    pub notify_url: String,
    pub client_back_url: String,
    pub version: String,
}

impl NewebpayConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| PaymentError::ValidationError {
                message: format!("{} environment variable is required", name),
                field: Some(name.to_string()),
            })
        };

        Ok(Self {
            merchant_id: required("NEWEBPAY_MERCHANT_ID")?,
            hash_key: required("NEWEBPAY_HASH_KEY")?,
            hash_iv: required("NEWEBPAY_HASH_IV")?,
            gateway_url: std::env::var("NEWEBPAY_GATEWAY_URL")
                .unwrap_or_else(|_| "https://ccore.newebpay.com/MPG/mpg_gateway".to_string()),
            return_url: required("PAYMENT_RETURN_URL")?,
            notify_url: required("PAYMENT_NOTIFY_URL")?,
            client_back_url: std::env::var("PAYMENT_CANCEL_URL").unwrap_or_default(),
            version: std::env::var("NEWEBPAY_VERSION").unwrap_or_else(|_| "2.3".to_string()),
        })
    }
}

pub struct NewebpayAdapter {
    config: NewebpayConfig,
    codec: CryptoCodec,
}

impl NewebpayAdapter {
    pub fn new(config: NewebpayConfig) -> PaymentResult<Self> {
        let codec = CryptoCodec::new(config.hash_key.clone(), config.hash_iv.clone())?;
        Ok(Self { config, codec })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(NewebpayConfig::from_env()?)
    }

    pub fn codec(&self) -> &CryptoCodec {
        &self.codec
    }

    /// URL-encoded parameter set in the order the gateway documents.
    fn trade_info(&self, order: &OrderSnapshot, timestamp: i64) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("MerchantID", &self.config.merchant_id)
            .append_pair("RespondType", "JSON")
            .append_pair("TimeStamp", &timestamp.to_string())
            .append_pair("Version", &self.config.version)
            .append_pair("MerchantOrderNo", &order.provider_order_reference)
            .append_pair("Amt", &order.amount.to_string())
            .append_pair("ItemDesc", &order.item_description)
            .append_pair("ReturnURL", &self.config.return_url)
            .append_pair("NotifyURL", &self.config.notify_url)
            .append_pair("ClientBackURL", &self.config.client_back_url)
            .append_pair("Email", order.customer_email.as_deref().unwrap_or(""))
            .append_pair("CREDIT", "1")
            .finish()
    }

    fn reject(&self, error: PaymentError) -> CallbackVerdict {
        CallbackVerdict::Rejected { error }
    }
}

#[async_trait]
impl ProviderAdapter for NewebpayAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Newebpay
    }

    async fn build_outbound_request(
        &self,
        order: &OrderSnapshot,
    ) -> PaymentResult<OutboundRequest> {
        let trade_info = self.codec.encrypt(&self.trade_info(order, chrono::Utc::now().timestamp()));
        let trade_sha = self.codec.checksum(&trade_info);
        info!(
            order_ref = %order.provider_order_reference,
            amount = order.amount,
            trade_info_len = trade_info.len(),
            "newebpay form built"
        );

        Ok(OutboundRequest::AutoSubmitForm {
            action_url: self.config.gateway_url.clone(),
            fields: vec![
                ("MerchantID".to_string(), self.config.merchant_id.clone()),
                ("TradeInfo".to_string(), trade_info),
                ("TradeSha".to_string(), trade_sha),
                ("Version".to_string(), self.config.version.clone()),
            ],
        })
    }

    async fn parse_inbound_callback(
        &self,
        channel: CallbackChannel,
        raw: &RawCallback,
        orders: &dyn OrderRepository,
    ) -> PaymentResult<CallbackVerdict> {
        let (Some(trade_info), Some(trade_sha)) = (raw.field("TradeInfo"), raw.field("TradeSha"))
        else {
            warn!(channel = %channel, "newebpay callback missing TradeInfo or TradeSha");
            return Ok(self.reject(PaymentError::SignatureMismatch {
                provider: "newebpay".to_string(),
                message: "missing TradeInfo or TradeSha".to_string(),
            }));
        };

        if !self.codec.verify_checksum(trade_info, trade_sha) {
            error!(
                channel = %channel,
                trade_info_len = trade_info.len(),
                "newebpay TradeSha mismatch, callback rejected"
            );
            return Ok(self.reject(PaymentError::SignatureMismatch {
                provider: "newebpay".to_string(),
                message: "TradeSha does not match TradeInfo".to_string(),
            }));
        }

        let plaintext = match self.codec.decrypt(trade_info) {
            Ok(text) => text,
            Err(e) => {
                error!(
                    channel = %channel,
                    ciphertext_len = trade_info.len(),
                    error = %e,
                    "newebpay TradeInfo could not be decrypted"
                );
                return Ok(self.reject(PaymentError::DecryptFailed {
                    channel: channel.to_string(),
                    ciphertext_len: trade_info.len(),
                }));
            }
        };

        let trade = TradeResult::parse(&plaintext)?;
        let reference = trade.merchant_order_no.clone().ok_or_else(|| {
            PaymentError::ValidationError {
                message: "decrypted TradeInfo carries no MerchantOrderNo".to_string(),
                field: Some("MerchantOrderNo".to_string()),
            }
        })?;

        let Some(order) = orders
            .find_by_provider_reference(ProviderName::Newebpay, &reference)
            .await?
        else {
            error!(
                channel = %channel,
                order_ref = %reference,
                trade_no = ?trade.trade_no,
                status = %trade.status,
                "verified newebpay callback for unknown order, needs manual reconciliation"
            );
            return Err(PaymentError::OrderNotFound { reference });
        };

        if !order.is_pending() {
            return Ok(CallbackVerdict::Stale { order });
        }

        let settlement = trade.settlement();
        if trade.status != "SUCCESS" {
            return Ok(CallbackVerdict::Verified {
                order,
                outcome: PaymentOutcome::Failure {
                    reason: trade
                        .message
                        .clone()
                        .unwrap_or_else(|| trade.status.clone()),
                },
                settlement: Some(settlement),
            });
        }

        if let Some(reported) = trade.amount {
            if reported != order.amount {
                error!(
                    order_ref = %reference,
                    expected = order.amount,
                    reported,
                    "newebpay reported amount disagrees with order"
                );
                return Err(PaymentError::AmountMismatch {
                    expected: order.amount,
                    reported,
                });
            }
        }

        Ok(CallbackVerdict::Verified {
            order,
            outcome: PaymentOutcome::Success,
            settlement: Some(settlement),
        })
    }

    fn notify_ack(&self, accepted: bool, reason: &str) -> String {
        if accepted {
            "1|OK".to_string()
        } else {
            format!("0|{}", reason)
        }
    }
}

/// Normalised view of a decrypted TradeInfo, which arrives either as JSON
/// (`RespondType=JSON`) with a nested `Result`, or as a flat query string.
#[derive(Debug, Clone, PartialEq)]
struct TradeResult {
    status: String,
    message: Option<String>,
    merchant_order_no: Option<String>,
    trade_no: Option<String>,
    payment_type: Option<String>,
    card6: Option<String>,
    card4: Option<String>,
    amount: Option<i64>,
    raw: JsonValue,
}

impl TradeResult {
    fn parse(plaintext: &str) -> PaymentResult<Self> {
        let raw: JsonValue = match serde_json::from_str::<JsonValue>(plaintext) {
            Ok(value @ JsonValue::Object(_)) => value,
            _ => {
                let flat: HashMap<String, String> =
                    url::form_urlencoded::parse(plaintext.as_bytes())
                        .into_owned()
                        .collect();
                if !flat.contains_key("Status") {
                    return Err(PaymentError::ValidationError {
                        message: "decrypted TradeInfo is neither JSON nor a query string"
                            .to_string(),
                        field: Some("TradeInfo".to_string()),
                    });
                }
                serde_json::to_value(flat).unwrap_or(JsonValue::Null)
            }
        };

        // `Result` may be an object, a JSON-encoded string, or absent (flat form).
        let result = match raw.get("Result") {
            Some(JsonValue::Object(_)) => raw["Result"].clone(),
            Some(JsonValue::String(s)) => serde_json::from_str(s).unwrap_or(JsonValue::Null),
            _ => raw.clone(),
        };
        let card_info = result.get("CardInfo").cloned().unwrap_or(JsonValue::Null);
        let field = |name: &str| {
            text(result.get(name))
                .or_else(|| text(card_info.get(name)))
                .or_else(|| text(raw.get(name)))
        };

        let merchant_order_no = field("MerchantOrderNo");
        let trade_no = field("TradeNo");
        let payment_type = field("PaymentType");
        let card6 = field("Card6No");
        let card4 = field("Card4No");
        let amount = field("Amt").and_then(|a| a.parse::<i64>().ok());

        Ok(Self {
            status: text(raw.get("Status")).unwrap_or_default(),
            message: text(raw.get("Message")),
            merchant_order_no,
            trade_no,
            payment_type,
            card6,
            card4,
            amount,
            raw,
        })
    }

    fn card_mask(&self) -> Option<String> {
        match (&self.card6, &self.card4) {
            (Some(first), Some(last)) => Some(format!("{}******{}", first, last)),
            _ => None,
        }
    }

    fn settlement(&self) -> SettlementPayload {
        SettlementPayload {
            transaction_reference: self.trade_no.clone(),
            payment_method: self.payment_type.clone(),
            card_mask: self.card_mask(),
            details: ProviderPayload::Newebpay {
                trade_no: self.trade_no.clone(),
                message: self.message.clone(),
                raw: self.raw.clone(),
            },
        }
    }
}

fn text(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
