use crate::orders::repository::OrderRepository;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::ProviderAdapter;
use crate::payments::signature;
use crate::payments::types::{
    CallbackChannel, CallbackVerdict, OrderSnapshot, OutboundRequest, PaymentOutcome,
    ProviderName, ProviderPayload, RawCallback, SettlementPayload,
};
use crate::payments::utils::{secure_eq, PaymentHttpClient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{error, info, warn};

const REQUEST_URI: &str = "/v3/payments/request";
const SUCCESS_CODE: &str = "0000";
const RETRY_MARKER: &str = "-retry-";

#[derive(Debug, Clone)]
pub struct LinepayConfig {
    pub channel_id: String,
    pub channel_secret: String,
    pub api_url: String,
    pub confirm_url: String,
    pub cancel_url: String,
    pub currency: String,
    pub timeout_secs: u64,
}

impl LinepayConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| PaymentError::ValidationError {
                message: format!("{} environment variable is required", name),
                field: Some(name.to_string()),
            })
        };

        Ok(Self {
            channel_id: required("LINEPAY_CHANNEL_ID")?,
            channel_secret: required("LINEPAY_CHANNEL_SECRET")?,
            api_url: std::env::var("LINEPAY_API_URL")
                .unwrap_or_else(|_| "https://sandbox-api-pay.line.me".to_string()),
            confirm_url: required("LINEPAY_CONFIRM_URL")?,
            cancel_url: required("LINEPAY_CANCEL_URL")?,
            currency: std::env::var("LINEPAY_CURRENCY").unwrap_or_else(|_| "TWD".to_string()),
            timeout_secs: std::env::var("LINEPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(12),
        })
    }
}

pub struct LinepayAdapter {
    config: LinepayConfig,
    http: PaymentHttpClient,
}

impl LinepayAdapter {
    /// The confirm call is never retried internally; a timeout is surfaced
    /// to the caller and the customer or provider retries.
    pub fn new(config: LinepayConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "linepay",
            Duration::from_secs(config.timeout_secs),
            0,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(LinepayConfig::from_env()?)
    }

    async fn signed_post<T: serde::de::DeserializeOwned>(
        &self,
        uri: &str,
        body: &str,
    ) -> PaymentResult<T> {
        let nonce = signature::nonce_now();
        let sig = signature::sign(&self.config.channel_secret, uri, body, &nonce)?;
        self.http
            .request_json(
                reqwest::Method::POST,
                &format!("{}{}", self.config.api_url.trim_end_matches('/'), uri),
                Some(body),
                &[
                    ("X-LINE-ChannelId", self.config.channel_id.as_str()),
                    ("X-LINE-Authorization-Nonce", nonce.as_str()),
                    ("X-LINE-Authorization", sig.as_str()),
                ],
            )
            .await
    }

    fn reject(message: &str) -> CallbackVerdict {
        CallbackVerdict::Rejected {
            error: PaymentError::SignatureMismatch {
                provider: "linepay".to_string(),
                message: message.to_string(),
            },
        }
    }
}

/// Order ids sent on a re-payment carry a `-retry-<unix>` suffix.
pub fn base_order_reference(order_id: &str) -> &str {
    order_id
        .split_once(RETRY_MARKER)
        .map(|(base, _)| base)
        .unwrap_or(order_id)
}

#[async_trait]
impl ProviderAdapter for LinepayAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Linepay
    }

    async fn build_outbound_request(
        &self,
        order: &OrderSnapshot,
    ) -> PaymentResult<OutboundRequest> {
        let order_id = if order.is_retry {
            format!(
                "{}{}{}",
                order.provider_order_reference,
                RETRY_MARKER,
                chrono::Utc::now().timestamp()
            )
        } else {
            order.provider_order_reference.clone()
        };

        let request = LinepayRequest {
            amount: order.amount,
            currency: &self.config.currency,
            order_id: &order_id,
            packages: vec![LinepayPackage {
                id: order.provider_order_reference.clone(),
                amount: order.amount,
                products: vec![LinepayProduct {
                    name: &order.item_description,
                    quantity: order.quantity,
                    price: order.unit_price,
                }],
            }],
            redirect_urls: LinepayRedirectUrls {
                confirm_url: &self.config.confirm_url,
                cancel_url: &self.config.cancel_url,
            },
        };
        let body = serde_json::to_string(&request).map_err(|e| PaymentError::ValidationError {
            message: format!("could not serialize payment request: {}", e),
            field: None,
        })?;

        let raw: LinepayEnvelope<LinepayRequestInfo> = self.signed_post(REQUEST_URI, &body).await?;
        if raw.return_code != SUCCESS_CODE {
            warn!(
                order_ref = %order.provider_order_reference,
                return_code = %raw.return_code,
                "linepay request rejected"
            );
            return Err(PaymentError::ProviderError {
                provider: "linepay".to_string(),
                message: raw.return_message.unwrap_or_default(),
                provider_code: Some(raw.return_code),
                retryable: false,
            });
        }

        let info = raw.info.ok_or_else(|| PaymentError::ProviderError {
            provider: "linepay".to_string(),
            message: "success response without info".to_string(),
            provider_code: Some(SUCCESS_CODE.to_string()),
            retryable: false,
        })?;
        let transaction_id = id_string(&info.transaction_id).ok_or_else(|| {
            PaymentError::ProviderError {
                provider: "linepay".to_string(),
                message: "success response without transactionId".to_string(),
                provider_code: Some(SUCCESS_CODE.to_string()),
                retryable: false,
            }
        })?;
        info!(
            order_ref = %order.provider_order_reference,
            transaction_id = %transaction_id,
            retry = order.is_retry,
            "linepay payment requested"
        );

        Ok(OutboundRequest::Redirect {
            url: info.payment_url.web,
            provider_transaction_id: transaction_id,
        })
    }

    async fn parse_inbound_callback(
        &self,
        channel: CallbackChannel,
        raw: &RawCallback,
        orders: &dyn OrderRepository,
    ) -> PaymentResult<CallbackVerdict> {
        let (Some(transaction_id), Some(order_id)) =
            (raw.field("transactionId"), raw.field("orderId"))
        else {
            warn!(channel = %channel, "linepay confirm missing transactionId or orderId");
            return Ok(Self::reject("missing transactionId or orderId"));
        };

        let reference = base_order_reference(order_id);
        let Some(order) = orders
            .find_by_provider_reference(ProviderName::Linepay, reference)
            .await?
        else {
            error!(
                channel = %channel,
                order_ref = %reference,
                transaction_id = %transaction_id,
                "linepay confirm for unknown order, needs manual reconciliation"
            );
            return Err(PaymentError::OrderNotFound {
                reference: reference.to_string(),
            });
        };

        // The redirect is unsigned; it is trusted only if it names the
        // transaction issued for this order.
        let issued = order.checkout_transaction_id.as_deref().unwrap_or("");
        if !secure_eq(issued.as_bytes(), transaction_id.as_bytes()) {
            error!(
                order_ref = %reference,
                "linepay transactionId does not match the issued transaction"
            );
            return Ok(Self::reject("transactionId does not match the order"));
        }

        if !order.is_pending() {
            return Ok(CallbackVerdict::Stale { order });
        }

        let body = serde_json::to_string(&LinepayConfirmRequest {
            amount: order.amount,
            currency: &self.config.currency,
        })
        .map_err(|e| PaymentError::ValidationError {
            message: format!("could not serialize confirm request: {}", e),
            field: None,
        })?;
        let uri = format!("/v3/payments/{}/confirm", transaction_id);
        let raw_response: JsonValue = self.signed_post(&uri, &body).await?;
        let confirm: LinepayEnvelope<LinepayConfirmInfo> =
            serde_json::from_value(raw_response.clone()).map_err(|e| {
                PaymentError::ProviderError {
                    provider: "linepay".to_string(),
                    message: format!("invalid confirm response: {}", e),
                    provider_code: None,
                    retryable: false,
                }
            })?;

        if confirm.return_code != SUCCESS_CODE {
            warn!(
                order_ref = %reference,
                return_code = %confirm.return_code,
                "linepay confirm declined, order stays pending"
            );
            return Err(PaymentError::ProviderError {
                provider: "linepay".to_string(),
                message: confirm.return_message.unwrap_or_default(),
                provider_code: Some(confirm.return_code),
                retryable: false,
            });
        }

        let pay_info = confirm
            .info
            .as_ref()
            .and_then(|i| i.pay_info.first().cloned())
            .unwrap_or_default();

        Ok(CallbackVerdict::Verified {
            order,
            outcome: PaymentOutcome::Success,
            settlement: Some(SettlementPayload {
                transaction_reference: Some(transaction_id.to_string()),
                payment_method: pay_info.method,
                card_mask: pay_info.masked_credit_card_number,
                details: ProviderPayload::Linepay {
                    transaction_id: transaction_id.to_string(),
                    return_code: confirm.return_code,
                    return_message: confirm.return_message,
                    raw: raw_response,
                },
            }),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LinepayRequest<'a> {
    amount: i64,
    currency: &'a str,
    order_id: &'a str,
    packages: Vec<LinepayPackage<'a>>,
    redirect_urls: LinepayRedirectUrls<'a>,
}

#[derive(Debug, Serialize)]
struct LinepayPackage<'a> {
    id: String,
    amount: i64,
    products: Vec<LinepayProduct<'a>>,
}

#[derive(Debug, Serialize)]
struct LinepayProduct<'a> {
    name: &'a str,
    quantity: i32,
    price: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LinepayRedirectUrls<'a> {
    confirm_url: &'a str,
    cancel_url: &'a str,
}

#[derive(Debug, Serialize)]
struct LinepayConfirmRequest<'a> {
    amount: i64,
    currency: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinepayEnvelope<T> {
    return_code: String,
    return_message: Option<String>,
    info: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinepayRequestInfo {
    /// 19-digit number; kept as raw JSON to avoid precision loss.
    transaction_id: JsonValue,
    payment_url: LinepayPaymentUrl,
}

#[derive(Debug, Deserialize)]
struct LinepayPaymentUrl {
    web: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinepayConfirmInfo {
    #[serde(default)]
    pay_info: Vec<LinepayPayInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinepayPayInfo {
    method: Option<String>,
    masked_credit_card_number: Option<String>,
}

fn id_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_suffix_is_stripped() {
        assert_eq!(base_order_reference("LP1019120000"), "LP1019120000");
        assert_eq!(
            base_order_reference("LP1019120000-retry-1729339200"),
            "LP1019120000"
        );
    }

    #[test]
    fn request_body_uses_camel_case_wire_names() {
        let body = serde_json::to_value(LinepayRequest {
            amount: 2500,
            currency: "TWD",
            order_id: "LP1",
            packages: vec![LinepayPackage {
                id: "LP1".to_string(),
                amount: 2500,
                products: vec![LinepayProduct {
                    name: "Latte",
                    quantity: 5,
                    price: 500,
                }],
            }],
            redirect_urls: LinepayRedirectUrls {
                confirm_url: "https://shop.example.com/confirm",
                cancel_url: "https://shop.example.com/cancel",
            },
        })
        .unwrap();
        assert_eq!(body["orderId"], "LP1");
        assert_eq!(body["redirectUrls"]["confirmUrl"], "https://shop.example.com/confirm");
        assert_eq!(body["packages"][0]["products"][0]["price"], 500);
    }

    #[test]
    fn large_transaction_ids_keep_precision() {
        let info: LinepayRequestInfo = serde_json::from_str(
            r#"{"transactionId":2024101900000012345,"paymentUrl":{"web":"https://pay"}}"#,
        )
        .unwrap();
        assert_eq!(
            id_string(&info.transaction_id).as_deref(),
            Some("2024101900000012345")
        );
    }
}
