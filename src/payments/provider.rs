use crate::orders::repository::OrderRepository;
use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CallbackChannel, CallbackVerdict, OrderSnapshot, OutboundRequest, ProviderName, RawCallback,
};
use async_trait::async_trait;

/// Gateway-specific half of the payment flow.
///
/// Adapters never mutate orders. `parse_inbound_callback` only reads the
/// repository to resolve and cross-check the order a callback refers to; the
/// ingestor drives the state machine with the verdict.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> ProviderName;

    async fn build_outbound_request(&self, order: &OrderSnapshot)
        -> PaymentResult<OutboundRequest>;

    /// Authenticate and interpret a callback. Authenticity failures come back
    /// as `CallbackVerdict::Rejected`; operational failures (unknown order,
    /// provider unreachable, storage) as `Err`.
    async fn parse_inbound_callback(
        &self,
        channel: CallbackChannel,
        raw: &RawCallback,
        orders: &dyn OrderRepository,
    ) -> PaymentResult<CallbackVerdict>;

    /// Body returned on the notify channel.
    fn notify_ack(&self, accepted: bool, reason: &str) -> String {
        if accepted {
            "OK".to_string()
        } else {
            format!("ERROR: {}", reason)
        }
    }
}
