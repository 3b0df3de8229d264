//! Callback ingestion for both channels of every provider.
//!
//! The ingestor authenticates through the adapter before anything is written
//! and relies on the state machine's pending-only precondition for
//! idempotency: a duplicate or racing delivery finds the order already
//! settled and is acknowledged as a no-op. On the notify channel the
//! acknowledgement is produced only after the transition has been stored.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::orders::model::{Order, OrderStatus};
use crate::orders::state_machine::{ApplyResult, OrderStateMachine};
use crate::payments::error::PaymentError;
use crate::payments::factory::ProviderRegistry;
use crate::payments::types::{CallbackChannel, CallbackVerdict, ProviderName, RawCallback};
use crate::tickets::service::TicketService;

/// Human-facing result of a return-channel callback. Anyone holding the
/// callback URL can replay it, so the ticket code itself is never included;
/// `ticket_url` points at the authenticated ticket view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultPage {
    Success {
        order_id: Uuid,
        order_reference: String,
        amount: i64,
        ticket_url: String,
    },
    Failure {
        order_reference: Option<String>,
        reason: String,
    },
    /// Payment may have gone through but cannot be matched locally.
    ContactSupport { reference: Option<String> },
    TryAgainLater { reference: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestResponse {
    Page(ResultPage),
    Ack { accepted: bool, body: String },
}

/// What happened to the callback, before it is rendered for a channel.
enum Disposition {
    Settled(Order),
    Failed(Order, String),
    Rejected(String),
    Unmatched(Option<String>),
    /// Authentic callback whose amount disagrees with the order.
    AmountMismatch,
    Transient(Option<String>, String),
    Refused(Option<String>, String),
}

pub struct WebhookIngestor {
    providers: ProviderRegistry,
    state_machine: Arc<OrderStateMachine>,
    tickets: Arc<TicketService>,
}

impl WebhookIngestor {
    pub fn new(
        providers: ProviderRegistry,
        state_machine: Arc<OrderStateMachine>,
        tickets: Arc<TicketService>,
    ) -> Self {
        Self {
            providers,
            state_machine,
            tickets,
        }
    }

    pub async fn ingest(
        &self,
        channel: CallbackChannel,
        provider: ProviderName,
        raw: &RawCallback,
    ) -> IngestResponse {
        let adapter = match self.providers.get(provider) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(provider = %provider, channel = %channel, "callback for disabled provider");
                return match channel {
                    CallbackChannel::Notify => IngestResponse::Ack {
                        accepted: false,
                        body: e.user_message(),
                    },
                    CallbackChannel::Return => IngestResponse::Page(ResultPage::Failure {
                        order_reference: None,
                        reason: e.user_message(),
                    }),
                };
            }
        };

        let orders = self.state_machine.orders().clone();
        let disposition = match adapter
            .parse_inbound_callback(channel, raw, orders.as_ref())
            .await
        {
            Ok(verdict) => self.apply(provider, channel, verdict).await,
            Err(e) => classify_error(provider, channel, e),
        };

        match channel {
            CallbackChannel::Return => IngestResponse::Page(render(disposition)),
            CallbackChannel::Notify => {
                let (accepted, reason) = match &disposition {
                    Disposition::Settled(_) | Disposition::Failed(..) => (true, String::new()),
                    Disposition::Rejected(reason) => (false, reason.clone()),
                    Disposition::Unmatched(_) => (false, "Order Not Found".to_string()),
                    Disposition::AmountMismatch => (false, "Amount Mismatch".to_string()),
                    Disposition::Transient(_, reason) | Disposition::Refused(_, reason) => {
                        (false, reason.clone())
                    }
                };
                IngestResponse::Ack {
                    accepted,
                    body: adapter.notify_ack(accepted, &reason),
                }
            }
        }
    }

    async fn apply(
        &self,
        provider: ProviderName,
        channel: CallbackChannel,
        verdict: CallbackVerdict,
    ) -> Disposition {
        match verdict {
            CallbackVerdict::Rejected { error } => {
                // The adapter has already logged the security event.
                Disposition::Rejected(error.user_message())
            }
            CallbackVerdict::Stale { order } => {
                info!(
                    provider = %provider,
                    channel = %channel,
                    order_ref = %order.provider_order_reference,
                    status = %order.status,
                    "duplicate callback, order already final"
                );
                settled_or_failed(order)
            }
            CallbackVerdict::Verified {
                order,
                outcome,
                settlement,
            } => {
                let reference = order.provider_order_reference.clone();
                match self
                    .state_machine
                    .apply_outcome(order.id, &outcome, settlement.as_ref())
                    .await
                {
                    Ok(ApplyResult::Settled(event)) => {
                        self.tickets.on_settled(&event).await;
                        Disposition::Settled(event.order)
                    }
                    Ok(ApplyResult::Failed(order)) => {
                        let reason = match &outcome {
                            crate::payments::types::PaymentOutcome::Failure { reason } => {
                                reason.clone()
                            }
                            _ => "Payment failed".to_string(),
                        };
                        Disposition::Failed(order, reason)
                    }
                    Ok(ApplyResult::AlreadyApplied(order)) => settled_or_failed(order),
                    Err(e) => {
                        error!(
                            provider = %provider,
                            channel = %channel,
                            order_ref = %reference,
                            error = %e,
                            "failed to apply verified callback"
                        );
                        if e.is_retryable() {
                            Disposition::Transient(Some(reference), e.user_message())
                        } else {
                            Disposition::Refused(Some(reference), e.user_message())
                        }
                    }
                }
            }
        }
    }
}

fn settled_or_failed(order: Order) -> Disposition {
    match order.status {
        OrderStatus::Paid | OrderStatus::Refunded => Disposition::Settled(order),
        status => Disposition::Failed(order, format!("Order is {}", status)),
    }
}

fn classify_error(provider: ProviderName, channel: CallbackChannel, err: PaymentError) -> Disposition {
    match err {
        PaymentError::OrderNotFound { reference } => {
            error!(
                provider = %provider,
                channel = %channel,
                order_ref = %reference,
                "verified callback for unknown order, needs manual reconciliation"
            );
            Disposition::Unmatched(Some(reference))
        }
        PaymentError::AmountMismatch { expected, reported } => {
            error!(
                provider = %provider,
                channel = %channel,
                expected,
                reported,
                "settled amount differs from order amount, needs manual reconciliation"
            );
            Disposition::AmountMismatch
        }
        e if e.is_retryable() => {
            warn!(provider = %provider, channel = %channel, error = %e, "callback processing failed, provider will retry");
            Disposition::Transient(None, e.user_message())
        }
        e => {
            warn!(provider = %provider, channel = %channel, error = %e, "callback refused");
            Disposition::Refused(None, e.user_message())
        }
    }
}

fn render(disposition: Disposition) -> ResultPage {
    match disposition {
        Disposition::Settled(order) => ResultPage::Success {
            ticket_url: ticket_url(order.id),
            order_id: order.id,
            order_reference: order.provider_order_reference,
            amount: order.amount,
        },
        Disposition::Failed(order, reason) => ResultPage::Failure {
            order_reference: Some(order.provider_order_reference),
            reason,
        },
        Disposition::Rejected(reason) => ResultPage::Failure {
            order_reference: None,
            reason,
        },
        Disposition::Unmatched(reference) => ResultPage::ContactSupport { reference },
        Disposition::AmountMismatch => ResultPage::ContactSupport { reference: None },
        Disposition::Transient(reference, _) => ResultPage::TryAgainLater { reference },
        Disposition::Refused(reference, reason) => ResultPage::Failure {
            order_reference: reference,
            reason,
        },
    }
}

fn ticket_url(order_id: Uuid) -> String {
    format!("/api/orders/{}/ticket", order_id)
}
