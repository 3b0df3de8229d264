//! Order lifecycle.
//!
//! Only `pending` orders can settle, fail or be cancelled, and only `paid`
//! orders can be refunded. Every transition goes through a compare-and-swap in
//! the repository, so a duplicate or racing trigger observes
//! `AlreadyApplied` / `Unchanged` instead of an error. Settlement returns a
//! [`SettledEvent`] that the caller routes to ticket issuance explicitly.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::orders::model::{Order, OrderStatus};
use crate::orders::repository::{OrderRepository, SettlementRecord};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{PaymentOutcome, SettlementPayload};
use crate::services::catalog::Catalog;

const TICKET_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct SettledEvent {
    pub order: Order,
    pub ticket_code: String,
    pub valid_until: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyResult {
    Settled(SettledEvent),
    Failed(Order),
    /// The order had already left `pending`; nothing was written.
    AlreadyApplied(Order),
}

impl ApplyResult {
    pub fn order(&self) -> &Order {
        match self {
            ApplyResult::Settled(event) => &event.order,
            ApplyResult::Failed(order) | ApplyResult::AlreadyApplied(order) => order,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(Order),
    Unchanged(Order),
}

pub struct OrderStateMachine {
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn Catalog>,
    ticket_validity: Duration,
}

impl OrderStateMachine {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn Catalog>,
        ticket_validity: Duration,
    ) -> Self {
        Self {
            orders,
            catalog,
            ticket_validity,
        }
    }

    pub fn orders(&self) -> &Arc<dyn OrderRepository> {
        &self.orders
    }

    pub async fn apply_outcome(
        &self,
        order_id: Uuid,
        outcome: &PaymentOutcome,
        settlement: Option<&SettlementPayload>,
    ) -> PaymentResult<ApplyResult> {
        let order = self.load(order_id).await?;
        if !order.is_pending() {
            info!(
                order_id = %order_id,
                status = %order.status,
                "outcome already applied, ignoring"
            );
            return Ok(ApplyResult::AlreadyApplied(order));
        }

        match outcome {
            PaymentOutcome::Success => self.settle(order, settlement).await,
            PaymentOutcome::Failure { reason } => {
                let payload = settlement
                    .map(|s| s.details.to_json())
                    .unwrap_or_else(|| serde_json::json!({ "reason": reason }));
                match self.orders.fail(order_id, &payload).await? {
                    Some(failed) => {
                        info!(order_id = %order_id, reason = %reason, "order marked failed");
                        Ok(ApplyResult::Failed(failed))
                    }
                    None => Ok(ApplyResult::AlreadyApplied(self.load(order_id).await?)),
                }
            }
        }
    }

    async fn settle(
        &self,
        order: Order,
        settlement: Option<&SettlementPayload>,
    ) -> PaymentResult<ApplyResult> {
        let now = Utc::now();
        let valid_until = self.valid_until_for(&order, now).await?;

        for attempt in 1..=TICKET_CODE_ATTEMPTS {
            let record = SettlementRecord {
                transaction_reference: settlement.and_then(|s| s.transaction_reference.clone()),
                payment_method: settlement.and_then(|s| s.payment_method.clone()),
                card_mask: settlement.and_then(|s| s.card_mask.clone()),
                provider_payload: settlement
                    .map(|s| s.details.to_json())
                    .unwrap_or(serde_json::Value::Null),
                paid_at: now,
                ticket_code: generate_ticket_code(&order, now),
                valid_until,
            };

            match self.orders.settle(order.id, &record).await {
                Ok(Some(paid)) => {
                    info!(
                        order_id = %paid.id,
                        provider = %paid.provider,
                        order_ref = %paid.provider_order_reference,
                        "order settled"
                    );
                    return Ok(ApplyResult::Settled(SettledEvent {
                        order: paid,
                        ticket_code: record.ticket_code,
                        valid_until,
                    }));
                }
                Ok(None) => {
                    info!(order_id = %order.id, "lost settlement race, treating as applied");
                    return Ok(ApplyResult::AlreadyApplied(self.load(order.id).await?));
                }
                Err(e) if e.is_unique_violation() && attempt < TICKET_CODE_ATTEMPTS => {
                    warn!(order_id = %order.id, attempt, "ticket code collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PaymentError::Storage {
            message: "could not allocate a unique ticket code".to_string(),
        })
    }

    /// Customer-initiated cancellation of their own pending order.
    pub async fn cancel(&self, order_id: Uuid, customer_id: Uuid) -> PaymentResult<Transition> {
        let order = self.load(order_id).await?;
        if order.customer_id != customer_id {
            // Indistinguishable from a missing order to the caller.
            return Err(PaymentError::OrderNotFound {
                reference: order_id.to_string(),
            });
        }
        self.transition(order, OrderStatus::Cancelled).await
    }

    pub async fn refund(&self, order_id: Uuid) -> PaymentResult<Transition> {
        let order = self.load(order_id).await?;
        self.transition(order, OrderStatus::Refunded).await
    }

    /// Moves the order along the lifecycle. A move the lifecycle does not
    /// allow from the current status leaves the order unchanged.
    async fn transition(&self, order: Order, to: OrderStatus) -> PaymentResult<Transition> {
        let from = order.status;
        if !from.can_transition_to(to) {
            return Ok(Transition::Unchanged(order));
        }
        match self.orders.transition(order.id, from, to).await? {
            Some(updated) => {
                info!(order_id = %updated.id, from = %from, to = %to, "order transitioned");
                Ok(Transition::Applied(updated))
            }
            None => Ok(Transition::Unchanged(self.load(order.id).await?)),
        }
    }

    async fn load(&self, order_id: Uuid) -> PaymentResult<Order> {
        self.orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| PaymentError::OrderNotFound {
                reference: order_id.to_string(),
            })
    }

    async fn valid_until_for(&self, order: &Order, now: DateTime<Utc>) -> PaymentResult<DateTime<Utc>> {
        let product_expiry = self
            .catalog
            .product(order.product_id)
            .await?
            .and_then(|p| p.ticket_expiry);
        Ok(product_expiry.unwrap_or(now + self.ticket_validity))
    }
}

/// `TKT` + last four characters of the order id + settlement timestamp + four
/// random digits.
pub fn generate_ticket_code(order: &Order, now: DateTime<Utc>) -> String {
    let id = order.id.simple().to_string().to_uppercase();
    let suffix = &id[id.len() - 4..];
    let random: u16 = rand::thread_rng().gen_range(1000..=9999);
    format!("TKT{}{}{}", suffix, now.format("%Y%m%d%H%M%S"), random)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::model::NewOrder;
    use crate::orders::repository::InMemoryOrderRepository;
    use crate::payments::types::{ProviderName, ProviderPayload};
    use crate::services::catalog::{InMemoryCatalog, ProductSnapshot};

    async fn fixture(ticket_expiry: Option<DateTime<Utc>>) -> (OrderStateMachine, Order) {
        let repo = Arc::new(InMemoryOrderRepository::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let product_id = Uuid::new_v4();
        catalog
            .add_product(ProductSnapshot {
                id: product_id,
                merchant_id: Uuid::new_v4(),
                name: "Latte".to_string(),
                unit_price: 500,
                ticket_expiry,
                is_active: true,
            })
            .await;
        let order = Order::new_pending(
            NewOrder {
                provider: ProviderName::Newebpay,
                item_description: "Latte".to_string(),
                quantity: 5,
                unit_price: 500,
                customer_id: Uuid::new_v4(),
                product_id,
                provider_order_reference: "ORD1019120000".to_string(),
            },
            Utc::now(),
        )
        .unwrap();
        repo.insert(&order).await.unwrap();
        (
            OrderStateMachine::new(repo, catalog, Duration::days(30)),
            order,
        )
    }

    fn settlement() -> SettlementPayload {
        SettlementPayload {
            transaction_reference: Some("24101912000012345".to_string()),
            payment_method: Some("CREDIT".to_string()),
            card_mask: Some("400022******1111".to_string()),
            details: ProviderPayload::Newebpay {
                trade_no: Some("24101912000012345".to_string()),
                message: Some("授權成功".to_string()),
                raw: serde_json::json!({"Status": "SUCCESS"}),
            },
        }
    }

    #[tokio::test]
    async fn success_settles_once() {
        let (machine, order) = fixture(None).await;
        let payload = settlement();

        let first = machine
            .apply_outcome(order.id, &PaymentOutcome::Success, Some(&payload))
            .await
            .unwrap();
        let ApplyResult::Settled(event) = first else {
            panic!("expected settlement");
        };
        assert_eq!(event.order.status, OrderStatus::Paid);
        assert!(event.ticket_code.starts_with("TKT"));
        assert_eq!(event.order.card_mask.as_deref(), Some("400022******1111"));
        assert!(event.order.amount_is_consistent());

        let second = machine
            .apply_outcome(order.id, &PaymentOutcome::Success, Some(&payload))
            .await
            .unwrap();
        let ApplyResult::AlreadyApplied(same) = second else {
            panic!("expected no-op");
        };
        assert_eq!(same.ticket_code.as_deref(), Some(event.ticket_code.as_str()));
    }

    #[tokio::test]
    async fn product_expiry_overrides_default_validity() {
        let fixed = Utc::now() + Duration::days(3);
        let (machine, order) = fixture(Some(fixed)).await;
        let result = machine
            .apply_outcome(order.id, &PaymentOutcome::Success, None)
            .await
            .unwrap();
        let ApplyResult::Settled(event) = result else {
            panic!("expected settlement");
        };
        assert_eq!(event.valid_until, fixed);
    }

    #[tokio::test]
    async fn failure_is_terminal_and_blocks_late_success() {
        let (machine, order) = fixture(None).await;
        let failed = machine
            .apply_outcome(
                order.id,
                &PaymentOutcome::Failure {
                    reason: "card declined".to_string(),
                },
                None,
            )
            .await
            .unwrap();
        assert!(matches!(failed, ApplyResult::Failed(ref o) if o.status == OrderStatus::Failed));

        let late = machine
            .apply_outcome(order.id, &PaymentOutcome::Success, None)
            .await
            .unwrap();
        assert!(matches!(late, ApplyResult::AlreadyApplied(ref o) if o.ticket_code.is_none()));
    }

    #[tokio::test]
    async fn cancel_requires_owner_and_pending() {
        let (machine, order) = fixture(None).await;
        assert!(matches!(
            machine.cancel(order.id, Uuid::new_v4()).await,
            Err(PaymentError::OrderNotFound { .. })
        ));
        assert!(matches!(
            machine.cancel(order.id, order.customer_id).await.unwrap(),
            Transition::Applied(ref o) if o.status == OrderStatus::Cancelled
        ));
        assert!(matches!(
            machine.cancel(order.id, order.customer_id).await.unwrap(),
            Transition::Unchanged(_)
        ));
        assert!(matches!(
            machine.refund(order.id).await.unwrap(),
            Transition::Unchanged(_)
        ));
    }

    #[tokio::test]
    async fn refund_only_from_paid() {
        let (machine, order) = fixture(None).await;
        assert!(matches!(
            machine.refund(order.id).await.unwrap(),
            Transition::Unchanged(ref o) if o.status == OrderStatus::Pending
        ));
        machine
            .apply_outcome(order.id, &PaymentOutcome::Success, None)
            .await
            .unwrap();
        assert!(matches!(
            machine.refund(order.id).await.unwrap(),
            Transition::Applied(ref o) if o.status == OrderStatus::Refunded
        ));
        assert!(matches!(
            machine.cancel(order.id, order.customer_id).await.unwrap(),
            Transition::Unchanged(ref o) if o.status == OrderStatus::Refunded
        ));
    }

    #[tokio::test]
    async fn missing_order_is_reported() {
        let (machine, _) = fixture(None).await;
        assert!(matches!(
            machine
                .apply_outcome(Uuid::new_v4(), &PaymentOutcome::Success, None)
                .await,
            Err(PaymentError::OrderNotFound { .. })
        ));
    }

    #[test]
    fn ticket_code_has_expected_shape() {
        let order = Order::new_pending(
            NewOrder {
                provider: ProviderName::Linepay,
                item_description: "x".to_string(),
                quantity: 1,
                unit_price: 1,
                customer_id: Uuid::new_v4(),
                product_id: Uuid::new_v4(),
                provider_order_reference: "LP1".to_string(),
            },
            Utc::now(),
        )
        .unwrap();
        let code = generate_ticket_code(&order, Utc::now());
        assert_eq!(code.len(), 3 + 4 + 14 + 4);
        assert!(code[3..].chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
