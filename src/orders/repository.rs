//! Storage seam for orders.
//!
//! Every state-changing method is a compare-and-swap: it applies only when the
//! row is still in the expected state and returns `None` otherwise. Callers
//! treat `None` as "already applied", never as an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::orders::model::{Order, OrderStatus, TicketState};
use crate::payments::types::ProviderName;

/// Fields written on the `pending -> paid` transition.
#[derive(Debug, Clone)]
pub struct SettlementRecord {
    pub transaction_reference: Option<String>,
    pub payment_method: Option<String>,
    pub card_mask: Option<String>,
    pub provider_payload: JsonValue,
    pub paid_at: DateTime<Utc>,
    pub ticket_code: String,
    pub valid_until: DateTime<Utc>,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Fails with a unique violation when the provider reference is taken.
    async fn insert(&self, order: &Order) -> Result<Order, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DatabaseError>;

    async fn find_by_provider_reference(
        &self,
        provider: ProviderName,
        reference: &str,
    ) -> Result<Option<Order>, DatabaseError>;

    async fn find_by_ticket_code(&self, code: &str) -> Result<Option<Order>, DatabaseError>;

    /// Store the provider transaction id and hosted URL of a checkout attempt.
    /// Applies only while the order is pending.
    async fn record_checkout_attempt(
        &self,
        id: Uuid,
        transaction_id: &str,
        payment_url: &str,
    ) -> Result<Option<Order>, DatabaseError>;

    /// `pending -> paid`. Fails with a unique violation on a ticket code clash.
    async fn settle(
        &self,
        id: Uuid,
        settlement: &SettlementRecord,
    ) -> Result<Option<Order>, DatabaseError>;

    /// `pending -> failed`, keeping the raw payload for diagnostics.
    async fn fail(&self, id: Uuid, payload: &JsonValue) -> Result<Option<Order>, DatabaseError>;

    /// Plain status transition with no side fields (cancel, refund).
    async fn transition(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, DatabaseError>;

    /// `unused -> used` on a paid order.
    async fn mark_ticket_used(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>, DatabaseError>;

    /// Paid, unused tickets with no reminder yet and `valid_until` in
    /// `[from, to]`.
    async fn tickets_pending_reminder(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Order>, DatabaseError>;

    /// Set `reminder_sent_at` if unset. Returns whether this caller won.
    async fn claim_reminder(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError>;

    /// Undo a claim whose notification could not be delivered.
    async fn release_reminder(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Mark unused tickets whose `valid_until` is before `cutoff` as expired.
    /// Returns the count.
    async fn expire_overdue_tickets(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError>;
}

/// Process-local store used with `SKIP_EXTERNALS=true` and in tests. A single
/// write lock makes each compare-and-swap atomic.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<Uuid, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a stored order wholesale. Test fixtures use this to age tickets.
    pub async fn overwrite(&self, order: Order) {
        self.orders.write().await.insert(order.id, order);
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }

    async fn update_if<P, F>(
        &self,
        id: Uuid,
        precondition: P,
        apply: F,
    ) -> Result<Option<Order>, DatabaseError>
    where
        P: FnOnce(&Order) -> bool + Send,
        F: FnOnce(&mut Order) + Send,
    {
        let mut orders = self.orders.write().await;
        let Some(order) = orders.get_mut(&id) else {
            return Ok(None);
        };
        if !precondition(order) {
            return Ok(None);
        }
        apply(order);
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> Result<Order, DatabaseError> {
        let mut orders = self.orders.write().await;
        if orders.values().any(|o| {
            o.provider_order_reference == order.provider_order_reference
        }) {
            return Err(DatabaseError::unique_violation(
                "orders_provider_order_reference_key",
            ));
        }
        orders.insert(order.id, order.clone());
        Ok(order.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DatabaseError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_provider_reference(
        &self,
        provider: ProviderName,
        reference: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.provider == provider && o.provider_order_reference == reference)
            .cloned())
    }

    async fn find_by_ticket_code(&self, code: &str) -> Result<Option<Order>, DatabaseError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.ticket_code.as_deref() == Some(code))
            .cloned())
    }

    async fn record_checkout_attempt(
        &self,
        id: Uuid,
        transaction_id: &str,
        payment_url: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        self.update_if(id, Order::is_pending, |o| {
            o.checkout_transaction_id = Some(transaction_id.to_string());
            o.checkout_payment_url = Some(payment_url.to_string());
        })
        .await
    }

    async fn settle(
        &self,
        id: Uuid,
        settlement: &SettlementRecord,
    ) -> Result<Option<Order>, DatabaseError> {
        let mut orders = self.orders.write().await;
        if orders
            .values()
            .any(|o| o.ticket_code.as_deref() == Some(settlement.ticket_code.as_str()))
        {
            return Err(DatabaseError::unique_violation("orders_ticket_code_key"));
        }
        let Some(order) = orders.get_mut(&id) else {
            return Ok(None);
        };
        if order.status != OrderStatus::Pending {
            return Ok(None);
        }
        order.status = OrderStatus::Paid;
        order.provider_transaction_reference = settlement.transaction_reference.clone();
        order.payment_method = settlement.payment_method.clone();
        order.card_mask = settlement.card_mask.clone();
        order.provider_payload = Some(settlement.provider_payload.clone());
        order.paid_at = Some(settlement.paid_at);
        order.ticket_code = Some(settlement.ticket_code.clone());
        order.ticket_state = TicketState::Unused;
        order.valid_until = Some(settlement.valid_until);
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }

    async fn fail(&self, id: Uuid, payload: &JsonValue) -> Result<Option<Order>, DatabaseError> {
        self.update_if(id, Order::is_pending, |o| {
            o.status = OrderStatus::Failed;
            o.provider_payload = Some(payload.clone());
        })
        .await
    }

    async fn transition(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, DatabaseError> {
        self.update_if(id, |o| o.status == from, |o| o.status = to)
            .await
    }

    async fn mark_ticket_used(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>, DatabaseError> {
        self.update_if(
            id,
            |o| o.status == OrderStatus::Paid && o.ticket_state == TicketState::Unused,
            |o| {
                o.ticket_state = TicketState::Used;
                o.redeemed_at = Some(at);
            },
        )
        .await
    }

    async fn tickets_pending_reminder(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Order>, DatabaseError> {
        let mut due: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| {
                o.status == OrderStatus::Paid
                    && o.ticket_state == TicketState::Unused
                    && o.reminder_sent_at.is_none()
                    && o.valid_until.is_some_and(|v| v >= from && v <= to)
            })
            .cloned()
            .collect();
        due.sort_by_key(|o| o.valid_until);
        Ok(due)
    }

    async fn claim_reminder(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let claimed = self
            .update_if(
                id,
                |o| o.reminder_sent_at.is_none(),
                |o| o.reminder_sent_at = Some(at),
            )
            .await?;
        Ok(claimed.is_some())
    }

    async fn release_reminder(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.update_if(id, |_| true, |o| o.reminder_sent_at = None)
            .await?;
        Ok(())
    }

    async fn expire_overdue_tickets(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let now = Utc::now();
        let mut orders = self.orders.write().await;
        let mut expired = 0;
        for order in orders.values_mut() {
            if order.status == OrderStatus::Paid
                && order.ticket_state == TicketState::Unused
                && order.valid_until.is_some_and(|v| v < cutoff)
            {
                order.ticket_state = TicketState::Expired;
                order.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }
}
