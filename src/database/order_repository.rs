use crate::database::error::DatabaseError;
use crate::orders::model::{Order, OrderStatus, TicketState};
use crate::orders::repository::{OrderRepository, SettlementRecord};
use crate::payments::types::ProviderName;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, provider, status, amount, item_description, quantity, unit_price, \
     customer_id, product_id, provider_order_reference, provider_transaction_reference, \
     payment_method, card_mask, provider_payload, checkout_transaction_id, checkout_payment_url, \
     created_at, updated_at, paid_at, ticket_code, ticket_state, redeemed_at, valid_until, \
     reminder_sent_at";

/// Row shape of `orders`; enums are stored as text.
#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    id: Uuid,
    provider: String,
    status: String,
    amount: i64,
    item_description: String,
    quantity: i32,
    unit_price: i64,
    customer_id: Uuid,
    product_id: Uuid,
    provider_order_reference: String,
    provider_transaction_reference: Option<String>,
    payment_method: Option<String>,
    card_mask: Option<String>,
    provider_payload: Option<JsonValue>,
    checkout_transaction_id: Option<String>,
    checkout_payment_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    ticket_code: Option<String>,
    ticket_state: String,
    redeemed_at: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
    reminder_sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DatabaseError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            provider: ProviderName::from_str(&row.provider)
                .map_err(|e| DatabaseError::decode(e.to_string()))?,
            status: OrderStatus::from_str(&row.status).map_err(DatabaseError::decode)?,
            amount: row.amount,
            item_description: row.item_description,
            quantity: row.quantity,
            unit_price: row.unit_price,
            customer_id: row.customer_id,
            product_id: row.product_id,
            provider_order_reference: row.provider_order_reference,
            provider_transaction_reference: row.provider_transaction_reference,
            payment_method: row.payment_method,
            card_mask: row.card_mask,
            provider_payload: row.provider_payload,
            checkout_transaction_id: row.checkout_transaction_id,
            checkout_payment_url: row.checkout_payment_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
            paid_at: row.paid_at,
            ticket_code: row.ticket_code,
            ticket_state: TicketState::from_str(&row.ticket_state).map_err(DatabaseError::decode)?,
            redeemed_at: row.redeemed_at,
            valid_until: row.valid_until,
            reminder_sent_at: row.reminder_sent_at,
        })
    }
}

fn decode_one(row: Option<OrderRow>) -> Result<Option<Order>, DatabaseError> {
    row.map(Order::try_from).transpose()
}

/// PostgreSQL order store. Each state change is a single conditional
/// `UPDATE ... WHERE status = ...`, so the row lock taken by the update is the
/// compare-and-swap.
#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_optional(
        &self,
        query: sqlx::query::QueryAs<'_, sqlx::Postgres, OrderRow, sqlx::postgres::PgArguments>,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        decode_one(row)
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn insert(&self, order: &Order) -> Result<Order, DatabaseError> {
        let sql = format!(
            "INSERT INTO orders (id, provider, status, amount, item_description, quantity, unit_price, \
             customer_id, product_id, provider_order_reference, ticket_state, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {}",
            ORDER_COLUMNS
        );
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order.id)
            .bind(order.provider.as_str())
            .bind(order.status.as_str())
            .bind(order.amount)
            .bind(&order.item_description)
            .bind(order.quantity)
            .bind(order.unit_price)
            .bind(order.customer_id)
            .bind(order.product_id)
            .bind(&order.provider_order_reference)
            .bind(order.ticket_state.as_str())
            .bind(order.created_at)
            .bind(order.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Order::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DatabaseError> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        self.fetch_optional(sqlx::query_as(&sql).bind(id)).await
    }

    async fn find_by_provider_reference(
        &self,
        provider: ProviderName,
        reference: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM orders WHERE provider = $1 AND provider_order_reference = $2",
            ORDER_COLUMNS
        );
        self.fetch_optional(sqlx::query_as(&sql).bind(provider.as_str()).bind(reference))
            .await
    }

    async fn find_by_ticket_code(&self, code: &str) -> Result<Option<Order>, DatabaseError> {
        let sql = format!("SELECT {} FROM orders WHERE ticket_code = $1", ORDER_COLUMNS);
        self.fetch_optional(sqlx::query_as(&sql).bind(code)).await
    }

    async fn record_checkout_attempt(
        &self,
        id: Uuid,
        transaction_id: &str,
        payment_url: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        let sql = format!(
            "UPDATE orders SET checkout_transaction_id = $2, checkout_payment_url = $3, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' RETURNING {}",
            ORDER_COLUMNS
        );
        self.fetch_optional(
            sqlx::query_as(&sql)
                .bind(id)
                .bind(transaction_id)
                .bind(payment_url),
        )
        .await
    }

    async fn settle(
        &self,
        id: Uuid,
        settlement: &SettlementRecord,
    ) -> Result<Option<Order>, DatabaseError> {
        let sql = format!(
            "UPDATE orders SET status = 'paid', provider_transaction_reference = $2, \
             payment_method = $3, card_mask = $4, provider_payload = $5, paid_at = $6, \
             ticket_code = $7, ticket_state = 'unused', valid_until = $8, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' RETURNING {}",
            ORDER_COLUMNS
        );
        self.fetch_optional(
            sqlx::query_as(&sql)
                .bind(id)
                .bind(&settlement.transaction_reference)
                .bind(&settlement.payment_method)
                .bind(&settlement.card_mask)
                .bind(&settlement.provider_payload)
                .bind(settlement.paid_at)
                .bind(&settlement.ticket_code)
                .bind(settlement.valid_until),
        )
        .await
    }

    async fn fail(&self, id: Uuid, payload: &JsonValue) -> Result<Option<Order>, DatabaseError> {
        let sql = format!(
            "UPDATE orders SET status = 'failed', provider_payload = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' RETURNING {}",
            ORDER_COLUMNS
        );
        self.fetch_optional(sqlx::query_as(&sql).bind(id).bind(payload))
            .await
    }

    async fn transition(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, DatabaseError> {
        let sql = format!(
            "UPDATE orders SET status = $3, updated_at = NOW() \
             WHERE id = $1 AND status = $2 RETURNING {}",
            ORDER_COLUMNS
        );
        self.fetch_optional(
            sqlx::query_as(&sql)
                .bind(id)
                .bind(from.as_str())
                .bind(to.as_str()),
        )
        .await
    }

    async fn mark_ticket_used(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>, DatabaseError> {
        let sql = format!(
            "UPDATE orders SET ticket_state = 'used', redeemed_at = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'paid' AND ticket_state = 'unused' RETURNING {}",
            ORDER_COLUMNS
        );
        self.fetch_optional(sqlx::query_as(&sql).bind(id).bind(at))
            .await
    }

    async fn tickets_pending_reminder(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Order>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM orders \
             WHERE status = 'paid' AND ticket_state = 'unused' AND reminder_sent_at IS NULL \
             AND valid_until BETWEEN $1 AND $2 \
             ORDER BY valid_until ASC",
            ORDER_COLUMNS
        );
        let rows = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn claim_reminder(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE orders SET reminder_sent_at = $2 WHERE id = $1 AND reminder_sent_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_reminder(&self, id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE orders SET reminder_sent_at = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn expire_overdue_tickets(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE orders SET ticket_state = 'expired', updated_at = NOW() \
             WHERE status = 'paid' AND ticket_state = 'unused' AND valid_until < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}
