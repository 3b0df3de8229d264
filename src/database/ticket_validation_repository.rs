use crate::database::error::DatabaseError;
use crate::tickets::decode::InputFormat;
use crate::tickets::repository::{
    TicketValidation, TicketValidationRepository, ValidationMethod, ValidationOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct TicketValidationRow {
    id: Uuid,
    order_id: Option<Uuid>,
    ticket_code: String,
    merchant_id: Option<Uuid>,
    validated_at: DateTime<Utc>,
    outcome: String,
    failure_reason: Option<String>,
    method: String,
    input_format: Option<String>,
    ip_address: Option<String>,
}

impl TryFrom<TicketValidationRow> for TicketValidation {
    type Error = DatabaseError;

    fn try_from(row: TicketValidationRow) -> Result<Self, Self::Error> {
        Ok(TicketValidation {
            id: row.id,
            order_id: row.order_id,
            ticket_code: row.ticket_code,
            merchant_id: row.merchant_id,
            validated_at: row.validated_at,
            outcome: ValidationOutcome::from_str(&row.outcome).map_err(DatabaseError::decode)?,
            failure_reason: row.failure_reason,
            method: ValidationMethod::from_str(&row.method).map_err(DatabaseError::decode)?,
            input_format: row
                .input_format
                .as_deref()
                .map(InputFormat::from_str)
                .transpose()
                .map_err(DatabaseError::decode)?,
            ip_address: row.ip_address,
        })
    }
}

/// Append-only audit log. There is deliberately no update or delete.
#[derive(Clone)]
pub struct PgTicketValidationRepository {
    pool: PgPool,
}

impl PgTicketValidationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TicketValidationRepository for PgTicketValidationRepository {
    async fn append(&self, record: &TicketValidation) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO ticket_validations \
             (id, order_id, ticket_code, merchant_id, validated_at, outcome, failure_reason, method, input_format, ip_address) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(record.id)
        .bind(record.order_id)
        .bind(&record.ticket_code)
        .bind(record.merchant_id)
        .bind(record.validated_at)
        .bind(record.outcome.as_str())
        .bind(&record.failure_reason)
        .bind(record.method.as_str())
        .bind(record.input_format.as_ref().map(InputFormat::as_str))
        .bind(&record.ip_address)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<TicketValidation>, DatabaseError> {
        let rows = sqlx::query_as::<_, TicketValidationRow>(
            "SELECT id, order_id, ticket_code, merchant_id, validated_at, outcome, failure_reason, method, input_format, ip_address \
             FROM ticket_validations WHERE order_id = $1 ORDER BY validated_at ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        rows.into_iter().map(TicketValidation::try_from).collect()
    }
}
