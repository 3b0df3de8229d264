use crate::database::error::DatabaseError;
use crate::services::catalog::{Catalog, CustomerProfile, ProductSnapshot};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Reads the storefront's `products` and `customers` tables.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn product(&self, id: Uuid) -> Result<Option<ProductSnapshot>, DatabaseError> {
        let row: Option<(Uuid, Uuid, String, i64, Option<chrono::DateTime<chrono::Utc>>, bool)> =
            sqlx::query_as(
                "SELECT id, merchant_id, name, unit_price, ticket_expiry, is_active \
                 FROM products WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(
            |(id, merchant_id, name, unit_price, ticket_expiry, is_active)| ProductSnapshot {
                id,
                merchant_id,
                name,
                unit_price,
                ticket_expiry,
                is_active,
            },
        ))
    }

    async fn customer(&self, id: Uuid) -> Result<Option<CustomerProfile>, DatabaseError> {
        let row: Option<(Uuid, Option<String>, Option<String>)> =
            sqlx::query_as("SELECT id, email, name FROM customers WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(|(id, email, name)| CustomerProfile { id, email, name }))
    }
}
