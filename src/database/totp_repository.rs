use crate::auth::step_up::{TotpCredential, TotpRepository};
use crate::database::error::DatabaseError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct CredentialRow {
    customer_id: Uuid,
    secret: String,
    enabled: bool,
    last_verified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

/// Credentials in `totp_credentials`, backup codes one row each in
/// `totp_backup_codes`. Consuming a code is a single `DELETE`, so two
/// concurrent verifications cannot both succeed with the same code.
#[derive(Clone)]
pub struct PgTotpRepository {
    pool: PgPool,
}

impl PgTotpRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_codes(&self, row: CredentialRow) -> Result<TotpCredential, DatabaseError> {
        let hashes: Vec<(String,)> =
            sqlx::query_as("SELECT code_hash FROM totp_backup_codes WHERE customer_id = $1")
                .bind(row.customer_id)
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        Ok(TotpCredential {
            customer_id: row.customer_id,
            secret: row.secret,
            enabled: row.enabled,
            backup_code_hashes: hashes.into_iter().map(|(h,)| h).collect::<HashSet<_>>(),
            last_verified_at: row.last_verified_at,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl TotpRepository for PgTotpRepository {
    async fn find(&self, customer_id: Uuid) -> Result<Option<TotpCredential>, DatabaseError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT customer_id, secret, enabled, last_verified_at, created_at \
             FROM totp_credentials WHERE customer_id = $1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match row {
            Some(row) => Ok(Some(self.with_codes(row).await?)),
            None => Ok(None),
        }
    }

    async fn insert_if_absent(
        &self,
        customer_id: Uuid,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<TotpCredential, DatabaseError> {
        sqlx::query(
            "INSERT INTO totp_credentials (customer_id, secret, enabled, created_at) \
             VALUES ($1, $2, FALSE, $3) ON CONFLICT (customer_id) DO NOTHING",
        )
        .bind(customer_id)
        .bind(secret)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        self.find(customer_id).await?.ok_or_else(|| {
            DatabaseError::new(
                crate::database::error::DatabaseErrorKind::NotFound {
                    entity: "totp_credential".to_string(),
                    id: customer_id.to_string(),
                },
                "credential vanished after insert",
            )
        })
    }

    async fn set_enabled(&self, customer_id: Uuid, enabled: bool) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE totp_credentials SET enabled = $2 WHERE customer_id = $1")
            .bind(customer_id)
            .bind(enabled)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        customer_id: Uuid,
        hashes: &[String],
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        sqlx::query("DELETE FROM totp_backup_codes WHERE customer_id = $1")
            .bind(customer_id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO totp_backup_codes (customer_id, code_hash) \
             SELECT $1, UNNEST($2::text[])",
        )
        .bind(customer_id)
        .bind(hashes.to_vec())
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)
    }

    async fn consume_backup_code(
        &self,
        customer_id: Uuid,
        hash: &str,
    ) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("DELETE FROM totp_backup_codes WHERE customer_id = $1 AND code_hash = $2")
                .bind(customer_id)
                .bind(hash)
                .execute(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_verified(
        &self,
        customer_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE totp_credentials SET last_verified_at = $2 WHERE customer_id = $1")
            .bind(customer_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn reset(
        &self,
        customer_id: Uuid,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<TotpCredential, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        sqlx::query("DELETE FROM totp_backup_codes WHERE customer_id = $1")
            .bind(customer_id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let row = sqlx::query_as::<_, CredentialRow>(
            "INSERT INTO totp_credentials (customer_id, secret, enabled, created_at) \
             VALUES ($1, $2, FALSE, $3) \
             ON CONFLICT (customer_id) DO UPDATE \
             SET secret = EXCLUDED.secret, enabled = FALSE, last_verified_at = NULL, \
                 created_at = EXCLUDED.created_at \
             RETURNING customer_id, secret, enabled, last_verified_at, created_at",
        )
        .bind(customer_id)
        .bind(secret)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(TotpCredential {
            customer_id: row.customer_id,
            secret: row.secret,
            enabled: row.enabled,
            backup_code_hashes: HashSet::new(),
            last_verified_at: row.last_verified_at,
            created_at: row.created_at,
        })
    }

    async fn delete(&self, customer_id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM totp_credentials WHERE customer_id = $1")
            .bind(customer_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
