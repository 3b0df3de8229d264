//! Step-up authentication gate.
//!
//! Each customer owns at most one TOTP credential: a base32 secret generated
//! once, an enabled flag, a set of hashed single-use backup codes and the time
//! of the last successful verification. Backup codes are only ever returned in
//! plaintext at generation time.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::totp;
use crate::database::error::DatabaseError;

pub const BACKUP_CODE_COUNT: usize = 10;
pub const BACKUP_CODE_LEN: usize = 8;
const BACKUP_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Clone, Error)]
pub enum TotpError {
    #[error("two-factor authentication is not enabled")]
    NotEnrolled,

    #[error("two-factor authentication is already enabled")]
    AlreadyEnabled,

    #[error("authenticator code is missing or invalid")]
    InvalidCode,

    #[error("stored TOTP secret is invalid")]
    InvalidSecret,

    #[error("storage error: {0}")]
    Storage(String),
}

impl TotpError {
    pub fn http_status_code(&self) -> u16 {
        match self {
            TotpError::NotEnrolled | TotpError::AlreadyEnabled => 409,
            TotpError::InvalidCode => 400,
            TotpError::InvalidSecret | TotpError::Storage(_) => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            TotpError::NotEnrolled => "Two-factor authentication is not enabled".to_string(),
            TotpError::AlreadyEnabled => {
                "Two-factor authentication is already enabled".to_string()
            }
            TotpError::InvalidCode => "A valid authenticator code is required".to_string(),
            _ => "Service temporarily unavailable. Please try again later".to_string(),
        }
    }
}

impl From<DatabaseError> for TotpError {
    fn from(err: DatabaseError) -> Self {
        TotpError::Storage(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TotpCredential {
    pub customer_id: Uuid,
    pub secret: String,
    pub enabled: bool,
    pub backup_code_hashes: HashSet<String>,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait TotpRepository: Send + Sync {
    async fn find(&self, customer_id: Uuid) -> Result<Option<TotpCredential>, DatabaseError>;

    /// Store `secret` unless the customer already has one; returns the
    /// credential as stored.
    async fn insert_if_absent(
        &self,
        customer_id: Uuid,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<TotpCredential, DatabaseError>;

    async fn set_enabled(&self, customer_id: Uuid, enabled: bool) -> Result<(), DatabaseError>;

    /// Replace the whole backup-code set.
    async fn replace_backup_codes(
        &self,
        customer_id: Uuid,
        hashes: &[String],
    ) -> Result<(), DatabaseError>;

    /// Remove `hash` from the set. Returns whether it was present; at most one
    /// concurrent caller can observe `true` for the same code.
    async fn consume_backup_code(&self, customer_id: Uuid, hash: &str)
        -> Result<bool, DatabaseError>;

    async fn record_verified(&self, customer_id: Uuid, at: DateTime<Utc>)
        -> Result<(), DatabaseError>;

    /// New secret, disabled, no backup codes, no verification history.
    async fn reset(
        &self,
        customer_id: Uuid,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<TotpCredential, DatabaseError>;

    async fn delete(&self, customer_id: Uuid) -> Result<(), DatabaseError>;
}

#[derive(Default)]
pub struct InMemoryTotpRepository {
    credentials: RwLock<HashMap<Uuid, TotpCredential>>,
}

impl InMemoryTotpRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TotpRepository for InMemoryTotpRepository {
    async fn find(&self, customer_id: Uuid) -> Result<Option<TotpCredential>, DatabaseError> {
        Ok(self.credentials.read().await.get(&customer_id).cloned())
    }

    async fn insert_if_absent(
        &self,
        customer_id: Uuid,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<TotpCredential, DatabaseError> {
        let mut credentials = self.credentials.write().await;
        let credential = credentials
            .entry(customer_id)
            .or_insert_with(|| TotpCredential {
                customer_id,
                secret: secret.to_string(),
                enabled: false,
                backup_code_hashes: HashSet::new(),
                last_verified_at: None,
                created_at: now,
            });
        Ok(credential.clone())
    }

    async fn set_enabled(&self, customer_id: Uuid, enabled: bool) -> Result<(), DatabaseError> {
        if let Some(c) = self.credentials.write().await.get_mut(&customer_id) {
            c.enabled = enabled;
        }
        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        customer_id: Uuid,
        hashes: &[String],
    ) -> Result<(), DatabaseError> {
        if let Some(c) = self.credentials.write().await.get_mut(&customer_id) {
            c.backup_code_hashes = hashes.iter().cloned().collect();
        }
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        customer_id: Uuid,
        hash: &str,
    ) -> Result<bool, DatabaseError> {
        Ok(self
            .credentials
            .write()
            .await
            .get_mut(&customer_id)
            .is_some_and(|c| c.backup_code_hashes.remove(hash)))
    }

    async fn record_verified(
        &self,
        customer_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        if let Some(c) = self.credentials.write().await.get_mut(&customer_id) {
            c.last_verified_at = Some(at);
        }
        Ok(())
    }

    async fn reset(
        &self,
        customer_id: Uuid,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<TotpCredential, DatabaseError> {
        let credential = TotpCredential {
            customer_id,
            secret: secret.to_string(),
            enabled: false,
            backup_code_hashes: HashSet::new(),
            last_verified_at: None,
            created_at: now,
        };
        self.credentials
            .write()
            .await
            .insert(customer_id, credential.clone());
        Ok(credential)
    }

    async fn delete(&self, customer_id: Uuid) -> Result<(), DatabaseError> {
        self.credentials.write().await.remove(&customer_id);
        Ok(())
    }
}

/// Pending setup returned by `begin_enrollment` and `reset`. Only ever built
/// for a credential that is not enabled yet.
#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub secret: String,
    pub provisioning_uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifiedBy {
    BackupCode,
    Totp,
}

pub struct StepUpAuthGate {
    credentials: Arc<dyn TotpRepository>,
    issuer: String,
    trust_window: Duration,
}

impl StepUpAuthGate {
    pub fn new(
        credentials: Arc<dyn TotpRepository>,
        issuer: impl Into<String>,
        trust_window: Duration,
    ) -> Self {
        Self {
            credentials,
            issuer: issuer.into(),
            trust_window,
        }
    }

    pub fn trust_window(&self) -> Duration {
        self.trust_window
    }

    /// Create the secret if absent and hand it out for setup. Refused once
    /// the credential is enabled.
    pub async fn begin_enrollment(
        &self,
        customer_id: Uuid,
        label: &str,
    ) -> Result<Enrollment, TotpError> {
        let credential = self
            .credentials
            .insert_if_absent(customer_id, &totp::generate_secret(), Utc::now())
            .await?;
        if credential.enabled {
            return Err(TotpError::AlreadyEnabled);
        }
        Ok(self.enrollment(&credential.secret, label))
    }

    pub async fn enable(&self, customer_id: Uuid, code: &str) -> Result<Vec<String>, TotpError> {
        self.enable_at(customer_id, code, Utc::now()).await
    }

    /// Confirm a pending setup with a code from the authenticator, then issue
    /// the backup codes. They are returned in plaintext only here.
    pub async fn enable_at(
        &self,
        customer_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, TotpError> {
        let credential = self
            .credentials
            .find(customer_id)
            .await?
            .ok_or(TotpError::NotEnrolled)?;
        if credential.enabled {
            return Err(TotpError::AlreadyEnabled);
        }
        if !totp::verify_code(&credential.secret, code, now)? {
            warn!(customer_id = %customer_id, "two-factor setup code rejected");
            return Err(TotpError::InvalidCode);
        }

        let backup_codes = self.issue_backup_codes(customer_id).await?;
        self.credentials.set_enabled(customer_id, true).await?;
        info!(customer_id = %customer_id, "two-factor authentication enabled");
        Ok(backup_codes)
    }

    /// While setup is pending the URI is returned as is; once enabled a valid
    /// code must accompany the request.
    pub async fn provisioning_uri(
        &self,
        customer_id: Uuid,
        label: &str,
        code: Option<&str>,
    ) -> Result<String, TotpError> {
        let credential = self
            .credentials
            .find(customer_id)
            .await?
            .ok_or(TotpError::NotEnrolled)?;
        if credential.enabled {
            let code = code.ok_or(TotpError::InvalidCode)?;
            if self.verify(customer_id, code).await?.is_none() {
                return Err(TotpError::InvalidCode);
            }
        }
        Ok(totp::provisioning_uri(&credential.secret, label, &self.issuer))
    }

    fn enrollment(&self, secret: &str, label: &str) -> Enrollment {
        Enrollment {
            secret: secret.to_string(),
            provisioning_uri: totp::provisioning_uri(secret, label, &self.issuer),
        }
    }

    pub async fn verify(&self, customer_id: Uuid, code: &str) -> Result<Option<VerifiedBy>, TotpError> {
        self.verify_at(customer_id, code, Utc::now()).await
    }

    /// Backup codes are tried first and consumed on match; otherwise the code
    /// is checked as a TOTP with one step of skew either way.
    pub async fn verify_at(
        &self,
        customer_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<VerifiedBy>, TotpError> {
        let credential = self
            .credentials
            .find(customer_id)
            .await?
            .filter(|c| c.enabled)
            .ok_or(TotpError::NotEnrolled)?;

        let verified_by = if self
            .credentials
            .consume_backup_code(customer_id, &hash_backup_code(code))
            .await?
        {
            info!(customer_id = %customer_id, "backup code consumed");
            Some(VerifiedBy::BackupCode)
        } else if totp::verify_code(&credential.secret, code, now)? {
            Some(VerifiedBy::Totp)
        } else {
            None
        };

        match verified_by {
            Some(_) => self.credentials.record_verified(customer_id, now).await?,
            None => warn!(customer_id = %customer_id, "step-up verification failed"),
        }
        Ok(verified_by)
    }

    pub async fn is_recently_verified(&self, customer_id: Uuid) -> Result<bool, TotpError> {
        self.is_recently_verified_at(customer_id, self.trust_window, Utc::now())
            .await
    }

    pub async fn is_recently_verified_at(
        &self,
        customer_id: Uuid,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, TotpError> {
        Ok(self
            .credentials
            .find(customer_id)
            .await?
            .filter(|c| c.enabled)
            .and_then(|c| c.last_verified_at)
            .is_some_and(|at| at <= now && now - at <= window))
    }

    /// Invalidate every existing backup code and return a fresh set.
    pub async fn regenerate_backup_codes(&self, customer_id: Uuid) -> Result<Vec<String>, TotpError> {
        self.credentials
            .find(customer_id)
            .await?
            .filter(|c| c.enabled)
            .ok_or(TotpError::NotEnrolled)?;
        let codes = self.issue_backup_codes(customer_id).await?;
        info!(customer_id = %customer_id, "backup codes regenerated");
        Ok(codes)
    }

    /// Replace the secret and drop all backup codes. The credential goes back
    /// to pending until `enable` confirms the new secret.
    pub async fn reset(&self, customer_id: Uuid, label: &str) -> Result<Enrollment, TotpError> {
        let credential = self
            .credentials
            .reset(customer_id, &totp::generate_secret(), Utc::now())
            .await?;
        info!(customer_id = %customer_id, "two-factor secret reset");
        Ok(self.enrollment(&credential.secret, label))
    }

    pub async fn disable(&self, customer_id: Uuid) -> Result<(), TotpError> {
        self.credentials.delete(customer_id).await?;
        info!(customer_id = %customer_id, "two-factor authentication disabled");
        Ok(())
    }

    pub async fn is_enabled(&self, customer_id: Uuid) -> Result<bool, TotpError> {
        Ok(self
            .credentials
            .find(customer_id)
            .await?
            .is_some_and(|c| c.enabled))
    }

    async fn issue_backup_codes(&self, customer_id: Uuid) -> Result<Vec<String>, TotpError> {
        let codes = generate_backup_codes();
        let hashes: Vec<String> = codes.iter().map(|c| hash_backup_code(c)).collect();
        self.credentials
            .replace_backup_codes(customer_id, &hashes)
            .await?;
        Ok(codes)
    }
}

pub fn generate_backup_codes() -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            (0..BACKUP_CODE_LEN)
                .map(|_| BACKUP_ALPHABET[rng.gen_range(0..BACKUP_ALPHABET.len())] as char)
                .collect()
        })
        .collect()
}

/// SHA-256 hex of the normalised code. Input is trimmed and uppercased so
/// codes typed in lower case still match.
pub fn hash_backup_code(code: &str) -> String {
    let normalized: String = code
        .trim()
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}
