use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::tickets::decode::InputFormat;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Success,
    Failed,
    Unauthorized,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Success => "success",
            ValidationOutcome::Failed => "failed",
            ValidationOutcome::Unauthorized => "unauthorized",
        }
    }
}

impl FromStr for ValidationOutcome {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "success" => Ok(ValidationOutcome::Success),
            "failed" => Ok(ValidationOutcome::Failed),
            "unauthorized" => Ok(ValidationOutcome::Unauthorized),
            other => Err(format!("unknown validation outcome: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMethod {
    #[default]
    QrCode,
    Manual,
}

impl ValidationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationMethod::QrCode => "qr_code",
            ValidationMethod::Manual => "manual",
        }
    }
}

impl FromStr for ValidationMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "qr_code" => Ok(ValidationMethod::QrCode),
            "manual" => Ok(ValidationMethod::Manual),
            other => Err(format!("unknown validation method: {}", other)),
        }
    }
}

/// Append-only audit record of one redemption attempt. `order_id` is absent
/// when the presented code matched no order, `input_format` when the input
/// could not be decoded at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketValidation {
    pub id: Uuid,
    pub order_id: Option<Uuid>,
    pub ticket_code: String,
    pub merchant_id: Option<Uuid>,
    pub validated_at: DateTime<Utc>,
    pub outcome: ValidationOutcome,
    pub failure_reason: Option<String>,
    pub method: ValidationMethod,
    pub input_format: Option<InputFormat>,
    pub ip_address: Option<String>,
}

#[async_trait]
pub trait TicketValidationRepository: Send + Sync {
    async fn append(&self, record: &TicketValidation) -> Result<(), DatabaseError>;

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<TicketValidation>, DatabaseError>;
}

#[derive(Default)]
pub struct InMemoryTicketValidationRepository {
    records: RwLock<Vec<TicketValidation>>,
}

impl InMemoryTicketValidationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<TicketValidation> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl TicketValidationRepository for InMemoryTicketValidationRepository {
    async fn append(&self, record: &TicketValidation) -> Result<(), DatabaseError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<TicketValidation>, DatabaseError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.order_id == Some(order_id))
            .cloned()
            .collect())
    }
}
