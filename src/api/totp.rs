//! Two-factor enrollment and step-up verification for customers.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::step_up::{Enrollment, VerifiedBy};
use crate::auth::{CustomerId, StepUpAuthGate};
use crate::error::{AppError, AppErrorKind, AppResult};

pub struct TotpState {
    pub step_up: Arc<StepUpAuthGate>,
}

pub fn routes(state: Arc<TotpState>) -> Router {
    Router::new()
        .route("/api/totp/setup", post(setup))
        .route("/api/totp/enable", post(enable))
        .route("/api/totp/verify", post(verify))
        .route("/api/totp/provisioning", get(provisioning))
        .route("/api/totp/backup-codes", post(regenerate_backup_codes))
        .route("/api/totp/reset", post(reset))
        .route("/api/totp/disable", post(disable))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct ProvisioningQuery {
    pub code: Option<String>,
}

/// Pending setup; the credential stays disabled until `/enable`.
#[derive(Debug, Serialize)]
pub struct EnrollmentResponse {
    pub provisioning_uri: String,
    pub secret: String,
    pub enabled: bool,
}

impl From<Enrollment> for EnrollmentResponse {
    fn from(e: Enrollment) -> Self {
        Self {
            provisioning_uri: e.provisioning_uri,
            secret: e.secret,
            enabled: false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EnabledResponse {
    pub enabled: bool,
    /// Shown once.
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub verified: bool,
    pub method: Option<VerifiedBy>,
}

#[derive(Debug, Serialize)]
pub struct ProvisioningResponse {
    pub provisioning_uri: String,
}

#[derive(Debug, Serialize)]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}

fn account_label(customer_id: uuid::Uuid) -> String {
    customer_id.to_string()
}

/// Management actions need a code verified in the same request.
async fn require_code(gate: &StepUpAuthGate, customer_id: uuid::Uuid, code: &str) -> AppResult<()> {
    match gate.verify(customer_id, code).await? {
        Some(_) => Ok(()),
        None => Err(AppError::new(AppErrorKind::StepUpRequired)),
    }
}

/// POST /api/totp/setup
pub async fn setup(
    State(state): State<Arc<TotpState>>,
    CustomerId(customer_id): CustomerId,
) -> AppResult<Json<EnrollmentResponse>> {
    let enrollment = state
        .step_up
        .begin_enrollment(customer_id, &account_label(customer_id))
        .await?;
    Ok(Json(enrollment.into()))
}

/// POST /api/totp/enable
pub async fn enable(
    State(state): State<Arc<TotpState>>,
    CustomerId(customer_id): CustomerId,
    Json(request): Json<CodeRequest>,
) -> AppResult<Json<EnabledResponse>> {
    let backup_codes = state.step_up.enable(customer_id, &request.code).await?;
    Ok(Json(EnabledResponse {
        enabled: true,
        backup_codes,
    }))
}

/// POST /api/totp/verify
pub async fn verify(
    State(state): State<Arc<TotpState>>,
    CustomerId(customer_id): CustomerId,
    Json(request): Json<CodeRequest>,
) -> AppResult<Json<VerifyResponse>> {
    let method = state.step_up.verify(customer_id, &request.code).await?;
    Ok(Json(VerifyResponse {
        verified: method.is_some(),
        method,
    }))
}

/// GET /api/totp/provisioning
pub async fn provisioning(
    State(state): State<Arc<TotpState>>,
    CustomerId(customer_id): CustomerId,
    Query(query): Query<ProvisioningQuery>,
) -> AppResult<Json<ProvisioningResponse>> {
    let provisioning_uri = state
        .step_up
        .provisioning_uri(
            customer_id,
            &account_label(customer_id),
            query.code.as_deref(),
        )
        .await?;
    Ok(Json(ProvisioningResponse { provisioning_uri }))
}

/// POST /api/totp/backup-codes
pub async fn regenerate_backup_codes(
    State(state): State<Arc<TotpState>>,
    CustomerId(customer_id): CustomerId,
    Json(request): Json<CodeRequest>,
) -> AppResult<Json<BackupCodesResponse>> {
    require_code(&state.step_up, customer_id, &request.code).await?;
    let backup_codes = state.step_up.regenerate_backup_codes(customer_id).await?;
    Ok(Json(BackupCodesResponse { backup_codes }))
}

/// POST /api/totp/reset
pub async fn reset(
    State(state): State<Arc<TotpState>>,
    CustomerId(customer_id): CustomerId,
    Json(request): Json<CodeRequest>,
) -> AppResult<Json<EnrollmentResponse>> {
    require_code(&state.step_up, customer_id, &request.code).await?;
    let enrollment = state
        .step_up
        .reset(customer_id, &account_label(customer_id))
        .await?;
    Ok(Json(enrollment.into()))
}

/// POST /api/totp/disable
pub async fn disable(
    State(state): State<Arc<TotpState>>,
    CustomerId(customer_id): CustomerId,
    Json(request): Json<CodeRequest>,
) -> AppResult<Json<serde_json::Value>> {
    require_code(&state.step_up, customer_id, &request.code).await?;
    state.step_up.disable(customer_id).await?;
    Ok(Json(serde_json::json!({ "enabled": false })))
}
