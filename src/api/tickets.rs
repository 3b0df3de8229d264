use axum::{
    extract::{ConnectInfo, FromRequestParts, State},
    http::request::Parts,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::auth::MaybeMerchant;
use crate::error::AppResult;
use crate::tickets::repository::ValidationMethod;
use crate::tickets::service::{RedemptionRequest, TicketService, TicketSummary};

pub struct TicketState {
    pub tickets: Arc<TicketService>,
}

pub fn routes(state: Arc<TicketState>) -> Router {
    Router::new()
        .route("/api/tickets/validate", post(validate_ticket))
        .route("/api/tickets/redeem", post(redeem_ticket))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ValidateTicketRequest {
    /// Bare code, JSON payload, or base64-wrapped JSON as scanned.
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct RedeemTicketRequest {
    pub code: String,
    #[serde(default)]
    pub method: ValidationMethod,
}

/// Client address for the audit trail: first `x-forwarded-for` hop, else the
/// peer address when the server was started with connect info.
#[derive(Debug, Clone)]
pub struct ClientIp(pub Option<String>);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let peer = || {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        };
        Ok(ClientIp(forwarded.or_else(peer)))
    }
}

/// POST /api/tickets/validate
pub async fn validate_ticket(
    State(state): State<Arc<TicketState>>,
    MaybeMerchant(merchant_id): MaybeMerchant,
    Json(request): Json<ValidateTicketRequest>,
) -> AppResult<Json<TicketSummary>> {
    let summary = state.tickets.validate(&request.code, merchant_id).await?;
    Ok(Json(summary))
}

/// POST /api/tickets/redeem
pub async fn redeem_ticket(
    State(state): State<Arc<TicketState>>,
    MaybeMerchant(merchant_id): MaybeMerchant,
    ClientIp(ip_address): ClientIp,
    Json(request): Json<RedeemTicketRequest>,
) -> AppResult<Json<TicketSummary>> {
    let summary = state
        .tickets
        .redeem(RedemptionRequest {
            raw_input: request.code,
            merchant_id,
            method: request.method,
            ip_address,
        })
        .await?;
    Ok(Json(summary))
}
