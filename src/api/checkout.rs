use axum::{
    extract::{Path, State},
    response::{Html, IntoResponse, Redirect, Response},
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::api::pages;
use crate::auth::CustomerId;
use crate::error::AppResult;
use crate::payments::types::OutboundRequest;
use crate::services::checkout::{CheckoutRequest, CheckoutService};

pub struct CheckoutState {
    pub checkout: Arc<CheckoutService>,
}

pub fn routes(state: Arc<CheckoutState>) -> Router {
    Router::new()
        .route("/api/checkout", post(create_checkout))
        .route("/api/orders/{id}/pay", post(pay_order))
        .with_state(state)
}

/// POST /api/checkout
pub async fn create_checkout(
    State(state): State<Arc<CheckoutState>>,
    CustomerId(customer_id): CustomerId,
    Json(request): Json<CheckoutRequest>,
) -> AppResult<Response> {
    info!(
        customer_id = %customer_id,
        product_id = %request.product_id,
        provider = %request.provider,
        "checkout requested"
    );
    let (_, outbound) = state.checkout.checkout(customer_id, &request).await?;
    Ok(outbound_response(outbound))
}

/// POST /api/orders/{id}/pay, paying a pending order again.
pub async fn pay_order(
    State(state): State<Arc<CheckoutState>>,
    CustomerId(customer_id): CustomerId,
    Path(order_id): Path<Uuid>,
) -> AppResult<Response> {
    let outbound = state.checkout.begin_payment(order_id, customer_id).await?;
    Ok(outbound_response(outbound))
}

fn outbound_response(outbound: OutboundRequest) -> Response {
    match outbound {
        OutboundRequest::AutoSubmitForm { action_url, fields } => {
            Html(pages::auto_submit_form(&action_url, &fields)).into_response()
        }
        OutboundRequest::Redirect { url, .. } => Redirect::to(&url).into_response(),
    }
}
