//! Provider callback endpoints. They carry no identity headers; authenticity
//! is established by the adapters.

use axum::{
    extract::{Form, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::api::pages;
use crate::payments::types::{CallbackChannel, ProviderName, RawCallback};
use crate::services::webhook_ingestor::{IngestResponse, WebhookIngestor};

pub struct CallbackState {
    pub ingestor: Arc<WebhookIngestor>,
}

pub fn routes(state: Arc<CallbackState>) -> Router {
    Router::new()
        .route("/payments/newebpay/return", post(newebpay_return))
        .route("/payments/newebpay/notify", post(newebpay_notify))
        .route("/payments/linepay/confirm", get(linepay_confirm))
        .route("/payments/linepay/cancel", get(linepay_cancel))
        .with_state(state)
}

/// POST /payments/newebpay/return
pub async fn newebpay_return(
    State(state): State<Arc<CallbackState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let raw = RawCallback::from_form(form);
    render(
        state
            .ingestor
            .ingest(CallbackChannel::Return, ProviderName::Newebpay, &raw)
            .await,
    )
}

/// POST /payments/newebpay/notify
pub async fn newebpay_notify(
    State(state): State<Arc<CallbackState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let raw = RawCallback::from_form(form);
    render(
        state
            .ingestor
            .ingest(CallbackChannel::Notify, ProviderName::Newebpay, &raw)
            .await,
    )
}

/// GET /payments/linepay/confirm?transactionId=..&orderId=..
pub async fn linepay_confirm(
    State(state): State<Arc<CallbackState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let raw = RawCallback::from_query(query);
    render(
        state
            .ingestor
            .ingest(CallbackChannel::Return, ProviderName::Linepay, &raw)
            .await,
    )
}

/// GET /payments/linepay/cancel. The order stays pending so it can be paid
/// again.
pub async fn linepay_cancel(Query(query): Query<HashMap<String, String>>) -> Response {
    let reference = query.get("orderId").map(String::as_str);
    info!(order_ref = ?reference, "payment cancelled at provider");
    Html(pages::cancel_page(reference)).into_response()
}

fn render(response: IngestResponse) -> Response {
    match response {
        IngestResponse::Page(page) => Html(pages::result_page(&page)).into_response(),
        // Gateways read the body, not the status.
        IngestResponse::Ack { body, .. } => (StatusCode::OK, body).into_response(),
    }
}
