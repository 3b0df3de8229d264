use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::{CustomerId, StepUpAuthGate};
use crate::error::{AppError, AppErrorKind, AppResult};
use crate::orders::model::{Order, OrderStatus, TicketState};
use crate::orders::state_machine::{OrderStateMachine, Transition};
use crate::payments::error::PaymentError;

pub struct OrderState {
    pub state_machine: Arc<OrderStateMachine>,
    pub step_up: Arc<StepUpAuthGate>,
}

pub fn routes(state: Arc<OrderState>) -> Router {
    Router::new()
        .route("/api/orders/{id}/cancel", post(cancel_order))
        .route("/api/orders/{id}/ticket", get(show_ticket))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    pub order_id: Uuid,
    pub order_reference: String,
    pub status: OrderStatus,
    pub amount: i64,
    /// False when the order had already left the source state.
    pub changed: bool,
}

impl OrderView {
    fn from_transition(transition: Transition) -> Self {
        let (order, changed) = match transition {
            Transition::Applied(order) => (order, true),
            Transition::Unchanged(order) => (order, false),
        };
        Self {
            order_id: order.id,
            order_reference: order.provider_order_reference,
            status: order.status,
            amount: order.amount,
            changed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TicketView {
    pub order_id: Uuid,
    pub ticket_code: String,
    pub state: TicketState,
    pub valid_until: Option<DateTime<Utc>>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

/// POST /api/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<Arc<OrderState>>,
    CustomerId(customer_id): CustomerId,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<OrderView>> {
    let transition = state.state_machine.cancel(order_id, customer_id).await?;
    if let Transition::Unchanged(order) = &transition {
        info!(order_id = %order.id, status = %order.status, "cancel ignored, order not pending");
    }
    Ok(Json(OrderView::from_transition(transition)))
}

/// GET /api/orders/{id}/ticket
///
/// The code is a bearer credential at the counter, so customers with
/// two-factor enabled must have verified within the trust window.
pub async fn show_ticket(
    State(state): State<Arc<OrderState>>,
    CustomerId(customer_id): CustomerId,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<TicketView>> {
    let order = owned_order(&state, order_id, customer_id).await?;

    if state.step_up.is_enabled(customer_id).await?
        && !state.step_up.is_recently_verified(customer_id).await?
    {
        return Err(AppError::new(AppErrorKind::StepUpRequired));
    }

    let ticket_code = order
        .ticket_code
        .clone()
        .filter(|_| order.status == OrderStatus::Paid)
        .ok_or_else(|| AppError::validation("order", "no ticket has been issued for this order"))?;

    Ok(Json(TicketView {
        order_id: order.id,
        ticket_code,
        state: order.ticket_state,
        valid_until: order.valid_until,
        redeemed_at: order.redeemed_at,
    }))
}

async fn owned_order(state: &OrderState, order_id: Uuid, customer_id: Uuid) -> AppResult<Order> {
    state
        .state_machine
        .orders()
        .find_by_id(order_id)
        .await?
        .filter(|o| o.customer_id == customer_id)
        .ok_or_else(|| {
            AppError::from(PaymentError::OrderNotFound {
                reference: order_id.to_string(),
            })
        })
}
