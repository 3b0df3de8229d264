pub mod callbacks;
pub mod checkout;
pub mod orders;
pub mod pages;
pub mod tickets;
pub mod totp;

use axum::Router;
use std::sync::Arc;

use crate::auth::StepUpAuthGate;
use crate::orders::state_machine::OrderStateMachine;
use crate::services::checkout::CheckoutService;
use crate::services::webhook_ingestor::WebhookIngestor;
use crate::tickets::service::TicketService;

/// Everything the HTTP surface needs, built once at startup.
#[derive(Clone)]
pub struct ApiServices {
    pub checkout: Arc<CheckoutService>,
    pub ingestor: Arc<WebhookIngestor>,
    pub state_machine: Arc<OrderStateMachine>,
    pub tickets: Arc<TicketService>,
    pub step_up: Arc<StepUpAuthGate>,
}

/// All API and callback routes, each area with its own state.
pub fn router(services: &ApiServices) -> Router {
    Router::new()
        .merge(checkout::routes(Arc::new(checkout::CheckoutState {
            checkout: services.checkout.clone(),
        })))
        .merge(callbacks::routes(Arc::new(callbacks::CallbackState {
            ingestor: services.ingestor.clone(),
        })))
        .merge(orders::routes(Arc::new(orders::OrderState {
            state_machine: services.state_machine.clone(),
            step_up: services.step_up.clone(),
        })))
        .merge(tickets::routes(Arc::new(tickets::TicketState {
            tickets: services.tickets.clone(),
        })))
        .merge(totp::routes(Arc::new(totp::TotpState {
            step_up: services.step_up.clone(),
        })))
}
