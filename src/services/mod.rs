//! Services module for business logic and integrations

pub mod catalog;
pub mod checkout;
pub mod notification;
pub mod webhook_ingestor;

pub use checkout::{CheckoutRequest, CheckoutService};
pub use webhook_ingestor::{IngestResponse, ResultPage, WebhookIngestor};
