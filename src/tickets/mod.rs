pub mod decode;
pub mod error;
pub mod repository;
pub mod service;

pub use error::{TicketError, TicketRejection};
pub use service::{ReminderWindow, TicketService};
