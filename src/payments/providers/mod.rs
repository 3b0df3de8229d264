pub mod linepay;
pub mod newebpay;

pub use linepay::{LinepayAdapter, LinepayConfig};
pub use newebpay::{NewebpayAdapter, NewebpayConfig};
