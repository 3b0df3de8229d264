pub mod principal;
pub mod step_up;
pub mod totp;

pub use principal::{CustomerId, MaybeMerchant, Principal};
pub use step_up::{StepUpAuthGate, TotpError, TotpRepository};
