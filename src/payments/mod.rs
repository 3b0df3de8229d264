pub mod crypto;
pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod signature;
pub mod types;
pub mod utils;
