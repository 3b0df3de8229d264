//! Payment-gateway integration, order lifecycle and voucher redemption for a
//! ticketing marketplace.

pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod orders;
pub mod payments;
pub mod services;
pub mod tickets;
pub mod workers;
