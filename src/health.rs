//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::payments::factory::ProviderRegistry;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    providers: ProviderRegistry,
}

impl HealthChecker {
    #[cfg(feature = "database")]
    pub fn new(db_pool: Option<sqlx::PgPool>, providers: ProviderRegistry) -> Self {
        Self { db_pool, providers }
    }

    #[cfg(not(feature = "database"))]
    pub fn new(providers: ProviderRegistry) -> Self {
        Self { providers }
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut overall_healthy = true;
        let mut degraded = false;

        #[cfg(feature = "database")]
        match &self.db_pool {
            Some(pool) => {
                match timeout(Duration::from_secs(5), check_database_health(pool)).await {
                    Ok(Ok(response_time)) => {
                        health_status.checks.insert(
                            "database".to_string(),
                            ComponentHealth::up(Some(response_time)),
                        );
                        info!("Database health check: OK ({}ms)", response_time);
                    }
                    Ok(Err(e)) => {
                        overall_healthy = false;
                        health_status.checks.insert(
                            "database".to_string(),
                            ComponentHealth::down(Some(e.to_string())),
                        );
                        error!("Database health check failed: {}", e);
                    }
                    Err(_) => {
                        overall_healthy = false;
                        health_status.checks.insert(
                            "database".to_string(),
                            ComponentHealth::down(Some("Timeout".to_string())),
                        );
                        error!("Database health check timed out");
                    }
                }
            }
            None => {
                degraded = true;
                health_status.checks.insert(
                    "database".to_string(),
                    ComponentHealth::warning(None, Some("in-memory stores".to_string())),
                );
            }
        }

        let started = Instant::now();
        let enabled = self.providers.list_available_providers();
        if enabled.is_empty() {
            degraded = true;
            health_status.checks.insert(
                "payment_providers".to_string(),
                ComponentHealth::warning(None, Some("no provider enabled".to_string())),
            );
            warn!("No payment provider is enabled");
        } else {
            let mut component = ComponentHealth::up(Some(started.elapsed().as_millis()));
            component.details = Some(
                enabled
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            );
            health_status
                .checks
                .insert("payment_providers".to_string(), component);
        }

        health_status.status = if !overall_healthy {
            HealthState::Unhealthy
        } else if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }
}

#[cfg(feature = "database")]
pub async fn check_database_health(
    pool: &sqlx::PgPool,
) -> Result<u128, Box<dyn std::error::Error + Send + Sync>> {
    let start = Instant::now();

    match sqlx::query("SELECT 1").fetch_one(pool).await {
        Ok(_) => Ok(start.elapsed().as_millis()),
        Err(e) => Err(Box::new(e)),
    }
}
