//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings
//!
//! Payment provider credentials are loaded by the adapters themselves
//! (`NewebpayConfig::from_env`, `LinepayConfig::from_env`).

use std::env;
use std::str::FromStr;

use crate::tickets::service::ReminderWindow;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` when running with `SKIP_EXTERNALS=true`.
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub tickets: TicketConfig,
    pub totp: TotpConfig,
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64, // seconds
    pub run_migrations: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Voucher lifetime and the periodic sweeps
#[derive(Debug, Clone)]
pub struct TicketConfig {
    pub validity_days: i64,
    pub reminder_lead_minutes: i64,
    pub reminder_grace_minutes: i64,
    pub sweep_interval_secs: u64,
    pub sweep_enabled: bool,
}

/// Step-up authentication
#[derive(Debug, Clone)]
pub struct TotpConfig {
    pub issuer: String,
    pub trust_minutes: i64,
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        let skip_externals = flag("SKIP_EXTERNALS", false);
        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: if skip_externals {
                None
            } else {
                Some(DatabaseConfig::from_env()?)
            },
            logging: LoggingConfig::from_env(),
            tickets: TicketConfig::from_env()?,
            totp: TotpConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        self.tickets.validate()?;
        self.totp.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            run_migrations: flag("DB_RUN_MIGRATIONS", true),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl TicketConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(TicketConfig {
            validity_days: parse_var("TICKET_VALIDITY_DAYS", "30")?,
            reminder_lead_minutes: parse_var("TICKET_REMINDER_LEAD_MINUTES", "5")?,
            reminder_grace_minutes: parse_var("TICKET_REMINDER_GRACE_MINUTES", "30")?,
            sweep_interval_secs: parse_var("TICKET_SWEEP_INTERVAL_SECS", "60")?,
            sweep_enabled: flag("TICKET_SWEEP_ENABLED", true),
        })
    }

    pub fn validity(&self) -> chrono::Duration {
        chrono::Duration::days(self.validity_days)
    }

    pub fn reminder_window(&self) -> ReminderWindow {
        ReminderWindow {
            lead: chrono::Duration::minutes(self.reminder_lead_minutes),
            grace: chrono::Duration::minutes(self.reminder_grace_minutes),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validity_days <= 0 {
            return Err(ConfigError::InvalidValue("TICKET_VALIDITY_DAYS".to_string()));
        }
        if self.reminder_lead_minutes < 0 || self.reminder_grace_minutes < 0 {
            return Err(ConfigError::ValidationFailed(
                "ticket reminder lead and grace must not be negative".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "TICKET_SWEEP_INTERVAL_SECS".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TicketConfig {
    fn default() -> Self {
        TicketConfig {
            validity_days: 30,
            reminder_lead_minutes: 5,
            reminder_grace_minutes: 30,
            sweep_interval_secs: 60,
            sweep_enabled: true,
        }
    }
}

impl TotpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(TotpConfig {
            issuer: env::var("TOTP_ISSUER").unwrap_or_else(|_| "Voucher Gateway".to_string()),
            trust_minutes: parse_var("STEP_UP_TRUST_MINUTES", "10")?,
        })
    }

    pub fn trust_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.trust_minutes)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() || self.issuer.contains(':') {
            return Err(ConfigError::InvalidValue("TOTP_ISSUER".to_string()));
        }
        if self.trust_minutes < 0 {
            return Err(ConfigError::InvalidValue("STEP_UP_TRUST_MINUTES".to_string()));
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
