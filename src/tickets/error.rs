use serde::Serialize;
use thiserror::Error;

use crate::database::error::DatabaseError;

/// Why a ticket was refused. Each reason has a message safe to show to the
/// merchant at the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketRejection {
    AlreadyUsed,
    Expired,
    NotPaid,
    Refunded,
    UnauthorizedMerchant,
    MalformedInput,
    MissingMerchant,
}

impl TicketRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketRejection::AlreadyUsed => "already_used",
            TicketRejection::Expired => "expired",
            TicketRejection::NotPaid => "not_paid",
            TicketRejection::Refunded => "refunded",
            TicketRejection::UnauthorizedMerchant => "unauthorized_merchant",
            TicketRejection::MalformedInput => "malformed_input",
            TicketRejection::MissingMerchant => "missing_merchant",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            TicketRejection::AlreadyUsed => "This ticket has already been used",
            TicketRejection::Expired => "This ticket has expired",
            TicketRejection::NotPaid => "The order for this ticket has not been paid",
            TicketRejection::Refunded => "The order for this ticket was refunded",
            TicketRejection::UnauthorizedMerchant => "This ticket was not issued by your shop",
            TicketRejection::MalformedInput => "The ticket code could not be read",
            TicketRejection::MissingMerchant => "A merchant account is required to redeem tickets",
        }
    }
}

impl std::fmt::Display for TicketRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.user_message())
    }
}

#[derive(Debug, Clone, Error)]
pub enum TicketError {
    #[error("ticket validation failed: {0}")]
    Validation(TicketRejection),

    #[error("ticket cannot be used: {0}")]
    Usage(TicketRejection),

    #[error("ticket not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(String),
}

impl TicketError {
    pub fn rejection(&self) -> Option<TicketRejection> {
        match self {
            TicketError::Validation(r) | TicketError::Usage(r) => Some(*r),
            _ => None,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            TicketError::Validation(TicketRejection::UnauthorizedMerchant)
            | TicketError::Validation(TicketRejection::MissingMerchant) => 403,
            TicketError::Validation(_) => 400,
            TicketError::Usage(_) => 409,
            TicketError::NotFound => 404,
            TicketError::Storage(_) => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            TicketError::Validation(r) | TicketError::Usage(r) => r.user_message().to_string(),
            TicketError::NotFound => "Ticket not found".to_string(),
            TicketError::Storage(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
        }
    }

    /// Reason string written to the audit record.
    pub fn audit_reason(&self) -> String {
        match self {
            TicketError::Validation(r) | TicketError::Usage(r) => r.as_str().to_string(),
            TicketError::NotFound => "not_found".to_string(),
            TicketError::Storage(_) => "storage_error".to_string(),
        }
    }
}

impl From<DatabaseError> for TicketError {
    fn from(err: DatabaseError) -> Self {
        TicketError::Storage(err.to_string())
    }
}
