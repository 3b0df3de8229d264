//! Application error type for the HTTP boundary.
//!
//! Each layer keeps its own error enum (`PaymentError`, `TicketError`,
//! `TotpError`); `AppError` wraps them with a request id and maps them to a
//! status code and a machine-readable `ErrorCode`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::auth::step_up::TotpError;
use crate::database::error::DatabaseError;
use crate::payments::error::PaymentError;
use crate::tickets::error::{TicketError, TicketRejection};

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Payment
    DecryptFailed,
    SignatureMismatch,
    AmountMismatch,
    OrderNotFound,
    ProviderUnavailable,
    ProviderTimeout,
    ProviderError,

    // Tickets
    TicketAlreadyUsed,
    TicketExpired,
    TicketNotPaid,
    TicketRefunded,
    TicketUnauthorizedMerchant,
    TicketMalformed,
    MerchantRequired,
    TicketNotFound,

    // Auth
    Unauthenticated,
    Forbidden,
    StepUpRequired,
    TotpNotEnrolled,
    TotpAlreadyEnabled,
    TotpCodeInvalid,

    // Generic
    ValidationError,
    DatabaseError,
    InternalError,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Payment(PaymentError),
    Ticket(TicketError),
    Totp(TotpError),
    /// No identity header on a route that needs one.
    Unauthenticated,
    /// Identity present but of the wrong kind for the route.
    Forbidden { message: String },
    /// A fresh TOTP verification is required before this action.
    StepUpRequired,
    Validation { field: String, message: String },
    Internal { message: String },
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation {
            field: field.into(),
            message: message.into(),
        })
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Forbidden {
            message: message.into(),
        })
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Payment(err) => err.http_status_code(),
            AppErrorKind::Ticket(err) => err.http_status_code(),
            AppErrorKind::Totp(err) => err.http_status_code(),
            AppErrorKind::Unauthenticated => 401,
            AppErrorKind::Forbidden { .. } | AppErrorKind::StepUpRequired => 403,
            AppErrorKind::Validation { .. } => 400,
            AppErrorKind::Internal { .. } => 500,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Payment(err) => match err {
                PaymentError::DecryptFailed { .. } => ErrorCode::DecryptFailed,
                PaymentError::SignatureMismatch { .. } => ErrorCode::SignatureMismatch,
                PaymentError::AmountMismatch { .. } => ErrorCode::AmountMismatch,
                PaymentError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                PaymentError::ProviderUnavailable { timed_out: true, .. } => {
                    ErrorCode::ProviderTimeout
                }
                PaymentError::ProviderUnavailable { .. } => ErrorCode::ProviderUnavailable,
                PaymentError::ProviderError { .. } => ErrorCode::ProviderError,
                PaymentError::ValidationError { .. } => ErrorCode::ValidationError,
                PaymentError::Storage { .. } => ErrorCode::DatabaseError,
            },
            AppErrorKind::Ticket(err) => match err {
                TicketError::Validation(r) | TicketError::Usage(r) => match r {
                    TicketRejection::AlreadyUsed => ErrorCode::TicketAlreadyUsed,
                    TicketRejection::Expired => ErrorCode::TicketExpired,
                    TicketRejection::NotPaid => ErrorCode::TicketNotPaid,
                    TicketRejection::Refunded => ErrorCode::TicketRefunded,
                    TicketRejection::UnauthorizedMerchant => ErrorCode::TicketUnauthorizedMerchant,
                    TicketRejection::MalformedInput => ErrorCode::TicketMalformed,
                    TicketRejection::MissingMerchant => ErrorCode::MerchantRequired,
                },
                TicketError::NotFound => ErrorCode::TicketNotFound,
                TicketError::Storage(_) => ErrorCode::DatabaseError,
            },
            AppErrorKind::Totp(err) => match err {
                TotpError::NotEnrolled => ErrorCode::TotpNotEnrolled,
                TotpError::AlreadyEnabled => ErrorCode::TotpAlreadyEnabled,
                TotpError::InvalidCode => ErrorCode::TotpCodeInvalid,
                TotpError::InvalidSecret => ErrorCode::InternalError,
                TotpError::Storage(_) => ErrorCode::DatabaseError,
            },
            AppErrorKind::Unauthenticated => ErrorCode::Unauthenticated,
            AppErrorKind::Forbidden { .. } => ErrorCode::Forbidden,
            AppErrorKind::StepUpRequired => ErrorCode::StepUpRequired,
            AppErrorKind::Validation { .. } => ErrorCode::ValidationError,
            AppErrorKind::Internal { .. } => ErrorCode::InternalError,
        }
    }

    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Payment(err) => err.user_message(),
            AppErrorKind::Ticket(err) => err.user_message(),
            AppErrorKind::Totp(err) => err.user_message(),
            AppErrorKind::Unauthenticated => "Authentication required".to_string(),
            AppErrorKind::Forbidden { message } => message.clone(),
            AppErrorKind::StepUpRequired => {
                "Please confirm with your authenticator code to continue".to_string()
            }
            AppErrorKind::Validation { field, message } => {
                format!("Invalid value for '{}': {}", field, message)
            }
            AppErrorKind::Internal { .. } => {
                "An internal server error occurred. Please try again later.".to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Payment(err) => err.is_retryable(),
            AppErrorKind::Ticket(TicketError::Storage(_)) => true,
            AppErrorKind::Totp(TotpError::Storage(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AppErrorKind::Payment(err) => write!(f, "{}", err),
            AppErrorKind::Ticket(err) => write!(f, "{}", err),
            AppErrorKind::Totp(err) => write!(f, "{}", err),
            AppErrorKind::Internal { message } => write!(f, "internal error: {}", message),
            _ => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        AppError::new(AppErrorKind::Payment(err))
    }
}

impl From<TicketError> for AppError {
    fn from(err: TicketError) -> Self {
        AppError::new(AppErrorKind::Ticket(err))
    }
}

impl From<TotpError> for AppError {
    fn from(err: TotpError) -> Self {
        AppError::new(AppErrorKind::Totp(err))
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::new(AppErrorKind::Payment(PaymentError::from(err)))
    }
}

pub type AppResult<T> = Result<T, AppError>;
