use thiserror::Error;

use crate::database::error::DatabaseError;
use crate::payments::crypto::CodecError;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// Every decode strategy was exhausted. Only the ciphertext length is kept.
    #[error("Decrypt failed: channel={channel}, ciphertext_len={ciphertext_len}")]
    DecryptFailed {
        channel: String,
        ciphertext_len: usize,
    },

    #[error("Signature mismatch: provider={provider}, message={message}")]
    SignatureMismatch { provider: String, message: String },

    #[error("Amount mismatch: expected={expected}, reported={reported}")]
    AmountMismatch { expected: i64, reported: i64 },

    #[error("Order not found: {reference}")]
    OrderNotFound { reference: String },

    #[error("Provider unavailable: provider={provider}, timed_out={timed_out}, message={message}")]
    ProviderUnavailable {
        provider: String,
        message: String,
        timed_out: bool,
    },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::DecryptFailed { .. } => false,
            PaymentError::SignatureMismatch { .. } => false,
            PaymentError::AmountMismatch { .. } => false,
            PaymentError::OrderNotFound { .. } => false,
            PaymentError::ProviderUnavailable { .. } => true,
            PaymentError::ProviderError { retryable, .. } => *retryable,
            PaymentError::Storage { .. } => true,
        }
    }

    /// Cryptographic failures are never retried and are logged as security events.
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            PaymentError::DecryptFailed { .. } | PaymentError::SignatureMismatch { .. }
        )
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::DecryptFailed { .. } => 400,
            PaymentError::SignatureMismatch { .. } => 401,
            PaymentError::AmountMismatch { .. } => 409,
            PaymentError::OrderNotFound { .. } => 404,
            PaymentError::ProviderUnavailable { timed_out: true, .. } => 504,
            PaymentError::ProviderUnavailable { .. } => 503,
            PaymentError::ProviderError { .. } => 502,
            PaymentError::Storage { .. } => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::DecryptFailed { .. } | PaymentError::SignatureMismatch { .. } => {
                "Payment verification failed".to_string()
            }
            PaymentError::AmountMismatch { .. } => {
                "The order amount has changed. Please review your order and try again".to_string()
            }
            PaymentError::OrderNotFound { .. } => {
                "We could not match this payment to an order. Please contact support".to_string()
            }
            PaymentError::ProviderUnavailable { .. } => {
                "Payment provider is temporarily unavailable. Please try again shortly".to_string()
            }
            PaymentError::ProviderError { .. } => "Payment provider returned an error".to_string(),
            PaymentError::Storage { .. } => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
        }
    }
}

impl From<DatabaseError> for PaymentError {
    fn from(err: DatabaseError) -> Self {
        PaymentError::Storage {
            message: err.to_string(),
        }
    }
}

impl From<CodecError> for PaymentError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::DecryptFailed { ciphertext_len } => PaymentError::DecryptFailed {
                channel: "unknown".to_string(),
                ciphertext_len,
            },
            other => PaymentError::ValidationError {
                message: other.to_string(),
                field: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::AmountMismatch {
                expected: 2500,
                reported: 100
            }
            .http_status_code(),
            409
        );
        assert_eq!(
            PaymentError::ProviderUnavailable {
                provider: "linepay".to_string(),
                message: "timeout".to_string(),
                timed_out: true
            }
            .http_status_code(),
            504
        );
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::ProviderUnavailable {
            provider: "linepay".to_string(),
            message: "connection refused".to_string(),
            timed_out: false
        }
        .is_retryable());
        assert!(!PaymentError::SignatureMismatch {
            provider: "newebpay".to_string(),
            message: "checksum".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::DecryptFailed {
            channel: "notify".to_string(),
            ciphertext_len: 10
        }
        .is_retryable());
    }

    #[test]
    fn security_events_hide_details_from_users() {
        let err = PaymentError::SignatureMismatch {
            provider: "newebpay".to_string(),
            message: "TradeSha mismatch".to_string(),
        };
        assert!(err.is_security_event());
        assert!(!err.user_message().contains("TradeSha"));
    }
}
