//! Storage error type shared by the PostgreSQL and in-memory repositories.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    UniqueViolation { constraint: Option<String> },
    Connection,
    Query,
    Decode,
}

impl fmt::Display for DatabaseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseErrorKind::NotFound { entity, id } => write!(f, "{} {} not found", entity, id),
            DatabaseErrorKind::UniqueViolation { constraint } => write!(
                f,
                "unique violation ({})",
                constraint.as_deref().unwrap_or("unknown constraint")
            ),
            DatabaseErrorKind::Connection => f.write_str("connection error"),
            DatabaseErrorKind::Query => f.write_str("query error"),
            DatabaseErrorKind::Decode => f.write_str("decode error"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub message: String,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unique_violation(constraint: impl Into<String>) -> Self {
        let constraint = constraint.into();
        Self::new(
            DatabaseErrorKind::UniqueViolation {
                constraint: Some(constraint.clone()),
            },
            format!("duplicate value for {}", constraint),
        )
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Decode, message)
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Connection)
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::new(
                DatabaseErrorKind::NotFound {
                    entity: "row".to_string(),
                    id: "unknown".to_string(),
                },
                err.to_string(),
            ),
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::new(
                DatabaseErrorKind::UniqueViolation {
                    constraint: db.constraint().map(str::to_string),
                },
                db.message().to_string(),
            ),
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::new(DatabaseErrorKind::Connection, err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::new(DatabaseErrorKind::Decode, err.to_string())
            }
            _ => Self::new(DatabaseErrorKind::Query, err.to_string()),
        }
    }
}
