use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::services::catalog::CustomerProfile;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    TicketIssued {
        order_id: Uuid,
        ticket_code: String,
        item_description: String,
        valid_until: DateTime<Utc>,
    },
    TicketExpiring {
        order_id: Uuid,
        ticket_code: String,
        item_description: String,
        valid_until: DateTime<Utc>,
    },
}

impl Notice {
    pub fn kind(&self) -> &'static str {
        match self {
            Notice::TicketIssued { .. } => "ticket_issued",
            Notice::TicketExpiring { .. } => "ticket_expiring",
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            Notice::TicketIssued { order_id, .. } | Notice::TicketExpiring { order_id, .. } => {
                *order_id
            }
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum NotificationError {
    #[error("recipient {0} has no reachable address")]
    NoAddress(Uuid),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outbound customer messaging. Transport (email, SMS) lives outside this crate.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, recipient: &CustomerProfile, notice: &Notice)
        -> Result<(), NotificationError>;
}

/// Writes notices to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LoggingNotificationSender;

impl LoggingNotificationSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationSender for LoggingNotificationSender {
    async fn send(
        &self,
        recipient: &CustomerProfile,
        notice: &Notice,
    ) -> Result<(), NotificationError> {
        let email = recipient
            .email
            .as_deref()
            .ok_or(NotificationError::NoAddress(recipient.id))?;
        match notice {
            Notice::TicketIssued {
                order_id,
                valid_until,
                ..
            } => {
                info!(
                    order_id = %order_id,
                    recipient = %email,
                    valid_until = %valid_until,
                    "🔔 NOTIFICATION: Ticket issued"
                );
            }
            Notice::TicketExpiring {
                order_id,
                valid_until,
                ..
            } => {
                info!(
                    order_id = %order_id,
                    recipient = %email,
                    valid_until = %valid_until,
                    "🔔 NOTIFICATION: Ticket expiring soon"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_sender_requires_an_address() {
        let sender = LoggingNotificationSender::new();
        let notice = Notice::TicketExpiring {
            order_id: Uuid::new_v4(),
            ticket_code: "TKT1".to_string(),
            item_description: "Cake".to_string(),
            valid_until: Utc::now(),
        };
        let no_email = CustomerProfile {
            id: Uuid::new_v4(),
            email: None,
            name: None,
        };
        assert!(matches!(
            sender.send(&no_email, &notice).await,
            Err(NotificationError::NoAddress(_))
        ));

        let with_email = CustomerProfile {
            email: Some("a@example.com".to_string()),
            ..no_email
        };
        assert!(sender.send(&with_email, &notice).await.is_ok());
        assert_eq!(notice.kind(), "ticket_expiring");
    }
}
