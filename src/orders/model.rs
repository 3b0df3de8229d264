use crate::payments::error::PaymentError;
use crate::payments::types::ProviderName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// `pending -> {paid, failed, cancelled}`, `paid -> refunded`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Paid)
                | (OrderStatus::Pending, OrderStatus::Failed)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Paid, OrderStatus::Refunded)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "failed" => Ok(OrderStatus::Failed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    #[default]
    Unused,
    Used,
    Expired,
}

impl TicketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketState::Unused => "unused",
            TicketState::Used => "used",
            TicketState::Expired => "expired",
        }
    }
}

impl FromStr for TicketState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unused" => Ok(TicketState::Unused),
            "used" => Ok(TicketState::Used),
            "expired" => Ok(TicketState::Expired),
            other => Err(format!("unknown ticket state: {}", other)),
        }
    }
}

/// Canonical purchase attempt. Never deleted; cancellation and refund are
/// status transitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub provider: ProviderName,
    pub status: OrderStatus,
    pub amount: i64,
    pub item_description: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub customer_id: Uuid,
    pub product_id: Uuid,
    pub provider_order_reference: String,
    pub provider_transaction_reference: Option<String>,
    pub payment_method: Option<String>,
    pub card_mask: Option<String>,
    pub provider_payload: Option<JsonValue>,
    pub checkout_transaction_id: Option<String>,
    pub checkout_payment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub ticket_code: Option<String>,
    pub ticket_state: TicketState,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub provider: ProviderName,
    pub item_description: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub customer_id: Uuid,
    pub product_id: Uuid,
    pub provider_order_reference: String,
}

impl Order {
    /// Build a pending order, computing `amount = unit_price * quantity`.
    pub fn new_pending(new: NewOrder, now: DateTime<Utc>) -> Result<Self, PaymentError> {
        if new.quantity <= 0 {
            return Err(PaymentError::ValidationError {
                message: "quantity must be at least 1".to_string(),
                field: Some("quantity".to_string()),
            });
        }
        if new.unit_price < 0 {
            return Err(PaymentError::ValidationError {
                message: "unit price cannot be negative".to_string(),
                field: Some("unit_price".to_string()),
            });
        }
        let amount = new
            .unit_price
            .checked_mul(i64::from(new.quantity))
            .ok_or_else(|| PaymentError::ValidationError {
                message: "order amount overflows".to_string(),
                field: Some("quantity".to_string()),
            })?;

        Ok(Self {
            id: Uuid::new_v4(),
            provider: new.provider,
            status: OrderStatus::Pending,
            amount,
            item_description: new.item_description,
            quantity: new.quantity,
            unit_price: new.unit_price,
            customer_id: new.customer_id,
            product_id: new.product_id,
            provider_order_reference: new.provider_order_reference,
            provider_transaction_reference: None,
            payment_method: None,
            card_mask: None,
            provider_payload: None,
            checkout_transaction_id: None,
            checkout_payment_url: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            ticket_code: None,
            ticket_state: TicketState::Unused,
            redeemed_at: None,
            valid_until: None,
            reminder_sent_at: None,
        })
    }

    pub fn amount_is_consistent(&self) -> bool {
        self.unit_price.checked_mul(i64::from(self.quantity)) == Some(self.amount)
    }

    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order(quantity: i32, unit_price: i64) -> NewOrder {
        NewOrder {
            provider: ProviderName::Newebpay,
            item_description: "Latte".to_string(),
            quantity,
            unit_price,
            customer_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            provider_order_reference: "ORD1019120000".to_string(),
        }
    }

    #[test]
    fn amount_is_computed_from_unit_price() {
        let order = Order::new_pending(new_order(5, 500), Utc::now()).unwrap();
        assert_eq!(order.amount, 2500);
        assert!(order.amount_is_consistent());
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.ticket_state, TicketState::Unused);
    }

    #[test]
    fn rejects_non_positive_quantity_and_overflow() {
        assert!(Order::new_pending(new_order(0, 500), Utc::now()).is_err());
        assert!(Order::new_pending(new_order(2, i64::MAX), Utc::now()).is_err());
    }

    #[test]
    fn transitions_follow_the_lifecycle() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Paid.can_transition_to(Refunded));
        assert!(!Paid.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Paid));
        assert!(!Refunded.can_transition_to(Paid));
        assert!(!Cancelled.can_transition_to(Pending));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ] {
            assert_eq!(OrderStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(OrderStatus::from_str("shipped").is_err());
    }
}
