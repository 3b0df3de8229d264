//! Voucher validation, single-use redemption and expiry reminders.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::orders::model::{Order, OrderStatus, TicketState};
use crate::orders::repository::OrderRepository;
use crate::orders::state_machine::SettledEvent;
use crate::services::catalog::Catalog;
use crate::services::notification::{Notice, NotificationSender};
use crate::tickets::decode::{decode_ticket_input, InputFormat};
use crate::tickets::error::{TicketError, TicketRejection};
use crate::tickets::repository::{
    TicketValidation, TicketValidationRepository, ValidationMethod, ValidationOutcome,
};

const REMINDER_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct ReminderWindow {
    /// How long before expiry a reminder becomes due.
    pub lead: Duration,
    /// How long after expiry a late reminder is still sent.
    pub grace: Duration,
}

impl Default for ReminderWindow {
    fn default() -> Self {
        Self {
            lead: Duration::minutes(5),
            grace: Duration::minutes(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TicketSummary {
    pub order_id: Uuid,
    pub ticket_code: String,
    pub item_description: String,
    pub quantity: i32,
    pub amount: i64,
    pub customer_id: Uuid,
    pub product_id: Uuid,
    pub state: TicketState,
    pub valid_until: Option<DateTime<Utc>>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl TicketSummary {
    fn from_order(order: &Order, ticket_code: &str) -> Self {
        Self {
            order_id: order.id,
            ticket_code: ticket_code.to_string(),
            item_description: order.item_description.clone(),
            quantity: order.quantity,
            amount: order.amount,
            customer_id: order.customer_id,
            product_id: order.product_id,
            state: order.ticket_state,
            valid_until: order.valid_until,
            redeemed_at: order.redeemed_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedemptionRequest {
    pub raw_input: String,
    pub merchant_id: Option<Uuid>,
    pub method: ValidationMethod,
    pub ip_address: Option<String>,
}

struct Attempt {
    code: String,
    format: Option<InputFormat>,
    order_id: Option<Uuid>,
    result: Result<TicketSummary, TicketError>,
}

impl Attempt {
    fn refused(
        code: String,
        format: Option<InputFormat>,
        order_id: Option<Uuid>,
        err: TicketError,
    ) -> Self {
        Self {
            code,
            format,
            order_id,
            result: Err(err),
        }
    }
}

enum ReminderAttempt {
    Sent,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ReminderReport {
    pub checked: usize,
    pub sent: usize,
    pub errors: usize,
}

/// Whether a reminder is due: paid, unused, not yet reminded, and `now`
/// within `[valid_until - lead, valid_until + grace]`.
pub fn should_notify_expiry(order: &Order, window: ReminderWindow, now: DateTime<Utc>) -> bool {
    let Some(valid_until) = order.valid_until else {
        return false;
    };
    order.status == OrderStatus::Paid
        && order.ticket_state == TicketState::Unused
        && order.reminder_sent_at.is_none()
        && now >= valid_until - window.lead
        && now <= valid_until + window.grace
}

pub struct TicketService {
    orders: Arc<dyn OrderRepository>,
    validations: Arc<dyn TicketValidationRepository>,
    catalog: Arc<dyn Catalog>,
    notifier: Arc<dyn NotificationSender>,
    window: ReminderWindow,
}

impl TicketService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        validations: Arc<dyn TicketValidationRepository>,
        catalog: Arc<dyn Catalog>,
        notifier: Arc<dyn NotificationSender>,
        window: ReminderWindow,
    ) -> Self {
        Self {
            orders,
            validations,
            catalog,
            notifier,
            window,
        }
    }

    pub fn window(&self) -> ReminderWindow {
        self.window
    }

    /// Read-only check of a presented ticket.
    pub async fn validate(
        &self,
        raw_input: &str,
        merchant_id: Option<Uuid>,
    ) -> Result<TicketSummary, TicketError> {
        let (code, _) = decode_ticket_input(raw_input)?;
        let order = self
            .orders
            .find_by_ticket_code(&code)
            .await?
            .ok_or(TicketError::NotFound)?;
        self.check(&order, merchant_id, Utc::now()).await?;
        Ok(TicketSummary::from_order(&order, &code))
    }

    /// Re-validate and mark the ticket used. An audit record is written for
    /// every attempt, whatever the outcome. Once the ticket is marked used the
    /// redemption stands even if the audit write fails.
    pub async fn redeem(&self, request: RedemptionRequest) -> Result<TicketSummary, TicketError> {
        let now = Utc::now();
        let attempt = self.try_redeem(&request, now).await;
        let order_id = attempt.order_id;

        let (outcome, failure_reason) = match &attempt.result {
            Ok(_) => (ValidationOutcome::Success, None),
            Err(e @ TicketError::Validation(TicketRejection::UnauthorizedMerchant))
            | Err(e @ TicketError::Validation(TicketRejection::MissingMerchant)) => {
                (ValidationOutcome::Unauthorized, Some(e.audit_reason()))
            }
            Err(e) => (ValidationOutcome::Failed, Some(e.audit_reason())),
        };

        let record = TicketValidation {
            id: Uuid::new_v4(),
            order_id,
            ticket_code: attempt.code,
            merchant_id: request.merchant_id,
            validated_at: now,
            outcome,
            failure_reason,
            method: request.method,
            input_format: attempt.format,
            ip_address: request.ip_address.clone(),
        };
        if let Err(e) = self.validations.append(&record).await {
            error!(
                order_id = ?order_id,
                outcome = outcome.as_str(),
                error = %e,
                "failed to write ticket validation record"
            );
            if attempt.result.is_err() {
                return Err(e.into());
            }
        }

        match &attempt.result {
            Ok(summary) => info!(
                order_id = %summary.order_id,
                merchant_id = ?request.merchant_id,
                method = request.method.as_str(),
                "ticket redeemed"
            ),
            Err(e) => info!(
                order_id = ?order_id,
                merchant_id = ?request.merchant_id,
                reason = %e.audit_reason(),
                "ticket redemption refused"
            ),
        }
        attempt.result
    }

    async fn try_redeem(&self, request: &RedemptionRequest, now: DateTime<Utc>) -> Attempt {
        let (code, format) = match decode_ticket_input(&request.raw_input) {
            Ok(decoded) => decoded,
            Err(e) => return Attempt::refused(truncated(&request.raw_input), None, None, e),
        };
        let format = Some(format);

        let order = match self.orders.find_by_ticket_code(&code).await {
            Ok(Some(order)) => order,
            Ok(None) => return Attempt::refused(code, format, None, TicketError::NotFound),
            Err(e) => return Attempt::refused(code, format, None, e.into()),
        };

        if let Err(e) = self.check(&order, request.merchant_id, now).await {
            return Attempt::refused(code, format, Some(order.id), e);
        }

        let result = match self.orders.mark_ticket_used(order.id, now).await {
            Ok(Some(used)) => Ok(TicketSummary::from_order(&used, &code)),
            // Redeemed concurrently between the check and the write.
            Ok(None) => Err(TicketError::Usage(TicketRejection::AlreadyUsed)),
            Err(e) => Err(e.into()),
        };
        Attempt {
            code,
            format,
            order_id: Some(order.id),
            result,
        }
    }

    async fn check(
        &self,
        order: &Order,
        merchant_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<(), TicketError> {
        let merchant_id =
            merchant_id.ok_or(TicketError::Validation(TicketRejection::MissingMerchant))?;
        let owner = self
            .catalog
            .product(order.product_id)
            .await?
            .map(|p| p.merchant_id);
        if owner != Some(merchant_id) {
            warn!(
                order_id = %order.id,
                merchant_id = %merchant_id,
                "ticket presented to a merchant that does not own the product"
            );
            return Err(TicketError::Validation(
                TicketRejection::UnauthorizedMerchant,
            ));
        }

        match order.status {
            OrderStatus::Paid => {}
            OrderStatus::Refunded => {
                return Err(TicketError::Validation(TicketRejection::Refunded));
            }
            _ => return Err(TicketError::Validation(TicketRejection::NotPaid)),
        }

        match order.ticket_state {
            TicketState::Used => return Err(TicketError::Usage(TicketRejection::AlreadyUsed)),
            TicketState::Expired => return Err(TicketError::Usage(TicketRejection::Expired)),
            TicketState::Unused => {}
        }

        if order.valid_until.is_some_and(|v| now > v) {
            return Err(TicketError::Usage(TicketRejection::Expired));
        }
        Ok(())
    }

    /// Route a settlement to the customer as a "ticket issued" notice.
    /// Delivery problems are logged; the settlement itself stands.
    pub async fn on_settled(&self, event: &SettledEvent) {
        let notice = Notice::TicketIssued {
            order_id: event.order.id,
            ticket_code: event.ticket_code.clone(),
            item_description: event.order.item_description.clone(),
            valid_until: event.valid_until,
        };
        match self.catalog.customer(event.order.customer_id).await {
            Ok(Some(customer)) => {
                if let Err(e) = self.notifier.send(&customer, &notice).await {
                    warn!(order_id = %event.order.id, error = %e, "ticket issued notice not delivered");
                }
            }
            Ok(None) => warn!(
                order_id = %event.order.id,
                customer_id = %event.order.customer_id,
                "customer not found for ticket issued notice"
            ),
            Err(e) => warn!(order_id = %event.order.id, error = %e, "customer lookup failed"),
        }
    }

    pub async fn send_all_expiry_notifications(&self) -> Result<ReminderReport, TicketError> {
        self.send_all_expiry_notifications_at(Utc::now()).await
    }

    /// One idempotent sweep. The reminder flag is claimed before sending and
    /// released if delivery fails, so overlapping sweeps never double-send.
    pub async fn send_all_expiry_notifications_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ReminderReport, TicketError> {
        use futures::stream::{self, StreamExt};

        let candidates = self
            .orders
            .tickets_pending_reminder(now - self.window.grace, now + self.window.lead)
            .await?;
        let checked = candidates.len();

        let results: Vec<ReminderAttempt> = stream::iter(candidates)
            .map(|order| self.remind(order, now))
            .buffer_unordered(REMINDER_CONCURRENCY)
            .collect()
            .await;

        let mut report = ReminderReport {
            checked,
            ..ReminderReport::default()
        };
        for result in results {
            match result {
                ReminderAttempt::Sent => report.sent += 1,
                ReminderAttempt::Failed => report.errors += 1,
                ReminderAttempt::Skipped => {}
            }
        }

        if report.checked > 0 {
            info!(
                checked = report.checked,
                sent = report.sent,
                errors = report.errors,
                "expiry reminder sweep finished"
            );
        }
        Ok(report)
    }

    async fn remind(&self, order: Order, now: DateTime<Utc>) -> ReminderAttempt {
        if !should_notify_expiry(&order, self.window, now) {
            return ReminderAttempt::Skipped;
        }
        let (Some(code), Some(valid_until)) = (order.ticket_code.clone(), order.valid_until) else {
            return ReminderAttempt::Skipped;
        };
        match self.orders.claim_reminder(order.id, now).await {
            Ok(true) => {}
            // Another sweep got there first.
            Ok(false) => return ReminderAttempt::Skipped,
            Err(e) => {
                error!(order_id = %order.id, error = %e, "failed to claim reminder");
                return ReminderAttempt::Failed;
            }
        }

        let delivered = match self.catalog.customer(order.customer_id).await {
            Ok(Some(customer)) => {
                let notice = Notice::TicketExpiring {
                    order_id: order.id,
                    ticket_code: code,
                    item_description: order.item_description.clone(),
                    valid_until,
                };
                self.notifier
                    .send(&customer, &notice)
                    .await
                    .map_err(|e| e.to_string())
            }
            Ok(None) => Err("customer not found".to_string()),
            Err(e) => Err(e.to_string()),
        };

        match delivered {
            Ok(()) => ReminderAttempt::Sent,
            Err(reason) => {
                warn!(order_id = %order.id, reason = %reason, "expiry reminder not delivered");
                if let Err(e) = self.orders.release_reminder(order.id).await {
                    error!(order_id = %order.id, error = %e, "failed to release reminder claim");
                }
                ReminderAttempt::Failed
            }
        }
    }

    pub async fn expire_overdue(&self) -> Result<u64, TicketError> {
        self.expire_overdue_at(Utc::now()).await
    }

    /// Mark unused tickets as `expired` once the late-reminder grace period
    /// after their expiry has passed. Redemption already refuses them from
    /// `valid_until` on; the status change only closes the reminder window.
    pub async fn expire_overdue_at(&self, now: DateTime<Utc>) -> Result<u64, TicketError> {
        let expired = self
            .orders
            .expire_overdue_tickets(now - self.window.grace)
            .await?;
        if expired > 0 {
            info!(expired, "overdue tickets expired");
        }
        Ok(expired)
    }

    pub async fn audit_trail(&self, order_id: Uuid) -> Result<Vec<TicketValidation>, TicketError> {
        Ok(self.validations.list_for_order(order_id).await?)
    }
}

fn truncated(raw: &str) -> String {
    raw.trim().chars().take(64).collect()
}
