//! Periodic ticket maintenance: expiry reminders, then the expired-status
//! sweep. Both are idempotent, so a cycle that overlaps a restart is harmless.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::TicketConfig;
use crate::tickets::service::{ReminderReport, TicketService};

#[derive(Debug, Clone)]
pub struct TicketSweeperConfig {
    pub interval: Duration,
}

impl Default for TicketSweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

impl From<&TicketConfig> for TicketSweeperConfig {
    fn from(config: &TicketConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.sweep_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub reminders: ReminderReport,
    pub expired: u64,
}

pub struct TicketSweeperWorker {
    tickets: Arc<TicketService>,
    config: TicketSweeperConfig,
}

impl TicketSweeperWorker {
    pub fn new(tickets: Arc<TicketService>, config: TicketSweeperConfig) -> Self {
        Self { tickets, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "ticket sweeper worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("ticket sweeper worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    self.run_cycle().await;
                }
            }
        }

        info!("ticket sweeper worker stopped");
    }

    /// One pass. Reminders go first so that tickets inside the grace period
    /// are still reminded before they are marked expired.
    pub async fn run_cycle(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();

        match self.tickets.send_all_expiry_notifications().await {
            Ok(report) => {
                if report.checked > 0 {
                    info!(
                        checked = report.checked,
                        sent = report.sent,
                        errors = report.errors,
                        "expiry reminders processed"
                    );
                }
                summary.reminders = report;
            }
            Err(e) => warn!(error = %e, "expiry reminder sweep failed"),
        }

        match self.tickets.expire_overdue().await {
            Ok(count) => {
                if count > 0 {
                    info!(count, "tickets marked expired");
                }
                summary.expired = count;
            }
            Err(e) => warn!(error = %e, "ticket expiry sweep failed"),
        }

        summary
    }
}
