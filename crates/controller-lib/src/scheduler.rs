//! Cron scheduling of the reconciliation cycle
//!
//! Fires the reconciler on the configured cron expression, evaluated in the
//! configured IANA time zone, and drains cleanly on shutdown.

use crate::reconciler::Reconciler;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct Scheduler {
    schedule: Schedule,
    timezone: Tz,
    reconciler: Arc<Reconciler>,
}

impl Scheduler {
    pub fn new(expression: &str, timezone: &str, reconciler: Arc<Reconciler>) -> Result<Self> {
        let timezone: Tz = timezone
            .parse()
            .map_err(|e| anyhow!("invalid time zone {timezone:?}: {e}"))?;
        let schedule = Schedule::from_str(&normalize_cron(expression))
            .with_context(|| format!("invalid cron expression {expression:?}"))?;

        Ok(Self {
            schedule,
            timezone,
            reconciler,
        })
    }

    fn next_delay(&self) -> Option<Duration> {
        let next = self.schedule.upcoming(self.timezone).next()?;
        let now = Utc::now().with_timezone(&self.timezone);
        Some((next - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Run until the shutdown signal arrives.
    ///
    /// Each cycle runs to completion before the next tick is armed, and
    /// shutdown is only observed between cycles, so an in-flight cycle
    /// always drains naturally.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(timezone = %self.timezone, "starting scheduler");

        loop {
            let Some(delay) = self.next_delay() else {
                warn!("cron schedule has no upcoming occurrence, stopping scheduler");
                break;
            };
            debug!(in_secs = delay.as_secs(), "next budget reset scheduled");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.reconciler.run_cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("shutting down scheduler");
                    break;
                }
            }
        }
    }
}

/// The cron crate expects a seconds field; standard five-field expressions
/// get one prepended.
fn normalize_cron(expression: &str) -> String {
    if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}
