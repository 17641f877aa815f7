// Reconciliation scheduler - drives the daily collection cycle
//
// Runs once per day at a configured off-peak hour: create due
// second-instalment sessions first, then reminders, then expired-session
// recreation. The same entry points stay callable on demand through the
// admin API; overlap between a manual run and the daily cycle is safe
// because every side effect is gated by the idempotency log.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info};

use crate::reconcile::idempotency::TriggerSource;
use crate::reconcile::ReconciliationEngine;

/// Reconciliation schedule configuration
#[derive(Debug, Clone)]
pub struct ReconcileScheduleConfig {
    /// UTC hour to execute the cycle (0-23)
    pub execution_hour: u32,
}

/// Reconciliation scheduler - coordinates the daily collection cycle
pub struct ReconcileScheduler {
    config: ReconcileScheduleConfig,
    engine: Arc<ReconciliationEngine>,
}

impl ReconcileScheduler {
    pub fn new(config: ReconcileScheduleConfig, engine: Arc<ReconciliationEngine>) -> Self {
        Self { config, engine }
    }

    /// Start the scheduler (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let config = self.config.clone();
        let engine = self.engine.clone();

        tokio::spawn(async move {
            Self::run_daily_scheduler(&config, &engine).await;
        })
    }

    /// Daily scheduler - runs once per day at the configured hour
    async fn run_daily_scheduler(config: &ReconcileScheduleConfig, engine: &Arc<ReconciliationEngine>) {
        loop {
            let now = Utc::now();
            let next_execution = Self::calculate_next_daily_execution(now, config.execution_hour);
            let duration_until_execution = next_execution.signed_duration_since(now);

            if duration_until_execution.num_seconds() > 0 {
                info!(
                    "⏰ Next reconciliation cycle scheduled for: {} UTC",
                    next_execution.format("%H:%M:%S")
                );

                tokio::time::sleep(Duration::from_secs(
                    duration_until_execution.num_seconds() as u64,
                ))
                .await;
            }

            info!("🔄 Starting daily reconciliation cycle");
            Self::run_cycle(engine).await;
            info!("✓ Reconciliation cycle completed");
        }
    }

    /// One full cycle; entry-point failures are logged and never kill the loop
    async fn run_cycle(engine: &Arc<ReconciliationEngine>) {
        match engine.process_all_deals(TriggerSource::Cron).await {
            Ok(summary) => info!(
                "💳 Sessions: {} found, {} created, {} skipped, {} errors",
                summary.total_found,
                summary.created,
                summary.skipped.len(),
                summary.errors.len()
            ),
            Err(e) => error!("❌ Session run failed: {:?}", e),
        }

        match engine.process_all_reminders(TriggerSource::Cron).await {
            Ok(summary) => info!(
                "📨 Reminders: {} found, {} sent, {} skipped, {} errors",
                summary.total_found,
                summary.sent,
                summary.skipped.len(),
                summary.errors.len()
            ),
            Err(e) => error!("❌ Reminder run failed: {:?}", e),
        }

        match engine.process_expired_sessions(TriggerSource::Cron).await {
            Ok(summary) => info!(
                "♻️ Expired sessions: {} found, {} recreated, {} skipped, {} errors",
                summary.total_found,
                summary.recreated,
                summary.skipped.len(),
                summary.errors.len()
            ),
            Err(e) => error!("❌ Expired-session run failed: {:?}", e),
        }
    }

    /// Calculate next daily execution time
    fn calculate_next_daily_execution(now: DateTime<Utc>, execution_hour: u32) -> DateTime<Utc> {
        let mut next = now
            .date_naive()
            .and_hms_opt(execution_hour, 0, 0)
            .unwrap_or_else(|| now.date_naive().and_hms_opt(0, 0, 0).expect("midnight is valid"));
        let next_dt = Utc.from_utc_datetime(&next);

        // If execution time has passed today, schedule for tomorrow
        if next_dt <= now {
            next = (now.date_naive() + chrono::Duration::days(1))
                .and_hms_opt(execution_hour, 0, 0)
                .unwrap_or_else(|| next);
            Utc.from_utc_datetime(&next)
        } else {
            next_dt
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn test_calculate_next_daily_execution() {
        // Current time: 2024-01-01 10:00:00 UTC
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();

        // Execution hour: 14:00 (today)
        let next = ReconcileScheduler::calculate_next_daily_execution(now, 14);
        assert_eq!(next.hour(), 14);
        assert_eq!(next.day(), 1);

        // Execution hour: 09:00 (already passed, so tomorrow)
        let next = ReconcileScheduler::calculate_next_daily_execution(now, 9);
        assert_eq!(next.hour(), 9);
        assert_eq!(next.day(), 2);
    }
}
