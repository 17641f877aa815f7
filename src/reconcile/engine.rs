use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal_macros::dec;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::checkout::models::{CreateSessionContext, CreatedSession};
use crate::checkout::scanner::{NormalizedSession, ScanConfig, SessionScanner};
use crate::checkout::SessionProcessor;
use crate::crm::models::{Deal, DealStatus};
use crate::crm::DealSource;
use crate::error::{AppError, AppResult, NotifyError};
use crate::ledger::models::{
    InstalmentRole, PaymentFilter, PaymentRecord, PaymentState, ScheduleTag, SessionState,
};
use crate::ledger::PaymentStore;
use crate::notify::NotificationChannel;
use crate::reconcile::analyzer::{PaymentStateAnalyzer, Thresholds};
use crate::reconcile::idempotency::{
    ActionType, IdempotencyLog, IdempotencyRecord, IdempotencyStore, TriggerSource,
};
use crate::reconcile::summary::{
    FailedDeal, RecreationSummary, ReminderRunSummary, SessionCreationSummary, SkipReason,
    SkippedDeal,
};
use crate::schedule::{PaymentPlan, SchedulePolicy};

/// Engine windows and identifiers
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// A second-instalment session younger than this is considered active
    /// without further proof
    pub active_session_grace_hours: i64,
    /// A reminder is superseded by any open session younger than this
    pub fresh_session_window_days: i64,
    /// How far back to probe the processor for open sessions before
    /// recreating an expired one
    pub open_session_probe_days: i64,
    /// Session ids with this prefix are synthetic and never queried live
    pub test_session_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            active_session_grace_hours: 24,
            fresh_session_window_days: 7,
            open_session_probe_days: 7,
            test_session_prefix: "cs_test_".to_string(),
        }
    }
}

/// A reminder ready to dispatch, produced by `find_reminder_tasks`
#[derive(Debug, Clone)]
pub struct ReminderTask {
    pub deal: Deal,
    pub due_date: NaiveDate,
    pub payment_link: String,
    /// Newest known rest session for the pre-dispatch payment re-check
    pub latest_rest_session_id: Option<String>,
}

/// Candidate enumeration result for a reminder run
#[derive(Debug)]
pub struct ReminderScan {
    pub total_found: usize,
    pub tasks: Vec<ReminderTask>,
    pub skipped: Vec<SkippedDeal>,
    pub errors: Vec<FailedDeal>,
}

/// An expired session elected for recreation, produced by
/// `find_expired_session_tasks`
#[derive(Debug, Clone)]
pub struct RecreationTask {
    pub deal: Deal,
    pub session: NormalizedSession,
}

/// Candidate enumeration result for a recreation run
#[derive(Debug)]
pub struct RecreationScan {
    pub total_found: usize,
    pub tasks: Vec<RecreationTask>,
    pub skipped: Vec<SkippedDeal>,
    pub errors: Vec<FailedDeal>,
}

enum Outcome {
    Acted { notify_error: Option<String> },
    Skipped(SkipReason),
}

/// The reconciliation core.
///
/// Re-evaluates every deal from scratch each cycle; the only state carried
/// across cycles is the idempotency log. Candidates are merged from the
/// local ledger and the remote processor, and every candidate is re-verified
/// against the processor immediately before any side effect, because either
/// source alone can lag.
pub struct ReconciliationEngine {
    crm: Arc<dyn DealSource>,
    processor: Arc<dyn SessionProcessor>,
    payments: Arc<dyn PaymentStore>,
    notifier: Arc<dyn NotificationChannel>,
    scanner: SessionScanner,
    analyzer: PaymentStateAnalyzer,
    dedup: IdempotencyLog,
    policy: SchedulePolicy,
    config: EngineConfig,
}

impl ReconciliationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        crm: Arc<dyn DealSource>,
        processor: Arc<dyn SessionProcessor>,
        payments: Arc<dyn PaymentStore>,
        notifier: Arc<dyn NotificationChannel>,
        idempotency: Arc<dyn IdempotencyStore>,
        policy: SchedulePolicy,
        scan_config: ScanConfig,
        config: EngineConfig,
    ) -> Self {
        Self {
            scanner: SessionScanner::new(processor.clone(), scan_config),
            analyzer: PaymentStateAnalyzer::new(payments.clone(), Thresholds::default()),
            dedup: IdempotencyLog::new(idempotency),
            crm,
            processor,
            payments,
            notifier,
            policy,
            config,
        }
    }

    // ========== ENTRY POINT A: CREATE SECOND-INSTALMENT SESSIONS ==========

    /// Find deals with a paid deposit under the split plan whose second
    /// instalment is due, and create a checkout session for each.
    pub async fn process_all_deals(
        &self,
        trigger: TriggerSource,
    ) -> AppResult<SessionCreationSummary> {
        let run_id = Uuid::new_v4();
        self.dedup.clear_run_cache();
        info!("🔄 Second-instalment session run {} starting", run_id);

        let deposits = self
            .payments
            .list_all(PaymentFilter {
                role: Some(InstalmentRole::Deposit),
                state: Some(PaymentState::Paid),
                schedule: None,
            })
            .await?;

        let deal_ids: BTreeSet<i64> = deposits.iter().map(|r| r.deal_id).collect();

        let mut summary = SessionCreationSummary {
            run_id,
            total_found: deal_ids.len(),
            created: 0,
            skipped: Vec::new(),
            errors: Vec::new(),
        };

        for deal_id in deal_ids {
            match self.create_second_session(deal_id, trigger, run_id).await {
                Ok(Outcome::Acted { notify_error }) => {
                    summary.created += 1;
                    if let Some(message) = notify_error {
                        summary.errors.push(FailedDeal {
                            deal_id,
                            error: message,
                        });
                    }
                }
                Ok(Outcome::Skipped(reason)) => {
                    summary.skipped.push(SkippedDeal { deal_id, reason })
                }
                Err(e) => {
                    error!("❌ Deal {}: session creation failed: {}", deal_id, e);
                    summary.errors.push(FailedDeal {
                        deal_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "✓ Session run {} done: {} found, {} created, {} skipped, {} errors",
            run_id,
            summary.total_found,
            summary.created,
            summary.skipped.len(),
            summary.errors.len()
        );
        Ok(summary)
    }

    async fn create_second_session(
        &self,
        deal_id: i64,
        trigger: TriggerSource,
        run_id: Uuid,
    ) -> AppResult<Outcome> {
        let now = Utc::now();

        let deal = self
            .crm
            .get_deal(deal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("deal {} not found in CRM", deal_id)))?;

        if let Some(reason) = inactive_deal_reason(&deal) {
            return Ok(Outcome::Skipped(reason));
        }

        let records = self.payments.list_for_deal(deal_id).await?;

        // The plan frozen when the deposit was paid governs whether a second
        // instalment is owed, regardless of what the deal's dates say today
        let Some(initial_schedule) = initial_schedule(&deal, &records) else {
            return Ok(Outcome::Skipped(SkipReason::FirstInstalmentUnpaid));
        };
        if initial_schedule != ScheduleTag::Split {
            return Ok(Outcome::Skipped(SkipReason::InitialPlanNotSplit));
        }

        let Some(due_date) = self.due_date_for(&deal) else {
            return Ok(Outcome::Skipped(SkipReason::NoDueDate));
        };
        if !self.policy.is_due_date_reached(due_date, now) {
            return Ok(Outcome::Skipped(SkipReason::DueDateNotReached));
        }

        if self.analyzer.deal_fully_paid(&deal, &records) {
            return Ok(Outcome::Skipped(SkipReason::DealFullyPaid));
        }

        if self
            .dedup
            .was_action_taken(deal_id, due_date, ActionType::SessionCreated)
            .await?
        {
            return Ok(Outcome::Skipped(SkipReason::SessionAlreadyCreated));
        }

        if self.has_active_second_session(&records, now).await? {
            return Ok(Outcome::Skipped(SkipReason::ActiveSessionExists));
        }

        let remaining =
            deal.amount - PaymentStateAnalyzer::paid_sum_in_currency(&records, &deal.currency);
        let context = CreateSessionContext {
            role: InstalmentRole::Rest,
            schedule: ScheduleTag::Split,
            instalment_index: 2,
            custom_amount: Some(remaining),
            suppress_notification: true,
        };

        let created = self.processor.create_session(&deal, &context).await?;
        info!(
            "💳 Deal {}: created second-instalment session {} for {} {}",
            deal_id, created.session_id, created.amount, created.currency
        );

        self.payments
            .save(&session_record(&deal, &created, InstalmentRole::Rest, ScheduleTag::Split, now))
            .await?;

        self.dedup
            .record_action(IdempotencyRecord {
                deal_id,
                due_date,
                action: ActionType::SessionCreated,
                session_id: Some(created.session_id.clone()),
                trigger,
                run_id,
                created_at: now,
            })
            .await?;

        // The session stands even when the customer cannot be notified
        let notify_error = match self.send_payment_link(&deal, &created).await {
            Ok(()) => None,
            Err(e) => {
                warn!("⚠️ Deal {}: payment link created but not delivered: {}", deal_id, e);
                Some(e.to_string())
            }
        };

        Ok(Outcome::Acted { notify_error })
    }

    /// Is there a second-instalment session the customer could still pay?
    ///
    /// A locally `Open` record is never trusted on its own - it is confirmed
    /// with a live point-read, because webhook-driven status updates lag.
    async fn has_active_second_session(
        &self,
        records: &[PaymentRecord],
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let grace = Duration::hours(self.config.active_session_grace_hours);

        for record in records.iter().rev() {
            if record.role != InstalmentRole::Rest || record.is_paid() {
                continue;
            }

            let locally_open = record.session_status == SessionState::Open;
            let fresh = record.age(now) < grace;
            if !locally_open && !fresh {
                continue;
            }

            match self.processor.retrieve_session(&record.session_id).await? {
                Some(remote) if remote.is_open_unpaid() => return Ok(true),
                Some(_) => continue,
                // The processor no longer knows the session; a stale local
                // "open" proves nothing
                None => continue,
            }
        }

        Ok(false)
    }

    // ========== ENTRY POINT B: REMINDERS ==========

    /// Enumerate deals owing a second-instalment reminder.
    ///
    /// Candidates come from both the local ledger and the remote expired-
    /// session sweep; either source alone can miss deals.
    pub async fn find_reminder_tasks(&self) -> AppResult<ReminderScan> {
        let now = Utc::now();

        let unpaid_rest = self
            .payments
            .list_all(PaymentFilter {
                role: Some(InstalmentRole::Rest),
                state: Some(PaymentState::Unpaid),
                schedule: None,
            })
            .await?;
        let expired = self.scanner.find_expired_unpaid_sessions().await?;

        let mut deal_ids: BTreeSet<i64> = unpaid_rest.iter().map(|r| r.deal_id).collect();
        deal_ids.extend(expired.iter().map(|s| s.deal_id));

        let mut scan = ReminderScan {
            total_found: deal_ids.len(),
            tasks: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
        };

        for deal_id in deal_ids {
            match self.evaluate_reminder(deal_id, &expired, now).await {
                Ok(Ok(task)) => scan.tasks.push(task),
                Ok(Err(reason)) => scan.skipped.push(SkippedDeal { deal_id, reason }),
                Err(e) => {
                    error!("❌ Deal {}: reminder evaluation failed: {}", deal_id, e);
                    scan.errors.push(FailedDeal {
                        deal_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(scan)
    }

    async fn evaluate_reminder(
        &self,
        deal_id: i64,
        expired: &[NormalizedSession],
        now: DateTime<Utc>,
    ) -> AppResult<Result<ReminderTask, SkipReason>> {
        let deal = self
            .crm
            .get_deal(deal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("deal {} not found in CRM", deal_id)))?;

        let records = self.payments.list_for_deal(deal_id).await?;

        let Some(initial_schedule) = initial_schedule(&deal, &records) else {
            return Ok(Err(SkipReason::FirstInstalmentUnpaid));
        };
        if initial_schedule != ScheduleTag::Split {
            return Ok(Err(SkipReason::InitialPlanNotSplit));
        }

        let Some(due_date) = self.due_date_for(&deal) else {
            return Ok(Err(SkipReason::NoDueDate));
        };
        if !self.policy.is_due_date_reached(due_date, now) {
            return Ok(Err(SkipReason::DueDateNotReached));
        }

        // Paid-by-sum, never paid-by-count: partial rest payments add up
        if self.analyzer.second_instalment_paid(&deal, &records) {
            return Ok(Err(SkipReason::SecondPaymentAlreadyPaid));
        }
        if self.analyzer.deal_fully_paid(&deal, &records) {
            return Ok(Err(SkipReason::DealFullyPaid));
        }

        if self
            .dedup
            .was_action_taken(deal_id, due_date, ActionType::ReminderSent)
            .await?
        {
            return Ok(Err(SkipReason::ReminderAlreadySent));
        }

        // A freshly created link supersedes a reminder about an older one
        let fresh_window = Duration::days(self.config.fresh_session_window_days);
        let has_fresh_session = records.iter().any(|r| {
            r.role == InstalmentRole::Rest
                && !r.is_paid()
                && r.session_status == SessionState::Open
                && r.age(now) < fresh_window
        });
        if has_fresh_session {
            return Ok(Err(SkipReason::FreshSessionExists));
        }

        let deal_expired: Vec<&NormalizedSession> =
            expired.iter().filter(|s| s.deal_id == deal_id).collect();

        let newest_unpaid_rest = records
            .iter()
            .rev()
            .find(|r| r.role == InstalmentRole::Rest && !r.is_paid());

        let Some(payment_link) = self
            .resolve_payment_link(newest_unpaid_rest, &records, &deal_expired)
            .await?
        else {
            return Ok(Err(SkipReason::NoPaymentLink));
        };

        let latest_rest_session_id = newest_unpaid_rest
            .map(|r| r.session_id.clone())
            .or_else(|| {
                deal_expired
                    .iter()
                    .max_by_key(|s| s.created)
                    .map(|s| s.session_id.clone())
            });

        Ok(Ok(ReminderTask {
            deal,
            due_date,
            payment_link,
            latest_rest_session_id,
        }))
    }

    /// Cached URL on the unpaid record, else the expired session's own
    /// (non-clickable) record, else a live processor query.
    async fn resolve_payment_link(
        &self,
        newest_unpaid_rest: Option<&PaymentRecord>,
        records: &[PaymentRecord],
        deal_expired: &[&NormalizedSession],
    ) -> AppResult<Option<String>> {
        if let Some(url) = newest_unpaid_rest.and_then(|r| r.session_url.clone()) {
            return Ok(Some(url));
        }

        // Ledger record of one of the expired sessions; the link is expired
        // but still identifies what the reminder is about
        let expired_record_url = deal_expired.iter().find_map(|session| {
            records
                .iter()
                .find(|r| r.session_id == session.session_id)
                .and_then(|r| r.session_url.clone())
        });
        if let Some(url) = expired_record_url {
            return Ok(Some(url));
        }

        for session in deal_expired {
            if session.session_id.starts_with(&self.config.test_session_prefix) {
                continue;
            }
            if let Some(remote) = self.processor.retrieve_session(&session.session_id).await? {
                if let Some(url) = remote.url {
                    return Ok(Some(url));
                }
            }
        }

        Ok(None)
    }

    /// Send one reminder per deal owing an overdue second instalment.
    pub async fn process_all_reminders(
        &self,
        trigger: TriggerSource,
    ) -> AppResult<ReminderRunSummary> {
        let run_id = Uuid::new_v4();
        self.dedup.clear_run_cache();
        info!("🔄 Reminder run {} starting", run_id);

        let scan = self.find_reminder_tasks().await?;
        let mut summary = ReminderRunSummary {
            run_id,
            total_found: scan.total_found,
            sent: 0,
            skipped: scan.skipped,
            errors: scan.errors,
        };

        for task in scan.tasks {
            let deal_id = task.deal.id;
            match self.dispatch_reminder(&task, trigger, run_id).await {
                Ok(Outcome::Acted { .. }) => summary.sent += 1,
                Ok(Outcome::Skipped(reason)) => {
                    summary.skipped.push(SkippedDeal { deal_id, reason })
                }
                Err(e) => {
                    error!("❌ Deal {}: reminder failed: {}", deal_id, e);
                    summary.errors.push(FailedDeal {
                        deal_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "✓ Reminder run {} done: {} found, {} sent, {} skipped, {} errors",
            run_id,
            summary.total_found,
            summary.sent,
            summary.skipped.len(),
            summary.errors.len()
        );
        Ok(summary)
    }

    async fn dispatch_reminder(
        &self,
        task: &ReminderTask,
        trigger: TriggerSource,
        run_id: Uuid,
    ) -> AppResult<Outcome> {
        let now = Utc::now();
        let deal_id = task.deal.id;

        // Close the webhook-lag race: re-read the ledger sum AND the live
        // session right before sending
        let records = self.payments.list_for_deal(deal_id).await?;
        if self.analyzer.second_instalment_paid(&task.deal, &records) {
            return Ok(Outcome::Skipped(SkipReason::SecondPaymentAlreadyPaid));
        }
        if let Some(session_id) = &task.latest_rest_session_id {
            if !session_id.starts_with(&self.config.test_session_prefix) {
                if let Some(remote) = self.processor.retrieve_session(session_id).await? {
                    if remote.payment_status
                        == crate::checkout::models::SessionPaymentStatus::Paid
                    {
                        return Ok(Outcome::Skipped(SkipReason::SecondPaymentAlreadyPaid));
                    }
                }
            }
        }

        // A deal can be lost between enumeration and dispatch
        let deal = self
            .crm
            .get_deal(deal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("deal {} not found in CRM", deal_id)))?;
        if let Some(reason) = inactive_deal_reason(&deal) {
            return Ok(Outcome::Skipped(reason));
        }

        let recipient = self.resolve_recipient(deal_id).await?;
        let message = format!(
            "Friendly reminder: the remaining instalment for \"{}\" is still unpaid. \
             You can pay it here: {}",
            deal.title, task.payment_link
        );
        self.notifier.send(&recipient, &message).await?;

        self.dedup
            .record_action(IdempotencyRecord {
                deal_id,
                due_date: task.due_date,
                action: ActionType::ReminderSent,
                session_id: task.latest_rest_session_id.clone(),
                trigger,
                run_id,
                created_at: now,
            })
            .await?;

        info!("📨 Deal {}: reminder sent", deal_id);
        Ok(Outcome::Acted { notify_error: None })
    }

    // ========== ENTRY POINT C: RECREATE EXPIRED SESSIONS ==========

    /// Elect, per deal and per instalment role, the single most recently
    /// expired session as the recreation candidate.
    pub async fn find_expired_session_tasks(&self) -> AppResult<RecreationScan> {
        let expired = self.scanner.find_expired_unpaid_sessions().await?;

        let mut by_deal: BTreeMap<i64, Vec<NormalizedSession>> = BTreeMap::new();
        for session in expired {
            by_deal.entry(session.deal_id).or_default().push(session);
        }

        let mut scan = RecreationScan {
            total_found: by_deal.len(),
            tasks: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
        };

        for (deal_id, sessions) in by_deal {
            let deal = match self.crm.get_deal(deal_id).await {
                Ok(Some(deal)) => deal,
                Ok(None) => {
                    scan.errors.push(FailedDeal {
                        deal_id,
                        error: format!("deal {} not found in CRM", deal_id),
                    });
                    continue;
                }
                Err(e) => {
                    error!("❌ Deal {}: CRM lookup failed: {}", deal_id, e);
                    scan.errors.push(FailedDeal {
                        deal_id,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if let Some(reason) = inactive_deal_reason(&deal) {
                scan.skipped.push(SkippedDeal { deal_id, reason });
                continue;
            }

            // Multiple stale sessions of one role must not each spawn a
            // recreation; keep the most recently expired per role
            let mut by_role: HashMap<InstalmentRole, NormalizedSession> = HashMap::new();
            for session in sessions {
                let newer = by_role
                    .get(&session.role)
                    .map(|existing| session.expires_at > existing.expires_at)
                    .unwrap_or(true);
                if newer {
                    by_role.insert(session.role, session);
                }
            }

            for session in by_role.into_values() {
                debug!(
                    "Deal {}: expired {} session {} ({} {}, {:?}) elected for recreation",
                    deal_id,
                    session.role.as_str(),
                    session.session_id,
                    session.amount,
                    session.currency,
                    session.schedule
                );
                scan.tasks.push(RecreationTask {
                    deal: deal.clone(),
                    session,
                });
            }
        }

        Ok(scan)
    }

    /// Recreate expired checkout sessions so customers always hold a
    /// payable link.
    pub async fn process_expired_sessions(
        &self,
        _trigger: TriggerSource,
    ) -> AppResult<RecreationSummary> {
        let run_id = Uuid::new_v4();
        self.dedup.clear_run_cache();
        info!("🔄 Expired-session recreation run {} starting", run_id);

        let scan = self.find_expired_session_tasks().await?;
        let mut summary = RecreationSummary {
            run_id,
            total_found: scan.total_found,
            recreated: 0,
            skipped: scan.skipped,
            errors: scan.errors,
        };

        let mut acted: HashSet<i64> = HashSet::new();
        for task in scan.tasks {
            let deal_id = task.deal.id;

            // At most one action per deal per cycle
            if acted.contains(&deal_id) {
                summary.skipped.push(SkippedDeal {
                    deal_id,
                    reason: SkipReason::SessionAlreadyCreated,
                });
                continue;
            }

            match self.recreate_session(&task).await {
                Ok(Outcome::Acted { notify_error }) => {
                    summary.recreated += 1;
                    acted.insert(deal_id);
                    if let Some(message) = notify_error {
                        summary.errors.push(FailedDeal {
                            deal_id,
                            error: message,
                        });
                    }
                }
                Ok(Outcome::Skipped(reason)) => {
                    summary.skipped.push(SkippedDeal { deal_id, reason })
                }
                Err(e) => {
                    error!("❌ Deal {}: session recreation failed: {}", deal_id, e);
                    summary.errors.push(FailedDeal {
                        deal_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "✓ Recreation run {} done: {} found, {} recreated, {} skipped, {} errors",
            run_id,
            summary.total_found,
            summary.recreated,
            summary.skipped.len(),
            summary.errors.len()
        );
        Ok(summary)
    }

    async fn recreate_session(&self, task: &RecreationTask) -> AppResult<Outcome> {
        let now = Utc::now();
        let deal = &task.deal;

        // The local ledger's status column can be stale; only a direct
        // processor probe decides whether an open session already exists
        if let Some(open) = self
            .scanner
            .find_open_session_for_deal(deal.id, self.config.open_session_probe_days)
            .await?
        {
            if open.created > task.session.created {
                return Ok(Outcome::Skipped(SkipReason::NewerSessionExists));
            }
        }

        let records = self.payments.list_for_deal(deal.id).await?;
        if self.analyzer.deal_fully_paid(deal, &records) {
            return Ok(Outcome::Skipped(SkipReason::DealFullyPaid));
        }

        let paid = PaymentStateAnalyzer::paid_sum_in_currency(&records, &deal.currency);
        let current = self.policy.determine_schedule(deal, now);

        // Once the plan has shifted to single, a split-plan session is never
        // blindly recreated; the customer gets one full-balance link instead
        let (role, schedule, amount) =
            if current.plan == PaymentPlan::Single && task.session.role != InstalmentRole::Single {
                (
                    InstalmentRole::Single,
                    ScheduleTag::Single,
                    deal.amount - paid,
                )
            } else {
                match task.session.role {
                    InstalmentRole::Deposit => {
                        (InstalmentRole::Deposit, ScheduleTag::Split, deal.amount / dec!(2))
                    }
                    InstalmentRole::Rest => {
                        (InstalmentRole::Rest, ScheduleTag::Split, deal.amount - paid)
                    }
                    InstalmentRole::Single => {
                        (InstalmentRole::Single, ScheduleTag::Single, deal.amount - paid)
                    }
                }
            };

        let context = CreateSessionContext {
            role,
            schedule,
            instalment_index: if role == InstalmentRole::Rest { 2 } else { 1 },
            custom_amount: Some(amount),
            suppress_notification: true,
        };

        let created = self.processor.create_session(deal, &context).await?;
        info!(
            "♻️ Deal {}: recreated expired session {} as {} ({} {})",
            deal.id,
            task.session.session_id,
            created.session_id,
            created.amount,
            created.currency
        );

        self.payments
            .save(&session_record(deal, &created, role, schedule, now))
            .await?;

        // Recreation carries its own notification, tracked by the new
        // session id; no reminder_sent record is written
        let unpaid_balance = deal.amount - paid;
        let notify_error = match self.resolve_recipient(deal.id).await {
            Ok(recipient) => {
                let message = format!(
                    "The payment link for \"{}\" expired, so we issued a new one. \
                     Outstanding balance: {} {}. Pay here: {}",
                    deal.title, unpaid_balance, deal.currency, created.session_url
                );
                match self.notifier.send(&recipient, &message).await {
                    Ok(()) => None,
                    Err(e) => Some(e.to_string()),
                }
            }
            Err(e) => Some(e.to_string()),
        };
        if let Some(message) = &notify_error {
            warn!("⚠️ Deal {}: session recreated but not announced: {}", deal.id, message);
        }

        Ok(Outcome::Acted { notify_error })
    }

    // ========== SHARED HELPERS ==========

    fn due_date_for(&self, deal: &Deal) -> Option<NaiveDate> {
        deal.expected_close_date
            .as_deref()
            .and_then(|date| self.policy.calculate_second_instalment_due_date(date))
    }

    async fn resolve_recipient(&self, deal_id: i64) -> AppResult<String> {
        let related = self.crm.get_deal_with_related_data(deal_id).await?;
        related
            .and_then(|r| r.person)
            .and_then(|p| p.messenger_id)
            .ok_or_else(|| NotifyError::NoRecipient(deal_id).into())
    }

    async fn send_payment_link(&self, deal: &Deal, created: &CreatedSession) -> AppResult<()> {
        let recipient = self.resolve_recipient(deal.id).await?;
        let message = format!(
            "Hello! The remaining instalment of {} {} for \"{}\" is ready. \
             You can pay securely here: {}",
            created.amount, created.currency, deal.title, created.session_url
        );
        self.notifier.send(&recipient, &message).await?;

        // Best-effort; the link was already delivered in the message body
        if let Err(e) = self
            .notifier
            .update_recipient_metadata(
                &recipient,
                &[("last_payment_link".to_string(), created.session_url.clone())],
            )
            .await
        {
            warn!("⚠️ Deal {}: recipient metadata update failed: {}", deal.id, e);
        }

        Ok(())
    }
}

/// The plan frozen onto the earliest currency-matched paid deposit; `None`
/// when no such deposit exists
fn initial_schedule(deal: &Deal, records: &[PaymentRecord]) -> Option<ScheduleTag> {
    records
        .iter()
        .filter(|r| {
            r.role == InstalmentRole::Deposit && r.is_paid() && r.currency == deal.currency
        })
        .min_by_key(|r| r.created_at)
        .map(|r| r.schedule)
}

fn inactive_deal_reason(deal: &Deal) -> Option<SkipReason> {
    if deal.status == DealStatus::Lost {
        return Some(SkipReason::DealLost);
    }
    if deal.status == DealStatus::Deleted || deal.marked_deleted {
        return Some(SkipReason::DealDeleted);
    }
    if deal.invoicing_delegated {
        return Some(SkipReason::InvoicingDelegated);
    }
    None
}

fn session_record(
    deal: &Deal,
    created: &CreatedSession,
    role: InstalmentRole,
    schedule: ScheduleTag,
    now: DateTime<Utc>,
) -> PaymentRecord {
    PaymentRecord {
        id: Uuid::new_v4(),
        deal_id: deal.id,
        role,
        schedule,
        amount: created.amount,
        currency: created.currency.clone(),
        state: PaymentState::Unpaid,
        session_status: SessionState::Open,
        session_id: created.session_id.clone(),
        session_url: Some(created.session_url.clone()),
        created_at: now,
    }
}
