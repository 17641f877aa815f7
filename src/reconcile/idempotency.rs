use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sqlx::PgPool;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// What kind of side effect a logical event produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SessionCreated,
    ReminderSent,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SessionCreated => "session_created",
            ActionType::ReminderSent => "reminder_sent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session_created" => Some(ActionType::SessionCreated),
            "reminder_sent" => Some(ActionType::ReminderSent),
            _ => None,
        }
    }
}

/// Where a run was started from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Cron,
    Manual,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Cron => "cron",
            TriggerSource::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cron" => Some(TriggerSource::Cron),
            "manual" => Some(TriggerSource::Manual),
            _ => None,
        }
    }
}

/// Durable marker: this logical event (deal, due date) already produced this
/// action. Never updated or deleted.
#[derive(Debug, Clone, Serialize)]
pub struct IdempotencyRecord {
    pub deal_id: i64,
    /// Calendar-day granularity; the dedup key ignores time of day
    pub due_date: NaiveDate,
    pub action: ActionType,
    pub session_id: Option<String>,
    pub trigger: TriggerSource,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Result of a durable insert attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Unique-constraint hit: the work was already recorded, most likely by
    /// a concurrent or earlier run
    Duplicate,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn insert(&self, record: &IdempotencyRecord) -> AppResult<InsertOutcome>;

    async fn query(&self, deal_id: i64, due_date: NaiveDate) -> AppResult<Vec<IdempotencyRecord>>;
}

/// Batch-scoped cache over the durable store.
///
/// The cache covers intra-run repetition; the store covers cross-run
/// repetition and restarts. The cache is never the only gate.
pub struct IdempotencyLog {
    store: Arc<dyn IdempotencyStore>,
    cache: RwLock<HashSet<(i64, NaiveDate, ActionType)>>,
}

impl IdempotencyLog {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashSet::new()),
        }
    }

    /// Called at the top of every engine entry point; the cache lives for
    /// one batch only
    pub fn clear_run_cache(&self) {
        self.cache.write().clear();
    }

    pub async fn was_action_taken(
        &self,
        deal_id: i64,
        due_date: NaiveDate,
        action: ActionType,
    ) -> AppResult<bool> {
        if self.cache.read().contains(&(deal_id, due_date, action)) {
            return Ok(true);
        }

        let hit = self
            .store
            .query(deal_id, due_date)
            .await?
            .iter()
            .any(|r| r.action == action);

        if hit {
            self.cache.write().insert((deal_id, due_date, action));
        }
        Ok(hit)
    }

    pub async fn record_action(&self, record: IdempotencyRecord) -> AppResult<()> {
        let outcome = self.store.insert(&record).await?;
        if outcome == InsertOutcome::Duplicate {
            // Race with another run; the work is done either way
            debug!(
                "Idempotency record for deal {} / {} / {} already present",
                record.deal_id,
                record.due_date,
                record.action.as_str()
            );
        }
        self.cache
            .write()
            .insert((record.deal_id, record.due_date, record.action));
        Ok(())
    }
}

/// Postgres-backed idempotency store.
///
/// The unique constraint on (deal_id, due_date, action) doubles as the mutex
/// between overlapping runs.
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn insert(&self, record: &IdempotencyRecord) -> AppResult<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO reconcile_actions (
                id, deal_id, due_date, action, session_id, trigger_source, run_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (deal_id, due_date, action) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.deal_id)
        .bind(record.due_date)
        .bind(record.action.as_str())
        .bind(&record.session_id)
        .bind(record.trigger.as_str())
        .bind(record.run_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn query(&self, deal_id: i64, due_date: NaiveDate) -> AppResult<Vec<IdempotencyRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT deal_id, due_date, action, session_id, trigger_source, run_id, created_at
            FROM reconcile_actions
            WHERE deal_id = $1 AND due_date = $2
            "#,
        )
        .bind(deal_id)
        .bind(due_date)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let action_str: String = row.try_get("action")?;
                let action = ActionType::parse(&action_str).ok_or_else(|| {
                    AppError::InvalidInput(format!("unknown action type {:?}", action_str))
                })?;
                let trigger_str: String = row.try_get("trigger_source")?;
                let trigger = TriggerSource::parse(&trigger_str).unwrap_or(TriggerSource::Manual);

                Ok(IdempotencyRecord {
                    deal_id: row.try_get("deal_id")?,
                    due_date: row.try_get("due_date")?,
                    action,
                    session_id: row.try_get("session_id")?,
                    trigger,
                    run_id: row.try_get("run_id")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
