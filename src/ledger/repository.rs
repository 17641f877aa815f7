use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::{AppError, AppResult};
use crate::ledger::models::{
    InstalmentRole, PaymentFilter, PaymentRecord, PaymentState, ScheduleTag, SessionState,
};
use crate::ledger::PaymentStore;

/// Postgres-backed payment store
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a record from a database row; enum columns persist as TEXT
    fn from_row(row: &PgRow) -> AppResult<PaymentRecord> {
        let role_str: String = row.try_get("role")?;
        let role = InstalmentRole::parse(&role_str)
            .ok_or_else(|| AppError::InvalidInput(format!("unknown instalment role {:?}", role_str)))?;

        let schedule_str: String = row.try_get("schedule")?;
        let schedule = ScheduleTag::parse(&schedule_str)
            .ok_or_else(|| AppError::InvalidInput(format!("unknown schedule tag {:?}", schedule_str)))?;

        let state_str: String = row.try_get("state")?;
        let state = PaymentState::parse(&state_str)
            .ok_or_else(|| AppError::InvalidInput(format!("unknown payment state {:?}", state_str)))?;

        let session_status_str: String = row.try_get("session_status")?;
        let session_status = SessionState::parse(&session_status_str).ok_or_else(|| {
            AppError::InvalidInput(format!("unknown session status {:?}", session_status_str))
        })?;

        Ok(PaymentRecord {
            id: row.try_get("id")?,
            deal_id: row.try_get("deal_id")?,
            role,
            schedule,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            state,
            session_status,
            session_id: row.try_get("session_id")?,
            session_url: row.try_get("session_url")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn list_for_deal(&self, deal_id: i64) -> AppResult<Vec<PaymentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, deal_id, role, schedule, amount, currency, state,
                   session_status, session_id, session_url, created_at
            FROM payments
            WHERE deal_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(deal_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_all(&self, filter: PaymentFilter) -> AppResult<Vec<PaymentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, deal_id, role, schedule, amount, currency, state,
                   session_status, session_id, session_url, created_at
            FROM payments
            WHERE ($1::TEXT IS NULL OR role = $1)
              AND ($2::TEXT IS NULL OR state = $2)
              AND ($3::TEXT IS NULL OR schedule = $3)
            ORDER BY created_at ASC
            "#,
        )
        .bind(filter.role.map(|r| r.as_str()))
        .bind(filter.state.map(|s| s.as_str()))
        .bind(filter.schedule.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn save(&self, record: &PaymentRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, deal_id, role, schedule, amount, currency, state,
                session_status, session_id, session_url, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(record.deal_id)
        .bind(record.role.as_str())
        .bind(record.schedule.as_str())
        .bind(record.amount)
        .bind(&record.currency)
        .bind(record.state.as_str())
        .bind(record.session_status.as_str())
        .bind(&record.session_id)
        .bind(&record.session_url)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
