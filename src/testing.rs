//! In-memory collaborator doubles for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Months, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::checkout::models::{
    CheckoutSession, CreateSessionContext, CreatedSession, SessionListFilter, SessionMetadata,
    SessionPage, SessionPaymentStatus, SessionStatus,
};
use crate::checkout::SessionProcessor;
use crate::crm::models::{Deal, DealFilter, DealStatus, DealWithRelated, Person};
use crate::crm::DealSource;
use crate::error::{AppError, AppResult};
use crate::ledger::models::{
    InstalmentRole, PaymentFilter, PaymentRecord, PaymentState, ScheduleTag, SessionState,
};
use crate::ledger::PaymentStore;
use crate::reconcile::idempotency::{IdempotencyRecord, IdempotencyStore, InsertOutcome};

// ========== BUILDERS ==========

/// Today as the schedule policy at UTC+1 sees it
pub fn business_today() -> chrono::NaiveDate {
    (Utc::now() + Duration::hours(1)).date_naive()
}

/// Close date string that puts the second-instalment due date at exactly
/// today
pub fn close_date_due_today() -> String {
    business_today()
        .checked_add_months(Months::new(1))
        .unwrap()
        .format("%Y-%m-%d")
        .to_string()
}

pub fn deal(id: i64, amount: Decimal, currency: &str, close_in_days: Option<i64>) -> Deal {
    Deal {
        id,
        title: format!("Deal {}", id),
        amount,
        currency: currency.to_string(),
        expected_close_date: close_in_days
            .map(|days| (business_today() + Duration::days(days)).format("%Y-%m-%d").to_string()),
        status: DealStatus::Open,
        lost_reason: None,
        person_id: Some(id * 10),
        invoicing_delegated: false,
        marked_deleted: false,
    }
}

pub fn paid_record(
    deal_id: i64,
    role: InstalmentRole,
    amount: Decimal,
    currency: &str,
    schedule: ScheduleTag,
    days_ago: i64,
) -> PaymentRecord {
    PaymentRecord {
        id: Uuid::new_v4(),
        deal_id,
        role,
        schedule,
        amount,
        currency: currency.to_string(),
        state: PaymentState::Paid,
        session_status: SessionState::Complete,
        session_id: format!("cs_done_{}", Uuid::new_v4().simple()),
        session_url: None,
        created_at: Utc::now() - Duration::days(days_ago),
    }
}

pub fn unpaid_record(
    deal_id: i64,
    role: InstalmentRole,
    amount: Decimal,
    currency: &str,
    schedule: ScheduleTag,
    days_ago: i64,
) -> PaymentRecord {
    let session_id = format!("cs_open_{}", Uuid::new_v4().simple());
    PaymentRecord {
        id: Uuid::new_v4(),
        deal_id,
        role,
        schedule,
        amount,
        currency: currency.to_string(),
        state: PaymentState::Unpaid,
        session_status: SessionState::Open,
        session_url: Some(format!("https://pay.example/{}", session_id)),
        session_id,
        created_at: Utc::now() - Duration::days(days_ago),
    }
}

pub fn expired_session(
    id: &str,
    deal_id: i64,
    role: &str,
    amount: Decimal,
    expired_days_ago: i64,
) -> CheckoutSession {
    let expires_at = Utc::now() - Duration::days(expired_days_ago);
    CheckoutSession {
        id: id.to_string(),
        status: SessionStatus::Expired,
        payment_status: SessionPaymentStatus::Unpaid,
        amount_total: amount,
        currency: "PLN".to_string(),
        // Expired links stop being clickable; the processor drops the url
        url: None,
        customer_email: Some("customer@example.com".to_string()),
        created: expires_at - Duration::days(1),
        expires_at,
        metadata: SessionMetadata {
            deal_id: Some(deal_id.to_string()),
            instalment_role: Some(role.to_string()),
            schedule: Some("split".to_string()),
        },
    }
}

pub fn open_session(id: &str, deal_id: i64, role: &str, amount: Decimal) -> CheckoutSession {
    CheckoutSession {
        id: id.to_string(),
        status: SessionStatus::Open,
        payment_status: SessionPaymentStatus::Unpaid,
        amount_total: amount,
        currency: "PLN".to_string(),
        url: Some(format!("https://pay.example/{}", id)),
        customer_email: Some("customer@example.com".to_string()),
        created: Utc::now() - Duration::hours(1),
        expires_at: Utc::now() + Duration::hours(23),
        metadata: SessionMetadata {
            deal_id: Some(deal_id.to_string()),
            instalment_role: Some(role.to_string()),
            schedule: Some("split".to_string()),
        },
    }
}

// ========== CRM ==========

pub struct FakeCrm {
    deals: RwLock<HashMap<i64, Deal>>,
    persons: RwLock<HashMap<i64, Person>>,
}

impl FakeCrm {
    pub fn new() -> Self {
        Self {
            deals: RwLock::new(HashMap::new()),
            persons: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a deal along with a reachable messenger recipient
    pub fn insert_deal(&self, deal: Deal) {
        self.persons.write().insert(
            deal.id,
            Person {
                id: deal.person_id.unwrap_or(deal.id * 10),
                name: format!("Customer {}", deal.id),
                email: Some(format!("customer{}@example.com", deal.id)),
                phone: None,
                messenger_id: Some(format!("m-{}", deal.id)),
            },
        );
        self.deals.write().insert(deal.id, deal);
    }

    /// Insert a deal whose person has no messenger recipient
    pub fn insert_deal_no_recipient(&self, deal: Deal) {
        self.deals.write().insert(deal.id, deal);
    }
}

#[async_trait]
impl DealSource for FakeCrm {
    async fn get_deal(&self, id: i64) -> AppResult<Option<Deal>> {
        Ok(self.deals.read().get(&id).cloned())
    }

    async fn get_deal_with_related_data(&self, id: i64) -> AppResult<Option<DealWithRelated>> {
        let Some(deal) = self.deals.read().get(&id).cloned() else {
            return Ok(None);
        };
        Ok(Some(DealWithRelated {
            person: self.persons.read().get(&id).cloned(),
            organization: None,
            deal,
        }))
    }

    async fn list_deals(&self, filter: DealFilter) -> AppResult<Vec<Deal>> {
        Ok(self
            .deals
            .read()
            .values()
            .filter(|d| filter.status.map(|s| d.status == s).unwrap_or(true))
            .cloned()
            .collect())
    }
}

// ========== CHECKOUT PROCESSOR ==========

#[derive(Debug, Clone)]
pub struct CreatedRequest {
    pub deal_id: i64,
    pub role: InstalmentRole,
    pub schedule: ScheduleTag,
    pub amount: Decimal,
    pub instalment_index: u8,
}

pub struct FakeProcessor {
    sessions: RwLock<Vec<CheckoutSession>>,
    created: RwLock<Vec<CreatedRequest>>,
    next_id: AtomicU64,
    fail_create: RwLock<bool>,
}

impl FakeProcessor {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
            created: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            fail_create: RwLock::new(false),
        }
    }

    pub fn push_session(&self, session: CheckoutSession) {
        self.sessions.write().push(session);
    }

    pub fn created_requests(&self) -> Vec<CreatedRequest> {
        self.created.read().clone()
    }

    pub fn fail_next_creates(&self) {
        *self.fail_create.write() = true;
    }
}

#[async_trait]
impl SessionProcessor for FakeProcessor {
    async fn list_sessions(&self, filter: SessionListFilter) -> AppResult<SessionPage> {
        let sessions = self.sessions.read();
        let filtered: Vec<CheckoutSession> = sessions
            .iter()
            .filter(|s| filter.status.map(|st| s.status == st).unwrap_or(true))
            .filter(|s| {
                filter
                    .created_after
                    .map(|after| s.created >= after)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        let start = match &filter.starting_after {
            Some(cursor) => filtered
                .iter()
                .position(|s| &s.id == cursor)
                .map(|i| i + 1)
                .unwrap_or(filtered.len()),
            None => 0,
        };
        let limit = if filter.limit == 0 { 100 } else { filter.limit as usize };
        let page: Vec<CheckoutSession> = filtered.iter().skip(start).take(limit).cloned().collect();
        let has_more = start + page.len() < filtered.len();

        Ok(SessionPage {
            sessions: page,
            has_more,
        })
    }

    async fn retrieve_session(&self, id: &str) -> AppResult<Option<CheckoutSession>> {
        Ok(self.sessions.read().iter().find(|s| s.id == id).cloned())
    }

    async fn create_session(
        &self,
        deal: &Deal,
        context: &CreateSessionContext,
    ) -> AppResult<CreatedSession> {
        if *self.fail_create.read() {
            return Err(AppError::ExternalError("simulated processor outage".to_string()));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session_id = format!("cs_live_{}", n);
        let amount = context.custom_amount.unwrap_or(deal.amount);

        self.created.write().push(CreatedRequest {
            deal_id: deal.id,
            role: context.role,
            schedule: context.schedule,
            amount,
            instalment_index: context.instalment_index,
        });

        let session = open_session(&session_id, deal.id, context.role.as_str(), amount);
        self.sessions.write().push(session);

        Ok(CreatedSession {
            session_url: format!("https://pay.example/{}", session_id),
            session_id,
            amount,
            currency: deal.currency.clone(),
        })
    }
}

// ========== LEDGER ==========

pub struct MemoryPaymentStore {
    records: RwLock<Vec<PaymentRecord>>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn push(&self, record: PaymentRecord) {
        self.records.write().push(record);
    }

    pub fn all(&self) -> Vec<PaymentRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn list_for_deal(&self, deal_id: i64) -> AppResult<Vec<PaymentRecord>> {
        let mut records: Vec<PaymentRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| r.deal_id == deal_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn list_all(&self, filter: PaymentFilter) -> AppResult<Vec<PaymentRecord>> {
        let mut records: Vec<PaymentRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| filter.role.map(|v| r.role == v).unwrap_or(true))
            .filter(|r| filter.state.map(|v| r.state == v).unwrap_or(true))
            .filter(|r| filter.schedule.map(|v| r.schedule == v).unwrap_or(true))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn save(&self, record: &PaymentRecord) -> AppResult<()> {
        self.records.write().push(record.clone());
        Ok(())
    }
}

// ========== IDEMPOTENCY ==========

pub struct MemoryIdempotencyStore {
    records: RwLock<Vec<IdempotencyRecord>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn all(&self) -> Vec<IdempotencyRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn insert(&self, record: &IdempotencyRecord) -> AppResult<InsertOutcome> {
        let mut records = self.records.write();
        let duplicate = records.iter().any(|r| {
            r.deal_id == record.deal_id
                && r.due_date == record.due_date
                && r.action == record.action
        });
        if duplicate {
            return Ok(InsertOutcome::Duplicate);
        }
        records.push(record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn query(
        &self,
        deal_id: i64,
        due_date: chrono::NaiveDate,
    ) -> AppResult<Vec<IdempotencyRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.deal_id == deal_id && r.due_date == due_date)
            .cloned()
            .collect())
    }
}

// ========== NOTIFICATIONS ==========

pub struct FakeNotifier {
    sent: RwLock<Vec<(String, String)>>,
    metadata_updates: RwLock<Vec<(String, Vec<(String, String)>)>>,
}

impl FakeNotifier {
    pub fn new() -> Self {
        Self {
            sent: RwLock::new(Vec::new()),
            metadata_updates: RwLock::new(Vec::new()),
        }
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.read().clone()
    }

    pub fn metadata_updates(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.metadata_updates.read().clone()
    }
}

#[async_trait]
impl crate::notify::NotificationChannel for FakeNotifier {
    async fn send(&self, recipient_id: &str, message: &str) -> AppResult<()> {
        self.sent
            .write()
            .push((recipient_id.to_string(), message.to_string()));
        Ok(())
    }

    async fn update_recipient_metadata(
        &self,
        recipient_id: &str,
        fields: &[(String, String)],
    ) -> AppResult<()> {
        self.metadata_updates
            .write()
            .push((recipient_id.to_string(), fields.to_vec()));
        Ok(())
    }
}
