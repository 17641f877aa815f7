use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::models::{InstalmentRole, ScheduleTag};

/// Session status on the processor side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Complete,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::Complete => "complete",
            SessionStatus::Expired => "expired",
        }
    }
}

/// Whether the processor has collected the money for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPaymentStatus {
    Paid,
    Unpaid,
}

/// Free-form metadata the engine stamps on every session it creates, and
/// reads back when reconciling sessions created out-of-band.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub deal_id: Option<String>,
    pub instalment_role: Option<String>,
    pub schedule: Option<String>,
}

impl SessionMetadata {
    pub fn deal_id(&self) -> Option<i64> {
        self.deal_id.as_deref().and_then(|v| v.parse().ok())
    }

    pub fn role(&self) -> Option<InstalmentRole> {
        self.instalment_role.as_deref().and_then(InstalmentRole::parse)
    }

    pub fn schedule(&self) -> Option<ScheduleTag> {
        self.schedule.as_deref().and_then(ScheduleTag::parse)
    }
}

/// A checkout session as the processor reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub status: SessionStatus,
    pub payment_status: SessionPaymentStatus,

    #[serde(with = "rust_decimal::serde::float")]
    pub amount_total: Decimal,
    pub currency: String,

    pub url: Option<String>,
    pub customer_email: Option<String>,

    pub created: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    pub metadata: SessionMetadata,
}

impl CheckoutSession {
    pub fn is_open_unpaid(&self) -> bool {
        self.status == SessionStatus::Open && self.payment_status == SessionPaymentStatus::Unpaid
    }
}

/// Filter for the processor's paginated session listing
#[derive(Debug, Clone, Default)]
pub struct SessionListFilter {
    pub status: Option<SessionStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub limit: u32,
    /// Cursor: list sessions after this session id
    pub starting_after: Option<String>,
}

/// One page of the processor's session listing
#[derive(Debug, Clone)]
pub struct SessionPage {
    pub sessions: Vec<CheckoutSession>,
    pub has_more: bool,
}

/// Context for creating a new checkout session
#[derive(Debug, Clone)]
pub struct CreateSessionContext {
    pub role: InstalmentRole,
    pub schedule: ScheduleTag,
    pub instalment_index: u8,
    /// Overrides the deal amount; used for the rest instalment and for
    /// remaining-balance sessions
    pub custom_amount: Option<Decimal>,
    /// Suppress the processor's own email to the customer; the engine sends
    /// its own notification
    pub suppress_notification: bool,
}

/// Result of a successful session creation
#[derive(Debug, Clone, Serialize)]
pub struct CreatedSession {
    pub session_id: String,
    pub session_url: String,

    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
}
