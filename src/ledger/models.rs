use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical position of a payment in a plan.
///
/// The wire strings `second` and `final` are legacy aliases of `rest`,
/// `first` of `deposit`; they normalize on parse and never round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstalmentRole {
    Deposit,
    Rest,
    Single,
}

impl InstalmentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstalmentRole::Deposit => "deposit",
            InstalmentRole::Rest => "rest",
            InstalmentRole::Single => "single",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" | "first" => Some(InstalmentRole::Deposit),
            "rest" | "second" | "final" => Some(InstalmentRole::Rest),
            "single" | "full" => Some(InstalmentRole::Single),
            _ => None,
        }
    }
}

/// The payment plan an instalment was created under.
///
/// On a paid deposit record this is the frozen, initial plan - authoritative
/// for every later second-instalment decision, regardless of what the policy
/// would compute from the deal's present close date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleTag {
    Split,
    Single,
}

impl ScheduleTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleTag::Split => "split",
            ScheduleTag::Single => "single",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "split" => Some(ScheduleTag::Split),
            "single" => Some(ScheduleTag::Single),
            _ => None,
        }
    }
}

/// Has the money arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Unpaid,
    Paid,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Unpaid => "unpaid",
            PaymentState::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(PaymentState::Unpaid),
            "paid" => Some(PaymentState::Paid),
            _ => None,
        }
    }
}

/// Coarser session lifecycle mirrored from the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Open,
    Complete,
    Processed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::Complete => "complete",
            SessionState::Processed => "processed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(SessionState::Open),
            "complete" => Some(SessionState::Complete),
            "processed" => Some(SessionState::Processed),
            _ => None,
        }
    }
}

/// Locally persisted fact about one checkout session or manual payment.
///
/// Never deleted, only superseded. Duplicate paid rows for one role are
/// tolerated input: consumers sum amounts instead of trusting count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub deal_id: i64,
    pub role: InstalmentRole,
    pub schedule: ScheduleTag,

    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// Currency of the session itself, which can differ from the deal's
    pub currency: String,

    pub state: PaymentState,
    pub session_status: SessionState,

    pub session_id: String,
    pub session_url: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn is_paid(&self) -> bool {
        self.state == PaymentState::Paid
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Filter for listing payment records across deals
#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub role: Option<InstalmentRole>,
    pub state: Option<PaymentState>,
    pub schedule: Option<ScheduleTag>,
}
