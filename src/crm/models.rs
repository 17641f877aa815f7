use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Deal lifecycle status as reported by the CRM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealStatus {
    Open,
    Won,
    Lost,
    Deleted,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Open => "open",
            DealStatus::Won => "won",
            DealStatus::Lost => "lost",
            DealStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(DealStatus::Open),
            "won" => Some(DealStatus::Won),
            "lost" => Some(DealStatus::Lost),
            "deleted" => Some(DealStatus::Deleted),
            _ => None,
        }
    }
}

/// Deal entity - externally owned, read-mostly.
///
/// `expected_close_date` stays a raw `YYYY-MM-DD` string; the schedule policy
/// owns parsing so an unparsable date degrades to "no due date" in exactly
/// one place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: i64,
    pub title: String,

    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,

    pub expected_close_date: Option<String>,
    pub status: DealStatus,
    pub lost_reason: Option<String>,

    pub person_id: Option<i64>,

    // Custom classification flags
    /// Invoicing for this deal is delegated to the payment processor
    pub invoicing_delegated: bool,
    /// Deal should be treated as deleted for invoicing purposes
    pub marked_deleted: bool,
}

/// Person attached to a deal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Recipient identifier on the notification channel
    pub messenger_id: Option<String>,
}

/// Organization attached to a deal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
}

/// Deal plus its related CRM entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealWithRelated {
    pub deal: Deal,
    pub person: Option<Person>,
    pub organization: Option<Organization>,
}

/// Filter for listing deals
#[derive(Debug, Clone, Default)]
pub struct DealFilter {
    pub status: Option<DealStatus>,
}
