use serde::Serialize;
use uuid::Uuid;

/// Why a deal was passed over this cycle.
///
/// A skip is a recorded decision, not an error; the deal is re-evaluated on
/// the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InitialPlanNotSplit,
    DealLost,
    DealDeleted,
    InvoicingDelegated,
    NoDueDate,
    DueDateNotReached,
    FirstInstalmentUnpaid,
    DealFullyPaid,
    SecondPaymentAlreadyPaid,
    SessionAlreadyCreated,
    ActiveSessionExists,
    ReminderAlreadySent,
    FreshSessionExists,
    NoPaymentLink,
    NewerSessionExists,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InitialPlanNotSplit => "initial_plan_not_split",
            SkipReason::DealLost => "deal_lost",
            SkipReason::DealDeleted => "deal_deleted",
            SkipReason::InvoicingDelegated => "invoicing_delegated",
            SkipReason::NoDueDate => "no_due_date",
            SkipReason::DueDateNotReached => "due_date_not_reached",
            SkipReason::FirstInstalmentUnpaid => "first_instalment_unpaid",
            SkipReason::DealFullyPaid => "deal_fully_paid",
            SkipReason::SecondPaymentAlreadyPaid => "second_payment_already_paid",
            SkipReason::SessionAlreadyCreated => "session_already_created",
            SkipReason::ActiveSessionExists => "active_session_exists",
            SkipReason::ReminderAlreadySent => "reminder_already_sent",
            SkipReason::FreshSessionExists => "fresh_session_exists",
            SkipReason::NoPaymentLink => "no_payment_link",
            SkipReason::NewerSessionExists => "newer_session_exists",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedDeal {
    pub deal_id: i64,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedDeal {
    pub deal_id: i64,
    pub error: String,
}

/// Result of one second-instalment session-creation run
#[derive(Debug, Serialize)]
pub struct SessionCreationSummary {
    pub run_id: Uuid,
    pub total_found: usize,
    pub created: usize,
    pub skipped: Vec<SkippedDeal>,
    pub errors: Vec<FailedDeal>,
}

/// Result of one reminder run
#[derive(Debug, Serialize)]
pub struct ReminderRunSummary {
    pub run_id: Uuid,
    pub total_found: usize,
    pub sent: usize,
    pub skipped: Vec<SkippedDeal>,
    pub errors: Vec<FailedDeal>,
}

/// Result of one expired-session recreation run
#[derive(Debug, Serialize)]
pub struct RecreationSummary {
    pub run_id: Uuid,
    pub total_found: usize,
    pub recreated: usize,
    pub skipped: Vec<SkippedDeal>,
    pub errors: Vec<FailedDeal>,
}
