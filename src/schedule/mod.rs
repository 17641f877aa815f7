use chrono::{DateTime, FixedOffset, Months, NaiveDate, Utc};
use serde::Serialize;

use crate::crm::models::Deal;

/// The payment plan computed for a deal *now*.
///
/// Distinct on purpose from `ledger::models::ScheduleTag`, which is the plan
/// frozen onto a record when it was created. Decisions about whether a second
/// instalment is owed read the tag; decisions about timing read this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentPlan {
    Split,
    Single,
}

/// Outcome of classifying a deal against the schedule policy
#[derive(Debug, Clone)]
pub struct ScheduleDecision {
    pub plan: PaymentPlan,
    pub second_instalment_due_date: Option<NaiveDate>,
    pub days_until_due: Option<i64>,
}

/// Pure plan classification and due-date math.
///
/// Everything here works on calendar days in the business timezone; instants
/// never leak past this module.
#[derive(Debug, Clone)]
pub struct SchedulePolicy {
    offset: FixedOffset,
    split_threshold_days: i64,
}

impl SchedulePolicy {
    pub fn new(tz_offset_hours: i32, split_threshold_days: i64) -> Self {
        let offset = FixedOffset::east_opt(tz_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        Self {
            offset,
            split_threshold_days,
        }
    }

    /// Today as a calendar day in the business timezone
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// Classify a deal into a plan and compute the second-instalment due date.
    ///
    /// Split applies when the close date is far enough out that collecting a
    /// deposit first makes sense; otherwise the whole amount is due at once.
    pub fn determine_schedule(&self, deal: &Deal, now: DateTime<Utc>) -> ScheduleDecision {
        let today = self.today(now);

        let close_date = deal
            .expected_close_date
            .as_deref()
            .and_then(parse_calendar_date);

        let Some(close_date) = close_date else {
            return ScheduleDecision {
                plan: PaymentPlan::Single,
                second_instalment_due_date: None,
                days_until_due: None,
            };
        };

        let days_until_due = (close_date - today).num_days();

        if days_until_due >= self.split_threshold_days {
            ScheduleDecision {
                plan: PaymentPlan::Split,
                second_instalment_due_date: due_date_from_close(close_date),
                days_until_due: Some(days_until_due),
            }
        } else {
            ScheduleDecision {
                plan: PaymentPlan::Single,
                second_instalment_due_date: None,
                days_until_due: Some(days_until_due),
            }
        }
    }

    /// Completion date minus one calendar month; `None` on unparsable input
    pub fn calculate_second_instalment_due_date(&self, completion_date: &str) -> Option<NaiveDate> {
        parse_calendar_date(completion_date).and_then(due_date_from_close)
    }

    /// Calendar-day comparison, never instant comparison. A due date equal to
    /// today counts as reached; this matters near midnight boundaries.
    pub fn is_due_date_reached(&self, due_date: NaiveDate, now: DateTime<Utc>) -> bool {
        due_date <= self.today(now)
    }
}

fn parse_calendar_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn due_date_from_close(close_date: NaiveDate) -> Option<NaiveDate> {
    close_date.checked_sub_months(Months::new(1))
}
