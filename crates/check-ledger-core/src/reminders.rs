//! Local reminder planning.
//!
//! Produces the list of reminder instants for a record set. Delivering them
//! (timers, notifications) is the caller's job.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{format_canonical_date, Check, CheckId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReminderLead {
    ThreeDaysBefore,
    OneDayBefore,
    DueDay,
}

impl ReminderLead {
    pub const ALL: [Self; 3] = [Self::ThreeDaysBefore, Self::OneDayBefore, Self::DueDay];

    #[must_use]
    pub fn days_before(self) -> i64 {
        match self {
            Self::ThreeDaysBefore => 3,
            Self::OneDayBefore => 1,
            Self::DueDay => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reminder {
    pub check_id: CheckId,
    pub check_number: String,
    /// `None` when the stored amount is not numeric.
    pub amount: Option<f64>,
    pub due_date: String,
    pub lead: ReminderLead,
    #[serde(with = "time::serde::rfc3339")]
    pub fire_at: OffsetDateTime,
}

/// Plan reminders 3 days before, 1 day before, and on each due date (midnight
/// UTC). Only reminders strictly after `now` are kept; records without a
/// parseable due date get none.
#[must_use]
pub fn plan_reminders(checks: &[Check], now: OffsetDateTime) -> Vec<Reminder> {
    let mut reminders = Vec::new();

    for check in checks {
        let Some(due) = check.due_on() else {
            continue;
        };
        let due_at = due.midnight().assume_utc();

        for lead in ReminderLead::ALL {
            let fire_at = due_at - Duration::days(lead.days_before());
            if fire_at > now {
                reminders.push(Reminder {
                    check_id: check.id.clone(),
                    check_number: check.check_number.clone(),
                    amount: check.amount.value(),
                    due_date: format_canonical_date(due),
                    lead,
                    fire_at,
                });
            }
        }
    }

    reminders.sort_by(|lhs, rhs| {
        lhs.fire_at.cmp(&rhs.fire_at).then_with(|| lhs.check_id.cmp(&rhs.check_id))
    });
    reminders
}
