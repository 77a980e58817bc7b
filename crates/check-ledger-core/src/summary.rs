use serde::{Deserialize, Serialize};
use time::Date;

use crate::{Check, CheckKind};

/// Totals shown on the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LedgerSummary {
    pub upcoming_count: usize,
    pub upcoming_total: f64,
    pub past_due_count: usize,
    pub past_due_total: f64,
    pub given_total: f64,
    pub taken_total: f64,
    /// Taken minus given, over every record.
    pub balance: f64,
}

/// Split checks into upcoming (due after `today`) and past due (due on or
/// before `today`). Checks whose due date does not parse are left out of both
/// buckets but still count toward the balance; checks of an unrecognized type
/// are bucketed but not netted. Records without a numeric amount are skipped.
#[must_use]
pub fn summarize(checks: &[Check], today: Date) -> LedgerSummary {
    let mut summary = LedgerSummary::default();

    for check in checks {
        let Some(amount) = check.amount.value() else {
            continue;
        };

        match check.due_on() {
            Some(due) if due > today => {
                summary.upcoming_count += 1;
                summary.upcoming_total += amount;
            }
            Some(_) => {
                summary.past_due_count += 1;
                summary.past_due_total += amount;
            }
            None => {}
        }

        let Some(kind) = check.kind.known() else {
            continue;
        };
        match kind {
            CheckKind::Given => summary.given_total += amount,
            CheckKind::Taken => summary.taken_total += amount,
        }
        summary.balance += kind.signed(amount);
    }

    summary
}
