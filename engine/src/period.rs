//! Reporting period calculation.
//!
//! Period 1 is the calendar month containing the project's progress start.
//! Every calendar month boundary crossed afterwards adds one; the day of month
//! plays no part.

use chrono::{Datelike, NaiveDate};

use crate::errors::{LedgerError, Result};

/// Current reporting period for a project whose progress started on
/// `progress_start`, as seen on `today`.
pub fn current_period(progress_start: NaiveDate, today: NaiveDate) -> Result<u32> {
    if today < progress_start {
        return Err(LedgerError::domain(format!(
            "date {today} is before progress start {progress_start}"
        )));
    }

    let months = (today.year() - progress_start.year()) * 12 + today.month() as i32
        - progress_start.month() as i32;

    u32::try_from(months + 1)
        .map_err(|_| LedgerError::domain(format!("period overflow for {progress_start}..{today}")))
}
