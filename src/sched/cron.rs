//! Cron normalization and due-instant helpers

use chrono::{DateTime, Timelike, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::model::Job;

/// Normalize a 5-field cron expression to the 6-field form the `cron`
/// crate expects by prepending a seconds field of "0".
pub fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Parse a user-supplied (5- or 6-field) cron expression
pub fn parse_schedule(expr: &str) -> Result<Schedule, cron::error::Error> {
    Schedule::from_str(&normalize_cron(expr))
}

/// Truncate to the whole minute, the cluster's scheduling granularity
pub fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

/// Whether the schedule fires at exactly this whole minute
///
/// Evaluated against the scheduled minute rather than wall-clock "now",
/// so the answer for a given minute never changes no matter how late a
/// node re-derives it.
pub fn fires_at(schedule: &Schedule, minute: DateTime<Utc>) -> bool {
    let probe = minute - chrono::Duration::seconds(1);
    schedule
        .after(&probe)
        .next()
        .map(|next| next == minute)
        .unwrap_or(false)
}

/// Derived next fire time for a job; never persisted
pub fn next_run(job: &Job, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let schedule = parse_schedule(&job.cron).ok()?;
    schedule.after(&after).next()
}
