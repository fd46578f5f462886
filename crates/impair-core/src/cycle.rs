//! Where a sequence currently sits in its repeat cycle.
//!
//! Stateless: the scheduler and the HTTP countdown both call
//! [`cycle_position`] so they cannot disagree about due-ness.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CyclePosition {
    pub cycle_duration: u32,
    /// Manual-only sequences are never due.
    pub manual: bool,
    pub due: bool,
    /// Seconds since the last completed run, if there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<i64>,
    /// Seconds until the next firing; zero once due.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_due_at: Option<DateTime<Utc>>,
}

/// Compute the cycle position from `(now, last_run, cycle_duration)`.
///
/// A cycle of zero minutes is manual-only. A sequence that has never run is
/// due immediately.
pub fn cycle_position(
    now: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    cycle_duration: u32,
) -> CyclePosition {
    if cycle_duration == 0 {
        return CyclePosition {
            cycle_duration,
            manual: true,
            due: false,
            elapsed_seconds: last_run.map(|t| (now - t).num_seconds()),
            remaining_seconds: None,
            next_due_at: None,
        };
    }

    let Some(last) = last_run else {
        return CyclePosition {
            cycle_duration,
            manual: false,
            due: true,
            elapsed_seconds: None,
            remaining_seconds: Some(0),
            next_due_at: None,
        };
    };

    let next = last + Duration::minutes(i64::from(cycle_duration));
    let due = now >= next;
    let remaining = if due {
        0
    } else {
        // Round partial seconds up so a countdown never shows 0 early.
        let ms = (next - now).num_milliseconds();
        (ms + 999) / 1000
    };

    CyclePosition {
        cycle_duration,
        manual: false,
        due,
        elapsed_seconds: Some((now - last).num_seconds()),
        remaining_seconds: Some(remaining),
        next_due_at: Some(next),
    }
}
