use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::clock::Clock;

#[derive(Debug, Error, PartialEq)]
pub enum ElapsedError {
    #[error("interval runs backwards: {later} is before {earlier}")]
    Backwards {
        earlier: DateTime<Utc>,
        later: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn seconds(self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3_600.0,
            TimeUnit::Days => 86_400.0,
        }
    }
}

/// Length of `[earlier, later]` expressed in `unit`, with millisecond precision.
pub fn between(
    earlier: DateTime<Utc>,
    later: DateTime<Utc>,
    unit: TimeUnit,
) -> Result<f64, ElapsedError> {
    if later < earlier {
        return Err(ElapsedError::Backwards { earlier, later });
    }
    let millis = (later - earlier).num_milliseconds() as f64;
    Ok(millis / 1_000.0 / unit.seconds())
}

pub fn minutes_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Result<f64, ElapsedError> {
    between(earlier, later, TimeUnit::Minutes)
}

/// Minutes from `earlier` until the clock's current time.
pub fn minutes_since<C: Clock + ?Sized>(
    earlier: DateTime<Utc>,
    clock: &C,
) -> Result<f64, ElapsedError> {
    minutes_between(earlier, clock.now())
}

/// Renders a duration for progress logs, e.g. `2 hours, 5 minutes, 0 seconds`.
/// Leading zero units are dropped; negative durations render as zero.
pub fn format_duration(duration: chrono::Duration) -> String {
    let total = duration.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{days} days, {hours} hours, {minutes} minutes, {seconds} seconds")
    } else if hours > 0 {
        format!("{hours} hours, {minutes} minutes, {seconds} seconds")
    } else if minutes > 0 {
        format!("{minutes} minutes, {seconds} seconds")
    } else {
        format!("{seconds} seconds")
    }
}
