//! Recurrence resolution
//!
//! Turns a scheduled entry definition into the concrete instant of its next
//! occurrence relative to a reference instant. Instants are already in the
//! clock's zone, so no daylight-saving correction is applied here.

use chrono::{Datelike, Duration, NaiveDateTime};
use std::sync::Arc;

use crate::models::{Recurrence, ScheduledEntry};

/// Resolved playback window for one entry on one day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub entry: Arc<ScheduledEntry>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Occurrence {
    /// Resolve the occurrence of `entry` relevant at `reference`
    pub fn resolve(entry: &Arc<ScheduledEntry>, reference: NaiveDateTime) -> Self {
        let start = resolve(entry, reference);
        Self {
            entry: Arc::clone(entry),
            start,
            end: start + entry.length(),
        }
    }

    /// Occurrence of `entry` whose window contains `now`, if any
    ///
    /// Checks the candidates starting today and yesterday, so windows that
    /// cross midnight are found.
    pub fn containing(entry: &Arc<ScheduledEntry>, now: NaiveDateTime) -> Option<Self> {
        let time = entry.time_of_day.to_naive_time();
        [now.date(), now.date() - Duration::days(1)]
            .into_iter()
            .filter(|day| match entry.recurrence {
                Recurrence::Daily => true,
                Recurrence::Weekday(target) => day.weekday() == target,
                Recurrence::ExactDate(date) => *day == date,
            })
            .map(|day| {
                let start = day.and_time(time);
                Self {
                    entry: Arc::clone(entry),
                    start,
                    end: start + entry.length(),
                }
            })
            .find(|occ| occ.is_active_at(now))
    }

    /// Content key
    pub fn key(&self) -> &str {
        self.entry.key()
    }

    /// Whether `now` falls inside `[start, end)`
    pub fn is_active_at(&self, now: NaiveDateTime) -> bool {
        self.start <= now && now < self.end
    }

    /// Whether the whole window is in the past at `now`
    pub fn has_elapsed(&self, now: NaiveDateTime) -> bool {
        self.end <= now
    }

    /// Seconds into the occurrence at `now`, never negative
    pub fn offset_at(&self, now: NaiveDateTime) -> i64 {
        (now - self.start).num_seconds().max(0)
    }
}

impl AsRef<ScheduledEntry> for Occurrence {
    fn as_ref(&self) -> &ScheduledEntry {
        &self.entry
    }
}

/// Compute the next concrete start instant of `entry` relative to `reference`
///
/// - `Daily`: today, or tomorrow if today's window has fully elapsed
/// - `Weekday(d)`: the next `d`; today only if today's window has not elapsed
/// - `ExactDate`: that date, regardless of `reference`
pub fn resolve(entry: &ScheduledEntry, reference: NaiveDateTime) -> NaiveDateTime {
    let time = entry.time_of_day.to_naive_time();
    let candidate = reference.date().and_time(time);
    let elapsed = |start: NaiveDateTime| start + entry.length() <= reference;

    match entry.recurrence {
        Recurrence::Daily => {
            if elapsed(candidate) {
                candidate + Duration::days(1)
            } else {
                candidate
            }
        }
        Recurrence::Weekday(target) => {
            let today = i64::from(reference.weekday().num_days_from_sunday());
            let wanted = i64::from(target.num_days_from_sunday());
            let mut delta = (wanted - today + 7) % 7;
            if delta == 0 && elapsed(candidate) {
                delta = 7;
            }
            candidate + Duration::days(delta)
        }
        Recurrence::ExactDate(date) => date.and_time(time),
    }
}

// ============================================================================
// Tests
// ============================================================================
