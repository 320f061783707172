//! Usage ledger preventing immediate repeats
//!
//! Each category keeps a map from content key to the instant it was marked
//! used. Categories expire under different policies:
//!
//! | Category              | Policy                 |
//! |-----------------------|------------------------|
//! | `Scheduled`           | rolling 24 hours       |
//! | `Standard`            | rolling 24 hours       |
//! | `LateNight`/`Morning` | current clock hour     |
//! | `Junk(type)`          | flag, no time window   |
//!
//! Scheduled start instants are tracked separately: once any entry has
//! started (or been abandoned) at an instant, no other entry sharing that
//! instant may be projected again.

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::models::TimeSlot;

/// Rolling exclusion window for scheduled and standard content
const ROLLING_WINDOW_HOURS: i64 = 24;

// ============================================================================
// Usage Category
// ============================================================================

/// Ledger category
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageCategory {
    Scheduled,
    LateNight,
    Morning,
    Standard,
    Junk(String),
}

/// Expiry policy attached to a category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// Used for the given window after being marked
    Rolling(Duration),
    /// Used until the clock hour changes
    ClockHour,
    /// Used until explicitly cleared
    Flag,
}

impl UsageCategory {
    /// Rotation category for a time slot
    pub fn for_slot(slot: TimeSlot) -> Self {
        match slot {
            TimeSlot::LateNight => Self::LateNight,
            TimeSlot::Morning => Self::Morning,
            TimeSlot::Standard => Self::Standard,
        }
    }

    /// Junk category for a junk type
    pub fn junk(junk_type: impl Into<String>) -> Self {
        Self::Junk(junk_type.into())
    }

    /// Expiry policy for this category
    pub fn policy(&self) -> ExpiryPolicy {
        match self {
            Self::Scheduled | Self::Standard => ExpiryPolicy::Rolling(Duration::hours(ROLLING_WINDOW_HOURS)),
            Self::LateNight | Self::Morning => ExpiryPolicy::ClockHour,
            Self::Junk(_) => ExpiryPolicy::Flag,
        }
    }

    /// Parse a category name (`standard`, `junk:ads`, ...)
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "scheduled" => Some(Self::Scheduled),
            "lateNight" | "late_night" | "lateNightLoFis" => Some(Self::LateNight),
            "morning" => Some(Self::Morning),
            "standard" => Some(Self::Standard),
            other => other
                .strip_prefix("junk:")
                .filter(|t| !t.is_empty())
                .map(|t| Self::Junk(t.to_string())),
        }
    }
}

impl fmt::Display for UsageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::LateNight => write!(f, "lateNight"),
            Self::Morning => write!(f, "morning"),
            Self::Standard => write!(f, "standard"),
            Self::Junk(t) => write!(f, "junk:{t}"),
        }
    }
}

// ============================================================================
// Usage Ledger
// ============================================================================

/// Per-category record of recently played content
#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    entries: HashMap<UsageCategory, HashMap<String, NaiveDateTime>>,
    consumed_starts: BTreeSet<NaiveDateTime>,
}

impl UsageLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` played at `when`
    pub fn mark_used(&mut self, category: UsageCategory, key: impl Into<String>, when: NaiveDateTime) {
        self.entries
            .entry(category)
            .or_default()
            .insert(key.into(), when);
    }

    /// Whether `key` is still excluded at `now`
    pub fn is_used(&self, category: &UsageCategory, key: &str, now: NaiveDateTime) -> bool {
        self.entries
            .get(category)
            .and_then(|keys| keys.get(key))
            .map(|when| !Self::expired(category.policy(), *when, now))
            .unwrap_or(false)
    }

    /// Record that the scheduled tie group starting at `start` was decided
    pub fn consume_start(&mut self, start: NaiveDateTime) {
        self.consumed_starts.insert(start);
    }

    /// Whether some entry already played or was abandoned at `start`
    pub fn is_start_consumed(&self, start: NaiveDateTime) -> bool {
        self.consumed_starts.contains(&start)
    }

    /// Forget every key in a category
    ///
    /// Clearing `Scheduled` also forgets consumed start instants.
    pub fn clear_category(&mut self, category: &UsageCategory) {
        if let Some(keys) = self.entries.get_mut(category) {
            keys.clear();
        }
        if *category == UsageCategory::Scheduled {
            self.consumed_starts.clear();
        }
    }

    /// Forget every junk key of every type
    pub fn clear_junk(&mut self) {
        for (category, keys) in self.entries.iter_mut() {
            if matches!(category, UsageCategory::Junk(_)) {
                keys.clear();
            }
        }
    }

    /// Forget everything
    pub fn clear_all(&mut self) {
        self.entries.clear();
        self.consumed_starts.clear();
    }

    /// Drop every entry whose window has passed at `now`
    ///
    /// Returns the number of entries removed.
    pub fn clear_expired(&mut self, now: NaiveDateTime) -> usize {
        let mut removed = 0;
        for (category, keys) in self.entries.iter_mut() {
            let policy = category.policy();
            let before = keys.len();
            keys.retain(|_, when| !Self::expired(policy, *when, now));
            removed += before - keys.len();
        }

        let before = self.consumed_starts.len();
        self.consumed_starts
            .retain(|start| now - *start < Duration::hours(ROLLING_WINDOW_HOURS));
        removed += before - self.consumed_starts.len();
        removed
    }

    /// Number of recorded keys in a category, expired or not
    pub fn len(&self, category: &UsageCategory) -> usize {
        self.entries.get(category).map(HashMap::len).unwrap_or(0)
    }

    /// Whether the ledger holds no keys at all
    pub fn is_empty(&self) -> bool {
        self.consumed_starts.is_empty() && self.entries.values().all(HashMap::is_empty)
    }

    /// Snapshot of categories and their key counts
    pub fn summary(&self) -> Vec<(UsageCategory, usize)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|(c, keys)| (c.clone(), keys.len()))
            .collect();
        out.sort_by_key(|(c, _)| c.to_string());
        out
    }

    fn expired(policy: ExpiryPolicy, when: NaiveDateTime, now: NaiveDateTime) -> bool {
        match policy {
            ExpiryPolicy::Rolling(window) => now - when >= window,
            ExpiryPolicy::ClockHour => when.date() != now.date() || when.hour() != now.hour(),
            ExpiryPolicy::Flag => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_standard_rolling_window() {
        let mut ledger = UsageLedger::new();
        let t = at(10, 0, 0);
        ledger.mark_used(UsageCategory::Standard, "song-a", t);

        let almost = t + Duration::hours(23) + Duration::minutes(59);
        let after = t + Duration::hours(24) + Duration::minutes(1);

        assert!(ledger.is_used(&UsageCategory::Standard, "song-a", almost));
        assert!(!ledger.is_used(&UsageCategory::Standard, "song-a", after));
    }

    #[test]
    fn test_absent_key_is_unused() {
        let ledger = UsageLedger::new();
        assert!(!ledger.is_used(&UsageCategory::Standard, "missing", at(1, 0, 0)));
        assert!(!ledger.is_used(&UsageCategory::junk("ads"), "missing", at(1, 0, 0)));
    }

    #[test]
    fn test_clock_hour_policy() {
        let mut ledger = UsageLedger::new();
        ledger.mark_used(UsageCategory::Morning, "m1", at(6, 10, 0));

        assert!(ledger.is_used(&UsageCategory::Morning, "m1", at(6, 59, 59)));
        assert!(!ledger.is_used(&UsageCategory::Morning, "m1", at(7, 0, 0)));
    }

    #[test]
    fn test_junk_is_plain_flag() {
        let mut ledger = UsageLedger::new();
        ledger.mark_used(UsageCategory::junk("ads"), "ad1", at(1, 0, 0));

        let much_later = at(1, 0, 0) + Duration::days(30);
        assert!(ledger.is_used(&UsageCategory::junk("ads"), "ad1", much_later));
        assert!(!ledger.is_used(&UsageCategory::junk("bumpers"), "ad1", much_later));

        ledger.clear_junk();
        assert!(!ledger.is_used(&UsageCategory::junk("ads"), "ad1", much_later));
    }

    #[test]
    fn test_consumed_starts_expire_and_clear() {
        let mut ledger = UsageLedger::new();
        ledger.consume_start(at(10, 0, 0));
        assert!(ledger.is_start_consumed(at(10, 0, 0)));
        assert!(!ledger.is_start_consumed(at(10, 0, 1)));

        assert_eq!(ledger.clear_expired(at(23, 0, 0)), 0);
        assert!(ledger.is_start_consumed(at(10, 0, 0)));

        assert_eq!(ledger.clear_expired(at(10, 0, 0) + Duration::hours(24)), 1);
        assert!(!ledger.is_start_consumed(at(10, 0, 0)));

        ledger.consume_start(at(11, 0, 0));
        ledger.clear_category(&UsageCategory::Scheduled);
        assert!(!ledger.is_start_consumed(at(11, 0, 0)));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_clear_category_only_touches_one() {
        let mut ledger = UsageLedger::new();
        ledger.mark_used(UsageCategory::Standard, "s", at(9, 0, 0));
        ledger.mark_used(UsageCategory::Scheduled, "x", at(9, 0, 0));

        ledger.clear_category(&UsageCategory::Standard);

        assert!(!ledger.is_used(&UsageCategory::Standard, "s", at(9, 1, 0)));
        assert!(ledger.is_used(&UsageCategory::Scheduled, "x", at(9, 1, 0)));
    }

    #[test]
    fn test_clear_expired_drops_only_expired() {
        let mut ledger = UsageLedger::new();
        ledger.mark_used(UsageCategory::Standard, "old", at(0, 0, 0) - Duration::days(2));
        ledger.mark_used(UsageCategory::Standard, "fresh", at(9, 0, 0));
        ledger.mark_used(UsageCategory::LateNight, "lofi", at(2, 0, 0));
        ledger.mark_used(UsageCategory::junk("ads"), "ad", at(2, 0, 0));

        let removed = ledger.clear_expired(at(10, 0, 0));

        assert_eq!(removed, 2);
        assert_eq!(ledger.len(&UsageCategory::Standard), 1);
        assert_eq!(ledger.len(&UsageCategory::LateNight), 0);
        assert_eq!(ledger.len(&UsageCategory::junk("ads")), 1);
    }

    #[test]
    fn test_usage_category_from_id() {
        assert_eq!(UsageCategory::from_id("standard"), Some(UsageCategory::Standard));
        assert_eq!(UsageCategory::from_id("junk:ads"), Some(UsageCategory::junk("ads")));
        assert_eq!(UsageCategory::from_id("junk:"), None);
        assert_eq!(UsageCategory::from_id("bogus"), None);
        assert_eq!(UsageCategory::junk("ads").to_string(), "junk:ads");
    }
}
