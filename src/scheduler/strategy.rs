//! Scheduling strategies
//!
//! The dispatcher's timer side comes in two flavours, picked once at startup:
//!
//! - [`PreciseStrategy`] arms warning, fade and start timers for every
//!   projected occurrence plus hourly and daily housekeeping timers
//! - [`OpportunisticStrategy`] arms nothing per occurrence; every selection
//!   call polls the upcoming ledger for overdue items and catches up on
//!   housekeeping when an hour or day boundary has passed

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::projector::{ChainItem, MorningGenres};
use super::timer::{TimerQueue, TimerTask};

/// Which strategy is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Precise,
    Opportunistic,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precise => write!(f, "precise"),
            Self::Opportunistic => write!(f, "opportunistic"),
        }
    }
}

/// Housekeeping that became due while polling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chores {
    pub hourly: bool,
    pub reroll_genres: bool,
}

/// Instant the hourly housekeeping runs after `now`
pub fn next_hourly(now: NaiveDateTime) -> NaiveDateTime {
    let hour_start = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    hour_start + Duration::hours(1) + Duration::seconds(5)
}

/// Timer side of the dispatcher
pub trait SchedulingStrategy: Send + fmt::Debug {
    /// Strategy identity
    fn kind(&self) -> StrategyKind;

    /// Arm callbacks for one projected item
    ///
    /// `exempt` items get no pre-emption warnings.
    fn arm(
        &self,
        item: &ChainItem,
        exempt: bool,
        fade: Duration,
        now: NaiveDateTime,
        timers: &mut TimerQueue,
    );

    /// Arm the recurring housekeeping timers
    fn arm_housekeeping(&self, now: NaiveDateTime, timers: &mut TimerQueue);

    /// Whether each selection call checks the upcoming ledger and windows
    fn polls_on_select(&self) -> bool;

    /// Housekeeping due at `now` that no timer will deliver
    fn due_chores(&mut self, now: NaiveDateTime, genres: &MorningGenres) -> Chores;
}

// ============================================================================
// Precise
// ============================================================================

/// Timer-driven strategy for hosts with reliable timers
#[derive(Debug, Clone, Default)]
pub struct PreciseStrategy;

impl PreciseStrategy {
    /// Lead time of the first warning
    pub const WARNING_15: i64 = 15;
    /// Lead time of the second warning
    pub const WARNING_5: i64 = 5;
}

impl SchedulingStrategy for PreciseStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Precise
    }

    fn arm(
        &self,
        item: &ChainItem,
        exempt: bool,
        fade: Duration,
        now: NaiveDateTime,
        timers: &mut TimerQueue,
    ) {
        let start = item.effective_start;
        let key = item.key().to_string();
        let nominal = item.nominal_start();

        if !exempt {
            let w15 = start - Duration::minutes(Self::WARNING_15);
            if w15 > now {
                timers.arm(w15, TimerTask::Warning15 { key: key.clone(), start: nominal });
            }
            let w5 = start - Duration::minutes(Self::WARNING_5);
            if w5 > now {
                timers.arm(w5, TimerTask::Warning5 { key: key.clone(), start: nominal });
            }
        }

        if !item.is_chained {
            let fade_at = start - fade;
            if fade_at > now {
                timers.arm(fade_at, TimerTask::FadeStart { key: key.clone(), start: nominal });
            }
        }

        timers.arm(start.max(now), TimerTask::OccurrenceStart { key: key.clone(), start: nominal });
        tracing::debug!(
            key = %key,
            start = %start,
            chained = item.is_chained,
            exempt,
            "Occurrence armed"
        );
    }

    fn arm_housekeeping(&self, now: NaiveDateTime, timers: &mut TimerQueue) {
        timers.cancel_where(TimerTask::is_housekeeping);
        timers.arm(next_hourly(now), TimerTask::HourlyProjection);
        timers.arm(MorningGenres::next_reroll(now), TimerTask::MorningGenreReroll);
    }

    fn polls_on_select(&self) -> bool {
        false
    }

    fn due_chores(&mut self, _now: NaiveDateTime, _genres: &MorningGenres) -> Chores {
        Chores::default()
    }
}

// ============================================================================
// Opportunistic
// ============================================================================

/// Polling strategy for hosts that throttle or drop timers
#[derive(Debug, Clone)]
pub struct OpportunisticStrategy {
    last_hourly: NaiveDateTime,
}

impl OpportunisticStrategy {
    /// Create a strategy whose hourly chores are considered done at `now`
    pub fn new(now: NaiveDateTime) -> Self {
        Self { last_hourly: now }
    }
}

impl SchedulingStrategy for OpportunisticStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Opportunistic
    }

    fn arm(
        &self,
        item: &ChainItem,
        _exempt: bool,
        _fade: Duration,
        _now: NaiveDateTime,
        _timers: &mut TimerQueue,
    ) {
        tracing::trace!(key = item.key(), "Occurrence queued for polling");
    }

    fn arm_housekeeping(&self, _now: NaiveDateTime, timers: &mut TimerQueue) {
        timers.cancel_where(TimerTask::is_housekeeping);
    }

    fn polls_on_select(&self) -> bool {
        true
    }

    fn due_chores(&mut self, now: NaiveDateTime, genres: &MorningGenres) -> Chores {
        let hourly = now >= next_hourly(self.last_hourly);
        if hourly {
            self.last_hourly = now;
        }
        Chores {
            hourly,
            reroll_genres: genres.needs_reroll(now),
        }
    }
}
