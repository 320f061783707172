//! Generation-stamped timer queue
//!
//! Armed callbacks are plain data ([`TimerTask`]) ordered by due instant. The
//! queue never runs anything itself: the owner pops due timers and handles
//! them. Every timer carries the queue generation at arming time, and
//! [`TimerQueue::reset`] bumps the generation, so a timer popped before a reset
//! can be recognised as stale and dropped instead of mutating fresh state.

use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Identifier handed out when arming a timer
pub type TimerId = u64;

/// What to do when a timer fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerTask {
    /// 15 minutes before an occurrence
    Warning15 { key: String, start: NaiveDateTime },
    /// 5 minutes before an occurrence
    Warning5 { key: String, start: NaiveDateTime },
    /// Begin fading out ahead of an occurrence
    FadeStart { key: String, start: NaiveDateTime },
    /// Occurrence start (effective start for chained items)
    OccurrenceStart { key: String, start: NaiveDateTime },
    /// One volume step of a running fade
    FadeStep { step: u32 },
    /// Hourly housekeeping and projection
    HourlyProjection,
    /// Daily morning genre reroll
    MorningGenreReroll,
}

impl TimerTask {
    /// Whether the task belongs to a projected occurrence
    pub fn is_occurrence_task(&self) -> bool {
        matches!(
            self,
            Self::Warning15 { .. }
                | Self::Warning5 { .. }
                | Self::FadeStart { .. }
                | Self::OccurrenceStart { .. }
        )
    }

    /// Whether the task is periodic housekeeping
    pub fn is_housekeeping(&self) -> bool {
        matches!(self, Self::HourlyProjection | Self::MorningGenreReroll)
    }
}

impl fmt::Display for TimerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning15 { key, .. } => write!(f, "warning15({key})"),
            Self::Warning5 { key, .. } => write!(f, "warning5({key})"),
            Self::FadeStart { key, .. } => write!(f, "fade({key})"),
            Self::OccurrenceStart { key, .. } => write!(f, "start({key})"),
            Self::FadeStep { step } => write!(f, "fade-step({step})"),
            Self::HourlyProjection => write!(f, "hourly"),
            Self::MorningGenreReroll => write!(f, "genre-reroll"),
        }
    }
}

/// A timer removed from the queue because it came due
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTimer {
    pub id: TimerId,
    pub generation: u64,
    pub due: NaiveDateTime,
    pub task: TimerTask,
}

#[derive(Debug, Clone)]
struct Armed {
    generation: u64,
    task: TimerTask,
}

/// Ordered set of armed timers
#[derive(Debug, Default)]
pub struct TimerQueue {
    generation: u64,
    next_id: TimerId,
    armed: BTreeMap<(NaiveDateTime, TimerId), Armed>,
    due_by_id: HashMap<TimerId, NaiveDateTime>,
}

impl TimerQueue {
    /// Create an empty queue at generation 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Arm `task` to fire at `due`
    pub fn arm(&mut self, due: NaiveDateTime, task: TimerTask) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        tracing::trace!(id, due = %due, task = %task, "Timer armed");
        self.armed.insert(
            (due, id),
            Armed {
                generation: self.generation,
                task,
            },
        );
        self.due_by_id.insert(id, due);
        id
    }

    /// Cancel one timer; returns whether it was still armed
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.due_by_id.remove(&id) {
            Some(due) => self.armed.remove(&(due, id)).is_some(),
            None => false,
        }
    }

    /// Cancel every timer whose task matches `predicate`
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&TimerTask) -> bool) -> usize {
        let doomed: Vec<(NaiveDateTime, TimerId)> = self
            .armed
            .iter()
            .filter(|(_, armed)| predicate(&armed.task))
            .map(|(k, _)| *k)
            .collect();
        for key in &doomed {
            self.armed.remove(key);
            self.due_by_id.remove(&key.1);
        }
        doomed.len()
    }

    /// Drop every timer and start a new generation
    pub fn reset(&mut self) -> u64 {
        let dropped = self.armed.len();
        self.armed.clear();
        self.due_by_id.clear();
        self.generation += 1;
        tracing::debug!(generation = self.generation, dropped, "Timer queue reset");
        self.generation
    }

    /// Earliest due instant
    pub fn next_deadline(&self) -> Option<NaiveDateTime> {
        self.armed.keys().next().map(|(due, _)| *due)
    }

    /// Remove and return every timer due at or before `now`, earliest first
    pub fn pop_due(&mut self, now: NaiveDateTime) -> Vec<FiredTimer> {
        let mut fired = Vec::new();
        while let Some(entry) = self.armed.first_entry() {
            let (due, id) = *entry.key();
            if due > now {
                break;
            }
            let armed = entry.remove();
            self.due_by_id.remove(&id);
            fired.push(FiredTimer {
                id,
                generation: armed.generation,
                due,
                task: armed.task,
            });
        }
        fired
    }

    /// Whether a fired timer belongs to the current generation
    pub fn is_current(&self, timer: &FiredTimer) -> bool {
        timer.generation == self.generation
    }

    /// Armed timers in firing order
    pub fn pending(&self) -> impl Iterator<Item = (NaiveDateTime, &TimerTask)> {
        self.armed.iter().map(|((due, _), armed)| (*due, &armed.task))
    }

    /// Number of armed timers
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    /// Whether no timer is armed
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}
