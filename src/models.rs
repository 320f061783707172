//! Core data models for the playout scheduler
//!
//! These types describe catalog content (tracks, scheduled entries) and the
//! time-slot vocabulary shared by every scheduler component.

use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::scheduler::error::{SchedulerError, SchedulerResult};

// ============================================================================
// Track Record
// ============================================================================

/// Immutable catalog entry for one playable item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackRecord {
    /// Opaque content key
    pub key: String,

    /// Storage path handed to the player
    pub path: String,

    /// Duration in whole seconds
    pub duration: u32,

    /// Optional genre tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

impl TrackRecord {
    /// Create a new track record
    pub fn new(key: impl Into<String>, path: impl Into<String>, duration: u32) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            duration,
            genre: None,
        }
    }

    /// Attach a genre tag
    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    /// Duration as a chrono duration
    pub fn length(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.duration))
    }
}

// ============================================================================
// Time Of Day
// ============================================================================

/// Wall-clock time of day at which a scheduled entry starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl TimeOfDay {
    /// Create a validated time of day
    pub fn new(hour: u8, minute: u8, second: u8) -> SchedulerResult<Self> {
        if hour > 23 || minute > 59 || second > 59 {
            return Err(SchedulerError::invalid_time(format!(
                "{hour:02}:{minute:02}:{second:02}"
            )));
        }
        Ok(Self {
            hour,
            minute,
            second,
        })
    }

    /// Parse `HH:MM:SS`, `HH:MM` or the directory form `HH-MM-SS`
    pub fn parse(s: &str) -> SchedulerResult<Self> {
        let trimmed = s.trim();
        let sep = if trimmed.contains(':') { ':' } else { '-' };
        let parts: Vec<&str> = trimmed.split(sep).collect();

        if parts.len() < 2 || parts.len() > 3 {
            return Err(SchedulerError::invalid_time(s));
        }

        let field = |p: &str| p.parse::<u8>().map_err(|_| SchedulerError::invalid_time(s));
        let hour = field(parts[0])?;
        let minute = field(parts[1])?;
        let second = match parts.get(2) {
            Some(p) => field(p)?,
            None => 0,
        };

        Self::new(hour, minute, second)
    }

    /// Convert to a chrono time
    pub fn to_naive_time(&self) -> NaiveTime {
        // Fields are range-checked on construction
        NaiveTime::from_hms_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
        )
        .unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

impl FromStr for TimeOfDay {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ============================================================================
// Recurrence
// ============================================================================

/// How a scheduled entry repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    /// One specific calendar date, never repeats
    ExactDate(NaiveDate),
    /// Every week on the given day
    Weekday(Weekday),
    /// Every day
    Daily,
}

impl Recurrence {
    /// Derived priority used by the hierarchy tie-break
    pub fn priority(&self) -> Priority {
        match self {
            Self::ExactDate(_) => Priority::ExactDate,
            Self::Weekday(_) => Priority::Weekday,
            Self::Daily => Priority::Daily,
        }
    }

    /// Parse a weekday name (`monday`, `Tue`, ...) or `daily`
    pub fn from_name(name: &str) -> SchedulerResult<Self> {
        let lower = name.trim().to_lowercase();
        if lower == "daily" {
            return Ok(Self::Daily);
        }
        lower
            .parse::<Weekday>()
            .map(Self::Weekday)
            .map_err(|_| SchedulerError::invalid_recurrence(name))
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactDate(date) => write!(f, "{date}"),
            Self::Weekday(day) => write!(f, "every {day}"),
            Self::Daily => write!(f, "daily"),
        }
    }
}

/// Recurrence specificity; lower rank wins a tie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    ExactDate = 1,
    Weekday = 2,
    Daily = 3,
}

impl Priority {
    /// All tiers, most specific first
    pub fn all() -> [Self; 3] {
        [Self::ExactDate, Self::Weekday, Self::Daily]
    }

    /// Numeric rank (1 = most specific)
    pub fn rank(&self) -> u8 {
        *self as u8
    }
}

// ============================================================================
// Scheduled Entry
// ============================================================================

/// A time-anchored catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduledEntry {
    /// The content played for this entry
    pub track: TrackRecord,

    /// Nominal start time of day
    pub time_of_day: TimeOfDay,

    /// Recurrence rule
    pub recurrence: Recurrence,

    /// Genre used for morning tie-breaks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

impl AsRef<ScheduledEntry> for ScheduledEntry {
    fn as_ref(&self) -> &ScheduledEntry {
        self
    }
}

impl ScheduledEntry {
    /// Create a new scheduled entry
    pub fn new(track: TrackRecord, time_of_day: TimeOfDay, recurrence: Recurrence) -> Self {
        Self {
            track,
            time_of_day,
            recurrence,
            genre: None,
        }
    }

    /// Attach a genre
    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    /// Content key of the underlying track
    pub fn key(&self) -> &str {
        &self.track.key
    }

    /// Derived priority
    pub fn priority(&self) -> Priority {
        self.recurrence.priority()
    }

    /// Entry duration
    pub fn length(&self) -> chrono::Duration {
        self.track.length()
    }
}

// ============================================================================
// Time Slot
// ============================================================================

/// Algorithmic rotation slot active for an hour of the day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimeSlot {
    /// Late-night lo-fi rotation
    #[serde(alias = "lateNightLoFis")]
    LateNight,
    /// Morning rotation, one genre per hour
    Morning,
    /// Standard daytime rotation
    #[default]
    Standard,
}

impl TimeSlot {
    /// All slots
    pub fn all() -> [Self; 3] {
        [Self::LateNight, Self::Morning, Self::Standard]
    }

    /// Slot identifier as used in catalog files
    pub fn id(&self) -> &'static str {
        match self {
            Self::LateNight => "lateNight",
            Self::Morning => "morning",
            Self::Standard => "standard",
        }
    }

    /// Parse from a catalog identifier
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "lateNight" | "lateNightLoFis" | "late_night" => Some(Self::LateNight),
            "morning" => Some(Self::Morning),
            "standard" => Some(Self::Standard),
            _ => None,
        }
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Junk type whose tracks are excluded during the 5-minute window
pub const BUMPER_TYPE: &str = "bumpers";

/// Check whether a junk type is the bumper type
pub fn is_bumper(junk_type: &str) -> bool {
    junk_type == BUMPER_TYPE
}
