//! Wall-clock source for every scheduler component
//!
//! The clock runs in one of two modes:
//! - **Pass-through**: the host instant shifted into the configured zone
//! - **Simulated**: an internal instant advanced by `rate` seconds per real
//!   second (by a tokio ticker) or manually via [`Clock::advance`]
//!
//! The clock is a cheap handle; clones share the same state. Instants are
//! returned by value, so callers can never mutate clock state through them.

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;

use super::error::{SchedulerError, SchedulerResult};

// ============================================================================
// Zone Setting
// ============================================================================

/// Time zone applied to the host instant in pass-through mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneSetting {
    /// Host local zone
    Local,
    /// Coordinated universal time
    Utc,
    /// Fixed offset from UTC
    Fixed(FixedOffset),
    /// IANA zone such as `America/New_York`, daylight saving included
    Named(Tz),
}

impl ZoneSetting {
    /// Parse `local`, `UTC`, an IANA zone name or a `+HH:MM` / `-HH:MM` offset
    pub fn parse(tz: &str) -> SchedulerResult<Self> {
        let trimmed = tz.trim();
        match trimmed.to_lowercase().as_str() {
            "" => return Err(SchedulerError::invalid_timezone(tz)),
            "local" => return Ok(Self::Local),
            "utc" | "z" | "+00:00" => return Ok(Self::Utc),
            _ => {}
        }

        if !trimmed.starts_with(['+', '-']) {
            return trimmed
                .parse::<Tz>()
                .map(Self::Named)
                .map_err(|_| SchedulerError::invalid_timezone(tz));
        }

        let (sign, rest) = match trimmed.as_bytes()[0] {
            b'+' => (1, &trimmed[1..]),
            b'-' => (-1, &trimmed[1..]),
            _ => return Err(SchedulerError::invalid_timezone(tz)),
        };

        let mut parts = rest.split(':');
        let hours: i32 = parts
            .next()
            .and_then(|h| h.parse().ok())
            .ok_or_else(|| SchedulerError::invalid_timezone(tz))?;
        let minutes: i32 = match parts.next() {
            Some(m) => m.parse().map_err(|_| SchedulerError::invalid_timezone(tz))?,
            None => 0,
        };
        if parts.next().is_some() || hours > 14 || minutes > 59 {
            return Err(SchedulerError::invalid_timezone(tz));
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Self::Fixed)
            .ok_or_else(|| SchedulerError::invalid_timezone(tz))
    }

    /// Convert a UTC instant into local wall-clock time for this zone
    pub fn localize(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Self::Local => instant.with_timezone(&Local).naive_local(),
            Self::Utc => instant.naive_utc(),
            Self::Fixed(offset) => instant.with_timezone(offset).naive_local(),
            Self::Named(zone) => instant.with_timezone(zone).naive_local(),
        }
    }
}

impl Default for ZoneSetting {
    fn default() -> Self {
        Self::Local
    }
}

impl fmt::Display for ZoneSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Utc => write!(f, "UTC"),
            Self::Fixed(offset) => write!(f, "{offset}"),
            Self::Named(zone) => write!(f, "{}", zone.name()),
        }
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Current clock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// Host time shifted into the configured zone
    PassThrough,
    /// Internally advanced time
    Simulated { rate: i64 },
}

#[derive(Debug)]
struct ClockState {
    mode: ClockMode,
    simulated: NaiveDateTime,
}

/// Shared wall-clock handle
#[derive(Clone)]
pub struct Clock {
    zone: ZoneSetting,
    state: Arc<RwLock<ClockState>>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Clock {
    /// Pass-through clock for the given zone
    pub fn system(zone: ZoneSetting) -> Self {
        let now = zone.localize(Utc::now());
        Self {
            zone,
            state: Arc::new(RwLock::new(ClockState {
                mode: ClockMode::PassThrough,
                simulated: now,
            })),
            ticker: Arc::new(Mutex::new(None)),
        }
    }

    /// Simulated clock without a ticker; advance it with [`Clock::advance`]
    pub fn simulated(start: NaiveDateTime, rate: i64) -> Self {
        Self {
            zone: ZoneSetting::default(),
            state: Arc::new(RwLock::new(ClockState {
                mode: ClockMode::Simulated { rate },
                simulated: start,
            })),
            ticker: Arc::new(Mutex::new(None)),
        }
    }

    /// Current effective instant
    pub fn now(&self) -> NaiveDateTime {
        let state = self.read_state();
        match state.mode {
            ClockMode::PassThrough => self.zone.localize(Utc::now()),
            ClockMode::Simulated { .. } => state.simulated,
        }
    }

    /// Current mode
    pub fn mode(&self) -> ClockMode {
        self.read_state().mode
    }

    /// Zone used in pass-through mode
    pub fn zone(&self) -> ZoneSetting {
        self.zone
    }

    /// Seconds of clock time per real second
    pub fn rate(&self) -> i64 {
        match self.mode() {
            ClockMode::PassThrough => 1,
            ClockMode::Simulated { rate } => rate,
        }
    }

    /// Switch to simulated time starting at `start` and advancing at `rate`
    ///
    /// Any previous ticker is stopped first. When called inside a tokio
    /// runtime a new ticker is spawned; otherwise the clock only moves
    /// through [`Clock::advance`].
    pub fn start_simulation(&self, start: NaiveDateTime, rate: i64) {
        self.stop_ticker();

        {
            let mut state = self.write_state();
            state.mode = ClockMode::Simulated { rate };
            state.simulated = start;
        }
        tracing::info!(start = %start, rate, "Simulated time started");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No tokio runtime; simulated clock advances manually");
            return;
        };

        let state = Arc::clone(&self.state);
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            interval.tick().await;
            loop {
                interval.tick().await;
                let mut guard = state.write().unwrap_or_else(|e| e.into_inner());
                if let ClockMode::Simulated { rate } = guard.mode {
                    guard.simulated += Duration::seconds(rate);
                    if guard.simulated.second() == 0 {
                        tracing::debug!(simulated = %guard.simulated, "Simulated time");
                    }
                }
            }
        });

        *self.lock_ticker() = Some(handle);
    }

    /// Return to pass-through time
    pub fn use_real_time(&self) {
        self.stop_ticker();
        self.write_state().mode = ClockMode::PassThrough;
        tracing::info!(zone = %self.zone, "Using real time");
    }

    /// Advance simulated time manually; ignored in pass-through mode
    pub fn advance(&self, by: Duration) {
        let mut state = self.write_state();
        if matches!(state.mode, ClockMode::Simulated { .. }) {
            state.simulated += by;
        }
    }

    /// Jump simulated time to an absolute instant; ignored in pass-through mode
    pub fn set(&self, instant: NaiveDateTime) {
        let mut state = self.write_state();
        if matches!(state.mode, ClockMode::Simulated { .. }) {
            state.simulated = instant;
        }
    }

    /// Whether a ticker task is currently running
    pub fn has_ticker(&self) -> bool {
        self.lock_ticker()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn stop_ticker(&self) {
        if let Some(handle) = self.lock_ticker().take() {
            handle.abort();
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ClockState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, ClockState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_ticker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ticker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("zone", &self.zone)
            .field("mode", &self.mode())
            .field("now", &self.now())
            .finish()
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
    fn test_zone_setting_parse() {
        assert_eq!(ZoneSetting::parse("local").unwrap(), ZoneSetting::Local);
        assert_eq!(ZoneSetting::parse("UTC").unwrap(), ZoneSetting::Utc);
        assert_eq!(
            ZoneSetting::parse("+09:00").unwrap(),
            ZoneSetting::Fixed(FixedOffset::east_opt(9 * 3600).unwrap())
        );
        assert_eq!(
            ZoneSetting::parse("-05:30").unwrap(),
            ZoneSetting::Fixed(FixedOffset::west_opt(5 * 3600 + 1800).unwrap())
        );
        assert_eq!(
            ZoneSetting::parse("America/New_York").unwrap(),
            ZoneSetting::Named(chrono_tz::America::New_York)
        );
        assert!(ZoneSetting::parse("Mars/Olympus_Mons").is_err());
        assert!(ZoneSetting::parse("").is_err());
        assert!(ZoneSetting::parse("+25:00").is_err());
    }

    #[test]
    fn test_fixed_zone_localize() {
        let zone = ZoneSetting::parse("+09:00").unwrap();
        let utc = DateTime::parse_from_rfc3339("2024-01-15T14:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(zone.localize(utc), at(23, 0, 0));
    }

    #[test]
    fn test_named_zone_follows_daylight_saving() {
        let zone = ZoneSetting::parse("America/New_York").unwrap();
        assert_eq!(zone.to_string(), "America/New_York");

        // 2024-03-10 07:00 UTC is 02:00 EST, clocks jump to 03:00 EDT
        let before = DateTime::parse_from_rfc3339("2024-03-10T06:59:59Z")
            .unwrap()
            .with_timezone(&Utc);
        let after = DateTime::parse_from_rfc3339("2024-03-10T07:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let day = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();

        assert_eq!(zone.localize(before), day.and_hms_opt(1, 59, 59).unwrap());
        assert_eq!(zone.localize(after), day.and_hms_opt(3, 0, 0).unwrap());

        // Winter and summer offsets
        let january = DateTime::parse_from_rfc3339("2024-01-15T17:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let july = DateTime::parse_from_rfc3339("2024-07-15T16:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(zone.localize(january), at(12, 0, 0));
        assert_eq!(
            zone.localize(july),
            NaiveDate::from_ymd_opt(2024, 7, 15).unwrap().and_hms_opt(12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_simulated_clock_manual_advance() {
        let clock = Clock::simulated(at(23, 59, 50), 1);
        assert_eq!(clock.now(), at(23, 59, 50));

        clock.advance(Duration::seconds(5));
        assert_eq!(clock.now(), at(23, 59, 55));
        assert_eq!(clock.mode(), ClockMode::Simulated { rate: 1 });
    }

    #[test]
    fn test_now_returns_independent_copy() {
        let clock = Clock::simulated(at(10, 0, 0), 1);
        let mut first = clock.now();
        first += Duration::hours(3);
        assert_eq!(clock.now(), at(10, 0, 0));
    }

    #[test]
    fn test_clones_share_state() {
        let clock = Clock::simulated(at(10, 0, 0), 1);
        let other = clock.clone();
        other.advance(Duration::minutes(1));
        assert_eq!(clock.now(), at(10, 1, 0));
    }

    #[test]
    fn test_advance_ignored_in_pass_through() {
        let clock = Clock::system(ZoneSetting::Utc);
        let before = clock.now();
        clock.advance(Duration::days(10));
        assert!(clock.now() - before < Duration::days(1));
    }

    #[test]
    fn test_start_simulation_without_runtime_is_manual() {
        let clock = Clock::system(ZoneSetting::Utc);
        clock.start_simulation(at(8, 0, 0), 60);
        assert!(!clock.has_ticker());
        assert_eq!(clock.now(), at(8, 0, 0));
        assert_eq!(clock.rate(), 60);

        clock.use_real_time();
        assert_eq!(clock.mode(), ClockMode::PassThrough);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_advances_by_rate() {
        let clock = Clock::system(ZoneSetting::Utc);
        clock.start_simulation(at(12, 0, 0), 10);
        assert!(clock.has_ticker());

        tokio::time::sleep(std::time::Duration::from_millis(3500)).await;
        assert_eq!(clock.now(), at(12, 0, 30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_does_not_duplicate_tickers() {
        let clock = Clock::system(ZoneSetting::Utc);
        clock.start_simulation(at(12, 0, 0), 1);
        clock.start_simulation(at(12, 0, 0), 1);

        tokio::time::sleep(std::time::Duration::from_millis(4500)).await;
        assert_eq!(clock.now(), at(12, 0, 4));

        clock.use_real_time();
        assert!(!clock.has_ticker());
    }
}
