//! Dispatcher state machine
//!
//! [`Station`] owns everything that decides what is on air: the usage and
//! upcoming ledgers, the timer queue, pre-emption flags, the random source and
//! the player. All mutation goes through its methods, one call at a time.
//!
//! ```text
//! Algorithmic ──15 min──▶ PreemptWarning15 ──5 min──▶ PreemptWarning5
//!      ▲                                                    │
//!      │                          start (fade unless chained)
//!      │                                                    ▼
//!      └──────────── ended / error / paused / stale ──── Scheduled
//! ```
//!
//! Morning occurrences are exempt from both warnings and from the rotation
//! overrun check, so the morning genre keeps playing up to the start.

use chrono::{Duration, NaiveDateTime, Timelike};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::clock::{Clock, ClockMode};
use super::ledger::{UsageCategory, UsageLedger};
use super::projector::{
    ChainItem, MorningGenres, ProjectionContext, ScheduleProjector, UpcomingLedger,
};
use super::recurrence::Occurrence;
use super::selector::{AlgorithmicSelector, PreemptionState, Selection, SelectionContext};
use super::strategy::{
    next_hourly, OpportunisticStrategy, PreciseStrategy, SchedulingStrategy, StrategyKind,
};
use super::timer::{FiredTimer, TimerQueue, TimerTask};
use crate::catalog::Catalog;
use crate::models::TimeSlot;
use crate::player::{Player, PlayerEvent};

/// Volume steps in a fade-out
pub const FADE_STEPS: u32 = 30;

// ============================================================================
// Station Configuration
// ============================================================================

/// Runtime knobs of a station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Fade-out length before scheduled content
    pub fade_out_ms: u64,

    /// Whether the player can fade at all
    pub fade_supported: bool,

    /// Largest gap between scheduled items that still chains them
    pub chain_gap_threshold_secs: u32,

    /// Start the first rotation track at a random position
    pub random_first_start: bool,

    /// Poll instead of arming per-occurrence timers
    pub opportunistic: bool,

    /// Fixed seed for reproducible runs
    pub rng_seed: Option<u64>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            fade_out_ms: 3000,
            fade_supported: true,
            chain_gap_threshold_secs: 10,
            random_first_start: true,
            opportunistic: false,
            rng_seed: None,
        }
    }
}

impl StationConfig {
    fn fade_out(&self) -> Duration {
        Duration::milliseconds(self.fade_out_ms as i64)
    }
}

// ============================================================================
// States and Events
// ============================================================================

/// Dispatcher state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Algorithmic,
    PreemptWarning15,
    PreemptWarning5,
    Scheduled,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Algorithmic => "algorithmic",
            Self::PreemptWarning15 => "preempt-15",
            Self::PreemptWarning5 => "preempt-5",
            Self::Scheduled => "scheduled",
        };
        write!(f, "{name}")
    }
}

/// Why an occurrence did not play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Its window had already passed
    Stale,
    /// Other scheduled content was playing
    AlreadyScheduled,
    /// Playback was paused on purpose
    PlayerPaused,
}

/// Where the current item came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayingKind {
    Rotation { slot: TimeSlot },
    Junk { junk_type: String },
    Scheduled { nominal_start: NaiveDateTime, chained: bool },
}

/// The item currently handed to the player
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NowPlaying {
    pub key: String,
    pub path: String,
    pub duration: u32,
    pub kind: PlayingKind,
    pub started_at: NaiveDateTime,
}

impl NowPlaying {
    fn from_selection(selection: &Selection, now: NaiveDateTime) -> Self {
        let track = selection.track();
        let kind = match selection {
            Selection::Rotation { slot, .. } => PlayingKind::Rotation { slot: *slot },
            Selection::Junk { junk_type, .. } => PlayingKind::Junk {
                junk_type: junk_type.clone(),
            },
        };
        Self {
            key: track.key.clone(),
            path: track.path.clone(),
            duration: track.duration,
            kind,
            started_at: now,
        }
    }
}

/// Broadcast notifications about station activity
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StationEvent {
    Started { at: NaiveDateTime, strategy: StrategyKind },
    StateChanged { from: DispatchState, to: DispatchState },
    Projected { added: usize, upcoming: usize },
    TrackStarted { key: String, path: String, category: String, position: Option<f64> },
    ScheduledStarted { key: String, chained: bool, offset_secs: i64 },
    ScheduledEnded { key: String },
    OccurrenceSkipped { key: String, reason: SkipReason },
    FadeStarted,
    SelectionFailed { reason: String },
    StrategyChanged { strategy: StrategyKind },
    GenresRerolled,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartTrigger {
    /// Boot found it already playing
    Join,
    /// Precise start timer
    Timer,
    /// Opportunistic poll found it overdue
    Poll,
}

#[derive(Debug, Clone, Copy)]
struct FadeProgress {
    original_volume: f32,
}

// ============================================================================
// Station
// ============================================================================

/// Single controller for one output stream
pub struct Station<P: Player> {
    config: StationConfig,
    catalog: Arc<Catalog>,
    clock: Clock,
    player: P,
    strategy: Box<dyn SchedulingStrategy>,
    projector: ScheduleProjector,
    selector: AlgorithmicSelector,
    timers: TimerQueue,
    upcoming: UpcomingLedger,
    ledger: UsageLedger,
    genres: MorningGenres,
    preemption: PreemptionState,
    state: DispatchState,
    now_playing: Option<NowPlaying>,
    pending_position: Option<f64>,
    awaiting_load: bool,
    fade: Option<FadeProgress>,
    has_played: bool,
    first_track: bool,
    started: bool,
    rng: ChaCha8Rng,
    events: broadcast::Sender<StationEvent>,
}

impl<P: Player> Station<P> {
    /// Create a stopped station
    pub fn new(config: StationConfig, catalog: Arc<Catalog>, clock: Clock, player: P) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let strategy = make_strategy(config.opportunistic, clock.now());
        let (events, _) = broadcast::channel(256);

        Self {
            projector: ScheduleProjector::new(config.chain_gap_threshold_secs),
            config,
            catalog,
            clock,
            player,
            strategy,
            selector: AlgorithmicSelector::new(),
            timers: TimerQueue::new(),
            upcoming: UpcomingLedger::new(),
            ledger: UsageLedger::new(),
            genres: MorningGenres::default(),
            preemption: PreemptionState::default(),
            state: DispatchState::Algorithmic,
            now_playing: None,
            pending_position: None,
            awaiting_load: false,
            fade: None,
            has_played: false,
            first_track: true,
            started: false,
            rng,
            events,
        }
    }

    /// Subscribe to station events
    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Boot: set genres, arm housekeeping, join or project, start playback
    pub fn start(&mut self) {
        let now = self.clock.now();
        self.started = true;

        self.reroll_genres(now);
        self.selector.reshuffle_junk(&self.catalog, &mut self.rng);
        self.strategy.arm_housekeeping(now, &mut self.timers);

        tracing::info!(at = %now, strategy = %self.strategy.kind(), "Station starting");
        self.emit(StationEvent::Started {
            at: now,
            strategy: self.strategy.kind(),
        });

        let joined = match self.active_occurrence() {
            Some(occurrence) => {
                tracing::info!(key = occurrence.key(), "Joining scheduled content in progress");
                let item = ChainItem {
                    effective_start: occurrence.start,
                    occurrence,
                    is_chained: false,
                };
                self.begin_scheduled(item, StartTrigger::Join)
            }
            None => false,
        };

        self.project(now);
        if !joined {
            self.evaluate_windows(now);
            self.play_next();
        }
    }

    /// Cancel everything, forget all state and boot again if started
    pub fn reset(&mut self) {
        let now = self.clock.now();
        tracing::info!(at = %now, "Station reset");

        self.timers.reset();
        self.upcoming.clear();
        self.ledger.clear_all();
        self.preemption.clear();
        self.restore_volume();
        self.set_state(DispatchState::Algorithmic);
        self.now_playing = None;
        self.pending_position = None;
        self.awaiting_load = false;
        self.player.pause();
        self.has_played = false;
        self.first_track = true;
        self.strategy = make_strategy(self.strategy.kind() == StrategyKind::Opportunistic, now);
        self.emit(StationEvent::Reset);

        if self.started {
            self.start();
        }
    }

    /// Switch the clock to simulated time and reset
    pub fn simulate_time(&mut self, start: NaiveDateTime, rate: i64) {
        self.clock.start_simulation(start, rate);
        self.reset();
    }

    /// Return the clock to real time and reset
    pub fn use_real_time(&mut self) {
        self.clock.use_real_time();
        self.reset();
    }

    /// Give up on timers and poll from now on; one-way
    pub fn switch_to_opportunistic(&mut self) {
        if self.strategy.kind() == StrategyKind::Opportunistic {
            return;
        }
        let now = self.clock.now();
        let cancelled = self
            .timers
            .cancel_where(|t| t.is_occurrence_task() || t.is_housekeeping());
        self.strategy = make_strategy(true, now);
        tracing::warn!(cancelled, upcoming = self.upcoming.len(), "Switched to opportunistic scheduling");
        self.emit(StationEvent::StrategyChanged {
            strategy: StrategyKind::Opportunistic,
        });
        self.evaluate_windows(now);
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    /// Fire every timer due at the current instant; returns how many fired
    pub fn tick(&mut self) -> usize {
        let now = self.clock.now();
        let fired = self.timers.pop_due(now);
        let count = fired.len();
        for timer in fired {
            self.fire(timer);
        }
        count
    }

    /// Handle one fired timer; stale generations are ignored
    pub fn fire(&mut self, timer: FiredTimer) {
        if !self.timers.is_current(&timer) {
            tracing::debug!(task = %timer.task, "Ignoring timer from before reset");
            return;
        }
        let now = self.clock.now();

        match timer.task {
            TimerTask::Warning15 { key, .. } => {
                tracing::info!(key = %key, "15-minute warning: junk only");
                self.enter_window(DispatchState::PreemptWarning15);
            }
            TimerTask::Warning5 { key, .. } => {
                tracing::info!(key = %key, "5-minute warning: non-bumper junk only");
                self.enter_window(DispatchState::PreemptWarning5);
            }
            TimerTask::FadeStart { key, .. } => self.start_fade(&key, timer.due),
            TimerTask::FadeStep { step } => self.fade_step(step),
            TimerTask::OccurrenceStart { key, start } => match self.upcoming.remove(&key, start) {
                Some(item) => {
                    self.begin_scheduled(item, StartTrigger::Timer);
                }
                None => tracing::debug!(key = %key, "Start timer for an occurrence no longer upcoming"),
            },
            TimerTask::HourlyProjection => {
                self.hourly_tasks(now);
                self.timers.arm(next_hourly(now), TimerTask::HourlyProjection);
            }
            TimerTask::MorningGenreReroll => {
                self.reroll_genres(now);
                self.timers
                    .arm(MorningGenres::next_reroll(now), TimerTask::MorningGenreReroll);
            }
        }
    }

    /// Earliest armed timer
    pub fn next_deadline(&self) -> Option<NaiveDateTime> {
        self.timers.next_deadline()
    }

    // ------------------------------------------------------------------------
    // Player
    // ------------------------------------------------------------------------

    /// React to a player notification
    pub fn on_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Loaded => self.on_loaded(),
            PlayerEvent::Ended => {
                tracing::debug!(key = ?self.now_playing.as_ref().map(|n| &n.key), "Item ended");
                self.on_item_finished();
            }
            PlayerEvent::Error { reason } => {
                tracing::warn!(
                    key = ?self.now_playing.as_ref().map(|n| &n.key),
                    reason = %reason,
                    "Player error, abandoning item"
                );
                self.on_item_finished();
            }
        }
    }

    /// Operator skip of the current item
    pub fn skip(&mut self) {
        tracing::info!(key = ?self.now_playing.as_ref().map(|n| &n.key), "Skipping current item");
        self.restore_volume();
        self.on_item_finished();
    }

    fn on_loaded(&mut self) {
        if !self.awaiting_load {
            tracing::debug!("Loaded notification with nothing pending");
            return;
        }
        self.awaiting_load = false;

        let duration = self.now_playing.as_ref().map(|n| n.duration).unwrap_or(0);
        if let Some(position) = self.pending_position.take() {
            let latest = f64::from(duration.saturating_sub(1));
            self.player.set_position(position.min(latest));
        }

        match self.player.play() {
            Ok(()) => self.has_played = true,
            Err(e) => {
                tracing::warn!(error = %e, "Player refused to play");
                self.on_item_finished();
            }
        }
    }

    fn on_item_finished(&mut self) {
        if self.state == DispatchState::Scheduled {
            self.finish_scheduled();
        }
        self.now_playing = None;
        self.awaiting_load = false;
        self.play_next();
    }

    fn load(&mut self, item: NowPlaying, position: Option<f64>) -> bool {
        match self.player.set_source(&item.path) {
            Ok(()) => {
                self.pending_position = position;
                self.awaiting_load = true;
                self.now_playing = Some(item);
                true
            }
            Err(e) => {
                tracing::error!(path = %item.path, error = %e, "Failed to load source");
                self.now_playing = None;
                self.awaiting_load = false;
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Scheduled content
    // ------------------------------------------------------------------------

    fn begin_scheduled(&mut self, item: ChainItem, trigger: StartTrigger) -> bool {
        let now = self.clock.now();
        let key = item.key().to_string();
        let nominal = item.nominal_start();
        let length = item.occurrence.entry.length();

        if self.state == DispatchState::Scheduled && !item.is_chained {
            tracing::info!(key = %key, "Scheduled content already playing, skipping occurrence");
            self.ledger.consume_start(nominal);
            self.emit(StationEvent::OccurrenceSkipped {
                key,
                reason: SkipReason::AlreadyScheduled,
            });
            return false;
        }

        if self.player.is_paused() && self.has_played {
            tracing::info!(key = %key, "Player paused at start, abandoning occurrence");
            self.ledger.consume_start(nominal);
            self.leave_scheduled_path();
            self.emit(StationEvent::OccurrenceSkipped {
                key,
                reason: SkipReason::PlayerPaused,
            });
            return false;
        }

        let offset = (now - nominal).max(Duration::zero());
        if offset >= length {
            tracing::info!(key = %key, offset_secs = offset.num_seconds(), "Occurrence is stale, skipping");
            if self.state != DispatchState::Scheduled {
                self.leave_scheduled_path();
            }
            self.emit(StationEvent::OccurrenceSkipped {
                key,
                reason: SkipReason::Stale,
            });
            if trigger == StartTrigger::Timer && self.now_playing.is_none() {
                self.play_next();
            }
            return false;
        }

        let position = match trigger {
            StartTrigger::Poll => 0.0,
            StartTrigger::Timer | StartTrigger::Join => offset.num_milliseconds() as f64 / 1000.0,
        };

        self.restore_volume();
        self.ledger.mark_used(UsageCategory::Scheduled, key.clone(), nominal);
        self.ledger.consume_start(nominal);
        self.preemption.in_scheduled_mode = true;
        self.set_state(DispatchState::Scheduled);

        let track = &item.occurrence.entry.track;
        let playing = NowPlaying {
            key: key.clone(),
            path: track.path.clone(),
            duration: track.duration,
            kind: PlayingKind::Scheduled {
                nominal_start: nominal,
                chained: item.is_chained,
            },
            started_at: now,
        };

        tracing::info!(
            key = %key,
            offset_secs = offset.num_seconds(),
            chained = item.is_chained,
            "Entering scheduled mode"
        );

        if !self.load(playing, Some(position)) {
            self.finish_scheduled();
            self.play_next();
            return false;
        }

        self.emit(StationEvent::ScheduledStarted {
            key,
            chained: item.is_chained,
            offset_secs: offset.num_seconds(),
        });
        true
    }

    fn finish_scheduled(&mut self) {
        let key = self.now_playing.as_ref().map(|n| n.key.clone()).unwrap_or_default();
        tracing::info!(key = %key, "Scheduled content finished");
        self.leave_scheduled_path();
        self.selector.reshuffle_junk(&self.catalog, &mut self.rng);
        self.emit(StationEvent::ScheduledEnded { key });

        let now = self.clock.now();
        self.evaluate_windows(now);
    }

    fn leave_scheduled_path(&mut self) {
        self.preemption.clear();
        self.restore_volume();
        self.set_state(DispatchState::Algorithmic);
    }

    // ------------------------------------------------------------------------
    // Pre-emption windows
    // ------------------------------------------------------------------------

    fn enter_window(&mut self, window: DispatchState) {
        if self.state == DispatchState::Scheduled {
            tracing::debug!(window = %window, "Warning ignored during scheduled content");
            return;
        }

        self.preemption.junk_only = true;
        if window == DispatchState::PreemptWarning5 {
            self.preemption.non_bumper_junk_only = true;
        }
        if window > self.state {
            self.set_state(window);
        }
    }

    /// Apply the window flags for the next non-exempt occurrence at `now`
    fn evaluate_windows(&mut self, now: NaiveDateTime) {
        let Some(start) = self.next_boundary(now) else {
            return;
        };
        let until = start - now;
        if until <= Duration::minutes(PreciseStrategy::WARNING_5) {
            self.enter_window(DispatchState::PreemptWarning5);
        } else if until <= Duration::minutes(PreciseStrategy::WARNING_15) {
            self.enter_window(DispatchState::PreemptWarning15);
        }
    }

    /// Effective start of the next occurrence rotation must yield to
    fn next_boundary(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        self.upcoming
            .items()
            .iter()
            .find(|i| i.effective_start > now && !self.is_exempt(i))
            .map(|i| i.effective_start)
    }

    fn is_exempt(&self, item: &ChainItem) -> bool {
        self.catalog
            .is_morning_hour(item.effective_start.hour() as u8)
    }

    // ------------------------------------------------------------------------
    // Fade
    // ------------------------------------------------------------------------

    fn start_fade(&mut self, key: &str, due: NaiveDateTime) {
        if !self.config.fade_supported
            || self.fade.is_some()
            || self.state == DispatchState::Scheduled
            || self.player.is_paused()
            || self.now_playing.is_none()
        {
            return;
        }

        tracing::info!(key, "Fading out");
        self.fade = Some(FadeProgress {
            original_volume: self.player.volume(),
        });
        let interval = self.config.fade_out() / FADE_STEPS as i32;
        for step in 1..=FADE_STEPS {
            self.timers
                .arm(due + interval * step as i32, TimerTask::FadeStep { step });
        }
        self.emit(StationEvent::FadeStarted);
    }

    fn fade_step(&mut self, step: u32) {
        let Some(fade) = self.fade else {
            return;
        };
        if step >= FADE_STEPS {
            self.restore_volume();
            return;
        }
        let remaining = 1.0 - step as f32 / FADE_STEPS as f32;
        self.player.set_volume(fade.original_volume * remaining);
    }

    fn restore_volume(&mut self) {
        if let Some(fade) = self.fade.take() {
            self.timers
                .cancel_where(|t| matches!(t, TimerTask::FadeStep { .. }));
            self.player.set_volume(fade.original_volume);
        }
    }

    // ------------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------------

    /// Put the next item on air
    fn play_next(&mut self) {
        let now = self.clock.now();

        if self.strategy.polls_on_select() {
            let chores = self.strategy.due_chores(now, &self.genres);
            if chores.reroll_genres {
                self.reroll_genres(now);
            }
            if chores.hourly {
                self.hourly_tasks(now);
            }
            while let Some(item) = self.upcoming.take_overdue(now) {
                if self.begin_scheduled(item, StartTrigger::Poll) {
                    return;
                }
            }
            self.evaluate_windows(now);
        }

        let next_boundary = self.next_boundary(now);
        let ctx = SelectionContext {
            catalog: &self.catalog,
            genres: &self.genres,
            preemption: self.preemption,
            next_boundary,
            now,
        };

        let selection = match self.selector.select_next(ctx, &mut self.ledger, &mut self.rng) {
            Ok(selection) => selection,
            Err(e) => {
                tracing::error!(error = %e, "No content to play");
                self.now_playing = None;
                self.emit(StationEvent::SelectionFailed {
                    reason: e.to_string(),
                });
                return;
            }
        };

        let position = self.first_track_position(&selection);
        let playing = NowPlaying::from_selection(&selection, now);
        let (key, path) = (playing.key.clone(), playing.path.clone());

        if self.load(playing, position) {
            tracing::info!(key = %key, category = %selection.category(), "Now playing");
            self.emit(StationEvent::TrackStarted {
                key,
                path,
                category: selection.category().to_string(),
                position,
            });
        } else {
            self.emit(StationEvent::SelectionFailed {
                reason: format!("could not load {path}"),
            });
        }
    }

    fn first_track_position(&mut self, selection: &Selection) -> Option<f64> {
        if !std::mem::take(&mut self.first_track) || !self.config.random_first_start {
            return None;
        }
        let duration = f64::from(selection.track().duration);
        if selection.is_junk() || duration < 2.0 {
            return None;
        }
        Some(self.rng.gen_range(0.0..duration * 0.9).floor())
    }

    // ------------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------------

    fn hourly_tasks(&mut self, now: NaiveDateTime) {
        let expired = self.ledger.clear_expired(now);
        for stale in self.upcoming.prune_stale(now) {
            tracing::info!(key = stale.key(), "Dropping elapsed occurrence");
            self.emit(StationEvent::OccurrenceSkipped {
                key: stale.key().to_string(),
                reason: SkipReason::Stale,
            });
        }
        let added = self.project(now);
        tracing::info!(hour = now.hour(), expired, added, "Hourly tasks done");
    }

    fn reroll_genres(&mut self, now: NaiveDateTime) {
        self.genres.reroll(&self.catalog, &mut self.rng, now);
        self.emit(StationEvent::GenresRerolled);
    }

    /// Project the current and next hour; returns newly added items
    fn project(&mut self, now: NaiveDateTime) -> usize {
        let ctx = ProjectionContext {
            catalog: &self.catalog,
            ledger: &self.ledger,
            genres: &self.genres,
        };
        let items = self.projector.project_window(ctx, now, &mut self.rng);
        let fade = self.config.fade_out();

        let mut added = 0;
        for item in items {
            if !self.upcoming.insert(item.clone()) {
                continue;
            }
            let exempt = self.is_exempt(&item);
            self.strategy.arm(&item, exempt, fade, now, &mut self.timers);
            added += 1;
        }

        tracing::debug!(added, upcoming = self.upcoming.len(), "Projection complete");
        self.emit(StationEvent::Projected {
            added,
            upcoming: self.upcoming.len(),
        });
        added
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Current effective instant
    pub fn effective_time(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Scheduled occurrence whose window contains now and has not played
    pub fn active_occurrence(&mut self) -> Option<Occurrence> {
        let now = self.clock.now();
        let ctx = ProjectionContext {
            catalog: &self.catalog,
            ledger: &self.ledger,
            genres: &self.genres,
        };
        self.projector.active_occurrence(ctx, now, &mut self.rng)
    }

    /// Upcoming ledger in start order
    pub fn upcoming(&self) -> &[ChainItem] {
        self.upcoming.items()
    }

    /// Drop occurrence timers and the upcoming ledger, then project again
    pub fn force_reprojection(&mut self) -> usize {
        let now = self.clock.now();
        let cancelled = self.timers.cancel_where(TimerTask::is_occurrence_task);
        self.upcoming.clear();
        let added = self.project(now);
        tracing::info!(cancelled, added, "Forced re-projection");
        self.evaluate_windows(now);
        added
    }

    /// Forget usage of one category
    pub fn clear_usage(&mut self, category: &UsageCategory) {
        tracing::info!(category = %category, "Clearing usage");
        self.ledger.clear_category(category);
    }

    /// Dispatcher state
    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Pre-emption flags
    pub fn preemption(&self) -> PreemptionState {
        self.preemption
    }

    /// Active strategy
    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Item handed to the player
    pub fn now_playing(&self) -> Option<&NowPlaying> {
        self.now_playing.as_ref()
    }

    /// Usage ledger
    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Morning genre assignments
    pub fn morning_genres(&self) -> &MorningGenres {
        &self.genres
    }

    /// Shared clock handle
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Catalog in use
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Player
    pub fn player(&self) -> &P {
        &self.player
    }

    /// Player, mutably
    pub fn player_mut(&mut self) -> &mut P {
        &mut self.player
    }

    /// Snapshot for operators
    pub fn status(&self) -> StationStatus {
        StationStatus {
            now: self.clock.now(),
            clock_mode: self.clock.mode(),
            strategy: self.strategy.kind(),
            state: self.state,
            preemption: self.preemption,
            now_playing: self.now_playing.clone(),
            upcoming: self
                .upcoming
                .items()
                .iter()
                .map(|i| UpcomingSummary {
                    key: i.key().to_string(),
                    effective_start: i.effective_start,
                    chained: i.is_chained,
                })
                .collect(),
            pending_timers: self.timers.len(),
            morning_genres: self
                .genres
                .assignments()
                .map(|(h, g)| (h, g.to_string()))
                .collect(),
            ledger: self
                .ledger
                .summary()
                .into_iter()
                .map(|(c, n)| (c.to_string(), n))
                .collect(),
        }
    }

    // ------------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------------

    fn set_state(&mut self, to: DispatchState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        tracing::debug!(from = %from, to = %to, "State change");
        self.emit(StationEvent::StateChanged { from, to });
    }

    fn emit(&self, event: StationEvent) {
        let _ = self.events.send(event);
    }
}

impl<P: Player> fmt::Debug for Station<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Station")
            .field("state", &self.state)
            .field("strategy", &self.strategy.kind())
            .field("preemption", &self.preemption)
            .field("upcoming", &self.upcoming.len())
            .field("timers", &self.timers.len())
            .finish()
    }
}

fn make_strategy(opportunistic: bool, now: NaiveDateTime) -> Box<dyn SchedulingStrategy> {
    if opportunistic {
        Box::new(OpportunisticStrategy::new(now))
    } else {
        Box::new(PreciseStrategy)
    }
}

// ============================================================================
// Status
// ============================================================================

/// One upcoming item in a status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct UpcomingSummary {
    pub key: String,
    pub effective_start: NaiveDateTime,
    pub chained: bool,
}

/// Station snapshot
#[derive(Debug, Clone, Serialize)]
pub struct StationStatus {
    pub now: NaiveDateTime,
    pub clock_mode: ClockMode,
    pub strategy: StrategyKind,
    pub state: DispatchState,
    pub preemption: PreemptionState,
    pub now_playing: Option<NowPlaying>,
    pub upcoming: Vec<UpcomingSummary>,
    pub pending_timers: usize,
    pub morning_genres: Vec<(u8, String)>,
    pub ledger: Vec<(String, usize)>,
}

impl StationStatus {
    /// Format as display string
    pub fn display(&self) -> String {
        let mut output = String::from("Station Status\n");
        output.push_str(&format!("{:-<40}\n", ""));
        output.push_str(&format!("Time: {}\n", self.now));
        output.push_str(&format!("Strategy: {}\n", self.strategy));
        output.push_str(&format!("State: {}\n", self.state));
        output.push_str(&format!(
            "Junk only: {} (non-bumper: {})\n",
            self.preemption.junk_only, self.preemption.non_bumper_junk_only
        ));

        match &self.now_playing {
            Some(np) => output.push_str(&format!("Now playing: {} ({}s)\n", np.key, np.duration)),
            None => output.push_str("Now playing: -\n"),
        }

        output.push_str(&format!("Upcoming: {}\n", self.upcoming.len()));
        for item in &self.upcoming {
            let chained = if item.chained { " (chained)" } else { "" };
            output.push_str(&format!("  {} {}{}\n", item.effective_start, item.key, chained));
        }
        output.push_str(&format!("Pending timers: {}\n", self.pending_timers));

        output
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Recurrence, ScheduledEntry, TimeOfDay, TrackRecord};
    use crate::player::{PlayerCommand, RecordingPlayer};
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn show(key: &str, time: &str, duration: u32) -> ScheduledEntry {
        ScheduledEntry::new(
            TrackRecord::new(key, format!("scheduled/{key}.mp3"), duration),
            TimeOfDay::parse(time).unwrap(),
            Recurrence::Daily,
        )
    }

    fn catalog(scheduled: Vec<ScheduledEntry>) -> Arc<Catalog> {
        let mut builder = Catalog::builder()
            .standard(TrackRecord::new("s1", "standard/s1.mp3", 240))
            .standard(TrackRecord::new("s2", "standard/s2.mp3", 200))
            .junk("ads", TrackRecord::new("ad1", "junk/ad1.mp3", 30))
            .junk("bumpers", TrackRecord::new("b1", "junk/b1.mp3", 5));
        for entry in scheduled {
            builder = builder.scheduled(entry);
        }
        Arc::new(builder.build())
    }

    fn station(
        scheduled: Vec<ScheduledEntry>,
        now: NaiveDateTime,
    ) -> (Station<RecordingPlayer>, RecordingPlayer, Clock) {
        let clock = Clock::simulated(now, 1);
        let player = RecordingPlayer::new();
        let config = StationConfig {
            rng_seed: Some(42),
            random_first_start: false,
            ..Default::default()
        };
        let station = Station::new(config, catalog(scheduled), clock.clone(), player.clone());
        (station, player, clock)
    }

    fn step(station: &mut Station<RecordingPlayer>, clock: &Clock, secs: i64) {
        for _ in 0..secs {
            clock.advance(Duration::seconds(1));
            station.tick();
        }
    }

    #[test]
    fn test_start_plays_rotation() {
        let (mut station, player, _clock) = station(vec![], at(12, 0, 0));
        station.start();

        assert_eq!(station.state(), DispatchState::Algorithmic);
        assert!(player.current_source().unwrap().starts_with("standard/"));
        assert!(station.now_playing().unwrap().duration > 0);
    }

    #[test]
    fn test_loaded_sets_position_and_plays() {
        let (mut station, player, _clock) = station(vec![show("news", "12:00:00", 600)], at(12, 1, 0));
        station.start();
        station.on_player_event(PlayerEvent::Loaded);

        let commands = player.commands();
        assert!(commands.contains(&PlayerCommand::SetPosition { seconds: 60.0 }));
        assert_eq!(commands.last(), Some(&PlayerCommand::Play));
        assert_eq!(station.state(), DispatchState::Scheduled);
    }

    #[test]
    fn test_scheduled_start_with_fade() {
        let (mut station, player, clock) = station(vec![show("news", "12:10:00", 300)], at(12, 9, 50));
        station.start();
        station.on_player_event(PlayerEvent::Loaded);
        let mut events = station.subscribe();

        step(&mut station, &clock, 10);

        assert_eq!(station.state(), DispatchState::Scheduled);
        assert_eq!(player.current_source().as_deref(), Some("scheduled/news.mp3"));
        assert!(station.preemption().in_scheduled_mode);
        assert_eq!(station.player().volume(), 1.0);

        let mut saw_fade = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, StationEvent::FadeStarted) {
                saw_fade = true;
            }
        }
        assert!(saw_fade);
    }

    #[test]
    fn test_scheduled_end_clears_flags() {
        let (mut station, _player, clock) = station(vec![show("news", "12:10:00", 60)], at(12, 9, 58));
        station.start();
        assert_eq!(station.state(), DispatchState::PreemptWarning5);

        step(&mut station, &clock, 2);
        assert_eq!(station.state(), DispatchState::Scheduled);

        station.on_player_event(PlayerEvent::Loaded);
        station.on_player_event(PlayerEvent::Ended);

        assert_eq!(station.state(), DispatchState::Algorithmic);
        assert_eq!(station.preemption(), PreemptionState::default());
    }

    #[test]
    fn test_player_error_returns_to_rotation() {
        let (mut station, player, _clock) = station(vec![show("news", "12:00:00", 600)], at(12, 0, 30));
        station.start();
        assert_eq!(station.state(), DispatchState::Scheduled);

        station.on_player_event(PlayerEvent::Error {
            reason: "decode".into(),
        });

        assert_eq!(station.state(), DispatchState::Algorithmic);
        assert!(!player.current_source().unwrap().starts_with("scheduled/"));
    }

    #[test]
    fn test_paused_player_abandons_occurrence() {
        let (mut station, player, clock) = station(vec![show("news", "12:10:00", 300)], at(12, 9, 0));
        station.start();
        station.on_player_event(PlayerEvent::Loaded);
        station.player_mut().pause();

        step(&mut station, &clock, 60);

        assert_eq!(station.state(), DispatchState::Algorithmic);
        assert!(station.upcoming().is_empty());
        assert!(!player.sources().iter().any(|s| s.starts_with("scheduled/")));
    }

    #[test]
    fn test_reset_discards_armed_timers() {
        let (mut station, player, clock) = station(vec![show("news", "12:10:00", 300)], at(12, 9, 0));
        station.start();
        let old_deadline = station.next_deadline();
        assert!(old_deadline.is_some());

        // Pop the start timer before resetting, as a slow driver might
        clock.set(at(12, 10, 0));
        let popped: Vec<_> = station.timers.pop_due(clock.now());
        station.reset();
        player.clear();

        for timer in popped {
            station.fire(timer);
        }
        assert!(player.sources().is_empty());
    }

    #[test]
    fn test_force_reprojection_and_clear_usage() {
        let (mut station, _player, _clock) = station(vec![show("news", "12:30:00", 300)], at(12, 0, 0));
        station.start();
        assert_eq!(station.upcoming().len(), 1);

        assert_eq!(station.force_reprojection(), 1);
        assert_eq!(station.upcoming().len(), 1);

        station.clear_usage(&UsageCategory::Standard);
        assert_eq!(station.ledger().len(&UsageCategory::Standard), 0);
    }

    #[test]
    fn test_skip_during_scheduled() {
        let (mut station, _player, _clock) = station(vec![show("news", "12:00:00", 600)], at(12, 0, 30));
        station.start();
        assert_eq!(station.state(), DispatchState::Scheduled);

        station.skip();
        assert_eq!(station.state(), DispatchState::Algorithmic);
        assert!(station.now_playing().is_some());
    }

    #[test]
    fn test_status_snapshot() {
        let (mut station, _player, _clock) = station(vec![show("news", "12:30:00", 300)], at(12, 0, 0));
        station.start();

        let status = station.status();
        assert_eq!(status.strategy, StrategyKind::Precise);
        assert_eq!(status.upcoming.len(), 1);
        assert!(status.display().contains("news"));
        assert!(serde_json::to_string(&status).is_ok());
    }
}
