//! Runtime driver
//!
//! Runs a [`Station`] on tokio: sleeps until the next timer deadline, feeds
//! player notifications in, and watches how late the host delivers its sleeps.
//! A host that keeps oversleeping gets the station switched to the
//! opportunistic strategy once.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;

use super::dispatcher::Station;
use super::error::{SchedulerError, SchedulerResult};
use super::strategy::StrategyKind;
use crate::player::{Player, PlayerEvent};

/// Bound on back-to-back self-generated player events handled per wake
const MAX_DRAIN_ROUNDS: usize = 16;

// ============================================================================
// Driver Configuration
// ============================================================================

/// Configuration for the station driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Longest single sleep, in real milliseconds
    pub max_sleep_ms: u64,

    /// Whether to watch timer accuracy at all
    pub monitor_timers: bool,

    /// Samples averaged by the reliability monitor
    pub reliability_samples: usize,

    /// Average relative error that trips the monitor
    pub reliability_threshold: f64,

    /// Sleeps shorter than this are not sampled
    pub min_sample_ms: u64,

    /// Capacity of the player event channel
    pub event_buffer: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_sleep_ms: 1000,
            monitor_timers: true,
            reliability_samples: 5,
            reliability_threshold: 0.2,
            min_sample_ms: 50,
            event_buffer: 64,
        }
    }
}

impl DriverConfig {
    /// Create a new config builder
    pub fn builder() -> DriverConfigBuilder {
        DriverConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.max_sleep_ms == 0 {
            return Err(SchedulerError::config(
                "max_sleep_ms",
                "Sleep cap must be positive",
            ));
        }

        if self.reliability_samples == 0 {
            return Err(SchedulerError::config(
                "reliability_samples",
                "At least one sample is required",
            ));
        }

        if self.reliability_threshold.is_nan() || self.reliability_threshold <= 0.0 {
            return Err(SchedulerError::config(
                "reliability_threshold",
                format!("Threshold must be positive, got {}", self.reliability_threshold),
            ));
        }

        if self.event_buffer == 0 {
            return Err(SchedulerError::config(
                "event_buffer",
                "Event channel needs capacity",
            ));
        }

        Ok(())
    }

    fn max_sleep(&self) -> StdDuration {
        StdDuration::from_millis(self.max_sleep_ms)
    }
}

/// Builder for DriverConfig
#[derive(Debug, Default)]
pub struct DriverConfigBuilder {
    max_sleep_ms: Option<u64>,
    monitor_timers: Option<bool>,
    reliability_samples: Option<usize>,
    reliability_threshold: Option<f64>,
    min_sample_ms: Option<u64>,
    event_buffer: Option<usize>,
}

impl DriverConfigBuilder {
    /// Set the sleep cap
    pub fn max_sleep_ms(mut self, ms: u64) -> Self {
        self.max_sleep_ms = Some(ms);
        self
    }

    /// Enable or disable the reliability monitor
    pub fn monitor_timers(mut self, value: bool) -> Self {
        self.monitor_timers = Some(value);
        self
    }

    /// Set the monitor window
    pub fn reliability_samples(mut self, samples: usize) -> Self {
        self.reliability_samples = Some(samples);
        self
    }

    /// Set the monitor threshold
    pub fn reliability_threshold(mut self, threshold: f64) -> Self {
        self.reliability_threshold = Some(threshold);
        self
    }

    /// Set the shortest sampled sleep
    pub fn min_sample_ms(mut self, ms: u64) -> Self {
        self.min_sample_ms = Some(ms);
        self
    }

    /// Set the player event channel capacity
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = Some(capacity);
        self
    }

    /// Build the config
    pub fn build(self) -> SchedulerResult<DriverConfig> {
        let defaults = DriverConfig::default();
        let config = DriverConfig {
            max_sleep_ms: self.max_sleep_ms.unwrap_or(defaults.max_sleep_ms),
            monitor_timers: self.monitor_timers.unwrap_or(defaults.monitor_timers),
            reliability_samples: self
                .reliability_samples
                .unwrap_or(defaults.reliability_samples),
            reliability_threshold: self
                .reliability_threshold
                .unwrap_or(defaults.reliability_threshold),
            min_sample_ms: self.min_sample_ms.unwrap_or(defaults.min_sample_ms),
            event_buffer: self.event_buffer.unwrap_or(defaults.event_buffer),
        };
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Timer Reliability Monitor
// ============================================================================

/// Rolling record of how accurately the host delivers sleeps
#[derive(Debug, Clone)]
pub struct TimerReliabilityMonitor {
    capacity: usize,
    threshold: f64,
    samples: VecDeque<f64>,
    tripped: bool,
}

impl TimerReliabilityMonitor {
    /// Create a monitor averaging `capacity` samples against `threshold`
    pub fn new(capacity: usize, threshold: f64) -> Self {
        Self {
            capacity: capacity.max(1),
            threshold,
            samples: VecDeque::with_capacity(capacity),
            tripped: false,
        }
    }

    /// Record one sleep; returns true the first time the average error trips
    pub fn record(&mut self, expected: StdDuration, actual: StdDuration) -> bool {
        if expected.is_zero() {
            return false;
        }

        let error = (actual.as_secs_f64() - expected.as_secs_f64()).abs() / expected.as_secs_f64();
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(error);

        if self.tripped || self.samples.len() < self.capacity {
            return false;
        }

        let average = self.average_error().unwrap_or(0.0);
        if average > self.threshold {
            tracing::warn!(
                average_error = average,
                threshold = self.threshold,
                "Timers are unreliable"
            );
            self.tripped = true;
            return true;
        }
        false
    }

    /// Mean relative error over the window
    pub fn average_error(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Whether the monitor has tripped
    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// Samples currently held
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

// ============================================================================
// Station Driver
// ============================================================================

enum Wake {
    Timer {
        expected: StdDuration,
        actual: StdDuration,
        sampled: bool,
    },
    Player(PlayerEvent),
    Stop,
}

/// Runs a station until stopped
pub struct StationDriver<P: Player> {
    config: DriverConfig,
    station: Arc<Mutex<Station<P>>>,
    monitor: TimerReliabilityMonitor,
    player_tx: mpsc::Sender<PlayerEvent>,
    player_rx: mpsc::Receiver<PlayerEvent>,
    is_running: Arc<RwLock<bool>>,
}

impl<P: Player + 'static> StationDriver<P> {
    /// Create a driver for `station`
    pub fn new(config: DriverConfig, station: Station<P>) -> SchedulerResult<Self> {
        config.validate()?;

        let (player_tx, player_rx) = mpsc::channel(config.event_buffer);
        let monitor =
            TimerReliabilityMonitor::new(config.reliability_samples, config.reliability_threshold);

        Ok(Self {
            config,
            station: Arc::new(Mutex::new(station)),
            monitor,
            player_tx,
            player_rx,
            is_running: Arc::new(RwLock::new(false)),
        })
    }

    /// Create with default config
    pub fn with_defaults(station: Station<P>) -> SchedulerResult<Self> {
        Self::new(DriverConfig::default(), station)
    }

    /// Handle for stopping the driver and delivering player events
    pub fn handle(&self) -> DriverHandle<P> {
        DriverHandle {
            station: Arc::clone(&self.station),
            player_tx: self.player_tx.clone(),
            is_running: Arc::clone(&self.is_running),
        }
    }

    /// Start the station and run until stopped
    pub async fn run(mut self) -> SchedulerResult<()> {
        *self.is_running.write().await = true;

        {
            let mut station = self.station.lock().await;
            station.start();
            drain_player(&mut station);
        }

        while *self.is_running.read().await {
            let (sleep_for, sampled) = self.next_sleep().await;
            let started = Instant::now();

            let wake = tokio::select! {
                _ = tokio::time::sleep(sleep_for) => Wake::Timer {
                    expected: sleep_for,
                    actual: started.elapsed(),
                    sampled,
                },
                Some(event) = self.player_rx.recv() => Wake::Player(event),
                _ = wait_for_stop(&self.is_running) => Wake::Stop,
            };

            match wake {
                Wake::Timer {
                    expected,
                    actual,
                    sampled,
                } => self.on_timer_wake(expected, actual, sampled).await,
                Wake::Player(event) => {
                    let mut station = self.station.lock().await;
                    station.on_player_event(event);
                    drain_player(&mut station);
                }
                Wake::Stop => break,
            }
        }

        tracing::info!("Station driver stopped");
        Ok(())
    }

    /// Real time to sleep and whether the sleep is worth sampling
    async fn next_sleep(&self) -> (StdDuration, bool) {
        let station = self.station.lock().await;
        let cap = self.config.max_sleep();

        let Some(deadline) = station.next_deadline() else {
            return (cap, false);
        };

        let now = station.effective_time();
        let remaining = (deadline - now).to_std().unwrap_or(StdDuration::ZERO);
        let until = scale_by_rate(remaining, station.clock().rate());

        if until >= cap {
            (cap, false)
        } else {
            let sampled = until >= StdDuration::from_millis(self.config.min_sample_ms);
            (until, sampled)
        }
    }

    async fn on_timer_wake(&mut self, expected: StdDuration, actual: StdDuration, sampled: bool) {
        let mut station = self.station.lock().await;

        if sampled
            && self.config.monitor_timers
            && station.strategy() == StrategyKind::Precise
            && self.monitor.record(expected, actual)
        {
            station.switch_to_opportunistic();
        }

        station.tick();
        drain_player(&mut station);
    }
}

/// Deliver events the player produced on its own
fn drain_player<P: Player>(station: &mut Station<P>) {
    for _ in 0..MAX_DRAIN_ROUNDS {
        let events = station.player_mut().poll_events();
        if events.is_empty() {
            return;
        }
        for event in events {
            station.on_player_event(event);
        }
    }
    tracing::warn!("Player kept producing events, deferring the rest");
}

/// Real time covering `clock_time` on a clock running `rate` times faster
fn scale_by_rate(clock_time: StdDuration, rate: i64) -> StdDuration {
    let divisor = u32::try_from(rate.max(1)).unwrap_or(u32::MAX);
    clock_time / divisor
}

async fn wait_for_stop(is_running: &RwLock<bool>) {
    loop {
        if !*is_running.read().await {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(100)).await;
    }
}

// ============================================================================
// Driver Handle
// ============================================================================

/// Cloneable control handle for a running driver
pub struct DriverHandle<P: Player> {
    station: Arc<Mutex<Station<P>>>,
    player_tx: mpsc::Sender<PlayerEvent>,
    is_running: Arc<RwLock<bool>>,
}

impl<P: Player> Clone for DriverHandle<P> {
    fn clone(&self) -> Self {
        Self {
            station: Arc::clone(&self.station),
            player_tx: self.player_tx.clone(),
            is_running: Arc::clone(&self.is_running),
        }
    }
}

impl<P: Player> DriverHandle<P> {
    /// Stop the driver loop
    pub async fn stop(&self) {
        *self.is_running.write().await = false;
    }

    /// Check if the driver is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Deliver a player notification
    pub async fn send(&self, event: PlayerEvent) -> SchedulerResult<()> {
        self.player_tx
            .send(event)
            .await
            .map_err(|_| SchedulerError::player("driver is no longer receiving events"))
    }

    /// Shared station, for queries and operator actions
    pub fn station(&self) -> Arc<Mutex<Station<P>>> {
        Arc::clone(&self.station)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::models::TrackRecord;
    use crate::player::{PlayerCommand, RecordingPlayer};
    use crate::scheduler::clock::Clock;
    use crate::scheduler::dispatcher::StationConfig;
    use chrono::NaiveDate;

    fn ms(v: u64) -> StdDuration {
        StdDuration::from_millis(v)
    }

    fn station(player: RecordingPlayer) -> Station<RecordingPlayer> {
        let catalog = Catalog::builder()
            .standard(TrackRecord::new("s1", "standard/s1.mp3", 240))
            .junk("ads", TrackRecord::new("ad1", "junk/ad1.mp3", 30))
            .build();
        let start = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let config = StationConfig {
            rng_seed: Some(7),
            random_first_start: false,
            ..Default::default()
        };
        Station::new(config, Arc::new(catalog), Clock::simulated(start, 1), player)
    }

    #[test]
    fn test_driver_config_default() {
        let config = DriverConfig::default();
        assert_eq!(config.max_sleep_ms, 1000);
        assert_eq!(config.reliability_samples, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_driver_config_builder() {
        let config = DriverConfig::builder()
            .max_sleep_ms(250)
            .reliability_threshold(0.5)
            .monitor_timers(false)
            .build()
            .unwrap();
        assert_eq!(config.max_sleep_ms, 250);
        assert!(!config.monitor_timers);

        assert!(DriverConfig::builder().max_sleep_ms(0).build().is_err());
        assert!(DriverConfig::builder()
            .reliability_threshold(f64::NAN)
            .build()
            .is_err());
    }

    #[test]
    fn test_scale_by_rate() {
        assert_eq!(scale_by_rate(ms(6000), 1), ms(6000));
        assert_eq!(scale_by_rate(ms(6000), 60), ms(100));
        assert_eq!(scale_by_rate(ms(6000), 0), ms(6000));
        assert_eq!(scale_by_rate(ms(6000), -5), ms(6000));

        // Rates past u32 saturate instead of wrapping to zero
        let huge = StdDuration::from_secs(1 << 40);
        assert_eq!(scale_by_rate(huge, 1 << 32), huge / u32::MAX);
        assert_eq!(scale_by_rate(huge, i64::MAX), huge / u32::MAX);
    }

    #[test]
    fn test_monitor_needs_full_window() {
        let mut monitor = TimerReliabilityMonitor::new(5, 0.2);
        for _ in 0..4 {
            assert!(!monitor.record(ms(100), ms(300)));
        }
        assert!(monitor.record(ms(100), ms(300)));
        assert!(monitor.is_tripped());

        // Trips once
        assert!(!monitor.record(ms(100), ms(300)));
    }

    #[test]
    fn test_monitor_accurate_timers() {
        let mut monitor = TimerReliabilityMonitor::new(5, 0.2);
        for _ in 0..20 {
            assert!(!monitor.record(ms(500), ms(510)));
        }
        assert!(!monitor.is_tripped());
        assert_eq!(monitor.sample_count(), 5);
        assert!(monitor.average_error().unwrap() < 0.05);
    }

    #[test]
    fn test_monitor_window_rolls() {
        let mut monitor = TimerReliabilityMonitor::new(3, 0.2);
        monitor.record(ms(100), ms(400));
        monitor.record(ms(100), ms(100));
        monitor.record(ms(100), ms(100));
        // Average (3.0 + 0 + 0) / 3 trips on the third sample
        assert!(monitor.is_tripped());

        let mut monitor = TimerReliabilityMonitor::new(3, 0.2);
        monitor.record(ms(100), ms(100));
        monitor.record(ms(100), ms(100));
        monitor.record(ms(100), ms(130));
        assert!(!monitor.is_tripped());
        assert!(!monitor.record(StdDuration::ZERO, ms(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_delivers_player_events() {
        let player = RecordingPlayer::new();
        let driver = StationDriver::with_defaults(station(player.clone())).unwrap();
        let handle = driver.handle();
        let task = tokio::spawn(driver.run());

        tokio::time::sleep(ms(50)).await;
        assert!(handle.is_running().await);
        assert_eq!(player.sources(), vec!["standard/s1.mp3".to_string()]);

        handle.send(PlayerEvent::Loaded).await.unwrap();
        tokio::time::sleep(ms(50)).await;
        assert_eq!(player.commands().last(), Some(&PlayerCommand::Play));

        handle.stop().await;
        task.await.unwrap().unwrap();
        assert!(!handle.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_handle_exposes_station() {
        let driver = StationDriver::with_defaults(station(RecordingPlayer::new())).unwrap();
        let handle = driver.handle();
        let task = tokio::spawn(driver.run());

        tokio::time::sleep(ms(10)).await;
        {
            let station = handle.station();
            let station = station.lock().await;
            assert_eq!(station.strategy(), StrategyKind::Precise);
            assert!(station.now_playing().is_some());
        }

        handle.stop().await;
        task.await.unwrap().unwrap();
    }
}
