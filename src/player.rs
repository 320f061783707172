//! Player collaborator
//!
//! The scheduler never renders audio. It drives a [`Player`] through a small
//! command surface and reacts to the [`PlayerEvent`]s the player reports back.
//!
//! Two implementations ship with the crate:
//! - [`RecordingPlayer`]: records every command, events are injected by hand
//! - [`SimulatedPlayer`]: emits `Loaded`/`Ended` on its own from catalog
//!   durations and the scheduler clock, used by the CLI dry runs

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::scheduler::clock::Clock;
use crate::scheduler::error::{SchedulerError, SchedulerResult};

// ============================================================================
// Player Trait
// ============================================================================

/// Notification from the player
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// Source metadata is available; position can be set
    Loaded,
    /// Current source played to the end
    Ended,
    /// Source failed to load or play
    Error { reason: String },
}

/// Playback primitives the scheduler relies on
pub trait Player: Send {
    /// Load a new source, replacing the current one
    fn set_source(&mut self, path: &str) -> SchedulerResult<()>;

    /// Seek within the current source
    fn set_position(&mut self, seconds: f64);

    /// Start or resume playback
    fn play(&mut self) -> SchedulerResult<()>;

    /// Pause playback
    fn pause(&mut self);

    /// Whether playback is paused
    fn is_paused(&self) -> bool;

    /// Current volume in `[0.0, 1.0]`
    fn volume(&self) -> f32;

    /// Set volume in `[0.0, 1.0]`
    fn set_volume(&mut self, volume: f32);

    /// Events the player generated on its own since the last call
    ///
    /// Players that deliver events through a channel keep the default.
    fn poll_events(&mut self) -> Vec<PlayerEvent> {
        Vec::new()
    }
}

/// A command issued to a player, as recorded by [`RecordingPlayer`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PlayerCommand {
    SetSource { path: String },
    SetPosition { seconds: f64 },
    Play,
    Pause,
    SetVolume { volume: f32 },
}

// ============================================================================
// Recording Player
// ============================================================================

/// Player that only records commands
///
/// Clones share the command log, so a test can keep a handle after moving the
/// player into a station.
#[derive(Debug, Clone)]
pub struct RecordingPlayer {
    log: Arc<Mutex<Vec<PlayerCommand>>>,
    paused: bool,
    volume: f32,
    fail_sources: Arc<Mutex<Vec<String>>>,
}

impl Default for RecordingPlayer {
    fn default() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            paused: true,
            volume: 1.0,
            fail_sources: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl RecordingPlayer {
    /// Create a paused player at full volume
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every command so far
    pub fn commands(&self) -> Vec<PlayerCommand> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Paths passed to `set_source`, in order
    pub fn sources(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                PlayerCommand::SetSource { path } => Some(path),
                _ => None,
            })
            .collect()
    }

    /// Most recent source
    pub fn current_source(&self) -> Option<String> {
        self.sources().pop()
    }

    /// Forget recorded commands
    pub fn clear(&self) {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Make `set_source` fail for `path`
    pub fn fail_on(&self, path: impl Into<String>) {
        self.fail_sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.into());
    }

    fn record(&self, command: PlayerCommand) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command);
    }
}

impl Player for RecordingPlayer {
    fn set_source(&mut self, path: &str) -> SchedulerResult<()> {
        self.record(PlayerCommand::SetSource {
            path: path.to_string(),
        });
        let failing = self
            .fail_sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|p| p == path);
        if failing {
            return Err(SchedulerError::player(format!("cannot load {path}")));
        }
        Ok(())
    }

    fn set_position(&mut self, seconds: f64) {
        self.record(PlayerCommand::SetPosition { seconds });
    }

    fn play(&mut self) -> SchedulerResult<()> {
        self.paused = false;
        self.record(PlayerCommand::Play);
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
        self.record(PlayerCommand::Pause);
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.record(PlayerCommand::SetVolume {
            volume: self.volume,
        });
    }
}

// ============================================================================
// Simulated Player
// ============================================================================

#[derive(Debug, Clone)]
struct Loaded {
    path: String,
    duration: u32,
    position: f64,
    started: Option<NaiveDateTime>,
    announced: bool,
}

/// Player that pretends to play files of known duration
///
/// Call [`SimulatedPlayer::poll`] to collect the events that are due at the
/// current clock instant.
#[derive(Debug)]
pub struct SimulatedPlayer {
    clock: Clock,
    durations: HashMap<String, u32>,
    current: Option<Loaded>,
    paused: bool,
    volume: f32,
}

impl SimulatedPlayer {
    /// Create a player that knows the duration of every path in `durations`
    pub fn new(clock: Clock, durations: HashMap<String, u32>) -> Self {
        Self {
            clock,
            durations,
            current: None,
            paused: true,
            volume: 1.0,
        }
    }

    /// Path of the loaded source
    pub fn current_path(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.path.as_str())
    }

    /// Instant at which the current source will end, if playing
    pub fn ends_at(&self) -> Option<NaiveDateTime> {
        let current = self.current.as_ref()?;
        let started = current.started?;
        let remaining = (f64::from(current.duration) - current.position).max(0.0);
        Some(started + Duration::milliseconds((remaining * 1000.0) as i64))
    }

    /// Events due now
    pub fn poll(&mut self) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        let now = self.clock.now();
        let ends_at = self.ends_at();

        let Some(current) = self.current.as_mut() else {
            return events;
        };

        if !current.announced {
            current.announced = true;
            events.push(PlayerEvent::Loaded);
            return events;
        }

        if let Some(end) = ends_at {
            if !self.paused && now >= end {
                tracing::debug!(path = %current.path, "Simulated track ended");
                self.current = None;
                events.push(PlayerEvent::Ended);
            }
        }
        events
    }
}

impl Player for SimulatedPlayer {
    fn set_source(&mut self, path: &str) -> SchedulerResult<()> {
        let duration = *self
            .durations
            .get(path)
            .ok_or_else(|| SchedulerError::player(format!("unknown source {path}")))?;
        self.current = Some(Loaded {
            path: path.to_string(),
            duration,
            position: 0.0,
            started: None,
            announced: false,
        });
        Ok(())
    }

    fn set_position(&mut self, seconds: f64) {
        if let Some(current) = self.current.as_mut() {
            current.position = seconds.clamp(0.0, f64::from(current.duration));
            if current.started.is_some() {
                current.started = Some(self.clock.now());
            }
        }
    }

    fn play(&mut self) -> SchedulerResult<()> {
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| SchedulerError::player("play without a source"))?;
        if current.started.is_none() {
            current.started = Some(self.clock.now());
        }
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        let now = self.clock.now();
        if let Some(current) = self.current.as_mut() {
            if let Some(started) = current.started.take() {
                current.position += (now - started).num_milliseconds() as f64 / 1000.0;
            }
        }
        self.paused = true;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn poll_events(&mut self) -> Vec<PlayerEvent> {
        self.poll()
    }
}

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
    fn test_recording_player_logs_commands() {
        let mut player = RecordingPlayer::new();
        let handle = player.clone();

        player.set_source("a.mp3").unwrap();
        player.set_position(12.0);
        player.play().unwrap();
        player.set_volume(1.5);

        assert_eq!(handle.sources(), vec!["a.mp3".to_string()]);
        assert_eq!(handle.commands().len(), 4);
        assert!(!player.is_paused());
        assert_eq!(player.volume(), 1.0);
    }

    #[test]
    fn test_recording_player_failure_injection() {
        let mut player = RecordingPlayer::new();
        player.fail_on("bad.mp3");
        assert!(player.set_source("bad.mp3").is_err());
        assert!(player.set_source("good.mp3").is_ok());
    }

    #[test]
    fn test_simulated_player_lifecycle() {
        let clock = Clock::simulated(at(10, 0, 0), 1);
        let durations = HashMap::from([("a.mp3".to_string(), 30)]);
        let mut player = SimulatedPlayer::new(clock.clone(), durations);

        assert!(player.set_source("missing.mp3").is_err());

        player.set_source("a.mp3").unwrap();
        assert_eq!(player.poll(), vec![PlayerEvent::Loaded]);

        player.set_position(10.0);
        player.play().unwrap();
        assert_eq!(player.ends_at(), Some(at(10, 0, 20)));

        clock.advance(Duration::seconds(19));
        assert!(player.poll().is_empty());

        clock.advance(Duration::seconds(1));
        assert_eq!(player.poll(), vec![PlayerEvent::Ended]);
        assert!(player.current_path().is_none());
    }

    #[test]
    fn test_simulated_player_pause_holds_position() {
        let clock = Clock::simulated(at(10, 0, 0), 1);
        let durations = HashMap::from([("a.mp3".to_string(), 30)]);
        let mut player = SimulatedPlayer::new(clock.clone(), durations);

        player.set_source("a.mp3").unwrap();
        player.poll();
        player.play().unwrap();
        clock.advance(Duration::seconds(10));
        player.pause();

        clock.advance(Duration::minutes(5));
        assert!(player.poll().is_empty());
        assert!(player.is_paused());
    }
}
