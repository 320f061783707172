//! Common test utilities

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use onair::catalog::{Catalog, CatalogBuilder};
use onair::models::{Recurrence, ScheduledEntry, TimeOfDay, TrackRecord};
use onair::player::RecordingPlayer;
use onair::scheduler::{Clock, Station, StationConfig};
use std::sync::Arc;

/// Monday 2024-01-15 at the given time
pub fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    day(2024, 1, 15).and_hms_opt(h, m, s).unwrap()
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Scheduled entry playing `scheduled/<key>.mp3`
pub fn scheduled(key: &str, time: &str, duration: u32, recurrence: Recurrence) -> ScheduledEntry {
    ScheduledEntry::new(
        TrackRecord::new(key, format!("scheduled/{key}.mp3"), duration),
        TimeOfDay::parse(time).unwrap(),
        recurrence,
    )
}

pub fn daily(key: &str, time: &str, duration: u32) -> ScheduledEntry {
    scheduled(key, time, duration, Recurrence::Daily)
}

/// Standard rotation of three tracks plus ads and bumpers
pub fn base_catalog() -> CatalogBuilder {
    Catalog::builder()
        .standard(TrackRecord::new("s1", "standard/s1.mp3", 240))
        .standard(TrackRecord::new("s2", "standard/s2.mp3", 200))
        .standard(TrackRecord::new("s3", "standard/s3.mp3", 180))
        .junk("ads", TrackRecord::new("ad1", "junk/ad1.mp3", 30))
        .junk("ads", TrackRecord::new("ad2", "junk/ad2.mp3", 25))
        .junk("bumpers", TrackRecord::new("b1", "junk/b1.mp3", 5))
        .junk("bumpers", TrackRecord::new("b2", "junk/b2.mp3", 6))
}

pub fn catalog_with(entries: Vec<ScheduledEntry>) -> Arc<Catalog> {
    let builder = entries
        .into_iter()
        .fold(base_catalog(), |builder, entry| builder.scheduled(entry));
    Arc::new(builder.build())
}

/// Deterministic station settings
pub fn test_config() -> StationConfig {
    StationConfig {
        rng_seed: Some(2024),
        random_first_start: false,
        ..Default::default()
    }
}

pub struct Harness {
    pub station: Station<RecordingPlayer>,
    pub player: RecordingPlayer,
    pub clock: Clock,
}

impl Harness {
    pub fn new(catalog: Arc<Catalog>, now: NaiveDateTime, config: StationConfig) -> Self {
        let clock = Clock::simulated(now, 1);
        let player = RecordingPlayer::new();
        let station = Station::new(config, catalog, clock.clone(), player.clone());
        Self {
            station,
            player,
            clock,
        }
    }

    pub fn with_entries(entries: Vec<ScheduledEntry>, now: NaiveDateTime) -> Self {
        Self::new(catalog_with(entries), now, test_config())
    }

    /// Advance one second at a time, firing timers after each step
    pub fn step(&mut self, secs: i64) {
        for _ in 0..secs {
            self.clock.advance(Duration::seconds(1));
            self.station.tick();
        }
    }

    /// Jump to `instant` and fire everything due
    pub fn jump(&mut self, instant: NaiveDateTime) {
        self.clock.set(instant);
        self.station.tick();
    }

    pub fn sources_under(&self, prefix: &str) -> Vec<String> {
        self.player
            .sources()
            .into_iter()
            .filter(|s| s.starts_with(prefix))
            .collect()
    }
}

/// Catalog document in the preprocessed JSON layout
pub fn sample_catalog_json() -> &'static str {
    r#"{
        "preprocessed": {
            "timeSlots": {
                "lateNightLoFis": { "tracks": [
                    { "key": "ln1", "path": "lofi/ln1.mp3", "duration": 200 }
                ] },
                "morning": { "genres": {
                    "jazz": { "tracks": [
                        { "key": "mj1", "path": "morning/jazz/mj1.mp3", "duration": 210 }
                    ] }
                } },
                "standard": { "tracks": [
                    { "key": "s1", "path": "standard/s1.mp3", "duration": 240 },
                    { "key": "s2", "path": "standard/s2.mp3", "duration": 200 }
                ] },
                "morningHours": [6, 7],
                "hourToTimeSlot": { "0": "lateNight", "6": "morning", "7": "morning" }
            },
            "junkContent": {
                "cycleOrder": ["ads", "bumpers"],
                "types": {
                    "ads": { "tracks": [ { "key": "ad1", "path": "junk/ad1.mp3", "duration": 30 } ] },
                    "bumpers": { "tracks": [ { "key": "b1", "path": "junk/b1.mp3", "duration": 5 } ] }
                }
            },
            "scheduledTracks": {
                "byHour": {
                    "9": [
                        {
                            "trackKey": "news",
                            "time": "09:00:00",
                            "trackData": { "path": "scheduled/news.mp3", "duration": 300 }
                        },
                        {
                            "trackKey": "broken",
                            "time": "09:30:00",
                            "trackData": { "path": "scheduled/broken.mp3" }
                        }
                    ]
                }
            }
        },
        "metadata": { "generatedAt": "2024-01-01T00:00:00Z" }
    }"#
}
