//! Read-only content catalog
//!
//! The catalog is produced by an external build step (directory scan plus
//! duration probing) and consumed here as JSON. Loading indexes the data once:
//!
//! - Rotation tracks bucketed by time slot, morning tracks by genre
//! - Junk tracks bucketed by type, plus the base junk cycle order
//! - Scheduled entries bucketed by hour of day
//!
//! Malformed records are excluded with a warning instead of failing the load.
//!
//! # Example
//!
//! ```rust,ignore
//! use onair::catalog::Catalog;
//!
//! let catalog = Catalog::from_file(Path::new("tracks.json"))?;
//! for entry in catalog.scheduled_for_hour(9) {
//!     println!("{} at {}", entry.key(), entry.time_of_day);
//! }
//! ```

pub mod validate;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{is_bumper, Recurrence, ScheduledEntry, TimeOfDay, TimeSlot, TrackRecord};

// ============================================================================
// Errors and Warnings
// ============================================================================

/// Errors that prevent a catalog from loading at all
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Catalog file could not be read
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Catalog JSON is not structurally valid
    #[error("Invalid catalog JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A record excluded while loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogWarning {
    /// Where the record was found
    pub context: String,
    /// Why it was excluded
    pub reason: String,
}

impl CatalogWarning {
    fn new(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CatalogWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.reason)
    }
}

// ============================================================================
// Raw JSON Shape
// ============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDocument {
    Wrapped { preprocessed: RawCatalog },
    Bare(RawCatalog),
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawCatalog {
    time_slots: RawTimeSlots,
    junk_content: RawJunkContent,
    scheduled_tracks: RawScheduledTracks,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawTimeSlots {
    #[serde(alias = "lateNightLoFis")]
    late_night: RawTrackList,
    morning: RawMorning,
    standard: RawTrackList,
    morning_hours: Vec<u8>,
    hour_to_time_slot: Option<RawHourTable<String>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawTrackList {
    tracks: Vec<Value>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawMorning {
    genres: BTreeMap<String, RawTrackList>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawJunkContent {
    cycle_order: Vec<String>,
    types: BTreeMap<String, RawTrackList>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawScheduledTracks {
    by_hour: Option<RawHourTable<Vec<Value>>>,
}

/// Hour-indexed table, either a JSON array or an object keyed by hour
#[derive(Deserialize)]
#[serde(untagged)]
enum RawHourTable<T> {
    List(Vec<T>),
    Map(BTreeMap<String, T>),
}

impl<T> RawHourTable<T> {
    fn into_pairs(self) -> Vec<(Option<u8>, T)> {
        match self {
            Self::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (u8::try_from(i).ok(), v))
                .collect(),
            Self::Map(map) => map.into_iter().map(|(k, v)| (k.parse().ok(), v)).collect(),
        }
    }
}

#[derive(Deserialize)]
struct RawTrack {
    key: Option<String>,
    path: Option<String>,
    duration: Option<f64>,
    genre: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScheduledItem {
    track_key: Option<String>,
    time: Option<String>,
    recurrence: Option<String>,
    date: Option<String>,
    genre: Option<String>,
    track_data: Option<RawTrack>,
}

// ============================================================================
// Catalog
// ============================================================================

/// Immutable, pre-indexed view of all available content
#[derive(Debug, Clone)]
pub struct Catalog {
    late_night: Vec<TrackRecord>,
    morning: BTreeMap<String, Vec<TrackRecord>>,
    standard: Vec<TrackRecord>,
    morning_hours: Vec<u8>,
    hour_to_slot: [TimeSlot; 24],
    junk_cycle_order: Vec<String>,
    junk_types: BTreeMap<String, Vec<TrackRecord>>,
    scheduled_by_hour: Vec<Vec<Arc<ScheduledEntry>>>,
    warnings: Vec<CatalogWarning>,
}

impl Catalog {
    /// Start building a catalog in code
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Load a catalog file
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json_str(&content)?;
        tracing::info!(
            path = %path.display(),
            scheduled = catalog.scheduled_count(),
            warnings = catalog.warnings.len(),
            "Catalog loaded"
        );
        Ok(catalog)
    }

    /// Parse a catalog JSON document
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let raw = match serde_json::from_str::<RawDocument>(json)? {
            RawDocument::Wrapped { preprocessed } => preprocessed,
            RawDocument::Bare(raw) => raw,
        };
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawCatalog) -> Self {
        let mut warnings = Vec::new();
        let mut builder = CatalogBuilder::default();

        for track in convert_tracks(raw.time_slots.late_night.tracks, "lateNight", &mut warnings) {
            builder = builder.late_night(track);
        }
        for track in convert_tracks(raw.time_slots.standard.tracks, "standard", &mut warnings) {
            builder = builder.standard(track);
        }
        for (genre, list) in raw.time_slots.morning.genres {
            let context = format!("morning/{genre}");
            for track in convert_tracks(list.tracks, &context, &mut warnings) {
                builder = builder.morning(genre.clone(), track);
            }
        }
        builder = builder.morning_hours(raw.time_slots.morning_hours);

        if let Some(table) = raw.time_slots.hour_to_time_slot {
            for (hour, name) in table.into_pairs() {
                match (hour.filter(|h| *h < 24), TimeSlot::from_id(&name)) {
                    (Some(h), Some(slot)) => builder = builder.slot(h, slot),
                    _ => warnings.push(CatalogWarning::new(
                        "hourToTimeSlot",
                        format!("unknown slot '{name}' or hour out of range"),
                    )),
                }
            }
        }

        for (junk_type, list) in raw.junk_content.types {
            let context = format!("junk/{junk_type}");
            for track in convert_tracks(list.tracks, &context, &mut warnings) {
                builder = builder.junk(junk_type.clone(), track);
            }
        }
        if !raw.junk_content.cycle_order.is_empty() {
            builder = builder.cycle_order(raw.junk_content.cycle_order);
        }

        if let Some(table) = raw.scheduled_tracks.by_hour {
            for (bucket, items) in table.into_pairs() {
                for (i, value) in items.into_iter().enumerate() {
                    let context = format!(
                        "scheduled/{}[{i}]",
                        bucket.map(|b| b.to_string()).unwrap_or_else(|| "?".into())
                    );
                    match convert_scheduled(value, bucket) {
                        Ok(entry) => builder = builder.scheduled(entry),
                        Err(reason) => warnings.push(CatalogWarning::new(context, reason)),
                    }
                }
            }
        }

        for warning in &warnings {
            tracing::warn!(context = %warning.context, reason = %warning.reason, "Catalog entry excluded");
        }

        let mut catalog = builder.build();
        catalog.warnings = warnings;
        catalog
    }

    /// Late-night rotation tracks
    pub fn late_night(&self) -> &[TrackRecord] {
        &self.late_night
    }

    /// Standard rotation tracks
    pub fn standard(&self) -> &[TrackRecord] {
        &self.standard
    }

    /// Morning tracks for one genre
    pub fn morning_genre(&self, genre: &str) -> &[TrackRecord] {
        self.morning.get(genre).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Genres with morning tracks
    pub fn available_genres(&self) -> Vec<&str> {
        self.morning
            .iter()
            .filter(|(_, tracks)| !tracks.is_empty())
            .map(|(g, _)| g.as_str())
            .collect()
    }

    /// Hours that belong to the morning slot
    pub fn morning_hours(&self) -> &[u8] {
        &self.morning_hours
    }

    /// Whether `hour` is a morning hour
    pub fn is_morning_hour(&self, hour: u8) -> bool {
        self.slot_for_hour(hour) == TimeSlot::Morning
    }

    /// Rotation slot for an hour; unknown hours map to `Standard`
    pub fn slot_for_hour(&self, hour: u8) -> TimeSlot {
        self.hour_to_slot
            .get(usize::from(hour))
            .copied()
            .unwrap_or_default()
    }

    /// Base junk cycle order
    pub fn junk_cycle_order(&self) -> &[String] {
        &self.junk_cycle_order
    }

    /// Junk tracks of one type
    pub fn junk_tracks(&self, junk_type: &str) -> &[TrackRecord] {
        self.junk_types
            .get(junk_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All junk type names
    pub fn junk_types(&self) -> impl Iterator<Item = &str> {
        self.junk_types.keys().map(String::as_str)
    }

    /// Junk types with content other than bumpers
    pub fn non_bumper_junk_types(&self) -> Vec<&str> {
        self.junk_types
            .iter()
            .filter(|(t, tracks)| !is_bumper(t) && !tracks.is_empty())
            .map(|(t, _)| t.as_str())
            .collect()
    }

    /// Scheduled entries whose time of day falls in `hour`
    pub fn scheduled_for_hour(&self, hour: u8) -> &[Arc<ScheduledEntry>] {
        self.scheduled_by_hour
            .get(usize::from(hour))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every scheduled entry
    pub fn scheduled_entries(&self) -> impl Iterator<Item = &Arc<ScheduledEntry>> {
        self.scheduled_by_hour.iter().flatten()
    }

    /// Number of scheduled entries
    pub fn scheduled_count(&self) -> usize {
        self.scheduled_by_hour.iter().map(Vec::len).sum()
    }

    /// Duration lookup keyed by storage path
    pub fn durations(&self) -> HashMap<String, u32> {
        let rotation = self
            .late_night
            .iter()
            .chain(self.standard.iter())
            .chain(self.morning.values().flatten())
            .chain(self.junk_types.values().flatten());
        let scheduled = self.scheduled_entries().map(|e| &e.track);

        rotation
            .chain(scheduled)
            .map(|t| (t.path.clone(), t.duration))
            .collect()
    }

    /// Records excluded while loading
    pub fn warnings(&self) -> &[CatalogWarning] {
        &self.warnings
    }
}

fn convert_tracks(values: Vec<Value>, context: &str, warnings: &mut Vec<CatalogWarning>) -> Vec<TrackRecord> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| {
            let converted = serde_json::from_value::<RawTrack>(value)
                .map_err(|e| e.to_string())
                .and_then(|raw| convert_track(raw, None));
            match converted {
                Ok(track) => Some(track),
                Err(reason) => {
                    warnings.push(CatalogWarning::new(format!("{context}[{i}]"), reason));
                    None
                }
            }
        })
        .collect()
}

fn convert_track(raw: RawTrack, key: Option<String>) -> Result<TrackRecord, String> {
    let key = key.or(raw.key).ok_or("missing key")?;
    let path = raw.path.ok_or_else(|| format!("track '{key}' has no path"))?;
    let duration = raw
        .duration
        .filter(|d| d.is_finite() && *d >= 1.0)
        .ok_or_else(|| format!("track '{key}' has no usable duration"))?;

    Ok(TrackRecord {
        key,
        path,
        duration: duration.round() as u32,
        genre: raw.genre,
    })
}

fn convert_scheduled(value: Value, bucket: Option<u8>) -> Result<ScheduledEntry, String> {
    let raw: RawScheduledItem = serde_json::from_value(value).map_err(|e| e.to_string())?;
    let key = raw.track_key.ok_or("missing trackKey")?;
    let data = raw
        .track_data
        .ok_or_else(|| format!("scheduled '{key}' has no trackData"))?;
    let mut track = convert_track(data, Some(key.clone()))?;

    let time = raw
        .time
        .ok_or_else(|| format!("scheduled '{key}' has no time"))
        .and_then(|t| TimeOfDay::parse(&t).map_err(|e| e.to_string()))?;
    if bucket != Some(time.hour) {
        return Err(format!("scheduled '{key}' at {time} is filed under the wrong hour"));
    }

    let recurrence = match (raw.date, raw.recurrence) {
        (Some(date), _) => NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map(Recurrence::ExactDate)
            .map_err(|_| format!("scheduled '{key}' has invalid date '{date}'"))?,
        (None, Some(name)) => Recurrence::from_name(&name).map_err(|e| e.to_string())?,
        (None, None) => Recurrence::Daily,
    };

    let genre = raw.genre.or_else(|| track.genre.clone());
    track.genre = genre.clone();

    Ok(ScheduledEntry {
        track,
        time_of_day: time,
        recurrence,
        genre,
    })
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for catalogs assembled in code
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    late_night: Vec<TrackRecord>,
    morning: BTreeMap<String, Vec<TrackRecord>>,
    standard: Vec<TrackRecord>,
    morning_hours: Vec<u8>,
    slots: BTreeMap<u8, TimeSlot>,
    junk_cycle_order: Option<Vec<String>>,
    junk_types: BTreeMap<String, Vec<TrackRecord>>,
    scheduled: Vec<ScheduledEntry>,
}

impl CatalogBuilder {
    /// Add a late-night rotation track
    pub fn late_night(mut self, track: TrackRecord) -> Self {
        self.late_night.push(track);
        self
    }

    /// Add a standard rotation track
    pub fn standard(mut self, track: TrackRecord) -> Self {
        self.standard.push(track);
        self
    }

    /// Add a morning track under `genre`
    pub fn morning(mut self, genre: impl Into<String>, track: TrackRecord) -> Self {
        let genre = genre.into();
        let track = track.with_genre(genre.clone());
        self.morning.entry(genre).or_default().push(track);
        self
    }

    /// Set the morning hours
    pub fn morning_hours(mut self, hours: impl IntoIterator<Item = u8>) -> Self {
        self.morning_hours = hours.into_iter().filter(|h| *h < 24).collect();
        self
    }

    /// Override the slot of one hour
    pub fn slot(mut self, hour: u8, slot: TimeSlot) -> Self {
        if hour < 24 {
            self.slots.insert(hour, slot);
        }
        self
    }

    /// Add a junk track of `junk_type`
    pub fn junk(mut self, junk_type: impl Into<String>, track: TrackRecord) -> Self {
        self.junk_types.entry(junk_type.into()).or_default().push(track);
        self
    }

    /// Set the base junk cycle order
    pub fn cycle_order(mut self, order: Vec<String>) -> Self {
        self.junk_cycle_order = Some(order);
        self
    }

    /// Add a scheduled entry
    pub fn scheduled(mut self, entry: ScheduledEntry) -> Self {
        self.scheduled.push(entry);
        self
    }

    /// Index everything into a catalog
    pub fn build(self) -> Catalog {
        let mut hour_to_slot = [TimeSlot::Standard; 24];
        for hour in &self.morning_hours {
            hour_to_slot[usize::from(*hour)] = TimeSlot::Morning;
        }
        for (hour, slot) in &self.slots {
            hour_to_slot[usize::from(*hour)] = *slot;
        }

        let mut morning_hours: Vec<u8> = (0..24u8)
            .filter(|h| hour_to_slot[usize::from(*h)] == TimeSlot::Morning)
            .collect();
        morning_hours.dedup();

        let junk_cycle_order = self
            .junk_cycle_order
            .unwrap_or_else(|| self.junk_types.keys().cloned().collect());

        let mut scheduled_by_hour: Vec<Vec<Arc<ScheduledEntry>>> = vec![Vec::new(); 24];
        for entry in self.scheduled {
            let hour = usize::from(entry.time_of_day.hour);
            scheduled_by_hour[hour].push(Arc::new(entry));
        }

        Catalog {
            late_night: self.late_night,
            morning: self.morning,
            standard: self.standard,
            morning_hours,
            hour_to_slot,
            junk_cycle_order,
            junk_types: self.junk_types,
            scheduled_by_hour,
            warnings: Vec::new(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
