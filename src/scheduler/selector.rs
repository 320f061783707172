//! Algorithmic and junk content selection
//!
//! Chooses what plays when nothing is scheduled. Decision order:
//!
//! 1. Junk only while a pre-emption window is open
//! 2. Otherwise the rotation for the hour's time slot, skipping recently used
//!    tracks and clearing the category when it runs dry
//! 3. If no rotation track can finish before the next scheduled start, junk
//!
//! Junk types alternate through a shuffled cycle order; bumpers are skipped
//! inside the 5-minute window.

use chrono::{NaiveDateTime, Timelike};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use super::error::{SchedulerError, SchedulerResult};
use super::ledger::{UsageCategory, UsageLedger};
use super::projector::MorningGenres;
use crate::catalog::Catalog;
use crate::models::{is_bumper, TimeSlot, TrackRecord};

// ============================================================================
// Pre-emption State
// ============================================================================

/// Flags gating selection ahead of scheduled content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreemptionState {
    /// Inside the 15-minute window: junk only
    pub junk_only: bool,
    /// Inside the 5-minute window: junk other than bumpers
    pub non_bumper_junk_only: bool,
    /// Scheduled content is playing
    pub in_scheduled_mode: bool,
}

impl PreemptionState {
    /// Drop every flag
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Selection
// ============================================================================

/// A picked track and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Rotation track for a time slot
    Rotation { track: TrackRecord, slot: TimeSlot },
    /// Filler track of a junk type
    Junk { track: TrackRecord, junk_type: String },
}

impl Selection {
    /// The selected track
    pub fn track(&self) -> &TrackRecord {
        match self {
            Self::Rotation { track, .. } | Self::Junk { track, .. } => track,
        }
    }

    /// Ledger category the track was marked in
    pub fn category(&self) -> UsageCategory {
        match self {
            Self::Rotation { slot, .. } => UsageCategory::for_slot(*slot),
            Self::Junk { junk_type, .. } => UsageCategory::junk(junk_type.clone()),
        }
    }

    /// Whether this is filler
    pub fn is_junk(&self) -> bool {
        matches!(self, Self::Junk { .. })
    }
}

/// Inputs for one selection call
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub catalog: &'a Catalog,
    pub genres: &'a MorningGenres,
    pub preemption: PreemptionState,
    /// Start of the next occurrence that rotation must not overrun
    pub next_boundary: Option<NaiveDateTime>,
    pub now: NaiveDateTime,
}

// ============================================================================
// Junk Rotation
// ============================================================================

/// Shuffled cycle over junk types
#[derive(Debug, Clone, Default)]
pub struct JunkRotation {
    order: Vec<String>,
    index: usize,
}

impl JunkRotation {
    /// Reshuffle the base cycle order and restart at its head
    pub fn reshuffle<R: Rng + ?Sized>(&mut self, base: &[String], rng: &mut R) {
        self.order = base.to_vec();
        self.order.shuffle(rng);
        self.index = 0;
        tracing::debug!(order = ?self.order, "Junk cycle reshuffled");
    }

    /// Current cycle order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    fn advance(&mut self) {
        if !self.order.is_empty() {
            self.index = (self.index + 1) % self.order.len();
        }
    }

    /// Junk type to play next, honouring the bumper exclusion
    fn next_type<R: Rng + ?Sized>(
        &mut self,
        catalog: &Catalog,
        non_bumper_only: bool,
        rng: &mut R,
    ) -> Option<String> {
        let playable = |t: &str| {
            !catalog.junk_tracks(t).is_empty() && !(non_bumper_only && is_bumper(t))
        };

        for _ in 0..self.order.len() {
            let candidate = &self.order[self.index];
            if playable(candidate) {
                return Some(candidate.clone());
            }
            self.advance();
        }

        // Nothing in the cycle works; fall back to any non-bumper type
        let fallback = catalog.non_bumper_junk_types();
        fallback.choose(rng).map(|t| (*t).to_string())
    }

    /// Pick a junk track and advance the cycle
    pub fn select<R: Rng + ?Sized>(
        &mut self,
        catalog: &Catalog,
        ledger: &mut UsageLedger,
        non_bumper_only: bool,
        now: NaiveDateTime,
        rng: &mut R,
    ) -> SchedulerResult<Selection> {
        if self.order.is_empty() {
            self.reshuffle(catalog.junk_cycle_order(), rng);
        }

        let junk_type = self
            .next_type(catalog, non_bumper_only, rng)
            .ok_or_else(|| SchedulerError::no_junk(if non_bumper_only { "non-bumper" } else { "any" }))?;

        let category = UsageCategory::junk(junk_type.clone());
        let track = pick_unused(catalog.junk_tracks(&junk_type), &category, ledger, now, rng)?;
        ledger.mark_used(category, track.key.clone(), now);
        self.advance();

        Ok(Selection::Junk { track, junk_type })
    }
}

/// Random unused track from `pool`; clears the category once if exhausted
fn pick_unused<R: Rng + ?Sized>(
    pool: &[TrackRecord],
    category: &UsageCategory,
    ledger: &mut UsageLedger,
    now: NaiveDateTime,
    rng: &mut R,
) -> SchedulerResult<TrackRecord> {
    if pool.is_empty() {
        return Err(SchedulerError::exhausted(category.to_string()));
    }

    let mut available: Vec<&TrackRecord> = pool
        .iter()
        .filter(|t| !ledger.is_used(category, &t.key, now))
        .collect();

    if available.is_empty() {
        tracing::info!(category = %category, "Category exhausted, clearing usage");
        ledger.clear_category(category);
        available = pool.iter().collect();
    }

    available
        .choose(rng)
        .map(|t| (*t).clone())
        .ok_or_else(|| SchedulerError::exhausted(category.to_string()))
}

// ============================================================================
// Algorithmic Selector
// ============================================================================

/// Picks the next non-scheduled track
#[derive(Debug, Clone, Default)]
pub struct AlgorithmicSelector {
    junk: JunkRotation,
}

impl AlgorithmicSelector {
    /// Create a selector with an empty junk cycle
    pub fn new() -> Self {
        Self::default()
    }

    /// Junk cycle state
    pub fn junk_rotation(&self) -> &JunkRotation {
        &self.junk
    }

    /// Reshuffle the junk cycle from the catalog's base order
    pub fn reshuffle_junk<R: Rng + ?Sized>(&mut self, catalog: &Catalog, rng: &mut R) {
        self.junk.reshuffle(catalog.junk_cycle_order(), rng);
    }

    /// Pick the next track
    pub fn select_next<R: Rng + ?Sized>(
        &mut self,
        ctx: SelectionContext<'_>,
        ledger: &mut UsageLedger,
        rng: &mut R,
    ) -> SchedulerResult<Selection> {
        if ctx.preemption.junk_only {
            match self.select_junk(ctx, ledger, rng) {
                Ok(selection) => return Ok(selection),
                Err(e) => {
                    tracing::warn!(error = %e, "No junk inside pre-emption window, using rotation");
                }
            }
        }

        let (slot, pool) = Self::rotation_pool(ctx);
        let category = UsageCategory::for_slot(slot);

        let mut available: Vec<&TrackRecord> = pool
            .iter()
            .filter(|t| !ledger.is_used(&category, &t.key, ctx.now))
            .collect();
        if available.is_empty() {
            tracing::info!(category = %category, "Rotation exhausted, clearing usage");
            ledger.clear_category(&category);
            available = pool.iter().collect();
        }
        if available.is_empty() {
            tracing::error!(slot = %slot, "No rotation tracks available");
            return Err(SchedulerError::exhausted(category.to_string()));
        }

        if !ctx.preemption.junk_only {
            if let Some(boundary) = ctx.next_boundary {
                let fitting: Vec<&TrackRecord> = available
                    .iter()
                    .copied()
                    .filter(|t| ctx.now + t.length() <= boundary)
                    .collect();
                if fitting.is_empty() {
                    tracing::info!(boundary = %boundary, "No rotation track fits before scheduled content, playing junk");
                    match self.select_junk(ctx, ledger, rng) {
                        Ok(selection) => return Ok(selection),
                        Err(e) => tracing::warn!(error = %e, "No junk to fill gap, overrunning"),
                    }
                } else {
                    available = fitting;
                }
            }
        }

        let track = available
            .choose(rng)
            .map(|t| (*t).clone())
            .ok_or_else(|| SchedulerError::exhausted(category.to_string()))?;
        ledger.mark_used(category, track.key.clone(), ctx.now);

        Ok(Selection::Rotation { track, slot })
    }

    /// Pick a junk track directly
    pub fn select_junk<R: Rng + ?Sized>(
        &mut self,
        ctx: SelectionContext<'_>,
        ledger: &mut UsageLedger,
        rng: &mut R,
    ) -> SchedulerResult<Selection> {
        self.junk.select(
            ctx.catalog,
            ledger,
            ctx.preemption.non_bumper_junk_only,
            ctx.now,
            rng,
        )
    }

    /// Slot and track pool for the current hour, with standard as fallback
    fn rotation_pool<'a>(ctx: SelectionContext<'a>) -> (TimeSlot, &'a [TrackRecord]) {
        let hour = ctx.now.hour() as u8;
        let standard = (TimeSlot::Standard, ctx.catalog.standard());

        match ctx.catalog.slot_for_hour(hour) {
            TimeSlot::LateNight if !ctx.catalog.late_night().is_empty() => {
                (TimeSlot::LateNight, ctx.catalog.late_night())
            }
            TimeSlot::Morning => match ctx.genres.genre_for(hour) {
                Some(genre) if !ctx.catalog.morning_genre(genre).is_empty() => {
                    (TimeSlot::Morning, ctx.catalog.morning_genre(genre))
                }
                _ => {
                    tracing::warn!(hour, "No morning genre for hour, using standard rotation");
                    standard
                }
            },
            TimeSlot::LateNight => {
                tracing::warn!("No late-night tracks, using standard rotation");
                standard
            }
            TimeSlot::Standard => standard,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn catalog() -> Catalog {
        Catalog::builder()
            .late_night(TrackRecord::new("lofi1", "late/lofi1.mp3", 180))
            .morning("jazz", TrackRecord::new("jazz1", "morning/jazz1.mp3", 200))
            .morning_hours([5, 6, 7])
            .slot(1, TimeSlot::LateNight)
            .standard(TrackRecord::new("s1", "standard/s1.mp3", 240))
            .standard(TrackRecord::new("s2", "standard/s2.mp3", 250))
            .standard(TrackRecord::new("s3", "standard/s3.mp3", 260))
            .junk("ads", TrackRecord::new("ad1", "junk/ad1.mp3", 30))
            .junk("scripture", TrackRecord::new("sc1", "junk/sc1.mp3", 40))
            .junk("bumpers", TrackRecord::new("b1", "junk/b1.mp3", 5))
            .cycle_order(vec!["ads".into(), "scripture".into(), "bumpers".into()])
            .build()
    }

    fn ctx<'a>(catalog: &'a Catalog, genres: &'a MorningGenres, now: NaiveDateTime) -> SelectionContext<'a> {
        SelectionContext {
            catalog,
            genres,
            preemption: PreemptionState::default(),
            next_boundary: None,
            now,
        }
    }

    #[test]
    fn test_slot_routing() {
        let catalog = catalog();
        let mut genres = MorningGenres::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        genres.reroll(&catalog, &mut rng, at(0, 0, 0));
        let mut ledger = UsageLedger::new();
        let mut selector = AlgorithmicSelector::new();

        let late = selector.select_next(ctx(&catalog, &genres, at(1, 0, 0)), &mut ledger, &mut rng).unwrap();
        assert_eq!(late.track().key, "lofi1");

        let morning = selector.select_next(ctx(&catalog, &genres, at(6, 0, 0)), &mut ledger, &mut rng).unwrap();
        assert_eq!(morning.track().key, "jazz1");
        assert_eq!(morning.category(), UsageCategory::Morning);

        let standard = selector.select_next(ctx(&catalog, &genres, at(14, 0, 0)), &mut ledger, &mut rng).unwrap();
        assert!(standard.track().key.starts_with('s'));
    }

    #[test]
    fn test_morning_without_genre_falls_back_to_standard() {
        let catalog = catalog();
        let genres = MorningGenres::default();
        let mut ledger = UsageLedger::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let pick = AlgorithmicSelector::new()
            .select_next(ctx(&catalog, &genres, at(6, 0, 0)), &mut ledger, &mut rng)
            .unwrap();
        assert_eq!(pick.category(), UsageCategory::Standard);
    }

    #[test]
    fn test_standard_exhaustion_clears_and_retries() {
        let catalog = catalog();
        let genres = MorningGenres::default();
        let mut ledger = UsageLedger::new();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut selector = AlgorithmicSelector::new();

        let mut seen = HashSet::new();
        for i in 0..3 {
            let now = at(12, i, 0);
            let pick = selector.select_next(ctx(&catalog, &genres, now), &mut ledger, &mut rng).unwrap();
            seen.insert(pick.track().key.clone());
        }
        assert_eq!(seen.len(), 3, "no repeats before exhaustion");

        let pick = selector.select_next(ctx(&catalog, &genres, at(12, 10, 0)), &mut ledger, &mut rng);
        assert!(pick.is_ok());
        assert_eq!(ledger.len(&UsageCategory::Standard), 1);
    }

    #[test]
    fn test_junk_only_window() {
        let catalog = catalog();
        let genres = MorningGenres::default();
        let mut ledger = UsageLedger::new();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut selector = AlgorithmicSelector::new();

        let mut c = ctx(&catalog, &genres, at(12, 0, 0));
        c.preemption.junk_only = true;
        let pick = selector.select_next(c, &mut ledger, &mut rng).unwrap();
        assert!(pick.is_junk());
    }

    #[test]
    fn test_bumpers_skipped_in_five_minute_window() {
        let catalog = catalog();
        let genres = MorningGenres::default();
        let mut ledger = UsageLedger::new();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut selector = AlgorithmicSelector::new();
        selector.reshuffle_junk(&catalog, &mut rng);

        let mut c = ctx(&catalog, &genres, at(12, 0, 0));
        c.preemption.junk_only = true;
        c.preemption.non_bumper_junk_only = true;

        for _ in 0..12 {
            let pick = selector.select_next(c, &mut ledger, &mut rng).unwrap();
            match pick {
                Selection::Junk { junk_type, .. } => assert_ne!(junk_type, "bumpers"),
                other => panic!("expected junk, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_junk_types_alternate() {
        let catalog = catalog();
        let genres = MorningGenres::default();
        let mut ledger = UsageLedger::new();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut selector = AlgorithmicSelector::new();
        selector.reshuffle_junk(&catalog, &mut rng);

        let c = ctx(&catalog, &genres, at(12, 0, 0));
        let types: Vec<String> = (0..3)
            .map(|_| match selector.select_junk(c, &mut ledger, &mut rng).unwrap() {
                Selection::Junk { junk_type, .. } => junk_type,
                other => panic!("expected junk, got {other:?}"),
            })
            .collect();

        let distinct: HashSet<_> = types.iter().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_overrun_check_switches_to_junk() {
        let catalog = catalog();
        let genres = MorningGenres::default();
        let mut ledger = UsageLedger::new();
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let mut selector = AlgorithmicSelector::new();

        let mut c = ctx(&catalog, &genres, at(12, 0, 0));
        c.next_boundary = Some(at(12, 0, 0) + Duration::seconds(120));
        let pick = selector.select_next(c, &mut ledger, &mut rng).unwrap();
        assert!(pick.is_junk());

        c.next_boundary = Some(at(12, 0, 0) + Duration::seconds(245));
        let pick = selector.select_next(c, &mut ledger, &mut rng).unwrap();
        assert_eq!(pick.track().key, "s1");
    }

    #[test]
    fn test_empty_catalog_is_error() {
        let catalog = Catalog::builder().build();
        let genres = MorningGenres::default();
        let mut ledger = UsageLedger::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let err = AlgorithmicSelector::new()
            .select_next(ctx(&catalog, &genres, at(12, 0, 0)), &mut ledger, &mut rng)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ExhaustedPool { .. }));
        assert!(err.is_recoverable());
    }
}
