//! Schedule projection
//!
//! Turns the hour-bucketed scheduled entries into an ordered timeline:
//!
//! 1. Resolve each candidate to its next occurrence and drop elapsed or
//!    recently played ones
//! 2. Group occurrences that share a start instant
//! 3. Pick one per group with the hierarchy (morning genre, then recurrence
//!    priority, then uniform random within the tier)
//! 4. Walk the survivors in start order and chain back-to-back items
//!
//! The resulting [`ChainItem`]s feed the [`UpcomingLedger`].

use chrono::{Duration, NaiveDateTime, Timelike};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

use super::ledger::{UsageCategory, UsageLedger};
use super::recurrence::Occurrence;
use crate::catalog::Catalog;
use crate::models::ScheduledEntry;

/// How far ahead occurrences are projected
pub const LOOKAHEAD_HOURS: i64 = 2;

// ============================================================================
// Chain Item
// ============================================================================

/// One projected occurrence on the timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainItem {
    pub occurrence: Occurrence,

    /// Plays straight after its predecessor instead of at its own time
    pub is_chained: bool,

    /// When playback actually starts
    pub effective_start: NaiveDateTime,
}

impl ChainItem {
    fn standalone(occurrence: Occurrence) -> Self {
        Self {
            effective_start: occurrence.start,
            occurrence,
            is_chained: false,
        }
    }

    /// Content key
    pub fn key(&self) -> &str {
        self.occurrence.key()
    }

    /// Nominal start from the recurrence rule
    pub fn nominal_start(&self) -> NaiveDateTime {
        self.occurrence.start
    }

    /// When playback ends given the effective start
    pub fn effective_end(&self) -> NaiveDateTime {
        self.effective_start + self.occurrence.entry.length()
    }
}

// ============================================================================
// Morning Genres
// ============================================================================

/// Genre assigned to each morning hour for the current day
#[derive(Debug, Clone, Default)]
pub struct MorningGenres {
    by_hour: BTreeMap<u8, String>,
    rolled_at: Option<NaiveDateTime>,
}

impl MorningGenres {
    /// Hour of day at which genres are rerolled
    pub const REROLL_HOUR: u32 = 4;

    /// Pick a random available genre for every morning hour
    pub fn reroll<R: Rng + ?Sized>(&mut self, catalog: &Catalog, rng: &mut R, now: NaiveDateTime) {
        let genres = catalog.available_genres();
        self.by_hour.clear();
        self.rolled_at = Some(now);

        if genres.is_empty() {
            tracing::warn!("No morning genres available");
            return;
        }

        for hour in catalog.morning_hours() {
            if let Some(genre) = genres.choose(rng) {
                self.by_hour.insert(*hour, (*genre).to_string());
            }
        }
        tracing::info!(genres = ?self.by_hour, "Morning genres set");
    }

    /// Genre assigned to `hour`
    pub fn genre_for(&self, hour: u8) -> Option<&str> {
        self.by_hour.get(&hour).map(String::as_str)
    }

    /// Whether the daily reroll boundary has passed since the last roll
    pub fn needs_reroll(&self, now: NaiveDateTime) -> bool {
        let boundary = Self::last_boundary(now);
        self.rolled_at.map_or(true, |at| at < boundary)
    }

    /// Next reroll instant after `now`
    pub fn next_reroll(now: NaiveDateTime) -> NaiveDateTime {
        Self::last_boundary(now) + Duration::days(1)
    }

    /// Assignments as `(hour, genre)` pairs
    pub fn assignments(&self) -> impl Iterator<Item = (u8, &str)> {
        self.by_hour.iter().map(|(h, g)| (*h, g.as_str()))
    }

    fn last_boundary(now: NaiveDateTime) -> NaiveDateTime {
        let today = now
            .date()
            .and_hms_opt(Self::REROLL_HOUR, 0, 0)
            .unwrap_or(now);
        if now >= today {
            today
        } else {
            today - Duration::days(1)
        }
    }
}

// ============================================================================
// Hierarchy
// ============================================================================

/// Pick exactly one candidate from a group sharing a start instant
///
/// A morning genre, when given, narrows the group to matching entries unless
/// none match. The winner is drawn uniformly from the most specific
/// recurrence tier present.
pub fn select_by_hierarchy<'a, T, R>(
    candidates: &'a [T],
    morning_genre: Option<&str>,
    rng: &mut R,
) -> Option<&'a T>
where
    T: AsRef<ScheduledEntry>,
    R: Rng + ?Sized,
{
    if candidates.len() <= 1 {
        return candidates.first();
    }

    let mut pool: Vec<&T> = candidates.iter().collect();
    if let Some(genre) = morning_genre {
        let matching: Vec<&T> = pool
            .iter()
            .copied()
            .filter(|c| c.as_ref().genre.as_deref() == Some(genre))
            .collect();
        if !matching.is_empty() {
            pool = matching;
        }
    }

    let best = pool.iter().map(|c| c.as_ref().priority()).min()?;
    let tier: Vec<&T> = pool
        .into_iter()
        .filter(|c| c.as_ref().priority() == best)
        .collect();
    tier.choose(rng).copied()
}

// ============================================================================
// Projector
// ============================================================================

/// Read-only inputs shared by every projection
#[derive(Debug, Clone, Copy)]
pub struct ProjectionContext<'a> {
    pub catalog: &'a Catalog,
    pub ledger: &'a UsageLedger,
    pub genres: &'a MorningGenres,
}

impl ProjectionContext<'_> {
    fn morning_genre(&self, hour: u8) -> Option<&str> {
        if self.catalog.is_morning_hour(hour) {
            self.genres.genre_for(hour)
        } else {
            None
        }
    }

    fn recently_played(&self, occurrence: &Occurrence) -> bool {
        self.ledger
            .is_used(&UsageCategory::Scheduled, occurrence.key(), occurrence.start)
    }

    /// Another entry of this tie group has already been decided
    fn start_taken(&self, occurrence: &Occurrence) -> bool {
        self.ledger.is_start_consumed(occurrence.start)
    }
}

/// Builds timelines of scheduled content
#[derive(Debug, Clone)]
pub struct ScheduleProjector {
    chain_gap: Duration,
    lookahead: Duration,
}

impl ScheduleProjector {
    /// Create a projector chaining items separated by at most `chain_gap_secs`
    pub fn new(chain_gap_secs: u32) -> Self {
        Self {
            chain_gap: Duration::seconds(i64::from(chain_gap_secs)),
            lookahead: Duration::hours(LOOKAHEAD_HOURS),
        }
    }

    /// Chain-gap threshold
    pub fn chain_gap(&self) -> Duration {
        self.chain_gap
    }

    /// Timeline for one hour bucket
    pub fn project_hour<R: Rng + ?Sized>(
        &self,
        ctx: ProjectionContext<'_>,
        hour: u8,
        now: NaiveDateTime,
        rng: &mut R,
    ) -> Vec<ChainItem> {
        self.project_hours(ctx, &[hour], now, rng)
    }

    /// Timeline for the current and next hour buckets
    pub fn project_window<R: Rng + ?Sized>(
        &self,
        ctx: ProjectionContext<'_>,
        now: NaiveDateTime,
        rng: &mut R,
    ) -> Vec<ChainItem> {
        let current = now.hour() as u8;
        self.project_hours(ctx, &[current, (current + 1) % 24], now, rng)
    }

    fn project_hours<R: Rng + ?Sized>(
        &self,
        ctx: ProjectionContext<'_>,
        hours: &[u8],
        now: NaiveDateTime,
        rng: &mut R,
    ) -> Vec<ChainItem> {
        let horizon = now + self.lookahead;

        let mut groups: BTreeMap<NaiveDateTime, Vec<Occurrence>> = BTreeMap::new();
        for hour in hours {
            for entry in ctx.catalog.scheduled_for_hour(*hour) {
                let occurrence = Occurrence::resolve(entry, now);
                if occurrence.has_elapsed(now) || occurrence.start >= horizon {
                    continue;
                }
                if ctx.recently_played(&occurrence) {
                    tracing::debug!(key = occurrence.key(), "Skipping recently played entry");
                    continue;
                }
                if ctx.start_taken(&occurrence) {
                    tracing::debug!(key = occurrence.key(), start = %occurrence.start, "Start instant already decided");
                    continue;
                }
                groups.entry(occurrence.start).or_default().push(occurrence);
            }
        }

        let winners: Vec<Occurrence> = groups
            .into_iter()
            .filter_map(|(start, group)| {
                let genre = ctx.morning_genre(start.hour() as u8);
                select_by_hierarchy(&group, genre, rng).cloned()
            })
            .collect();

        self.build_chain(winners)
    }

    /// Order occurrences by start and mark back-to-back items as chained
    pub fn build_chain(&self, mut occurrences: Vec<Occurrence>) -> Vec<ChainItem> {
        occurrences.sort_by_key(|o| o.start);

        let mut chain: Vec<ChainItem> = Vec::with_capacity(occurrences.len());
        for occurrence in occurrences {
            let mut item = ChainItem::standalone(occurrence);
            if let Some(prev) = chain.last() {
                let prev_end = prev.effective_end();
                let gap = item.occurrence.start - prev_end;
                if gap >= Duration::zero() && gap <= self.chain_gap {
                    tracing::debug!(
                        key = item.key(),
                        gap_secs = gap.num_seconds(),
                        "Chaining scheduled item"
                    );
                    item.is_chained = true;
                    item.effective_start = prev_end;
                }
            }
            chain.push(item);
        }
        chain
    }

    /// The scheduled occurrence playing at `now`, if any
    ///
    /// Looks at the current and previous hour buckets so long items that
    /// started last hour are found. Ties go through the hierarchy.
    pub fn active_occurrence<R: Rng + ?Sized>(
        &self,
        ctx: ProjectionContext<'_>,
        now: NaiveDateTime,
        rng: &mut R,
    ) -> Option<Occurrence> {
        let current = now.hour() as u8;
        let previous = (current + 23) % 24;

        let active: Vec<Occurrence> = [previous, current]
            .iter()
            .flat_map(|h| ctx.catalog.scheduled_for_hour(*h))
            .filter_map(|entry| Occurrence::containing(entry, now))
            .filter(|occ| !ctx.recently_played(occ) && !ctx.start_taken(occ))
            .collect();

        select_by_hierarchy(&active, ctx.morning_genre(current), rng).cloned()
    }
}

// ============================================================================
// Upcoming Ledger
// ============================================================================

/// Projected occurrences not yet played, ordered by effective start
///
/// Holds at most one item per nominal start instant.
#[derive(Debug, Clone, Default)]
pub struct UpcomingLedger {
    items: Vec<ChainItem>,
}

impl UpcomingLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an item; returns false if its start instant is already taken
    pub fn insert(&mut self, item: ChainItem) -> bool {
        if self
            .items
            .iter()
            .any(|i| i.nominal_start() == item.nominal_start())
        {
            return false;
        }
        let pos = self
            .items
            .partition_point(|i| i.effective_start <= item.effective_start);
        self.items.insert(pos, item);
        true
    }

    /// Remove the item with this key and nominal start
    pub fn remove(&mut self, key: &str, start: NaiveDateTime) -> Option<ChainItem> {
        let pos = self
            .items
            .iter()
            .position(|i| i.key() == key && i.nominal_start() == start)?;
        Some(self.items.remove(pos))
    }

    /// Remove and return the earliest item whose effective start has passed
    pub fn take_overdue(&mut self, now: NaiveDateTime) -> Option<ChainItem> {
        match self.items.first() {
            Some(first) if first.effective_start <= now => Some(self.items.remove(0)),
            _ => None,
        }
    }

    /// Earliest item starting after `now`
    pub fn next_after(&self, now: NaiveDateTime) -> Option<&ChainItem> {
        self.items.iter().find(|i| i.effective_start > now)
    }

    /// Drop items whose whole window has passed; returns them
    pub fn prune_stale(&mut self, now: NaiveDateTime) -> Vec<ChainItem> {
        let (stale, keep): (Vec<_>, Vec<_>) = self
            .items
            .drain(..)
            .partition(|i| i.occurrence.has_elapsed(now));
        self.items = keep;
        stale
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Items in start order
    pub fn items(&self) -> &[ChainItem] {
        &self.items
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is projected
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
