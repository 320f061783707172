//! Catalog consistency report
//!
//! Loading never fails on questionable content; this report surfaces it so an
//! operator can fix the catalog before going on air.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use super::Catalog;
use crate::models::TimeSlot;

/// Severity of a report finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// One finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

/// Result of validating a catalog
#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogReport {
    /// Track count per category name
    pub counts: Vec<(String, usize)>,
    /// Problems found
    pub findings: Vec<Finding>,
}

impl CatalogReport {
    /// Whether any finding is an error
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    fn warn(&mut self, message: String) {
        self.findings.push(Finding {
            severity: Severity::Warning,
            message,
        });
    }

    fn error(&mut self, message: String) {
        self.findings.push(Finding {
            severity: Severity::Error,
            message,
        });
    }
}

impl fmt::Display for CatalogReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Catalog contents:")?;
        for (name, count) in &self.counts {
            writeln!(f, "  {name:<24} {count}")?;
        }
        if self.findings.is_empty() {
            return writeln!(f, "No problems found");
        }
        writeln!(f, "Findings:")?;
        for finding in &self.findings {
            let tag = match finding.severity {
                Severity::Warning => "WARN ",
                Severity::Error => "ERROR",
            };
            writeln!(f, "  [{tag}] {}", finding.message)?;
        }
        Ok(())
    }
}

/// Check a loaded catalog for gaps and inconsistencies
pub fn validate(catalog: &Catalog) -> CatalogReport {
    let mut report = CatalogReport::default();

    report.counts.push(("lateNight".into(), catalog.late_night().len()));
    for genre in catalog.available_genres() {
        report
            .counts
            .push((format!("morning/{genre}"), catalog.morning_genre(genre).len()));
    }
    report.counts.push(("standard".into(), catalog.standard().len()));
    for junk_type in catalog.junk_types() {
        report
            .counts
            .push((format!("junk/{junk_type}"), catalog.junk_tracks(junk_type).len()));
    }
    report.counts.push(("scheduled".into(), catalog.scheduled_count()));

    // Slots that some hour maps to but that have nothing to play
    for slot in TimeSlot::all() {
        let used_by: Vec<u8> = (0..24).filter(|h| catalog.slot_for_hour(*h) == slot).collect();
        if used_by.is_empty() {
            continue;
        }
        let empty = match slot {
            TimeSlot::LateNight => catalog.late_night().is_empty(),
            TimeSlot::Morning => catalog.available_genres().is_empty(),
            TimeSlot::Standard => catalog.standard().is_empty(),
        };
        if empty && slot == TimeSlot::Morning {
            report.warn(format!(
                "morning hours {used_by:?} have no genres; standard rotation will be used"
            ));
        } else if empty {
            report.error(format!("slot {slot} is used by hours {used_by:?} but has no tracks"));
        }
    }

    if catalog.standard().is_empty() {
        report.error("standard rotation is empty; there is no final fallback".into());
    }

    for junk_type in catalog.junk_cycle_order() {
        if catalog.junk_tracks(junk_type).is_empty() {
            report.warn(format!("junk type '{junk_type}' is in the cycle order but has no tracks"));
        }
    }
    if catalog.junk_types().all(|t| catalog.junk_tracks(t).is_empty()) {
        report.warn("no junk content; pre-emption windows will fall back to rotation".into());
    }

    let mut seen: HashMap<(String, String, String), usize> = HashMap::new();
    for entry in catalog.scheduled_entries() {
        *seen
            .entry((
                entry.key().to_string(),
                entry.time_of_day.to_string(),
                entry.recurrence.to_string(),
            ))
            .or_default() += 1;
    }
    let mut duplicates: Vec<_> = seen.into_iter().filter(|(_, n)| *n > 1).collect();
    duplicates.sort();
    for ((key, time, recurrence), count) in duplicates {
        report.warn(format!("scheduled '{key}' appears {count} times at {time} ({recurrence})"));
    }

    for warning in catalog.warnings() {
        report.warn(format!("excluded {warning}"));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Recurrence, ScheduledEntry, TimeOfDay, TrackRecord};

    fn entry(key: &str, time: &str) -> ScheduledEntry {
        ScheduledEntry::new(
            TrackRecord::new(key, format!("{key}.mp3"), 60),
            TimeOfDay::parse(time).unwrap(),
            Recurrence::Daily,
        )
    }

    #[test]
    fn test_clean_catalog_has_no_errors() {
        let catalog = Catalog::builder()
            .standard(TrackRecord::new("s1", "s1.mp3", 200))
            .junk("ads", TrackRecord::new("a1", "a1.mp3", 20))
            .scheduled(entry("show", "09:00:00"))
            .build();

        let report = validate(&catalog);
        assert!(!report.has_errors());
        assert!(report.findings.is_empty());
        assert!(report.counts.contains(&("scheduled".to_string(), 1)));
    }

    #[test]
    fn test_empty_standard_is_error() {
        let catalog = Catalog::builder().build();
        let report = validate(&catalog);
        assert!(report.has_errors());
    }

    #[test]
    fn test_duplicates_and_empty_cycle_types() {
        let catalog = Catalog::builder()
            .standard(TrackRecord::new("s1", "s1.mp3", 200))
            .morning_hours([6])
            .cycle_order(vec!["ads".into(), "scripture".into()])
            .junk("ads", TrackRecord::new("a1", "a1.mp3", 20))
            .scheduled(entry("show", "09:00:00"))
            .scheduled(entry("show", "09:00:00"))
            .build();

        let report = validate(&catalog);
        let text = report.to_string();

        assert!(!report.has_errors());
        assert!(text.contains("'scripture'"));
        assert!(text.contains("appears 2 times"));
        assert!(text.contains("no genres"));
    }
}
