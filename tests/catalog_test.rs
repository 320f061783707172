//! Catalog loading and validation tests

mod common;

use common::{at, sample_catalog_json, test_config, Harness};
use onair::catalog::{validate, Catalog};
use onair::models::{Recurrence, TimeSlot};
use onair::player::PlayerEvent;
use onair::scheduler::dispatcher::PlayingKind;
use std::io::Write;
use std::sync::Arc;

#[test]
fn test_load_preprocessed_document() {
    let catalog = Catalog::from_json_str(sample_catalog_json()).unwrap();

    assert_eq!(catalog.late_night().len(), 1);
    assert_eq!(catalog.standard().len(), 2);
    assert_eq!(catalog.available_genres(), vec!["jazz"]);
    assert_eq!(catalog.slot_for_hour(0), TimeSlot::LateNight);
    assert_eq!(catalog.slot_for_hour(7), TimeSlot::Morning);
    assert_eq!(catalog.slot_for_hour(15), TimeSlot::Standard);

    let news = catalog.scheduled_for_hour(9);
    assert_eq!(news.len(), 1);
    assert_eq!(news[0].key(), "news");
    assert_eq!(news[0].recurrence, Recurrence::Daily);
}

#[test]
fn test_broken_entries_become_warnings() {
    let catalog = Catalog::from_json_str(sample_catalog_json()).unwrap();

    assert_eq!(catalog.warnings().len(), 1);
    assert!(catalog.warnings()[0].context.starts_with("scheduled/9"));

    let report = validate::validate(&catalog);
    assert!(!report.has_errors());
    assert!(report.to_string().contains("broken"));
}

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(sample_catalog_json().as_bytes()).unwrap();

    let catalog = Catalog::from_file(file.path()).unwrap();
    assert_eq!(catalog.scheduled_count(), 1);
    assert!(catalog.durations().contains_key("scheduled/news.mp3"));
}

#[test]
fn test_malformed_json_is_an_error() {
    assert!(Catalog::from_json_str("{ \"preprocessed\": [").is_err());
}

#[test]
fn test_rotation_follows_hour_slots() {
    let catalog = Arc::new(Catalog::from_json_str(sample_catalog_json()).unwrap());

    let mut h = Harness::new(Arc::clone(&catalog), at(0, 30, 0), test_config());
    h.station.start();
    assert_eq!(h.player.current_source().as_deref(), Some("lofi/ln1.mp3"));

    let mut h = Harness::new(catalog, at(7, 10, 0), test_config());
    h.station.start();
    h.station.on_player_event(PlayerEvent::Loaded);
    assert_eq!(
        h.station.now_playing().unwrap().kind,
        PlayingKind::Rotation {
            slot: TimeSlot::Morning
        }
    );
    assert_eq!(h.station.morning_genres().genre_for(7), Some("jazz"));
}
