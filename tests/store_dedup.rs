// tests/store_dedup.rs
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use feed_trigger::{Clock, Entry, InsertOutcome, ManualClock, Store};

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
    ))
}

fn entry(link: &str, title: &str) -> Entry {
    Entry::new(
        "digest",
        title,
        "body",
        link,
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
    )
}

#[test]
fn same_key_within_window_is_rejected() {
    let clock = clock();
    let store = Store::open_in_memory(clock.clone(), ChronoDuration::hours(24)).unwrap();

    let e = entry("https://digest.example.com/items/1", "Huge deal");
    assert!(matches!(store.insert_if_new(&e).unwrap(), InsertOutcome::Inserted(_)));

    clock.advance(ChronoDuration::hours(6));
    assert_eq!(store.insert_if_new(&e).unwrap(), InsertOutcome::Duplicate);
    assert_eq!(store.entry_count().unwrap(), 1);
}

#[test]
fn link_variants_share_a_key() {
    let store = Store::open_in_memory(clock(), ChronoDuration::hours(24)).unwrap();
    let a = entry("https://Digest.example.com/items/1/?utm_source=rss#top", "A");
    let b = entry("https://digest.example.com/items/1", "B");
    assert!(store.insert_if_new(&a).unwrap().is_new());
    assert_eq!(store.insert_if_new(&b).unwrap(), InsertOutcome::Duplicate);
}

#[test]
fn linkless_entries_dedupe_on_title_and_source() {
    let store = Store::open_in_memory(clock(), ChronoDuration::hours(24)).unwrap();
    let a = entry("", "Market  closes HIGHER");
    let b = entry("", "market closes higher");
    let other_source = Entry::new("wire", "market closes higher", "", "", a.published);
    assert!(store.insert_if_new(&a).unwrap().is_new());
    assert_eq!(store.insert_if_new(&b).unwrap(), InsertOutcome::Duplicate);
    assert!(store.insert_if_new(&other_source).unwrap().is_new());
}

#[test]
fn same_key_after_window_is_accepted() {
    let clock = clock();
    let store = Store::open_in_memory(clock.clone(), ChronoDuration::hours(24)).unwrap();

    let e = entry("https://digest.example.com/items/2", "Weekend sale");
    store.insert_if_new(&e).unwrap();
    clock.advance(ChronoDuration::hours(25));
    assert!(store.insert_if_new(&e).unwrap().is_new());
    assert_eq!(store.entry_count().unwrap(), 2);
}

#[test]
fn recent_only_returns_entries_inside_window() {
    let clock = clock();
    let store = Store::open_in_memory(clock.clone(), ChronoDuration::hours(24)).unwrap();

    store
        .insert_if_new(&entry("https://digest.example.com/old", "old"))
        .unwrap();
    clock.advance(ChronoDuration::hours(3));
    store
        .insert_if_new(&entry("https://digest.example.com/new", "new"))
        .unwrap();

    let recent = store.recent(ChronoDuration::hours(1)).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].entry.title, "new");
    assert_eq!(recent[0].ingested_at, clock.now());

    let all = store.recent(ChronoDuration::hours(24)).unwrap();
    assert_eq!(
        all.iter().map(|s| s.entry.title.as_str()).collect::<Vec<_>>(),
        vec!["new", "old"]
    );
}

#[test]
fn file_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("feed.db");
    let clock = clock();
    let e = entry("https://digest.example.com/items/3", "Library hours");

    {
        let store = Store::open(&path, clock.clone(), ChronoDuration::hours(24)).unwrap();
        assert!(store.insert_if_new(&e).unwrap().is_new());
    }
    let store = Store::open(&path, clock, ChronoDuration::hours(24)).unwrap();
    assert_eq!(store.insert_if_new(&e).unwrap(), InsertOutcome::Duplicate);
    assert_eq!(store.stats().unwrap()["rss_entries"], 1);
}
