// tests/versioning.rs
//
// Ledger behaviour seen from a calculator: dedup, as-of lookups,
// reproducibility across retention, and snapshot persistence.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use calc_data_hub::versioning::diff::ChangeKind;
use calc_data_hub::versioning::{UpdateReason, VersionMetadata, VersionStore};

fn meta() -> VersionMetadata {
    VersionMetadata::new("test", UpdateReason::Scheduled)
}

fn t(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
}

#[test]
fn identical_content_is_stored_once() {
    let store = VersionStore::default();
    let a = store.store_version("rates", &json!({ "r": 7.25 }), meta());
    let b = store.store_version("rates", &json!({ "r": 7.25 }), meta());
    assert_eq!(a, b);

    let c = store.store_version("rates", &json!({ "r": 7.30 }), meta());
    assert_ne!(a, c);
    assert_eq!(store.version_count("rates"), 2);
}

#[test]
fn key_order_does_not_affect_dedup() {
    let store = VersionStore::default();
    let a = store.store_version("m", &json!({ "a": 1, "b": { "x": 1, "y": 2 } }), meta());
    let b = store.store_version("m", &json!({ "b": { "y": 2, "x": 1 }, "a": 1 }), meta());
    assert_eq!(a, b);
}

#[test]
fn as_of_never_returns_a_later_version() {
    let store = VersionStore::default();
    for (day, r) in [(2, 7.0), (5, 7.1), (9, 7.2)] {
        store.store_version_at("rates", &json!({ "r": r }), meta(), t(day));
    }

    assert!(store.get_as_of("rates", t(1)).is_none());
    assert_eq!(store.get_as_of("rates", t(5)).unwrap().payload, json!({ "r": 7.1 }));
    assert_eq!(store.get_as_of("rates", t(8)).unwrap().payload, json!({ "r": 7.1 }));
    assert_eq!(store.get_as_of("rates", t(20)).unwrap().payload, json!({ "r": 7.2 }));

    for day in 1..=20 {
        if let Some(v) = store.get_as_of("rates", t(day)) {
            assert!(v.timestamp <= t(day));
        }
    }
}

#[test]
fn timestamps_stay_ordered_when_the_clock_steps_back() {
    let store = VersionStore::default();
    store.store_version_at("rates", &json!({ "r": 1 }), meta(), t(10));
    store.store_version_at("rates", &json!({ "r": 2 }), meta(), t(3));
    let list = store.list_versions("rates");
    assert!(list.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn reproduce_reports_drift_then_breaks_after_cleanup() {
    let store = VersionStore::default();
    let v1 = store.store_version_at("rates", &json!({ "r": 7.25, "fha": 6.9 }), meta(), t(1));
    let calc = store.record_calculation_at(
        "mortgage-payment",
        &json!({ "principal": 400000 }),
        &json!({ "monthly": 2728.71 }),
        BTreeMap::from([("rates".to_string(), v1.clone())]),
        t(1),
    );

    let r = store.reproduce(&calc).unwrap();
    assert!(r.is_reproducible);
    assert!(r.diffs.is_empty());
    assert_eq!(r.original_outputs, json!({ "monthly": 2728.71 }));

    let v2 = store.store_version_at("rates", &json!({ "r": 7.5, "fha": 6.9 }), meta(), t(20));
    let r = store.reproduce(&calc).unwrap();
    assert!(r.is_reproducible);
    assert_eq!(r.diffs.len(), 1);
    assert_eq!(r.diffs[0].latest_version, v2);
    assert_eq!(r.diffs[0].changes.len(), 1);
    assert_eq!(r.diffs[0].changes[0].path, "r");
    assert_eq!(r.diffs[0].changes[0].change, ChangeKind::Modified);

    // 10-day retention at day 21 drops v1 and the day-1 calculation record
    let report = store.cleanup_at(10, t(21));
    assert_eq!(report.versions_removed, 1);
    assert_eq!(report.calculations_removed, 1);
    assert!(store.reproduce(&calc).is_none());
}

#[test]
fn calculation_survives_but_is_unreproducible_when_only_versions_expire() {
    let store = VersionStore::default();
    let v1 = store.store_version_at("rates", &json!({ "r": 7.25 }), meta(), t(1));
    let calc = store.record_calculation_at(
        "mortgage-payment",
        &json!({}),
        &json!({ "monthly": 1.0 }),
        BTreeMap::from([("rates".to_string(), v1.clone())]),
        t(15),
    );
    store.cleanup_at(10, t(20));

    let r = store.reproduce(&calc).unwrap();
    assert!(!r.is_reproducible);
    assert_eq!(r.missing_versions, vec![("rates".to_string(), v1)]);
}

#[test]
fn compare_versions_lists_field_changes() {
    let store = VersionStore::default();
    let a = store.store_version("rates", &json!({ "r": 7.0, "old": true }), meta());
    let b = store.store_version("rates", &json!({ "r": 7.1, "new": 1 }), meta());

    let changes = store.compare_versions("rates", &a, &b).unwrap();
    let kinds: Vec<_> = changes.iter().map(|c| (c.path.as_str(), c.change)).collect();
    assert!(kinds.contains(&("r", ChangeKind::Modified)));
    assert!(kinds.contains(&("old", ChangeKind::Removed)));
    assert!(kinds.contains(&("new", ChangeKind::Added)));
    assert!(store.compare_versions("rates", &a, "rates:v99").is_none());
}

#[test]
fn snapshot_round_trip_keeps_sequences_going() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");

    let store = VersionStore::new(5);
    store.store_version_at("rates", &json!({ "r": 1 }), meta(), t(1));
    let v2 = store.store_version_at("rates", &json!({ "r": 2 }), meta(), t(2));
    store.save_to_path(&path).unwrap();

    let loaded = VersionStore::load_from_path(&path, 5).unwrap();
    assert_eq!(loaded.version_count("rates"), 2);
    assert_eq!(loaded.get_version("rates", None).unwrap().id, v2);

    let v3 = loaded.store_version_at("rates", &json!({ "r": 3 }), meta(), t(3));
    assert_ne!(v3, v2);
    assert_eq!(loaded.get_version("rates", Some(&v3)).unwrap().sequence, 3);

    assert!(VersionStore::load_from_path(&dir.path().join("missing.json"), 5).is_err());
}

#[test]
fn eviction_keeps_the_newest_versions() {
    let store = VersionStore::new(3);
    for i in 0..5 {
        store.store_version_at("rates", &json!({ "r": i }), meta(), t(1) + Duration::hours(i));
    }
    let labels: Vec<_> = store.list_versions("rates").into_iter().map(|v| v.label).collect();
    assert_eq!(labels, vec!["v3", "v4", "v5"]);
}

#[test]
fn calculations_are_listed_per_calculator_oldest_first() {
    let store = VersionStore::default();
    let v1 = store.store_version_at("rates", &json!({ "r": 7.25 }), meta(), t(1));
    let used = BTreeMap::from([("rates".to_string(), v1)]);

    let late = store.record_calculation_at("mortgage-payment", &json!({ "n": 2 }), &json!({}), used.clone(), t(9));
    let other = store.record_calculation_at("injury-settlement", &json!({}), &json!({}), used.clone(), t(5));
    let early = store.record_calculation_at("mortgage-payment", &json!({ "n": 1 }), &json!({}), used, t(3));

    let ids: Vec<_> = store
        .calculations_for("mortgage-payment")
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec![early, late]);

    let injury = store.calculations_for("injury-settlement");
    assert_eq!(injury.len(), 1);
    assert_eq!(injury[0].id, other);
    assert!(store.calculations_for("unknown").is_empty());
}
