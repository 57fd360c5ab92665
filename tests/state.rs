//! LWW law tests over the state engine: determinism under reordering,
//! idempotence, monotonicity, origin isolation, and buffer semantics.

use rand::seq::SliceRandom;
use sensorhub::{SensorEntry, StateEngine};

fn entry(key: &str, value: i64, ts_ms: i64, origin: &str) -> SensorEntry {
    SensorEntry::bare(key, serde_json::json!(value), ts_ms, origin)
}

#[test]
fn lww_determinism_under_100_shuffles() {
    // A mixed workload: several origins, several sensors, duplicate
    // timestamps, and duplicate deliveries of the same entry.
    let mut updates = Vec::new();
    for origin in ["alpha", "beta", "gamma"] {
        for sensor in ["temp", "hum", "load"] {
            for ts in [1_000, 2_000, 2_000, 3_000] {
                updates.push(entry(
                    &format!("{origin}:{sensor}"),
                    ts,
                    ts,
                    origin,
                ));
            }
        }
    }

    let reference = {
        let engine = StateEngine::new("observer");
        for update in &updates {
            engine.apply_remote(update.clone());
        }
        engine.snapshot_state()
    };

    let mut rng = rand::rng();
    for round in 0..100 {
        updates.shuffle(&mut rng);
        let engine = StateEngine::new("observer");
        for update in &updates {
            engine.apply_remote(update.clone());
        }
        assert_eq!(
            engine.snapshot_state(),
            reference,
            "permutation {round} diverged"
        );
    }
}

#[test]
fn merge_is_idempotent() {
    let engine = StateEngine::new("n1");
    let update = entry("n2:t", 7, 1_000, "n2");

    assert!(engine.apply_remote(update.clone()));
    let after_once = engine.snapshot_state();

    assert!(!engine.apply_remote(update));
    assert_eq!(engine.snapshot_state(), after_once);
}

#[test]
fn stored_tuple_is_monotone_per_key() {
    let engine = StateEngine::new("n1");
    let sequence = [
        (1_000, "n2"),
        (500, "n2"),
        (1_000, "n2"),
        (1_500, "n2"),
        (1_200, "n2"),
        (9_000, "n2"),
    ];

    let mut last_ts = 0;
    for (ts, origin) in sequence {
        engine.apply_remote(entry("n2:t", ts, ts, origin));
        let snapshot = engine.snapshot_state();
        let stored = snapshot["n2"]["t"].ts_ms;
        assert!(stored >= last_ts, "tuple went backwards: {stored} < {last_ts}");
        last_ts = stored;
    }
    assert_eq!(last_ts, 9_000);
}

#[test]
fn origin_isolation_holds_after_any_merge_sequence() {
    let engine = StateEngine::new("n1");

    engine.apply_remote(entry("n2:t", 1, 1_000, "n2"));
    // Cross-origin writes to someone else's key must be rejected.
    engine.apply_remote(entry("n2:t", 99, 2_000, "n3"));
    engine.apply_remote(entry("n3:t", 5, 1_000, "n3"));

    let snapshot = engine.snapshot_state();
    for (origin, sensors) in &snapshot {
        for view in sensors.values() {
            assert_eq!(&view.origin, origin);
        }
    }
    assert_eq!(snapshot["n2"]["t"].value, serde_json::json!(1));
}

#[test]
fn every_accepted_local_update_drains_exactly_once_per_buffer() {
    let engine = StateEngine::new("n1");

    for i in 1..=5 {
        assert!(engine.apply_local(entry("n1:t", i, 1_000 + i, "n1")));
    }
    // A stale local write is accepted nowhere.
    assert!(!engine.apply_local(entry("n1:t", 0, 1, "n1")));

    let ui = engine.drain_ui_updates();
    let replication = engine.drain_replication_updates();
    assert_eq!(ui.len(), 5);
    assert_eq!(replication.len(), 5);

    // Consume-once: immediately empty afterwards.
    assert!(engine.drain_ui_updates().is_empty());
    assert!(engine.drain_replication_updates().is_empty());
}

#[test]
fn remote_updates_reach_ui_but_never_replication() {
    let engine = StateEngine::new("n1");

    assert!(engine.apply_remote(entry("n2:t", 3, 1_000, "n2")));
    assert!(engine.apply_local(entry("n1:t", 4, 1_000, "n1")));

    let ui = engine.drain_ui_updates();
    assert_eq!(ui.len(), 2);

    let replication = engine.drain_replication_updates();
    assert_eq!(replication.len(), 1);
    assert_eq!(replication[0].origin, "n1");
}

#[test]
fn scenario_newer_value_replaces() {
    let engine = StateEngine::new("n1");
    engine.apply_local(entry("n1:t", 22, 100, "n1"));
    engine.apply_local(entry("n1:t", 23, 101, "n1"));

    let snapshot = engine.snapshot_state();
    assert_eq!(snapshot["n1"].len(), 1);
    assert_eq!(snapshot["n1"]["t"].value, serde_json::json!(23));
}

#[test]
fn scenario_stale_discard() {
    // An older timestamp never overwrites.
    let engine = StateEngine::new("n1");
    engine.apply_remote(entry("n2:t", 1, 200, "n2"));
    assert!(!engine.apply_remote(entry("n2:t", 2, 150, "n2")));
    assert_eq!(engine.snapshot_state()["n2"]["t"].ts_ms, 200);
}

#[test]
fn snapshot_iteration_is_key_sorted() {
    let engine = StateEngine::new("n1");
    for origin in ["zeta", "alpha", "mike"] {
        for sensor in ["s2", "s1"] {
            engine.apply_remote(entry(&format!("{origin}:{sensor}"), 1, 100, origin));
        }
    }

    let snapshot = engine.snapshot_state();
    let origins: Vec<&String> = snapshot.keys().collect();
    assert_eq!(origins, ["alpha", "mike", "zeta"]);
    for sensors in snapshot.values() {
        let names: Vec<&String> = sensors.keys().collect();
        assert_eq!(names, ["s1", "s2"]);
    }
}
