//! Deduplication properties of the reconciliation engine, exercised
//! through the full store.

use palimpsest::{
    anonymize_path, ActionEvent, DocumentId, OutputRecord, Store, StoreConfig, Timestamp,
    UnitContent, UnitId, UnitKind, UnitSnapshot,
};
use std::time::Duration;
use tempfile::TempDir;

fn test_store(dir: &TempDir) -> Store {
    // Long enough that the idle timer never fires mid-test; tests flush
    // explicitly where durability matters.
    Store::create(StoreConfig {
        path: dir.path().join("store"),
        debounce: Duration::from_secs(60),
        ..Default::default()
    })
    .unwrap()
}

fn unit(id: &str, source: &str) -> UnitSnapshot {
    UnitSnapshot {
        unit_id: UnitId(id.into()),
        content: UnitContent {
            kind: UnitKind::Code,
            source: source.into(),
            outputs: Vec::new(),
        },
    }
}

fn unit_with_output(id: &str, source: &str, stdout: &str) -> UnitSnapshot {
    UnitSnapshot {
        unit_id: UnitId(id.into()),
        content: UnitContent {
            kind: UnitKind::Code,
            source: source.into(),
            outputs: vec![OutputRecord::Stream {
                name: "stdout".into(),
                text: stdout.into(),
            }],
        },
    }
}

fn action(name: &str, time: i64, units: Vec<UnitSnapshot>) -> ActionEvent {
    ActionEvent {
        name: name.into(),
        time: Timestamp(time),
        selected_index: None,
        selected_indices: Vec::new(),
        units,
        hidden: Vec::new(),
    }
}

fn doc() -> DocumentId {
    anonymize_path("/home/user/analysis.ipynb")
}

#[test]
fn test_unchanged_snapshot_records_nothing_new() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let document = doc();
    let snapshot = vec![unit("u1", "a"), unit("u2", "b")];

    let first = store
        .record_action(&action("save", 1, snapshot.clone()), &document)
        .unwrap();
    assert!(first.changed);
    store.flush().unwrap();

    let second = store
        .record_action(&action("save", 2, snapshot), &document)
        .unwrap();
    assert!(!second.changed);
    assert_eq!(second.version_order, first.version_order);

    // Only the action record itself was queued the second time.
    assert_eq!(store.pending_writes(), 1);
    assert_eq!(
        store
            .get_all_unit_versions(&UnitId("u1".into()))
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        store
            .get_configs(&document, Timestamp(0), Timestamp(10))
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_revert_reuses_first_version() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let document = doc();

    let v1 = store
        .record_action(&action("edit", 1, vec![unit("u1", "x")]), &document)
        .unwrap()
        .version_order[0]
        .clone();
    let v2 = store
        .record_action(&action("edit", 2, vec![unit("u1", "y")]), &document)
        .unwrap()
        .version_order[0]
        .clone();
    assert_ne!(v1, v2);

    // Undo back to "x": V1 is reused, no V3 is minted.
    let reverted = store
        .record_action(&action("undo", 3, vec![unit("u1", "x")]), &document)
        .unwrap();
    assert!(reverted.changed);
    assert_eq!(reverted.version_order[0], v1);
    assert_eq!(
        store
            .get_all_unit_versions(&UnitId("u1".into()))
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn test_full_history_only_grows() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let document = doc();
    let unit_id = UnitId("u1".into());

    let mut last_len = 0;
    for (i, source) in ["a", "b", "a", "c", "b", "b"].iter().enumerate() {
        store
            .record_action(
                &action("edit", i as i64 + 1, vec![unit("u1", source)]),
                &document,
            )
            .unwrap();
        if i == 2 {
            store.flush().unwrap();
        }

        let history = store.get_all_unit_versions(&unit_id).unwrap();
        assert!(history.len() >= last_len);
        last_len = history.len();
    }

    // Three distinct contents, three versions, regardless of revisits.
    assert_eq!(last_len, 3);
}

#[test]
fn test_strict_output_mode_is_store_configurable() {
    let dir = TempDir::new().unwrap();
    let store = Store::create(StoreConfig {
        path: dir.path().join("store"),
        debounce: Duration::from_secs(60),
        compare_outputs: true,
        ..Default::default()
    })
    .unwrap();
    let document = doc();

    let first = store
        .record_action(
            &action("run", 1, vec![unit_with_output("u1", "print(n)", "1")]),
            &document,
        )
        .unwrap();
    let second = store
        .record_action(
            &action("run", 2, vec![unit_with_output("u1", "print(n)", "2")]),
            &document,
        )
        .unwrap();

    // Same source, different output: strict mode mints a new version.
    assert!(second.changed);
    assert_ne!(second.version_order[0], first.version_order[0]);
}

#[test]
fn test_default_mode_dedups_across_output_changes() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let document = doc();

    let first = store
        .record_action(
            &action("run", 1, vec![unit_with_output("u1", "print(n)", "1")]),
            &document,
        )
        .unwrap();
    let second = store
        .record_action(
            &action("run", 2, vec![unit_with_output("u1", "print(n)", "2")]),
            &document,
        )
        .unwrap();

    assert!(!second.changed);
    assert_eq!(second.version_order, first.version_order);
}

#[test]
fn test_dedup_looks_past_intervening_edits_of_other_units() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let document = doc();

    let first = store
        .record_action(
            &action("a", 1, vec![unit("u1", "x"), unit("u2", "1")]),
            &document,
        )
        .unwrap();
    store
        .record_action(
            &action("b", 2, vec![unit("u1", "y"), unit("u2", "1")]),
            &document,
        )
        .unwrap();
    store.flush().unwrap();
    store
        .record_action(
            &action("c", 3, vec![unit("u1", "y"), unit("u2", "2")]),
            &document,
        )
        .unwrap();

    // u1 reverts to "x" while u2 stays at "2"; the old u1 version comes
    // back from durable history.
    let reverted = store
        .record_action(
            &action("undo", 4, vec![unit("u1", "x"), unit("u2", "2")]),
            &document,
        )
        .unwrap();
    assert_eq!(reverted.version_order[0], first.version_order[0]);
}
