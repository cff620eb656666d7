//! Tests for the snapshot store.

use super::*;
use crate::snapshot::{SnapshotContent, SnapshotOrigin};
use chrono::TimeZone;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct StoreFixture {
    _tmp: TempDir,
    store: SnapshotStore,
}

#[fixture]
fn store_fixture() -> StoreFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().join("backups"))
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    StoreFixture {
        _tmp: tmp,
        store: SnapshotStore::new(root),
    }
}

fn snapshot(space: &str, env: &str, second: u32) -> Snapshot {
    Snapshot {
        origin: SnapshotOrigin {
            space_id: space.to_owned(),
            environment_id: env.to_owned(),
            created_at: Utc
                .with_ymd_and_hms(2024, 5, 1, 10, 20, second)
                .single(),
        },
        content: SnapshotContent::default(),
    }
}

#[test]
fn file_names_encode_label_environment_and_timestamp() {
    let at = Utc
        .with_ymd_and_hms(2024, 5, 1, 10, 20, 30)
        .single()
        .unwrap_or_else(|| panic!("valid timestamp"));

    assert_eq!(
        snapshot_file_name("My Space", "staging", at),
        "My-Space-staging-2024-05-01T10-20-30-000Z.json"
    );
}

#[rstest]
#[case("release-1", "release-1.json")]
#[case("release_1.json", "release_1.json")]
#[case("  nightly.v2  ", "nightly.v2.json")]
fn valid_names_gain_json_suffix(#[case] input: &str, #[case] expected: &str) {
    let name = validate_new_name(input).unwrap_or_else(|err| panic!("valid name: {err}"));
    assert_eq!(name, expected);
}

#[rstest]
#[case("")]
#[case(".hidden")]
#[case("../escape")]
#[case("with space")]
#[case("semi;colon")]
fn invalid_names_are_rejected(#[case] input: &str) {
    let Err(err) = validate_new_name(input) else {
        panic!("name {input:?} should be rejected");
    };
    assert!(matches!(err, StoreError::InvalidName { .. }));
}

#[rstest]
fn saved_snapshots_are_listed_and_loadable(store_fixture: StoreFixture) {
    let StoreFixture { store, .. } = store_fixture;
    let original = snapshot("S1", "staging", 30);

    let file = store
        .save("S1", &original)
        .unwrap_or_else(|err| panic!("save: {err}"));

    assert!(file.name.starts_with("S1-staging-"));
    let listed = store.list("S1").unwrap_or_else(|err| panic!("list: {err}"));
    assert_eq!(listed.len(), 1);
    assert_eq!(listed.first().map(|f| f.name.as_str()), Some(file.name.as_str()));

    let loaded = store
        .load("S1", &file.name)
        .unwrap_or_else(|err| panic!("load: {err}"));
    assert_eq!(loaded, original);
}

#[rstest]
fn listing_an_unknown_space_is_empty(store_fixture: StoreFixture) {
    let listed = store_fixture
        .store
        .list("nobody")
        .unwrap_or_else(|err| panic!("list: {err}"));
    assert!(listed.is_empty());
}

#[rstest]
fn listing_ignores_non_json_files(store_fixture: StoreFixture) {
    let StoreFixture { store, .. } = store_fixture;
    store
        .save("S1", &snapshot("S1", "master", 1))
        .unwrap_or_else(|err| panic!("save: {err}"));
    let stray = store.root().join("S1").join("notes.txt");
    std::fs::write(&stray, "not a snapshot").unwrap_or_else(|err| panic!("write: {err}"));

    let listed = store.list("S1").unwrap_or_else(|err| panic!("list: {err}"));
    assert_eq!(listed.len(), 1);
}

#[rstest]
fn rename_moves_the_file_and_appends_suffix(store_fixture: StoreFixture) {
    let StoreFixture { store, .. } = store_fixture;
    let file = store
        .save("S1", &snapshot("S1", "master", 1))
        .unwrap_or_else(|err| panic!("save: {err}"));

    let renamed = store
        .rename("S1", &file.name, "before-launch")
        .unwrap_or_else(|err| panic!("rename: {err}"));

    assert_eq!(renamed.name, "before-launch.json");
    let names: Vec<String> = store
        .list("S1")
        .unwrap_or_else(|err| panic!("list: {err}"))
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, vec![String::from("before-launch.json")]);
}

#[rstest]
fn rename_refuses_to_overwrite(store_fixture: StoreFixture) {
    let StoreFixture { store, .. } = store_fixture;
    let first = store
        .save("S1", &snapshot("S1", "master", 1))
        .unwrap_or_else(|err| panic!("save: {err}"));
    let second = store
        .save("S1", &snapshot("S1", "master", 2))
        .unwrap_or_else(|err| panic!("save: {err}"));

    let Err(err) = store.rename("S1", &first.name, &second.name) else {
        panic!("rename onto an existing snapshot should fail");
    };
    assert!(matches!(err, StoreError::AlreadyExists { .. }));
}

#[rstest]
fn delete_removes_the_snapshot(store_fixture: StoreFixture) {
    let StoreFixture { store, .. } = store_fixture;
    let file = store
        .save("S1", &snapshot("S1", "master", 1))
        .unwrap_or_else(|err| panic!("save: {err}"));

    store
        .delete("S1", &file.name)
        .unwrap_or_else(|err| panic!("delete: {err}"));

    assert!(store.list("S1").unwrap_or_else(|err| panic!("list: {err}")).is_empty());
    let Err(err) = store.delete("S1", &file.name) else {
        panic!("second delete should fail");
    };
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[rstest]
fn paths_cannot_escape_the_root(store_fixture: StoreFixture) {
    let Err(err) = store_fixture.store.load("S1", "../other/x.json") else {
        panic!("traversal should be rejected");
    };
    assert!(matches!(err, StoreError::InvalidName { .. }));
}
