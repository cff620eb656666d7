//! Unit tests for the orchestration flows.

use std::time::Duration;

use super::*;
use crate::progress::{Phase, StepStatus};
use crate::test_support::{
    MemoryBackend, MemoryBackendError, ScriptedTransfer, ScriptedTransferRunner,
};
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    backend: MemoryBackend,
    runner: ScriptedTransferRunner,
    orchestrator: Orchestrator<MemoryBackend, ScriptedTransferRunner>,
}

#[fixture]
fn harness() -> Harness {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("temp dir: {err}"));
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .unwrap_or_else(|path| panic!("non-UTF-8 temp path: {}", path.display()));
    let backend = MemoryBackend::new();
    backend.add_space("S1", "Marketing Site");
    backend.add_environment("S1", "master");
    backend.add_environment("S1", "staging");
    let runner = ScriptedTransferRunner::new();
    let executor = Executor::new("contentful", "token", runner.clone())
        .unwrap_or_else(|err| panic!("executor should build: {err}"));
    let provisioner = Provisioner::new()
        .with_warmup(Duration::from_millis(1))
        .with_poll_interval(Duration::from_millis(1));
    let orchestrator = Orchestrator::new(backend.clone(), executor, SnapshotStore::new(root))
        .with_provisioner(provisioner);
    Harness {
        _dir: dir,
        backend,
        runner,
        orchestrator,
    }
}

fn export(entries: &[(&str, &str)]) -> Value {
    let entries: Vec<Value> = entries
        .iter()
        .map(|(id, title)| {
            json!({
                "sys": {"id": id, "contentType": {"sys": {"id": "post"}}},
                "fields": {"title": {"en-US": title}}
            })
        })
        .collect();
    json!({
        "contentTypes": [{
            "sys": {"id": "post"},
            "name": "Post",
            "displayField": "title",
            "fields": [{"id": "title", "name": "Title", "type": "Symbol", "required": true}]
        }],
        "entries": entries,
        "assets": [],
        "locales": [{"code": "en-US"}]
    })
}

#[rstest]
#[case("", "staging", "space_id")]
#[case("S1", "  ", "environment_id")]
#[tokio::test]
async fn backup_validates_before_any_remote_call(
    harness: Harness,
    #[case] space: &str,
    #[case] env: &str,
    #[case] field: &str,
) {
    let result = harness.orchestrator.backup(space, env).await;

    let Err(OrchestratorError::Validation { field: reported }) = result else {
        panic!("expected a validation error, got {result:?}");
    };
    assert_eq!(reported, field);
    assert!(harness.runner.invocations().is_empty());
    assert_eq!(harness.orchestrator.tracker().snapshot().phase, Phase::Idle);
}

#[rstest]
#[tokio::test]
async fn backup_names_the_snapshot_after_the_space(harness: Harness) {
    harness
        .runner
        .push(ScriptedTransfer::export(export(&[("p1", "Hello")])));

    let file = harness
        .orchestrator
        .backup("S1", "staging")
        .await
        .unwrap_or_else(|err| panic!("backup should succeed: {err}"));

    assert!(file.name.starts_with("Marketing-Site-staging-"), "{}", file.name);
    let state = harness.orchestrator.tracker().snapshot();
    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.overall_progress_percent, 100);
    assert!(
        state
            .steps
            .iter()
            .all(|step| step.status == StepStatus::Completed)
    );
}

#[rstest]
#[tokio::test]
async fn backup_falls_back_to_the_space_id(harness: Harness) {
    harness
        .runner
        .push(ScriptedTransfer::export(export(&[])));

    let file = harness
        .orchestrator
        .backup("S9", "master")
        .await
        .unwrap_or_else(|err| panic!("backup should succeed: {err}"));

    assert!(file.name.starts_with("S9-master-"), "{}", file.name);
}

#[rstest]
#[tokio::test]
async fn restore_of_a_missing_snapshot_fails_the_operation(harness: Harness) {
    let result = harness
        .orchestrator
        .restore("S1", "missing.json", "staging")
        .await;

    assert!(matches!(
        result,
        Err(OrchestratorError::Store(StoreError::NotFound { .. }))
    ));
    let state = harness.orchestrator.tracker().snapshot();
    assert_eq!(state.phase, Phase::Failed);
    assert!(state.failure.is_some_and(|failure| failure.instruction.is_none()));
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn migrate_stores_then_imports_into_the_target(harness: Harness) {
    harness
        .runner
        .push(ScriptedTransfer::export(export(&[("p1", "Hello")])));
    harness.runner.push(ScriptedTransfer::success());

    let file = harness
        .orchestrator
        .migrate("S1", "staging", "qa")
        .await
        .unwrap_or_else(|err| panic!("migration should succeed: {err}"));

    assert!(harness.backend.has_environment("S1", "qa"));
    let listed = harness
        .orchestrator
        .store()
        .list("S1")
        .unwrap_or_else(|err| panic!("list should succeed: {err}"));
    assert_eq!(
        listed.first().map(|entry| entry.name.clone()),
        Some(file.name)
    );
    let imported = harness.runner.imported_documents();
    assert_eq!(imported.len(), 1);
    assert_eq!(
        imported
            .first()
            .and_then(|doc| doc.pointer("/entries/0/sys/id")),
        Some(&json!("p1"))
    );
}

#[rstest]
#[tokio::test]
async fn compare_and_migrate_selection_import_only_changes(harness: Harness) {
    harness.runner.push(ScriptedTransfer::export(export(&[
        ("p1", "Hello"),
        ("p2", "World!"),
        ("p3", "New"),
    ])));
    harness
        .runner
        .push(ScriptedTransfer::export(export(&[("p1", "Hello"), ("p2", "World")])));
    harness.runner.push(ScriptedTransfer::success());

    let comparison = harness
        .orchestrator
        .compare("S1", "staging", "master")
        .await
        .unwrap_or_else(|err| panic!("compare should succeed: {err}"));
    assert_eq!(comparison.diff.new_entry_total(), 1);
    assert_eq!(comparison.diff.modified_entry_total(), 1);
    assert!(
        harness
            .orchestrator
            .store()
            .list("S1")
            .unwrap_or_else(|err| panic!("list should succeed: {err}"))
            .is_empty()
    );

    let selection = Selection::all_changes(&comparison.diff);
    let partial = harness
        .orchestrator
        .migrate_selection(&comparison, &selection)
        .await
        .unwrap_or_else(|err| panic!("selective migration should succeed: {err}"));

    let ids: Vec<&str> = partial.entries.iter().map(|entry| entry.id()).collect();
    assert_eq!(ids, vec!["p2", "p3"]);
    assert!(partial.content_types.is_empty());
    let imported = harness.runner.imported_documents();
    assert_eq!(
        imported
            .first()
            .and_then(|doc| doc.get("entries"))
            .and_then(Value::as_array)
            .map(Vec::len),
        Some(2)
    );
}

#[rstest]
#[tokio::test]
async fn empty_selections_are_rejected(harness: Harness) {
    let comparison = Comparison {
        space_id: String::from("S1"),
        source_environment: String::from("staging"),
        target_environment: String::from("master"),
        source: SnapshotContent::default(),
        target: SnapshotContent::default(),
        diff: DiffResult::default(),
    };

    let result = harness
        .orchestrator
        .migrate_selection(&comparison, &Selection::default())
        .await;

    assert!(matches!(
        result,
        Err(OrchestratorError::Validation { field: "selection" })
    ));
}

#[rstest]
#[tokio::test]
async fn abandoned_operations_stop_before_the_next_step(harness: Harness) {
    harness
        .runner
        .push(ScriptedTransfer::export(export(&[("p1", "Hello")])));
    let gate = harness.runner.hold_next_run();
    let tracker = harness.orchestrator.tracker().clone();

    let abandon = async {
        while !gate.entered() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(tracker.abandon());
        gate.release();
    };
    let (result, ()) = tokio::join!(harness.orchestrator.migrate("S1", "staging", "qa"), abandon);

    assert!(matches!(result, Err(OrchestratorError::Abandoned)));
    assert_eq!(tracker.snapshot().phase, Phase::Aborted);
    assert!(!harness.backend.has_environment("S1", "qa"));
    assert_eq!(harness.runner.invocations().len(), 1);
    assert!(
        harness
            .orchestrator
            .store()
            .list("S1")
            .unwrap_or_else(|err| panic!("list should succeed: {err}"))
            .is_empty()
    );
}

#[rstest]
#[tokio::test]
async fn entry_diff_reports_changed_fields(harness: Harness) {
    harness.backend.add_entry(
        "S1",
        "staging",
        "p1",
        json!({"sys": {"id": "p1"}, "fields": {"title": {"en-US": "New"}, "slug": {"en-US": "a"}}}),
    );
    harness.backend.add_entry(
        "S1",
        "master",
        "p1",
        json!({"sys": {"id": "p1"}, "fields": {"title": {"en-US": "Old"}, "slug": {"en-US": "a"}}}),
    );

    let changes = harness
        .orchestrator
        .entry_diff("S1", "staging", "master", "p1")
        .await
        .unwrap_or_else(|err| panic!("entry diff should succeed: {err}"));
    assert_eq!(
        changes
            .iter()
            .map(|change| change.field_id.as_str())
            .collect::<Vec<_>>(),
        vec!["title"]
    );

    let missing_target = harness
        .orchestrator
        .entry_diff("S1", "staging", "qa", "p1")
        .await
        .unwrap_or_else(|err| panic!("entry diff should succeed: {err}"));
    assert_eq!(missing_target.len(), 2);

    let missing_source = harness
        .orchestrator
        .entry_diff("S1", "qa", "master", "p1")
        .await;
    assert!(matches!(
        missing_source,
        Err(OrchestratorError::Remote(ref err)) if err.is_not_found()
    ));
}

#[rstest]
#[tokio::test]
async fn panicking_transfer_jobs_leave_the_operation_failed(harness: Harness) {
    let tracker = harness.orchestrator.tracker().clone();
    let writer = tracker
        .begin("backup S1/staging", vec![Step::new("export", "Export staging")])
        .unwrap_or_else(|err| panic!("begin should succeed: {err}"));
    let session: Session<MemoryBackendError> = Session::new(writer);
    session.start_step("export");

    let outcome: Result<(), OrchestratorError<MemoryBackendError>> = session
        .transfer(
            &harness.orchestrator.executor,
            |_, _| -> Result<(), TransferError> { panic!("export tool crashed") },
        )
        .await;
    assert!(matches!(outcome, Err(OrchestratorError::Interrupted { .. })));
    let concluded = session.conclude(outcome);

    assert!(concluded.is_err());
    let state = tracker.snapshot();
    assert_eq!(state.phase, Phase::Failed);
    assert!(
        state
            .failure
            .is_some_and(|failure| failure.message.starts_with("transfer job interrupted"))
    );
}
