//! Tests for the progress state machine.

use super::*;
use crate::classify::classify;
use rstest::{fixture, rstest};

#[fixture]
fn tracker() -> ProgressTracker {
    ProgressTracker::new()
}

fn three_steps() -> Vec<Step> {
    vec![
        Step::new("export", "Export source"),
        Step::new("provision", "Prepare target"),
        Step::new("import", "Import snapshot"),
    ]
}

#[rstest]
fn begin_initialises_an_active_operation(tracker: ProgressTracker) {
    let writer = tracker
        .begin("S1/staging", three_steps())
        .unwrap_or_else(|err| panic!("begin: {err}"));

    let state = tracker.snapshot();
    assert_eq!(state.phase, Phase::Active);
    assert_eq!(state.operation_id, Some(writer.operation_id()));
    assert_eq!(state.overall_progress_percent, 0);
    assert_eq!(state.current_step_index, 0);
    assert!(state.steps.iter().all(|step| step.status == StepStatus::Pending));
    drop(writer);
}

#[rstest]
fn starting_while_active_is_rejected(tracker: ProgressTracker) {
    let _writer = tracker
        .begin("first", three_steps())
        .unwrap_or_else(|err| panic!("begin: {err}"));

    let Err(err) = tracker.begin("second", three_steps()) else {
        panic!("second start should be rejected");
    };
    assert_eq!(
        err,
        ProgressError::Busy {
            label: String::from("first")
        }
    );
    assert_eq!(tracker.snapshot().target_label, "first");
}

#[rstest]
fn percentage_never_decreases(tracker: ProgressTracker) {
    let writer = tracker
        .begin("op", three_steps())
        .unwrap_or_else(|err| panic!("begin: {err}"));
    let mut seen = Vec::new();

    writer.start_step("export");
    writer.report_percent(20);
    seen.push(tracker.snapshot().overall_progress_percent);
    writer.report_percent(10);
    seen.push(tracker.snapshot().overall_progress_percent);
    writer.finish_step("export");
    seen.push(tracker.snapshot().overall_progress_percent);
    writer.report_percent(5);
    seen.push(tracker.snapshot().overall_progress_percent);
    writer.start_step("provision");
    writer.finish_step("provision");
    seen.push(tracker.snapshot().overall_progress_percent);
    writer.start_step("import");
    writer.report_percent(250);
    seen.push(tracker.snapshot().overall_progress_percent);
    writer.complete();
    seen.push(tracker.snapshot().overall_progress_percent);

    assert!(seen.windows(2).all(|pair| pair.first() <= pair.last()), "{seen:?}");
    assert_eq!(seen, vec![20, 20, 33, 33, 66, 100, 100]);
}

#[rstest]
fn step_index_never_exceeds_step_count(tracker: ProgressTracker) {
    let writer = tracker
        .begin("op", three_steps())
        .unwrap_or_else(|err| panic!("begin: {err}"));

    for id in ["export", "provision", "import", "import", "unknown"] {
        writer.start_step(id);
        writer.finish_step(id);
        let state = tracker.snapshot();
        assert!(state.current_step_index <= state.steps.len());
    }
    assert_eq!(tracker.snapshot().current_step_index, 3);
    writer.complete();
    assert_eq!(tracker.snapshot().current_step_index, 3);
}

#[rstest]
fn flagged_steps_keep_their_status_when_finished(tracker: ProgressTracker) {
    let writer = tracker
        .begin("op", three_steps())
        .unwrap_or_else(|err| panic!("begin: {err}"));

    writer.start_step("export");
    writer.flag_current_step(StepStatus::Error);
    writer.flag_current_step(StepStatus::Warning);
    writer.finish_step("export");

    let state = tracker.snapshot();
    assert_eq!(
        state.steps.first().map(|step| step.status),
        Some(StepStatus::Error)
    );
    assert_eq!(state.phase, Phase::Active);
}

#[rstest]
fn failure_requires_dismissal(tracker: ProgressTracker) {
    let writer = tracker
        .begin("op", three_steps())
        .unwrap_or_else(|err| panic!("begin: {err}"));
    writer.start_step("export");
    writer.fail("boom", None);

    let state = tracker.snapshot();
    assert_eq!(state.phase, Phase::Failed);
    assert_eq!(
        state.failure.as_ref().map(|failure| failure.message.as_str()),
        Some("boom")
    );
    assert_eq!(
        state.steps.first().map(|step| step.status),
        Some(StepStatus::Error)
    );

    let Err(err) = tracker.begin("next", three_steps()) else {
        panic!("start after failure should wait for dismissal");
    };
    assert!(matches!(err, ProgressError::AwaitingDismissal { .. }));

    tracker
        .dismiss()
        .unwrap_or_else(|err| panic!("dismiss: {err}"));
    assert_eq!(tracker.snapshot(), OperationProgress::default());
    assert!(tracker.begin("next", three_steps()).is_ok());
}

#[rstest]
fn warning_failures_flag_the_step_as_warning(tracker: ProgressTracker) {
    let writer = tracker
        .begin("op", three_steps())
        .unwrap_or_else(|err| panic!("begin: {err}"));
    writer.start_step("import");
    let message = "Rate limit exceeded";
    writer.fail(message, classify(message));

    let state = tracker.snapshot();
    assert_eq!(state.phase, Phase::Failed);
    assert_eq!(
        state.steps.get(2).map(|step| step.status),
        Some(StepStatus::Warning)
    );
    assert!(
        state
            .failure
            .and_then(|failure| failure.instruction)
            .is_some_and(|instruction| instruction.is_warning())
    );
}

#[rstest]
fn completed_operations_are_replaced_by_a_new_start(tracker: ProgressTracker) {
    let writer = tracker
        .begin("first", three_steps())
        .unwrap_or_else(|err| panic!("begin: {err}"));
    writer.log("line");
    writer.complete();
    assert_eq!(tracker.snapshot().phase, Phase::Completed);

    let _next = tracker
        .begin("second", three_steps())
        .unwrap_or_else(|err| panic!("begin after completion: {err}"));
    let state = tracker.snapshot();
    assert_eq!(state.target_label, "second");
    assert!(state.log_lines.is_empty());
}

#[rstest]
fn dismissing_an_active_operation_is_rejected(tracker: ProgressTracker) {
    let _writer = tracker
        .begin("op", three_steps())
        .unwrap_or_else(|err| panic!("begin: {err}"));

    assert!(matches!(
        tracker.dismiss(),
        Err(ProgressError::StillActive { .. })
    ));
}

#[rstest]
fn abandoned_operations_ignore_late_signals(tracker: ProgressTracker) {
    let writer = tracker
        .begin("op", three_steps())
        .unwrap_or_else(|err| panic!("begin: {err}"));
    writer.log("before");

    assert!(tracker.abandon());
    assert!(writer.is_abandoned());
    writer.log("after");
    writer.complete();

    let state = tracker.snapshot();
    assert_eq!(state.phase, Phase::Aborted);
    assert_eq!(state.log_lines, vec![String::from("before")]);
}

#[rstest]
fn dropping_an_active_writer_aborts(tracker: ProgressTracker) {
    let writer = tracker
        .begin("op", three_steps())
        .unwrap_or_else(|err| panic!("begin: {err}"));
    drop(writer);

    assert_eq!(tracker.snapshot().phase, Phase::Aborted);
    assert!(tracker.begin("again", three_steps()).is_ok());
}

#[rstest]
fn log_retention_is_bounded(tracker: ProgressTracker) {
    let writer = tracker
        .begin("op", three_steps())
        .unwrap_or_else(|err| panic!("begin: {err}"));
    for n in 0..(MAX_LOG_LINES + 10) {
        writer.log(format!("line {n}"));
    }

    let state = tracker.snapshot();
    assert_eq!(state.log_lines.len(), MAX_LOG_LINES);
    assert_eq!(state.log_line_count, u64::try_from(MAX_LOG_LINES + 10).unwrap_or(0));
    assert_eq!(state.log_lines.first().map(String::as_str), Some("line 10"));
}

#[rstest]
fn stall_detection_only_applies_to_active_operations(tracker: ProgressTracker) {
    let writer = tracker
        .begin("op", three_steps())
        .unwrap_or_else(|err| panic!("begin: {err}"));
    let later = Utc::now() + chrono::Duration::minutes(10);

    assert!(tracker.snapshot().is_stalled(Duration::from_secs(60), later));
    assert!(!tracker.snapshot().is_stalled(Duration::from_secs(3600), later));
    writer.complete();
    assert!(!tracker.snapshot().is_stalled(Duration::from_secs(60), later));
}

#[rstest]
fn empty_step_lists_are_rejected(tracker: ProgressTracker) {
    assert!(matches!(
        tracker.begin("op", Vec::new()),
        Err(ProgressError::NoSteps)
    ));
}
