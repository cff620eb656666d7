//! Tests for environment provisioning.

use super::*;
use crate::test_support::{CreateFailure, MemoryBackend, MemoryBackendError};
use rstest::{fixture, rstest};
use std::time::Instant;

fn fast() -> Provisioner {
    Provisioner::new()
        .with_warmup(Duration::from_millis(20))
        .with_poll_interval(Duration::from_millis(1))
        .with_max_polls(5)
}

#[fixture]
fn backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.add_space("S1", "Marketing");
    backend.add_environment("S1", "master");
    backend
}

#[rstest]
#[tokio::test]
async fn existing_environments_are_returned_without_creation(backend: MemoryBackend) {
    let started = Instant::now();
    let env = fast()
        .with_warmup(Duration::from_secs(60))
        .ensure_environment(&backend, "S1", "master")
        .await
        .unwrap_or_else(|err| panic!("existing environment should be returned: {err}"));

    assert_eq!(env.id, "master");
    assert_eq!(backend.create_calls(), 0);
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[rstest]
#[tokio::test]
async fn missing_environments_are_created_and_warmed_up(backend: MemoryBackend) {
    let started = Instant::now();
    let env = fast()
        .with_default_name("Restored")
        .ensure_environment(&backend, "S1", "envX")
        .await
        .unwrap_or_else(|err| panic!("environment should be created: {err}"));

    assert_eq!(env.id, "envX");
    assert_eq!(env.name, "Restored");
    assert_eq!(backend.create_calls(), 1);
    assert!(backend.has_environment("S1", "envX"));
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[rstest]
#[tokio::test]
async fn queued_environments_are_polled_until_ready(backend: MemoryBackend) {
    backend.script_creation_statuses([
        EnvironmentStatus::Queued,
        EnvironmentStatus::Queued,
        EnvironmentStatus::Queued,
        EnvironmentStatus::Ready,
    ]);

    let env = fast()
        .ensure_environment(&backend, "S1", "envX")
        .await
        .unwrap_or_else(|err| panic!("environment should become ready: {err}"));

    assert_eq!(env.status, EnvironmentStatus::Ready);
    assert_eq!(backend.status_polls(), 4);
}

#[rstest]
#[case(vec![EnvironmentStatus::Queued], "still queued")]
#[case(vec![EnvironmentStatus::Queued, EnvironmentStatus::Failed], "failed")]
#[tokio::test]
async fn environments_that_never_get_ready_are_reported(
    backend: MemoryBackend,
    #[case] statuses: Vec<EnvironmentStatus>,
    #[case] reason_fragment: &str,
) {
    backend.script_creation_statuses(statuses);

    let result = fast().ensure_environment(&backend, "S1", "envX").await;

    let Err(ProvisionError::NotReady { reason, .. }) = result else {
        panic!("expected NotReady, got {result:?}");
    };
    assert!(reason.contains(reason_fragment), "unexpected reason: {reason}");
}

#[rstest]
#[tokio::test]
async fn unreported_status_counts_as_ready(backend: MemoryBackend) {
    backend.script_creation_statuses([EnvironmentStatus::Unknown]);

    let env = fast()
        .ensure_environment(&backend, "S1", "envX")
        .await
        .unwrap_or_else(|err| panic!("environment should be usable: {err}"));

    assert_eq!(env.status, EnvironmentStatus::Unknown);
}

#[rstest]
#[tokio::test]
async fn rejected_creation_is_not_retried(backend: MemoryBackend) {
    backend.fail_next_create(CreateFailure {
        error: MemoryBackendError::Rejected {
            message: String::from("environment limit reached"),
        },
        applied: false,
    });

    let result = fast().ensure_environment(&backend, "S1", "envX").await;

    assert!(matches!(result, Err(ProvisionError::Create { .. })));
    assert_eq!(backend.create_calls(), 1);
    assert!(!backend.has_environment("S1", "envX"));
}

#[rstest]
#[case(true)]
#[case(false)]
#[tokio::test]
async fn ambiguous_creation_is_resolved_by_lookup(backend: MemoryBackend, #[case] applied: bool) {
    backend.fail_next_create(CreateFailure {
        error: MemoryBackendError::Unavailable {
            message: String::from("connection reset"),
        },
        applied,
    });

    let result = fast().ensure_environment(&backend, "S1", "envX").await;

    assert_eq!(backend.create_calls(), 1);
    if applied {
        assert!(result.is_ok(), "expected the created environment: {result:?}");
    } else {
        assert!(matches!(result, Err(ProvisionError::Create { .. })));
    }
}

#[rstest]
#[tokio::test]
async fn lookup_failures_other_than_absence_propagate(backend: MemoryBackend) {
    backend.fail_next_lookup(MemoryBackendError::Unavailable {
        message: String::from("503 Service Unavailable"),
    });

    let result = fast().ensure_environment(&backend, "S1", "envX").await;

    assert!(matches!(result, Err(ProvisionError::Lookup { .. })));
    assert_eq!(backend.create_calls(), 0);
}
