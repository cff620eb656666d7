//! Core library for the `snapmigrate` content snapshot tool.
//!
//! The crate captures environments of a hosted content platform as local
//! JSON snapshots, restores them into new or existing environments, copies
//! one environment into another, and performs selective migrations driven by
//! a snapshot diff. Remote lookups go through the [`ContentBackend`] trait,
//! export and import jobs through the [`Executor`], and every long-running
//! operation reports into a shared [`ProgressTracker`].

pub mod backend;
pub mod classify;
pub mod config;
pub mod contentful;
pub mod diff;
pub mod executor;
pub mod orchestrator;
pub mod progress;
pub mod provision;
pub mod snapshot;
pub mod store;
pub mod test_support;

pub use backend::{
    BackendFuture, ContentBackend, Environment, EnvironmentStatus, RemoteFailure, Space,
};
pub use classify::{ErrorInstruction, Severity, classify};
pub use config::{ConfigError, SnapConfig};
pub use contentful::{ContentfulBackend, ContentfulError};
pub use diff::{ContentTypeDiff, DiffResult, EntryRef, FieldChange, Selection, diff};
pub use executor::{Executor, ProcessTransferRunner, TransferError, TransferRunner};
pub use orchestrator::{Comparison, Orchestrator, OrchestratorError};
pub use progress::{
    MAX_LOG_LINES, OperationProgress, Phase, ProgressError, ProgressTracker, ProgressWriter, Step,
    StepStatus,
};
pub use provision::{ProvisionError, Provisioner};
pub use snapshot::{Snapshot, SnapshotContent, SnapshotOrigin};
pub use store::{SnapshotFile, SnapshotStore, StoreError};
