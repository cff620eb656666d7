//! Orchestrates backup, restore, migration and comparison flows.
//!
//! Each tracked operation validates its identifiers before any remote call,
//! claims the [`ProgressTracker`], and then walks its steps: environment
//! provisioning through the [`Provisioner`], export and import through the
//! [`Executor`] on the blocking pool, snapshot persistence through the
//! [`SnapshotStore`]. Failures are classified for display and leave the
//! tracker failed until dismissed.

mod session;

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::backend::{ContentBackend, Environment, RemoteFailure, Space};
use crate::classify::{ErrorInstruction, classify};
use crate::diff::{DiffResult, FieldChange, Selection, diff, entry_changes, select};
use crate::executor::{Executor, TransferError, TransferRunner};
use crate::progress::{ProgressError, ProgressTracker, Step};
use crate::provision::{ProvisionError, Provisioner};
use crate::snapshot::SnapshotContent;
use crate::store::{SnapshotFile, SnapshotStore, StoreError};
use session::Session;

/// Errors surfaced by orchestrated operations.
#[derive(Debug, Error)]
pub enum OrchestratorError<BackendError>
where
    BackendError: std::error::Error + 'static,
{
    /// Raised before any remote call when a required identifier is blank.
    #[error("missing required value: {field}")]
    Validation {
        /// Name of the blank value.
        field: &'static str,
    },
    /// Raised when the tracker refuses to start a new operation.
    #[error(transparent)]
    Progress(#[from] ProgressError),
    /// Raised when the target environment cannot be ensured.
    #[error(transparent)]
    Provision(#[from] ProvisionError<BackendError>),
    /// Raised when an export or import job fails.
    #[error(transparent)]
    Transfer(#[from] TransferError),
    /// Raised when the snapshot store fails.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Raised when a direct backend request fails.
    #[error("remote request failed: {0}")]
    Remote(#[source] BackendError),
    /// Raised when the operation was abandoned before its next step.
    #[error("operation abandoned")]
    Abandoned,
    /// Raised when a blocking job could not run to completion.
    #[error("transfer job interrupted: {message}")]
    Interrupted {
        /// Join error description.
        message: String,
    },
}

impl<E> OrchestratorError<E>
where
    E: std::error::Error + 'static,
{
    /// Classifies the rendered error for display.
    #[must_use]
    pub fn instruction(&self) -> Option<ErrorInstruction> {
        classify(&self.to_string())
    }
}

/// Exports of two environments and their comparison.
#[derive(Clone, Debug)]
pub struct Comparison {
    /// Space both environments belong to.
    pub space_id: String,
    /// Environment used as the template.
    pub source_environment: String,
    /// Environment used as the baseline.
    pub target_environment: String,
    /// Export of the source environment.
    pub source: SnapshotContent,
    /// Export of the target environment.
    pub target: SnapshotContent,
    /// Changes the source carries relative to the target.
    pub diff: DiffResult,
}

/// Executes tracked operations against one backend and snapshot store.
#[derive(Debug)]
pub struct Orchestrator<B, R: TransferRunner> {
    backend: B,
    executor: Arc<Executor<R>>,
    store: SnapshotStore,
    tracker: ProgressTracker,
    provisioner: Provisioner,
}

fn require<E>(field: &'static str, value: &str) -> Result<(), OrchestratorError<E>>
where
    E: std::error::Error + 'static,
{
    if value.trim().is_empty() {
        return Err(OrchestratorError::Validation { field });
    }
    Ok(())
}

impl<B, R> Orchestrator<B, R>
where
    B: ContentBackend,
    R: TransferRunner + 'static,
{
    /// Creates an orchestrator with a fresh tracker and default timings.
    #[must_use]
    pub fn new(backend: B, executor: Executor<R>, store: SnapshotStore) -> Self {
        Self {
            backend,
            executor: Arc::new(executor),
            store,
            tracker: ProgressTracker::new(),
            provisioner: Provisioner::new(),
        }
    }

    /// Replaces the provisioner, typically to shorten waits in tests.
    #[must_use]
    pub fn with_provisioner(mut self, provisioner: Provisioner) -> Self {
        self.provisioner = provisioner;
        self
    }

    /// Shares an existing tracker with this orchestrator.
    #[must_use]
    pub fn with_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Tracker reporting this orchestrator's operations.
    #[must_use]
    pub const fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Snapshot store used for backups.
    #[must_use]
    pub const fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Lists the spaces visible to the configured credentials.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Remote`] when the request fails.
    pub async fn spaces(&self) -> Result<Vec<Space>, OrchestratorError<B::Error>> {
        self.backend
            .list_spaces()
            .await
            .map_err(OrchestratorError::Remote)
    }

    /// Lists the environments of a space.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Validation`] for a blank id and
    /// [`OrchestratorError::Remote`] when the request fails.
    pub async fn environments(
        &self,
        space_id: &str,
    ) -> Result<Vec<Environment>, OrchestratorError<B::Error>> {
        require("space_id", space_id)?;
        self.backend
            .get_environments(space_id)
            .await
            .map_err(OrchestratorError::Remote)
    }

    /// Exports an environment and stores it as a new snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when validation, the export, or the
    /// write fails. The tracker records the failure.
    pub async fn backup(
        &self,
        space_id: &str,
        environment_id: &str,
    ) -> Result<SnapshotFile, OrchestratorError<B::Error>> {
        require("space_id", space_id)?;
        require("environment_id", environment_id)?;
        let writer = self.tracker.begin(
            format!("backup {space_id}/{environment_id}"),
            vec![
                Step::new("export", format!("Export {environment_id}")),
                Step::new("save", "Save snapshot"),
            ],
        )?;
        let session: Session<B::Error> = Session::new(writer);
        let outcome = self
            .export_and_save(&session, space_id, environment_id)
            .await
            .map(|(_, file)| file);
        session.conclude(outcome)
    }

    /// Imports a stored snapshot into `environment_id`, creating the
    /// environment first when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when validation, loading, provisioning,
    /// or the import fails. The tracker records the failure.
    pub async fn restore(
        &self,
        space_id: &str,
        snapshot_name: &str,
        environment_id: &str,
    ) -> Result<Environment, OrchestratorError<B::Error>> {
        require("space_id", space_id)?;
        require("snapshot_name", snapshot_name)?;
        require("environment_id", environment_id)?;
        let writer = self.tracker.begin(
            format!("restore {snapshot_name} to {space_id}/{environment_id}"),
            vec![
                Step::new("load", "Load snapshot"),
                Step::new("environment", format!("Ensure environment {environment_id}")),
                Step::new("import", format!("Import into {environment_id}")),
            ],
        )?;
        let session: Session<B::Error> = Session::new(writer);
        let outcome: Result<Environment, OrchestratorError<B::Error>> = async {
            session.start_step("load");
            let snapshot = self.store.load(space_id, snapshot_name)?;
            session.log(format!("Loaded snapshot {snapshot_name}"));
            session.finish_step("load");

            let environment = self
                .ensure_step(&session, space_id, environment_id)
                .await?;
            self.import_step(&session, space_id, environment_id, snapshot.content)
                .await?;
            Ok(environment)
        }
        .await;
        session.conclude(outcome)
    }

    /// Copies `from` into `to`: exports `from`, stores the snapshot, ensures
    /// `to` exists, and imports.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when any step fails. The tracker
    /// records the failure.
    pub async fn migrate(
        &self,
        space_id: &str,
        from: &str,
        to: &str,
    ) -> Result<SnapshotFile, OrchestratorError<B::Error>> {
        require("space_id", space_id)?;
        require("source_environment", from)?;
        require("target_environment", to)?;
        let writer = self.tracker.begin(
            format!("migrate {space_id}/{from} to {to}"),
            vec![
                Step::new("export", format!("Export {from}")),
                Step::new("save", "Save snapshot"),
                Step::new("environment", format!("Ensure environment {to}")),
                Step::new("import", format!("Import into {to}")),
            ],
        )?;
        let session: Session<B::Error> = Session::new(writer);
        let outcome: Result<SnapshotFile, OrchestratorError<B::Error>> = async {
            let (content, file) = self.export_and_save(&session, space_id, from).await?;
            self.ensure_step(&session, space_id, to).await?;
            self.import_step(&session, space_id, to, content).await?;
            Ok(file)
        }
        .await;
        session.conclude(outcome)
    }

    /// Exports both environments and compares them. Nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when validation or either export
    /// fails. The tracker records the failure.
    pub async fn compare(
        &self,
        space_id: &str,
        from: &str,
        to: &str,
    ) -> Result<Comparison, OrchestratorError<B::Error>> {
        require("space_id", space_id)?;
        require("source_environment", from)?;
        require("target_environment", to)?;
        let writer = self.tracker.begin(
            format!("compare {space_id}/{from} with {to}"),
            vec![
                Step::new("export-source", format!("Export {from}")),
                Step::new("export-target", format!("Export {to}")),
                Step::new("diff", "Compare content"),
            ],
        )?;
        let session: Session<B::Error> = Session::new(writer);
        let outcome: Result<Comparison, OrchestratorError<B::Error>> = async {
            let source = self
                .export_step(&session, "export-source", space_id, from)
                .await?;
            let target = self
                .export_step(&session, "export-target", space_id, to)
                .await?;

            session.start_step("diff");
            let result = diff(&source, &target);
            session.log(format!(
                "{} content types changed, {} new and {} modified entries",
                result.changed().count(),
                result.new_entry_total(),
                result.modified_entry_total()
            ));
            session.finish_step("diff");
            Ok(Comparison {
                space_id: space_id.to_owned(),
                source_environment: from.to_owned(),
                target_environment: to.to_owned(),
                source,
                target,
                diff: result,
            })
        }
        .await;
        session.conclude(outcome)
    }

    /// Imports the selected part of a comparison's source into its target.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Validation`] for an empty selection and
    /// [`OrchestratorError`] when provisioning or the import fails.
    pub async fn migrate_selection(
        &self,
        comparison: &Comparison,
        selection: &Selection,
    ) -> Result<SnapshotContent, OrchestratorError<B::Error>> {
        let space_id = comparison.space_id.as_str();
        let to = comparison.target_environment.as_str();
        require("space_id", space_id)?;
        require("target_environment", to)?;
        if selection.is_empty() {
            return Err(OrchestratorError::Validation { field: "selection" });
        }
        let writer = self.tracker.begin(
            format!(
                "smart migrate {space_id}/{} to {to}",
                comparison.source_environment
            ),
            vec![
                Step::new("select", "Build partial export"),
                Step::new("environment", format!("Ensure environment {to}")),
                Step::new("import", format!("Import into {to}")),
            ],
        )?;
        let session: Session<B::Error> = Session::new(writer);
        let outcome: Result<SnapshotContent, OrchestratorError<B::Error>> = async {
            session.start_step("select");
            let partial = select(&comparison.source, selection);
            session.log(format!(
                "Selected {} content types, {} entries, {} assets",
                partial.content_types.len(),
                partial.entries.len(),
                partial.assets.len()
            ));
            session.finish_step("select");

            self.ensure_step(&session, space_id, to).await?;
            self.import_step(&session, space_id, to, partial.clone())
                .await?;
            Ok(partial)
        }
        .await;
        session.conclude(outcome)
    }

    /// Compares one entry across two environments field by field. An entry
    /// missing from `to` reports all of its fields.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Validation`] for blank ids and
    /// [`OrchestratorError::Remote`] when the source entry cannot be read or
    /// the target lookup fails for a reason other than absence.
    pub async fn entry_diff(
        &self,
        space_id: &str,
        from: &str,
        to: &str,
        entry_id: &str,
    ) -> Result<Vec<FieldChange>, OrchestratorError<B::Error>> {
        require("space_id", space_id)?;
        require("source_environment", from)?;
        require("target_environment", to)?;
        require("entry_id", entry_id)?;
        let source = self
            .backend
            .get_entry(space_id, from, entry_id)
            .await
            .map_err(OrchestratorError::Remote)?;
        let target = match self.backend.get_entry(space_id, to, entry_id).await {
            Ok(found) => Some(found),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(OrchestratorError::Remote(err)),
        };
        Ok(entry_changes(&source, target.as_ref()))
    }

    async fn export_and_save(
        &self,
        session: &Session<B::Error>,
        space_id: &str,
        environment_id: &str,
    ) -> Result<(SnapshotContent, SnapshotFile), OrchestratorError<B::Error>> {
        session.start_step("export");
        let label = self.space_label(space_id).await;
        let (space, environment) = (space_id.to_owned(), environment_id.to_owned());
        let snapshot = session
            .transfer(&self.executor, move |executor, writer| {
                executor.export_environment(&space, &environment, writer)
            })
            .await?;
        session.finish_step("export");

        session.ensure_live()?;
        session.start_step("save");
        let file = self.store.save(&label, &snapshot)?;
        session.log(format!("Saved snapshot {}", file.name));
        session.finish_step("save");
        info!(space = space_id, snapshot = %file.name, "backup stored");
        Ok((snapshot.content, file))
    }

    async fn export_step(
        &self,
        session: &Session<B::Error>,
        step_id: &'static str,
        space_id: &str,
        environment_id: &str,
    ) -> Result<SnapshotContent, OrchestratorError<B::Error>> {
        session.ensure_live()?;
        session.start_step(step_id);
        let (space, environment) = (space_id.to_owned(), environment_id.to_owned());
        let snapshot = session
            .transfer(&self.executor, move |executor, writer| {
                executor.export_environment(&space, &environment, writer)
            })
            .await?;
        session.finish_step(step_id);
        Ok(snapshot.content)
    }

    async fn ensure_step(
        &self,
        session: &Session<B::Error>,
        space_id: &str,
        environment_id: &str,
    ) -> Result<Environment, OrchestratorError<B::Error>> {
        session.ensure_live()?;
        session.start_step("environment");
        let environment = self
            .provisioner
            .ensure_environment(&self.backend, space_id, environment_id)
            .await?;
        session.log(format!("Environment {} is ready", environment.id));
        session.finish_step("environment");
        Ok(environment)
    }

    async fn import_step(
        &self,
        session: &Session<B::Error>,
        space_id: &str,
        environment_id: &str,
        content: SnapshotContent,
    ) -> Result<(), OrchestratorError<B::Error>> {
        session.ensure_live()?;
        session.start_step("import");
        let (space, environment) = (space_id.to_owned(), environment_id.to_owned());
        session
            .transfer(&self.executor, move |executor, writer| {
                executor.import_snapshot(&space, &environment, &content, writer)
            })
            .await?;
        session.finish_step("import");
        Ok(())
    }

    /// Display name of the space for snapshot names, or its id when the
    /// lookup fails.
    async fn space_label(&self, space_id: &str) -> String {
        match self.backend.get_space(space_id).await {
            Ok(space) if !space.name.trim().is_empty() => space.name,
            Ok(_) => space_id.to_owned(),
            Err(err) => {
                warn!(space = space_id, error = %err, "space lookup failed; naming the snapshot after its id");
                space_id.to_owned()
            }
        }
    }
}

#[cfg(test)]
mod tests;
