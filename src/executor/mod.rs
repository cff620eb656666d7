//! Export and import jobs.
//!
//! The executor drives the external export/import tool as a blocking child
//! process, streams each output line into the operation's progress log and
//! turns the tool's result into a [`Snapshot`] or an error. It imposes no
//! timeout of its own; whatever the remote eventually reports is surfaced
//! unchanged.

use std::ffi::OsString;

use cap_std::{ambient_authority, fs::Dir};
use chrono::Utc;
use tempfile::{NamedTempFile, TempDir};
use thiserror::Error;
use tracing::{debug, info};

use crate::classify::classify;
use crate::progress::{ProgressWriter, StepStatus};
use crate::snapshot::{Snapshot, SnapshotContent, SnapshotOrigin};

mod runner;

pub use runner::{CommandOutput, OutputLine, OutputStream, ProcessTransferRunner, TransferRunner};

/// Name of the export document inside the temporary export directory.
pub const EXPORT_FILE_NAME: &str = "export.json";

const FAILURE_TAIL_LINES: usize = 20;

/// Errors surfaced by export and import jobs.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Raised when the executor is built with a blank setting.
    #[error("invalid transfer configuration: missing {field}")]
    InvalidConfig {
        /// Setting that failed validation.
        field: String,
    },
    /// Raised when the tool cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the tool exits unsuccessfully.
    #[error("{program} exited with status {status_text}: {message}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Tail of the tool's output, as reported by the remote.
        message: String,
    },
    /// Raised when temporary files for the job cannot be prepared or read.
    #[error("transfer workspace error: {message}")]
    Workspace {
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the export document is not valid JSON.
    #[error("failed to parse export document: {message}")]
    Parse {
        /// Parser error message.
        message: String,
    },
}

/// Runs export and import jobs through a [`TransferRunner`].
#[derive(Clone, Debug)]
pub struct Executor<R: TransferRunner> {
    cli_bin: String,
    management_token: String,
    runner: R,
}

impl<R: TransferRunner> Executor<R> {
    /// Creates an executor for the given tool and credentials.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidConfig`] when either value is blank.
    pub fn new(
        cli_bin: impl Into<String>,
        management_token: impl Into<String>,
        runner: R,
    ) -> Result<Self, TransferError> {
        let bin = cli_bin.into().trim().to_owned();
        let token = management_token.into().trim().to_owned();
        if bin.is_empty() {
            return Err(TransferError::InvalidConfig {
                field: String::from("cli_bin"),
            });
        }
        if token.is_empty() {
            return Err(TransferError::InvalidConfig {
                field: String::from("management_token"),
            });
        }
        Ok(Self {
            cli_bin: bin,
            management_token: token,
            runner,
        })
    }

    /// Exports an environment and returns the captured snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] when the tool fails or its document cannot
    /// be read.
    pub fn export_environment(
        &self,
        space_id: &str,
        environment_id: &str,
        progress: &ProgressWriter,
    ) -> Result<Snapshot, TransferError> {
        let created_at = Utc::now();
        let workspace = TempDir::new().map_err(|err| TransferError::Workspace {
            message: err.to_string(),
        })?;
        let mut args = self.base_args("export", space_id, environment_id);
        args.extend([
            OsString::from("--export-dir"),
            workspace.path().as_os_str().to_owned(),
            OsString::from("--content-file"),
            OsString::from(EXPORT_FILE_NAME),
            OsString::from("--skip-roles"),
            OsString::from("--skip-webhooks"),
        ]);

        info!(space = space_id, environment = environment_id, "export started");
        self.run_streaming(&args, progress)?;

        let dir = Dir::open_ambient_dir(workspace.path(), ambient_authority()).map_err(|err| {
            TransferError::Workspace {
                message: err.to_string(),
            }
        })?;
        let document =
            dir.read_to_string(EXPORT_FILE_NAME)
                .map_err(|err| TransferError::Workspace {
                    message: format!("export document missing: {err}"),
                })?;
        let content: SnapshotContent =
            serde_json::from_str(&document).map_err(|err| TransferError::Parse {
                message: err.to_string(),
            })?;

        info!(
            space = space_id,
            environment = environment_id,
            content_types = content.content_types.len(),
            entries = content.entries.len(),
            assets = content.assets.len(),
            "export finished"
        );
        Ok(Snapshot {
            origin: SnapshotOrigin {
                space_id: space_id.to_owned(),
                environment_id: environment_id.to_owned(),
                created_at: Some(created_at),
            },
            content,
        })
    }

    /// Imports `content` into an environment.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] when the document cannot be staged or the
    /// tool fails.
    pub fn import_snapshot(
        &self,
        space_id: &str,
        environment_id: &str,
        content: &SnapshotContent,
        progress: &ProgressWriter,
    ) -> Result<(), TransferError> {
        let staged = NamedTempFile::new().map_err(|err| TransferError::Workspace {
            message: err.to_string(),
        })?;
        serde_json::to_writer(staged.as_file(), content).map_err(|err| {
            TransferError::Workspace {
                message: err.to_string(),
            }
        })?;

        let mut args = self.base_args("import", space_id, environment_id);
        args.extend([
            OsString::from("--content-file"),
            staged.path().as_os_str().to_owned(),
        ]);

        info!(space = space_id, environment = environment_id, "import started");
        self.run_streaming(&args, progress)?;
        info!(space = space_id, environment = environment_id, "import finished");
        Ok(())
    }

    fn base_args(&self, verb: &str, space_id: &str, environment_id: &str) -> Vec<OsString> {
        vec![
            OsString::from("space"),
            OsString::from(verb),
            OsString::from("--space-id"),
            OsString::from(space_id),
            OsString::from("--environment-id"),
            OsString::from(environment_id),
            OsString::from("--management-token"),
            OsString::from(&self.management_token),
            OsString::from("--use-verbose-renderer"),
        ]
    }

    fn run_streaming(
        &self,
        args: &[OsString],
        progress: &ProgressWriter,
    ) -> Result<CommandOutput, TransferError> {
        let output = self.runner.run(&self.cli_bin, args, &mut |line| {
            let text = strip_ansi(&line.text);
            if text.trim().is_empty() {
                return;
            }
            if let Some(status) = line_status(&text) {
                progress.flag_current_step(status);
            }
            progress.log(text);
        })?;

        if output.is_success() {
            return Ok(output);
        }
        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        debug!(program = %self.cli_bin, status = %status_text, "transfer tool failed");
        Err(TransferError::CommandFailure {
            program: self.cli_bin.clone(),
            status: output.code,
            status_text,
            message: failure_message(&output),
        })
    }
}

/// Status a single output line implies for the step that emitted it.
/// Warning-classified lines mark a warning; other lines mentioning an error
/// mark an error. Neither aborts the job.
fn line_status(line: &str) -> Option<StepStatus> {
    if classify(line).is_some_and(|instruction| instruction.is_warning()) {
        return Some(StepStatus::Warning);
    }
    line.to_lowercase()
        .contains("error")
        .then_some(StepStatus::Error)
}

fn failure_message(output: &CommandOutput) -> String {
    let source = if output.stderr.trim().is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    let lines: Vec<String> = source
        .lines()
        .map(strip_ansi)
        .filter(|line| !line.trim().is_empty())
        .collect();
    let start = lines.len().saturating_sub(FAILURE_TAIL_LINES);
    lines.get(start..).unwrap_or_default().join("\n")
}

/// Removes terminal colour and cursor escape sequences.
fn strip_ansi(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\u{1b}' {
            cleaned.push(ch);
            continue;
        }
        if chars.next_if_eq(&'[').is_some() {
            for terminator in chars.by_ref() {
                if terminator.is_ascii_alphabetic() {
                    break;
                }
            }
        }
    }
    cleaned
}
