//! Binary entry point for the snapmigrate CLI.

use std::future::Future;
use std::io::{self, Write};
use std::process;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use snapmigrate::diff::{FieldChange, Selection};
use snapmigrate::{
    ConfigError, ContentfulBackend, ContentfulError, DiffResult, ErrorInstruction, Executor,
    OperationProgress, Orchestrator, OrchestratorError, ProcessTransferRunner, ProgressTracker,
    SnapConfig, StepStatus, StoreError, TransferError,
};

mod cli;

use cli::{Cli, Command, DiffArgs, SmartMigrateArgs, SnapshotsCommand};

const ECHO_INTERVAL: Duration = Duration::from_millis(250);
const STALL_THRESHOLD: Duration = Duration::from_secs(120);

type ContentOrchestrator = Orchestrator<ContentfulBackend, ProcessTransferRunner>;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("backend error: {0}")]
    Backend(#[from] ContentfulError),
    #[error("executor error: {0}")]
    Executor(#[from] TransferError),
    #[error("snapshot store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Operation(#[from] OrchestratorError<ContentfulError>),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl CliError {
    fn instruction(&self) -> Option<ErrorInstruction> {
        match self {
            Self::Operation(err) => err.instruction(),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    let exit_code = match dispatch(cli.command).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "snapmigrate=debug"
    } else if quiet {
        "snapmigrate=warn"
    } else {
        "snapmigrate=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();
}

async fn dispatch(command: Command) -> Result<(), CliError> {
    let config = SnapConfig::load_without_cli_args()?;
    match command {
        Command::Snapshots(action) => manage_snapshots(&config, action),
        remote => run_remote(&config, remote).await,
    }
}

fn manage_snapshots(config: &SnapConfig, action: SnapshotsCommand) -> Result<(), CliError> {
    config.validate_store()?;
    let store = config.snapshot_store();
    let mut stdout = io::stdout();
    match action {
        SnapshotsCommand::List(args) => {
            for file in store.list(&args.space)? {
                let modified = file
                    .modified
                    .map_or_else(|| String::from("-"), |at| at.to_rfc3339());
                writeln!(stdout, "{}\t{}\t{modified}", file.name, file.size_bytes)?;
            }
        }
        SnapshotsCommand::Rename(args) => {
            let renamed = store.rename(&args.space, &args.from, &args.to)?;
            writeln!(stdout, "Renamed {} to {}", args.from, renamed.name)?;
        }
        SnapshotsCommand::Delete(args) => {
            store.delete(&args.space, &args.name)?;
            writeln!(stdout, "Deleted {}", args.name)?;
        }
    }
    Ok(())
}

fn build_orchestrator(config: &SnapConfig) -> Result<ContentOrchestrator, CliError> {
    config.validate_remote()?;
    let backend = ContentfulBackend::new(&config.api_base, &config.management_token)?;
    let executor = Executor::new(
        config.cli_bin.as_str(),
        config.management_token.as_str(),
        ProcessTransferRunner,
    )?;
    Ok(Orchestrator::new(backend, executor, config.snapshot_store())
        .with_provisioner(config.provisioner()))
}

async fn run_remote(config: &SnapConfig, command: Command) -> Result<(), CliError> {
    let orchestrator = build_orchestrator(config)?;
    let tracker = orchestrator.tracker().clone();
    let mut stdout = io::stdout();
    match command {
        Command::Spaces => {
            for space in orchestrator.spaces().await? {
                writeln!(stdout, "{}\t{}", space.id, space.name)?;
            }
        }
        Command::Environments(args) => {
            for env in orchestrator.environments(&args.space).await? {
                let created = env
                    .created_at
                    .map_or_else(|| String::from("-"), |at| at.to_rfc3339());
                writeln!(stdout, "{}\t{}\t{:?}\t{created}", env.id, env.name, env.status)?;
            }
        }
        Command::Backup(args) => {
            let file =
                with_progress(&tracker, orchestrator.backup(&args.space, &args.environment))
                    .await?;
            writeln!(stdout, "Saved snapshot {}", file.name)?;
        }
        Command::Restore(args) => {
            let env = with_progress(
                &tracker,
                orchestrator.restore(&args.space, &args.snapshot, &args.environment),
            )
            .await?;
            writeln!(stdout, "Restored {} into {}", args.snapshot, env.id)?;
        }
        Command::Migrate(args) => {
            let file = with_progress(
                &tracker,
                orchestrator.migrate(&args.space, &args.from, &args.to),
            )
            .await?;
            writeln!(
                stdout,
                "Migrated {} into {}; source kept as {}",
                args.from, args.to, file.name
            )?;
        }
        Command::Diff(args) => show_diff(&orchestrator, &tracker, args).await?,
        Command::SmartMigrate(args) => smart_migrate(&orchestrator, &tracker, args).await?,
        Command::Snapshots(_) => {}
    }
    Ok(())
}

async fn show_diff(
    orchestrator: &ContentOrchestrator,
    tracker: &ProgressTracker,
    args: DiffArgs,
) -> Result<(), CliError> {
    let pair = args.pair;
    let mut stdout = io::stdout();
    if let Some(entry_id) = args.entry {
        let changes = orchestrator
            .entry_diff(&pair.space, &pair.from, &pair.to, &entry_id)
            .await?;
        write_field_changes(&mut stdout, &changes)?;
        return Ok(());
    }
    let comparison =
        with_progress(tracker, orchestrator.compare(&pair.space, &pair.from, &pair.to)).await?;
    write_diff(&mut stdout, &comparison.diff)?;
    Ok(())
}

async fn smart_migrate(
    orchestrator: &ContentOrchestrator,
    tracker: &ProgressTracker,
    args: SmartMigrateArgs,
) -> Result<(), CliError> {
    let pair = args.pair;
    let mut stdout = io::stdout();
    let comparison =
        with_progress(tracker, orchestrator.compare(&pair.space, &pair.from, &pair.to)).await?;
    write_diff(&mut stdout, &comparison.diff)?;

    let selection = if args.content_types.is_empty() {
        Selection::all_changes(&comparison.diff)
    } else {
        Selection::for_content_types(
            &comparison.diff,
            args.content_types.iter().map(String::as_str),
        )
    };
    if selection.is_empty() {
        writeln!(stdout, "Nothing to migrate")?;
        return Ok(());
    }
    if args.dry_run {
        writeln!(
            stdout,
            "Would migrate {} content types and {} entries",
            selection.content_types.len(),
            selection.entries.len()
        )?;
        return Ok(());
    }

    let partial =
        with_progress(tracker, orchestrator.migrate_selection(&comparison, &selection)).await?;
    writeln!(
        stdout,
        "Migrated {} content types, {} entries and {} assets into {}",
        partial.content_types.len(),
        partial.entries.len(),
        partial.assets.len(),
        pair.to
    )?;
    Ok(())
}

fn write_diff(mut target: impl Write, result: &DiffResult) -> io::Result<()> {
    if result.is_empty() {
        return writeln!(target, "No differences");
    }
    for ct in result.changed() {
        let marker = if ct.is_new {
            " [new type]"
        } else if ct.is_modified {
            " [schema changed]"
        } else {
            ""
        };
        writeln!(target, "{} ({}){marker}", ct.name, ct.id)?;
        for entry in &ct.new_entries {
            writeln!(target, "  + {}", entry.title.as_deref().unwrap_or(&entry.id))?;
        }
        for entry in &ct.modified_entries {
            writeln!(target, "  ~ {}", entry.title.as_deref().unwrap_or(&entry.id))?;
        }
    }
    Ok(())
}

fn write_field_changes(mut target: impl Write, changes: &[FieldChange]) -> io::Result<()> {
    if changes.is_empty() {
        return writeln!(target, "No differences");
    }
    for change in changes {
        let render = |value: Option<&serde_json::Value>| {
            value.map_or_else(|| String::from("(absent)"), ToString::to_string)
        };
        writeln!(
            target,
            "{}: {} -> {}",
            change.field_id,
            render(change.target.as_ref()),
            render(change.source.as_ref())
        )?;
    }
    Ok(())
}

/// Echoes progress of the tracked operation until `operation` resolves.
async fn with_progress<T>(tracker: &ProgressTracker, operation: impl Future<Output = T>) -> T {
    let mut echo = ProgressEcho::default();
    let mut ticker = tokio::time::interval(ECHO_INTERVAL);
    tokio::pin!(operation);
    loop {
        tokio::select! {
            result = &mut operation => {
                echo.flush(&tracker.snapshot());
                return result;
            }
            _ = ticker.tick() => echo.flush(&tracker.snapshot()),
        }
    }
}

#[derive(Debug, Default)]
struct ProgressEcho {
    printed_lines: u64,
    step_statuses: Vec<StepStatus>,
    stall_reported: bool,
}

impl ProgressEcho {
    fn flush(&mut self, state: &OperationProgress) {
        let mut stdout = io::stdout();
        self.write_updates(&mut stdout, state).ok();
        if state.is_stalled(STALL_THRESHOLD, chrono::Utc::now()) {
            if !self.stall_reported {
                writeln!(stdout, "Still running; no output for a while").ok();
                self.stall_reported = true;
            }
        } else {
            self.stall_reported = false;
        }
    }

    fn write_updates(&mut self, mut target: impl Write, state: &OperationProgress) -> io::Result<()> {
        let retained = u64::try_from(state.log_lines.len()).unwrap_or(u64::MAX);
        let first_retained = state.log_line_count.saturating_sub(retained);
        let skip = usize::try_from(self.printed_lines.saturating_sub(first_retained))
            .unwrap_or(usize::MAX);
        for line in state.log_lines.iter().skip(skip) {
            writeln!(target, "{line}")?;
        }
        self.printed_lines = self.printed_lines.max(state.log_line_count);

        for (index, step) in state.steps.iter().enumerate() {
            if self.step_statuses.get(index) == Some(&step.status) {
                continue;
            }
            if step.status != StepStatus::Pending {
                writeln!(
                    target,
                    "[{}%] {}: {}",
                    state.overall_progress_percent,
                    step.description,
                    status_label(step.status)
                )?;
            }
        }
        self.step_statuses = state.steps.iter().map(|step| step.status).collect();
        Ok(())
    }
}

const fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "pending",
        StepStatus::InProgress => "running",
        StepStatus::Completed => "done",
        StepStatus::Error => "error",
        StepStatus::Warning => "warning",
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    let Some(instruction) = err.instruction() else {
        writeln!(target, "{err}").ok();
        return;
    };
    writeln!(target, "{}", instruction.title).ok();
    writeln!(target, "{}", instruction.description).ok();
    for (number, step) in instruction.remediation_steps.iter().enumerate() {
        writeln!(target, "  {}. {step}", number.saturating_add(1)).ok();
    }
    writeln!(target, "Details: {err}").ok();
}
