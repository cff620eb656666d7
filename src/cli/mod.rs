//! Command-line interface definitions for the `snapmigrate` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `snapmigrate` binary.
#[derive(Debug, Parser)]
#[command(
    name = "snapmigrate",
    about = "Back up, restore and migrate content environments",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log debug output from the library.
    #[arg(long, short, global = true, conflicts_with = "quiet")]
    pub(crate) verbose: bool,
    /// Only log warnings and errors.
    #[arg(long, short, global = true)]
    pub(crate) quiet: bool,
    /// Operation to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of `snapmigrate`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// List the spaces visible to the management token.
    #[command(name = "spaces")]
    Spaces,
    /// List the environments of a space.
    #[command(name = "environments")]
    Environments(SpaceArgs),
    /// Export an environment into a new local snapshot.
    #[command(name = "backup")]
    Backup(BackupArgs),
    /// Import a stored snapshot, creating the environment when missing.
    #[command(name = "restore")]
    Restore(RestoreArgs),
    /// Copy one environment into another, keeping a snapshot of the source.
    #[command(name = "migrate")]
    Migrate(PairArgs),
    /// Show what the source environment has that the target lacks.
    #[command(name = "diff")]
    Diff(DiffArgs),
    /// Import only the changed content types and entries into the target.
    #[command(name = "smart-migrate")]
    SmartMigrate(SmartMigrateArgs),
    /// Manage local snapshots.
    #[command(name = "snapshots", subcommand)]
    Snapshots(SnapshotsCommand),
}

/// A single space.
#[derive(Debug, Args)]
pub(crate) struct SpaceArgs {
    /// Space identifier.
    pub(crate) space: String,
}

/// Arguments for `snapmigrate backup`.
#[derive(Debug, Args)]
pub(crate) struct BackupArgs {
    /// Space identifier.
    pub(crate) space: String,
    /// Environment to export.
    pub(crate) environment: String,
}

/// Arguments for `snapmigrate restore`.
#[derive(Debug, Args)]
pub(crate) struct RestoreArgs {
    /// Space identifier.
    pub(crate) space: String,
    /// Snapshot file name as shown by `snapshots list`.
    pub(crate) snapshot: String,
    /// Environment to import into.
    pub(crate) environment: String,
}

/// A source and a target environment in one space.
#[derive(Debug, Args)]
pub(crate) struct PairArgs {
    /// Space identifier.
    pub(crate) space: String,
    /// Source environment.
    pub(crate) from: String,
    /// Target environment.
    pub(crate) to: String,
}

/// Arguments for `snapmigrate diff`.
#[derive(Debug, Args)]
pub(crate) struct DiffArgs {
    /// Environments to compare.
    #[command(flatten)]
    pub(crate) pair: PairArgs,
    /// Compare a single entry field by field instead of whole exports.
    #[arg(long, value_name = "ENTRY_ID")]
    pub(crate) entry: Option<String>,
}

/// Arguments for `snapmigrate smart-migrate`.
#[derive(Debug, Args)]
pub(crate) struct SmartMigrateArgs {
    /// Environments to compare and migrate.
    #[command(flatten)]
    pub(crate) pair: PairArgs,
    /// Restrict the migration to these content types. Repeatable.
    #[arg(long = "content-type", value_name = "ID")]
    pub(crate) content_types: Vec<String>,
    /// Show the selection without importing it.
    #[arg(long)]
    pub(crate) dry_run: bool,
}

/// Subcommands of `snapmigrate snapshots`.
#[derive(Debug, Subcommand)]
pub(crate) enum SnapshotsCommand {
    /// List the snapshots of a space, newest first.
    #[command(name = "list")]
    List(SpaceArgs),
    /// Rename a snapshot.
    #[command(name = "rename")]
    Rename(RenameArgs),
    /// Delete a snapshot.
    #[command(name = "delete")]
    Delete(DeleteArgs),
}

/// Arguments for `snapmigrate snapshots rename`.
#[derive(Debug, Args)]
pub(crate) struct RenameArgs {
    /// Space identifier.
    pub(crate) space: String,
    /// Current snapshot file name.
    pub(crate) from: String,
    /// New name; `.json` is appended when missing.
    pub(crate) to: String,
}

/// Arguments for `snapmigrate snapshots delete`.
#[derive(Debug, Args)]
pub(crate) struct DeleteArgs {
    /// Space identifier.
    pub(crate) space: String,
    /// Snapshot file name.
    pub(crate) name: String,
}
