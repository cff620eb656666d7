//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use predicates::prelude::*;
use tempfile::TempDir;

struct Sandbox {
    _tmp: TempDir,
    root: Utf8PathBuf,
}

fn sandbox() -> Sandbox {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    Sandbox { _tmp: tmp, root }
}

fn snapmigrate(sandbox: &Sandbox) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("snapmigrate");
    cmd.current_dir(&sandbox.root)
        .env("HOME", &sandbox.root)
        .env("XDG_CONFIG_HOME", &sandbox.root)
        .env("SNAPMIGRATE_SNAPSHOT_DIR", sandbox.root.join("backups"))
        .env_remove("SNAPMIGRATE_CONFIG_PATH")
        .env_remove("SNAPMIGRATE_MANAGEMENT_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn cli_without_arguments_prints_usage() {
    let sandbox = sandbox();
    snapmigrate(&sandbox)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_every_operation() {
    let sandbox = sandbox();
    snapmigrate(&sandbox)
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("backup")
                .and(predicate::str::contains("restore"))
                .and(predicate::str::contains("smart-migrate"))
                .and(predicate::str::contains("snapshots")),
        );
}

#[test]
fn listing_an_unknown_space_prints_nothing() {
    let sandbox = sandbox();
    snapmigrate(&sandbox)
        .args(["snapshots", "list", "S1"])
        .assert()
        .success()
        .stdout("");
}

#[test]
fn snapshots_can_be_renamed_and_deleted_offline() {
    let sandbox = sandbox();
    let backups = Dir::open_ambient_dir(&sandbox.root, ambient_authority())
        .unwrap_or_else(|err| panic!("open sandbox: {err}"));
    backups
        .create_dir_all("backups/S1")
        .unwrap_or_else(|err| panic!("create space dir: {err}"));
    backups
        .write(
            "backups/S1/old.json",
            r#"{"contentTypes":[],"entries":[],"assets":[]}"#,
        )
        .unwrap_or_else(|err| panic!("seed snapshot: {err}"));

    snapmigrate(&sandbox)
        .args(["snapshots", "rename", "S1", "old.json", "release-1"])
        .assert()
        .success()
        .stdout("Renamed old.json to release-1.json\n");
    snapmigrate(&sandbox)
        .args(["snapshots", "list", "S1"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("release-1.json\t"));
    snapmigrate(&sandbox)
        .args(["snapshots", "delete", "S1", "release-1.json"])
        .assert()
        .success();
    snapmigrate(&sandbox)
        .args(["snapshots", "delete", "S1", "release-1.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn remote_commands_require_a_management_token() {
    let sandbox = sandbox();
    snapmigrate(&sandbox)
        .args(["backup", "S1", "master"])
        .assert()
        .failure()
        .stderr(
            predicate::str::contains("SNAPMIGRATE_MANAGEMENT_TOKEN")
                .and(predicate::str::contains("snapmigrate.toml")),
        );
}

#[test]
fn traversal_in_snapshot_names_is_rejected() {
    let sandbox = sandbox();
    snapmigrate(&sandbox)
        .args(["snapshots", "delete", "S1", "../escape.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid snapshot name"));
}
