//! Drives `snapmigrate backup` end to end with a stand-in export tool.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;

use assert_cmd::cargo::cargo_bin_cmd;
use camino::Utf8PathBuf;
use predicates::prelude::*;
use tempfile::TempDir;

const FAKE_TOOL: &str = r#"#!/bin/sh
dir=""
file=""
while [ $# -gt 0 ]; do
  case "$1" in
    --export-dir) dir="$2"; shift ;;
    --content-file) file="$2"; shift ;;
  esac
  shift
done
echo "Exporting entries"
printf '%s' '{"contentTypes":[],"entries":[],"assets":[],"locales":[]}' > "$dir/$file"
"#;

#[test]
fn backup_writes_a_snapshot_named_after_the_space_id() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    let tool = root.join("fake-contentful");
    fs::write(&tool, FAKE_TOOL).unwrap_or_else(|err| panic!("write tool: {err}"));
    fs::set_permissions(&tool, fs::Permissions::from_mode(0o755))
        .unwrap_or_else(|err| panic!("chmod tool: {err}"));

    // The space lookup cannot connect, so the label falls back to the id.
    cargo_bin_cmd!("snapmigrate")
        .current_dir(&root)
        .env("HOME", &root)
        .env("XDG_CONFIG_HOME", &root)
        .env_remove("SNAPMIGRATE_CONFIG_PATH")
        .env("SNAPMIGRATE_MANAGEMENT_TOKEN", "CFPAT-test")
        .env("SNAPMIGRATE_API_BASE", "http://127.0.0.1:9")
        .env("SNAPMIGRATE_CLI_BIN", &tool)
        .env("SNAPMIGRATE_SNAPSHOT_DIR", root.join("backups"))
        .args(["backup", "S1", "master"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Exporting entries")
                .and(predicate::str::contains("Saved snapshot S1-master-")),
        );

    let stored: Vec<_> = fs::read_dir(root.join("backups").join("S1"))
        .unwrap_or_else(|err| panic!("read store: {err}"))
        .filter_map(Result::ok)
        .collect();
    assert_eq!(stored.len(), 1);
}
