//! Snapshot persistence.
//!
//! Snapshots live under `<root>/<space id>/` as one JSON document each.
//! There is no index: the directory listing is the source of truth.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::snapshot::Snapshot;

mod names;

pub use names::{normalize_label, snapshot_file_name, validate_new_name};

const SNAPSHOT_SUFFIX: &str = ".json";

/// Errors raised by the snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a stored document is not a valid snapshot.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when a snapshot or space name is not acceptable.
    #[error("invalid snapshot name '{name}': {reason}")]
    InvalidName {
        /// Offending name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Raised when the requested snapshot does not exist.
    #[error("snapshot {path} not found")]
    NotFound {
        /// Path that was looked up.
        path: Utf8PathBuf,
    },
    /// Raised when a rename would overwrite another snapshot.
    #[error("snapshot {path} already exists")]
    AlreadyExists {
        /// Path that is already taken.
        path: Utf8PathBuf,
    },
}

/// Listing record for a stored snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotFile {
    /// File name including the `.json` suffix.
    pub name: String,
    /// Size on disk.
    pub size_bytes: u64,
    /// Last modification time, when the platform reports one.
    pub modified: Option<DateTime<Utc>>,
}

/// File-backed snapshot store rooted at a directory.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    root: Utf8PathBuf,
}

impl SnapshotStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Absolute location of a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidName`] when either component could
    /// escape the store.
    pub fn path_of(&self, space_id: &str, name: &str) -> Result<Utf8PathBuf, StoreError> {
        names::check_component(space_id)?;
        names::check_component(name)?;
        Ok(self.root.join(space_id).join(name))
    }

    /// Writes `snapshot` under a generated name built from `label`, the
    /// snapshot's environment and its capture time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the name is invalid, serialisation fails,
    /// or the file cannot be written.
    pub fn save(&self, label: &str, snapshot: &Snapshot) -> Result<SnapshotFile, StoreError> {
        let space_id = snapshot.origin.space_id.as_str();
        let created_at = snapshot.origin.created_at.unwrap_or_else(Utc::now);
        let name = snapshot_file_name(label, &snapshot.origin.environment_id, created_at);
        let path = self.path_of(space_id, &name)?;

        let rendered = serde_json::to_vec_pretty(snapshot).map_err(|err| StoreError::Parse {
            path: path.clone(),
            message: err.to_string(),
        })?;
        let dir = self.space_dir(space_id, true)?;
        dir.write(&name, &rendered).map_err(|err| StoreError::Io {
            path: path.clone(),
            message: err.to_string(),
        })?;

        info!(snapshot = %path, bytes = rendered.len(), "snapshot written");
        Ok(SnapshotFile {
            name,
            size_bytes: u64::try_from(rendered.len()).unwrap_or(u64::MAX),
            modified: Some(Utc::now()),
        })
    }

    /// Lists the snapshots of a space, newest first. A space without a
    /// directory has no snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be read.
    pub fn list(&self, space_id: &str) -> Result<Vec<SnapshotFile>, StoreError> {
        names::check_component(space_id)?;
        let space_path = self.root.join(space_id);
        let dir = match Dir::open_ambient_dir(&space_path, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StoreError::Io {
                    path: space_path,
                    message: err.to_string(),
                });
            }
        };

        let io_error = |err: io::Error| StoreError::Io {
            path: space_path.clone(),
            message: err.to_string(),
        };
        let mut files = Vec::new();
        for item in dir.entries().map_err(io_error)? {
            let entry = item.map_err(io_error)?;
            let name = entry.file_name().map_err(io_error)?;
            if !name.ends_with(SNAPSHOT_SUFFIX) {
                continue;
            }
            let metadata = entry.metadata().map_err(io_error)?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .ok()
                .map(|time| DateTime::<Utc>::from(time.into_std()));
            files.push(SnapshotFile {
                name,
                size_bytes: metadata.len(),
                modified,
            });
        }

        files.sort_by(|left, right| {
            right
                .modified
                .cmp(&left.modified)
                .then_with(|| right.name.cmp(&left.name))
        });
        debug!(space = space_id, count = files.len(), "listed snapshots");
        Ok(files)
    }

    /// Reads and parses a stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the file is absent and
    /// [`StoreError::Parse`] when it is not a snapshot document.
    pub fn load(&self, space_id: &str, name: &str) -> Result<Snapshot, StoreError> {
        let path = self.path_of(space_id, name)?;
        let dir = self.space_dir(space_id, false)?;
        let contents = dir.read_to_string(name).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound { path: path.clone() }
            } else {
                StoreError::Io {
                    path: path.clone(),
                    message: err.to_string(),
                }
            }
        })?;

        let mut snapshot: Snapshot =
            serde_json::from_str(&contents).map_err(|err| StoreError::Parse {
                path: path.clone(),
                message: err.to_string(),
            })?;
        if snapshot.origin.space_id.is_empty() {
            space_id.clone_into(&mut snapshot.origin.space_id);
        }
        Ok(snapshot)
    }

    /// Renames a snapshot. The new name is validated and given a `.json`
    /// suffix when it lacks one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidName`] for a rejected name,
    /// [`StoreError::NotFound`] when the source is absent, and
    /// [`StoreError::AlreadyExists`] when the target is taken.
    pub fn rename(
        &self,
        space_id: &str,
        from: &str,
        to: &str,
    ) -> Result<SnapshotFile, StoreError> {
        let target = validate_new_name(to)?;
        let from_path = self.path_of(space_id, from)?;
        let to_path = self.path_of(space_id, &target)?;
        let dir = self.space_dir(space_id, false)?;

        if !exists(&dir, from, &from_path)? {
            return Err(StoreError::NotFound { path: from_path });
        }
        if from != target && exists(&dir, &target, &to_path)? {
            return Err(StoreError::AlreadyExists { path: to_path });
        }

        dir.rename(from, &dir, &target)
            .map_err(|err| StoreError::Io {
                path: from_path.clone(),
                message: err.to_string(),
            })?;
        let metadata = dir.metadata(&target).map_err(|err| StoreError::Io {
            path: to_path.clone(),
            message: err.to_string(),
        })?;

        info!(from = %from_path, to = %to_path, "snapshot renamed");
        Ok(SnapshotFile {
            name: target,
            size_bytes: metadata.len(),
            modified: metadata
                .modified()
                .ok()
                .map(|time| DateTime::<Utc>::from(time.into_std())),
        })
    }

    /// Deletes a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the file is absent.
    pub fn delete(&self, space_id: &str, name: &str) -> Result<(), StoreError> {
        let path = self.path_of(space_id, name)?;
        let dir = self.space_dir(space_id, false)?;
        dir.remove_file(name).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound { path: path.clone() }
            } else {
                StoreError::Io {
                    path: path.clone(),
                    message: err.to_string(),
                }
            }
        })?;
        info!(snapshot = %path, "snapshot deleted");
        Ok(())
    }

    fn space_dir(&self, space_id: &str, create: bool) -> Result<Dir, StoreError> {
        let path = self.root.join(space_id);
        if create {
            Dir::create_ambient_dir_all(&path, ambient_authority()).map_err(|err| {
                StoreError::Io {
                    path: path.clone(),
                    message: err.to_string(),
                }
            })?;
        }
        Dir::open_ambient_dir(&path, ambient_authority()).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound { path: path.clone() }
            } else {
                StoreError::Io {
                    path: path.clone(),
                    message: err.to_string(),
                }
            }
        })
    }
}

fn exists(dir: &Dir, name: &str, path: &Utf8Path) -> Result<bool, StoreError> {
    dir.try_exists(name).map_err(|err| StoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests;
