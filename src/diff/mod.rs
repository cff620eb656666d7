//! Snapshot comparison.
//!
//! [`diff`] treats `source` as the template and `target` as the baseline:
//! content types and entries that exist only in `source` are new, and those
//! whose content differs are modified. Nothing is reported for things that
//! exist only in `target`, so swapping the arguments does not invert the
//! result.

use std::collections::HashMap;

use crate::snapshot::{ContentType, Entry, SnapshotContent};

mod select;

pub use select::{FieldChange, Selection, entry_changes, select};

/// Reference to an entry in a diff.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntryRef {
    /// Entry id.
    pub id: String,
    /// Display title taken from the content type's display field.
    pub title: Option<String>,
}

/// Comparison outcome for one source content type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContentTypeDiff {
    /// Content type id.
    pub id: String,
    /// Content type display name.
    pub name: String,
    /// The type does not exist in the target.
    pub is_new: bool,
    /// The type exists in both but its field schema differs.
    pub is_modified: bool,
    /// Entries present in the source only.
    pub new_entries: Vec<EntryRef>,
    /// Entries present in both whose field values differ.
    pub modified_entries: Vec<EntryRef>,
}

impl ContentTypeDiff {
    /// Number of new entries.
    #[must_use]
    pub fn new_content_count(&self) -> usize {
        self.new_entries.len()
    }

    /// Number of modified entries.
    #[must_use]
    pub fn modified_content_count(&self) -> usize {
        self.modified_entries.len()
    }

    /// Returns `true` when the type or any of its entries changed.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.is_new
            || self.is_modified
            || !self.new_entries.is_empty()
            || !self.modified_entries.is_empty()
    }
}

/// Per-type comparison of two snapshots, in source order. Unchanged types
/// are included with empty entry lists.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DiffResult {
    /// One record per source content type.
    pub content_types: Vec<ContentTypeDiff>,
}

impl DiffResult {
    /// Iterates over the types that carry any change.
    pub fn changed(&self) -> impl Iterator<Item = &ContentTypeDiff> {
        self.content_types.iter().filter(|ct| ct.has_changes())
    }

    /// Returns `true` when nothing differs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed().next().is_none()
    }

    /// Looks up the record of a content type.
    #[must_use]
    pub fn content_type(&self, id: &str) -> Option<&ContentTypeDiff> {
        self.content_types.iter().find(|ct| ct.id == id)
    }

    /// Total new entries across all types.
    #[must_use]
    pub fn new_entry_total(&self) -> usize {
        self.content_types
            .iter()
            .map(ContentTypeDiff::new_content_count)
            .sum()
    }

    /// Total modified entries across all types.
    #[must_use]
    pub fn modified_entry_total(&self) -> usize {
        self.content_types
            .iter()
            .map(ContentTypeDiff::modified_content_count)
            .sum()
    }
}

/// Compares `source` against `target`.
#[must_use]
pub fn diff(source: &SnapshotContent, target: &SnapshotContent) -> DiffResult {
    let target_types: HashMap<&str, &ContentType> = target
        .content_types
        .iter()
        .map(|ct| (ct.sys.id.as_str(), ct))
        .collect();

    let content_types = source
        .content_types
        .iter()
        .map(|source_type| {
            let type_id = source_type.sys.id.as_str();
            let baseline = target_types.get(type_id).copied();
            let target_entries: HashMap<&str, &Entry> = target
                .entries_of(type_id)
                .map(|entry| (entry.id(), entry))
                .collect();

            let mut new_entries = Vec::new();
            let mut modified_entries = Vec::new();
            for entry in source.entries_of(type_id) {
                match target_entries.get(entry.id()) {
                    None => new_entries.push(entry_ref(source_type, entry)),
                    Some(existing) if entry.content_differs(existing) => {
                        modified_entries.push(entry_ref(source_type, entry));
                    }
                    Some(_) => {}
                }
            }

            ContentTypeDiff {
                id: type_id.to_owned(),
                name: source_type.name.clone(),
                is_new: baseline.is_none(),
                is_modified: baseline.is_some_and(|existing| source_type.schema_differs(existing)),
                new_entries,
                modified_entries,
            }
        })
        .collect();

    DiffResult { content_types }
}

fn entry_ref(content_type: &ContentType, entry: &Entry) -> EntryRef {
    EntryRef {
        id: entry.id().to_owned(),
        title: entry_title(content_type, entry),
    }
}

/// Reads the display field of `entry` in the alphabetically first locale.
fn entry_title(content_type: &ContentType, entry: &Entry) -> Option<String> {
    let field = content_type.display_field.as_deref()?;
    let localized = entry.fields.get(field)?.as_object()?;
    let first_locale = localized.keys().min()?;
    localized
        .get(first_locale)
        .and_then(|value| value.as_str())
        .map(str::to_owned)
}
