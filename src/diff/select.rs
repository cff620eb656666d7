//! Building partial exports from a diff selection.

use std::collections::{BTreeSet, HashSet};

use serde_json::{Map, Value};

use crate::snapshot::SnapshotContent;

use super::{ContentTypeDiff, DiffResult};

/// Content types and entries chosen for a selective migration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Selection {
    /// Content type ids whose schema should be copied.
    pub content_types: BTreeSet<String>,
    /// Entry ids to copy.
    pub entries: BTreeSet<String>,
}

impl Selection {
    /// Selects every new or modified type and entry in `diff`.
    #[must_use]
    pub fn all_changes(diff: &DiffResult) -> Self {
        Self::from_changes(diff.changed())
    }

    /// Selects the changes of the given content types only: their schemas
    /// when new or modified, and their changed entries.
    #[must_use]
    pub fn for_content_types<'a>(
        diff: &DiffResult,
        type_ids: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let wanted: HashSet<&str> = type_ids.into_iter().collect();
        Self::from_changes(diff.changed().filter(|ct| wanted.contains(ct.id.as_str())))
    }

    fn from_changes<'a>(changes: impl Iterator<Item = &'a ContentTypeDiff>) -> Self {
        let mut selection = Self::default();
        for ct in changes {
            if ct.is_new || ct.is_modified {
                selection.content_types.insert(ct.id.clone());
            }
            selection.entries.extend(
                ct.new_entries
                    .iter()
                    .chain(&ct.modified_entries)
                    .map(|entry| entry.id.clone()),
            );
        }
        selection
    }

    /// Returns `true` when nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content_types.is_empty() && self.entries.is_empty()
    }
}

/// Builds the partial export for `selection`: the selected content types and
/// their editor interfaces, the selected entries, the assets those entries
/// link to, and the source locales.
#[must_use]
pub fn select(source: &SnapshotContent, selection: &Selection) -> SnapshotContent {
    let content_types = source
        .content_types
        .iter()
        .filter(|ct| selection.content_types.contains(&ct.sys.id))
        .cloned()
        .collect();
    let editor_interfaces = selection
        .content_types
        .iter()
        .filter_map(|id| source.editor_interface(id).cloned())
        .collect();
    let entries: Vec<_> = source
        .entries
        .iter()
        .filter(|entry| selection.entries.contains(entry.id()))
        .cloned()
        .collect();

    let linked: HashSet<String> = entries
        .iter()
        .flat_map(|entry| entry.linked_asset_ids())
        .collect();
    let assets = source
        .assets
        .iter()
        .filter(|asset| linked.contains(&asset.sys.id))
        .cloned()
        .collect();

    SnapshotContent {
        content_types,
        entries,
        assets,
        locales: source.locales.clone(),
        editor_interfaces,
        extra: Map::new(),
    }
}

/// One field whose value differs between two versions of an entry.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldChange {
    /// Field id.
    pub field_id: String,
    /// Value in the source environment.
    pub source: Option<Value>,
    /// Value in the target environment.
    pub target: Option<Value>,
}

/// Compares two raw entry documents field by field. A missing target reports
/// every source field. System metadata is ignored.
#[must_use]
pub fn entry_changes(source: &Value, target: Option<&Value>) -> Vec<FieldChange> {
    let empty = Map::new();
    let source_fields = source
        .get("fields")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let target_fields = target
        .and_then(|value| value.get("fields"))
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let field_ids: BTreeSet<&String> = source_fields.keys().chain(target_fields.keys()).collect();
    field_ids
        .into_iter()
        .filter_map(|field_id| {
            let before = source_fields.get(field_id);
            let after = target_fields.get(field_id);
            (before != after).then(|| FieldChange {
                field_id: field_id.clone(),
                source: before.cloned(),
                target: after.cloned(),
            })
        })
        .collect()
}
