//! Snapshot data model.
//!
//! A snapshot is the export tool's JSON document plus a small `snapshot`
//! header recording where and when it was captured. Keys the model does not
//! interpret are preserved verbatim so a stored snapshot can be replayed by
//! the import tool unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where and when a snapshot was captured.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotOrigin {
    /// Space the snapshot was exported from.
    pub space_id: String,
    /// Environment the snapshot was exported from.
    pub environment_id: String,
    /// Capture time. Absent for exports that were not produced by this tool.
    pub created_at: Option<DateTime<Utc>>,
}

/// Immutable captured export of an environment.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Snapshot {
    /// Capture header.
    #[serde(rename = "snapshot", default)]
    pub origin: SnapshotOrigin,
    /// The export document itself.
    #[serde(flatten)]
    pub content: SnapshotContent,
}

/// The export document: content model, content and media.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotContent {
    /// Content model.
    #[serde(default)]
    pub content_types: Vec<ContentType>,
    /// Content entries.
    #[serde(default)]
    pub entries: Vec<Entry>,
    /// Media assets.
    #[serde(default)]
    pub assets: Vec<Asset>,
    /// Locales, kept opaque.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locales: Vec<Value>,
    /// Editor interfaces, kept opaque apart from their content type link.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub editor_interfaces: Vec<Value>,
    /// Any other top-level keys of the export.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SnapshotContent {
    /// Looks up a content type by id.
    #[must_use]
    pub fn content_type(&self, id: &str) -> Option<&ContentType> {
        self.content_types.iter().find(|ct| ct.sys.id == id)
    }

    /// Iterates over the entries whose content type is `content_type_id`.
    pub fn entries_of<'a>(&'a self, content_type_id: &'a str) -> impl Iterator<Item = &'a Entry> {
        self.entries
            .iter()
            .filter(move |entry| entry.content_type_id() == content_type_id)
    }

    /// Returns the editor interface document linked to `content_type_id`.
    #[must_use]
    pub fn editor_interface(&self, content_type_id: &str) -> Option<&Value> {
        self.editor_interfaces.iter().find(|value| {
            value
                .pointer("/sys/contentType/sys/id")
                .and_then(Value::as_str)
                == Some(content_type_id)
        })
    }
}

/// System metadata block. Only the id is interpreted.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Sys {
    /// Resource identifier.
    pub id: String,
    /// Version counters, timestamps and other provider bookkeeping.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// A link to another resource (`{"sys": {"type": "Link", "id": ...}}`).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Link {
    /// Link target metadata.
    pub sys: Sys,
}

/// Content type definition.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentType {
    /// System metadata.
    pub sys: Sys,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Id of the field used as an entry's title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_field: Option<String>,
    /// Ordered field definitions.
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Remaining keys such as `description`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentType {
    /// Returns `true` when the field schemas differ by value. Names,
    /// descriptions and system metadata do not count.
    #[must_use]
    pub fn schema_differs(&self, other: &Self) -> bool {
        self.fields != other.fields
    }
}

/// Field definition within a content type.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Field {
    /// Field id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Field type (`Symbol`, `Text`, `Link`, ...).
    #[serde(rename = "type", default)]
    pub field_type: String,
    /// Whether a value is mandatory.
    #[serde(default)]
    pub required: bool,
    /// Validations, localisation flags, item types and so on.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Entry system metadata.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntrySys {
    /// Entry id.
    pub id: String,
    /// Link to the entry's content type.
    #[serde(default)]
    pub content_type: Link,
    /// Version counters, timestamps and publish state.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Content entry.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Entry {
    /// System metadata.
    pub sys: EntrySys,
    /// Field values keyed by field id, then by locale.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Remaining keys such as `metadata`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entry {
    /// Entry id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.sys.id
    }

    /// Id of the entry's content type.
    #[must_use]
    pub fn content_type_id(&self) -> &str {
        &self.sys.content_type.sys.id
    }

    /// Returns `true` when the field values differ. System metadata is not
    /// compared.
    #[must_use]
    pub fn content_differs(&self, other: &Self) -> bool {
        self.fields != other.fields
    }

    /// Collects the ids of assets linked from any field value.
    #[must_use]
    pub fn linked_asset_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for value in self.fields.values() {
            collect_asset_links(value, &mut ids);
        }
        ids
    }
}

fn collect_asset_links(value: &Value, ids: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            let is_asset_link = map
                .get("sys")
                .and_then(|sys| sys.get("linkType"))
                .and_then(Value::as_str)
                == Some("Asset");
            if is_asset_link {
                if let Some(id) = map
                    .get("sys")
                    .and_then(|sys| sys.get("id"))
                    .and_then(Value::as_str)
                {
                    ids.push(id.to_owned());
                }
                return;
            }
            for nested in map.values() {
                collect_asset_links(nested, ids);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_asset_links(item, ids);
            }
        }
        _ => {}
    }
}

/// Media asset.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Asset {
    /// System metadata.
    pub sys: Sys,
    /// File and title fields plus anything else.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
