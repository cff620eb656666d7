//! Wire types returned by the content management API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{Environment, EnvironmentStatus, Space};

#[derive(Debug, Deserialize)]
pub(super) struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub(super) items: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub(super) struct LinkSys {
    pub(super) id: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct StatusLink {
    pub(super) sys: LinkSys,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ResourceSys {
    pub(super) id: String,
    #[serde(default)]
    pub(super) created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(super) status: Option<StatusLink>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SpaceResource {
    pub(super) sys: ResourceSys,
    #[serde(default)]
    pub(super) name: String,
}

impl From<SpaceResource> for Space {
    fn from(resource: SpaceResource) -> Self {
        Self {
            id: resource.sys.id,
            name: resource.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct EnvironmentResource {
    pub(super) sys: ResourceSys,
    #[serde(default)]
    pub(super) name: String,
}

impl From<EnvironmentResource> for Environment {
    fn from(resource: EnvironmentResource) -> Self {
        let status = resource
            .sys
            .status
            .map_or(EnvironmentStatus::Unknown, |link| {
                EnvironmentStatus::from_provider(&link.sys.id)
            });
        Self {
            id: resource.sys.id,
            name: resource.name,
            created_at: resource.sys.created_at,
            status,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct CreateEnvironmentBody<'a> {
    pub(super) name: &'a str,
}

/// Error document returned with non-success responses.
#[derive(Debug, Default, Deserialize)]
pub(super) struct ApiErrorBody {
    #[serde(default)]
    pub(super) message: Option<String>,
    #[serde(default)]
    pub(super) sys: Option<LinkSys>,
}

impl ApiErrorBody {
    /// Combines the error id and message, e.g. `RateLimitExceeded: ...`.
    pub(super) fn describe(self, fallback: &str) -> String {
        match (self.sys.map(|sys| sys.id), self.message) {
            (Some(id), Some(message)) => format!("{id}: {message}"),
            (Some(id), None) => id,
            (None, Some(message)) => message,
            (None, None) => fallback.to_owned(),
        }
    }
}
