//! Collaborator interface for the hosted content-management backend.
//!
//! The orchestration layer never talks to a particular remote API directly;
//! it consumes the small set of lookups and mutations declared here. The
//! export and import jobs are not part of this trait because they run as
//! long-lived external processes (see [`crate::executor`]).

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A logical space that groups environments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Space {
    /// Provider identifier of the space.
    pub id: String,
    /// Display name of the space.
    pub name: String,
}

/// Readiness reported by the provider for an environment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnvironmentStatus {
    /// The environment accepts reads and writes.
    Ready,
    /// The environment is still being created or cloned.
    Queued,
    /// Creation failed on the provider side.
    Failed,
    /// The provider did not report a status.
    Unknown,
}

impl EnvironmentStatus {
    /// Maps a provider status identifier onto a known status.
    #[must_use]
    pub fn from_provider(value: &str) -> Self {
        match value {
            "ready" => Self::Ready,
            "queued" | "creating" => Self::Queued,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// Remote environment resource. Not owned locally.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Environment {
    /// Environment identifier, unique within its space.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Creation timestamp reported by the provider, when known.
    pub created_at: Option<DateTime<Utc>>,
    /// Provider readiness status.
    pub status: EnvironmentStatus,
}

/// Classification hook every backend error type implements so the
/// provisioner can tell an absent resource apart from other failures.
pub trait RemoteFailure: std::error::Error + Send + Sync + 'static {
    /// Returns `true` when the error means the requested resource does not
    /// exist.
    fn is_not_found(&self) -> bool;

    /// Returns `true` when the provider definitively rejected the request,
    /// so the request cannot have taken effect.
    fn is_rejection(&self) -> bool;
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by content-management backends.
pub trait ContentBackend: Send + Sync {
    /// Provider specific error type returned by the backend.
    type Error: RemoteFailure;

    /// Fetches a single space.
    fn get_space<'a>(&'a self, space_id: &'a str) -> BackendFuture<'a, Space, Self::Error>;

    /// Lists the spaces visible to the configured credentials.
    fn list_spaces(&self) -> BackendFuture<'_, Vec<Space>, Self::Error>;

    /// Lists the environments of a space.
    fn get_environments<'a>(
        &'a self,
        space_id: &'a str,
    ) -> BackendFuture<'a, Vec<Environment>, Self::Error>;

    /// Fetches one environment by id. Absence is reported through an error
    /// whose [`RemoteFailure::is_not_found`] returns `true`.
    fn get_environment<'a>(
        &'a self,
        space_id: &'a str,
        environment_id: &'a str,
    ) -> BackendFuture<'a, Environment, Self::Error>;

    /// Requests creation of an environment. Not safe to retry blindly.
    fn create_environment<'a>(
        &'a self,
        space_id: &'a str,
        environment_id: &'a str,
        name: &'a str,
    ) -> BackendFuture<'a, Environment, Self::Error>;

    /// Fetches a single entry as the provider's raw JSON document.
    fn get_entry<'a>(
        &'a self,
        space_id: &'a str,
        environment_id: &'a str,
        entry_id: &'a str,
    ) -> BackendFuture<'a, Value, Self::Error>;
}
