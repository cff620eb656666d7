//! Content management API backend.
//!
//! Implements [`ContentBackend`] over HTTPS with a bearer management token.
//! Responses are mapped onto the backend model; non-success statuses become
//! [`ContentfulError`] values that carry the provider's error id so the
//! classifier can recognise them.

mod types;

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::backend::{BackendFuture, ContentBackend, Environment, RemoteFailure, Space};
use types::{ApiErrorBody, Collection, CreateEnvironmentBody, EnvironmentResource, SpaceResource};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const CONTENT_TYPE: &str = "application/vnd.contentful.management.v1+json";
const USER_AGENT: &str = concat!("snapmigrate/", env!("CARGO_PKG_VERSION"));

/// Errors raised by the content management API backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ContentfulError {
    /// Raised when the backend is built with incomplete settings.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the requested resource does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Request path that returned 404.
        resource: String,
    },
    /// Raised for any other non-success status.
    #[error("request to {resource} failed with status {status}: {message}")]
    Status {
        /// Request path.
        resource: String,
        /// HTTP status code.
        status: u16,
        /// Provider error id and message.
        message: String,
    },
    /// Raised when the request did not produce a response.
    #[error("request to {resource} failed: {message}")]
    Transport {
        /// Request path.
        resource: String,
        /// Transport error message.
        message: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("failed to decode response from {resource}: {message}")]
    Parse {
        /// Request path.
        resource: String,
        /// Decoder error message.
        message: String,
    },
}

impl RemoteFailure for ContentfulError {
    fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    fn is_rejection(&self) -> bool {
        match self {
            Self::Config(_) | Self::NotFound { .. } => true,
            Self::Status { status, .. } => (400..500).contains(status),
            Self::Transport { .. } | Self::Parse { .. } => false,
        }
    }
}

/// Backend that talks to the content management API.
#[derive(Clone, Debug)]
pub struct ContentfulBackend {
    client: Client,
    api_base: Url,
    token: String,
}

impl ContentfulBackend {
    /// Constructs a backend for `api_base` authenticated with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ContentfulError::Config`] when either value is blank or the
    /// URL is not an absolute HTTP location, or the HTTP client cannot be
    /// built.
    pub fn new(api_base: &str, token: &str) -> Result<Self, ContentfulError> {
        let trimmed = api_base.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ContentfulError::Config(String::from("missing API base URL")));
        }
        let base = Url::parse(trimmed)
            .map_err(|err| ContentfulError::Config(format!("invalid API base URL {trimmed}: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(ContentfulError::Config(format!(
                "invalid API base URL {trimmed}: it cannot carry a path"
            )));
        }
        if token.trim().is_empty() {
            return Err(ContentfulError::Config(String::from(
                "missing management token",
            )));
        }
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ContentfulError::Config(err.to_string()))?;
        Ok(Self {
            client,
            api_base: base,
            token: token.trim().to_owned(),
        })
    }

    /// Appends `segments` to the base URL, percent-encoding each one so ids
    /// cannot change the path structure.
    fn url(&self, segments: &[&str]) -> Result<Url, ContentfulError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ContentfulError::Config(format!("API base URL {} cannot carry a path", self.api_base))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Authenticated request with the vendor content type already set, so a
    /// later `.json()` body keeps it.
    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ContentfulError> {
        Ok(self
            .client
            .request(method, self.url(segments)?)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        path: &str,
    ) -> Result<T, ContentfulError> {
        debug!(path, "management API request");
        let response = request
            .send()
            .await
            .map_err(|err| ContentfulError::Transport {
                resource: path.to_owned(),
                message: err.to_string(),
            })?;
        let checked = check_status(response, path).await?;
        checked
            .json::<T>()
            .await
            .map_err(|err| ContentfulError::Parse {
                resource: path.to_owned(),
                message: err.to_string(),
            })
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ContentfulError> {
        let path = resource_path(segments);
        self.send(self.request(Method::GET, segments)?, &path).await
    }
}

/// Readable form of a request path, used in logs and errors.
fn resource_path(segments: &[&str]) -> String {
    format!("/{}", segments.join("/"))
}

async fn check_status(response: Response, path: &str) -> Result<Response, ContentfulError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, path, &body))
}

fn status_error(status: StatusCode, path: &str, body: &str) -> ContentfulError {
    if status == StatusCode::NOT_FOUND {
        return ContentfulError::NotFound {
            resource: path.to_owned(),
        };
    }
    let fallback = status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_owned();
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .unwrap_or_default()
        .describe(&fallback);
    ContentfulError::Status {
        resource: path.to_owned(),
        status: status.as_u16(),
        message,
    }
}

impl ContentBackend for ContentfulBackend {
    type Error = ContentfulError;

    fn get_space<'a>(&'a self, space_id: &'a str) -> BackendFuture<'a, Space, Self::Error> {
        Box::pin(async move {
            let resource: SpaceResource = self.get(&["spaces", space_id]).await?;
            Ok(resource.into())
        })
    }

    fn list_spaces(&self) -> BackendFuture<'_, Vec<Space>, Self::Error> {
        Box::pin(async move {
            let collection: Collection<SpaceResource> = self.get(&["spaces"]).await?;
            Ok(collection.items.into_iter().map(Space::from).collect())
        })
    }

    fn get_environments<'a>(
        &'a self,
        space_id: &'a str,
    ) -> BackendFuture<'a, Vec<Environment>, Self::Error> {
        Box::pin(async move {
            let collection: Collection<EnvironmentResource> =
                self.get(&["spaces", space_id, "environments"]).await?;
            Ok(collection
                .items
                .into_iter()
                .map(Environment::from)
                .collect())
        })
    }

    fn get_environment<'a>(
        &'a self,
        space_id: &'a str,
        environment_id: &'a str,
    ) -> BackendFuture<'a, Environment, Self::Error> {
        Box::pin(async move {
            let resource: EnvironmentResource = self
                .get(&["spaces", space_id, "environments", environment_id])
                .await?;
            Ok(resource.into())
        })
    }

    fn create_environment<'a>(
        &'a self,
        space_id: &'a str,
        environment_id: &'a str,
        name: &'a str,
    ) -> BackendFuture<'a, Environment, Self::Error> {
        Box::pin(async move {
            let segments = ["spaces", space_id, "environments", environment_id];
            let path = resource_path(&segments);
            let request = self
                .request(Method::PUT, &segments)?
                .json(&CreateEnvironmentBody { name });
            let resource: EnvironmentResource = self.send(request, &path).await?;
            Ok(resource.into())
        })
    }

    fn get_entry<'a>(
        &'a self,
        space_id: &'a str,
        environment_id: &'a str,
        entry_id: &'a str,
    ) -> BackendFuture<'a, Value, Self::Error> {
        Box::pin(async move {
            self.get(&[
                "spaces",
                space_id,
                "environments",
                environment_id,
                "entries",
                entry_id,
            ])
            .await
        })
    }
}
