//! Environment provisioning.
//!
//! [`Provisioner::ensure_environment`] makes sure an environment exists and
//! is usable before an import runs against it. Newly created environments
//! reject imports for a while, so creation is always followed by a fixed
//! warm-up floor and then by status polling with doubling backoff.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backend::{ContentBackend, Environment, EnvironmentStatus, RemoteFailure};

/// Minimum wait after creating an environment before it is used.
pub const WARMUP_FLOOR: Duration = Duration::from_secs(20);
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);
const MAX_POLLS: u32 = 12;

/// Errors surfaced while ensuring an environment.
#[derive(Debug, Error)]
pub enum ProvisionError<BackendError>
where
    BackendError: std::error::Error + 'static,
{
    /// Raised when looking up the environment fails for a reason other than
    /// absence.
    #[error("failed to look up environment {environment_id}: {source}")]
    Lookup {
        /// Environment that was looked up.
        environment_id: String,
        /// Provider-specific error.
        #[source]
        source: BackendError,
    },
    /// Raised when creation fails and the environment did not appear.
    #[error("failed to create environment {environment_id}: {source}")]
    Create {
        /// Environment that was requested.
        environment_id: String,
        /// Provider-specific error.
        #[source]
        source: BackendError,
    },
    /// Raised when the environment never reports itself usable.
    #[error("environment {environment_id} did not become ready: {reason}")]
    NotReady {
        /// Environment being waited on.
        environment_id: String,
        /// Why waiting stopped.
        reason: String,
    },
}

/// Creates missing environments and waits for them to become usable.
#[derive(Clone, Debug)]
pub struct Provisioner {
    warmup: Duration,
    poll_interval: Duration,
    max_polls: u32,
    default_name: Option<String>,
}

impl Default for Provisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl Provisioner {
    /// Creates a provisioner with production timings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            warmup: WARMUP_FLOOR,
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
            default_name: None,
        }
    }

    /// Overrides the wait floor applied after creation.
    ///
    /// This is primarily used by tests to keep scenarios fast.
    #[must_use]
    pub const fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Overrides the initial readiness poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides how many polls are made after the floor.
    #[must_use]
    pub const fn with_max_polls(mut self, polls: u32) -> Self {
        self.max_polls = polls;
        self
    }

    /// Wait applied after creating an environment.
    #[must_use]
    pub const fn warmup(&self) -> Duration {
        self.warmup
    }

    /// Display name given to created environments. Blank names fall back to
    /// the environment id.
    #[must_use]
    pub fn with_default_name(mut self, name: impl Into<String>) -> Self {
        let value = name.into();
        self.default_name = (!value.trim().is_empty()).then_some(value);
        self
    }

    /// Returns the environment, creating it first when it does not exist.
    ///
    /// Creation is requested at most once. When its outcome is unknown the
    /// environment is looked up again instead of retrying.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Lookup`] for lookup failures other than
    /// absence, [`ProvisionError::Create`] when creation fails, and
    /// [`ProvisionError::NotReady`] when the environment never becomes
    /// usable.
    pub async fn ensure_environment<B>(
        &self,
        backend: &B,
        space_id: &str,
        environment_id: &str,
    ) -> Result<Environment, ProvisionError<B::Error>>
    where
        B: ContentBackend,
    {
        match backend.get_environment(space_id, environment_id).await {
            Ok(existing) => {
                debug!(space = space_id, environment = environment_id, "environment exists");
                if existing.status == EnvironmentStatus::Queued {
                    return self.poll_until_ready(backend, space_id, existing).await;
                }
                return Self::usable(existing);
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                return Err(ProvisionError::Lookup {
                    environment_id: environment_id.to_owned(),
                    source: err,
                });
            }
        }

        let created = self.create(backend, space_id, environment_id).await?;
        info!(
            space = space_id,
            environment = environment_id,
            warmup_secs = self.warmup.as_secs(),
            "environment created; waiting for it to warm up"
        );
        sleep(self.warmup).await;
        self.poll_until_ready(backend, space_id, created).await
    }

    async fn create<B>(
        &self,
        backend: &B,
        space_id: &str,
        environment_id: &str,
    ) -> Result<Environment, ProvisionError<B::Error>>
    where
        B: ContentBackend,
    {
        let name = self.default_name.as_deref().unwrap_or(environment_id);
        let err = match backend
            .create_environment(space_id, environment_id, name)
            .await
        {
            Ok(created) => return Ok(created),
            Err(err) => err,
        };
        if err.is_rejection() {
            return Err(ProvisionError::Create {
                environment_id: environment_id.to_owned(),
                source: err,
            });
        }

        warn!(
            space = space_id,
            environment = environment_id,
            error = %err,
            "environment creation outcome unknown; checking whether it exists"
        );
        backend
            .get_environment(space_id, environment_id)
            .await
            .map_err(|_| ProvisionError::Create {
                environment_id: environment_id.to_owned(),
                source: err,
            })
    }

    async fn poll_until_ready<B>(
        &self,
        backend: &B,
        space_id: &str,
        initial: Environment,
    ) -> Result<Environment, ProvisionError<B::Error>>
    where
        B: ContentBackend,
    {
        let mut current = initial;
        let mut interval = self.poll_interval;
        let mut polls = 0_u32;
        while current.status == EnvironmentStatus::Queued {
            if polls >= self.max_polls {
                return Err(ProvisionError::NotReady {
                    environment_id: current.id,
                    reason: format!("still queued after {polls} status checks"),
                });
            }
            sleep(interval).await;
            interval = interval.saturating_mul(2).min(MAX_POLL_INTERVAL);
            polls = polls.saturating_add(1);
            let environment_id = current.id.clone();
            current = backend
                .get_environment(space_id, &environment_id)
                .await
                .map_err(|err| ProvisionError::Lookup {
                    environment_id,
                    source: err,
                })?;
            debug!(environment = %current.id, status = ?current.status, polls, "readiness poll");
        }
        Self::usable(current)
    }

    fn usable<E>(environment: Environment) -> Result<Environment, ProvisionError<E>>
    where
        E: std::error::Error + 'static,
    {
        if environment.status == EnvironmentStatus::Failed {
            return Err(ProvisionError::NotReady {
                environment_id: environment.id,
                reason: String::from("the provider reported the environment as failed"),
            });
        }
        Ok(environment)
    }
}

#[cfg(test)]
mod tests;
