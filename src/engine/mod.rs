//! Container engine access.
//!
//! `ContainerEngine` is the narrow, typed surface of the Docker API that the
//! orchestrator needs. Callers never use it directly: every call goes through
//! [`IsolatedEngine`], which runs it on the worker pool with a time bound.

mod docker;
#[cfg(test)]
pub(crate) mod fake;
mod isolated;

pub(crate) use docker::DockerEngine;
pub(crate) use isolated::{IsolatedEngine, RemoveOutcome, StopOutcome};

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Number of project id characters used in container names.
pub(crate) const SHORT_PROJECT_ID_LEN: usize = 8;

/// Number of engine id characters kept as the durable container reference.
pub(crate) const SHORT_CONTAINER_ID_LEN: usize = 13;

/// Errors reported by a container engine.
#[derive(Debug, Clone, thiserror::Error)]
pub(crate) enum EngineError {
    /// The container does not exist (HTTP 404).
    #[error("No such container: {id}")]
    NotFound { id: String },

    /// The container is in a conflicting state, e.g. already being removed
    /// or its name is taken (HTTP 409).
    #[error("Conflict for container {id}: {message}")]
    Conflict { id: String, message: String },

    /// The image is not present locally.
    #[error("No such image: {image}")]
    NoSuchImage { image: String },

    /// The engine daemon cannot be reached.
    #[error("Docker is not available: {message}")]
    Unavailable { message: String },

    /// Any other engine failure.
    #[error("Container operation `{operation}` failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },
}

impl EngineError {
    /// Creates a `NotFound` error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a `Conflict` error.
    pub fn conflict(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Creates a `NoSuchImage` error.
    pub fn no_such_image(image: impl Into<String>) -> Self {
        Self::NoSuchImage {
            image: image.into(),
        }
    }

    /// Creates an `Unavailable` error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates an `Api` error.
    pub fn api(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Api {
            operation,
            message: message.into(),
        }
    }

    /// Returns true for a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for a 409.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true if the image must be pulled first.
    pub fn is_no_such_image(&self) -> bool {
        matches!(self, Self::NoSuchImage { .. })
    }
}

/// What the engine reports about a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContainerState {
    /// Full engine-assigned id.
    pub id: String,
    /// Container name without the leading slash.
    pub name: String,
    /// Whether `State.Running` is true.
    pub running: bool,
}

/// Everything needed to create a project container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub host_path: PathBuf,
    pub container_path: String,
    pub memory_bytes: i64,
    pub cpu_quota: i64,
    pub cpu_period: i64,
    pub command: Vec<String>,
    pub user: Option<String>,
}

impl ContainerSpec {
    /// Bind mount in `host:container` form.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host_path.display(), self.container_path)
    }
}

/// Typed wrapper over the container engine's remote API.
#[async_trait]
pub(crate) trait ContainerEngine: Send + Sync + 'static {
    /// Looks up a container by name or id. A 404 is `Ok(None)`.
    async fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerState>, EngineError>;

    /// Creates (but does not start) a container, returning its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Starts a created or stopped container.
    async fn start(&self, id: &str) -> Result<(), EngineError>;

    /// Stops a container, killing it after `grace`.
    async fn stop(&self, id: &str, grace: Duration) -> Result<(), EngineError>;

    /// Removes a container, forcing removal if it is still running.
    async fn remove(&self, id: &str) -> Result<(), EngineError>;

    /// Pulls an image, returning once the engine reports the pull finished.
    async fn pull(&self, image: &str) -> Result<(), EngineError>;
}

/// Leading characters of a project id, respecting char boundaries.
pub(crate) fn short_project_id(project_id: &str) -> &str {
    truncate_chars(project_id, SHORT_PROJECT_ID_LEN)
}

/// Stable prefix of an engine id stored as the durable reference.
pub(crate) fn short_container_id(container_id: &str) -> &str {
    truncate_chars(container_id, SHORT_CONTAINER_ID_LEN)
}

/// Engine-side container name for a project.
pub(crate) fn container_name(prefix: &str, project_id: &str) -> String {
    format!("{prefix}{}", short_project_id(project_id))
}

fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
