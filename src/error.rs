//! Domain-specific error types for orchestrator operations.
//!
//! Typed errors let the lifecycle layer decide which failures are an
//! expected "nothing to do" state and which must reach the caller.

use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineError;
use crate::records::ProjectStatus;
use crate::storage::StorageError;

/// Errors surfaced by reconciliation, lifecycle and sync operations.
#[derive(Debug, thiserror::Error)]
pub(crate) enum PlaygroundError {
    /// A project, template or container does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A resource is already being changed by someone else.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// An isolated worker exceeded its time bound and was torn down.
    #[error("Worker `{operation}` timed out after {timeout_ms}ms")]
    TimedOut {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// An isolated worker terminated without delivering a result.
    #[error("Worker `{operation}` failed: {message}")]
    WorkerFailed {
        operation: &'static str,
        message: String,
    },

    /// Durable storage rejected a list/download/upload/copy/remove.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The container engine failed in a way that is not an absence.
    #[error("Container engine error: {0}")]
    Engine(#[from] EngineError),

    /// The project's template has no container image.
    #[error("No docker image found for project {project_id}")]
    NoImage { project_id: String },

    /// A stale container could not be cleared before creating a new one.
    #[error("Failed to clean up old container for {project_id}: {source}")]
    ReconciliationFailed {
        project_id: String,
        #[source]
        source: Box<PlaygroundError>,
    },

    /// A status write that the project state machine does not allow.
    #[error("Invalid status transition for {project_id}: {from} -> {to}")]
    InvalidTransition {
        project_id: String,
        from: ProjectStatus,
        to: ProjectStatus,
    },

    /// The project record store failed.
    #[error("Record store error: {message}")]
    Records { message: String },

    /// Host filesystem failure.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PlaygroundError {
    /// Creates a `NotFound` error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Creates a `Conflict` error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a `TimedOut` error from a `Duration`.
    pub fn timed_out(operation: &'static str, limit: Duration) -> Self {
        Self::TimedOut {
            operation,
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates a `WorkerFailed` error.
    pub fn worker_failed(operation: &'static str, message: impl Into<String>) -> Self {
        Self::WorkerFailed {
            operation,
            message: message.into(),
        }
    }

    /// Creates a `NoImage` error.
    pub fn no_image(project_id: impl Into<String>) -> Self {
        Self::NoImage {
            project_id: project_id.into(),
        }
    }

    /// Wraps a failure that happened while clearing a stale container.
    pub fn reconciliation_failed(project_id: impl Into<String>, source: Self) -> Self {
        Self::ReconciliationFailed {
            project_id: project_id.into(),
            source: Box::new(source),
        }
    }

    /// Creates a `Records` error.
    pub fn records(message: impl Into<String>) -> Self {
        Self::Records {
            message: message.into(),
        }
    }

    /// Creates an `Io` error tagged with the offending path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this is a worker timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Returns true if the engine reported the container as absent (404)
    /// or already being removed (409).
    pub fn is_gone(&self) -> bool {
        match self {
            Self::Engine(err) => err.is_not_found() || err.is_conflict(),
            _ => false,
        }
    }

    /// Returns true if this is a `NotFound` for any resource kind.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Engine(err) => err.is_not_found(),
            _ => false,
        }
    }
}
