//! Public project operations: open, close and delete.
//!
//! Each operation holds the project's lock for its whole duration, so two
//! requests never seed, download or upload the same host directory at
//! once.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::engine::{IsolatedEngine, RemoveOutcome, StopOutcome};
use crate::error::PlaygroundError;
use crate::locks::ProjectLocks;
use crate::reconciler::ContainerReconciler;
use crate::records::{ProjectRecordStore, ProjectStatus, StatusTracker, StatusUpdate};
use crate::registry::RunningContainerRegistry;
use crate::storage::project_prefix;
use crate::sync::FileSyncEngine;

/// Result of a successful close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ClosedProject {
    /// Container that was torn down, if the project had one.
    pub container_id: Option<String>,
    /// Files flushed to durable storage.
    pub files_saved: usize,
}

/// Result of a successful delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct DeletedProject {
    pub container_id: Option<String>,
    pub files_deleted: usize,
    /// Durable files that could not be deleted.
    pub files_failed: usize,
}

pub(crate) struct LifecycleController {
    reconciler: ContainerReconciler,
    records: Arc<dyn ProjectRecordStore>,
    sync: Arc<FileSyncEngine>,
    engine: IsolatedEngine,
    registry: Arc<RunningContainerRegistry>,
    locks: ProjectLocks,
}

impl LifecycleController {
    pub fn new(
        reconciler: ContainerReconciler,
        records: Arc<dyn ProjectRecordStore>,
        sync: Arc<FileSyncEngine>,
        engine: IsolatedEngine,
        registry: Arc<RunningContainerRegistry>,
    ) -> Self {
        Self {
            reconciler,
            records,
            sync,
            engine,
            registry,
            locks: ProjectLocks::new(),
        }
    }

    /// Brings the project up and returns its container id.
    pub async fn open(&self, project_id: &str, user_id: &str) -> Result<String, PlaygroundError> {
        check_ids(project_id, user_id)?;
        let _guard = self.locks.acquire(project_id).await;
        info!(project_id, user_id, "Opening project");
        self.reconciler.reconcile(project_id, user_id).await
    }

    /// Saves the project's files and tears its container down.
    ///
    /// Stopping and removing the container are best-effort. The upload is
    /// not: if it fails the project is forced to `stopped` and the error is
    /// returned with the host directory left in place.
    pub async fn close(&self, project_id: &str, user_id: &str) -> Result<ClosedProject, PlaygroundError> {
        check_ids(project_id, user_id)?;
        let _guard = self.locks.acquire(project_id).await;
        info!(project_id, user_id, "Closing project");

        let project = self
            .records
            .get_project(project_id)
            .await?
            .filter(|p| p.is_owned_by(user_id))
            .ok_or_else(|| PlaygroundError::not_found("Project", project_id))?;
        let mut status = StatusTracker::new(Arc::clone(&self.records), project_id, project.status);
        status.advance(StatusUpdate::new(ProjectStatus::Saving)).await?;

        let Some(container_id) = project.container_id else {
            info!(project_id, "No container recorded, nothing to save");
            status.advance(StatusUpdate::new(ProjectStatus::Stopped)).await?;
            return Ok(ClosedProject {
                container_id: None,
                files_saved: 0,
            });
        };

        self.stop_best_effort(project_id, &container_id).await;

        let report = match self.sync.upload(user_id, project_id).await {
            Ok(report) => report,
            Err(e) => {
                error!(project_id, "Failed to save project files: {}", e);
                status.force_stopped(false).await;
                return Err(e);
            }
        };

        let removed = self.remove_best_effort(project_id, &container_id).await;
        if let Err(e) = self.sync.remove_host_dir(project_id).await {
            warn!(project_id, "Failed to clean up host directory: {}", e);
        }

        status
            .advance(StatusUpdate::new(ProjectStatus::Stopped).clear_container())
            .await?;
        if removed {
            self.registry.remove(project_id);
        }

        info!(project_id, files = report.transferred.len(), "Project closed and saved");
        Ok(ClosedProject {
            container_id: Some(container_id),
            files_saved: report.transferred.len(),
        })
    }

    /// Removes the project's container, durable files, host directory and
    /// record.
    ///
    /// Container teardown and per-batch deletes are best-effort. Failing to
    /// list the durable files or to delete the record is returned.
    pub async fn delete(&self, project_id: &str, user_id: &str) -> Result<DeletedProject, PlaygroundError> {
        check_ids(project_id, user_id)?;
        let _guard = self.locks.acquire(project_id).await;
        info!(project_id, user_id, "Deleting project");

        let project = self.records.get_project(project_id).await?;
        if project.as_ref().is_some_and(|p| !p.is_owned_by(user_id)) {
            return Err(PlaygroundError::not_found("Project", project_id));
        }
        let container_id = project
            .as_ref()
            .and_then(|p| p.container_id.clone())
            .or_else(|| self.registry.get(project_id));

        if let Some(container_id) = &container_id {
            self.stop_best_effort(project_id, container_id).await;
            if self.remove_best_effort(project_id, container_id).await {
                info!(project_id, container = %container_id, "Container removed for deletion");
            }
        }

        let purge = self.sync.purge(user_id, project_id).await?;
        if !purge.is_complete() {
            warn!(project_id, failed = purge.failed.len(), "Some durable files were not deleted");
        }

        if let Err(e) = self.sync.remove_host_dir(project_id).await {
            warn!(project_id, "Failed to clean up host directory: {}", e);
        }

        if let Some(project) = &project {
            let mut status = StatusTracker::new(Arc::clone(&self.records), project_id, project.status);
            status
                .advance(StatusUpdate::new(ProjectStatus::Removed).clear_container())
                .await?;
        }
        self.records.delete_project(project_id, user_id).await?;
        self.registry.remove(project_id);

        info!(project_id, "Project and all its data deleted");
        Ok(DeletedProject {
            container_id,
            files_deleted: purge.transferred.len(),
            files_failed: purge.failed.len(),
        })
    }

    async fn stop_best_effort(&self, project_id: &str, container_id: &str) {
        match self.engine.stop(container_id).await {
            Ok(StopOutcome::Stopped) => info!(project_id, container = %container_id, "Container stopped"),
            Ok(StopOutcome::AlreadyStopped) => {}
            Ok(StopOutcome::Gone) => {
                warn!(project_id, container = %container_id, "Container not found, likely already removed");
            }
            Err(e) if e.is_timeout() => {
                warn!(project_id, container = %container_id, "Stop timed out, container will be force-removed");
            }
            Err(e) => warn!(project_id, container = %container_id, "Failed to stop container: {}", e),
        }
    }

    /// Returns true once the container is confirmed gone.
    async fn remove_best_effort(&self, project_id: &str, container_id: &str) -> bool {
        match self.engine.remove(container_id).await {
            Ok(RemoveOutcome::Removed | RemoveOutcome::Gone) => true,
            Err(e) if e.is_gone() => true,
            Err(e) => {
                warn!(project_id, container = %container_id, "Failed to remove container: {}", e);
                false
            }
        }
    }
}

/// Rejects ids that cannot name a single project directory and prefix.
fn check_ids(project_id: &str, user_id: &str) -> Result<(), PlaygroundError> {
    project_prefix(user_id, project_id)?;
    Ok(())
}
