//! Project status state machine.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{ProjectRecordStore, StatusUpdate};
use crate::error::PlaygroundError;

/// Lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ProjectStatus {
    /// Reconciliation in progress.
    Loading,
    /// Container up and files downloaded.
    Running,
    /// Close in progress; files are being flushed to storage.
    Saving,
    /// No container; durable storage is authoritative.
    Stopped,
    /// Resources purged, record about to be deleted.
    Removed,
    /// Legacy activity marker.
    Active,
    /// Legacy activity marker.
    Inactive,
}

impl ProjectStatus {
    /// Transition table.
    ///
    /// `stopped` and `removed` can be entered from anywhere so failure
    /// paths always have a safe place to land. A removed project can only
    /// be stopped.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ProjectStatus::{Active, Inactive, Loading, Removed, Running, Saving, Stopped};
        match (self, next) {
            (_, Stopped | Removed) => true,
            (Removed, _) => false,
            (_, Loading | Saving) => true,
            (Loading | Running, Running) => true,
            (Running | Active | Inactive, Active | Inactive) => true,
            _ => false,
        }
    }

    /// Statuses that refresh `last_active_at` when written.
    pub fn refreshes_activity(self) -> bool {
        matches!(self, Self::Active | Self::Running | Self::Loading | Self::Saving)
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Loading => "loading",
            Self::Running => "running",
            Self::Saving => "saving",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
            Self::Active => "active",
            Self::Inactive => "inactive",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "loading" => Ok(Self::Loading),
            "running" => Ok(Self::Running),
            "saving" => Ok(Self::Saving),
            "stopped" => Ok(Self::Stopped),
            "removed" => Ok(Self::Removed),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            _ => anyhow::bail!("Unknown project status: '{s}'"),
        }
    }
}

/// Writes one project's status through the record store, enforcing the
/// transition table.
pub(crate) struct StatusTracker {
    records: Arc<dyn ProjectRecordStore>,
    project_id: String,
    current: ProjectStatus,
}

impl StatusTracker {
    pub fn new(records: Arc<dyn ProjectRecordStore>, project_id: &str, current: ProjectStatus) -> Self {
        Self {
            records,
            project_id: project_id.to_string(),
            current,
        }
    }

    pub fn current(&self) -> ProjectStatus {
        self.current
    }

    /// Applies an update if the table allows it.
    pub async fn advance(&mut self, update: StatusUpdate) -> Result<(), PlaygroundError> {
        let next = update.status;
        if !self.current.can_transition_to(next) {
            warn!(
                project_id = %self.project_id,
                from = %self.current,
                to = %next,
                "Rejected out-of-table status transition"
            );
            return Err(PlaygroundError::InvalidTransition {
                project_id: self.project_id.clone(),
                from: self.current,
                to: next,
            });
        }
        debug!(project_id = %self.project_id, from = %self.current, to = %next, "Status transition");
        self.records.update_status(&self.project_id, update).await?;
        self.current = next;
        Ok(())
    }

    /// Forces `stopped` on a failure path. The original error is what the
    /// caller reports, so a failure here is only logged.
    pub async fn force_stopped(&mut self, clear_container: bool) {
        let mut update = StatusUpdate::new(ProjectStatus::Stopped);
        if clear_container {
            update = update.clear_container();
        }
        match self.records.update_status(&self.project_id, update).await {
            Ok(()) => self.current = ProjectStatus::Stopped,
            Err(e) => error!(
                project_id = %self.project_id,
                "Failed to force status to stopped: {}", e
            ),
        }
    }
}
