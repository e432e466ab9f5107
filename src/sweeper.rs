//! Best-effort teardown of every container this process started.

use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::engine::{IsolatedEngine, RemoveOutcome, StopOutcome};
use crate::registry::{RegistryEntry, RunningContainerRegistry};

/// What happened to the registered containers during a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub(crate) struct SweepReport {
    /// Projects whose container was stopped and removed.
    pub cleaned: Vec<String>,
    /// Projects whose container was already gone (404/409).
    pub already_gone: Vec<String>,
    /// Projects whose container could not be removed, with the reason.
    pub failed: Vec<(String, String)>,
}

impl SweepReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.cleaned.len() + self.already_gone.len() + self.failed.len()
    }
}

enum SweepOutcome {
    Cleaned,
    AlreadyGone,
    Failed(String),
}

pub(crate) struct ShutdownSweeper {
    engine: IsolatedEngine,
    registry: Arc<RunningContainerRegistry>,
}

impl ShutdownSweeper {
    pub fn new(engine: IsolatedEngine, registry: Arc<RunningContainerRegistry>) -> Self {
        Self { engine, registry }
    }

    /// Stops and removes every registered container, then clears the
    /// registry whatever the individual outcomes were.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        if self.registry.is_empty() {
            info!("No running containers to clean up");
            return report;
        }

        info!(count = self.registry.len(), "Cleaning up running containers");
        let entries = self.registry.snapshot();
        let outcomes = join_all(entries.iter().map(|entry| self.sweep_one(entry))).await;
        for (entry, outcome) in entries.into_iter().zip(outcomes) {
            match outcome {
                SweepOutcome::Cleaned => report.cleaned.push(entry.name),
                SweepOutcome::AlreadyGone => report.already_gone.push(entry.name),
                SweepOutcome::Failed(reason) => report.failed.push((entry.name, reason)),
            }
        }

        self.registry.clear();
        info!(
            total = report.total(),
            cleaned = report.cleaned.len(),
            already_gone = report.already_gone.len(),
            failed = report.failed.len(),
            "Cleanup finished"
        );
        report
    }

    async fn sweep_one(&self, entry: &RegistryEntry) -> SweepOutcome {
        let project_id = entry.name.as_str();
        let container = entry.container_id.as_str();

        match self.engine.stop(container).await {
            Ok(StopOutcome::Gone) => return SweepOutcome::AlreadyGone,
            Ok(_) => {}
            Err(e) if e.is_gone() => return SweepOutcome::AlreadyGone,
            Err(e) => warn!(project_id, container, "Failed to stop container, removing anyway: {}", e),
        }

        match self.engine.remove(container).await {
            Ok(RemoveOutcome::Removed) => {
                info!(project_id, container, "Container removed");
                SweepOutcome::Cleaned
            }
            Ok(RemoveOutcome::Gone) => SweepOutcome::AlreadyGone,
            Err(e) if e.is_gone() => SweepOutcome::AlreadyGone,
            Err(e) => {
                error!(project_id, container, "Failed to remove container: {}", e);
                SweepOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let terminate = async {
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
            } else {
                error!("Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
