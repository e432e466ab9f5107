//! Wires the orchestrator's components together from configuration.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::{ContainerEngine, DockerEngine, IsolatedEngine};
use crate::error::PlaygroundError;
use crate::lifecycle::LifecycleController;
use crate::reconciler::ContainerReconciler;
use crate::records::{Project, ProjectRecordStore, TomlRecordStore};
use crate::registry::RunningContainerRegistry;
use crate::storage::{FsObjectStore, ObjectStore};
use crate::sweeper::ShutdownSweeper;
use crate::sync::{FileSyncEngine, HostPaths};
use crate::worker::WorkerPool;

/// A project record together with what this process knows about it.
#[derive(Debug, Clone, serde::Serialize)]
pub(crate) struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    /// Container registered by this process, if any.
    pub registered_container: Option<String>,
}

pub(crate) struct Orchestrator {
    lifecycle: LifecycleController,
    sweeper: ShutdownSweeper,
    records: Arc<dyn ProjectRecordStore>,
    registry: Arc<RunningContainerRegistry>,
}

impl Orchestrator {
    /// Connects to Docker and opens the configured stores.
    pub async fn connect(config: &Config) -> Result<Self> {
        let host_root = config.host.root()?;
        tokio::fs::create_dir_all(&host_root)
            .await
            .with_context(|| format!("Failed to create host root: {}", host_root.display()))?;

        let storage_root = config.storage.root()?;
        let records_path = config.records.path()?;
        debug!(
            host_root = %host_root.display(),
            storage_root = %storage_root.display(),
            records = %records_path.display(),
            "Opening stores"
        );

        let docker = DockerEngine::connect(config.container.docker_socket.as_deref())?;
        docker.ping().await?;
        info!("Connected to Docker");

        Self::assemble(
            config,
            Arc::new(docker),
            Arc::new(FsObjectStore::new(storage_root)),
            Arc::new(TomlRecordStore::new(records_path)),
            host_root,
        )
    }

    /// Builds the component graph over the given collaborators.
    pub fn assemble(
        config: &Config,
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn ObjectStore>,
        records: Arc<dyn ProjectRecordStore>,
        host_root: PathBuf,
    ) -> Result<Self> {
        let settings = config.container.settings(&host_root)?;
        let workers = WorkerPool::new(config.worker.pool_size, config.worker.timeout());
        let engine = IsolatedEngine::new(
            engine,
            workers,
            config.container.stop_grace(),
            config.container.stop_timeout(),
        );
        let registry = Arc::new(RunningContainerRegistry::new());
        let sync = Arc::new(FileSyncEngine::new(store, HostPaths::new(host_root)));

        let reconciler = ContainerReconciler::new(
            Arc::clone(&records),
            Arc::clone(&sync),
            engine.clone(),
            Arc::clone(&registry),
            settings,
        );
        let lifecycle = LifecycleController::new(
            reconciler,
            Arc::clone(&records),
            sync,
            engine.clone(),
            Arc::clone(&registry),
        );
        let sweeper = ShutdownSweeper::new(engine, Arc::clone(&registry));

        Ok(Self {
            lifecycle,
            sweeper,
            records,
            registry,
        })
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    pub fn sweeper(&self) -> &ShutdownSweeper {
        &self.sweeper
    }

    /// Current record of a project.
    pub async fn status(&self, project_id: &str) -> Result<Option<ProjectView>, PlaygroundError> {
        let project = self.records.get_project(project_id).await?;
        Ok(project.map(|project| ProjectView {
            registered_container: self.registry.get(project_id),
            project,
        }))
    }
}
