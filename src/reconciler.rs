//! Drives a project's container and host files to the desired state.
//!
//! Reconciliation is idempotent: opening an already running project
//! accepts the running container, a crashed one is started again with its
//! id preserved, and only a container that predates template seeding is
//! thrown away.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::engine::{
    container_name, short_container_id, ContainerSpec, ContainerState, IsolatedEngine,
    RemoveOutcome,
};
use crate::error::PlaygroundError;
use crate::records::{LanguageTemplate, Project, ProjectRecordStore, ProjectStatus, StatusTracker, StatusUpdate};
use crate::registry::RunningContainerRegistry;
use crate::storage::project_prefix;
use crate::sync::FileSyncEngine;

/// Resource limits and layout applied to every project container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContainerSettings {
    pub name_prefix: String,
    pub container_path: String,
    pub memory_bytes: i64,
    pub cpu_quota: i64,
    pub cpu_period: i64,
    /// Keep-alive command.
    pub command: Vec<String>,
    /// `uid:gid` to run as, engine default if `None`.
    pub user: Option<String>,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            name_prefix: "playground-".to_string(),
            container_path: "/app/project".to_string(),
            memory_bytes: 512 * 1024 * 1024,
            cpu_quota: 25_000,
            cpu_period: 100_000,
            command: vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()],
            user: None,
        }
    }
}

impl ContainerSettings {
    /// Engine-side name of a project's container.
    pub fn container_name(&self, project_id: &str) -> String {
        container_name(&self.name_prefix, project_id)
    }
}

/// Brings projects up: container, seeded files, status and registry entry.
pub(crate) struct ContainerReconciler {
    records: Arc<dyn ProjectRecordStore>,
    sync: Arc<FileSyncEngine>,
    engine: IsolatedEngine,
    registry: Arc<RunningContainerRegistry>,
    settings: ContainerSettings,
}

impl ContainerReconciler {
    pub fn new(
        records: Arc<dyn ProjectRecordStore>,
        sync: Arc<FileSyncEngine>,
        engine: IsolatedEngine,
        registry: Arc<RunningContainerRegistry>,
        settings: ContainerSettings,
    ) -> Self {
        Self {
            records,
            sync,
            engine,
            registry,
            settings,
        }
    }

    /// Ensures the project has a running container with up to date files
    /// and returns the container's short id.
    ///
    /// Any failure after the project is found leaves it `stopped`.
    pub async fn reconcile(&self, project_id: &str, user_id: &str) -> Result<String, PlaygroundError> {
        let project = self
            .records
            .get_project(project_id)
            .await?
            .filter(|p| p.is_owned_by(user_id))
            .ok_or_else(|| PlaygroundError::not_found("Project", project_id))?;

        let mut status = StatusTracker::new(Arc::clone(&self.records), project_id, project.status);
        status.advance(StatusUpdate::new(ProjectStatus::Loading)).await?;

        match self.bring_up(&project, user_id, &mut status).await {
            Ok(container_id) => Ok(container_id),
            Err(e) => {
                error!(project_id, status = %status.current(), "Failed to ensure container: {}", e);
                status.force_stopped(false).await;
                Err(e)
            }
        }
    }

    async fn bring_up(
        &self,
        project: &Project,
        user_id: &str,
        status: &mut StatusTracker,
    ) -> Result<String, PlaygroundError> {
        let project_id = project.project_id.as_str();
        let template = self
            .records
            .get_language_template(&project.template_id)
            .await?
            .ok_or_else(|| PlaygroundError::not_found("Template", &project.template_id))?;
        let image = template
            .image()
            .ok_or_else(|| PlaygroundError::no_image(project_id))?
            .to_string();

        let name = self.settings.container_name(project_id);
        let mut existing = self
            .engine
            .inspect(&name)
            .await
            .map_err(|e| PlaygroundError::reconciliation_failed(project_id, e))?;

        if !project.initialized_with_template {
            if let Some(stale) = existing.take() {
                info!(project_id, container = %stale.name, "Removing container left from before seeding");
                self.discard(&stale)
                    .await
                    .map_err(|e| PlaygroundError::reconciliation_failed(project_id, e))?;
            }
        }

        self.prepare_files(project, &template, user_id, status).await?;

        let container_id = match existing {
            Some(state) if state.running => {
                info!(project_id, container = %state.id, "Container already running");
                state.id
            }
            Some(state) => {
                info!(project_id, container = %state.id, "Starting stopped container");
                self.engine.start(&state.id).await?;
                state.id
            }
            None => {
                let spec = self.container_spec(project_id, name, image)?;
                let id = self.create_with_pull(&spec).await?;
                self.engine.start(&id).await?;
                info!(project_id, container = %id, "Container created and started");
                id
            }
        };

        let short_id = short_container_id(&container_id).to_string();
        status
            .advance(StatusUpdate::new(ProjectStatus::Running).with_container(&short_id))
            .await?;
        if !self.registry.add(project_id, &short_id) {
            info!(project_id, container = %short_id, "Container already registered");
        }
        Ok(short_id)
    }

    /// Stops then removes a container; absence at any point is success.
    async fn discard(&self, state: &ContainerState) -> Result<(), PlaygroundError> {
        self.engine.stop(&state.id).await?;
        match self.engine.remove(&state.id).await {
            Ok(RemoveOutcome::Removed | RemoveOutcome::Gone) => Ok(()),
            Err(e) if e.is_gone() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Seeds from the template on first open, then downloads the durable
    /// files into the host directory.
    async fn prepare_files(
        &self,
        project: &Project,
        template: &LanguageTemplate,
        user_id: &str,
        status: &mut StatusTracker,
    ) -> Result<(), PlaygroundError> {
        let project_id = project.project_id.as_str();
        if !project.initialized_with_template {
            match template.default_files() {
                Some(source) => {
                    info!(project_id, source, "Seeding project from template");
                    let report = self
                        .sync
                        .copy_template(source, &project_prefix(user_id, project_id)?)
                        .await?;
                    if !report.is_complete() {
                        warn!(project_id, failed = report.failed.len(), "Some template files were not copied");
                    }
                }
                None => {
                    info!(project_id, "Template has no default files, starting empty");
                    self.sync.ensure_host_dir(project_id).await?;
                }
            }
            status
                .advance(StatusUpdate::new(ProjectStatus::Loading).initialized(true))
                .await?;
        }

        self.sync.download(user_id, project_id).await?;
        Ok(())
    }

    fn container_spec(&self, project_id: &str, name: String, image: String) -> Result<ContainerSpec, PlaygroundError> {
        Ok(ContainerSpec {
            name,
            image,
            host_path: self.sync.hosts().project_dir(project_id)?,
            container_path: self.settings.container_path.clone(),
            memory_bytes: self.settings.memory_bytes,
            cpu_quota: self.settings.cpu_quota,
            cpu_period: self.settings.cpu_period,
            command: self.settings.command.clone(),
            user: self.settings.user.clone(),
        })
    }

    /// Creates the container, pulling the image and retrying once if the
    /// engine does not have it.
    async fn create_with_pull(&self, spec: &ContainerSpec) -> Result<String, PlaygroundError> {
        match self.engine.create(spec).await {
            Ok(id) => Ok(id),
            Err(PlaygroundError::Engine(e)) if e.is_no_such_image() => {
                info!(image = %spec.image, "Image not found locally, pulling");
                self.engine.pull(&spec.image).await?;
                info!(image = %spec.image, "Image pulled, retrying create");
                self.engine.create(spec).await.map_err(|e| name_conflict(spec, e))
            }
            Err(e) => Err(name_conflict(spec, e)),
        }
    }
}

fn name_conflict(spec: &ContainerSpec, err: PlaygroundError) -> PlaygroundError {
    match err {
        PlaygroundError::Engine(e) if e.is_conflict() => {
            PlaygroundError::conflict(format!("container name {} is already in use: {e}", spec.name))
        }
        other => other,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::engine::ContainerEngine;
    use crate::records::memory::MemoryRecordStore;
    use crate::records::tests::{project, template};
    use crate::storage::memory::MemoryObjectStore;
    use crate::storage::ObjectStore;
    use crate::sync::HostPaths;
    use crate::worker::WorkerPool;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    pub(crate) const NODE_IMAGE: &str = "node:20-alpine";

    /// Reconciler collaborators wired to in-memory fakes.
    pub(crate) struct Harness {
        pub engine: Arc<FakeEngine>,
        pub store: Arc<MemoryObjectStore>,
        pub records: Arc<MemoryRecordStore>,
        pub registry: Arc<RunningContainerRegistry>,
        pub sync: Arc<FileSyncEngine>,
        pub isolated: IsolatedEngine,
        host_root: TempDir,
    }

    impl Harness {
        /// Project `p1` owned by `u1` on the `node` template, whose starter
        /// file is `templates/node/index.js`.
        pub fn new() -> Self {
            Self::with_engine(FakeEngine::with_images(&[NODE_IMAGE]))
        }

        pub fn with_engine(engine: FakeEngine) -> Self {
            let engine = Arc::new(engine);
            let store = Arc::new(MemoryObjectStore::new());
            store.put("templates/node/index.js", "console.log(0)");
            let records = Arc::new(MemoryRecordStore::new());
            records.insert_template(template("node", NODE_IMAGE, Some("templates/node")));
            records.insert_project(project("p1", "u1", "node"));

            let host_root = tempfile::tempdir().unwrap();
            let sync = Arc::new(FileSyncEngine::new(
                Arc::clone(&store) as Arc<dyn ObjectStore>,
                HostPaths::new(host_root.path()),
            ));
            let isolated = IsolatedEngine::new(
                Arc::clone(&engine) as Arc<dyn ContainerEngine>,
                WorkerPool::new(4, Some(Duration::from_secs(2))),
                Duration::from_secs(5),
                Duration::from_millis(500),
            );
            Self {
                engine,
                store,
                records,
                registry: Arc::new(RunningContainerRegistry::new()),
                sync,
                isolated,
                host_root,
            }
        }

        pub fn reconciler(&self) -> ContainerReconciler {
            ContainerReconciler::new(
                Arc::clone(&self.records) as Arc<dyn ProjectRecordStore>,
                Arc::clone(&self.sync),
                self.isolated.clone(),
                Arc::clone(&self.registry),
                ContainerSettings::default(),
            )
        }

        pub fn host_dir(&self, project_id: &str) -> PathBuf {
            self.host_root.path().join(project_id)
        }

        /// Marks `p1` as already seeded.
        pub fn mark_initialized(&self) {
            let mut p = self.records.project("p1").unwrap();
            p.initialized_with_template = true;
            self.records.insert_project(p);
        }
    }

    #[tokio::test]
    async fn test_first_open_seeds_and_creates_container() {
        let h = Harness::new();
        let id = h.reconciler().reconcile("p1", "u1").await.unwrap();

        let container = h.engine.container_named("playground-p1").unwrap();
        assert!(container.running);
        assert!(container.id.starts_with(&id));
        assert_eq!(id.len(), 13);

        let spec = container.spec.unwrap();
        assert_eq!(spec.image, NODE_IMAGE);
        assert_eq!(spec.host_path, h.host_dir("p1"));
        assert_eq!(spec.container_path, "/app/project");
        assert_eq!(spec.memory_bytes, 536_870_912);
        assert_eq!((spec.cpu_quota, spec.cpu_period), (25_000, 100_000));
        assert_eq!(spec.command, vec!["tail", "-f", "/dev/null"]);

        assert_eq!(h.store.get("u1/p1/index.js").unwrap(), "console.log(0)");
        assert_eq!(
            std::fs::read_to_string(h.host_dir("p1").join("index.js")).unwrap(),
            "console.log(0)"
        );

        let p = h.records.project("p1").unwrap();
        assert_eq!(p.status, ProjectStatus::Running);
        assert_eq!(p.container_id.as_deref(), Some(id.as_str()));
        assert!(p.initialized_with_template);
        assert!(p.last_active_at.is_some());
        assert_eq!(h.registry.get("p1").as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_open_twice_is_idempotent() {
        let h = Harness::new();
        let reconciler = h.reconciler();
        let first = reconciler.reconcile("p1", "u1").await.unwrap();
        let second = reconciler.reconcile("p1", "u1").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.engine.container_count(), 1);
        assert_eq!(h.engine.call_count("create"), 1);
        assert_eq!(h.engine.call_count("start"), 1);
        assert_eq!(h.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_crashed_container_is_started_not_recreated() {
        let h = Harness::new();
        h.mark_initialized();
        h.store.put("u1/p1/index.js", "console.log(1)");
        let existing = h.engine.insert_container("playground-p1", false);

        let id = h.reconciler().reconcile("p1", "u1").await.unwrap();

        assert!(existing.starts_with(&id));
        assert_eq!(h.engine.call_count("create"), 0);
        assert_eq!(h.engine.call_count("start"), 1);
        assert!(h.engine.container_named("playground-p1").unwrap().running);
        assert_eq!(
            std::fs::read_to_string(h.host_dir("p1").join("index.js")).unwrap(),
            "console.log(1)"
        );
    }

    #[tokio::test]
    async fn test_initialized_project_skips_template_copy() {
        let h = Harness::new();
        h.mark_initialized();
        h.store.put("u1/p1/main.js", "user work");

        h.reconciler().reconcile("p1", "u1").await.unwrap();

        assert!(h.store.get("u1/p1/index.js").is_none());
        assert!(h.host_dir("p1").join("main.js").exists());
        assert!(!h.host_dir("p1").join("index.js").exists());
    }

    #[tokio::test]
    async fn test_unseeded_project_replaces_stale_container() {
        let h = Harness::new();
        let stale = h.engine.insert_container("playground-p1", true);

        let id = h.reconciler().reconcile("p1", "u1").await.unwrap();

        assert!(!stale.starts_with(&id));
        assert_eq!(h.engine.container_count(), 1);
        assert_eq!(h.engine.call_count("stop"), 1);
        assert_eq!(h.engine.call_count("remove"), 1);
        assert_eq!(h.engine.call_count("create"), 1);
    }

    #[tokio::test]
    async fn test_missing_image_is_pulled_once() {
        let h = Harness::with_engine(FakeEngine::default());
        h.reconciler().reconcile("p1", "u1").await.unwrap();

        assert_eq!(h.engine.pull_count(), 1);
        assert_eq!(h.engine.call_count("create"), 2);
        assert!(h.engine.container_named("playground-p1").unwrap().running);
    }

    #[tokio::test]
    async fn test_failed_pull_leaves_project_stopped() {
        let h = Harness::with_engine(FakeEngine::default());
        h.engine.fail("pull", "manifest unknown");

        let err = h.reconciler().reconcile("p1", "u1").await.unwrap_err();
        assert!(err.to_string().contains("manifest unknown"));
        assert_eq!(h.records.project("p1").unwrap().status, ProjectStatus::Stopped);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_blank_image_fails_before_touching_engine() {
        let h = Harness::new();
        h.records.insert_template(template("node", "   ", Some("templates/node")));

        let err = h.reconciler().reconcile("p1", "u1").await.unwrap_err();
        assert!(matches!(err, PlaygroundError::NoImage { .. }));
        assert!(h.engine.calls().is_empty());
        assert_eq!(
            h.records.status_history("p1"),
            vec![ProjectStatus::Loading, ProjectStatus::Stopped]
        );
    }

    #[tokio::test]
    async fn test_unknown_project_is_not_found() {
        let h = Harness::new();
        let err = h.reconciler().reconcile("nope", "u1").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(h.engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_inspect_failure_is_reconciliation_failure() {
        let h = Harness::new();
        h.engine.fail("inspect", "daemon hung up");

        let err = h.reconciler().reconcile("p1", "u1").await.unwrap_err();
        assert!(matches!(err, PlaygroundError::ReconciliationFailed { .. }));
        assert_eq!(h.records.project("p1").unwrap().status, ProjectStatus::Stopped);
    }

    #[tokio::test]
    async fn test_template_without_files_starts_empty() {
        let h = Harness::new();
        h.records.insert_template(template("node", NODE_IMAGE, None));

        h.reconciler().reconcile("p1", "u1").await.unwrap();

        assert!(h.records.project("p1").unwrap().initialized_with_template);
        let entries = std::fs::read_dir(h.host_dir("p1")).unwrap().count();
        assert_eq!(entries, 0);
    }

    #[tokio::test]
    async fn test_name_conflict_maps_to_conflict() {
        let h = Harness::new();
        let err = name_conflict(
            &h.reconciler()
                .container_spec("p1", "playground-p1".into(), NODE_IMAGE.into())
                .unwrap(),
            crate::engine::EngineError::conflict("playground-p1", "name in use").into(),
        );
        assert!(matches!(err, PlaygroundError::Conflict { .. }));
    }
}
