//! In-memory container engine for testing.
//!
//! Mirrors the engine semantics the orchestrator relies on (name
//! uniqueness, id-prefix lookup, missing images) and records every call so
//! tests can assert on what was asked of the engine.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use super::{ContainerEngine, ContainerSpec, ContainerState, EngineError};

/// A container held by the fake engine.
#[derive(Debug, Clone)]
pub(crate) struct FakeContainer {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub spec: Option<ContainerSpec>,
}

#[derive(Debug, Default)]
struct Inner {
    containers: Vec<FakeContainer>,
    images: HashSet<String>,
    calls: Vec<String>,
    failures: HashMap<&'static str, EngineError>,
    hangs: HashSet<&'static str>,
    delays: HashMap<&'static str, Duration>,
    pulls: usize,
}

/// A fake `ContainerEngine` with failure and hang injection.
#[derive(Debug, Default)]
pub(crate) struct FakeEngine {
    inner: Mutex<Inner>,
}

impl FakeEngine {
    /// Creates an engine with the given images available locally.
    pub fn with_images(images: &[&str]) -> Self {
        let engine = Self::default();
        {
            let mut inner = engine.lock();
            inner.images = images.iter().map(|i| (*i).to_string()).collect();
        }
        engine
    }

    /// Inserts a pre-existing container and returns its id.
    pub fn insert_container(&self, name: &str, running: bool) -> String {
        let id = new_container_id();
        self.lock().containers.push(FakeContainer {
            id: id.clone(),
            name: name.to_string(),
            running,
            spec: None,
        });
        id
    }

    /// Makes every future call of `operation` fail with an API error.
    pub fn fail(&self, operation: &'static str, message: &str) {
        self.fail_with(operation, EngineError::api(operation, message));
    }

    /// Makes every future call of `operation` fail with `error`.
    pub fn fail_with(&self, operation: &'static str, error: EngineError) {
        self.lock().failures.insert(operation, error);
    }

    /// Makes every future call of `operation` take at least `delay`.
    pub fn delay(&self, operation: &'static str, delay: Duration) {
        self.lock().delays.insert(operation, delay);
    }

    /// Makes every future call of `operation` hang forever.
    pub fn hang(&self, operation: &'static str) {
        self.lock().hangs.insert(operation);
    }

    /// Returns the container with the given name, if any.
    pub fn container_named(&self, name: &str) -> Option<FakeContainer> {
        self.lock()
            .containers
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Number of containers currently known to the engine.
    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    /// Calls made so far, as `operation:target` strings.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls of one operation.
    pub fn call_count(&self, operation: &str) -> usize {
        let prefix = format!("{operation}:");
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    /// Number of completed image pulls.
    pub fn pull_count(&self) -> usize {
        self.lock().pulls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Records the call and applies injected failures.
    async fn enter(&self, operation: &'static str, target: &str) -> Result<(), EngineError> {
        let (hang, delay) = {
            let mut inner = self.lock();
            inner.calls.push(format!("{operation}:{target}"));
            if let Some(error) = inner.failures.get(operation) {
                return Err(error.clone());
            }
            (inner.hangs.contains(operation), inner.delays.get(operation).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

fn find<'a>(containers: &'a mut [FakeContainer], name_or_id: &str) -> Option<&'a mut FakeContainer> {
    containers
        .iter_mut()
        .find(|c| c.name == name_or_id || (!name_or_id.is_empty() && c.id.starts_with(name_or_id)))
}

fn new_container_id() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerState>, EngineError> {
        self.enter("inspect", name_or_id).await?;
        let mut inner = self.lock();
        Ok(find(&mut inner.containers, name_or_id).map(|c| ContainerState {
            id: c.id.clone(),
            name: c.name.clone(),
            running: c.running,
        }))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.enter("create", &spec.name).await?;
        let mut inner = self.lock();
        if inner.containers.iter().any(|c| c.name == spec.name) {
            return Err(EngineError::conflict(
                &spec.name,
                "container name is already in use",
            ));
        }
        if !inner.images.contains(&spec.image) {
            return Err(EngineError::no_such_image(&spec.image));
        }
        let id = new_container_id();
        inner.containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            running: false,
            spec: Some(spec.clone()),
        });
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.enter("start", id).await?;
        let mut inner = self.lock();
        let container = find(&mut inner.containers, id).ok_or_else(|| EngineError::not_found(id))?;
        container.running = true;
        Ok(())
    }

    async fn stop(&self, id: &str, _grace: Duration) -> Result<(), EngineError> {
        self.enter("stop", id).await?;
        let mut inner = self.lock();
        let container = find(&mut inner.containers, id).ok_or_else(|| EngineError::not_found(id))?;
        container.running = false;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.enter("remove", id).await?;
        let mut inner = self.lock();
        let before = inner.containers.len();
        inner
            .containers
            .retain(|c| !(c.name == id || (!id.is_empty() && c.id.starts_with(id))));
        if inner.containers.len() == before {
            return Err(EngineError::not_found(id));
        }
        Ok(())
    }

    async fn pull(&self, image: &str) -> Result<(), EngineError> {
        self.enter("pull", image).await?;
        let mut inner = self.lock();
        inner.images.insert(image.to_string());
        inner.pulls += 1;
        Ok(())
    }
}
