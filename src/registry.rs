//! Containers created by this process.
//!
//! Starts empty, gains an entry when reconciliation brings a container up,
//! loses it once the container is confirmed gone, and is cleared by the
//! shutdown sweep. Nothing is persisted: after a crash, reconciliation
//! rediscovers container state from the engine itself.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One running container owned by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RegistryEntry {
    /// Project id the container belongs to.
    pub name: String,
    /// Short engine id of the container.
    pub container_id: String,
}

/// Process-scoped set of `{project, container}` pairs.
#[derive(Debug, Default)]
pub(crate) struct RunningContainerRegistry {
    entries: Mutex<BTreeMap<String, String>>,
}

impl RunningContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a container for a project. Returns false if that exact
    /// entry was already present.
    pub fn add(&self, project_id: &str, container_id: &str) -> bool {
        let previous = self
            .lock()
            .insert(project_id.to_string(), container_id.to_string());
        previous.as_deref() != Some(container_id)
    }

    /// Forgets a project's container.
    pub fn remove(&self, project_id: &str) -> Option<RegistryEntry> {
        self.lock()
            .remove(project_id)
            .map(|container_id| RegistryEntry {
                name: project_id.to_string(),
                container_id,
            })
    }

    /// Container registered for a project.
    pub fn get(&self, project_id: &str) -> Option<String> {
        self.lock().get(project_id).cloned()
    }

    /// Copy of every entry, ordered by project id.
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        self.lock()
            .iter()
            .map(|(name, container_id)| RegistryEntry {
                name: name.clone(),
                container_id: container_id.clone(),
            })
            .collect()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
