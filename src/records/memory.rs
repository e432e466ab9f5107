//! In-memory record store for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{LanguageTemplate, Project, ProjectRecordStore, ProjectStatus, StatusUpdate};
use crate::error::PlaygroundError;

#[derive(Debug, Default)]
struct Inner {
    projects: HashMap<String, Project>,
    templates: HashMap<String, LanguageTemplate>,
    history: Vec<(String, ProjectStatus)>,
    fail_delete: bool,
}

/// Record store that keeps every status write for assertions.
#[derive(Debug, Default)]
pub(crate) struct MemoryRecordStore {
    inner: Mutex<Inner>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_project(&self, project: Project) {
        self.lock()
            .projects
            .insert(project.project_id.clone(), project);
    }

    pub fn insert_template(&self, template: LanguageTemplate) {
        self.lock().templates.insert(template.id.clone(), template);
    }

    pub fn project(&self, project_id: &str) -> Option<Project> {
        self.lock().projects.get(project_id).cloned()
    }

    /// Statuses written for one project, oldest first.
    pub fn status_history(&self, project_id: &str) -> Vec<ProjectStatus> {
        self.lock()
            .history
            .iter()
            .filter(|(id, _)| id == project_id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn fail_delete(&self) {
        self.lock().fail_delete = true;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProjectRecordStore for MemoryRecordStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>, PlaygroundError> {
        Ok(self.project(project_id))
    }

    async fn update_status(&self, project_id: &str, update: StatusUpdate) -> Result<(), PlaygroundError> {
        let mut inner = self.lock();
        let project = inner
            .projects
            .get_mut(project_id)
            .ok_or_else(|| PlaygroundError::not_found("Project", project_id))?;
        project.apply(&update, Utc::now());
        inner.history.push((project_id.to_string(), update.status));
        Ok(())
    }

    async fn delete_project(&self, project_id: &str, user_id: &str) -> Result<(), PlaygroundError> {
        let mut inner = self.lock();
        if inner.fail_delete {
            return Err(PlaygroundError::records("injected delete failure"));
        }
        if inner
            .projects
            .get(project_id)
            .is_some_and(|p| p.user_id == user_id)
        {
            inner.projects.remove(project_id);
        }
        Ok(())
    }

    async fn get_language_template(&self, template_id: &str) -> Result<Option<LanguageTemplate>, PlaygroundError> {
        Ok(self.lock().templates.get(template_id).cloned())
    }
}
