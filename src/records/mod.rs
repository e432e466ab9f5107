//! Project metadata records.
//!
//! The orchestrator reads projects and their language templates and writes
//! status transitions. Storage of the records themselves is a collaborator
//! behind [`ProjectRecordStore`].

#[cfg(test)]
pub(crate) mod memory;
mod status;
mod toml_store;

pub(crate) use status::{ProjectStatus, StatusTracker};
pub(crate) use toml_store::TomlRecordStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::short_container_id;
use crate::error::PlaygroundError;

/// Read-only seed data for a language/runtime choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LanguageTemplate {
    pub id: String,
    pub name: String,
    /// Container image, e.g. `node:20-alpine`.
    #[serde(default)]
    pub docker_image: String,
    /// Storage prefix holding the template's starter files.
    #[serde(default)]
    pub default_files_path: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl LanguageTemplate {
    /// Image reference, if one is set.
    pub fn image(&self) -> Option<&str> {
        let image = self.docker_image.trim();
        (!image.is_empty()).then_some(image)
    }

    /// Starter files prefix, if one is set.
    pub fn default_files(&self) -> Option<&str> {
        self.default_files_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// A user's playground project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Project {
    pub project_id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub template_id: String,
    pub status: ProjectStatus,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub initialized_with_template: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Applies a status update in place.
    pub fn apply(&mut self, update: &StatusUpdate, now: DateTime<Utc>) {
        self.status = update.status;
        if let Some(container_id) = &update.container_id {
            self.container_id.clone_from(container_id);
        }
        if let Some(initialized) = update.initialized_with_template {
            self.initialized_with_template = initialized;
        }
        if update.status.refreshes_activity() {
            self.last_active_at = Some(now);
        }
        self.updated_at = now;
    }
}

/// A status write, optionally touching the container reference and the
/// template flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusUpdate {
    pub status: ProjectStatus,
    /// `None` leaves the reference alone, `Some(None)` clears it.
    pub container_id: Option<Option<String>>,
    pub initialized_with_template: Option<bool>,
}

impl StatusUpdate {
    pub fn new(status: ProjectStatus) -> Self {
        Self {
            status,
            container_id: None,
            initialized_with_template: None,
        }
    }

    /// Sets the container reference, keeping only its stable prefix.
    #[must_use]
    pub fn with_container(mut self, container_id: &str) -> Self {
        self.container_id = Some(Some(short_container_id(container_id).to_string()));
        self
    }

    #[must_use]
    pub fn clear_container(mut self) -> Self {
        self.container_id = Some(None);
        self
    }

    #[must_use]
    pub fn initialized(mut self, initialized: bool) -> Self {
        self.initialized_with_template = Some(initialized);
        self
    }
}

/// Project metadata persistence.
#[async_trait]
pub(crate) trait ProjectRecordStore: Send + Sync {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>, PlaygroundError>;

    async fn update_status(&self, project_id: &str, update: StatusUpdate) -> Result<(), PlaygroundError>;

    /// Deletes the record owned by `user_id`. Deleting a missing record is
    /// not an error.
    async fn delete_project(&self, project_id: &str, user_id: &str) -> Result<(), PlaygroundError>;

    async fn get_language_template(&self, template_id: &str) -> Result<Option<LanguageTemplate>, PlaygroundError>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A stopped, never-initialized project.
    pub(crate) fn project(project_id: &str, user_id: &str, template_id: &str) -> Project {
        let now = Utc::now();
        Project {
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            name: format!("{project_id} playground"),
            description: None,
            template_id: template_id.to_string(),
            status: ProjectStatus::Stopped,
            container_id: None,
            last_active_at: None,
            initialized_with_template: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn template(id: &str, image: &str, files: Option<&str>) -> LanguageTemplate {
        LanguageTemplate {
            id: id.to_string(),
            name: id.to_string(),
            docker_image: image.to_string(),
            default_files_path: files.map(str::to_string),
            description: None,
        }
    }

    #[test]
    fn test_template_image_is_trimmed() {
        assert_eq!(template("t", "  node:20 ", None).image(), Some("node:20"));
        assert_eq!(template("t", "   ", None).image(), None);
    }

    #[test]
    fn test_template_default_files() {
        assert_eq!(
            template("t", "img", Some("templates/node")).default_files(),
            Some("templates/node")
        );
        assert_eq!(template("t", "img", Some("")).default_files(), None);
        assert_eq!(template("t", "img", None).default_files(), None);
    }

    #[test]
    fn test_apply_sets_container_prefix_and_activity() {
        let mut p = project("p1", "u1", "node");
        let now = Utc::now();
        p.apply(
            &StatusUpdate::new(ProjectStatus::Running)
                .with_container("0123456789abcdef0123")
                .initialized(true),
            now,
        );

        assert_eq!(p.status, ProjectStatus::Running);
        assert_eq!(p.container_id.as_deref(), Some("0123456789abc"));
        assert!(p.initialized_with_template);
        assert_eq!(p.last_active_at, Some(now));
    }

    #[test]
    fn test_apply_stopped_clears_container_without_touching_activity() {
        let mut p = project("p1", "u1", "node");
        p.container_id = Some("abc".to_string());
        p.apply(
            &StatusUpdate::new(ProjectStatus::Stopped).clear_container(),
            Utc::now(),
        );
        assert_eq!(p.container_id, None);
        assert_eq!(p.last_active_at, None);
    }

    #[test]
    fn test_apply_leaves_container_when_unspecified() {
        let mut p = project("p1", "u1", "node");
        p.container_id = Some("abc".to_string());
        p.apply(&StatusUpdate::new(ProjectStatus::Saving), Utc::now());
        assert_eq!(p.container_id.as_deref(), Some("abc"));
    }
}
