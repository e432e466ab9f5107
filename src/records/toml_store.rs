use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::{LanguageTemplate, Project, ProjectRecordStore, StatusUpdate};
use crate::error::PlaygroundError;

/// On-disk layout of the records file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RecordFile {
    #[serde(default)]
    pub templates: Vec<LanguageTemplate>,
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl RecordFile {
    /// Load records from file, empty if the file does not exist
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let exists = fs::try_exists(path)
            .await
            .with_context(|| format!("Failed to access records file: {}", path.display()))?;
        if !exists {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read records file: {}", path.display()))?;

        let records: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse records file: {}", path.display()))?;

        Ok(records)
    }

    /// Save records, replacing the file atomically
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize records")?;

        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write records file: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace records file: {}", path.display()))?;

        Ok(())
    }
}

/// Record store persisted to a single TOML file.
///
/// Every operation reads the file, so edits made by hand between calls are
/// picked up. Writes are serialized through one async mutex.
#[derive(Debug)]
pub(crate) struct TomlRecordStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TomlRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<RecordFile, PlaygroundError> {
        RecordFile::load(&self.path)
            .await
            .map_err(|e| PlaygroundError::records(format!("{e:#}")))
    }

    async fn save(&self, records: &RecordFile) -> Result<(), PlaygroundError> {
        records
            .save(&self.path)
            .await
            .map_err(|e| PlaygroundError::records(format!("{e:#}")))
    }
}

#[async_trait]
impl ProjectRecordStore for TomlRecordStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>, PlaygroundError> {
        let records = self.load().await?;
        Ok(records
            .projects
            .into_iter()
            .find(|p| p.project_id == project_id))
    }

    async fn update_status(&self, project_id: &str, update: StatusUpdate) -> Result<(), PlaygroundError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        let project = records
            .projects
            .iter_mut()
            .find(|p| p.project_id == project_id)
            .ok_or_else(|| PlaygroundError::not_found("Project", project_id))?;
        project.apply(&update, Utc::now());
        debug!(project_id, status = %update.status, "Updated project status");
        self.save(&records).await
    }

    async fn delete_project(&self, project_id: &str, user_id: &str) -> Result<(), PlaygroundError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        let before = records.projects.len();
        records
            .projects
            .retain(|p| !(p.project_id == project_id && p.user_id == user_id));
        if records.projects.len() == before {
            debug!(project_id, "No project record to delete");
            return Ok(());
        }
        self.save(&records).await
    }

    async fn get_language_template(&self, template_id: &str) -> Result<Option<LanguageTemplate>, PlaygroundError> {
        let records = self.load().await?;
        Ok(records.templates.into_iter().find(|t| t.id == template_id))
    }
}
