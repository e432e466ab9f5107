//! File synchronization between durable storage and host directories.
//!
//! Durable storage is authoritative. A project's host directory is a cache
//! rebuilt from storage on open and flushed back on close. Each operation
//! declares a [`FailurePolicy`] that decides what a single failed file does
//! to the whole batch.

use bytes::Bytes;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::error::PlaygroundError;
use crate::storage::{join_storage_path, project_prefix, ObjectStore, StorageError, UploadOptions};

/// Objects deleted per `remove` call when purging a project.
const REMOVE_BATCH_SIZE: usize = 100;

/// What a per-file failure does to a bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailurePolicy {
    /// Log the failure, skip the file, keep going.
    PartialFailureTolerant,
    /// Abort on the first failure.
    AllOrNothing,
}

impl FailurePolicy {
    /// Applies the policy to one failed item.
    fn absorb(
        self,
        operation: &'static str,
        path: &str,
        err: PlaygroundError,
        report: &mut SyncReport,
    ) -> Result<(), PlaygroundError> {
        match self {
            Self::PartialFailureTolerant => {
                warn!(operation, path, "Skipping after error: {}", err);
                report.failed.push(path.to_string());
                Ok(())
            }
            Self::AllOrNothing => {
                error!(operation, path, "Aborting after error: {}", err);
                Err(err)
            }
        }
    }
}

/// Outcome of a bulk sync operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SyncReport {
    /// Paths handled successfully.
    pub transferred: Vec<String>,
    /// Paths skipped under `PartialFailureTolerant`.
    pub failed: Vec<String>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Host directories for projects, one per project id under a root.
#[derive(Debug, Clone)]
pub(crate) struct HostPaths {
    root: PathBuf,
}

impl HostPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory bound into a project's container.
    pub fn project_dir(&self, project_id: &str) -> Result<PathBuf, PlaygroundError> {
        if project_id.is_empty() {
            return Err(path_escape(project_id));
        }
        resolve_within(&self.root, project_id)
    }
}

fn path_escape(relative: &str) -> PlaygroundError {
    PlaygroundError::io(
        relative,
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path escapes its project directory",
        ),
    )
}

/// Joins `relative` onto `base`, refusing anything that would leave `base`.
pub(crate) fn resolve_within(base: &Path, relative: &str) -> Result<PathBuf, PlaygroundError> {
    let mut resolved = base.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(path_escape(relative));
            }
        }
    }
    Ok(resolved)
}

/// Moves project files between durable storage and host directories.
pub(crate) struct FileSyncEngine {
    store: Arc<dyn ObjectStore>,
    hosts: HostPaths,
}

impl FileSyncEngine {
    pub const DOWNLOAD_POLICY: FailurePolicy = FailurePolicy::PartialFailureTolerant;
    pub const UPLOAD_POLICY: FailurePolicy = FailurePolicy::AllOrNothing;
    pub const COPY_POLICY: FailurePolicy = FailurePolicy::PartialFailureTolerant;

    pub fn new(store: Arc<dyn ObjectStore>, hosts: HostPaths) -> Self {
        Self { store, hosts }
    }

    pub fn hosts(&self) -> &HostPaths {
        &self.hosts
    }

    /// Every file path under `prefix`.
    ///
    /// Each prefix is listed at most once per call. A listing that leads
    /// back to an already visited prefix is skipped, so cyclic or
    /// self-referential namespaces terminate with the files found so far.
    pub async fn list_recursive(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut files = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = vec![join_storage_path(&[prefix])];

        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                warn!(prefix = %current, "Storage prefix already visited, skipping cycle");
                continue;
            }
            for entry in self.store.list(&current).await? {
                let path = join_storage_path(&[&current, &entry.name]);
                if entry.is_file {
                    files.push(path);
                } else {
                    pending.push(path);
                }
            }
        }

        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Creates the project's host directory (and the root) if missing.
    pub async fn ensure_host_dir(&self, project_id: &str) -> Result<PathBuf, PlaygroundError> {
        let dir = self.hosts.project_dir(project_id)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| PlaygroundError::io(&dir, e))?;
        Ok(dir)
    }

    /// Deletes the project's host directory if it exists.
    pub async fn remove_host_dir(&self, project_id: &str) -> Result<bool, PlaygroundError> {
        let dir = self.hosts.project_dir(project_id)?;
        if !fs::try_exists(&dir)
            .await
            .map_err(|e| PlaygroundError::io(&dir, e))?
        {
            return Ok(false);
        }
        info!(path = %dir.display(), "Cleaning up host directory");
        fs::remove_dir_all(&dir)
            .await
            .map_err(|e| PlaygroundError::io(&dir, e))?;
        Ok(true)
    }

    /// Replaces the host directory's contents with the project's durable files.
    ///
    /// The directory itself is kept (a running container may have it bind
    /// mounted); only its entries are removed before downloading.
    pub async fn download(&self, user_id: &str, project_id: &str) -> Result<SyncReport, PlaygroundError> {
        let dir = self.ensure_host_dir(project_id).await?;
        let prefix = project_prefix(user_id, project_id)?;
        info!(project_id, path = %dir.display(), "Downloading project files");
        empty_dir(&dir).await?;

        let mut report = SyncReport::default();
        let files = self.list_recursive(&prefix).await?;
        if files.is_empty() {
            info!(project_id, "No files found in storage");
            return Ok(report);
        }

        for path in files {
            match self.download_one(&dir, &prefix, &path).await {
                Ok(()) => {
                    debug!(path, "Downloaded");
                    report.transferred.push(path);
                }
                Err(e) => Self::DOWNLOAD_POLICY.absorb("download", &path, e, &mut report)?,
            }
        }

        info!(
            project_id,
            files = report.transferred.len(),
            failed = report.failed.len(),
            "Download finished"
        );
        Ok(report)
    }

    async fn download_one(&self, dir: &Path, prefix: &str, path: &str) -> Result<(), PlaygroundError> {
        let relative = strip_storage_prefix(prefix, path).ok_or_else(|| path_escape(path))?;
        let dest = resolve_within(dir, relative)?;
        let data = self.store.download(path).await?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PlaygroundError::io(parent, e))?;
        }
        fs::write(&dest, &data)
            .await
            .map_err(|e| PlaygroundError::io(&dest, e))
    }

    /// Flushes the host directory to durable storage.
    ///
    /// Existing objects under the project prefix are deleted first, then
    /// every regular file is uploaded at its mirrored path. Any failure
    /// aborts: this is the last copy of the user's work before teardown.
    pub async fn upload(&self, user_id: &str, project_id: &str) -> Result<SyncReport, PlaygroundError> {
        let dir = self.hosts.project_dir(project_id)?;
        let mut report = SyncReport::default();
        if !fs::try_exists(&dir)
            .await
            .map_err(|e| PlaygroundError::io(&dir, e))?
        {
            warn!(project_id, path = %dir.display(), "Host path does not exist, skipping upload");
            return Ok(report);
        }

        let prefix = project_prefix(user_id, project_id)?;
        info!(project_id, path = %dir.display(), "Uploading project files");

        let existing = self.list_recursive(&prefix).await?;
        if !existing.is_empty() {
            info!(project_id, count = existing.len(), "Deleting existing files from storage");
            if let Err(e) = self.store.remove(&existing).await {
                Self::UPLOAD_POLICY.absorb("upload", &prefix, e.into(), &mut report)?;
            }
        }

        let files = collect_host_files(&dir).await?;
        if files.is_empty() {
            info!(project_id, "No files to upload");
            return Ok(report);
        }

        for (full_path, relative) in files {
            let target = join_storage_path(&[&prefix, &relative]);
            match self.upload_one(&full_path, &target).await {
                Ok(()) => {
                    debug!(path = %target, "Uploaded");
                    report.transferred.push(target);
                }
                Err(e) => Self::UPLOAD_POLICY.absorb("upload", &target, e, &mut report)?,
            }
        }

        info!(project_id, files = report.transferred.len(), "Upload finished");
        Ok(report)
    }

    async fn upload_one(&self, full_path: &Path, target: &str) -> Result<(), PlaygroundError> {
        let data = fs::read(full_path)
            .await
            .map_err(|e| PlaygroundError::io(full_path, e))?;
        self.store
            .upload(target, Bytes::from(data), UploadOptions { overwrite: true })
            .await?;
        Ok(())
    }

    /// Server-side copy of every file under `source` to `destination`.
    pub async fn copy_template(&self, source: &str, destination: &str) -> Result<SyncReport, PlaygroundError> {
        let mut report = SyncReport::default();
        let source = join_storage_path(&[source]);
        let files = self.list_recursive(&source).await?;
        if files.is_empty() {
            warn!(source = %source, "Template folder is empty, nothing to copy");
            return Ok(report);
        }

        info!(source = %source, destination, count = files.len(), "Copying template files");
        for path in files {
            let Some(relative) = strip_storage_prefix(&source, &path) else {
                Self::COPY_POLICY.absorb("copy", &path, path_escape(&path), &mut report)?;
                continue;
            };
            let target = join_storage_path(&[destination, relative]);
            match self.store.copy(&path, &target).await {
                Ok(()) => report.transferred.push(target),
                Err(e) => Self::COPY_POLICY.absorb("copy", &path, e.into(), &mut report)?,
            }
        }
        Ok(report)
    }

    /// Deletes every durable object of a project, in batches.
    pub async fn purge(&self, user_id: &str, project_id: &str) -> Result<SyncReport, PlaygroundError> {
        let prefix = project_prefix(user_id, project_id)?;
        let mut report = SyncReport::default();
        let files = self.list_recursive(&prefix).await?;
        if files.is_empty() {
            info!(project_id, prefix = %prefix, "No files found in storage");
            return Ok(report);
        }

        for batch in files.chunks(REMOVE_BATCH_SIZE) {
            match self.store.remove(batch).await {
                Ok(()) => report.transferred.extend_from_slice(batch),
                Err(e) => {
                    warn!(project_id, count = batch.len(), "Failed to delete batch: {}", e);
                    report.failed.extend_from_slice(batch);
                }
            }
        }

        info!(
            project_id,
            deleted = report.transferred.len(),
            failed = report.failed.len(),
            "Purged project files from storage"
        );
        Ok(report)
    }
}

/// Path of `path` relative to `prefix`, if it lies strictly below it.
fn strip_storage_prefix<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    if prefix.is_empty() {
        return (!path.is_empty()).then_some(path);
    }
    path.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
}

/// Removes every entry of `dir`, keeping `dir` itself.
async fn empty_dir(dir: &Path) -> Result<(), PlaygroundError> {
    let mut reader = fs::read_dir(dir)
        .await
        .map_err(|e| PlaygroundError::io(dir, e))?;
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| PlaygroundError::io(dir, e))?
    {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| PlaygroundError::io(&path, e))?;
        let removed = if file_type.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        removed.map_err(|e| PlaygroundError::io(&path, e))?;
    }
    Ok(())
}

/// Regular files under `root` with their `/`-separated relative paths.
/// Symlinks are skipped.
async fn collect_host_files(root: &Path) -> Result<Vec<(PathBuf, String)>, PlaygroundError> {
    let mut files = Vec::new();
    let mut pending = vec![(root.to_path_buf(), String::new())];

    while let Some((dir, relative)) = pending.pop() {
        let mut reader = fs::read_dir(&dir)
            .await
            .map_err(|e| PlaygroundError::io(&dir, e))?;
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| PlaygroundError::io(&dir, e))?
        {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let item_relative = join_storage_path(&[&relative, &name]);
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| PlaygroundError::io(&path, e))?;
            if file_type.is_file() {
                files.push((path, item_relative));
            } else if file_type.is_dir() {
                pending.push((path, item_relative));
            } else {
                debug!(path = %path.display(), "Skipping non-regular file");
            }
        }
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}
