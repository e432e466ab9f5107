//! Durable object storage.
//!
//! The orchestrator only needs a hierarchical blob namespace: list the
//! direct children of a prefix, move bytes in and out, delete and copy.
//! Paths are `/`-separated and relative to the bucket root.

mod fs;
#[cfg(test)]
pub(crate) mod memory;

pub(crate) use fs::FsObjectStore;

use async_trait::async_trait;
use bytes::Bytes;

/// A direct child returned by [`ObjectStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StorageEntry {
    pub name: String,
    pub is_file: bool,
}

impl StorageEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_file: true,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_file: false,
        }
    }
}

/// Options for [`ObjectStore::upload`].
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UploadOptions {
    /// Replace an existing object instead of failing.
    pub overwrite: bool,
}

/// Errors reported by an object store.
#[derive(Debug, thiserror::Error)]
pub(crate) enum StorageError {
    #[error("Object not found: {path}")]
    NotFound { path: String },

    #[error("Object already exists: {path}")]
    AlreadyExists { path: String },

    #[error("Invalid storage path: {path}")]
    InvalidPath { path: String },

    #[error("Storage {operation} failed for {path}: {message}")]
    Backend {
        operation: &'static str,
        path: String,
        message: String,
    },
}

impl StorageError {
    pub fn backend(operation: &'static str, path: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            operation,
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Hierarchical blob storage holding every project's durable files.
#[async_trait]
pub(crate) trait ObjectStore: Send + Sync {
    /// Direct children of `prefix`. A missing prefix lists as empty.
    async fn list(&self, prefix: &str) -> Result<Vec<StorageEntry>, StorageError>;

    async fn download(&self, path: &str) -> Result<Bytes, StorageError>;

    async fn upload(&self, path: &str, data: Bytes, options: UploadOptions) -> Result<(), StorageError>;

    /// Deletes objects; paths that do not exist are ignored.
    async fn remove(&self, paths: &[String]) -> Result<(), StorageError>;

    /// Server-side copy of one object.
    async fn copy(&self, source: &str, destination: &str) -> Result<(), StorageError>;
}

/// Joins and normalizes storage path segments.
///
/// Empty parts and `.` are dropped, `..` pops the previous segment and
/// leading/trailing slashes are trimmed, so the same location always
/// produces the same string.
pub(crate) fn join_storage_path(parts: &[&str]) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for part in parts {
        for segment in part.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s => segments.push(s),
            }
        }
    }
    segments.join("/")
}

/// Durable prefix holding one project's files: `<user>/<project>`.
///
/// Both ids must be single plain segments. Anything that would normalize
/// away (empty, `.`, `..`) or reach into another prefix is rejected, so the
/// result never names the bucket root or another user's files.
pub(crate) fn project_prefix(user_id: &str, project_id: &str) -> Result<String, StorageError> {
    for id in [user_id, project_id] {
        if !is_plain_segment(id) {
            return Err(StorageError::InvalidPath { path: id.to_string() });
        }
    }
    Ok(format!("{user_id}/{project_id}"))
}

fn is_plain_segment(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\'])
}
