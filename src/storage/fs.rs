use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use super::{join_storage_path, ObjectStore, StorageEntry, StorageError, UploadOptions};

/// Object store rooted at a local directory.
///
/// Objects are regular files; "directories" are implied by path segments
/// and pruned once they become empty. Symlinks are never followed.
#[derive(Debug, Clone)]
pub(crate) struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let normalized = join_storage_path(&[path]);
        if normalized.is_empty() && !path.trim_matches('/').is_empty() {
            return Err(StorageError::InvalidPath {
                path: path.to_string(),
            });
        }
        if path.split('/').any(|s| s == "..") {
            return Err(StorageError::InvalidPath {
                path: path.to_string(),
            });
        }
        Ok(self.root.join(normalized))
    }

    fn resolve_object(&self, path: &str) -> Result<PathBuf, StorageError> {
        let resolved = self.resolve(path)?;
        if resolved == self.root {
            return Err(StorageError::InvalidPath {
                path: path.to_string(),
            });
        }
        Ok(resolved)
    }

    /// Removes empty directories between `start` and the store root.
    async fn prune_empty_dirs(&self, start: Option<&Path>) {
        let mut current = start.map(Path::to_path_buf);
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(&dir).await.is_err() {
                break;
            }
            current = dir.parent().map(Path::to_path_buf);
        }
    }
}

fn map_io(operation: &'static str, path: &str, err: std::io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound {
            path: path.to_string(),
        }
    } else {
        StorageError::backend(operation, path, err)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<StorageEntry>, StorageError> {
        let dir = self.resolve(prefix)?;
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::backend("list", prefix, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| StorageError::backend("list", prefix, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StorageError::backend("list", prefix, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if file_type.is_file() {
                entries.push(StorageEntry::file(name));
            } else if file_type.is_dir() {
                entries.push(StorageEntry::dir(name));
            } else {
                debug!(prefix, name, "Skipping non-regular storage entry");
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn download(&self, path: &str) -> Result<Bytes, StorageError> {
        let file = self.resolve_object(path)?;
        let data = fs::read(&file).await.map_err(|e| map_io("download", path, e))?;
        Ok(Bytes::from(data))
    }

    async fn upload(&self, path: &str, data: Bytes, options: UploadOptions) -> Result<(), StorageError> {
        let file = self.resolve_object(path)?;
        if !options.overwrite && fs::try_exists(&file).await.unwrap_or(false) {
            return Err(StorageError::AlreadyExists {
                path: path.to_string(),
            });
        }
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::backend("upload", path, e))?;
        }
        fs::write(&file, &data)
            .await
            .map_err(|e| StorageError::backend("upload", path, e))
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StorageError> {
        for path in paths {
            let file = self.resolve_object(path)?;
            match fs::remove_file(&file).await {
                Ok(()) => self.prune_empty_dirs(file.parent()).await,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::backend("remove", path.as_str(), e)),
            }
        }
        Ok(())
    }

    async fn copy(&self, source: &str, destination: &str) -> Result<(), StorageError> {
        let from = self.resolve_object(source)?;
        let to = self.resolve_object(destination)?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::backend("copy", destination, e))?;
        }
        fs::copy(&from, &to)
            .await
            .map(|_| ())
            .map_err(|e| map_io("copy", source, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_upload_list_download() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store
            .upload("u1/p1/a.txt", Bytes::from("x"), UploadOptions::default())
            .await
            .unwrap();
        store
            .upload("u1/p1/sub/b.txt", Bytes::from("y"), UploadOptions::default())
            .await
            .unwrap();

        let entries = store.list("u1/p1").await.unwrap();
        assert_eq!(
            entries,
            vec![StorageEntry::file("a.txt"), StorageEntry::dir("sub")]
        );
        assert_eq!(store.download("u1/p1/sub/b.txt").await.unwrap(), "y");
    }

    #[tokio::test]
    async fn test_list_missing_prefix_is_empty() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.list("nobody/nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_without_overwrite_rejects_existing() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .upload("u1/a.txt", Bytes::from("1"), UploadOptions::default())
            .await
            .unwrap();

        let err = store
            .upload("u1/a.txt", Bytes::from("2"), UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));

        store
            .upload("u1/a.txt", Bytes::from("2"), UploadOptions { overwrite: true })
            .await
            .unwrap();
        assert_eq!(store.download("u1/a.txt").await.unwrap(), "2");
    }

    #[tokio::test]
    async fn test_remove_ignores_missing_and_prunes_dirs() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .upload("u1/p1/deep/c.txt", Bytes::from("z"), UploadOptions::default())
            .await
            .unwrap();

        store
            .remove(&["u1/p1/deep/c.txt".to_string(), "u1/p1/ghost.txt".to_string()])
            .await
            .unwrap();

        assert!(store.list("u1").await.unwrap().is_empty());
        assert!(dir.path().exists());
    }

    #[tokio::test]
    async fn test_copy_and_missing_source() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store
            .upload("templates/node/index.js", Bytes::from("hi"), UploadOptions::default())
            .await
            .unwrap();

        store
            .copy("templates/node/index.js", "u1/p1/index.js")
            .await
            .unwrap();
        assert_eq!(store.download("u1/p1/index.js").await.unwrap(), "hi");

        let err = store.copy("templates/node/nope.js", "u1/p1/nope.js").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_parent_segments() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().join("bucket"));
        let err = store.download("u1/../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath { .. }));
    }
}
