//! In-memory object store for testing.
//!
//! Supports injecting per-path failures and hand-written listings, which
//! is how tests build self-referential namespaces.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{join_storage_path, ObjectStore, StorageEntry, StorageError, UploadOptions};

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Bytes>,
    listings: HashMap<String, Vec<StorageEntry>>,
    failing_downloads: HashSet<String>,
    failing_uploads: HashSet<String>,
    failing_copies: HashSet<String>,
    fail_remove: bool,
    list_calls: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryObjectStore {
    inner: Mutex<Inner>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, data: &str) {
        self.lock()
            .objects
            .insert(join_storage_path(&[path]), Bytes::from(data.to_string()));
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.lock().objects.get(&join_storage_path(&[path])).cloned()
    }

    /// Every object path under `prefix`.
    pub fn paths_under(&self, prefix: &str) -> Vec<String> {
        let prefix = format!("{}/", join_storage_path(&[prefix]));
        self.lock()
            .objects
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Replaces the derived listing of `prefix` with a fixed one.
    pub fn set_listing(&self, prefix: &str, entries: Vec<StorageEntry>) {
        self.lock()
            .listings
            .insert(join_storage_path(&[prefix]), entries);
    }

    pub fn fail_download(&self, path: &str) {
        self.lock().failing_downloads.insert(path.to_string());
    }

    pub fn fail_upload(&self, path: &str) {
        self.lock().failing_uploads.insert(path.to_string());
    }

    pub fn fail_copy(&self, path: &str) {
        self.lock().failing_copies.insert(path.to_string());
    }

    pub fn fail_remove(&self) {
        self.lock().fail_remove = true;
    }

    /// Prefixes passed to `list`, in call order.
    pub fn list_calls(&self) -> Vec<String> {
        self.lock().list_calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<StorageEntry>, StorageError> {
        let prefix = join_storage_path(&[prefix]);
        let mut inner = self.lock();
        inner.list_calls.push(prefix.clone());
        if let Some(entries) = inner.listings.get(&prefix) {
            return Ok(entries.clone());
        }

        let lead = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };
        let mut files = BTreeSet::new();
        let mut dirs = BTreeSet::new();
        for key in inner.objects.keys() {
            let Some(rest) = key.strip_prefix(&lead) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => {
                    files.insert(rest.to_string());
                }
            }
        }
        Ok(files
            .into_iter()
            .map(StorageEntry::file)
            .chain(dirs.into_iter().map(StorageEntry::dir))
            .collect())
    }

    async fn download(&self, path: &str) -> Result<Bytes, StorageError> {
        let inner = self.lock();
        if inner.failing_downloads.contains(path) {
            return Err(StorageError::backend("download", path, "injected failure"));
        }
        inner
            .objects
            .get(&join_storage_path(&[path]))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                path: path.to_string(),
            })
    }

    async fn upload(&self, path: &str, data: Bytes, options: UploadOptions) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.failing_uploads.contains(path) {
            return Err(StorageError::backend("upload", path, "injected failure"));
        }
        let key = join_storage_path(&[path]);
        if !options.overwrite && inner.objects.contains_key(&key) {
            return Err(StorageError::AlreadyExists {
                path: path.to_string(),
            });
        }
        inner.objects.insert(key, data);
        Ok(())
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.fail_remove {
            return Err(StorageError::backend("remove", paths.join(","), "injected failure"));
        }
        for path in paths {
            inner.objects.remove(&join_storage_path(&[path]));
        }
        Ok(())
    }

    async fn copy(&self, source: &str, destination: &str) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.failing_copies.contains(source) {
            return Err(StorageError::backend("copy", source, "injected failure"));
        }
        let data = inner
            .objects
            .get(&join_storage_path(&[source]))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                path: source.to_string(),
            })?;
        inner.objects.insert(join_storage_path(&[destination]), data);
        Ok(())
    }
}
