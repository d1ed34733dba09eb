//! The annotation-metadata substrate (§4.1): two conformant backends behind
//! one small enum, rather than an abstract-base-class hierarchy — dispatch
//! is by field, matching the "flatten to tagged variant" guidance for this
//! subsystem.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::store::ObjectStore;

/// Filesystem-backed annotation storage: one flat directory, one file per
/// `(backup_id, key)` pair, with lazy migration from a legacy per-backup
/// `annotations/` subdirectory.
pub struct FilesystemAnnotationStore {
    path: PathBuf,
    /// Pre-3.13.3-style layout: `{legacy_path}/{id}/annotations/{key}`.
    legacy_path: Option<PathBuf>,
}

impl FilesystemAnnotationStore {
    pub fn new(path: impl Into<PathBuf>, legacy_path: Option<PathBuf>) -> Self {
        Self {
            path: path.into(),
            legacy_path,
        }
    }

    fn annotation_path(&self, backup_id: &str, key: &str) -> PathBuf {
        self.path.join(format!("{backup_id}-{key}"))
    }

    fn legacy_annotation_path(&self, backup_id: &str, key: &str) -> Option<PathBuf> {
        self.legacy_path
            .as_ref()
            .map(|p| p.join(backup_id).join("annotations").join(key))
    }

    /// If a legacy annotation exists, atomically moves it to the new path.
    /// If both exist, the legacy one wins (the new path is replaced) — this
    /// is the collision policy the source's rename left undocumented.
    fn relocate_legacy(&self, backup_id: &str, key: &str) -> Result<()> {
        let Some(legacy) = self.legacy_annotation_path(backup_id, key) else {
            return Ok(());
        };
        if !legacy.exists() {
            return Ok(());
        }
        let new_path = self.annotation_path(backup_id, key);
        std::fs::rename(&legacy, &new_path)?;
        self.prune_legacy_dir(backup_id);
        Ok(())
    }

    /// Best-effort removal of an emptied legacy annotations directory.
    fn prune_legacy_dir(&self, backup_id: &str) {
        if let Some(legacy_root) = &self.legacy_path {
            let dir = legacy_root.join(backup_id).join("annotations");
            match std::fs::remove_dir(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) if is_not_empty(&e) => {}
                Err(e) => {
                    tracing::warn!(error = %e, dir = %dir.display(), "failed to prune legacy annotation directory");
                }
            }
        }
    }

    pub fn put(&self, backup_id: &str, key: &str, value: &str) -> Result<()> {
        if let Some(parent) = self.annotation_path(backup_id, key).parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(self.annotation_path(backup_id, key), value)?;
        Ok(())
    }

    pub fn get(&self, backup_id: &str, key: &str) -> Result<Option<String>> {
        self.relocate_legacy(backup_id, key)?;
        match std::fs::read_to_string(self.annotation_path(backup_id, key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete(&self, backup_id: &str, key: &str) -> Result<()> {
        self.relocate_legacy(backup_id, key)?;
        match std::fs::remove_file(self.annotation_path(backup_id, key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_not_empty(e: &std::io::Error) -> bool {
    // ErrorKind::DirectoryNotEmpty is unstable to match directly on some
    // toolchains; fall back to the raw OS error code (ENOTEMPTY = 39).
    e.raw_os_error() == Some(39)
}

/// Cloud-backed annotation storage: `{prefix}/{server}/base/{id}/annotations/{key}`,
/// with an optional presence cache built once by listing the whole `base/`
/// tree, so that `get` on a sparse annotation avoids a remote round trip.
pub struct CloudAnnotationStore<O: ObjectStore> {
    store: Arc<O>,
    server_name: String,
    cache: Mutex<Option<HashSet<(String, String)>>>,
}

impl<O: ObjectStore> CloudAnnotationStore<O> {
    pub fn new(store: Arc<O>, server_name: impl Into<String>) -> Self {
        Self {
            store,
            server_name: server_name.into(),
            cache: Mutex::new(None),
        }
    }

    fn base_prefix(&self) -> String {
        format!("{}/base/", self.server_name)
    }

    fn annotation_key(&self, backup_id: &str, key: &str) -> String {
        format!("{}/base/{backup_id}/annotations/{key}", self.server_name)
    }

    async fn populate_cache(&self) -> Result<()> {
        let keys = self.store.list_prefix(&self.base_prefix(), None).await?;
        let mut cache = HashSet::new();
        for object_key in keys {
            let parts: Vec<&str> = object_key.split('/').collect();
            if parts.len() > 3 && parts[parts.len() - 2] == "annotations" {
                let backup_id = parts[parts.len() - 3].to_string();
                let annotation_key = parts[parts.len() - 1].to_string();
                cache.insert((backup_id, annotation_key));
            }
        }
        *self.cache.lock().unwrap() = Some(cache);
        Ok(())
    }

    pub async fn put(&self, backup_id: &str, key: &str, value: &str) -> Result<()> {
        self.store
            .put(&self.annotation_key(backup_id, key), value.as_bytes())
            .await?;
        if let Some(cache) = self.cache.lock().unwrap().as_mut() {
            cache.insert((backup_id.to_string(), key.to_string()));
        }
        Ok(())
    }

    pub async fn get(&self, backup_id: &str, key: &str, use_cache: bool) -> Result<Option<String>> {
        if use_cache {
            if self.cache.lock().unwrap().is_none() {
                self.populate_cache().await?;
            }
            let present = self
                .cache
                .lock()
                .unwrap()
                .as_ref()
                .map(|c| c.contains(&(backup_id.to_string(), key.to_string())))
                .unwrap_or(true);
            if !present {
                return Ok(None);
            }
        }
        match self.store.get(&self.annotation_key(backup_id, key)).await? {
            Some(bytes) => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| Error::Other(format!("invalid utf-8 annotation: {e}")))?;
                let first_line = text.lines().next().unwrap_or("").to_string();
                Ok(Some(first_line))
            }
            None => Ok(None),
        }
    }

    pub async fn delete(&self, backup_id: &str, key: &str) -> Result<()> {
        self.store
            .delete_objects(&[self.annotation_key(backup_id, key)])
            .await?;
        if let Some(cache) = self.cache.lock().unwrap().as_mut() {
            cache.remove(&(backup_id.to_string(), key.to_string()));
        }
        Ok(())
    }
}

/// Either backend, selected by a tagged constructor rather than an
/// inheritance hierarchy (§9 Design Notes).
pub enum AnnotationStore<O: ObjectStore> {
    Filesystem(FilesystemAnnotationStore),
    Cloud(CloudAnnotationStore<O>),
}

impl<O: ObjectStore> AnnotationStore<O> {
    pub fn for_filesystem(path: impl Into<PathBuf>, legacy_path: Option<&Path>) -> Self {
        AnnotationStore::Filesystem(FilesystemAnnotationStore::new(
            path,
            legacy_path.map(Path::to_path_buf),
        ))
    }

    pub fn for_object_store(store: Arc<O>, server_name: impl Into<String>) -> Self {
        AnnotationStore::Cloud(CloudAnnotationStore::new(store, server_name))
    }

    pub async fn put(&self, backup_id: &str, key: &str, value: &str) -> Result<()> {
        match self {
            AnnotationStore::Filesystem(fs) => fs.put(backup_id, key, value),
            AnnotationStore::Cloud(cloud) => cloud.put(backup_id, key, value).await,
        }
    }

    pub async fn get(&self, backup_id: &str, key: &str, use_cache: bool) -> Result<Option<String>> {
        match self {
            AnnotationStore::Filesystem(fs) => fs.get(backup_id, key),
            AnnotationStore::Cloud(cloud) => cloud.get(backup_id, key, use_cache).await,
        }
    }

    pub async fn delete(&self, backup_id: &str, key: &str) -> Result<()> {
        match self {
            AnnotationStore::Filesystem(fs) => fs.delete(backup_id, key),
            AnnotationStore::Cloud(cloud) => cloud.delete(backup_id, key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn filesystem_put_get_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemAnnotationStore::new(dir.path(), None);
        store.put("20210722T090807", "keep", "full").unwrap();
        assert_eq!(
            store.get("20210722T090807", "keep").unwrap(),
            Some("full".to_string())
        );
        store.delete("20210722T090807", "keep").unwrap();
        assert_eq!(store.get("20210722T090807", "keep").unwrap(), None);
    }

    #[test]
    fn filesystem_get_absent_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemAnnotationStore::new(dir.path(), None);
        assert_eq!(store.get("missing", "keep").unwrap(), None);
    }

    #[test]
    fn filesystem_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemAnnotationStore::new(dir.path(), None);
        store.delete("missing", "keep").unwrap();
        store.delete("missing", "keep").unwrap();
    }

    #[test]
    fn filesystem_migrates_legacy_annotation_on_read() {
        let new_dir = tempfile::tempdir().unwrap();
        let legacy_dir = tempfile::tempdir().unwrap();
        let legacy_annotation_dir = legacy_dir.path().join("20210722T090807").join("annotations");
        std::fs::create_dir_all(&legacy_annotation_dir).unwrap();
        std::fs::write(legacy_annotation_dir.join("keep"), "standalone").unwrap();

        let store =
            FilesystemAnnotationStore::new(new_dir.path(), Some(legacy_dir.path().to_path_buf()));
        assert_eq!(
            store.get("20210722T090807", "keep").unwrap(),
            Some("standalone".to_string())
        );
        // Legacy file should have been relocated.
        assert!(!legacy_annotation_dir.join("keep").exists());
        assert!(new_dir.path().join("20210722T090807-keep").exists());
    }

    #[test]
    fn filesystem_legacy_wins_on_collision() {
        let new_dir = tempfile::tempdir().unwrap();
        let legacy_dir = tempfile::tempdir().unwrap();
        std::fs::write(new_dir.path().join("B1-keep"), "full").unwrap();
        let legacy_annotation_dir = legacy_dir.path().join("B1").join("annotations");
        std::fs::create_dir_all(&legacy_annotation_dir).unwrap();
        std::fs::write(legacy_annotation_dir.join("keep"), "standalone").unwrap();

        let store =
            FilesystemAnnotationStore::new(new_dir.path(), Some(legacy_dir.path().to_path_buf()));
        assert_eq!(
            store.get("B1", "keep").unwrap(),
            Some("standalone".to_string())
        );
    }

    #[tokio::test]
    async fn cloud_put_get_delete_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let annotations = CloudAnnotationStore::new(store, "pg1");
        annotations.put("B1", "keep", "full").await.unwrap();
        assert_eq!(
            annotations.get("B1", "keep", true).await.unwrap(),
            Some("full".to_string())
        );
        annotations.delete("B1", "keep").await.unwrap();
        assert_eq!(annotations.get("B1", "keep", true).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cloud_cache_avoids_remote_fetch_for_absent_keys() {
        let backing = Arc::new(MemoryStore::new());
        backing.seed("pg1/base/B1/annotations/keep", b"full".to_vec());
        let annotations = CloudAnnotationStore::new(backing, "pg1");
        // Cache is populated lazily on first use.
        assert_eq!(
            annotations.get("B1", "keep", true).await.unwrap(),
            Some("full".to_string())
        );
        assert_eq!(annotations.get("B2", "keep", true).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cloud_use_cache_false_bypasses_cache() {
        let backing = Arc::new(MemoryStore::new());
        backing.seed("pg1/base/B1/annotations/keep", b"standalone".to_vec());
        let annotations = CloudAnnotationStore::new(backing, "pg1");
        assert_eq!(
            annotations.get("B1", "keep", false).await.unwrap(),
            Some("standalone".to_string())
        );
    }
}
