//! The backup/WAL catalog: a cached view over an [`ObjectStore`], grounded
//! in `barman.cloud.CloudBackupCatalog` as used by `cloud_backup_delete.py`.
//! `Catalog<O>` is generic over the store rather than boxed as `dyn
//! ObjectStore`, matching this crate's has-a composition over dynamic
//! dispatch (§9 Design Notes).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backup::{BackupFile, BackupInfo, RESERVED_NAMES};
use crate::error::{Error, Result};
use crate::keep::KeepRegistry;
use crate::store::ObjectStore;
use crate::wal;

/// Root layout: `{prefix}/{server_name}/base/{id}/...` and
/// `{prefix}/{server_name}/wals/...`, mirroring the teacher's key scheme.
pub struct Catalog<O: ObjectStore> {
    store: Arc<O>,
    root: String,
    keep: KeepRegistry<O>,
    backups: Option<Vec<BackupInfo>>,
    unreadable_backups: Vec<String>,
    wal_paths: Option<BTreeMap<String, String>>,
}

fn base_prefix(root: &str) -> String {
    format!("{root}/base/")
}

fn wal_prefix(root: &str) -> String {
    format!("{root}/wals/")
}

impl<O: ObjectStore> Catalog<O> {
    pub fn new(store: Arc<O>, prefix: &str, server_name: &str) -> Self {
        let root = if prefix.is_empty() {
            server_name.to_string()
        } else {
            format!("{prefix}/{server_name}")
        };
        let keep = KeepRegistry::for_object_store(store.clone(), root.clone());
        Self {
            store,
            root,
            keep,
            backups: None,
            unreadable_backups: Vec::new(),
            wal_paths: None,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.root
    }

    pub fn unreadable_backups(&self) -> &[String] {
        &self.unreadable_backups
    }

    pub fn backup_info_key(&self, backup_id: &str) -> String {
        format!("{}{backup_id}/backup.info", base_prefix(&self.root))
    }

    pub fn backup_label_key(&self, backup_id: &str) -> String {
        format!("{}{backup_id}/backup_label", base_prefix(&self.root))
    }

    /// Direct access to the underlying store, for callers (the deletion
    /// executor) that need to issue deletes the catalog itself doesn't
    /// model as a cache-affecting operation.
    pub fn store(&self) -> &O {
        &self.store
    }

    /// One-level common-prefix listing of the `base/` tree, yielding one
    /// entry per backup-id directory. Falls back to a flat `list_prefix`
    /// enumeration with ids derived from the returned keys when the store
    /// can't offer common-prefix listing (`Error::NotSupported`), the same
    /// fallback shape `wal_cleanup` already uses for `list_wal_prefixes`.
    async fn list_backup_dirs(&self) -> Result<Vec<String>> {
        let prefix = base_prefix(&self.root);
        match self.store.list_common_prefixes(&prefix).await {
            Ok(dirs) => Ok(dirs),
            Err(Error::NotSupported(_)) => {
                tracing::debug!(
                    "common-prefix listing not supported, falling back to flat enumeration"
                );
                let keys = self.store.list_prefix(&prefix, None).await?;
                let mut ids: Vec<String> = keys
                    .iter()
                    .filter_map(|key| {
                        let rest = key.strip_prefix(&prefix)?;
                        let id = rest.split('/').next()?;
                        if id.is_empty() { None } else { Some(id.to_string()) }
                    })
                    .collect();
                ids.sort();
                ids.dedup();
                Ok(ids)
            }
            Err(e) => Err(e),
        }
    }

    /// Lists backups, populating the cache on first call. Backups whose
    /// `backup.info` fails to parse are recorded in `unreadable_backups`
    /// rather than aborting the whole listing — one corrupt entry must not
    /// make the rest of the catalog unreadable.
    pub async fn list_backups(&mut self) -> Result<&[BackupInfo]> {
        if self.backups.is_none() {
            let mut backups = Vec::new();
            self.unreadable_backups.clear();
            let dirs = self.list_backup_dirs().await?;
            for dir in dirs {
                let backup_id = dir
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                let key = self.backup_info_key(&backup_id);
                match self.store.get(&key).await {
                    Ok(Some(bytes)) => match serde_json::from_slice::<BackupInfo>(&bytes) {
                        Ok(info) => backups.push(info),
                        Err(_) => self.unreadable_backups.push(backup_id),
                    },
                    Ok(None) => self.unreadable_backups.push(backup_id),
                    Err(_) => self.unreadable_backups.push(backup_id),
                }
            }
            backups.sort_by(|a, b| a.id.cmp(&b.id));
            self.backups = Some(backups);
        }
        Ok(self.backups.as_deref().unwrap())
    }

    pub async fn get_backup_info(&mut self, backup_id: &str) -> Result<Option<BackupInfo>> {
        self.list_backups().await?;
        Ok(self
            .backups
            .as_ref()
            .unwrap()
            .iter()
            .find(|b| b.id == backup_id)
            .cloned())
    }

    /// The archive files belonging to `info`, sorted PGDATA-first by oid.
    /// With `allow_missing`, files whose primary path is absent are
    /// silently dropped rather than erroring.
    pub fn backup_files(&self, info: &BackupInfo, allow_missing: bool) -> Vec<String> {
        let mut files: Vec<&BackupFile> = info.files.iter().collect();
        files.sort_by_key(|f| f.sort_key());
        let mut paths = Vec::new();
        for file in files {
            match &file.primary_path {
                Some(path) => paths.push(path.clone()),
                None if allow_missing => {}
                None => {
                    tracing::warn!(backup_id = %info.id, "missing primary path for backup file");
                }
            }
            paths.extend(file.additional_paths.iter().cloned());
        }
        paths
    }

    /// Resolves a backup reference: a reserved token (`latest`, `last`,
    /// `oldest`, `first`, `last-failed`), a literal backup id, or a name.
    pub async fn parse_backup_id(&mut self, reference: &str) -> Result<String> {
        self.list_backups().await?;
        let backups = self.backups.as_ref().unwrap();
        if RESERVED_NAMES.contains(&reference) {
            let resolved = match reference {
                "latest" | "last" => backups.iter().max_by_key(|b| b.id.clone()),
                "oldest" | "first" => backups.iter().min_by_key(|b| b.id.clone()),
                "last-failed" => backups
                    .iter()
                    .filter(|b| b.status == crate::backup::BackupStatus::Failed)
                    .max_by_key(|b| b.id.clone()),
                _ => None,
            };
            return resolved
                .map(|b| b.id.clone())
                .ok_or_else(|| Error::BackupNotFound(reference.to_string()));
        }
        if let Some(found) = backups.iter().find(|b| b.id == reference) {
            return Ok(found.id.clone());
        }
        if let Some(found) = backups
            .iter()
            .find(|b| b.name.as_deref() == Some(reference))
        {
            return Ok(found.id.clone());
        }
        Err(Error::BackupNotFound(reference.to_string()))
    }

    pub fn remove_backup_from_cache(&mut self, backup_id: &str) {
        if let Some(backups) = self.backups.as_mut() {
            backups.retain(|b| b.id != backup_id);
        }
    }

    /// Lists every WAL archive entry's logical name to its full storage
    /// path, with compression suffixes stripped from the logical name.
    pub async fn list_wals(&mut self) -> Result<&BTreeMap<String, String>> {
        if self.wal_paths.is_none() {
            let keys = self.store.list_prefix(&wal_prefix(&self.root), None).await?;
            let mut map = BTreeMap::new();
            for key in keys {
                let file_name = key.rsplit('/').next().unwrap_or(&key);
                let logical = wal::strip_compression_suffix(file_name);
                map.insert(logical.to_string(), key);
            }
            self.wal_paths = Some(map);
        }
        Ok(self.wal_paths.as_ref().unwrap())
    }

    pub fn remove_wal_from_cache(&mut self, wal_name: &str) {
        if let Some(wals) = self.wal_paths.as_mut() {
            wals.remove(wal_name);
        }
    }

    /// One-level common-prefix enumeration under the WAL root (the
    /// hash-dir shortcut). Propagates `Error::NotSupported` so the caller
    /// can fall back to the individual-WAL pass, exactly as the source's
    /// `except NotImplementedError` does.
    pub async fn list_wal_prefixes(&self) -> Result<Vec<String>> {
        self.store.list_common_prefixes(&wal_prefix(&self.root)).await
    }

    pub async fn should_keep_backup(&self, backup_id: &str, use_cache: bool) -> Result<bool> {
        if use_cache {
            self.keep.is_pinned(backup_id).await
        } else {
            Ok(self
                .keep
                .target(backup_id)
                .await
                .map(|t| t.is_some())?)
        }
    }

    pub async fn keep_target(&self, backup_id: &str) -> Result<Option<String>> {
        self.keep.target(backup_id).await
    }

    pub async fn pin(&self, backup_id: &str, target: &str) -> Result<()> {
        self.keep.pin(backup_id, target).await
    }

    pub async fn unpin(&self, backup_id: &str) -> Result<()> {
        self.keep.unpin(backup_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupStatus, Mode};
    use crate::store::MemoryStore;

    /// Wraps a [`MemoryStore`] but deliberately doesn't override
    /// `list_common_prefixes`, so it inherits the trait's `NotSupported`
    /// default — used to exercise `list_backups`'s fallback path the way
    /// a real store without prefix-listing support would.
    struct FlatOnlyStore(MemoryStore);

    impl ObjectStore for FlatOnlyStore {
        async fn list_prefix(&self, path: &str, delimiter: Option<&str>) -> Result<Vec<String>> {
            self.0.list_prefix(path, delimiter).await
        }
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.0.get(key).await
        }
        async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
            self.0.put(key, data).await
        }
        async fn delete_objects(&self, keys: &[String]) -> Result<()> {
            self.0.delete_objects(keys).await
        }
        async fn bucket_exists(&self) -> Result<bool> {
            self.0.bucket_exists().await
        }
        async fn test_connectivity(&self) -> Result<bool> {
            self.0.test_connectivity().await
        }
    }

    fn info(id: &str, begin_wal: &str) -> BackupInfo {
        BackupInfo {
            id: id.to_string(),
            name: None,
            status: BackupStatus::Done,
            begin_wal: begin_wal.to_string(),
            end_wal: begin_wal.to_string(),
            mode: Mode::Concurrent,
            snapshots_info: None,
            files: vec![BackupFile {
                oid: None,
                primary_path: Some(format!("base/{id}/data.tar")),
                additional_paths: vec![],
            }],
            end_time: None,
        }
    }

    async fn seeded_catalog() -> (Arc<MemoryStore>, Catalog<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for id in ["20210101T000000", "20210201T000000", "20210301T000000"] {
            let backup = info(id, "000000010000000000000010");
            store.seed(
                format!("pfx/pg1/base/{id}/backup.info"),
                serde_json::to_vec(&backup).unwrap(),
            );
        }
        let catalog = Catalog::new(store.clone(), "pfx", "pg1");
        (store, catalog)
    }

    #[tokio::test]
    async fn list_backups_populates_cache_and_sorts_by_id() {
        let (_store, mut catalog) = seeded_catalog().await;
        let backups = catalog.list_backups().await.unwrap();
        let ids: Vec<&str> = backups.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["20210101T000000", "20210201T000000", "20210301T000000"]
        );
        assert!(catalog.unreadable_backups().is_empty());
    }

    #[tokio::test]
    async fn list_backups_falls_back_to_flat_enumeration_without_prefix_listing() {
        let inner = MemoryStore::new();
        for id in ["20210101T000000", "20210201T000000"] {
            let backup = info(id, "000000010000000000000010");
            inner.seed(
                format!("pfx/pg1/base/{id}/backup.info"),
                serde_json::to_vec(&backup).unwrap(),
            );
        }
        let store = Arc::new(FlatOnlyStore(inner));
        let mut catalog = Catalog::new(store, "pfx", "pg1");
        let backups = catalog.list_backups().await.unwrap();
        let ids: Vec<&str> = backups.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["20210101T000000", "20210201T000000"]);
        assert!(catalog.unreadable_backups().is_empty());
    }

    #[tokio::test]
    async fn unreadable_backup_info_is_recorded_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.seed("pfx/pg1/base/20210101T000000/backup.info", b"{not json".to_vec());
        let mut catalog = Catalog::new(store, "pfx", "pg1");
        let backups = catalog.list_backups().await.unwrap();
        assert!(backups.is_empty());
        assert_eq!(catalog.unreadable_backups(), &["20210101T000000".to_string()]);
    }

    #[tokio::test]
    async fn parse_backup_id_resolves_latest_and_oldest() {
        let (_store, mut catalog) = seeded_catalog().await;
        assert_eq!(
            catalog.parse_backup_id("latest").await.unwrap(),
            "20210301T000000"
        );
        assert_eq!(
            catalog.parse_backup_id("oldest").await.unwrap(),
            "20210101T000000"
        );
        assert_eq!(
            catalog.parse_backup_id("20210201T000000").await.unwrap(),
            "20210201T000000"
        );
    }

    #[tokio::test]
    async fn parse_backup_id_rejects_unknown_reference() {
        let (_store, mut catalog) = seeded_catalog().await;
        assert!(matches!(
            catalog.parse_backup_id("nope").await,
            Err(Error::BackupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn remove_backup_from_cache_drops_entry() {
        let (_store, mut catalog) = seeded_catalog().await;
        catalog.list_backups().await.unwrap();
        catalog.remove_backup_from_cache("20210201T000000");
        let ids: Vec<&str> = catalog
            .list_backups()
            .await
            .unwrap()
            .iter()
            .map(|b| b.id.as_str())
            .collect();
        assert_eq!(ids, vec!["20210101T000000", "20210301T000000"]);
    }

    #[tokio::test]
    async fn list_wals_strips_compression_suffix_and_evicts() {
        let store = Arc::new(MemoryStore::new());
        store.seed("pfx/pg1/wals/0000000100000000/000000010000000000000010.gz", b"x".to_vec());
        let mut catalog = Catalog::new(store, "pfx", "pg1");
        let wals = catalog.list_wals().await.unwrap();
        assert!(wals.contains_key("000000010000000000000010"));
        catalog.remove_wal_from_cache("000000010000000000000010");
        assert!(!catalog.list_wals().await.unwrap().contains_key("000000010000000000000010"));
    }

    #[tokio::test]
    async fn pin_and_should_keep_backup_roundtrip() {
        let (_store, catalog) = seeded_catalog().await;
        assert!(!catalog.should_keep_backup("20210101T000000", true).await.unwrap());
        catalog.pin("20210101T000000", "full").await.unwrap();
        assert!(catalog.should_keep_backup("20210101T000000", false).await.unwrap());
    }
}
