//! The `ObjectStore` contract (§6): a flat keyed blob store with
//! list/get/put/delete and batch-delete, plus two optional capabilities
//! (prefix deletion, common-prefix enumeration) that degrade gracefully to
//! `Error::NotSupported` when a backend can't offer them.
//!
//! This module also ships two concrete backends: [`S3Store`], generalizing
//! the teacher's `S3Client` behind the trait, and [`MemoryStore`], an
//! in-process test double used throughout the test suite so the retention
//! and WAL-cleanup logic can be exercised without a real bucket.

use std::collections::BTreeMap;
use std::sync::Mutex;

use s3::creds::Credentials;
use s3::{Bucket, Region};

use crate::config::StoreConfig;
use crate::error::{Error, Result, StoreOp};

/// A flat keyed blob store. All keys are relative to whatever root prefix
/// the implementation was constructed with.
pub trait ObjectStore: Send + Sync {
    /// Lists keys under `path`. When `delimiter` is `Some("/")`, behaves as
    /// a common-prefix listing (see [`ObjectStore::list_common_prefixes`]
    /// for the dedicated call); callers normally pass `None` for a flat,
    /// fully recursive listing.
    async fn list_prefix(&self, path: &str, delimiter: Option<&str>) -> Result<Vec<String>>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Batched delete; size bounded by the provider (the engine never
    /// splits a batch — that is this call's responsibility).
    async fn delete_objects(&self, keys: &[String]) -> Result<()>;

    /// Deletes every object under `prefix` in one request. Backends that
    /// can't offer this return `Error::NotSupported`.
    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        Err(Error::NotSupported(format!("delete_prefix({prefix})")))
    }

    /// One-level common-prefix enumeration. Backends that can't offer this
    /// return `Error::NotSupported`; callers fall back to full enumeration.
    async fn list_common_prefixes(&self, path: &str) -> Result<Vec<String>> {
        Err(Error::NotSupported(format!(
            "list_common_prefixes({path})"
        )))
    }

    async fn bucket_exists(&self) -> Result<bool>;

    async fn test_connectivity(&self) -> Result<bool>;
}

/// Best-effort detection of a not-found response, since the underlying
/// crate surfaces it as a generic HTTP-failure error rather than a
/// dedicated variant.
fn is_not_found(err: &s3::error::S3Error) -> bool {
    err.to_string().contains("404")
}

/// S3-backed object store, built on the `s3` crate exactly as the
/// teacher's `S3Client` is, generalized behind [`ObjectStore`].
pub struct S3Store {
    bucket: Box<Bucket>,
}

impl S3Store {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| Error::Connectivity(e.to_string()))?;

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| Error::Connectivity(e.to_string()))?
            .with_path_style();

        Ok(Self { bucket })
    }
}

impl ObjectStore for S3Store {
    async fn list_prefix(&self, path: &str, delimiter: Option<&str>) -> Result<Vec<String>> {
        let delim = delimiter.map(|d| d.to_string());
        let results = self
            .bucket
            .list(path.to_string(), delim)
            .await
            .map_err(|e| Error::StoreFailure {
                op: StoreOp::List,
                message: e.to_string(),
            })?;

        let mut keys = std::collections::BTreeSet::new();
        for page in &results {
            for obj in &page.contents {
                keys.insert(obj.key.clone());
            }
            if let Some(common) = &page.common_prefixes {
                for cp in common {
                    keys.insert(cp.prefix.clone());
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.bucket.get_object(key).await {
            Ok(response) => Ok(Some(response.to_vec())),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::StoreFailure {
                op: StoreOp::Get,
                message: e.to_string(),
            }),
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.bucket
            .put_object(key, data)
            .await
            .map_err(|e| Error::StoreFailure {
                op: StoreOp::Put,
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            match self.bucket.delete_object(key).await {
                Ok(_) => {}
                Err(e) if is_not_found(&e) => {}
                Err(e) => {
                    return Err(Error::StoreFailure {
                        op: StoreOp::Delete,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// One-level common-prefix enumeration (§4.3's `listWalPrefixes`
    /// fast path, also used by `Catalog::list_backups`'s primary listing
    /// strategy): a real `bucket.list(path, Some("/"))` call, reading
    /// `CommonPrefixes` rather than `Contents` the way S3's delimiter
    /// semantics actually work.
    async fn list_common_prefixes(&self, path: &str) -> Result<Vec<String>> {
        let results = self
            .bucket
            .list(path.to_string(), Some("/".to_string()))
            .await
            .map_err(|e| Error::StoreFailure {
                op: StoreOp::List,
                message: e.to_string(),
            })?;

        let mut prefixes = std::collections::BTreeSet::new();
        for page in &results {
            if let Some(common) = &page.common_prefixes {
                for cp in common {
                    prefixes.insert(cp.prefix.clone());
                }
            }
        }
        Ok(prefixes.into_iter().collect())
    }

    async fn bucket_exists(&self) -> Result<bool> {
        self.bucket
            .exists()
            .await
            .map_err(|e| Error::Connectivity(e.to_string()))
    }

    async fn test_connectivity(&self) -> Result<bool> {
        Ok(self.bucket.exists().await.is_ok())
    }
}

/// An in-process object store used by tests and as a reference
/// implementation of the trait's contract. Keys are stored flat, in
/// insertion-independent (sorted) order.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Test-only fault injection: when set, the next `delete_objects`
    /// call fails instead of succeeding, to exercise the partial-failure
    /// recovery paths of §4.6.8.
    fail_next_delete: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(key.into(), data.into());
    }

    /// Makes the next `delete_objects` call fail with a store error.
    pub fn fail_next_delete(&self) {
        self.fail_next_delete.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

impl ObjectStore for MemoryStore {
    async fn list_prefix(&self, path: &str, delimiter: Option<&str>) -> Result<Vec<String>> {
        let objects = self.objects.lock().unwrap();
        match delimiter {
            None | Some("") => Ok(objects
                .keys()
                .filter(|k| k.starts_with(path))
                .cloned()
                .collect()),
            Some(delim) => {
                let mut seen = std::collections::BTreeSet::new();
                for key in objects.keys().filter(|k| k.starts_with(path)) {
                    let rest = &key[path.len()..];
                    if let Some(idx) = rest.find(delim) {
                        seen.insert(format!("{path}{}", &rest[..idx + delim.len()]));
                    }
                }
                Ok(seen.into_iter().collect())
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        if self
            .fail_next_delete
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::StoreFailure {
                op: StoreOp::Delete,
                message: "injected failure".to_string(),
            });
        }
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let to_remove: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in to_remove {
            objects.remove(&key);
        }
        Ok(())
    }

    async fn list_common_prefixes(&self, path: &str) -> Result<Vec<String>> {
        self.list_prefix(path, Some("/")).await
    }

    async fn bucket_exists(&self) -> Result<bool> {
        Ok(true)
    }

    async fn test_connectivity(&self) -> Result<bool> {
        Ok(true)
    }
}
