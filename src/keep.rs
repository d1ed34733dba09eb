//! The "keep" subsystem (§4.2): pinning a backup against retention-driven
//! deletion, grounded in `barman/annotations.py`'s `KeepManager` /
//! `KeepManagerMixin` / `KeepManagerMixinCloud` trio — collapsed here into a
//! single type that holds an [`AnnotationStore`] rather than mixing it into
//! a catalog class.

use std::path::Path;
use std::sync::Arc;

use crate::annotations::AnnotationStore;
use crate::error::{Error, Result};
use crate::store::ObjectStore;

pub const ANNOTATION_KEY: &str = "keep";

/// A backup pinned with `full` is exempt from all retention-driven deletion.
pub const TARGET_FULL: &str = "full";
/// A backup pinned with `standalone` is exempt from deletion, but its WALs
/// are not: `wal_cleanup` still treats its range as protected from
/// `wal_cleanup.rs`'s perspective via its own range logic (see §4.6.4),
/// while its own WAL-cleanup-on-deletion step is skipped.
pub const TARGET_STANDALONE: &str = "standalone";

fn validate_target(target: &str) -> Result<()> {
    if target == TARGET_FULL || target == TARGET_STANDALONE {
        Ok(())
    } else {
        Err(Error::UnsupportedKeepTarget(target.to_string()))
    }
}

/// Thin, backend-agnostic wrapper over an [`AnnotationStore`] that
/// understands only the `keep` key and its two valid values.
pub struct KeepRegistry<O: ObjectStore> {
    annotations: AnnotationStore<O>,
}

impl<O: ObjectStore> KeepRegistry<O> {
    pub fn for_filesystem(path: impl Into<std::path::PathBuf>, legacy_path: Option<&Path>) -> Self {
        Self {
            annotations: AnnotationStore::for_filesystem(path, legacy_path),
        }
    }

    pub fn for_object_store(store: Arc<O>, server_name: impl Into<String>) -> Self {
        Self {
            annotations: AnnotationStore::for_object_store(store, server_name),
        }
    }

    /// Pins `backup_id` with `target` (`"full"` or `"standalone"`).
    pub async fn pin(&self, backup_id: &str, target: &str) -> Result<()> {
        validate_target(target)?;
        self.annotations.put(backup_id, ANNOTATION_KEY, target).await
    }

    /// Returns the pin target for `backup_id`, or `None` if it isn't pinned.
    pub async fn target(&self, backup_id: &str) -> Result<Option<String>> {
        self.annotations.get(backup_id, ANNOTATION_KEY, true).await
    }

    pub async fn is_pinned(&self, backup_id: &str) -> Result<bool> {
        Ok(self.target(backup_id).await?.is_some())
    }

    pub async fn unpin(&self, backup_id: &str) -> Result<()> {
        self.annotations.delete(backup_id, ANNOTATION_KEY).await
    }
}
