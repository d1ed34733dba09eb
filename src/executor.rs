//! The deletion executor (§4.5, §4.6.8): orchestrates validating a
//! deletion request, disposing of snapshots or data files, removing
//! `backup.info`, then running [`crate::wal_cleanup`] and applying its
//! plan. Grounded in the teacher's `enforce_retention` /
//! `delete_generation` pair (`manager.rs`), generalized from "delete a
//! whole generation" into the multi-stage, partial-failure-safe sequence
//! §4.6.8 names.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backup::BackupInfo;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::retention::{RetentionEvaluator, RetentionPolicy, Verdict};
use crate::snapshot::SnapshotInterface;
use crate::store::ObjectStore;
use crate::wal_cleanup::{self, WalCleanupPlan};

/// A cooperative cancellation signal, checked at every transition in
/// §4.6.8 and between backups in a policy-driven run (§5).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One step of a deletion plan, suitable for both dry-run rendering and
/// post-hoc auditing of what an applied deletion actually touched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlannedAction {
    DeleteFile(String),
    DeleteBackupLabel(String),
    DeleteSnapshot(String),
    DeleteBackupInfo(String),
    DeletePrefix(String),
    DeleteWal(String, String),
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannedAction::DeleteFile(k) => write!(f, "delete file {k}"),
            PlannedAction::DeleteBackupLabel(k) => write!(f, "delete backup_label {k}"),
            PlannedAction::DeleteSnapshot(provider) => write!(f, "delete snapshot ({provider})"),
            PlannedAction::DeleteBackupInfo(k) => write!(f, "delete backup.info {k}"),
            PlannedAction::DeletePrefix(p) => write!(f, "delete wal prefix {p}"),
            PlannedAction::DeleteWal(name, _) => write!(f, "delete wal {name}"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DeleteOptions {
    /// When true, nothing is written to the store; the plan is returned
    /// as-if it had executed.
    pub dry_run: bool,
    /// §4.6.1's flag: defaults true for single-backup deletions, false
    /// for policy-driven bulk runs.
    pub skip_wal_cleanup_if_standalone: bool,
    /// Whether this call is part of a `delete_by_policy` run (affects
    /// the minimum-redundancy check and the pin-cache-bypass choice).
    pub is_policy_driven: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            skip_wal_cleanup_if_standalone: true,
            is_policy_driven: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletionOutcome {
    pub backup_id: String,
    /// False when the backup was already absent (idempotent no-op).
    pub found: bool,
    pub planned_actions: Vec<PlannedAction>,
    pub wal_plan: Option<WalCleanupPlan>,
}

impl DeletionOutcome {
    fn not_found(reference: &str) -> Self {
        Self {
            backup_id: reference.to_string(),
            found: false,
            planned_actions: Vec::new(),
            wal_plan: None,
        }
    }
}

pub struct DeletionExecutor<'a, O: ObjectStore, S: SnapshotInterface> {
    catalog: &'a mut Catalog<O>,
    snapshots: &'a S,
    minimum_redundancy: u32,
    cancel: CancelToken,
}

impl<'a, O: ObjectStore, S: SnapshotInterface> DeletionExecutor<'a, O, S> {
    pub fn new(catalog: &'a mut Catalog<O>, snapshots: &'a S, minimum_redundancy: u32) -> Self {
        Self {
            catalog,
            snapshots,
            minimum_redundancy,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Deletes a single backup (§4.5 `deleteOne`). `reference` is resolved
    /// through [`Catalog::parse_backup_id`], so ids, names, and reserved
    /// tokens are all accepted.
    pub async fn delete_one(&mut self, reference: &str, opts: &DeleteOptions) -> Result<DeletionOutcome> {
        // Precondition 1: catalog fully loaded, nothing unreadable.
        self.catalog.list_backups().await?;
        if !self.catalog.unreadable_backups().is_empty() {
            return Err(Error::CatalogUnreadable {
                count: self.catalog.unreadable_backups().len(),
                ids: self.catalog.unreadable_backups().join(", "),
            });
        }
        self.check_cancelled()?;

        // Precondition 2: the backup exists. Idempotent no-op otherwise.
        let backup_id = match self.catalog.parse_backup_id(reference).await {
            Ok(id) => id,
            Err(Error::BackupNotFound(_)) => {
                tracing::warn!(reference, "backup not found, treating deletion as already done");
                return Ok(DeletionOutcome::not_found(reference));
            }
            Err(e) => return Err(e),
        };

        // Precondition 3: not pinned. Single-backup deletions bypass the
        // presence cache so a just-pinned backup is seen immediately.
        let use_cache = opts.is_policy_driven;
        if self.catalog.should_keep_backup(&backup_id, use_cache).await? {
            return Err(Error::BackupPinned(backup_id));
        }

        // Precondition 4: the minimum-redundancy floor, single-backup
        // requests only (policy-driven runs already baked the floor into
        // the retention evaluation).
        if !opts.is_policy_driven && self.minimum_redundancy > 0 {
            let backups = self.catalog.list_backups().await?.to_vec();
            let mut non_pinned_done = 0u32;
            for b in backups.iter().filter(|b| b.status.is_done()) {
                if !self.catalog.should_keep_backup(&b.id, true).await? {
                    non_pinned_done += 1;
                }
            }
            if non_pinned_done <= self.minimum_redundancy {
                return Err(Error::MinimumRedundancyViolation {
                    backup_id,
                    minimum_redundancy: self.minimum_redundancy,
                    current_redundancy: non_pinned_done,
                });
            }
        }

        let info = self
            .catalog
            .get_backup_info(&backup_id)
            .await?
            .ok_or_else(|| Error::BackupNotFound(backup_id.clone()))?;

        let mut planned = Vec::new();
        self.check_cancelled()?;

        // SnapshotDisposed? / FilesDeleted.
        if let Some(snapshots_info) = &info.snapshots_info {
            planned.push(PlannedAction::DeleteSnapshot(snapshots_info.provider.clone()));
            if !opts.dry_run {
                self.snapshots.delete_snapshot_backup(snapshots_info).await?;
            }
            let label_key = self.catalog.backup_label_key(&backup_id);
            planned.push(PlannedAction::DeleteBackupLabel(label_key.clone()));
            if !opts.dry_run {
                if let Err(e) = self.catalog.store().delete_objects(&[label_key]).await {
                    tracing::error!(backup_id, error = %e, "failed to delete backup_label, aborting this deletion");
                    return Err(e);
                }
            }
        } else {
            let files = self.catalog.backup_files(&info, true);
            for f in &files {
                planned.push(PlannedAction::DeleteFile(f.clone()));
            }
            if !opts.dry_run && !files.is_empty() {
                if let Err(e) = self.catalog.store().delete_objects(&files).await {
                    tracing::error!(backup_id, error = %e, "failed to delete backup files, aborting this deletion");
                    return Err(e);
                }
            }
        }

        self.check_cancelled()?;

        // InfoDeleted.
        let info_key = self.catalog.backup_info_key(&backup_id);
        planned.push(PlannedAction::DeleteBackupInfo(info_key.clone()));
        if !opts.dry_run {
            if let Err(e) = self.catalog.store().delete_objects(&[info_key]).await {
                tracing::error!(backup_id, error = %e, "failed to delete backup.info, aborting this deletion");
                return Err(e);
            }
        }

        // WalPlanned / WalApplied / Evicted. A failure from here on is
        // recoverable on the next run (§4.6.8) and must not undo the
        // backup deletion that already succeeded.
        let surviving: Vec<BackupInfo> = self
            .catalog
            .list_backups()
            .await?
            .iter()
            .filter(|b| b.id != backup_id)
            .cloned()
            .collect();
        let mut pinned_targets = HashMap::new();
        for b in &surviving {
            if let Some(target) = self.catalog.keep_target(&b.id).await? {
                pinned_targets.insert(b.id.clone(), target);
            }
        }

        let wal_plan = wal_cleanup::plan(
            self.catalog,
            &info,
            &surviving,
            &pinned_targets,
            opts.skip_wal_cleanup_if_standalone,
        )
        .await?;

        for p in &wal_plan.prefix_deletions {
            planned.push(PlannedAction::DeletePrefix(p.clone()));
        }
        for (name, key) in &wal_plan.wal_deletions {
            planned.push(PlannedAction::DeleteWal(name.clone(), key.clone()));
        }

        if !opts.dry_run {
            self.apply_wal_plan(&wal_plan).await;
            self.catalog.remove_backup_from_cache(&backup_id);
        }

        Ok(DeletionOutcome {
            backup_id,
            found: true,
            planned_actions: planned,
            wal_plan: Some(wal_plan),
        })
    }

    /// Applies a WAL cleanup plan, prefix deletions first (§5 ordering).
    /// Failures are logged and swallowed: the backup is already gone, and
    /// a future deletion will reconsider any WAL this run didn't reach.
    async fn apply_wal_plan(&mut self, plan: &WalCleanupPlan) {
        for prefix in &plan.prefix_deletions {
            match self.catalog.store().delete_prefix(prefix).await {
                Ok(()) => {}
                Err(Error::NotSupported(_)) => {
                    tracing::warn!(prefix, "prefix delete not supported by this store, leaving for next run");
                }
                Err(e) => {
                    tracing::error!(prefix, error = %e, "wal prefix delete failed, aborting remaining wal cleanup");
                    return;
                }
            }
        }
        if !plan.wal_deletions.is_empty() {
            let keys: Vec<String> = plan.wal_deletions.iter().map(|(_, k)| k.clone()).collect();
            if let Err(e) = self.catalog.store().delete_objects(&keys).await {
                tracing::error!(error = %e, "wal batch delete failed, remaining wals left for next run");
                return;
            }
            for (name, _) in &plan.wal_deletions {
                self.catalog.remove_wal_from_cache(name);
            }
        }
    }

    /// Evaluates `policy` and deletes every OBSOLETE backup, oldest
    /// first, aborting the whole run on the first failure.
    pub async fn delete_by_policy(&mut self, policy: RetentionPolicy) -> Result<Vec<DeletionOutcome>> {
        self.catalog.list_backups().await?;
        if !self.catalog.unreadable_backups().is_empty() {
            return Err(Error::CatalogUnreadable {
                count: self.catalog.unreadable_backups().len(),
                ids: self.catalog.unreadable_backups().join(", "),
            });
        }
        let backups = self.catalog.list_backups().await?.to_vec();
        let mut pinned = HashMap::new();
        for b in &backups {
            if let Some(target) = self.catalog.keep_target(&b.id).await? {
                pinned.insert(b.id.clone(), target);
            }
        }
        let evaluator = RetentionEvaluator::new(policy, self.minimum_redundancy);
        let verdicts = evaluator.evaluate(&backups, |id| pinned.contains_key(id));

        let mut obsolete: Vec<String> = verdicts
            .iter()
            .filter(|(_, v)| **v == Verdict::Obsolete)
            .map(|(id, _)| id.clone())
            .collect();
        obsolete.sort();

        let opts = DeleteOptions {
            dry_run: false,
            skip_wal_cleanup_if_standalone: false,
            is_policy_driven: true,
        };

        let mut outcomes = Vec::with_capacity(obsolete.len());
        for id in obsolete {
            self.check_cancelled()?;
            match self.delete_one(&id, &opts).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tracing::error!(backup_id = %id, error = %e, "policy-driven deletion failed, aborting run");
                    return Err(e);
                }
            }
        }
        Ok(outcomes)
    }
}
