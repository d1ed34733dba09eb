//! The WAL-cleanup planner (§4.6) — the heart of the engine. Computes,
//! for a backup that has just been deleted, the WAL objects that may now
//! be safely reclaimed without breaking any surviving full or standalone
//! archival backup.
//!
//! There is no teacher precedent for this exact algorithm (the teacher
//! deletes whole generations wholesale in `enforce_retention`, never a
//! sub-generation WAL range), so this module is grounded directly in
//! spec.md §4.6 rather than adapted from teacher code; it reuses the
//! teacher's `tracing`-based logging idiom and the crate's own
//! [`crate::wal`] arithmetic.

use std::collections::{HashMap, HashSet};

use crate::backup::BackupInfo;
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::store::ObjectStore;
use crate::wal;

/// The two kinds of deletions a plan may contain. Prefix deletions are
/// applied first (§5 ordering guarantee: prefix-first).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalCleanupPlan {
    /// Whole key prefixes (one-level common prefixes under the WAL root)
    /// that may be deleted in a single batch.
    pub prefix_deletions: Vec<String>,
    /// Individual `(logical_name, storage_key)` pairs not already covered
    /// by a prefix deletion.
    pub wal_deletions: Vec<(String, String)>,
}

impl WalCleanupPlan {
    pub fn is_empty(&self) -> bool {
        self.prefix_deletions.is_empty() && self.wal_deletions.is_empty()
    }
}

struct CutOff {
    begin_wal: String,
    timeline: u32,
}

fn target_is_standalone(pinned_targets: &HashMap<String, String>, id: &str) -> bool {
    pinned_targets.get(id).map(|t| t == "standalone").unwrap_or(false)
}

/// §4.6.1: decides whether this deletion should attempt any WAL cleanup
/// at all.
fn should_clean_up(
    deleted: &BackupInfo,
    surviving: &[BackupInfo],
    pinned_targets: &HashMap<String, String>,
    skip_wal_cleanup_if_standalone: bool,
) -> bool {
    let older: Vec<&BackupInfo> = surviving
        .iter()
        .filter(|b| b.status.is_done() && b.id.as_str() < deleted.id.as_str())
        .collect();
    if older.is_empty() {
        return true;
    }
    let all_standalone = older.iter().all(|b| target_is_standalone(pinned_targets, &b.id));
    all_standalone && !skip_wal_cleanup_if_standalone
}

/// §4.6.2: the cut-off backup, as (begin_wal, timeline).
fn cutoff(deleted: &BackupInfo, surviving: &[BackupInfo]) -> Result<CutOff> {
    let mut next: Vec<&BackupInfo> = surviving
        .iter()
        .filter(|b| b.status.is_done() && b.id.as_str() > deleted.id.as_str())
        .collect();
    next.sort_by(|a, b| a.id.cmp(&b.id));
    match next.first() {
        Some(b) => Ok(CutOff {
            begin_wal: b.begin_wal.clone(),
            timeline: b.timeline()?,
        }),
        None => Ok(CutOff {
            begin_wal: deleted.begin_wal.clone(),
            timeline: deleted.timeline()?,
        }),
    }
}

/// §4.6.3: `[begin_wal, end_wal]` ranges protected by every surviving
/// standalone-pinned backup. Segment names are fixed-width hex, so plain
/// string comparison reproduces the spec's lexicographic ordering exactly
/// — no decode-to-tuple step is needed for the range test itself.
fn protected_ranges(
    surviving: &[BackupInfo],
    pinned_targets: &HashMap<String, String>,
) -> Vec<(String, String)> {
    surviving
        .iter()
        .filter(|b| target_is_standalone(pinned_targets, &b.id))
        .map(|b| (b.begin_wal.clone(), b.end_wal.clone()))
        .collect()
}

fn within_any_range(name: &str, ranges: &[(String, String)]) -> bool {
    let check_name = wal::range_check_name(name);
    ranges
        .iter()
        .any(|(begin, end)| check_name >= begin.as_str() && check_name <= end.as_str())
}

/// §4.6.4: timelines that appear in any surviving DONE backup's
/// `begin_wal`, other than the cut-off's own timeline.
fn protected_timelines(surviving: &[BackupInfo], cutoff_timeline: u32) -> Result<HashSet<u32>> {
    let mut set = HashSet::new();
    for b in surviving.iter().filter(|b| b.status.is_done()) {
        let tli = b.timeline()?;
        if tli != cutoff_timeline {
            set.insert(tli);
        }
    }
    Ok(set)
}

/// Hash-dir intersection test for §4.6.5's prefix shortcut: the open
/// question spec.md flags about the source's "four-corner inequality" is
/// resolved here by comparing the prefix's 16-hex `{tli,log}` string
/// against the 16-hex prefix of each protected range's endpoints — a
/// direct, easily-exhaustible string comparison rather than a decoded
/// tuple comparison (see DESIGN.md).
fn prefix_intersects_range(hash_dir: &str, ranges: &[(String, String)]) -> bool {
    ranges.iter().any(|(begin, end)| {
        let begin16 = &begin[..16.min(begin.len())];
        let end16 = &end[..16.min(end.len())];
        hash_dir >= begin16 && hash_dir <= end16
    })
}

/// Computes the WAL-cleanup plan for a just-deleted backup. `surviving`
/// must be the DONE-or-otherwise backup list with `deleted` already
/// removed. `pinned_targets` maps backup id to its keep target
/// (`"full"`/`"standalone"`) for every backup in `surviving` that is
/// pinned; unpinned backups are simply absent from the map.
pub async fn plan<O: ObjectStore>(
    catalog: &mut Catalog<O>,
    deleted: &BackupInfo,
    surviving: &[BackupInfo],
    pinned_targets: &HashMap<String, String>,
    skip_wal_cleanup_if_standalone: bool,
) -> Result<WalCleanupPlan> {
    if !should_clean_up(deleted, surviving, pinned_targets, skip_wal_cleanup_if_standalone) {
        tracing::debug!(backup_id = %deleted.id, "wal cleanup skipped: an older non-standalone survivor exists");
        return Ok(WalCleanupPlan::default());
    }

    let cutoff = cutoff(deleted, surviving)?;
    let ranges = protected_ranges(surviving, pinned_targets);
    let protected_tlis = protected_timelines(surviving, cutoff.timeline)?;

    let mut plan = WalCleanupPlan::default();

    match catalog.list_wal_prefixes().await {
        Ok(prefixes) => {
            for prefix in prefixes {
                let trimmed = prefix.trim_end_matches('/');
                let hash_dir = trimmed.rsplit('/').next().unwrap_or(trimmed);
                let decoded = wal::decode_hash_dir(hash_dir);
                let (tli, log) = match decoded {
                    Ok(pair) => pair,
                    Err(_) => {
                        tracing::warn!(prefix = %prefix, "could not decode wal prefix, skipping shortcut for it");
                        continue;
                    }
                };
                if protected_tlis.contains(&tli) {
                    continue;
                }
                if prefix_intersects_range(hash_dir, &ranges) {
                    continue;
                }
                let cutoff_log = match wal::decode_segment_name(&cutoff.begin_wal) {
                    Ok((_, log, _)) => log,
                    Err(_) => continue,
                };
                if tli != cutoff.timeline || log >= cutoff_log {
                    continue;
                }
                plan.prefix_deletions.push(prefix);
            }
        }
        Err(Error::NotSupported(_)) => {
            tracing::debug!("wal prefix listing not supported, falling back to individual enumeration");
        }
        Err(e) => return Err(e),
    }

    let wals = catalog.list_wals().await?.clone();
    for (logical_name, storage_key) in wals {
        if plan
            .prefix_deletions
            .iter()
            .any(|p| storage_key.starts_with(p.as_str()))
        {
            continue;
        }
        if wal::is_history_file(&logical_name) {
            continue;
        }
        let parsed = match wal::parse(&logical_name) {
            Ok(p) => p,
            Err(_) => continue,
        };
        if protected_tlis.contains(&parsed.timeline()) {
            continue;
        }
        let check_name = wal::range_check_name(&logical_name);
        if within_any_range(check_name, &ranges) {
            continue;
        }
        if check_name < cutoff.begin_wal.as_str() {
            plan.wal_deletions.push((logical_name, storage_key));
        }
    }

    Ok(plan)
}
