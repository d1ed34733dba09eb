//! The backup data model: identifiers, status, files, and the invariants
//! that guard assigning a human-readable name to a backup.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::wal::decode_segment_name;

/// Reserved backup-name tokens that double as reference shorthands
/// (`parse_backup_id` resolves these against the current catalog).
pub const RESERVED_NAMES: &[&str] = &["latest", "last", "oldest", "first", "last-failed"];

const BACKUP_ID_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupStatus {
    Started,
    WaitingForWals,
    Done,
    Failed,
}

impl BackupStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, BackupStatus::Done)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Concurrent,
    Exclusive,
}

/// A single snapshot handle within a snapshot-based backup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    pub mount_point: String,
    pub snapshot_id: String,
}

/// Present iff the backup is a snapshot-based backup. When present, the
/// backup has no object-store file entries for data/tablespaces — only a
/// `backup_label` exists remotely (Invariant 3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotsInfo {
    pub provider: String,
    pub snapshots: Vec<VolumeSnapshot>,
}

/// A single archived file belonging to a backup: the PGDATA tar (no oid)
/// or a tablespace tar (keyed by oid), plus any overflow parts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFile {
    /// `None` denotes the PGDATA sentinel entry.
    pub oid: Option<String>,
    /// Absent when `listBackupFiles(allow_missing=true)` could not locate
    /// the object; callers must silently skip deleting it.
    pub primary_path: Option<String>,
    pub additional_paths: Vec<String>,
}

impl BackupFile {
    /// Sort key used for deterministic delete ordering: PGDATA first, then
    /// tablespaces ascending by oid.
    pub fn sort_key(&self) -> (i64, String) {
        match &self.oid {
            None => (-1, String::new()),
            Some(oid) => (oid.parse::<i64>().unwrap_or(i64::MAX), oid.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub id: String,
    pub name: Option<String>,
    pub status: BackupStatus,
    pub begin_wal: String,
    pub end_wal: String,
    pub mode: Mode,
    pub snapshots_info: Option<SnapshotsInfo>,
    pub files: Vec<BackupFile>,
    pub end_time: Option<DateTime<Utc>>,
}

impl BackupInfo {
    /// The timeline derived from `begin_wal` (Invariant 2).
    pub fn timeline(&self) -> Result<u32> {
        let (tli, _, _) = decode_segment_name(&self.begin_wal)?;
        Ok(tli)
    }
}

/// Returns true if `s` parses as a backup id (`YYYYMMDDTHHMMSS`).
pub fn is_backup_id(s: &str) -> bool {
    NaiveDateTime::parse_from_str(s, BACKUP_ID_FORMAT).is_ok()
}

/// Validates a candidate backup name against Invariant/name rules: it must
/// not be a reserved token, must not itself parse as a backup id, and must
/// not collide with an existing backup's name.
pub fn validate_name(name: &str, existing_names: &[&str]) -> Result<()> {
    if RESERVED_NAMES.contains(&name) {
        return Err(Error::ReservedBackupName(name.to_string()));
    }
    if is_backup_id(name) {
        return Err(Error::ReservedBackupName(name.to_string()));
    }
    if existing_names.contains(&name) {
        return Err(Error::ReservedBackupName(name.to_string()));
    }
    Ok(())
}
