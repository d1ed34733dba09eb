//! The external snapshot-provider collaborator (§6): called only when a
//! backup carries [`crate::backup::SnapshotsInfo`]. Disposal of the
//! underlying cloud snapshots is explicitly out of scope for this crate —
//! the engine only needs to invoke it and react to the result.

use crate::backup::SnapshotsInfo;
use crate::error::Result;

/// Disposes of the cloud snapshots backing a snapshot-based backup.
/// Implementations talk to whatever provider API (EBS, GCP persistent
/// disk, Azure managed disk, ...) `SnapshotsInfo::provider` names.
pub trait SnapshotInterface: Send + Sync {
    fn delete_snapshot_backup(
        &self,
        info: &SnapshotsInfo,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// A no-op collaborator used by tests and by callers that never produce
/// snapshot-based backups.
#[derive(Default)]
pub struct NullSnapshotInterface {
    pub calls: std::sync::Mutex<Vec<String>>,
}

impl SnapshotInterface for NullSnapshotInterface {
    async fn delete_snapshot_backup(&self, info: &SnapshotsInfo) -> Result<()> {
        self.calls.lock().unwrap().push(info.provider.clone());
        Ok(())
    }
}
