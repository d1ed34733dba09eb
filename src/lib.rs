pub mod annotations;
pub mod backup;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod keep;
pub mod retention;
pub mod snapshot;
pub mod store;
pub mod wal;
pub mod wal_cleanup;

pub use backup::{BackupFile, BackupInfo, BackupStatus, Mode, SnapshotsInfo, VolumeSnapshot};
pub use catalog::Catalog;
pub use config::{EngineConfig, StoreConfig};
pub use error::{Error, Result, StoreOp};
pub use executor::{CancelToken, DeleteOptions, DeletionExecutor, DeletionOutcome, PlannedAction};
pub use keep::KeepRegistry;
pub use retention::{RetentionEvaluator, RetentionPolicy, Verdict};
pub use snapshot::{NullSnapshotInterface, SnapshotInterface};
pub use store::{MemoryStore, ObjectStore, S3Store};
pub use wal_cleanup::{WalCleanupPlan, plan as plan_wal_cleanup};
