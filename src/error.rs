use thiserror::Error;

/// Which store operation a [`Error::StoreFailure`] came from, for logging
/// and so `exit_code` can tell a delete/list/get failure (exit 1, per §6's
/// "delete failure" row) from a connectivity-level failure (exit 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    List,
    Put,
    Delete,
}

impl std::fmt::Display for StoreOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StoreOp::Get => "get",
            StoreOp::List => "list",
            StoreOp::Put => "put",
            StoreOp::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// Error kinds the engine raises or distinguishes.
///
/// Each variant corresponds to one row of the error-handling contract: what
/// propagates all the way to a caller, and what gets recovered locally (see
/// the `NotSupported` handling in `catalog` and `annotations`).
#[derive(Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// A get/list/put/delete call against the object store failed. Maps to
    /// exit code 1 (§6 "delete failure"), distinct from
    /// [`Error::Connectivity`]'s exit code 2.
    #[error("store {op} failed: {message}")]
    StoreFailure { op: StoreOp, message: String },

    /// The store could not be reached at all (connection refused, DNS
    /// failure, TLS handshake failure, ...), as opposed to a single call
    /// failing against a reachable store. Maps to exit code 2 (§6
    /// "network/connectivity failure").
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    #[error("optional store capability not supported: {0}")]
    NotSupported(String),

    #[error("catalog is unreadable: failed to load {count} backup(s): {ids}")]
    CatalogUnreadable { count: usize, ids: String },

    #[error("backup {0} not found")]
    BackupNotFound(String),

    #[error("backup {0} is pinned and cannot be deleted")]
    BackupPinned(String),

    #[error(
        "refusing to delete backup {backup_id}: minimum redundancy {minimum_redundancy} \
         would be violated (current redundancy = {current_redundancy})"
    )]
    MinimumRedundancyViolation {
        backup_id: String,
        minimum_redundancy: u32,
        current_redundancy: u32,
    },

    #[error("invalid retention policy {0:?}: {1}")]
    InvalidRetentionPolicy(String, String),

    #[error("unsupported recovery target: {0}")]
    UnsupportedKeepTarget(String),

    #[error("backup name {0:?} is reserved and cannot be assigned")]
    ReservedBackupName(String),

    #[error("malformed WAL name or prefix: {0:?}")]
    BadWalName(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Maps an error to the CLI-surfaced process exit code (§6).
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Connectivity(_) => 2,
            Error::InvalidRetentionPolicy(..) => 3,
            Error::BackupNotFound(_) => 0,
            Error::StoreFailure { .. }
            | Error::NotSupported(_)
            | Error::CatalogUnreadable { .. }
            | Error::BackupPinned(_)
            | Error::MinimumRedundancyViolation { .. }
            | Error::UnsupportedKeepTarget(_)
            | Error::ReservedBackupName(_)
            | Error::Cancelled => 1,
            Error::Io(_) | Error::BadWalName(_) | Error::Other(_) => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        let err = Error::BackupPinned("20210722T000000".into());
        assert_eq!(
            err.to_string(),
            "backup 20210722T000000 is pinned and cannot be deleted"
        );
    }

    #[test]
    fn exit_codes_match_the_contract() {
        // A delete/list/get failure against a reachable store is an
        // operation error (exit 1, §6; scenario E5), not a connectivity
        // failure.
        assert_eq!(
            Error::StoreFailure {
                op: StoreOp::Delete,
                message: "boom".into()
            }
            .exit_code(),
            1
        );
        assert_eq!(Error::Connectivity("unreachable".into()).exit_code(), 2);
        assert_eq!(
            Error::InvalidRetentionPolicy("x".into(), "bad syntax".into()).exit_code(),
            3
        );
        assert_eq!(Error::BackupNotFound("x".into()).exit_code(), 0);
        assert_eq!(Error::Other("???".into()).exit_code(), 4);
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
