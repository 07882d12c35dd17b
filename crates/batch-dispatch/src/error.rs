//! Error types for batch dispatch

use credential_store::Error as StoreError;

use crate::report::DispatchReport;

/// Whole-batch failures. Individual account failures never surface here;
/// they are part of the `DispatchReport`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The batch ran but its rotations could not be saved. `report` holds
    /// what happened in memory; the caller should retry the whole batch.
    #[error("persisting credential store failed: {source}")]
    Persistence {
        #[source]
        source: StoreError,
        report: DispatchReport,
    },

    #[error("invalid credential store after dispatch: {0}")]
    InvalidStore(#[from] StoreError),
}

/// Result alias for dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;
