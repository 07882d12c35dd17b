//! Error types for the fetch pool

/// Whole-pool failures. A resource that exhausts its retries is not an
/// error; it is a `FetchResult` with `succeeded == false`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid fetch pool configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot prepare output directory {path}: {reason}")]
    OutputDir { path: String, reason: String },
}

/// Result alias for fetch pool operations.
pub type Result<T> = std::result::Result<T, Error>;
