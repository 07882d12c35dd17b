//! Error types for credential store operations

/// Errors from credential store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential store at {location} is corrupt: {reason}")]
    CorruptStore { location: String, reason: String },

    #[error("I/O error on credential store at {location}: {reason}")]
    Io { location: String, reason: String },

    #[error("duplicate account identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("account identifier must not be empty")]
    EmptyIdentifier,

    #[error("serializing credential store: {0}")]
    Serialize(String),
}

/// Result alias for credential store operations.
pub type Result<T> = std::result::Result<T, Error>;
