//! Durable account credential storage
//!
//! Holds the account records a batch dispatch runs against. A store is loaded
//! from and flushed to its medium as one unit; there are no partial writes.
//! Secrets change only through [`rotate`], and rotation never persists on its
//! own: the dispatcher saves the whole store once per batch.
//!
//! Credential flow:
//! 1. `CredentialStore::load()` reads every record (missing source = empty store)
//! 2. The dispatcher moves each record into its account task
//! 3. A successful task calls `rotate()` on its own record
//! 4. Records are moved back and `CredentialStore::save()` writes them atomically
//!
//! Callers that load, dispatch and save a file-backed store hold a
//! [`StoreLock`] across the whole cycle so concurrent batches cannot overwrite
//! each other's rotations.

pub mod credentials;
pub mod error;
pub mod lock;
pub mod medium;
pub mod rotation;

pub use credentials::{CredentialRecord, CredentialStore};
pub use error::{Error, Result};
pub use lock::StoreLock;
pub use medium::{JsonFileMedium, MemoryMedium, StoreMedium};
pub use rotation::{SECRET_ENTROPY_BYTES, generate_secret, rotate};
