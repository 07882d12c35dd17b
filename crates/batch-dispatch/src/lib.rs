//! Concurrent batch dispatch across every account in a credential store
//!
//! Runs one operation (authenticate, then upload) for every account at once.
//! Each account's task owns its record for the duration of the run, so no
//! lock is held while tasks execute; the store is written exactly once after
//! every task has been joined.
//!
//! Per-account lifecycle:
//! 1. Record is moved out of the store into its own spawned task
//! 2. Task authenticates, then uploads (strictly in that order)
//! 3. On success the task rotates the record's secret
//! 4. Any failure is recorded as an `AccountTaskFailure`; siblings are unaffected
//! 5. Records are moved back and the store is persisted once for the batch

pub mod dispatcher;
pub mod error;
pub mod report;

pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use report::{AccountOutcome, AccountTaskFailure, DispatchReport};
