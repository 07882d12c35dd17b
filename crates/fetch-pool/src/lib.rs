//! Bounded-retry concurrent fetch pool
//!
//! Retrieves a fixed set of external resources with a small pool of workers.
//! Every request is queued up front; workers pull one at a time, retry it
//! immediately up to the budget, and record exactly one `FetchResult` per
//! resource, both as a JSON sidecar in the output directory and in the
//! returned collection.

pub mod error;
pub mod pool;
pub mod sidecar;

pub use error::{Error, Result};
pub use pool::{DEFAULT_RETRY_BUDGET, DEFAULT_WORKERS, FetchPool, FetchRequest, FetchResult};
pub use sidecar::sidecar_path;
