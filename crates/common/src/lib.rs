//! Common types for batchcast

mod error;
pub mod fs;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
