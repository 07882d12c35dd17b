//! Capability interfaces for the external platform
//!
//! Defines the `Authenticator`, `Uploader` and `Fetcher` traits that decouple
//! the orchestration engines from the platform's login/upload protocol and
//! from whatever tool downloads resources. The engines only see success or
//! failure; fakes implementing these traits drive the engine tests.
//!
//! `command` provides the production implementations, which run configured
//! external programs and treat a non-zero exit as failure.

pub mod command;

pub use command::{
    ACCOUNT_SECRET_ENV, CommandAuthenticator, CommandFetcher, CommandUploader, ExternalCommand,
    NoopAuthenticator,
};

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use credential_store::CredentialRecord;
use serde::{Deserialize, Serialize};

/// Parameters shared by every account in one batch dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParams {
    /// Video file path or URL to upload
    pub resource: String,
    /// Post title / caption
    pub title: String,
    /// Free-form upload switches (visibility, comment, duet, proxy, ...)
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Errors from capability calls. The engines record these as per-item
/// failures; they never abort a batch.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("failed to launch {program}: {message}")]
    Launch { program: String, message: String },

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} timed out after {secs}s")]
    TimedOut { program: String, secs: u64 },
}

/// Result alias for capability calls.
pub type Result<T> = std::result::Result<T, CapabilityError>;

/// Establishes a session for an account before its operation runs.
pub trait Authenticator: Send + Sync {
    /// Identifier for logging (e.g. "command", "noop")
    fn id(&self) -> &str;

    fn authenticate<'a>(
        &'a self,
        account: &'a CredentialRecord,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Performs the batch operation for one authenticated account.
pub trait Uploader: Send + Sync {
    fn id(&self) -> &str;

    fn upload<'a>(
        &'a self,
        account: &'a CredentialRecord,
        params: &'a TaskParams,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Retrieves one external resource into `output_dir`.
pub trait Fetcher: Send + Sync {
    fn id(&self) -> &str;

    fn fetch<'a>(
        &'a self,
        resource: &'a str,
        output_dir: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_params_options_default_to_empty() {
        let params: TaskParams =
            serde_json::from_str(r#"{"resource": "clip.mp4", "title": "hello"}"#).unwrap();
        assert_eq!(params.resource, "clip.mp4");
        assert!(params.options.is_empty());
    }

    #[test]
    fn command_failed_display_includes_program_and_stderr() {
        let err = CapabilityError::CommandFailed {
            program: "twitch-dl".into(),
            status: "exit status: 1".into(),
            stderr: "clip not found".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("twitch-dl"), "got: {msg}");
        assert!(msg.contains("clip not found"), "got: {msg}");
    }
}
