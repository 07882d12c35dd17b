//! Durable media for credential stores
//!
//! A medium loads and saves the whole record set at once. `JsonFileMedium`
//! is the production backend; `MemoryMedium` keeps records in memory and
//! counts saves so callers can assert the once-per-batch persist.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::info;

use crate::credentials::CredentialRecord;
use crate::error::{Error, Result};

/// Load-all / save-all backend for a credential store.
///
/// Uses `Pin<Box<dyn Future>>` return types so a medium can be shared as
/// `&dyn StoreMedium` or `Arc<dyn StoreMedium>`.
pub trait StoreMedium: Send + Sync {
    /// Human-readable location for logs and errors.
    fn location(&self) -> String;

    /// Read every record. A missing source returns an empty list.
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Vec<CredentialRecord>>> + Send + '_>>;

    /// Replace the stored records with `records` as one atomic unit.
    fn save<'a>(
        &'a self,
        records: &'a [CredentialRecord],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// JSON array of records in a single file.
///
/// Writes go through `common::fs::write_atomic` with 0600 permissions since
/// the file holds account secrets.
#[derive(Debug, Clone)]
pub struct JsonFileMedium {
    path: PathBuf,
}

impl JsonFileMedium {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreMedium for JsonFileMedium {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Vec<CredentialRecord>>> + Send + '_>> {
        Box::pin(async move {
            let contents = match tokio::fs::read_to_string(&self.path).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!(
                        path = %self.path.display(),
                        "credential file not found, starting with empty store"
                    );
                    return Ok(Vec::new());
                }
                Err(e) => {
                    return Err(Error::Io {
                        location: self.location(),
                        reason: format!("reading credential file: {e}"),
                    });
                }
            };

            serde_json::from_str(&contents).map_err(|e| Error::CorruptStore {
                location: self.location(),
                reason: format!("parsing credential file: {e}"),
            })
        })
    }

    fn save<'a>(
        &'a self,
        records: &'a [CredentialRecord],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let json = serde_json::to_string_pretty(records)
                .map_err(|e| Error::Serialize(e.to_string()))?;
            common::fs::write_atomic(&self.path, json.as_bytes(), true)
                .await
                .map_err(|e| Error::Io {
                    location: self.location(),
                    reason: format!("writing credential file: {e}"),
                })
        })
    }
}

/// In-memory medium that counts saves.
///
/// `None` contents behave like a missing file. Saves can be forced to fail
/// to exercise persistence-failure paths.
#[derive(Debug, Default)]
pub struct MemoryMedium {
    contents: Mutex<Option<Vec<CredentialRecord>>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryMedium {
    /// A medium with no stored records (a "missing source").
    pub fn new() -> Self {
        Self::default()
    }

    /// A medium pre-populated with `records`.
    pub fn with_records(records: Vec<CredentialRecord>) -> Self {
        Self {
            contents: Mutex::new(Some(records)),
            ..Self::default()
        }
    }

    /// Number of successful saves so far.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Records as last saved, or as seeded.
    pub fn snapshot(&self) -> Option<Vec<CredentialRecord>> {
        self.contents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Make every subsequent save fail with an I/O error.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl StoreMedium for MemoryMedium {
    fn location(&self) -> String {
        "memory".into()
    }

    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Vec<CredentialRecord>>> + Send + '_>> {
        Box::pin(async move { Ok(self.snapshot().unwrap_or_default()) })
    }

    fn save<'a>(
        &'a self,
        records: &'a [CredentialRecord],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(Error::Io {
                    location: self.location(),
                    reason: "save rejected".into(),
                });
            }
            *self
                .contents
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(records.to_vec());
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn corrupt_file_is_distinguishable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        tokio::fs::write(&path, "not json {{{").await.unwrap();

        let err = JsonFileMedium::new(&path).load().await.unwrap_err();
        assert!(matches!(err, Error::CorruptStore { .. }), "got: {err:?}");
        assert!(err.to_string().contains("accounts.json"));
    }

    #[tokio::test]
    async fn reads_legacy_username_password_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        tokio::fs::write(
            &path,
            r#"[{"username": "creator_one", "password": "pw1"},
                {"username": "creator_two", "password": "pw2"}]"#,
        )
        .await
        .unwrap();

        let records = JsonFileMedium::new(&path).load().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].identifier(), "creator_one");
        assert_eq!(records[1].secret().expose(), "pw2");
        assert!(records[0].last_rotated_at().is_none());
    }

    #[tokio::test]
    async fn save_writes_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let medium = JsonFileMedium::new(&path);

        medium
            .save(&[CredentialRecord::new("acct-1", "pw_1")])
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed[0]["identifier"], "acct-1");
        assert_eq!(parsed[0]["secret"], "pw_1");
        assert!(parsed[0]["last_rotated_at"].is_null());
    }

    #[tokio::test]
    async fn save_into_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let medium = JsonFileMedium::new(dir.path().join("gone").join("accounts.json"));

        let err = medium.save(&[]).await.unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn memory_medium_counts_saves_and_can_fail() {
        let medium = MemoryMedium::new();
        assert!(medium.load().await.unwrap().is_empty());

        medium.save(&[]).await.unwrap();
        medium.save(&[]).await.unwrap();
        assert_eq!(medium.saves(), 2);

        medium.fail_saves(true);
        assert!(medium.save(&[]).await.is_err());
        assert_eq!(medium.saves(), 2);
    }
}
