//! Exclusive advisory lock on a credential store file

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Held for one load-dispatch-save cycle on a store file. Released on drop.
///
/// The lock is taken on a `.<name>.lock` file beside the store, since the
/// store itself is replaced by rename on every save.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Wait until no other holder (in this or another process) has the lock.
    pub async fn acquire(store_path: &Path) -> Result<Self> {
        let path = lock_path(store_path);
        let location = store_path.display().to_string();

        let target = path.clone();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&target)?;
            FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(|e| Error::Io {
            location: location.clone(),
            reason: format!("lock task failed: {e}"),
        })?
        .map_err(|e| Error::Io {
            location,
            reason: format!("locking {}: {e}", path.display()),
        })?;

        debug!(lock = %path.display(), "credential store lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(lock = %self.path.display(), "credential store lock released");
    }
}

/// `accounts.json` -> `.accounts.json.lock` in the same directory.
pub fn lock_path(store_path: &Path) -> PathBuf {
    let file_name = store_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "accounts".into());
    store_path.with_file_name(format!(".{file_name}.lock"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn lock_file_sits_beside_the_store() {
        assert_eq!(
            lock_path(Path::new("/var/lib/batchcast/accounts.json")),
            PathBuf::from("/var/lib/batchcast/.accounts.json.lock")
        );
        assert_eq!(
            lock_path(Path::new("accounts.json")),
            PathBuf::from(".accounts.json.lock")
        );
    }

    #[tokio::test]
    async fn second_holder_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("accounts.json");

        let first = StoreLock::acquire(&store).await.unwrap();

        let contender = store.clone();
        let waiter = tokio::spawn(async move { StoreLock::acquire(&contender).await.map(|_| ()) });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!waiter.is_finished(), "lock must still be held by the first holder");

        drop(first);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("second holder should acquire after release")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn locking_does_not_touch_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("accounts.json");

        let lock = StoreLock::acquire(&store).await.unwrap();
        assert!(lock.path().exists());
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("nope").join("accounts.json");

        let err = StoreLock::acquire(&store).await.unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "got {err:?}");
    }
}
