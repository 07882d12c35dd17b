//! Atomic file persistence
//!
//! Every durable file in batchcast (credential stores, scheduler state, fetch
//! sidecars) is written through [`write_atomic`] so a crash mid-write never
//! leaves a truncated file behind.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Distinguishes temp files from concurrent writers in the same process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `contents` to `path` atomically.
///
/// Writes to a temporary file in the same directory, syncs it, then renames
/// it over the target. When `private` is set the temp file is created with
/// mode 0600 (unix only) since it holds account secrets.
pub async fn write_atomic(path: &Path, contents: &[u8], private: bool) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "batchcast".into());

    let tmp_path = dir.join(format!(
        ".{file_name}.tmp.{}.{}",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    if let Err(e) = write_synced(&tmp_path, contents, private).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }

    debug!(path = %path.display(), bytes = contents.len(), "file written atomically");
    Ok(())
}

async fn write_synced(tmp_path: &Path, contents: &[u8], private: bool) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        if private {
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(tmp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}
