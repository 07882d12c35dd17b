//! JSON state file for the job table

use std::collections::HashSet;
use std::path::Path;

use tracing::info;

use crate::error::{Error, Result};
use crate::job::Job;

/// Read the job table. A missing file is an empty table.
pub(crate) async fn load(path: &Path) -> Result<Vec<Job>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no scheduler state file, starting empty");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(Error::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            });
        }
    };

    let jobs: Vec<Job> = serde_json::from_str(&contents).map_err(|e| Error::CorruptState {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut seen = HashSet::new();
    if let Some(dup) = jobs.iter().find(|job| !seen.insert(job.id)) {
        return Err(Error::CorruptState {
            path: path.display().to_string(),
            reason: format!("duplicate job id {}", dup.id),
        });
    }

    info!(path = %path.display(), jobs = jobs.len(), "loaded scheduler state");
    Ok(jobs)
}

/// Replace the state file with `jobs`.
pub(crate) async fn save(path: &Path, jobs: &[&Job]) -> Result<()> {
    let persistence = |reason: String| Error::Persistence {
        path: path.display().to_string(),
        reason,
    };
    let json = serde_json::to_vec_pretty(jobs).map_err(|e| persistence(e.to_string()))?;
    common::fs::write_atomic(path, &json, false)
        .await
        .map_err(|e| persistence(e.to_string()))
}
