//! Per-resource sidecar records
//!
//! Sidecars are named `<stem>-<hash8>.json`: `stem` is the sanitized last
//! path segment of the resource and `hash8` the first 8 hex digits of its
//! SHA-256, so two clips sharing a final segment never overwrite each other.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::pool::FetchResult;

/// Longest stem kept from the resource's last path segment.
const MAX_STEM_LEN: usize = 64;

/// Location of the sidecar record for `resource` inside `output_dir`.
pub fn sidecar_path(output_dir: &Path, resource: &str) -> PathBuf {
    output_dir.join(format!("{}-{}.json", stem(resource), short_hash(resource)))
}

/// Write the sidecar for `result` atomically. Returns its path.
pub(crate) async fn write(output_dir: &Path, result: &FetchResult) -> std::io::Result<PathBuf> {
    let path = sidecar_path(output_dir, &result.resource);
    let json = serde_json::to_vec_pretty(result).map_err(std::io::Error::other)?;
    common::fs::write_atomic(&path, &json, false).await?;
    Ok(path)
}

fn stem(resource: &str) -> String {
    let without_query = resource.split(['?', '#']).next().unwrap_or(resource);
    let last = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");

    let sanitized: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN)
        .collect();
    let sanitized = sanitized.trim_matches('.').to_string();

    if sanitized.is_empty() {
        "resource".into()
    } else {
        sanitized
    }
}

fn short_hash(resource: &str) -> String {
    Sha256::digest(resource.as_bytes())
        .iter()
        .take(4)
        .map(|b| format!("{b:02x}"))
        .collect()
}
