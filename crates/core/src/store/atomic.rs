//! Crash-safe write protocol (spec §4.2): temp file + fsync + atomic rename
//! + best-effort directory sync.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Read and decode a JSON document, returning `Ok(None)` if it does not
/// exist yet (a fresh store).
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::from(err)),
    }
}

/// Replace the document at `path` with `value`, following spec §4.2's
/// write protocol. Steps 1-5 must all succeed for this to return `Ok`;
/// step 6 (directory fsync) is best-effort and never fails the call.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::persistence(false, format!("state file path has no parent directory: {}", path.display()))
    })?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| Error::persistence(false, format!("failed to create {}: {e}", parent.display())))?;

    let encoded = serde_json::to_vec_pretty(value)?;
    let tmp_path = sibling_tmp_path(path);

    if let Err(err) = write_and_sync(&tmp_path, &encoded).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err);
    }

    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Error::persistence(false, format!("failed to rename into place: {err}")));
    }

    // Best-effort directory fsync (step 6): not supported on every
    // platform, and a failure here does not undo an already-committed
    // rename.
    if let Ok(dir) = tokio::fs::File::open(parent).await {
        let _ = dir.sync_all().await;
    }

    Ok(())
}

async fn write_and_sync(tmp_path: &Path, encoded: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(tmp_path)
        .await
        .map_err(|e| Error::persistence(false, format!("failed to create temp file: {e}")))?;
    file.write_all(encoded)
        .await
        .map_err(|e| Error::persistence(false, format!("failed to write temp file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| Error::persistence(false, format!("failed to fsync temp file: {e}")))?;
    Ok(())
}

fn sibling_tmp_path(path: &Path) -> std::path::PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("state");
    let unique = format!(".{file_name}.tmp.{}.{}", std::process::id(), tmp_nonce());
    path.with_file_name(unique)
}

/// A cheap, process-local uniqueness source for temp file names. Does not
/// need to be cryptographically random, only distinct across concurrent
/// writers in this process (the store's own lock already serializes actual
/// writers; this only guards against stale leftovers from a previous crash).
fn tmp_nonce() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
