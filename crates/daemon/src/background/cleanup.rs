//! Periodic sweep of temporary upload resources.
//!
//! Expires staged upload entries past their TTL and deletes tracked files
//! that have been unreferenced for longer than the TTL. Runs on a fixed
//! interval using `tokio::time::interval`.

use std::sync::Arc;
use std::time::Duration;

use pixoo_core::file_tracker::{cleanup_files, FileTracker};
use pixoo_core::upload_store::{UploadData, UploadStore};
use tokio_util::sync::CancellationToken;

/// Run one sweep. Returns `(expired_entries, deleted_files)`.
pub fn sweep(
    uploads: &UploadStore<UploadData>,
    files: &FileTracker,
    ttl: Duration,
) -> (usize, usize) {
    let expired = uploads.cleanup_expired();
    let stale = files.get_stale_files(ttl);
    let deleted = if stale.is_empty() {
        0
    } else {
        cleanup_files(files, &stale)
    };
    (expired, deleted)
}

/// Run the cleanup loop until `cancel` is triggered.
pub async fn run(
    uploads: Arc<UploadStore<UploadData>>,
    files: Arc<FileTracker>,
    every: Duration,
    cancel: CancellationToken,
) {
    let ttl = uploads.ttl();
    tracing::info!(
        interval_secs = every.as_secs(),
        ttl_secs = ttl.as_secs(),
        "Temp cleanup job started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Temp cleanup job stopping");
                break;
            }
            _ = interval.tick() => {
                let (expired, deleted) = sweep(&uploads, &files, ttl);
                if expired + deleted > 0 {
                    tracing::info!(expired, deleted, "Temp cleanup: removed stale resources");
                } else {
                    tracing::debug!("Temp cleanup: nothing to remove");
                }
            }
        }
    }
}
