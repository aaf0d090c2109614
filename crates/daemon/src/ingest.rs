//! Staging local files for display.
//!
//! A staged file is copied into the temp directory under a fresh upload
//! key and stays there until it is discarded, expires, or is swept as
//! stale. Showing a staged file holds a reference on it for the duration
//! of the upload so the sweep cannot delete it mid-read.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pixoo_core::file_tracker::{FileTracker, PathGuard};
use pixoo_core::upload_store::{new_key, validate_key, UploadData, UploadStore};
use pixoo_core::{CoreError, CoreResult};
use pixoo_device::{FrameUploader, UploadSummary};

pub struct UploadIngest {
    temp_dir: PathBuf,
    uploads: Arc<UploadStore<UploadData>>,
    files: Arc<FileTracker>,
    uploader: Arc<FrameUploader>,
}

impl UploadIngest {
    pub fn new(
        temp_dir: impl Into<PathBuf>,
        uploads: Arc<UploadStore<UploadData>>,
        files: Arc<FileTracker>,
        uploader: Arc<FrameUploader>,
    ) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            uploads,
            files,
            uploader,
        }
    }

    /// Copy `source` into the temp directory and return its upload key.
    pub fn stage(&self, source: &Path) -> CoreResult<String> {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CoreError::Validation(format!("'{}' is not a file", source.display())))?;

        std::fs::create_dir_all(&self.temp_dir)?;
        let key = new_key();
        let staged = self.temp_dir.join(format!("{key}_{file_name}"));
        std::fs::copy(source, &staged)?;

        // Register the file so the stale sweep knows when it was last used.
        self.files.acquire(&staged);
        self.files.release(&staged);

        let mut data = UploadData {
            path: Some(staged.clone()),
            ..Default::default()
        };
        data.metadata
            .insert("original_name".into(), file_name.clone().into());
        self.uploads.insert(key.clone(), data);

        tracing::info!(key = %key, file = %file_name, "Staged upload");
        Ok(key)
    }

    /// Send the staged file under `key` to the device.
    pub async fn show(&self, key: &str, speed: Option<u32>) -> CoreResult<UploadSummary> {
        validate_key(key)?;
        let path = self
            .uploads
            .get(key)
            .and_then(|data| data.converted_path.or(data.path))
            .ok_or_else(|| CoreError::Validation(format!("Upload '{key}' not found or expired")))?;

        let guard = PathGuard::new(Arc::clone(&self.files), path);
        self.uploader.upload_gif(guard.path(), speed, None).await
    }

    /// Drop a staged upload and delete its files.
    pub fn discard(&self, key: &str) -> bool {
        self.uploads.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use pixoo_device::http::HttpTransport;
    use pixoo_device::{ConnectionConfig, DeviceConnection};

    use super::*;

    fn ingest(temp_dir: &Path) -> (UploadIngest, Arc<UploadStore<UploadData>>) {
        let files = Arc::new(FileTracker::new());
        let uploads = Arc::new(UploadStore::new(
            "staged",
            Duration::from_secs(3600),
            Arc::clone(&files),
        ));
        let connection = Arc::new(DeviceConnection::new(
            Arc::new(HttpTransport::new()),
            ConnectionConfig::default(),
        ));
        let uploader = Arc::new(FrameUploader::new(connection));
        (
            UploadIngest::new(temp_dir, Arc::clone(&uploads), files, uploader),
            uploads,
        )
    }

    #[test]
    fn stage_copies_and_discard_deletes() {
        let source_dir = tempfile::tempdir().expect("tempdir");
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let source = source_dir.path().join("cat.gif");
        std::fs::write(&source, b"GIF89a").unwrap();

        let (ingest, uploads) = ingest(temp_dir.path());
        let key = ingest.stage(&source).unwrap();
        assert!(validate_key(&key).is_ok());

        let staged = uploads.get(&key).unwrap().path.unwrap();
        assert!(staged.starts_with(temp_dir.path()));
        assert!(staged.is_file());
        assert!(source.is_file());

        assert!(ingest.discard(&key));
        assert!(!staged.exists());
        assert!(!ingest.discard(&key));
    }

    #[tokio::test]
    async fn show_rejects_unknown_keys() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let (ingest, _) = ingest(temp_dir.path());

        assert_matches!(ingest.show("../etc", None).await, Err(CoreError::Validation(_)));
        assert_matches!(ingest.show("deadbeef", None).await, Err(CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn show_requires_a_connected_device() {
        let source_dir = tempfile::tempdir().expect("tempdir");
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let source = source_dir.path().join("cat.gif");
        std::fs::write(&source, b"GIF89a").unwrap();

        let (ingest, _) = ingest(temp_dir.path());
        let key = ingest.stage(&source).unwrap();
        assert_matches!(ingest.show(&key, None).await, Err(CoreError::Connection(_)));
    }
}
