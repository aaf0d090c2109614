//! Where rotation items end up.

use std::path::Path;

use async_trait::async_trait;
use pixoo_core::CoreResult;
use pixoo_device::{FrameUploader, UploadSummary};

/// The device as seen by the rotation loop.
#[async_trait]
pub trait RotationDisplay: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// Upload the file at `path` and show it.
    async fn show(&self, path: &Path) -> CoreResult<UploadSummary>;
}

#[async_trait]
impl RotationDisplay for FrameUploader {
    async fn is_connected(&self) -> bool {
        self.connection().is_connected().await
    }

    async fn show(&self, path: &Path) -> CoreResult<UploadSummary> {
        self.upload_gif(path, None, None).await
    }
}
