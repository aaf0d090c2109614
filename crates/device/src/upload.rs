//! Driving frame sequences onto the device.
//!
//! An upload is always `Draw/ResetHttpGifId` followed by one
//! `Draw/SendHttpGif` per frame, in order. The first failure aborts the
//! sequence; whatever frames already reached the device are not coherent
//! and the next upload starts over with a fresh reset.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, Rgb, RgbImage};
use pixoo_core::device::{DISPLAY_SIZE, MAX_UPLOAD_FRAMES, STILL_FRAME_SPEED_MS};
use pixoo_core::{CoreError, CoreResult};
use serde::Serialize;

use crate::connection::DeviceConnection;
use crate::frames::{average_speed, frame_to_base64, load_frames};
use crate::protocol::{DeviceCommand, GifFrame};

/// Outcome of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub success: bool,
    pub frames_sent: usize,
    pub speed_ms: u32,
}

/// Called with `(frame_number, total)` before each frame is sent;
/// `frame_number` starts at 1.
pub type Progress<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

pub struct FrameUploader {
    connection: Arc<DeviceConnection>,
    max_frames: usize,
}

impl FrameUploader {
    pub fn new(connection: Arc<DeviceConnection>) -> Self {
        Self {
            connection,
            max_frames: MAX_UPLOAD_FRAMES,
        }
    }

    /// Override the frame ceiling.
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn connection(&self) -> &Arc<DeviceConnection> {
        &self.connection
    }

    /// Upload every frame of the file at `path`.
    ///
    /// `speed` defaults to the average of the source's frame durations,
    /// clamped to the device minimum. Sources above the frame ceiling are
    /// rejected before anything is sent.
    pub async fn upload_gif(
        &self,
        path: &Path,
        speed: Option<u32>,
        progress: Option<Progress<'_>>,
    ) -> CoreResult<UploadSummary> {
        if !self.connection.is_connected().await {
            return Err(CoreError::Connection("not connected".into()));
        }

        let (payloads, durations) = prepare(path.to_path_buf(), self.max_frames).await?;
        let speed = speed.unwrap_or_else(|| average_speed(&durations));

        tracing::info!(
            path = %path.display(),
            frames = payloads.len(),
            speed_ms = speed,
            "Uploading animation",
        );

        self.send_sequence(payloads, speed, progress).await
    }

    /// Show a single still frame.
    pub async fn upload_single_frame(&self, image: &DynamicImage) -> CoreResult<UploadSummary> {
        if !self.connection.is_connected().await {
            return Err(CoreError::Connection("not connected".into()));
        }
        self.send_sequence(vec![frame_to_base64(image)], STILL_FRAME_SPEED_MS, None)
            .await
    }

    /// Fill the display with one colour.
    pub async fn upload_solid_color(&self, rgb: [u8; 3]) -> CoreResult<UploadSummary> {
        let image = RgbImage::from_pixel(DISPLAY_SIZE, DISPLAY_SIZE, Rgb(rgb));
        self.upload_single_frame(&DynamicImage::ImageRgb8(image)).await
    }

    async fn send_sequence(
        &self,
        payloads: Vec<String>,
        speed_ms: u32,
        progress: Option<Progress<'_>>,
    ) -> CoreResult<UploadSummary> {
        self.connection
            .send_command(&DeviceCommand::ResetGif)
            .await
            .map_err(|e| CoreError::Upload(format!("failed to reset buffer: {e}")))?;

        let total = payloads.len();
        for (offset, data) in payloads.into_iter().enumerate() {
            if let Some(report) = progress {
                report(offset + 1, total);
            }

            let command = DeviceCommand::SendGif(GifFrame {
                total,
                offset,
                width: DISPLAY_SIZE,
                speed_ms,
                data,
            });

            match self.connection.send_command(&command).await {
                Ok(_) => {}
                Err(e @ CoreError::Connection(_)) => return Err(e),
                Err(e) => {
                    return Err(CoreError::Upload(format!(
                        "frame {}/{total} failed: {e}",
                        offset + 1
                    )))
                }
            }
        }

        Ok(UploadSummary {
            success: true,
            frames_sent: total,
            speed_ms,
        })
    }
}

/// Decode and encode off the async runtime. Returns base64 payloads and the
/// source durations.
async fn prepare(path: PathBuf, max_frames: usize) -> CoreResult<(Vec<String>, Vec<u32>)> {
    tokio::task::spawn_blocking(move || {
        let source = load_frames(&path)?;
        if source.len() > max_frames {
            return Err(CoreError::TooManyFrames {
                frames: source.len(),
                max: max_frames,
            });
        }
        if source.is_empty() {
            return Err(CoreError::Image(format!("{}: no frames", path.display())));
        }
        let payloads = source.frames.iter().map(frame_to_base64).collect();
        Ok((payloads, source.durations_ms))
    })
    .await
    .map_err(|e| CoreError::Image(format!("frame decoding task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use base64::Engine;
    use pixoo_core::device::FRAME_BYTES;

    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::frames::tests::write_gif;
    use crate::protocol::DeviceResponse;
    use crate::test_support::ScriptedTransport;
    use crate::transport::TransportError;

    async fn connected_uploader(transport: &ScriptedTransport) -> FrameUploader {
        let connection = DeviceConnection::new(
            Arc::new(transport.clone()),
            ConnectionConfig::default(),
        );
        connection.connect("10.0.0.5").await.unwrap();
        transport.clear_calls();
        FrameUploader::new(Arc::new(connection))
    }

    fn frames_of(commands: &[DeviceCommand]) -> Vec<&GifFrame> {
        commands
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::SendGif(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn five_frame_upload_uses_average_speed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("five.gif");
        write_gif(&path, 64, &[100, 200, 100, 200, 100]);

        let transport = ScriptedTransport::always_ok();
        let uploader = connected_uploader(&transport).await;

        let summary = uploader.upload_gif(&path, None, None).await.unwrap();
        assert_eq!(
            summary,
            UploadSummary {
                success: true,
                frames_sent: 5,
                speed_ms: 140,
            }
        );

        let commands = transport.commands();
        assert_eq!(commands.len(), 6);
        assert_eq!(commands[0], DeviceCommand::ResetGif);
        for (i, frame) in frames_of(&commands).into_iter().enumerate() {
            assert_eq!(frame.total, 5);
            assert_eq!(frame.offset, i);
            assert_eq!(frame.width, 64);
            assert_eq!(frame.speed_ms, 140);
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&frame.data)
                .unwrap();
            assert_eq!(bytes.len(), FRAME_BYTES);
        }
    }

    #[tokio::test]
    async fn explicit_speed_and_progress() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("three.gif");
        write_gif(&path, 32, &[10, 10, 10]);

        let transport = ScriptedTransport::always_ok();
        let uploader = connected_uploader(&transport).await;

        let seen = Mutex::new(Vec::new());
        let report = |n: usize, total: usize| seen.lock().unwrap().push((n, total));
        let summary = uploader
            .upload_gif(&path, Some(250), Some(&report))
            .await
            .unwrap();

        assert_eq!(summary.speed_ms, 250);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn too_many_frames_sends_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("long.gif");
        write_gif(&path, 8, &[100; 6]);

        let transport = ScriptedTransport::always_ok();
        let uploader = connected_uploader(&transport).await.with_max_frames(5);

        let err = uploader.upload_gif(&path, None, None).await.unwrap_err();
        assert_matches!(err, CoreError::TooManyFrames { frames: 6, max: 5 });
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn upload_requires_connection() {
        let transport = ScriptedTransport::always_ok();
        let connection = DeviceConnection::new(Arc::new(transport.clone()), ConnectionConfig::default());
        let uploader = FrameUploader::new(Arc::new(connection));

        let err = uploader.upload_solid_color([255, 0, 0]).await.unwrap_err();
        assert_matches!(err, CoreError::Connection(_));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn rejected_frame_aborts_with_upload_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("four.gif");
        write_gif(&path, 64, &[100; 4]);

        let transport = ScriptedTransport::new(|_, cmd| match cmd {
            DeviceCommand::SendGif(frame) if frame.offset == 1 => Ok(DeviceResponse::with_code(3)),
            _ => Ok(DeviceResponse::ok()),
        });
        let uploader = connected_uploader(&transport).await;

        let err = uploader.upload_gif(&path, None, None).await.unwrap_err();
        assert_matches!(err, CoreError::Upload(msg) if msg.starts_with("frame 2/4"));
        // Reset plus the first two frames; nothing after the failure.
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn rejected_reset_is_an_upload_error() {
        let transport = ScriptedTransport::new(|_, cmd| match cmd {
            DeviceCommand::ResetGif => Ok(DeviceResponse::with_code(1)),
            _ => Ok(DeviceResponse::ok()),
        });
        let uploader = connected_uploader(&transport).await;

        let err = uploader.upload_solid_color([0, 0, 255]).await.unwrap_err();
        assert_matches!(err, CoreError::Upload(msg) if msg.starts_with("failed to reset buffer"));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_device_mid_sequence_is_a_connection_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("two.gif");
        write_gif(&path, 64, &[100, 100]);

        let transport = ScriptedTransport::new(|_, cmd| match cmd {
            DeviceCommand::SendGif(_) => Err(TransportError::Connect("connection refused".into())),
            _ => Ok(DeviceResponse::ok()),
        });
        let uploader = connected_uploader(&transport).await;

        let err = uploader.upload_gif(&path, None, None).await.unwrap_err();
        assert_matches!(err, CoreError::Connection(_));
        assert!(!uploader.connection().is_connected().await);
    }

    #[tokio::test]
    async fn single_frame_uses_still_speed() {
        let transport = ScriptedTransport::always_ok();
        let uploader = connected_uploader(&transport).await;

        let summary = uploader.upload_solid_color([1, 2, 3]).await.unwrap();
        assert_eq!(summary.frames_sent, 1);
        assert_eq!(summary.speed_ms, 1000);

        let commands = transport.commands();
        let frame = frames_of(&commands)[0];
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&frame.data)
            .unwrap();
        assert_eq!(&bytes[..6], &[1, 2, 3, 1, 2, 3]);
    }
}
