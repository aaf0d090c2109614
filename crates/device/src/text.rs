//! Scrolling text overlays.
//!
//! The device has no notion of a text background, so a solid colour frame is
//! uploaded first when one is requested.

use std::sync::Arc;
use std::time::Duration;

use pixoo_core::device::DISPLAY_SIZE;
use pixoo_core::validation::{parse_hex_color, validate_text_params};
use pixoo_core::CoreResult;
use tokio::sync::Mutex;

use crate::protocol::{DeviceCommand, DeviceResponse, TextOverlay};
use crate::upload::FrameUploader;

/// Text ids cycle through `1..=MAX_TEXT_ID`.
pub const MAX_TEXT_ID: u8 = 20;

/// Pause after uploading a background so the device has drawn it before the
/// overlay arrives.
const BACKGROUND_SETTLE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct TextRequest {
    pub text: String,
    /// `#RRGGBB`.
    pub color: String,
    pub speed_ms: u32,
    pub font: u8,
    pub y: u8,
    /// `#RRGGBB`; black or `None` leaves the current frame underneath.
    pub background: Option<String>,
}

impl TextRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: "#FFFFFF".into(),
            speed_ms: 150,
            font: 0,
            y: 28,
            background: None,
        }
    }
}

pub struct TextSender {
    uploader: Arc<FrameUploader>,
    last_id: Mutex<u8>,
    settle: Duration,
}

impl TextSender {
    pub fn new(uploader: Arc<FrameUploader>) -> Self {
        Self {
            uploader,
            last_id: Mutex::new(0),
            settle: BACKGROUND_SETTLE,
        }
    }

    pub async fn send_text(&self, request: &TextRequest) -> CoreResult<DeviceResponse> {
        validate_text_params(&request.text, request.speed_ms, request.font, request.y)?;
        parse_hex_color(&request.color)?;
        let background = request
            .background
            .as_deref()
            .map(parse_hex_color)
            .transpose()?;

        if let Some(rgb) = background.filter(|rgb| *rgb != [0, 0, 0]) {
            self.uploader.upload_solid_color(rgb).await?;
            tokio::time::sleep(self.settle).await;
        }

        let text_id = {
            let mut last = self.last_id.lock().await;
            *last = *last % MAX_TEXT_ID + 1;
            *last
        };

        let command = DeviceCommand::SendText(TextOverlay {
            text_id,
            x: 0,
            y: request.y,
            dir: 0,
            font: request.font,
            width: DISPLAY_SIZE,
            text: request.text.clone(),
            speed: request.speed_ms,
            color: request.color.to_ascii_uppercase(),
            align: 1,
        });

        tracing::debug!(text_id, chars = request.text.chars().count(), "Sending text overlay");
        self.uploader.connection().send_command(&command).await
    }

    /// Remove every overlay and restart id numbering.
    pub async fn clear_text(&self) -> CoreResult<DeviceResponse> {
        *self.last_id.lock().await = 0;
        self.uploader
            .connection()
            .send_command(&DeviceCommand::ClearText)
            .await
    }
}
