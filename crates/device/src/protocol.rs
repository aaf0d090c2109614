//! Wire format of the device's HTTP command protocol.
//!
//! Every request is a JSON object POSTed to `/post` with a `Command` field
//! naming the operation; every response carries an `error_code` where `0`
//! means success.

use pixoo_core::device::{
    CMD_CLEAR_TEXT, CMD_GET_INDEX, CMD_RESET_GIF, CMD_SEND_GIF, CMD_SEND_TEXT,
};
use serde::{Deserialize, Serialize};

/// One animation frame inside an upload sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GifFrame {
    /// Total number of frames in the sequence.
    #[serde(rename = "PicNum")]
    pub total: usize,
    /// Zero-based index of this frame.
    #[serde(rename = "PicOffset")]
    pub offset: usize,
    #[serde(rename = "PicWidth")]
    pub width: u32,
    /// Milliseconds each frame stays on screen.
    #[serde(rename = "PicSpeed")]
    pub speed_ms: u32,
    /// Base64 of exactly `width * width * 3` row-major RGB bytes.
    #[serde(rename = "PicData")]
    pub data: String,
}

/// A scrolling text overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextOverlay {
    #[serde(rename = "TextId")]
    pub text_id: u8,
    pub x: u8,
    pub y: u8,
    /// Scroll direction; 0 scrolls left.
    pub dir: u8,
    pub font: u8,
    #[serde(rename = "TextWidth")]
    pub width: u32,
    #[serde(rename = "TextString")]
    pub text: String,
    pub speed: u32,
    /// `#RRGGBB`.
    pub color: String,
    pub align: u8,
}

/// Every command this client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "Command")]
pub enum DeviceCommand {
    /// Handshake / status query.
    #[serde(rename = "Channel/GetIndex")]
    GetIndex,
    /// Reset the animation buffer; must precede a fresh frame sequence.
    #[serde(rename = "Draw/ResetHttpGifId")]
    ResetGif,
    #[serde(rename = "Draw/SendHttpGif")]
    SendGif(GifFrame),
    #[serde(rename = "Draw/SendHttpText")]
    SendText(TextOverlay),
    /// Clear every text overlay.
    #[serde(rename = "Draw/ClearHttpText")]
    ClearText,
}

impl DeviceCommand {
    /// Wire name of the command, for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::GetIndex => CMD_GET_INDEX,
            DeviceCommand::ResetGif => CMD_RESET_GIF,
            DeviceCommand::SendGif(_) => CMD_SEND_GIF,
            DeviceCommand::SendText(_) => CMD_SEND_TEXT,
            DeviceCommand::ClearText => CMD_CLEAR_TEXT,
        }
    }
}

/// Response envelope returned by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceResponse {
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DeviceResponse {
    /// A bare `{"error_code": 0}` response.
    pub fn ok() -> Self {
        Self::with_code(0)
    }

    pub fn with_code(code: i64) -> Self {
        Self {
            error_code: Some(code),
            extra: serde_json::Map::new(),
        }
    }

    /// Whether the device reported success. A missing `error_code` is
    /// treated as success for ordinary commands.
    pub fn is_success(&self) -> bool {
        self.error_code.unwrap_or(0) == 0
    }

    /// Stricter check used to verify a candidate address: the envelope must
    /// carry an explicit `error_code` of `0`.
    pub fn is_verified(&self) -> bool {
        self.error_code == Some(0)
    }
}
