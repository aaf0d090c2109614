//! Display geometry, upload limits and wire-protocol constants.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Edge length of the square display, in pixels.
pub const DISPLAY_SIZE: u32 = 64;

/// Bytes per pixel in a frame payload (packed RGB).
pub const BYTES_PER_PIXEL: usize = 3;

/// Exact length of one decoded frame payload.
pub const FRAME_BYTES: usize = (DISPLAY_SIZE * DISPLAY_SIZE) as usize * BYTES_PER_PIXEL;

// ---------------------------------------------------------------------------
// Upload limits
// ---------------------------------------------------------------------------

/// Maximum number of frames the device accepts in one upload sequence.
pub const MAX_UPLOAD_FRAMES: usize = 40;

/// Lower bound for the animation speed derived from source durations.
pub const MIN_FRAME_SPEED_MS: u32 = 50;

/// Duration assumed for frames whose source carries none.
pub const DEFAULT_FRAME_DURATION_MS: u32 = 100;

/// Speed sent with single still frames (the device ignores it).
pub const STILL_FRAME_SPEED_MS: u32 = 1000;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// TCP port the device listens on.
pub const DEVICE_PORT: u16 = 80;

/// HTTP path every command is POSTed to.
pub const DEVICE_PATH: &str = "/post";

/// mDNS service type the device advertises.
pub const MDNS_SERVICE_TYPE: &str = "_pixoo._tcp.local.";

/// Timeout for the handshake performed by `connect`.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-attempt timeout for ordinary commands.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Default number of attempts for ordinary commands.
pub const COMMAND_MAX_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// Command names
// ---------------------------------------------------------------------------

/// Handshake / status query.
pub const CMD_GET_INDEX: &str = "Channel/GetIndex";
/// Reset the animation buffer before a fresh frame sequence.
pub const CMD_RESET_GIF: &str = "Draw/ResetHttpGifId";
/// Push one animation frame.
pub const CMD_SEND_GIF: &str = "Draw/SendHttpGif";
/// Draw a scrolling text overlay.
pub const CMD_SEND_TEXT: &str = "Draw/SendHttpText";
/// Clear every text overlay from the display.
pub const CMD_CLEAR_TEXT: &str = "Draw/ClearHttpText";
