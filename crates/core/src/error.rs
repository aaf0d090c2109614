/// Error taxonomy shared by every device-facing component.
///
/// Each variant is a distinct failure class; callers are expected to match
/// on the kind rather than inspect message text.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The device is unreachable, rejected the handshake, or the session
    /// was lost mid-command.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The source has more frames than the device accepts in one sequence.
    #[error("Too many frames: source has {frames}, device accepts at most {max}")]
    TooManyFrames { frames: usize, max: usize },

    /// The device returned a non-zero status while receiving an upload.
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Malformed input (IP address, interval, item ids, upload keys, ...).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A round-trip completed but the device did not report success
    /// (non-zero `error_code` or a non-200 HTTP status).
    #[error("Device rejected {command}: {detail}")]
    Protocol { command: String, detail: String },

    /// A source file could not be decoded into frames.
    #[error("Image error: {0}")]
    Image(String),

    /// Reading or writing persisted state failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted state could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias used across the workspace.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Whether this error means the device link itself is gone (as opposed
    /// to a bad request or a device-side rejection).
    pub fn is_connection(&self) -> bool {
        matches!(self, CoreError::Connection(_))
    }
}
