/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4156 \"AV\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

/// Errors from envelope encoding, decoding and links.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A message does not have the shape its channel requires.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The number of out-of-band buffers does not match the message.
    #[error("message references {expected} buffers, {received} received")]
    BufferCount { expected: usize, received: usize },

    /// A value cannot be represented on the wire.
    #[error("unencodable value: {0}")]
    Unencodable(String),

    /// The other side of the link is gone.
    #[error("link closed")]
    Closed,

    /// The pending table no longer accepts calls.
    #[error("terminated")]
    Terminated,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
