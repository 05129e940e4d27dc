//! Error types for framewire.

use thiserror::Error;

/// Main error type for all framewire operations.
#[derive(Debug, Error)]
pub enum FramewireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Header length outside the supported widths (1, 2, 4, 8).
    #[error("Opt.header_length error: unsupported header length {0}")]
    InvalidHeaderLength(u8),

    /// Payload longer than the configured maximum.
    #[error("Package length {len} exceeds upper limit {max}")]
    PayloadTooLarge {
        /// Offending payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Malformed message on the stream.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A push encoded nothing into its context.
    #[error("Push for protocol {0} wrote an empty payload")]
    EmptyPayload(u16),

    /// An object of this type is already attached to the connection.
    #[error("Object has been registered: {0}")]
    DuplicateAttachment(&'static str),

    /// A handler is already registered for this protocol id.
    #[error("Protocol id {0} is already registered")]
    DuplicateProtocol(u16),

    /// The connection's outbound queue is gone.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Error returned by a handler's `execute`.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Panic caught while dispatching a message.
    #[error("{0}")]
    Panic(String),

    /// Invalid or unreadable configuration.
    #[error("Config error: {0}")]
    Config(String),
}

impl FramewireError {
    /// Shorthand for a handler failure carrying a message.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

/// Result type alias using FramewireError.
pub type Result<T> = std::result::Result<T, FramewireError>;
