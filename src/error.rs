//! Error types for the WebSocket engine.
//!
//! Every fallible operation in the crate returns [`Result`]. The event loop
//! decides per variant whether a failure tears down a single connection or
//! ends the loop.

use thiserror::Error;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving WebSocket connections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Declared payload length exceeds the configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared payload length.
        size: u64,
        /// Maximum allowed payload length.
        max: usize,
    },

    /// Invalid UTF-8 in text frame.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// A request line or header line did not match its pattern.
    ///
    /// The socket is closed without a response.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The request parsed but is not a WebSocket upgrade.
    ///
    /// The socket receives `400 Bad Request` before it is closed.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake request exceeded the configured size limit.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Actual request size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Header value contains characters that would split the response.
    #[error("Invalid header value for {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// What is wrong with the value.
        reason: String,
    },

    /// The peer closed the connection, or the connection is no longer live.
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// The readiness multiplexer failed. Fatal for the event loop.
    #[error("Multiplexer failure: {0}")]
    Multiplexer(String),

    /// Invalid construction-time configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the handshake acceptor must answer this error with `400 Bad Request`.
    #[must_use]
    pub const fn wants_bad_request(&self) -> bool {
        matches!(self, Error::InvalidHandshake(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(err: nix::errno::Errno) -> Self {
        Error::Multiplexer(err.desc().to_string())
    }
}
