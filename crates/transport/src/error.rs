//! Transport error types

use thiserror::Error;

/// Errors raised by transports
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection was closed by either side
    #[error("connection closed")]
    ConnectionClosed,

    /// A connection could not be established
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The address could not be used by this transport
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A frame exceeded the transport's size limit
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the frame
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else
    #[error("{0}")]
    Other(String),
}
