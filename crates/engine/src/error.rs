//! Error types for the interaction engine.

use std::time::Duration;

use reflux_transport::TransportError;
use thiserror::Error;

use crate::frame::{ErrorCode, StreamId};

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for engine operations.
///
/// `Clone` so the same error can be delivered to a subscriber and kept in
/// the interaction's outcome.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Connection-related errors.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Protocol-level errors.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error signalled by the remote application (or returned by a local handler).
    #[error("Application error {code}: {message}")]
    Application {
        /// Wire error code.
        code: ErrorCode,
        /// Human-readable message.
        message: String,
    },

    /// The local caller misused an interaction.
    #[error("Contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),

    /// Metadata could not be encoded or decoded.
    #[error("Metadata error: {0}")]
    Metadata(#[from] reflux_metadata::Error),
}

impl Error {
    /// An `APPLICATION_ERROR` with `message`.
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            code: ErrorCode::APPLICATION_ERROR,
            message: message.into(),
        }
    }

    /// A `REJECTED` error with `message`.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Application {
            code: ErrorCode::REJECTED,
            message: message.into(),
        }
    }

    /// Maps an ERROR frame received on a stream.
    #[must_use]
    pub fn from_frame(code: ErrorCode, message: String) -> Self {
        if code.is_connection_level() {
            ConnectionError::Rejected { code, message }.into()
        } else {
            Self::Application { code, message }
        }
    }

    /// The code used when this error is sent to the peer.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Application { code, .. } => *code,
            Self::Connection(_) => ErrorCode::CONNECTION_ERROR,
            Self::Protocol(_) | Self::ContractViolation(_) | Self::Metadata(_) => {
                ErrorCode::INVALID
            }
        }
    }

    /// Message sent to the peer alongside [`Error::error_code`].
    #[must_use]
    pub fn wire_message(&self) -> String {
        match self {
            Self::Application { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Self::Connection(err.into())
    }
}

/// Connection-specific errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The transport failed.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Connection closed, locally or by the peer.
    #[error("Connection closed")]
    Closed,

    /// Nothing was received within the connection lifetime.
    #[error("No frame received within {0:?}")]
    KeepAliveTimeout(Duration),

    /// The peer refused the setup or closed the connection with an error.
    #[error("Rejected by peer ({code}): {message}")]
    Rejected {
        /// Wire error code.
        code: ErrorCode,
        /// Human-readable message.
        message: String,
    },

    /// Every stream id of this side's parity is in use.
    #[error("Stream ids exhausted")]
    StreamIdsExhausted,
}

impl From<TransportError> for ConnectionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectionClosed => Self::Closed,
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Protocol-level errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A frame ended before its fields did.
    #[error("Truncated {frame}: needed {needed} bytes, got {available}")]
    Truncated {
        /// What was being decoded.
        frame: &'static str,
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// Unknown frame type without the ignore flag.
    #[error("Unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    /// Frame type not valid on this stream id.
    #[error("Frame {frame} not valid on stream {stream_id}")]
    InvalidStreamId {
        /// Frame type name.
        frame: &'static str,
        /// Offending stream id.
        stream_id: StreamId,
    },

    /// Metadata longer than its 24-bit length field allows.
    #[error("Metadata of {0} bytes does not fit in a frame")]
    MetadataTooLarge(usize),

    /// A mime type string in SETUP is not ASCII or too long.
    #[error("Invalid mime type in setup: {0}")]
    InvalidMimeType(String),

    /// A feature this engine does not implement.
    #[error("Unsupported: {0}")]
    Unsupported(&'static str),

    /// REQUEST_N (or an initial request n) of zero.
    #[error("Request n must be positive")]
    ZeroRequestN,

    /// The peer sent more messages than it was granted.
    #[error("Peer exceeded granted credit")]
    CreditExceeded,

    /// A frame that the interaction's state does not allow.
    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),
}

/// Misuse of an interaction by the local caller.
///
/// Returned synchronously; the interaction is left unchanged.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ContractViolation {
    /// A request-response interaction already sent its request.
    #[error("request already sent")]
    AlreadyRequested,

    /// The channel was already opened.
    #[error("channel already opened")]
    AlreadyOpened,

    /// The channel has not been opened yet.
    #[error("channel not opened")]
    NotOpened,

    /// Request n must be at least 1.
    #[error("request n must be at least 1")]
    ZeroRequestN,

    /// Sending on a direction that is terminal or already completing.
    #[error("outbound direction is closed")]
    OutboundClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_frame() {
        assert!(matches!(
            Error::from_frame(ErrorCode::REJECTED_SETUP, "nope".into()),
            Error::Connection(ConnectionError::Rejected { .. })
        ));
        assert_eq!(
            Error::from_frame(ErrorCode::APPLICATION_ERROR, "boom".into()),
            Error::application("boom")
        );
    }

    #[test]
    fn test_wire_mapping() {
        let err = Error::rejected("busy");
        assert_eq!(err.error_code(), ErrorCode::REJECTED);
        assert_eq!(err.wire_message(), "busy");

        let err = Error::from(ContractViolation::ZeroRequestN);
        assert_eq!(err.error_code(), ErrorCode::INVALID);
    }

    #[test]
    fn test_transport_errors() {
        assert_eq!(
            Error::from(TransportError::ConnectionClosed),
            Error::Connection(ConnectionError::Closed)
        );
        assert!(matches!(
            Error::from(TransportError::ConnectionFailed("refused".into())),
            Error::Connection(ConnectionError::Transport(_))
        ));
    }
}
