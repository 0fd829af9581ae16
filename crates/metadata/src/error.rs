use thiserror::Error;

/// Result type alias for metadata operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while encoding or decoding metadata.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    /// The mime type is neither well-known nor usable as a literal string.
    #[error("unresolvable mime type: {0}")]
    UnresolvableMimeType(String),

    /// An entry payload does not fit in the 24-bit length field.
    #[error("metadata entry of {size} bytes exceeds maximum {max}")]
    EntryTooLarge {
        /// Size of the rejected entry.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A route tag is empty or longer than 255 bytes.
    #[error("invalid route tag: {0}")]
    InvalidRouteTag(String),

    /// A well-known identifier outside the 7-bit range.
    #[error("invalid well-known identifier: {0:#04x}")]
    InvalidIdentifier(u8),

    /// The buffer could not be decoded.
    #[error("malformed metadata: {0}")]
    Malformed(String),
}
