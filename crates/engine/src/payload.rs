//! Message payloads.

use std::fmt;

use bytes::Bytes;

/// Optional data plus optional metadata.
///
/// Backed by [`Bytes`], so clones share the underlying buffers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    data: Option<Bytes>,
    metadata: Option<Bytes>,
}

impl Payload {
    /// Create a payload from its parts.
    #[must_use]
    pub const fn new(data: Option<Bytes>, metadata: Option<Bytes>) -> Self {
        Self { data, metadata }
    }

    /// Payload carrying only data.
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: Some(data.into()),
            metadata: None,
        }
    }

    /// Payload carrying only metadata.
    pub fn from_metadata(metadata: impl Into<Bytes>) -> Self {
        Self {
            data: None,
            metadata: Some(metadata.into()),
        }
    }

    /// Data bytes, if any.
    #[must_use]
    pub const fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    /// Metadata bytes, if any.
    #[must_use]
    pub const fn metadata(&self) -> Option<&Bytes> {
        self.metadata.as_ref()
    }

    /// Data decoded as (lossy) UTF-8.
    #[must_use]
    pub fn data_utf8(&self) -> Option<String> {
        self.data
            .as_ref()
            .map(|d| String::from_utf8_lossy(d).into_owned())
    }

    /// True when neither data nor metadata is present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_none() && self.metadata.is_none()
    }

    /// Split into `(data, metadata)`.
    #[must_use]
    pub fn into_parts(self) -> (Option<Bytes>, Option<Bytes>) {
        (self.data, self.metadata)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show(bytes: Option<&Bytes>) -> String {
            bytes.map_or_else(
                || "null".to_string(),
                |b| String::from_utf8_lossy(b).into_owned(),
            )
        }

        write!(
            f,
            "payload[data: {}; metadata: {}]",
            show(self.data.as_ref()),
            show(self.metadata.as_ref())
        )
    }
}
