//! Fluent construction of payloads carrying composite metadata.

use bytes::{Bytes, BytesMut};
use reflux_metadata::{MimeType, WellKnownMimeType, append_entry, encode_mime_type_header, encode_route};

use crate::error::Result;
use crate::payload::Payload;

#[derive(Clone, Debug)]
enum Entry {
    Route(String),
    ContentType(WellKnownMimeType),
    Raw(MimeType, Bytes),
}

/// Builds a [`Payload`] whose metadata is a composite of routing, mime-type
/// and arbitrary entries, in the order they were added.
///
/// Entries are only validated by [`build`](Self::build).
#[derive(Clone, Debug, Default)]
pub struct CompositeMessageBuilder {
    data: Option<Bytes>,
    entries: Vec<Entry>,
}

impl CompositeMessageBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the payload data, replacing any previous data.
    #[must_use]
    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Add a routing entry with a single route tag.
    #[must_use]
    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.entries.push(Entry::Route(route.into()));
        self
    }

    /// Add a mime-type entry declaring the data's content type.
    #[must_use]
    pub fn mime_type(mut self, mime: WellKnownMimeType) -> Self {
        self.entries.push(Entry::ContentType(mime));
        self
    }

    /// Add an entry with arbitrary content.
    #[must_use]
    pub fn entry(mut self, mime: impl Into<MimeType>, content: impl Into<Bytes>) -> Self {
        self.entries.push(Entry::Raw(mime.into(), content.into()));
        self
    }

    /// Add an entry tagged with a mime string; well-known names are
    /// abbreviated to their identifier.
    #[must_use]
    pub fn custom_entry(self, mime: &str, content: impl Into<Bytes>) -> Self {
        self.entry(MimeType::parse(mime), content)
    }

    /// Encode the metadata and produce the payload.
    ///
    /// Metadata is absent when no entry was added.
    ///
    /// # Errors
    ///
    /// Fails if a route tag or entry is too long, or a mime type cannot be
    /// written.
    pub fn build(self) -> Result<Payload> {
        let metadata = if self.entries.is_empty() {
            None
        } else {
            let mut buf = BytesMut::new();
            for entry in &self.entries {
                match entry {
                    Entry::Route(route) => append_entry(
                        &mut buf,
                        &MimeType::WellKnown(WellKnownMimeType::MessageRSocketRouting),
                        &encode_route(route)?,
                    )?,
                    Entry::ContentType(mime) => append_entry(
                        &mut buf,
                        &MimeType::WellKnown(WellKnownMimeType::MessageRSocketMimeType),
                        &encode_mime_type_header(*mime),
                    )?,
                    Entry::Raw(mime, content) => append_entry(&mut buf, mime, content)?,
                }
            }
            Some(buf.freeze())
        };

        Ok(Payload::new(self.data, metadata))
    }
}
