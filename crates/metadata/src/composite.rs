//! Composite metadata: an ordered list of mime-tagged entries in one buffer.
//!
//! Wire format of one entry:
//! ```text
//! ┌──────────────────────────────┬───────────────┬──────────────┐
//! │ 1|id (1B)  or  len-1 + mime  │ length (u24)  │ payload      │
//! └──────────────────────────────┴───────────────┴──────────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::header::{WellKnownHeader, decode_well_known_metadata_header};
use crate::mime::{MimeType, WellKnownMimeType};
use crate::routing::decode_routes;

/// Largest payload one entry can carry (24-bit length).
pub const MAX_ENTRY_LENGTH: usize = 0xFF_FFFF;

const WELL_KNOWN_FLAG: u8 = 0x80;

/// One decoded entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MetadataEntry {
    /// Mime type tagging the entry.
    pub mime_type: MimeType,
    /// Raw entry payload.
    pub content: Bytes,
}

impl MetadataEntry {
    /// Creates an entry.
    pub fn new(mime_type: impl Into<MimeType>, content: impl Into<Bytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            content: content.into(),
        }
    }
}

/// Appends one canonically encoded entry to `buf`.
///
/// # Errors
///
/// Returns an error if the mime type cannot be written or the content exceeds
/// [`MAX_ENTRY_LENGTH`]. Nothing is written in that case.
pub fn append_entry(buf: &mut BytesMut, mime_type: &MimeType, content: &[u8]) -> Result<()> {
    mime_type.validate()?;

    if content.len() > MAX_ENTRY_LENGTH {
        return Err(Error::EntryTooLarge {
            size: content.len(),
            max: MAX_ENTRY_LENGTH,
        });
    }

    match mime_type {
        MimeType::WellKnown(mime) => buf.put_u8(WELL_KNOWN_FLAG | mime.identifier()),
        // Names of well-known types are always abbreviated
        MimeType::Custom(mime) => match WellKnownMimeType::from_mime(mime) {
            Some(known) => buf.put_u8(WELL_KNOWN_FLAG | known.identifier()),
            None => {
                // validate() bounds the length to 1..=128
                #[allow(clippy::cast_possible_truncation)]
                buf.put_u8((mime.len() - 1) as u8);
                buf.put_slice(mime.as_bytes());
            }
        },
        MimeType::Unregistered(identifier) => {
            return Err(Error::UnresolvableMimeType(format!("{identifier:#04x}")));
        }
    }

    buf.put_uint(content.len() as u64, 3);
    buf.put_slice(content);

    Ok(())
}

/// Encodes entries, in order, into one composite metadata buffer.
///
/// # Errors
///
/// Fails on the first entry that cannot be encoded; no entry is dropped.
pub fn encode_composite_metadata<I, M, B>(entries: I) -> Result<Bytes>
where
    I: IntoIterator<Item = (M, B)>,
    M: Into<MimeType>,
    B: AsRef<[u8]>,
{
    let mut buf = BytesMut::new();

    for (mime_type, content) in entries {
        append_entry(&mut buf, &mime_type.into(), content.as_ref())?;
    }

    Ok(buf.freeze())
}

/// Decodes a composite metadata buffer into its entries.
///
/// # Errors
///
/// Returns an error if the buffer is truncated or a custom mime string is not
/// ASCII.
pub fn decode_composite_metadata(mut buf: Bytes) -> Result<Vec<MetadataEntry>> {
    let mut entries = Vec::new();

    while buf.has_remaining() {
        let first = buf.get_u8();

        let mime_type = if first & WELL_KNOWN_FLAG == 0 {
            let len = usize::from(first) + 1;
            if buf.remaining() < len {
                return Err(Error::Malformed(format!(
                    "mime string needs {len} bytes, {} remaining",
                    buf.remaining()
                )));
            }

            let raw = buf.split_to(len);
            if !raw.is_ascii() {
                return Err(Error::Malformed("mime string is not ASCII".to_string()));
            }
            // ASCII is valid UTF-8
            MimeType::parse(&String::from_utf8_lossy(&raw))
        } else {
            let identifier = first & !WELL_KNOWN_FLAG;
            WellKnownMimeType::from_identifier(identifier)
                .map_or(MimeType::Unregistered(identifier), MimeType::WellKnown)
        };

        if buf.remaining() < 3 {
            return Err(Error::Malformed("truncated entry length".to_string()));
        }

        #[allow(clippy::cast_possible_truncation)]
        let len = buf.get_uint(3) as usize;
        if buf.remaining() < len {
            return Err(Error::Malformed(format!(
                "entry needs {len} bytes, {} remaining",
                buf.remaining()
            )));
        }

        entries.push(MetadataEntry {
            mime_type,
            content: buf.split_to(len),
        });
    }

    Ok(entries)
}

/// Decoded composite metadata with lookup helpers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CompositeMetadata {
    entries: Vec<MetadataEntry>,
}

impl CompositeMetadata {
    /// Decodes a composite metadata buffer.
    ///
    /// # Errors
    ///
    /// See [`decode_composite_metadata`].
    pub fn decode(buf: Bytes) -> Result<Self> {
        decode_composite_metadata(buf).map(|entries| Self { entries })
    }

    /// All entries, in wire order.
    #[must_use]
    pub fn entries(&self) -> &[MetadataEntry] {
        &self.entries
    }

    /// The first entry tagged with `mime`.
    #[must_use]
    pub fn find(&self, mime: WellKnownMimeType) -> Option<&MetadataEntry> {
        self.entries
            .iter()
            .find(|entry| entry.mime_type.well_known() == Some(mime))
    }

    /// The first route tag of the first routing entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the routing entry is malformed.
    pub fn route(&self) -> Result<Option<String>> {
        match self.find(WellKnownMimeType::MessageRSocketRouting) {
            Some(entry) => Ok(decode_routes(entry.content.clone())?.into_iter().next()),
            None => Ok(None),
        }
    }

    /// The content-type hint, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the mime-type entry is malformed.
    pub fn content_type(&self) -> Result<Option<WellKnownHeader>> {
        self.find(WellKnownMimeType::MessageRSocketMimeType)
            .map(|entry| decode_well_known_metadata_header(&entry.content))
            .transpose()
    }
}

impl IntoIterator for CompositeMetadata {
    type Item = MetadataEntry;
    type IntoIter = std::vec::IntoIter<MetadataEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_entry_layout() {
        let buf = encode_composite_metadata([(WellKnownMimeType::ApplicationJson, b"{}")]).unwrap();

        assert_eq!(&buf[..], &[0x85, 0x00, 0x00, 0x02, b'{', b'}']);
    }

    #[test]
    fn test_custom_entry_layout() {
        let buf = encode_composite_metadata([("text/x-demo", b"hi")]).unwrap();

        assert_eq!(buf[0], 10);
        assert_eq!(&buf[1..12], b"text/x-demo");
        assert_eq!(&buf[12..15], &[0x00, 0x00, 0x02]);
        assert_eq!(&buf[15..], b"hi");
    }

    #[test]
    fn test_custom_name_of_well_known_type_is_abbreviated() {
        let custom = MimeType::Custom("application/json".to_string());
        let buf = encode_composite_metadata([(custom, &b"{}"[..])]).unwrap();

        assert_eq!(&buf[..], &[0x85, 0x00, 0x00, 0x02, b'{', b'}']);
        let entries = decode_composite_metadata(buf).unwrap();
        assert_eq!(
            entries[0].mime_type,
            MimeType::WellKnown(WellKnownMimeType::ApplicationJson)
        );
    }

    #[test]
    fn test_order_is_preserved() {
        let buf = encode_composite_metadata([
            (MimeType::from("message/x.rsocket.application+json"), &b"{}"[..]),
            (WellKnownMimeType::TextPlain.into(), &b"a"[..]),
            (WellKnownMimeType::ApplicationJson.into(), &b"b"[..]),
        ])
        .unwrap();

        let entries = decode_composite_metadata(buf).unwrap();
        let mimes: Vec<_> = entries.iter().map(|e| e.mime_type.to_string()).collect();
        assert_eq!(
            mimes,
            [
                "message/x.rsocket.application+json",
                "text/plain",
                "application/json"
            ]
        );
    }

    #[test]
    fn test_unresolvable_entry_fails_the_whole_buffer() {
        let result = encode_composite_metadata([
            (WellKnownMimeType::TextPlain.into(), &b"a"[..]),
            (MimeType::Unregistered(0x60), &b"b"[..]),
        ]);

        assert_eq!(result, Err(Error::UnresolvableMimeType("0x60".to_string())));
    }

    #[test]
    fn test_oversized_entry() {
        let content = vec![0u8; MAX_ENTRY_LENGTH + 1];
        let result = encode_composite_metadata([(WellKnownMimeType::TextPlain, content)]);

        assert!(matches!(result, Err(Error::EntryTooLarge { .. })));
    }

    #[test]
    fn test_unregistered_identifier_is_preserved_on_decode() {
        let buf = Bytes::from_static(&[0xE0, 0x00, 0x00, 0x01, 0xAA]);
        let entries = decode_composite_metadata(buf).unwrap();

        assert_eq!(entries[0].mime_type, MimeType::Unregistered(0x60));
        assert_eq!(&entries[0].content[..], &[0xAA]);
    }

    #[test]
    fn test_truncated_buffers() {
        for raw in [
            &[0x85][..],
            &[0x85, 0x00, 0x00][..],
            &[0x85, 0x00, 0x00, 0x05, 0x01][..],
            &[0x09, b'a', b'b'][..],
        ] {
            let result = decode_composite_metadata(Bytes::copy_from_slice(raw));
            assert!(matches!(result, Err(Error::Malformed(_))), "{raw:?}");
        }
    }

    #[test]
    fn test_empty_buffer_has_no_entries() {
        let metadata = CompositeMetadata::decode(Bytes::new()).unwrap();

        assert!(metadata.entries().is_empty());
        assert_eq!(metadata.route().unwrap(), None);
        assert_eq!(metadata.content_type().unwrap(), None);
    }
}
