//! Well-known metadata header carried by content-type hint entries.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::composite::MAX_ENTRY_LENGTH;
use crate::error::{Error, Result};
use crate::mime::WellKnownMimeType;

/// A well-known identifier plus an explicit length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WellKnownHeader {
    /// 7-bit mime identifier.
    pub identifier: u8,
    /// Length announced alongside the identifier.
    pub length: u32,
}

impl WellKnownHeader {
    /// The mime type named by the identifier, if well-known.
    #[must_use]
    pub const fn mime_type(&self) -> Option<WellKnownMimeType> {
        WellKnownMimeType::from_identifier(self.identifier)
    }
}

/// Encodes `(0x80 | identifier, u24 length)`.
///
/// # Errors
///
/// Returns an error if the identifier does not fit in 7 bits or the length in
/// 24 bits.
pub fn encode_well_known_metadata_header(identifier: u8, length: usize) -> Result<Bytes> {
    if identifier > 0x7F {
        return Err(Error::InvalidIdentifier(identifier));
    }

    if length > MAX_ENTRY_LENGTH {
        return Err(Error::EntryTooLarge {
            size: length,
            max: MAX_ENTRY_LENGTH,
        });
    }

    let mut buf = BytesMut::with_capacity(4);
    buf.put_u8(0x80 | identifier);
    buf.put_uint(length as u64, 3);

    Ok(buf.freeze())
}

/// Content-type hint for `mime`: its identifier and the length of its name.
#[must_use]
pub fn encode_mime_type_header(mime: WellKnownMimeType) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u8(0x80 | mime.identifier());
    buf.put_uint(mime.as_str().len() as u64, 3);

    buf.freeze()
}

/// Decodes a well-known header.
///
/// # Errors
///
/// Returns an error if fewer than four bytes are present or the identifier
/// byte lacks the well-known flag.
pub fn decode_well_known_metadata_header(mut raw: &[u8]) -> Result<WellKnownHeader> {
    if raw.len() < 4 {
        return Err(Error::Malformed(format!(
            "well-known header needs 4 bytes, got {}",
            raw.len()
        )));
    }

    let first = raw.get_u8();
    if first & 0x80 == 0 {
        return Err(Error::Malformed(format!(
            "header byte {first:#04x} is not a well-known identifier"
        )));
    }

    #[allow(clippy::cast_possible_truncation)]
    let length = raw.get_uint(3) as u32;

    Ok(WellKnownHeader {
        identifier: first & 0x7F,
        length,
    })
}
