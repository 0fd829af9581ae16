//! Mime types carried in composite metadata entries.

use std::fmt;

use crate::error::{Error, Result};

/// Longest custom mime string a composite entry can carry.
pub const MAX_CUSTOM_MIME_LENGTH: usize = 128;

macro_rules! well_known_mime_types {
    ($($variant:ident = ($id:literal, $name:literal),)+) => {
        /// A mime type with a reserved 7-bit identifier.
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
        #[non_exhaustive]
        pub enum WellKnownMimeType {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant,
            )+
        }

        impl WellKnownMimeType {
            /// Every well-known mime type, in identifier order.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            /// The 7-bit identifier of this mime type.
            #[must_use]
            pub const fn identifier(self) -> u8 {
                match self {
                    $(Self::$variant => $id,)+
                }
            }

            /// The mime string of this type.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            /// Resolves a 7-bit identifier.
            #[must_use]
            pub const fn from_identifier(identifier: u8) -> Option<Self> {
                match identifier {
                    $($id => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Resolves a mime string.
            #[must_use]
            pub fn from_mime(mime: &str) -> Option<Self> {
                match mime {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

well_known_mime_types! {
    ApplicationAvro = (0x00, "application/avro"),
    ApplicationCbor = (0x01, "application/cbor"),
    ApplicationGraphql = (0x02, "application/graphql"),
    ApplicationGzip = (0x03, "application/gzip"),
    ApplicationJavascript = (0x04, "application/javascript"),
    ApplicationJson = (0x05, "application/json"),
    ApplicationOctetStream = (0x06, "application/octet-stream"),
    ApplicationPdf = (0x07, "application/pdf"),
    ApplicationThrift = (0x08, "application/vnd.apache.thrift.binary"),
    ApplicationProtobuf = (0x09, "application/vnd.google.protobuf"),
    ApplicationXml = (0x0A, "application/xml"),
    ApplicationZip = (0x0B, "application/zip"),
    AudioAac = (0x0C, "audio/aac"),
    AudioMp3 = (0x0D, "audio/mp3"),
    AudioMp4 = (0x0E, "audio/mp4"),
    AudioMpeg3 = (0x0F, "audio/mpeg3"),
    AudioMpeg = (0x10, "audio/mpeg"),
    AudioOgg = (0x11, "audio/ogg"),
    AudioOpus = (0x12, "audio/opus"),
    AudioVorbis = (0x13, "audio/vorbis"),
    ImageBmp = (0x14, "image/bmp"),
    ImageGif = (0x15, "image/gif"),
    ImageHeicSequence = (0x16, "image/heic-sequence"),
    ImageHeic = (0x17, "image/heic"),
    ImageHeifSequence = (0x18, "image/heif-sequence"),
    ImageHeif = (0x19, "image/heif"),
    ImageJpeg = (0x1A, "image/jpeg"),
    ImagePng = (0x1B, "image/png"),
    ImageTiff = (0x1C, "image/tiff"),
    MultipartMixed = (0x1D, "multipart/mixed"),
    TextCss = (0x1E, "text/css"),
    TextCsv = (0x1F, "text/csv"),
    TextHtml = (0x20, "text/html"),
    TextPlain = (0x21, "text/plain"),
    TextXml = (0x22, "text/xml"),
    VideoH264 = (0x23, "video/H264"),
    VideoH265 = (0x24, "video/H265"),
    VideoVp8 = (0x25, "video/VP8"),
    ApplicationHessian = (0x26, "application/x-hessian"),
    ApplicationJavaObject = (0x27, "application/x-java-object"),
    ApplicationCloudeventsJson = (0x28, "application/cloudevents+json"),
    ApplicationCapnp = (0x29, "application/x-capnp"),
    ApplicationFlatbuffers = (0x2A, "application/x-flatbuffers"),
    MessageRSocketMimeType = (0x7A, "message/x.rsocket.mime-type.v0"),
    MessageRSocketAcceptMimeTypes = (0x7B, "message/x.rsocket.accept-mime-types.v0"),
    MessageRSocketAuthentication = (0x7C, "message/x.rsocket.authentication.v0"),
    MessageRSocketTracingZipkin = (0x7D, "message/x.rsocket.tracing-zipkin.v0"),
    MessageRSocketRouting = (0x7E, "message/x.rsocket.routing.v0"),
    MessageRSocketCompositeMetadata = (0x7F, "message/x.rsocket.composite-metadata.v0"),
}

impl fmt::Display for WellKnownMimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mime type tagging one composite metadata entry.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum MimeType {
    /// A type with a reserved identifier, encoded in a single byte.
    WellKnown(WellKnownMimeType),

    /// An arbitrary ASCII mime string, encoded literally.
    Custom(String),

    /// A reserved identifier this codec has no name for.
    ///
    /// Produced when decoding entries from newer peers. Encoding one fails,
    /// since it can be neither abbreviated nor written literally.
    Unregistered(u8),
}

impl MimeType {
    /// Parses a mime string, preferring the well-known identifier.
    #[must_use]
    pub fn parse(mime: &str) -> Self {
        WellKnownMimeType::from_mime(mime)
            .map_or_else(|| Self::Custom(mime.to_string()), Self::WellKnown)
    }

    /// Resolves a reserved identifier to a well-known type.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is outside the 7-bit range or has no
    /// well-known type.
    pub fn from_identifier(identifier: u8) -> Result<Self> {
        if identifier > 0x7F {
            return Err(Error::InvalidIdentifier(identifier));
        }

        WellKnownMimeType::from_identifier(identifier)
            .map(Self::WellKnown)
            .ok_or_else(|| Error::UnresolvableMimeType(format!("{identifier:#04x}")))
    }

    /// The well-known type, if any.
    #[must_use]
    pub const fn well_known(&self) -> Option<WellKnownMimeType> {
        match self {
            Self::WellKnown(mime) => Some(*mime),
            _ => None,
        }
    }

    /// Checks that this mime type can be written into an entry header.
    ///
    /// # Errors
    ///
    /// Returns an error for empty, non-ASCII or overlong custom strings and for
    /// unregistered identifiers.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::WellKnown(_) => Ok(()),
            Self::Custom(mime) => {
                if mime.is_empty() || mime.len() > MAX_CUSTOM_MIME_LENGTH || !mime.is_ascii() {
                    Err(Error::UnresolvableMimeType(mime.clone()))
                } else {
                    Ok(())
                }
            }
            Self::Unregistered(identifier) => {
                Err(Error::UnresolvableMimeType(format!("{identifier:#04x}")))
            }
        }
    }
}

impl From<WellKnownMimeType> for MimeType {
    fn from(mime: WellKnownMimeType) -> Self {
        Self::WellKnown(mime)
    }
}

impl From<&str> for MimeType {
    fn from(mime: &str) -> Self {
        Self::parse(mime)
    }
}

impl From<String> for MimeType {
    fn from(mime: String) -> Self {
        Self::parse(&mime)
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WellKnown(mime) => f.write_str(mime.as_str()),
            Self::Custom(mime) => f.write_str(mime),
            Self::Unregistered(identifier) => write!(f, "unregistered/{identifier:#04x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_table_is_consistent() {
        for mime in WellKnownMimeType::ALL {
            assert_eq!(
                WellKnownMimeType::from_identifier(mime.identifier()),
                Some(*mime)
            );
            assert_eq!(WellKnownMimeType::from_mime(mime.as_str()), Some(*mime));
        }
    }

    #[test]
    fn test_reserved_identifiers() {
        assert_eq!(WellKnownMimeType::ApplicationJson.identifier(), 0x05);
        assert_eq!(WellKnownMimeType::MessageRSocketRouting.identifier(), 0x7E);
        assert_eq!(
            WellKnownMimeType::MessageRSocketCompositeMetadata.identifier(),
            0x7F
        );
    }

    #[test]
    fn test_parse_prefers_well_known() {
        assert_eq!(
            MimeType::parse("application/json"),
            MimeType::WellKnown(WellKnownMimeType::ApplicationJson)
        );
        assert_eq!(
            MimeType::parse("message/x.rsocket.application+json"),
            MimeType::Custom("message/x.rsocket.application+json".to_string())
        );
    }

    #[test]
    fn test_validate_rejects_unusable_literals() {
        assert!(MimeType::Custom(String::new()).validate().is_err());
        assert!(MimeType::Custom("x".repeat(129)).validate().is_err());
        assert!(MimeType::Custom("text/plaín".to_string()).validate().is_err());
        assert!(MimeType::Unregistered(0x50).validate().is_err());
        assert!(MimeType::Custom("x".repeat(128)).validate().is_ok());
    }

    #[test]
    fn test_from_identifier() {
        assert!(MimeType::from_identifier(0x05).is_ok());
        assert_eq!(
            MimeType::from_identifier(0x50),
            Err(Error::UnresolvableMimeType("0x50".to_string()))
        );
        assert_eq!(
            MimeType::from_identifier(0x80),
            Err(Error::InvalidIdentifier(0x80))
        );
    }
}
