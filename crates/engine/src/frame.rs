//! Frame codec.
//!
//! Every frame starts with a 6-byte header: a 31-bit stream id followed by
//! a `u16` holding the 6-bit frame type and 10 bits of flags. When the
//! metadata flag is set, metadata is prefixed by a 24-bit length and the
//! remainder of the frame is data. All integers are big-endian.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::payload::Payload;

/// Logical stream identifier; 0 addresses the connection itself.
pub type StreamId = u32;

/// Largest stream id.
pub const MAX_STREAM_ID: StreamId = 0x7FFF_FFFF;

/// Largest request n; granting it means "unbounded".
pub const MAX_REQUEST_N: u32 = 0x7FFF_FFFF;

/// Protocol major version sent in SETUP.
pub const MAJOR_VERSION: u16 = 1;

/// Protocol minor version sent in SETUP.
pub const MINOR_VERSION: u16 = 0;

/// Frame header size (4 bytes stream id + 2 bytes type and flags).
pub const HEADER_SIZE: usize = 6;

const MAX_METADATA_LENGTH: usize = 0x00FF_FFFF;
const FLAGS_MASK: u16 = 0x03FF;

/// Header flags.
pub mod flags {
    /// Frame may be ignored if not understood.
    pub const IGNORE: u16 = 0x200;
    /// Metadata present.
    pub const METADATA: u16 = 0x100;
    /// More fragments follow (unsupported).
    pub const FOLLOWS: u16 = 0x080;
    /// Stream completion.
    pub const COMPLETE: u16 = 0x040;
    /// Payload carries a message.
    pub const NEXT: u16 = 0x020;
    /// KEEPALIVE: peer must answer.
    pub const RESPOND: u16 = 0x080;
    /// SETUP: resume token present (unsupported).
    pub const RESUME_ENABLE: u16 = 0x080;
    /// SETUP: lease requested (unsupported).
    pub const LEASE: u16 = 0x040;
}

/// Type of frame being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Connection setup.
    Setup = 0x01,
    /// Connection keep-alive.
    KeepAlive = 0x03,
    /// Request-response request.
    RequestResponse = 0x04,
    /// Request-channel opening.
    RequestChannel = 0x07,
    /// Credit grant.
    RequestN = 0x08,
    /// Stream cancellation.
    Cancel = 0x09,
    /// Stream payload and/or completion.
    Payload = 0x0A,
    /// Stream or connection error.
    Error = 0x0B,
    /// Extension frame.
    Ext = 0x3F,
}

impl FrameType {
    /// Wire name of the frame type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::KeepAlive => "KEEPALIVE",
            Self::RequestResponse => "REQUEST_RESPONSE",
            Self::RequestChannel => "REQUEST_CHANNEL",
            Self::RequestN => "REQUEST_N",
            Self::Cancel => "CANCEL",
            Self::Payload => "PAYLOAD",
            Self::Error => "ERROR",
            Self::Ext => "EXT",
        }
    }
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::Setup),
            0x03 => Ok(Self::KeepAlive),
            0x04 => Ok(Self::RequestResponse),
            0x07 => Ok(Self::RequestChannel),
            0x08 => Ok(Self::RequestN),
            0x09 => Ok(Self::Cancel),
            0x0A => Ok(Self::Payload),
            0x0B => Ok(Self::Error),
            0x3F => Ok(Self::Ext),
            _ => Err(ProtocolError::UnknownFrameType(value)),
        }
    }
}

/// Error code carried by ERROR frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ErrorCode(u32);

impl ErrorCode {
    /// SETUP was malformed.
    pub const INVALID_SETUP: Self = Self(0x0000_0001);
    /// SETUP asked for something the server does not support.
    pub const UNSUPPORTED_SETUP: Self = Self(0x0000_0002);
    /// The server refused the SETUP.
    pub const REJECTED_SETUP: Self = Self(0x0000_0003);
    /// Resumption refused.
    pub const REJECTED_RESUME: Self = Self(0x0000_0004);
    /// The connection is being terminated.
    pub const CONNECTION_ERROR: Self = Self(0x0000_0101);
    /// The connection is being closed cleanly.
    pub const CONNECTION_CLOSE: Self = Self(0x0000_0102);
    /// Application failure on a stream.
    pub const APPLICATION_ERROR: Self = Self(0x0000_0201);
    /// The responder rejected the request.
    pub const REJECTED: Self = Self(0x0000_0202);
    /// The responder canceled the request.
    pub const CANCELED: Self = Self(0x0000_0203);
    /// The request was invalid.
    pub const INVALID: Self = Self(0x0000_0204);

    /// Wrap a raw code.
    #[must_use]
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    /// The raw code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self.0
    }

    /// Codes that terminate the whole connection.
    #[must_use]
    pub const fn is_connection_level(self) -> bool {
        self.0 > 0 && self.0 < 0x0000_0201
    }

    /// Wire name, when the code is defined.
    #[must_use]
    pub const fn name(self) -> Option<&'static str> {
        match self.0 {
            0x0000_0001 => Some("INVALID_SETUP"),
            0x0000_0002 => Some("UNSUPPORTED_SETUP"),
            0x0000_0003 => Some("REJECTED_SETUP"),
            0x0000_0004 => Some("REJECTED_RESUME"),
            0x0000_0101 => Some("CONNECTION_ERROR"),
            0x0000_0102 => Some("CONNECTION_CLOSE"),
            0x0000_0201 => Some("APPLICATION_ERROR"),
            0x0000_0202 => Some("REJECTED"),
            0x0000_0203 => Some("CANCELED"),
            0x0000_0204 => Some("INVALID"),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

/// Body of a SETUP frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Setup {
    /// Major protocol version.
    pub major_version: u16,
    /// Minor protocol version.
    pub minor_version: u16,
    /// Keep-alive interval in milliseconds.
    pub keep_alive: u32,
    /// Max time without frames before the connection is dead, in milliseconds.
    pub lifetime: u32,
    /// Resume token, when resumption is requested.
    pub resume_token: Option<Bytes>,
    /// Lease requested.
    pub lease: bool,
    /// Mime type of payload metadata.
    pub metadata_mime_type: String,
    /// Mime type of payload data.
    pub data_mime_type: String,
    /// Setup payload.
    pub payload: Payload,
}

/// Frame contents by type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    /// SETUP.
    Setup(Setup),
    /// KEEPALIVE.
    KeepAlive {
        /// Peer must answer.
        respond: bool,
        /// Resume position (always 0 without resumption).
        last_received_position: u64,
        /// Opaque data echoed back.
        data: Option<Bytes>,
    },
    /// REQUEST_RESPONSE.
    RequestResponse {
        /// Request payload.
        payload: Payload,
    },
    /// REQUEST_CHANNEL.
    RequestChannel {
        /// Credit granted to the responder.
        initial_request_n: u32,
        /// Requester's outbound side is already finished.
        complete: bool,
        /// First payload.
        payload: Payload,
    },
    /// REQUEST_N.
    RequestN {
        /// Credit granted.
        n: u32,
    },
    /// CANCEL.
    Cancel,
    /// PAYLOAD.
    Payload {
        /// The message (empty when `next` is unset).
        payload: Payload,
        /// A message is present.
        next: bool,
        /// Sender's direction is finished.
        complete: bool,
    },
    /// ERROR.
    Error {
        /// Error code.
        code: ErrorCode,
        /// UTF-8 message.
        message: String,
    },
    /// EXT.
    Ext {
        /// Extended type.
        extended_type: u32,
        /// Receiver may ignore it.
        can_ignore: bool,
        /// Extension payload.
        payload: Payload,
    },
}

impl Body {
    /// Frame type of this body.
    #[must_use]
    pub const fn frame_type(&self) -> FrameType {
        match self {
            Self::Setup(_) => FrameType::Setup,
            Self::KeepAlive { .. } => FrameType::KeepAlive,
            Self::RequestResponse { .. } => FrameType::RequestResponse,
            Self::RequestChannel { .. } => FrameType::RequestChannel,
            Self::RequestN { .. } => FrameType::RequestN,
            Self::Cancel => FrameType::Cancel,
            Self::Payload { .. } => FrameType::Payload,
            Self::Error { .. } => FrameType::Error,
            Self::Ext { .. } => FrameType::Ext,
        }
    }

    fn flags(&self) -> u16 {
        fn metadata(payload: &Payload) -> u16 {
            if payload.metadata().is_some() {
                flags::METADATA
            } else {
                0
            }
        }

        fn set(cond: bool, flag: u16) -> u16 {
            if cond { flag } else { 0 }
        }

        match self {
            Self::Setup(setup) => {
                metadata(&setup.payload)
                    | set(setup.resume_token.is_some(), flags::RESUME_ENABLE)
                    | set(setup.lease, flags::LEASE)
            }
            Self::KeepAlive { respond, .. } => set(*respond, flags::RESPOND),
            Self::RequestResponse { payload } => metadata(payload),
            Self::RequestChannel {
                complete, payload, ..
            } => metadata(payload) | set(*complete, flags::COMPLETE),
            Self::RequestN { .. } | Self::Cancel | Self::Error { .. } => 0,
            Self::Payload {
                payload,
                next,
                complete,
            } => metadata(payload) | set(*next, flags::NEXT) | set(*complete, flags::COMPLETE),
            Self::Ext {
                can_ignore,
                payload,
                ..
            } => metadata(payload) | set(*can_ignore, flags::IGNORE),
        }
    }
}

/// A frame addressed to a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Stream the frame belongs to.
    pub stream_id: StreamId,
    /// Frame contents.
    pub body: Body,
}

impl Frame {
    /// Create a new frame.
    #[must_use]
    pub const fn new(stream_id: StreamId, body: Body) -> Self {
        Self { stream_id, body }
    }

    /// Frame type of the body.
    #[must_use]
    pub const fn frame_type(&self) -> FrameType {
        self.body.frame_type()
    }

    /// Encode into one transport message.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata exceeds 2^24-1 bytes or a SETUP mime type
    /// is not a short ASCII string.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + 16);

        buf.put_u32(self.stream_id & MAX_STREAM_ID);
        buf.put_u16((u16::from(self.frame_type() as u8) << 10) | self.body.flags());

        match &self.body {
            Body::Setup(setup) => {
                buf.put_u16(setup.major_version);
                buf.put_u16(setup.minor_version);
                buf.put_u32(setup.keep_alive & MAX_REQUEST_N);
                buf.put_u32(setup.lifetime & MAX_REQUEST_N);
                if let Some(token) = &setup.resume_token {
                    let len = u16::try_from(token.len())
                        .map_err(|_| ProtocolError::Unsupported("resume token over 65535 bytes"))?;
                    buf.put_u16(len);
                    buf.put_slice(token);
                }
                put_mime_type(&mut buf, &setup.metadata_mime_type)?;
                put_mime_type(&mut buf, &setup.data_mime_type)?;
                put_payload(&mut buf, &setup.payload)?;
            }
            Body::KeepAlive {
                last_received_position,
                data,
                ..
            } => {
                buf.put_u64(*last_received_position);
                if let Some(data) = data {
                    buf.put_slice(data);
                }
            }
            Body::RequestResponse { payload } => put_payload(&mut buf, payload)?,
            Body::RequestChannel {
                initial_request_n,
                payload,
                ..
            } => {
                buf.put_u32(*initial_request_n & MAX_REQUEST_N);
                put_payload(&mut buf, payload)?;
            }
            Body::RequestN { n } => buf.put_u32(*n & MAX_REQUEST_N),
            Body::Cancel => {}
            Body::Payload { payload, .. } => put_payload(&mut buf, payload)?,
            Body::Error { code, message } => {
                buf.put_u32(code.code());
                buf.put_slice(message.as_bytes());
            }
            Body::Ext {
                extended_type,
                payload,
                ..
            } => {
                buf.put_u32(*extended_type);
                put_payload(&mut buf, payload)?;
            }
        }

        Ok(buf.freeze())
    }

    /// Decode one transport message.
    ///
    /// Returns `Ok(None)` for frames of an unknown type that carry the ignore
    /// flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is truncated, of an unknown type without
    /// the ignore flag, fragmented, or addressed to a stream id its type does
    /// not allow.
    pub fn decode(mut buf: Bytes) -> Result<Option<Self>, ProtocolError> {
        ensure(&buf, HEADER_SIZE, "frame header")?;

        let stream_id = buf.get_u32() & MAX_STREAM_ID;
        let type_and_flags = buf.get_u16();
        let bits = type_and_flags & FLAGS_MASK;

        #[allow(clippy::cast_possible_truncation)]
        let frame_type = match FrameType::try_from((type_and_flags >> 10) as u8) {
            Ok(frame_type) => frame_type,
            Err(_) if bits & flags::IGNORE != 0 => return Ok(None),
            Err(e) => return Err(e),
        };

        check_stream_id(frame_type, stream_id)?;

        let body = match frame_type {
            FrameType::Setup => Body::Setup(decode_setup(&mut buf, bits)?),
            FrameType::KeepAlive => {
                ensure(&buf, 8, "KEEPALIVE")?;
                let last_received_position = buf.get_u64();
                Body::KeepAlive {
                    respond: bits & flags::RESPOND != 0,
                    last_received_position,
                    data: (!buf.is_empty()).then_some(buf),
                }
            }
            FrameType::RequestResponse => {
                reject_fragments(bits)?;
                Body::RequestResponse {
                    payload: get_payload(&mut buf, bits)?,
                }
            }
            FrameType::RequestChannel => {
                reject_fragments(bits)?;
                ensure(&buf, 4, "REQUEST_CHANNEL")?;
                let initial_request_n = buf.get_u32() & MAX_REQUEST_N;
                Body::RequestChannel {
                    initial_request_n,
                    complete: bits & flags::COMPLETE != 0,
                    payload: get_payload(&mut buf, bits)?,
                }
            }
            FrameType::RequestN => {
                ensure(&buf, 4, "REQUEST_N")?;
                Body::RequestN {
                    n: buf.get_u32() & MAX_REQUEST_N,
                }
            }
            FrameType::Cancel => Body::Cancel,
            FrameType::Payload => {
                reject_fragments(bits)?;
                Body::Payload {
                    payload: get_payload(&mut buf, bits)?,
                    next: bits & flags::NEXT != 0,
                    complete: bits & flags::COMPLETE != 0,
                }
            }
            FrameType::Error => {
                ensure(&buf, 4, "ERROR")?;
                let code = ErrorCode::new(buf.get_u32());
                Body::Error {
                    code,
                    message: String::from_utf8_lossy(&buf).into_owned(),
                }
            }
            FrameType::Ext => {
                ensure(&buf, 4, "EXT")?;
                let extended_type = buf.get_u32();
                Body::Ext {
                    extended_type,
                    can_ignore: bits & flags::IGNORE != 0,
                    payload: get_payload(&mut buf, bits)?,
                }
            }
        };

        Ok(Some(Self { stream_id, body }))
    }
}

fn ensure(buf: &Bytes, needed: usize, frame: &'static str) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Truncated {
            frame,
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn check_stream_id(frame_type: FrameType, stream_id: StreamId) -> Result<(), ProtocolError> {
    let valid = match frame_type {
        FrameType::Setup | FrameType::KeepAlive => stream_id == 0,
        FrameType::Error | FrameType::Ext => true,
        _ => stream_id != 0,
    };

    if valid {
        Ok(())
    } else {
        Err(ProtocolError::InvalidStreamId {
            frame: frame_type.name(),
            stream_id,
        })
    }
}

const fn reject_fragments(bits: u16) -> Result<(), ProtocolError> {
    if bits & flags::FOLLOWS != 0 {
        return Err(ProtocolError::Unsupported("fragmentation"));
    }
    Ok(())
}

fn put_payload(buf: &mut BytesMut, payload: &Payload) -> Result<(), ProtocolError> {
    if let Some(metadata) = payload.metadata() {
        if metadata.len() > MAX_METADATA_LENGTH {
            return Err(ProtocolError::MetadataTooLarge(metadata.len()));
        }
        buf.put_uint(metadata.len() as u64, 3);
        buf.put_slice(metadata);
    }

    if let Some(data) = payload.data() {
        buf.put_slice(data);
    }

    Ok(())
}

fn get_payload(buf: &mut Bytes, bits: u16) -> Result<Payload, ProtocolError> {
    let metadata = if bits & flags::METADATA == 0 {
        None
    } else {
        ensure(buf, 3, "metadata length")?;
        #[allow(clippy::cast_possible_truncation)]
        let len = buf.get_uint(3) as usize;
        ensure(buf, len, "metadata")?;
        Some(buf.split_to(len))
    };

    let data = (!buf.is_empty()).then(|| std::mem::take(buf));

    Ok(Payload::new(data, metadata))
}

fn put_mime_type(buf: &mut BytesMut, mime: &str) -> Result<(), ProtocolError> {
    let len = u8::try_from(mime.len())
        .ok()
        .filter(|_| mime.is_ascii())
        .ok_or_else(|| ProtocolError::InvalidMimeType(mime.to_string()))?;

    buf.put_u8(len);
    buf.put_slice(mime.as_bytes());
    Ok(())
}

fn get_mime_type(buf: &mut Bytes) -> Result<String, ProtocolError> {
    ensure(buf, 1, "mime type length")?;
    let len = usize::from(buf.get_u8());
    ensure(buf, len, "mime type")?;

    let raw = buf.split_to(len);
    if !raw.is_ascii() {
        return Err(ProtocolError::InvalidMimeType(
            String::from_utf8_lossy(&raw).into_owned(),
        ));
    }

    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn decode_setup(buf: &mut Bytes, bits: u16) -> Result<Setup, ProtocolError> {
    ensure(buf, 12, "SETUP")?;
    let major_version = buf.get_u16();
    let minor_version = buf.get_u16();
    let keep_alive = buf.get_u32() & MAX_REQUEST_N;
    let lifetime = buf.get_u32() & MAX_REQUEST_N;

    let resume_token = if bits & flags::RESUME_ENABLE == 0 {
        None
    } else {
        ensure(buf, 2, "resume token length")?;
        let len = usize::from(buf.get_u16());
        ensure(buf, len, "resume token")?;
        Some(buf.split_to(len))
    };

    let metadata_mime_type = get_mime_type(buf)?;
    let data_mime_type = get_mime_type(buf)?;
    let payload = get_payload(buf, bits)?;

    Ok(Setup {
        major_version,
        minor_version,
        keep_alive,
        lifetime,
        resume_token,
        lease: bits & flags::LEASE != 0,
        metadata_mime_type,
        data_mime_type,
        payload,
    })
}
