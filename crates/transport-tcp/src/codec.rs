//! Length-prefixed framing for stream transports.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use reflux_transport::TransportError;
use tokio_util::codec::{Decoder, Encoder};

/// Largest frame a 24-bit length prefix can describe.
pub const MAX_FRAME_SIZE: usize = 0x00FF_FFFF;

/// Length prefix size (3 bytes, big-endian).
pub const FRAME_HEADER_SIZE: usize = 3;

/// Codec that prefixes every frame with its 24-bit length.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new frame codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a smaller max frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        if size < MAX_FRAME_SIZE {
            self.max_frame_size = size;
        }
        self
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = TransportError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Parse header without consuming
        #[allow(clippy::cast_possible_truncation)]
        let frame_len = (&buf[..FRAME_HEADER_SIZE]).get_uint(FRAME_HEADER_SIZE) as usize;

        if frame_len > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        let total = FRAME_HEADER_SIZE + frame_len;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        Ok(Some(buf.split_to(frame_len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, frame: Bytes, buf: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame_size,
            });
        }

        buf.reserve(FRAME_HEADER_SIZE + frame.len());
        buf.put_uint(frame.len() as u64, FRAME_HEADER_SIZE);
        buf.put(frame);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(Bytes::from("Hello, World!"), &mut buf).unwrap();
        assert_eq!(&buf[..3], &[0, 0, 13]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Bytes::from("Hello, World!"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame() {
        let mut codec = FrameCodec::new();
        let mut full = BytesMut::new();
        codec.encode(Bytes::from_static(b"abcdef"), &mut full).unwrap();

        let mut buf = BytesMut::from(&full[..5]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[5..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap().unwrap(),
            Bytes::from_static(b"abcdef")
        );
    }

    #[test]
    fn test_empty_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(Bytes::new(), &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::new());
    }

    #[test]
    fn test_frame_too_large() {
        let mut codec = FrameCodec::new().with_max_frame_size(4);
        let mut buf = BytesMut::new();

        assert!(matches!(
            codec.encode(Bytes::from_static(b"too big"), &mut buf),
            Err(TransportError::FrameTooLarge { size: 7, max: 4 })
        ));

        buf.extend_from_slice(&[0, 0, 9]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
