//! Routing metadata: a sequence of length-prefixed UTF-8 route tags.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Longest route tag (u8 length prefix).
pub const MAX_ROUTE_TAG_LENGTH: usize = 255;

/// Encodes a single route into a routing entry payload.
///
/// # Errors
///
/// Returns an error if the route is empty or longer than 255 bytes.
pub fn encode_route(route: &str) -> Result<Bytes> {
    encode_routes([route])
}

/// Encodes several route tags, in order.
///
/// # Errors
///
/// Returns an error if any tag is empty or longer than 255 bytes.
pub fn encode_routes<I, S>(routes: I) -> Result<Bytes>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut buf = BytesMut::new();

    for route in routes {
        let route = route.as_ref();
        if route.is_empty() || route.len() > MAX_ROUTE_TAG_LENGTH {
            return Err(Error::InvalidRouteTag(route.to_string()));
        }

        #[allow(clippy::cast_possible_truncation)]
        buf.put_u8(route.len() as u8);
        buf.put_slice(route.as_bytes());
    }

    Ok(buf.freeze())
}

/// Decodes a routing entry payload into its tags.
///
/// # Errors
///
/// Returns an error if a tag is truncated or not valid UTF-8.
pub fn decode_routes(mut buf: Bytes) -> Result<Vec<String>> {
    let mut routes = Vec::new();

    while buf.has_remaining() {
        let len = usize::from(buf.get_u8());
        if buf.remaining() < len {
            return Err(Error::Malformed(format!(
                "route tag needs {len} bytes, {} remaining",
                buf.remaining()
            )));
        }

        let tag = buf.split_to(len);
        let route = String::from_utf8(tag.to_vec())
            .map_err(|e| Error::Malformed(format!("route tag is not UTF-8: {e}")))?;
        routes.push(route);
    }

    Ok(routes)
}
