//! Composite metadata codec for reactive-streaming RPC.
//!
//! Messages carry a side-channel metadata buffer made of ordered entries,
//! each tagged with a mime type. Two entry kinds have reserved meaning:
//!
//! - routing (`message/x.rsocket.routing.v0`): one or more route tags naming
//!   the remote service/method;
//! - content-type hint (`message/x.rsocket.mime-type.v0`): the data's actual
//!   mime type as a well-known identifier plus an explicit length.
//!
//! ```
//! use reflux_metadata::{
//!     CompositeMetadata, WellKnownMimeType, encode_composite_metadata, encode_route,
//! };
//!
//! let metadata = encode_composite_metadata([(
//!     WellKnownMimeType::MessageRSocketRouting,
//!     encode_route("UserService.findById").unwrap(),
//! )])
//! .unwrap();
//!
//! let decoded = CompositeMetadata::decode(metadata).unwrap();
//! assert_eq!(decoded.route().unwrap().as_deref(), Some("UserService.findById"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod composite;
mod error;
mod header;
mod mime;
mod routing;

pub use composite::{
    CompositeMetadata, MAX_ENTRY_LENGTH, MetadataEntry, append_entry, decode_composite_metadata,
    encode_composite_metadata,
};
pub use error::{Error, Result};
pub use header::{
    WellKnownHeader, decode_well_known_metadata_header, encode_mime_type_header,
    encode_well_known_metadata_header,
};
pub use mime::{MAX_CUSTOM_MIME_LENGTH, MimeType, WellKnownMimeType};
pub use routing::{MAX_ROUTE_TAG_LENGTH, decode_routes, encode_route, encode_routes};
