//! Round-trip properties of the composite metadata codec.

use bytes::Bytes;
use proptest::prelude::*;
use reflux_metadata::{
    CompositeMetadata, MetadataEntry, MimeType, WellKnownMimeType, decode_composite_metadata,
    encode_composite_metadata, encode_mime_type_header, encode_route,
};

fn well_known() -> impl Strategy<Value = WellKnownMimeType> {
    prop::sample::select(WellKnownMimeType::ALL.to_vec())
}

fn mime_type() -> impl Strategy<Value = MimeType> {
    prop_oneof![
        well_known().prop_map(MimeType::WellKnown),
        "[a-z]{1,20}/x\\.[a-z0-9.+-]{1,40}".prop_map(|mime| MimeType::parse(&mime)),
    ]
}

proptest! {
    #[test]
    fn route_and_content_type_survive_encoding(route in "[A-Za-z][A-Za-z0-9._-]{0,120}", mime in well_known()) {
        let metadata = encode_composite_metadata([
            (WellKnownMimeType::MessageRSocketRouting, encode_route(&route).unwrap()),
            (WellKnownMimeType::MessageRSocketMimeType, encode_mime_type_header(mime)),
        ])
        .unwrap();

        let decoded = CompositeMetadata::decode(metadata).unwrap();
        prop_assert_eq!(decoded.route().unwrap(), Some(route));
        prop_assert_eq!(decoded.content_type().unwrap().and_then(|h| h.mime_type()), Some(mime));
    }

    #[test]
    fn entries_keep_their_order(entries in prop::collection::vec((mime_type(), prop::collection::vec(any::<u8>(), 0..64)), 0..8)) {
        let buf = encode_composite_metadata(entries.iter().map(|(m, c)| (m.clone(), c.clone()))).unwrap();
        let decoded = decode_composite_metadata(buf).unwrap();

        let expected: Vec<_> = entries
            .into_iter()
            .map(|(m, c)| MetadataEntry::new(m, Bytes::from(c)))
            .collect();
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn decoding_garbage_never_panics(raw in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = decode_composite_metadata(Bytes::from(raw));
    }
}
