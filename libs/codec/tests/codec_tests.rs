//! Codec behaviour on arbitrary input

use hive_codec::{BincodeCodec, EnvelopeCodec};
use hive_types::{args, Envelope, EnvelopeHead, ServiceType};
use proptest::prelude::*;

proptest! {
    #[test]
    fn decode_never_panics_on_arbitrary_bytes(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
        let codec = BincodeCodec::new();
        let _ = codec.decode(&payload);
    }

    #[test]
    fn head_fields_survive_encoding(name in "[A-Za-z]{1,16}", id in any::<i64>(), cluster in any::<u32>()) {
        let codec = BincodeCodec::new();
        let head = EnvelopeHead::to_actor(name.clone())
            .with_service(ServiceType::Gate)
            .with_id(id)
            .with_cluster(cluster);
        let envelope = Envelope::new(head, "Ping", args![id]);
        let decoded = codec.decode(&codec.encode(&envelope).unwrap()).unwrap();
        prop_assert_eq!(decoded.head.actor_name, name);
        prop_assert_eq!(decoded.head.id, id);
        prop_assert_eq!(decoded.head.cluster_id, cluster);
    }
}
