//! Property tests for the wire codec and the stream reassembler

use bytes::{Bytes, BytesMut};
use edge_mqtt::protocol::codec::{decode_remaining_length, encode_remaining_length};
use edge_mqtt::protocol::packet::{Packet, Publish, QoS, Subscribe};
use edge_mqtt::protocol::StreamReassembler;
use proptest::prelude::*;

fn qos_strategy() -> impl Strategy<Value = QoS> {
    prop_oneof![
        Just(QoS::AtMostOnce),
        Just(QoS::AtLeastOnce),
        Just(QoS::ExactlyOnce),
    ]
}

fn publish_strategy() -> impl Strategy<Value = Publish> {
    (
        "[a-z0-9/]{1,32}",
        proptest::collection::vec(any::<u8>(), 0..600),
        qos_strategy(),
        1u16..,
        any::<bool>(),
    )
        .prop_map(|(topic, payload, qos, id, retain)| Publish {
            topic,
            packet_id: (qos != QoS::AtMostOnce).then_some(id),
            payload: Bytes::from(payload),
            qos,
            retain,
            dup: false,
        })
}

/// Feed `bytes` in chunks cut at `cuts` and collect everything decoded
fn reassemble(bytes: &[u8], cuts: &[usize]) -> Vec<Packet> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (bytes.len() + 1)).collect();
    points.push(0);
    points.push(bytes.len());
    points.sort_unstable();
    points.dedup();

    let mut reassembler = StreamReassembler::new();
    let mut packets = Vec::new();
    for window in points.windows(2) {
        for result in reassembler.feed(&bytes[window[0]..window[1]]) {
            let raw = result.expect("valid stream");
            packets.push(Packet::decode(&raw).expect("valid packet"));
        }
    }
    assert!(!reassembler.has_partial());
    packets
}

proptest! {
    #[test]
    fn remaining_length_round_trips(length in 0usize..=268_435_455) {
        let mut buf = BytesMut::new();
        encode_remaining_length(length, &mut buf).unwrap();

        let expected_bytes = match length {
            0..=127 => 1,
            128..=16_383 => 2,
            16_384..=2_097_151 => 3,
            _ => 4,
        };
        prop_assert_eq!(buf.len(), expected_bytes);
        prop_assert_eq!(
            decode_remaining_length(&buf).unwrap(),
            Some((length as u32, expected_bytes))
        );
    }

    #[test]
    fn oversized_remaining_length_rejected(length in 268_435_456usize..=usize::MAX / 2) {
        let mut buf = BytesMut::new();
        prop_assert!(encode_remaining_length(length, &mut buf).is_err());
    }

    #[test]
    fn publish_survives_any_split(
        publish in publish_strategy(),
        cuts in proptest::collection::vec(any::<usize>(), 0..8),
    ) {
        let packet = Packet::Publish(publish);
        let bytes = packet.encode().unwrap();
        prop_assert_eq!(reassemble(&bytes, &cuts), vec![packet]);
    }

    #[test]
    fn coalesced_packets_arrive_in_order(
        first in publish_strategy(),
        second in publish_strategy(),
        id in 1u16..,
        cuts in proptest::collection::vec(any::<usize>(), 0..4),
    ) {
        let packets = vec![
            Packet::Publish(first),
            Packet::PubAck(id),
            Packet::Subscribe(Subscribe {
                packet_id: id,
                filters: vec![("home/#".to_string(), 1)],
            }),
            Packet::PingResp,
            Packet::Publish(second),
        ];
        let mut stream = Vec::new();
        for packet in &packets {
            stream.extend_from_slice(&packet.encode().unwrap());
        }
        prop_assert_eq!(reassemble(&stream, &cuts), packets);
    }

    #[test]
    fn arbitrary_bytes_never_panic(chunks in proptest::collection::vec(
        proptest::collection::vec(any::<u8>(), 0..64),
        0..16,
    )) {
        let mut reassembler = StreamReassembler::new();
        for chunk in &chunks {
            for result in reassembler.feed(chunk) {
                if let Ok(raw) = result {
                    let _ = Packet::decode(&raw);
                }
            }
        }
    }
}
