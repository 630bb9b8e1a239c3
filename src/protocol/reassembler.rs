//! Stream reassembly
//!
//! Turns the arbitrary chunks a byte stream delivers into complete control
//! packets. At most one partial buffer is held at a time: either an incomplete
//! fixed header or an incomplete packet body, never both. A packet whose header
//! carries invalid flags but a readable length is reported and skipped, so the
//! packets after it still parse.

use crate::error::CodecError;
use crate::protocol::codec::{decode_fixed_header, decode_remaining_length};
use crate::protocol::packet::{ControlPacket, FixedHeader};
use bytes::{Bytes, BytesMut};
use std::mem;

/// Upper bound on the buffer reserved up front for a partial packet
const INITIAL_BODY_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Default)]
enum Pending {
    #[default]
    Idle,
    /// Bytes of a fixed header whose remaining length is not yet complete
    Header(BytesMut),
    /// A decoded header plus the packet bytes received so far, header included
    Body { header: FixedHeader, buf: BytesMut },
    /// Bytes still to drop from a packet that was rejected
    Skip(usize),
}

/// Accumulates transport bytes into complete [`ControlPacket`]s
#[derive(Debug, Default)]
pub struct StreamReassembler {
    pending: Pending,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partially received packet
    pub fn reset(&mut self) {
        self.pending = Pending::Idle;
    }

    /// True while a partial header or body is buffered
    pub fn has_partial(&self) -> bool {
        !matches!(self.pending, Pending::Idle)
    }

    /// Feed one chunk and collect every packet it completes, in arrival order.
    ///
    /// A header with a reserved type or QoS yields an `Err` and its packet is
    /// skipped. A malformed remaining length ends the batch and discards
    /// whatever is buffered, since the stream position is lost.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<ControlPacket, CodecError>> {
        let mut packets = Vec::new();
        let joined: BytesMut;

        let mut input: &[u8] = match mem::take(&mut self.pending) {
            Pending::Idle => chunk,
            Pending::Header(mut buf) => {
                buf.extend_from_slice(chunk);
                joined = buf;
                &joined
            }
            Pending::Body { header, mut buf } => {
                let missing = header.packet_length() - buf.len();
                if chunk.len() < missing {
                    buf.extend_from_slice(chunk);
                    self.pending = Pending::Body { header, buf };
                    return packets;
                }
                buf.extend_from_slice(&chunk[..missing]);
                let payload = buf.freeze().slice(header.header_length..);
                packets.push(Ok(ControlPacket::new(header, payload)));
                &chunk[missing..]
            }
            Pending::Skip(missing) => {
                if chunk.len() < missing {
                    self.pending = Pending::Skip(missing - chunk.len());
                    return packets;
                }
                &chunk[missing..]
            }
        };

        while !input.is_empty() {
            let header = match decode_fixed_header(input) {
                Ok(Some(header)) => header,
                Ok(None) => {
                    self.pending = Pending::Header(BytesMut::from(input));
                    break;
                }
                Err(e) => {
                    let Ok(Some((remaining_length, length_bytes))) =
                        decode_remaining_length(&input[1..])
                    else {
                        tracing::debug!(
                            target: "mqtt_client",
                            "Discarding {} buffered bytes after header error: {}",
                            input.len(),
                            e
                        );
                        packets.push(Err(e));
                        break;
                    };

                    let total = 1 + length_bytes + remaining_length as usize;
                    tracing::debug!(
                        target: "mqtt_client",
                        "Skipping {} byte packet after header error: {}",
                        total,
                        e
                    );
                    packets.push(Err(e));
                    if input.len() < total {
                        self.pending = Pending::Skip(total - input.len());
                        break;
                    }
                    input = &input[total..];
                    continue;
                }
            };

            let total = header.packet_length();
            if input.len() < total {
                let mut buf = BytesMut::with_capacity(total.min(INITIAL_BODY_CAPACITY));
                buf.extend_from_slice(input);
                self.pending = Pending::Body { header, buf };
                break;
            }

            let payload = Bytes::copy_from_slice(&input[header.header_length..total]);
            packets.push(Ok(ControlPacket::new(header, payload)));
            input = &input[total..];
        }

        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::PacketType;

    const PUBLISH: &[u8] = b"\x30\x07\x00\x03a/bhi";
    const PINGRESP: &[u8] = &[0xD0, 0x00];

    fn ok(results: Vec<Result<ControlPacket, CodecError>>) -> Vec<ControlPacket> {
        results.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_whole_packet_in_one_chunk() {
        let mut reassembler = StreamReassembler::new();
        let packets = ok(reassembler.feed(PUBLISH));
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].packet_type, PacketType::Publish);
        assert_eq!(&packets[0].payload[..], &PUBLISH[2..]);
        assert!(!reassembler.has_partial());
    }

    #[test]
    fn test_split_at_every_boundary() {
        for split in 0..=PUBLISH.len() {
            let mut reassembler = StreamReassembler::new();
            let mut packets = ok(reassembler.feed(&PUBLISH[..split]));
            packets.extend(ok(reassembler.feed(&PUBLISH[split..])));
            assert_eq!(packets.len(), 1, "split at {split}");
            assert_eq!(&packets[0].payload[..], &PUBLISH[2..]);
        }
    }

    #[test]
    fn test_byte_by_byte() {
        let mut reassembler = StreamReassembler::new();
        let mut packets = Vec::new();
        for byte in PUBLISH {
            packets.extend(ok(reassembler.feed(std::slice::from_ref(byte))));
        }
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].remaining_length, 7);
    }

    #[test]
    fn test_partial_multi_byte_length() {
        let mut packet = vec![0x30, 0x80, 0x01, 0x00, 0x01, b't'];
        packet.extend(std::iter::repeat(b'x').take(125));
        assert_eq!(packet.len(), 3 + 128);

        let mut reassembler = StreamReassembler::new();
        assert!(reassembler.feed(&packet[..2]).is_empty());
        assert!(reassembler.has_partial());
        assert!(reassembler.feed(&packet[2..50]).is_empty());
        let packets = ok(reassembler.feed(&packet[50..]));
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload.len(), 128);
    }

    #[test]
    fn test_coalesced_packets_in_order() {
        let mut chunk = PUBLISH.to_vec();
        chunk.extend_from_slice(PINGRESP);

        let mut reassembler = StreamReassembler::new();
        let packets = ok(reassembler.feed(&chunk));
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].packet_type, PacketType::Publish);
        assert_eq!(packets[1].packet_type, PacketType::PingResp);
    }

    #[test]
    fn test_tail_of_one_packet_and_start_of_next() {
        let mut stream = PUBLISH.to_vec();
        stream.extend_from_slice(PUBLISH);

        let mut reassembler = StreamReassembler::new();
        assert!(reassembler.feed(&stream[..5]).is_empty());
        let packets = ok(reassembler.feed(&stream[5..13]));
        assert_eq!(packets.len(), 1);
        let packets = ok(reassembler.feed(&stream[13..]));
        assert_eq!(packets.len(), 1);
        assert!(!reassembler.has_partial());
    }

    #[test]
    fn test_reserved_type_is_skipped() {
        let mut reassembler = StreamReassembler::new();
        let results = reassembler.feed(&[0xD0, 0x00, 0x00, 0x00, 0xD0, 0x00]);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert_eq!(results[1], Err(CodecError::ReservedPacketType(0)));
        assert_eq!(results[2].as_ref().map(|p| p.packet_type), Ok(PacketType::PingResp));
        assert!(!reassembler.has_partial());
    }

    #[test]
    fn test_invalid_qos_then_valid_packet_in_same_chunk() {
        let mut reassembler = StreamReassembler::new();
        let results = reassembler.feed(&[0x36, 0x03, 0x00, 0x01, b'x', 0xD0, 0x00]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Err(CodecError::InvalidQos(3)));
        assert_eq!(results[1].as_ref().map(|p| p.packet_type), Ok(PacketType::PingResp));
        assert!(!reassembler.has_partial());
    }

    #[test]
    fn test_invalid_qos_body_split_across_chunks() {
        let mut reassembler = StreamReassembler::new();
        let first = reassembler.feed(&[0x36, 0x03, 0x00, 0x01]);
        assert_eq!(first, vec![Err(CodecError::InvalidQos(3))]);
        assert!(reassembler.has_partial());

        let second = ok(reassembler.feed(&[b'x', 0xD0, 0x00]));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].packet_type, PacketType::PingResp);

        let third = ok(reassembler.feed(PINGRESP));
        assert_eq!(third.len(), 1);
        assert!(!reassembler.has_partial());
    }

    #[test]
    fn test_invalid_qos_with_split_length() {
        let mut reassembler = StreamReassembler::new();
        assert!(reassembler.feed(&[0x36]).is_empty());
        let results = reassembler.feed(&[0x00, 0xD0, 0x00]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Err(CodecError::InvalidQos(3)));
        assert!(results[1].is_ok());
    }

    #[test]
    fn test_malformed_length_discards_buffer() {
        let mut reassembler = StreamReassembler::new();
        let results = reassembler.feed(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0xD0, 0x00]);
        assert_eq!(results, vec![Err(CodecError::MalformedRemainingLength)]);
        assert!(!reassembler.has_partial());

        let packets = ok(reassembler.feed(PINGRESP));
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_reset_drops_partial_packet() {
        let mut reassembler = StreamReassembler::new();
        reassembler.feed(&PUBLISH[..4]);
        assert!(reassembler.has_partial());
        reassembler.reset();
        assert!(!reassembler.has_partial());

        let packets = ok(reassembler.feed(PINGRESP));
        assert_eq!(packets[0].packet_type, PacketType::PingResp);
    }
}
