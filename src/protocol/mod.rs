//! MQTT 3.1 wire protocol
//!
//! Packet types, the encode/decode functions for them, and the reassembler that
//! cuts a byte stream into packets.

pub mod codec;
pub mod packet;
pub mod reassembler;

pub use codec::{decode_fixed_header, encode_fixed_header};
pub use packet::{
    ConnAck, Connect, ConnectReturnCode, ControlPacket, FixedHeader, Packet, PacketType, Publish,
    QoS, SubAck, Subscribe, Unsubscribe, Will,
};
pub use reassembler::StreamReassembler;
