//! Control packet model for MQTT 3.1 (`MQIsdp`)
//!
//! A raw [`ControlPacket`] is what the stream reassembler hands out: a decoded
//! fixed header plus the bytes that follow it. [`Packet`] is the typed view the
//! client dispatches on.

use bytes::Bytes;
use std::fmt;

/// Control packet types, numbered as they appear in the high nibble of byte 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Map the high nibble of a fixed header back to a packet type.
    /// Returns `None` for the reserved values 0 and 15.
    pub fn from_nibble(value: u8) -> Option<Self> {
        let packet_type = match value {
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            5 => PacketType::PubRec,
            6 => PacketType::PubRel,
            7 => PacketType::PubComp,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            10 => PacketType::Unsubscribe,
            11 => PacketType::UnsubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            _ => return None,
        };
        Some(packet_type)
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketType::Connect => "CONNECT",
            PacketType::ConnAck => "CONNACK",
            PacketType::Publish => "PUBLISH",
            PacketType::PubAck => "PUBACK",
            PacketType::PubRec => "PUBREC",
            PacketType::PubRel => "PUBREL",
            PacketType::PubComp => "PUBCOMP",
            PacketType::Subscribe => "SUBSCRIBE",
            PacketType::SubAck => "SUBACK",
            PacketType::Unsubscribe => "UNSUBSCRIBE",
            PacketType::UnsubAck => "UNSUBACK",
            PacketType::PingReq => "PINGREQ",
            PacketType::PingResp => "PINGRESP",
            PacketType::Disconnect => "DISCONNECT",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Quality of service levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum QoS {
    /// Fire and forget
    #[default]
    AtMostOnce = 0,
    /// Acknowledged with PUBACK
    AtLeastOnce = 1,
    /// PUBREC/PUBREL/PUBCOMP exchange; only best-effort in this client
    ExactlyOnce = 2,
}

impl QoS {
    /// Decode the two QoS bits. The value 3 is reserved.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Decoded first byte and remaining length of a control packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    /// Byte count following the fixed header
    pub remaining_length: u32,
    /// Size of the fixed header itself: 1 type byte plus 1-4 length bytes
    pub header_length: usize,
}

impl FixedHeader {
    /// Size of the whole packet on the wire
    pub fn packet_length(&self) -> usize {
        self.header_length + self.remaining_length as usize
    }
}

/// A complete packet as it came off the wire. Immutable once built.
///
/// `payload` holds exactly `remaining_length` bytes: everything after the
/// fixed header, variable header included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub packet_type: PacketType,
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub remaining_length: u32,
    pub payload: Bytes,
}

impl ControlPacket {
    pub fn new(header: FixedHeader, payload: Bytes) -> Self {
        debug_assert_eq!(header.remaining_length as usize, payload.len());
        Self {
            packet_type: header.packet_type,
            dup: header.dup,
            qos: header.qos,
            retain: header.retain,
            remaining_length: header.remaining_length,
            payload,
        }
    }
}

/// Last-will message registered with the broker at connect time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// CONNECT packet contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub will: Option<Will>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
}

/// CONNACK return codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUsernameOrPassword,
    NotAuthorized,
    /// Anything above 5; not defined by the protocol
    Unknown(u8),
}

impl ConnectReturnCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => ConnectReturnCode::Accepted,
            1 => ConnectReturnCode::UnacceptableProtocolVersion,
            2 => ConnectReturnCode::IdentifierRejected,
            3 => ConnectReturnCode::ServerUnavailable,
            4 => ConnectReturnCode::BadUsernameOrPassword,
            5 => ConnectReturnCode::NotAuthorized,
            other => ConnectReturnCode::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ConnectReturnCode::Accepted => 0,
            ConnectReturnCode::UnacceptableProtocolVersion => 1,
            ConnectReturnCode::IdentifierRejected => 2,
            ConnectReturnCode::ServerUnavailable => 3,
            ConnectReturnCode::BadUsernameOrPassword => 4,
            ConnectReturnCode::NotAuthorized => 5,
            ConnectReturnCode::Unknown(code) => code,
        }
    }

    /// Human-readable reason reported to the caller
    pub fn reason(self) -> String {
        match self {
            ConnectReturnCode::Accepted => "Connection Accepted".to_string(),
            ConnectReturnCode::UnacceptableProtocolVersion => {
                "Connection Refused: unacceptable protocol version".to_string()
            }
            ConnectReturnCode::IdentifierRejected => {
                "Connection Refused: identifier rejected".to_string()
            }
            ConnectReturnCode::ServerUnavailable => {
                "Connection Refused: server unavailable".to_string()
            }
            ConnectReturnCode::BadUsernameOrPassword => {
                "Connection Refused: bad user name or password".to_string()
            }
            ConnectReturnCode::NotAuthorized => "Connection Refused: not authorized".to_string(),
            ConnectReturnCode::Unknown(code) => format!("Unknown Error: #{code}"),
        }
    }
}

/// CONNACK packet contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub return_code: ConnectReturnCode,
}

/// PUBLISH packet contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    /// Present exactly when `qos` is above 0
    pub packet_id: Option<u16>,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
}

/// SUBSCRIBE packet contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    /// (topic filter, requested QoS masked to the low two bits)
    pub filters: Vec<(String, u8)>,
}

/// SUBACK packet contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub granted_qos: u8,
}

/// UNSUBSCRIBE packet contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

/// Typed control packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(u16),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_nibbles() {
        for nibble in 1..=14u8 {
            let packet_type = PacketType::from_nibble(nibble).unwrap();
            assert_eq!(packet_type as u8, nibble);
        }
        assert_eq!(PacketType::from_nibble(0), None);
        assert_eq!(PacketType::from_nibble(15), None);
    }

    #[test]
    fn test_qos_bits() {
        assert_eq!(QoS::from_bits(0), Some(QoS::AtMostOnce));
        assert_eq!(QoS::from_bits(2), Some(QoS::ExactlyOnce));
        assert_eq!(QoS::from_bits(3), None);
        assert_eq!(QoS::default(), QoS::AtMostOnce);
    }

    #[test]
    fn test_return_code_reasons() {
        assert_eq!(
            ConnectReturnCode::from_u8(1).reason(),
            "Connection Refused: unacceptable protocol version"
        );
        assert_eq!(
            ConnectReturnCode::from_u8(4).reason(),
            "Connection Refused: bad user name or password"
        );
        assert_eq!(
            ConnectReturnCode::from_u8(5).reason(),
            "Connection Refused: not authorized"
        );
        assert_eq!(ConnectReturnCode::from_u8(9).reason(), "Unknown Error: #9");
        assert_eq!(ConnectReturnCode::from_u8(9).as_u8(), 9);
    }

    #[test]
    fn test_packet_length() {
        let header = FixedHeader {
            packet_type: PacketType::Publish,
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            remaining_length: 200,
            header_length: 3,
        };
        assert_eq!(header.packet_length(), 203);
    }
}
