//! Packet codec
//!
//! Pure functions turning [`Packet`] values into wire bytes and back. Nothing in
//! here holds state; the reassembler decides when enough bytes are available.

use crate::error::CodecError;
use crate::protocol::packet::{
    ConnAck, Connect, ConnectReturnCode, ControlPacket, FixedHeader, Packet, PacketType, Publish,
    QoS, SubAck, Subscribe, Unsubscribe, Will,
};
use bytes::{BufMut, Bytes, BytesMut};

/// Protocol name carried in the CONNECT variable header
pub const PROTOCOL_NAME: &str = "MQIsdp";
/// Protocol level for MQTT 3.1
pub const PROTOCOL_LEVEL: u8 = 3;
/// Largest value the four-byte remaining length can carry
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

const CONNECT_VARIABLE_HEADER_LEN: usize = 12;

const FLAG_USERNAME: u8 = 0x80;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_WILL_RETAIN: u8 = 0x20;
const FLAG_WILL: u8 = 0x04;
const FLAG_CLEAN_SESSION: u8 = 0x02;

/// Append the base-128 remaining length to `buf`
pub fn encode_remaining_length(length: usize, buf: &mut BytesMut) -> Result<(), CodecError> {
    if length > MAX_REMAINING_LENGTH {
        return Err(CodecError::TooLarge(length));
    }

    let mut value = length;
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            return Ok(());
        }
    }
}

/// Decode a remaining length from the bytes that follow the type byte.
///
/// Returns `Ok(None)` when the varint is cut short, otherwise the value and the
/// number of bytes it used.
pub fn decode_remaining_length(bytes: &[u8]) -> Result<Option<(u32, usize)>, CodecError> {
    let mut value: u32 = 0;
    let mut multiplier: u32 = 1;

    for (index, byte) in bytes.iter().enumerate() {
        if index == 4 {
            return Err(CodecError::MalformedRemainingLength);
        }
        value += u32::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
        multiplier *= 128;
    }

    if bytes.len() >= 4 {
        return Err(CodecError::MalformedRemainingLength);
    }
    Ok(None)
}

/// Build a fixed header: type and flags in byte 0, then the remaining length
pub fn encode_fixed_header(
    packet_type: PacketType,
    dup: bool,
    qos: QoS,
    retain: bool,
    remaining_length: usize,
) -> Result<BytesMut, CodecError> {
    let mut buf = BytesMut::with_capacity(5);
    let first = ((packet_type as u8) << 4)
        | (u8::from(dup) << 3)
        | (qos.as_u8() << 1)
        | u8::from(retain);
    buf.put_u8(first);
    encode_remaining_length(remaining_length, &mut buf)?;
    Ok(buf)
}

/// Decode a fixed header from the start of `bytes`.
///
/// `Ok(None)` means more bytes are needed before anything can be said.
pub fn decode_fixed_header(bytes: &[u8]) -> Result<Option<FixedHeader>, CodecError> {
    let Some(&first) = bytes.first() else {
        return Ok(None);
    };

    // length first, so a caller can skip a packet whose flags are invalid
    let Some((remaining_length, length_bytes)) = decode_remaining_length(&bytes[1..])? else {
        return Ok(None);
    };

    let nibble = first >> 4;
    let packet_type =
        PacketType::from_nibble(nibble).ok_or(CodecError::ReservedPacketType(nibble))?;
    let qos_bits = (first >> 1) & 0x03;
    let qos = QoS::from_bits(qos_bits).ok_or(CodecError::InvalidQos(qos_bits))?;

    Ok(Some(FixedHeader {
        packet_type,
        dup: first & 0x08 != 0,
        qos,
        retain: first & 0x01 != 0,
        remaining_length,
        header_length: 1 + length_bytes,
    }))
}

fn put_field(buf: &mut BytesMut, field: &[u8]) -> Result<(), CodecError> {
    let len = u16::try_from(field.len()).map_err(|_| CodecError::FieldTooLong(field.len()))?;
    buf.put_u16(len);
    buf.put_slice(field);
    Ok(())
}

fn field_len(field: &[u8]) -> usize {
    2 + field.len()
}

fn finish(
    packet_type: PacketType,
    dup: bool,
    qos: QoS,
    retain: bool,
    body: BytesMut,
) -> Result<Bytes, CodecError> {
    let mut packet = encode_fixed_header(packet_type, dup, qos, retain, body.len())?;
    packet.extend_from_slice(&body);
    Ok(packet.freeze())
}

/// Encode a CONNECT packet.
///
/// Optional fields are left out entirely when absent, length prefix included.
pub fn encode_connect(connect: &Connect) -> Result<Bytes, CodecError> {
    let mut flags = 0u8;
    let mut payload_len = field_len(connect.client_id.as_bytes());

    if let Some(will) = &connect.will {
        flags |= FLAG_WILL | (will.qos.as_u8() << 3);
        if will.retain {
            flags |= FLAG_WILL_RETAIN;
        }
        payload_len += field_len(will.topic.as_bytes()) + field_len(&will.message);
    }
    if let Some(username) = &connect.username {
        flags |= FLAG_USERNAME;
        payload_len += field_len(username.as_bytes());
    }
    if let Some(password) = &connect.password {
        flags |= FLAG_PASSWORD;
        payload_len += field_len(password.as_bytes());
    }
    if connect.clean_session {
        flags |= FLAG_CLEAN_SESSION;
    }

    let mut body = BytesMut::with_capacity(CONNECT_VARIABLE_HEADER_LEN + payload_len);
    put_field(&mut body, PROTOCOL_NAME.as_bytes())?;
    body.put_u8(PROTOCOL_LEVEL);
    body.put_u8(flags);
    body.put_u16(connect.keep_alive_secs);

    put_field(&mut body, connect.client_id.as_bytes())?;
    if let Some(will) = &connect.will {
        put_field(&mut body, will.topic.as_bytes())?;
        put_field(&mut body, &will.message)?;
    }
    if let Some(username) = &connect.username {
        put_field(&mut body, username.as_bytes())?;
    }
    if let Some(password) = &connect.password {
        put_field(&mut body, password.as_bytes())?;
    }

    finish(PacketType::Connect, false, QoS::AtMostOnce, false, body)
}

/// Encode a CONNACK packet. Only brokers send these; used by the mock broker.
pub fn encode_connack(return_code: ConnectReturnCode) -> Result<Bytes, CodecError> {
    let mut body = BytesMut::with_capacity(2);
    body.put_u8(0);
    body.put_u8(return_code.as_u8());
    finish(PacketType::ConnAck, false, QoS::AtMostOnce, false, body)
}

/// Encode a PUBLISH packet; the packet id is written only for QoS above 0
pub fn encode_publish(publish: &Publish) -> Result<Bytes, CodecError> {
    let mut body = BytesMut::with_capacity(
        field_len(publish.topic.as_bytes()) + 2 + publish.payload.len(),
    );
    put_field(&mut body, publish.topic.as_bytes())?;
    if publish.qos != QoS::AtMostOnce {
        body.put_u16(publish.packet_id.unwrap_or(0));
    }
    body.put_slice(&publish.payload);
    finish(
        PacketType::Publish,
        publish.dup,
        publish.qos,
        publish.retain,
        body,
    )
}

fn encode_id_only(packet_type: PacketType, qos: QoS, packet_id: u16) -> Bytes {
    let [high, low] = packet_id.to_be_bytes();
    let first = ((packet_type as u8) << 4) | (qos.as_u8() << 1);
    Bytes::copy_from_slice(&[first, 0x02, high, low])
}

pub fn encode_puback(packet_id: u16) -> Bytes {
    encode_id_only(PacketType::PubAck, QoS::AtMostOnce, packet_id)
}

pub fn encode_pubrec(packet_id: u16) -> Bytes {
    encode_id_only(PacketType::PubRec, QoS::AtMostOnce, packet_id)
}

/// PUBREL carries the QoS 1 flag in its fixed header (`0x62`)
pub fn encode_pubrel(packet_id: u16) -> Bytes {
    encode_id_only(PacketType::PubRel, QoS::AtLeastOnce, packet_id)
}

pub fn encode_pubcomp(packet_id: u16) -> Bytes {
    encode_id_only(PacketType::PubComp, QoS::AtMostOnce, packet_id)
}

pub fn encode_unsuback(packet_id: u16) -> Bytes {
    encode_id_only(PacketType::UnsubAck, QoS::AtMostOnce, packet_id)
}

/// Encode a SUBSCRIBE packet. Requested QoS is masked to its low two bits.
pub fn encode_subscribe(subscribe: &Subscribe) -> Result<Bytes, CodecError> {
    let mut body = BytesMut::new();
    body.put_u16(subscribe.packet_id);
    for (filter, qos) in &subscribe.filters {
        put_field(&mut body, filter.as_bytes())?;
        body.put_u8(qos & 0x03);
    }
    finish(PacketType::Subscribe, false, QoS::AtLeastOnce, false, body)
}

pub fn encode_suback(suback: &SubAck) -> Result<Bytes, CodecError> {
    let mut body = BytesMut::with_capacity(3);
    body.put_u16(suback.packet_id);
    body.put_u8(suback.granted_qos);
    finish(PacketType::SubAck, false, QoS::AtMostOnce, false, body)
}

pub fn encode_unsubscribe(unsubscribe: &Unsubscribe) -> Result<Bytes, CodecError> {
    let mut body = BytesMut::new();
    body.put_u16(unsubscribe.packet_id);
    for filter in &unsubscribe.filters {
        put_field(&mut body, filter.as_bytes())?;
    }
    finish(PacketType::Unsubscribe, false, QoS::AtLeastOnce, false, body)
}

pub fn encode_pingreq() -> Bytes {
    Bytes::from_static(&[0xC0, 0x00])
}

pub fn encode_pingresp() -> Bytes {
    Bytes::from_static(&[0xD0, 0x00])
}

pub fn encode_disconnect() -> Bytes {
    Bytes::from_static(&[0xE0, 0x00])
}

impl Packet {
    /// Encode into wire bytes
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        match self {
            Packet::Connect(connect) => encode_connect(connect),
            Packet::ConnAck(connack) => encode_connack(connack.return_code),
            Packet::Publish(publish) => encode_publish(publish),
            Packet::PubAck(id) => Ok(encode_puback(*id)),
            Packet::PubRec(id) => Ok(encode_pubrec(*id)),
            Packet::PubRel(id) => Ok(encode_pubrel(*id)),
            Packet::PubComp(id) => Ok(encode_pubcomp(*id)),
            Packet::Subscribe(subscribe) => encode_subscribe(subscribe),
            Packet::SubAck(suback) => encode_suback(suback),
            Packet::Unsubscribe(unsubscribe) => encode_unsubscribe(unsubscribe),
            Packet::UnsubAck(id) => Ok(encode_unsuback(*id)),
            Packet::PingReq => Ok(encode_pingreq()),
            Packet::PingResp => Ok(encode_pingresp()),
            Packet::Disconnect => Ok(encode_disconnect()),
        }
    }

    /// Decode a complete packet handed out by the reassembler
    pub fn decode(packet: &ControlPacket) -> Result<Packet, CodecError> {
        let decoded = match packet.packet_type {
            PacketType::Connect => Packet::Connect(decode_connect(packet)?),
            PacketType::ConnAck => Packet::ConnAck(decode_connack(packet)?),
            PacketType::Publish => Packet::Publish(decode_publish(packet)?),
            PacketType::PubAck => Packet::PubAck(decode_packet_id(packet)?),
            PacketType::PubRec => Packet::PubRec(decode_packet_id(packet)?),
            PacketType::PubRel => Packet::PubRel(decode_packet_id(packet)?),
            PacketType::PubComp => Packet::PubComp(decode_packet_id(packet)?),
            PacketType::Subscribe => Packet::Subscribe(decode_subscribe(packet)?),
            PacketType::SubAck => Packet::SubAck(decode_suback(packet)?),
            PacketType::Unsubscribe => Packet::Unsubscribe(decode_unsubscribe(packet)?),
            PacketType::UnsubAck => Packet::UnsubAck(decode_packet_id(packet)?),
            PacketType::PingReq => Packet::PingReq,
            PacketType::PingResp => Packet::PingResp,
            PacketType::Disconnect => Packet::Disconnect,
        };
        Ok(decoded)
    }
}

/// Bounds-checked cursor over a packet body
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    packet: PacketType,
}

impl<'a> Reader<'a> {
    fn new(packet: &'a ControlPacket) -> Self {
        Self {
            bytes: &packet.payload,
            pos: 0,
            packet: packet.packet_type,
        }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::format(
                self.packet,
                self.pos + n,
                self.bytes.len(),
            ));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn field(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u16()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let packet = self.packet;
        let bytes = self.field()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { packet })
    }
}

fn require(packet: &ControlPacket, min: usize) -> Result<(), CodecError> {
    if packet.payload.len() < min {
        return Err(CodecError::format(
            packet.packet_type,
            min,
            packet.payload.len(),
        ));
    }
    Ok(())
}

pub fn decode_connack(packet: &ControlPacket) -> Result<ConnAck, CodecError> {
    require(packet, 2)?;
    Ok(ConnAck {
        return_code: ConnectReturnCode::from_u8(packet.payload[1]),
    })
}

/// PUBACK, PUBREC, PUBREL, PUBCOMP and UNSUBACK all carry just a packet id
pub fn decode_packet_id(packet: &ControlPacket) -> Result<u16, CodecError> {
    require(packet, 2)?;
    Ok(u16::from_be_bytes([packet.payload[0], packet.payload[1]]))
}

pub fn decode_suback(packet: &ControlPacket) -> Result<SubAck, CodecError> {
    require(packet, 3)?;
    Ok(SubAck {
        packet_id: u16::from_be_bytes([packet.payload[0], packet.payload[1]]),
        granted_qos: packet.payload[2],
    })
}

pub fn decode_publish(packet: &ControlPacket) -> Result<Publish, CodecError> {
    require(packet, 2)?;
    let mut reader = Reader::new(packet);
    let topic = reader.string()?;
    let packet_id = match packet.qos {
        QoS::AtMostOnce => None,
        _ => Some(reader.u16()?),
    };
    let offset = reader.pos;

    Ok(Publish {
        topic,
        packet_id,
        payload: packet.payload.slice(offset..),
        qos: packet.qos,
        retain: packet.retain,
        dup: packet.dup,
    })
}

pub fn decode_connect(packet: &ControlPacket) -> Result<Connect, CodecError> {
    require(packet, CONNECT_VARIABLE_HEADER_LEN)?;
    let mut reader = Reader::new(packet);
    let _protocol_name = reader.field()?;
    let _protocol_level = reader.u8()?;
    let flags = reader.u8()?;
    let keep_alive_secs = reader.u16()?;
    let client_id = reader.string()?;

    let will = if flags & FLAG_WILL != 0 {
        let will_qos_bits = (flags >> 3) & 0x03;
        let topic = reader.string()?;
        let message = reader.field()?.to_vec();
        Some(Will {
            topic,
            message,
            qos: QoS::from_bits(will_qos_bits).ok_or(CodecError::InvalidQos(will_qos_bits))?,
            retain: flags & FLAG_WILL_RETAIN != 0,
        })
    } else {
        None
    };
    let username = if flags & FLAG_USERNAME != 0 {
        Some(reader.string()?)
    } else {
        None
    };
    let password = if flags & FLAG_PASSWORD != 0 {
        Some(reader.string()?)
    } else {
        None
    };

    Ok(Connect {
        client_id,
        username,
        password,
        will,
        keep_alive_secs,
        clean_session: flags & FLAG_CLEAN_SESSION != 0,
    })
}

pub fn decode_subscribe(packet: &ControlPacket) -> Result<Subscribe, CodecError> {
    require(packet, 2)?;
    let mut reader = Reader::new(packet);
    let packet_id = reader.u16()?;
    let mut filters = Vec::new();
    while reader.remaining() > 0 {
        let filter = reader.string()?;
        let qos = reader.u8()? & 0x03;
        filters.push((filter, qos));
    }
    Ok(Subscribe { packet_id, filters })
}

pub fn decode_unsubscribe(packet: &ControlPacket) -> Result<Unsubscribe, CodecError> {
    require(packet, 2)?;
    let mut reader = Reader::new(packet);
    let packet_id = reader.u16()?;
    let mut filters = Vec::new();
    while reader.remaining() > 0 {
        filters.push(reader.string()?);
    }
    Ok(Unsubscribe { packet_id, filters })
}

/// Split a complete, single-packet byte slice into its raw form.
///
/// Fails when the slice is shorter or longer than its fixed header says.
pub fn decode_control_packet(bytes: &[u8]) -> Result<ControlPacket, CodecError> {
    let header = decode_fixed_header(bytes)?.ok_or(CodecError::MalformedRemainingLength)?;
    if header.packet_length() != bytes.len() {
        return Err(CodecError::format(
            header.packet_type,
            header.packet_length(),
            bytes.len(),
        ));
    }
    Ok(ControlPacket::new(
        header,
        Bytes::copy_from_slice(&bytes[header.header_length..]),
    ))
}
