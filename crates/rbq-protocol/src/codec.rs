use crate::{
    Message, MessageType, ProtocolError, Result, Tlv, HEADER_LEN, MAGIC, MAX_PAYLOAD_LEN, VERSION,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Encode a message into a single buffer.
///
/// Fails only when a TLV value does not fit the 2-byte length field.
pub fn encode(message: &Message) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(HEADER_LEN + message.payload_len());
    write_message(message, &mut dst)?;
    Ok(dst.freeze())
}

/// Decode one message from the start of `buf`.
///
/// Bytes past the declared payload are ignored.
pub fn decode(buf: &[u8]) -> Result<Message> {
    let (msg_type, payload_len) = read_header(buf)?;
    let available = buf.len() - HEADER_LEN;
    if available < payload_len {
        return Err(ProtocolError::TruncatedPayload {
            declared: payload_len,
            available,
        });
    }

    let payload = Bytes::copy_from_slice(&buf[HEADER_LEN..HEADER_LEN + payload_len]);
    let tlvs = read_tlvs(payload)?;
    Ok(Message { msg_type, tlvs })
}

/// Validate the fixed header and return the message type and payload length.
fn read_header(buf: &[u8]) -> Result<(MessageType, usize)> {
    if buf.len() < HEADER_LEN {
        return Err(ProtocolError::BufferTooShort(buf.len()));
    }

    let mut magic = [0u8; 4];
    magic.copy_from_slice(&buf[0..4]);
    if &magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }

    let version = buf[4];
    if version != VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let msg_type = MessageType::from_u8(buf[5]).ok_or(ProtocolError::UnknownMessageType(buf[5]))?;

    // buf[6..8] holds the reserved flags
    let payload_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;

    Ok((msg_type, payload_len))
}

fn read_tlvs(mut payload: Bytes) -> Result<Vec<Tlv>> {
    let total = payload.len();
    let mut tlvs = Vec::new();

    while payload.has_remaining() {
        let offset = total - payload.remaining();
        if payload.remaining() < 3 {
            return Err(ProtocolError::TruncatedTlv { offset });
        }
        let tag = payload.get_u8();
        let len = payload.get_u16() as usize;
        if payload.remaining() < len {
            return Err(ProtocolError::TruncatedTlv { offset });
        }
        let value = payload.split_to(len);
        tlvs.push(Tlv { tag, value });
    }

    Ok(tlvs)
}

fn write_message(message: &Message, dst: &mut BytesMut) -> Result<()> {
    for tlv in &message.tlvs {
        if tlv.value.len() > u16::MAX as usize {
            return Err(ProtocolError::ValueTooLong {
                tag: tlv.tag,
                len: tlv.value.len(),
            });
        }
    }

    let payload_len = message.payload_len();
    let payload_len_u32 =
        u32::try_from(payload_len).map_err(|_| ProtocolError::PayloadTooLarge(payload_len))?;

    dst.reserve(HEADER_LEN + payload_len);

    dst.put_slice(MAGIC);
    dst.put_u8(VERSION);
    dst.put_u8(message.msg_type.as_u8());
    dst.put_u16(0);
    dst.put_u32(payload_len_u32);

    for tlv in &message.tlvs {
        dst.put_u8(tlv.tag);
        dst.put_u16(tlv.value.len() as u16);
        dst.put_slice(&tlv.value);
    }

    Ok(())
}

/// Stream codec for RBQ1 frames.
///
/// Yields a message only once the header and the full declared payload
/// have arrived, so a partial socket read never produces a truncated message.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let (msg_type, payload_len) = read_header(&src[..])?;

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge(payload_len));
        }

        let frame_len = HEADER_LEN + payload_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(payload_len).freeze();
        let tlvs = read_tlvs(payload)?;

        Ok(Some(Message { msg_type, tlvs }))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        write_message(&item, dst)
    }
}
