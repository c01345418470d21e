use bytes::Bytes;
use std::collections::BTreeMap;

/// TLV tags shared by the broker and its clients.
pub mod tags {
    /// Job id (UTF-8)
    pub const JOB_ID: u8 = 0x01;
    /// JSON job body or response payload
    pub const BODY: u8 = 0x02;
    /// Short status string
    pub const STATUS: u8 = 0x03;

    pub const STATUS_SUCCESS: &str = "success";
    pub const STATUS_EMPTY: &str = "No message to pop";
}

/// Message types for the TCP protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    JobPush = 0x01,
    JobAck = 0x02,
    Control = 0x20,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(MessageType::JobPush),
            0x02 => Some(MessageType::JobAck),
            0x20 => Some(MessageType::Control),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// A single tag-length-value record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u8,
    pub value: Bytes,
}

impl Tlv {
    pub fn new(tag: u8, value: impl Into<Bytes>) -> Self {
        Tlv {
            tag,
            value: value.into(),
        }
    }

    /// Bytes this record occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        3 + self.value.len()
    }
}

/// Decoded form of a TLV value: text when it is valid UTF-8, raw bytes otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlvValue {
    Text(String),
    Raw(Bytes),
}

impl TlvValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TlvValue::Text(s) => Some(s),
            TlvValue::Raw(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            TlvValue::Text(s) => s.as_bytes(),
            TlvValue::Raw(b) => b,
        }
    }
}

/// A protocol unit: a type and an ordered list of TLV records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    pub tlvs: Vec<Tlv>,
}

impl Message {
    pub fn new(msg_type: MessageType) -> Self {
        Message {
            msg_type,
            tlvs: Vec::new(),
        }
    }

    pub fn with_tlv(mut self, tag: u8, value: impl Into<Bytes>) -> Self {
        self.tlvs.push(Tlv::new(tag, value));
        self
    }

    /// Value carrying `tag`. If a tag repeats, the last record wins.
    pub fn get(&self, tag: u8) -> Option<&Bytes> {
        self.tlvs.iter().rev().find(|t| t.tag == tag).map(|t| &t.value)
    }

    /// Sum of the encoded TLV lengths, i.e. the header's payload length.
    pub fn payload_len(&self) -> usize {
        self.tlvs.iter().map(Tlv::encoded_len).sum()
    }

    /// Tag -> value map with UTF-8 decoding attempted per value.
    /// If a tag repeats, the last record wins.
    pub fn as_map(&self) -> BTreeMap<u8, TlvValue> {
        self.tlvs
            .iter()
            .map(|tlv| {
                let value = match std::str::from_utf8(&tlv.value) {
                    Ok(s) => TlvValue::Text(s.to_string()),
                    Err(_) => TlvValue::Raw(tlv.value.clone()),
                };
                (tlv.tag, value)
            })
            .collect()
    }

    /// Text value of the status tag, if present and UTF-8.
    pub fn status(&self) -> Option<&str> {
        self.get(tags::STATUS)
            .and_then(|value| std::str::from_utf8(value).ok())
    }
}
