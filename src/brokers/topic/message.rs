//! Message: the envelope exchanged with clients and stored in topics.
//!
//! Header byte layout (shared by disk records and wire frames):
//! [Type: 1][HeaderCount: 1] { [KeyLen: u16][Key][ValueLen: u32][Value] }*

use std::collections::HashMap;
use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::brokers::topic::errors::BrokerError;

// ========================================
// HEADER KEYS
// ========================================
pub const HEADER_TOPIC_NAME: &str = "topic.name";
pub const HEADER_PARTITION: &str = "partition";
pub const HEADER_CLIENT_ID: &str = "client.id";
pub const HEADER_OFFSET: &str = "offset";
pub const HEADER_TIMEOUT: &str = "timeout";
pub const HEADER_COUNT: &str = "count";
pub const HEADER_ERROR: &str = "error";
pub const CONDITION_PREFIX: &str = "condition.";

const MAX_HEADER_COUNT: usize = u8::MAX as usize;
const MAX_KEY_LEN: usize = u16::MAX as usize;

// ========================================
// MESSAGE TYPE
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ReqPull = 0,
    ResPull = 1,
    ReqPush = 2,
    ResPush = 3,
    ReqFind = 4,
    ResFind = 5,
    ReqSeek = 6,
    ResSeek = 7,
}

impl MessageType {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::ReqPull),
            1 => Some(Self::ResPull),
            2 => Some(Self::ReqPush),
            3 => Some(Self::ResPush),
            4 => Some(Self::ReqFind),
            5 => Some(Self::ResFind),
            6 => Some(Self::ReqSeek),
            7 => Some(Self::ResSeek),
            _ => None,
        }
    }

    /// Reply kind for a request kind. Response kinds map to themselves.
    pub fn response(self) -> Self {
        match self {
            Self::ReqPull | Self::ResPull => Self::ResPull,
            Self::ReqPush | Self::ResPush => Self::ResPush,
            Self::ReqFind | Self::ResFind => Self::ResFind,
            Self::ReqSeek | Self::ResSeek => Self::ResSeek,
        }
    }

    pub fn is_request(self) -> bool {
        self.as_byte() % 2 == 0
    }
}

// ========================================
// MESSAGE
// ========================================

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageType,
    pub header: HashMap<String, String>,
    pub payload: Option<Bytes>,
}

impl Message {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            header: HashMap::new(),
            payload: None,
        }
    }

    // --- Builders ---

    pub fn with_header(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.header.insert(key.into(), value.to_string());
        self
    }

    pub fn with_topic(self, topic: &str) -> Self {
        self.with_header(HEADER_TOPIC_NAME, topic)
    }

    pub fn with_partition(self, partition: &str) -> Self {
        self.with_header(HEADER_PARTITION, partition)
    }

    pub fn with_client_id(self, client_id: &str) -> Self {
        self.with_header(HEADER_CLIENT_ID, client_id)
    }

    pub fn with_offset(self, offset: i64) -> Self {
        self.with_header(HEADER_OFFSET, offset)
    }

    pub fn with_count(self, count: i64) -> Self {
        self.with_header(HEADER_COUNT, count)
    }

    pub fn with_timeout_ms(self, timeout_ms: u64) -> Self {
        self.with_header(HEADER_TIMEOUT, timeout_ms)
    }

    pub fn with_condition(self, key: &str, value: &str) -> Self {
        self.with_header(format!("{}{}", CONDITION_PREFIX, key), value)
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    // --- Header access ---

    pub fn header(&self, key: &str) -> Option<&str> {
        self.header.get(key).map(String::as_str)
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.header.insert(key.into(), value.to_string());
        self
    }

    pub fn merge_header(&mut self, other: &HashMap<String, String>) -> &mut Self {
        for (key, value) in other {
            self.header.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn set_error(&mut self, error: impl ToString) -> &mut Self {
        self.set_header(HEADER_ERROR, error)
    }

    pub fn error(&self) -> Option<&str> {
        self.header(HEADER_ERROR)
    }

    pub fn is_error(&self) -> bool {
        self.header.contains_key(HEADER_ERROR)
    }

    // --- Typed accessors (absent or empty values read as None) ---

    pub fn topic_name(&self) -> Option<&str> {
        self.non_empty(HEADER_TOPIC_NAME)
    }

    pub fn partition(&self) -> Option<&str> {
        self.non_empty(HEADER_PARTITION)
    }

    pub fn client_id(&self) -> Option<&str> {
        self.non_empty(HEADER_CLIENT_ID)
    }

    /// `-1` when absent or not a number.
    pub fn offset(&self) -> i64 {
        self.parsed(HEADER_OFFSET).unwrap_or(-1)
    }

    /// `1` when absent or not a number.
    pub fn count(&self) -> i64 {
        self.parsed(HEADER_COUNT).unwrap_or(1)
    }

    /// `0` when absent or not a number.
    pub fn timeout_ms(&self) -> u64 {
        self.parsed(HEADER_TIMEOUT).unwrap_or(0)
    }

    /// Every `condition.<key>` header, with the prefix stripped.
    pub fn condition(&self) -> HashMap<String, String> {
        self.header
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(CONDITION_PREFIX)
                    .map(|stripped| (stripped.to_string(), value.clone()))
            })
            .collect()
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        self.header(key).filter(|value| !value.is_empty())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.header(key).and_then(|value| value.parse().ok())
    }

    // ========================================
    // HEADER BYTES
    // ========================================

    /// Exact size of `encode_header` output.
    pub fn header_len(&self) -> usize {
        2 + self
            .header
            .iter()
            .map(|(k, v)| 2 + k.len() + 4 + v.len())
            .sum::<usize>()
    }

    /// Checks the header fits the byte layout (count in one byte, key length in two).
    pub fn validate_header(&self) -> Result<(), BrokerError> {
        if self.header.len() > MAX_HEADER_COUNT {
            return Err(BrokerError::Validation(format!(
                "too many headers ({}), max {}",
                self.header.len(),
                MAX_HEADER_COUNT
            )));
        }
        if let Some(key) = self.header.keys().find(|k| k.len() > MAX_KEY_LEN) {
            return Err(BrokerError::Validation(format!(
                "header key of {} bytes exceeds {}",
                key.len(),
                MAX_KEY_LEN
            )));
        }
        Ok(())
    }

    /// Appends `[type][count]{[keyLen][key][valueLen][value]}*` to `dst`.
    /// Callers validate first; oversize headers are truncated, never panic.
    pub fn encode_header(&self, dst: &mut BytesMut) {
        dst.reserve(self.header_len());
        dst.put_u8(self.kind.as_byte());
        dst.put_u8(self.header.len().min(MAX_HEADER_COUNT) as u8);
        for (key, value) in self.header.iter().take(MAX_HEADER_COUNT) {
            let key = &key.as_bytes()[..key.len().min(MAX_KEY_LEN)];
            dst.put_u16(key.len() as u16);
            dst.put_slice(key);
            dst.put_u32(value.len() as u32);
            dst.put_slice(value.as_bytes());
        }
    }

    /// Reads a header block produced by `encode_header`. The payload is left unset.
    pub fn decode_header(src: &mut impl Buf) -> io::Result<Self> {
        let kind_byte = read_u8(src)?;
        let kind = MessageType::from_byte(kind_byte)
            .ok_or_else(|| invalid(format!("unknown message type {}", kind_byte)))?;

        let count = read_u8(src)?;
        let mut header = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            if src.remaining() < 2 {
                return Err(invalid("truncated header key length"));
            }
            let key_len = src.get_u16() as usize;
            let key = read_string(src, key_len)?;

            if src.remaining() < 4 {
                return Err(invalid("truncated header value length"));
            }
            let value_len = src.get_u32() as usize;
            let value = read_string(src, value_len)?;

            header.insert(key, value);
        }

        Ok(Self {
            kind,
            header,
            payload: None,
        })
    }
}

fn read_u8(src: &mut impl Buf) -> io::Result<u8> {
    if !src.has_remaining() {
        return Err(invalid("truncated header"));
    }
    Ok(src.get_u8())
}

fn read_string(src: &mut impl Buf, len: usize) -> io::Result<String> {
    if src.remaining() < len {
        return Err(invalid("truncated header string"));
    }
    let bytes = src.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|e| invalid(e.to_string()))
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}
