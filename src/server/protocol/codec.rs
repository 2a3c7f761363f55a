use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::errors::ParseError;
use super::frame::{FrameHeader, MAGIC_BYTES, MAX_FRAME_LEN};
use crate::brokers::topic::message::Message;

#[derive(Debug, Default)]
pub struct BrokerCodec;

impl BrokerCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for BrokerCodec {
    type Item = Message;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if !resync(src) || src.len() < FrameHeader::SIZE {
                return Ok(None);
            }

            let length = match bytemuck::try_from_bytes::<FrameHeader>(&src[..FrameHeader::SIZE]) {
                Ok(header) if header.is_valid() => header.length(),
                _ => {
                    src.advance(1);
                    continue;
                }
            };
            if length > MAX_FRAME_LEN {
                warn!("[Codec] frame length {} exceeds limit, resyncing", length);
                src.advance(1);
                continue;
            }

            let total_len = FrameHeader::SIZE + length as usize;
            if src.len() < total_len {
                src.reserve(total_len - src.len());
                return Ok(None);
            }

            src.advance(FrameHeader::SIZE);
            let mut body = src.split_to(length as usize).freeze();
            match decode_body(&mut body) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => warn!("[Codec] dropping unparsable frame: {}", e),
            }
        }
    }
}

impl Encoder<Message> for BrokerCodec {
    type Error = ParseError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if let Err(e) = item.validate_header() {
            warn!("[Codec] dropping outbound {:?}: {}", item.kind, e);
            return Ok(());
        }

        let payload: &[u8] = item.payload.as_deref().unwrap_or(&[]);
        if payload.len() > u32::MAX as usize {
            return Err(ParseError::Encode(format!(
                "payload of {} bytes does not fit a frame",
                payload.len()
            )));
        }

        let length = item.header_len() + 4 + payload.len();
        dst.reserve(FrameHeader::SIZE + length);
        dst.extend_from_slice(bytemuck::bytes_of(&FrameHeader::new(length as u64)));
        item.encode_header(dst);
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(payload);
        Ok(())
    }
}

/// Drops bytes until the buffer starts with the magic. `false` when more
/// input is needed to find it.
fn resync(src: &mut BytesMut) -> bool {
    match src.windows(MAGIC_BYTES.len()).position(|w| w == MAGIC_BYTES) {
        Some(0) => true,
        Some(skip) => {
            warn!("[Codec] skipped {} bytes before frame magic", skip);
            src.advance(skip);
            true
        }
        None => {
            // A magic split across reads may start in the last 3 bytes.
            let keep = src.len().min(MAGIC_BYTES.len() - 1);
            src.advance(src.len() - keep);
            false
        }
    }
}

/// Header block, then an optional `[PayloadLen][Payload]` tail.
fn decode_body(body: &mut Bytes) -> io::Result<Message> {
    let mut message = Message::decode_header(body)?;
    if body.remaining() >= 4 {
        let payload_len = body.get_u32() as usize;
        if body.remaining() < payload_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "payload shorter than declared",
            ));
        }
        if payload_len > 0 {
            message.payload = Some(body.split_to(payload_len));
        }
    }
    Ok(message)
}
