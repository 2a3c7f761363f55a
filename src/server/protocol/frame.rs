//! Broker Wire Protocol: frame layout and constants
//!
//! Frame (all integers big-endian):
//! [Magic: 4 bytes = 0x6B3FA0FF] [Length: 8 bytes]
//! Body (Length bytes):
//! [Type: 1] [HeaderCount: 1] { [KeyLen: 2] [Key] [ValueLen: 4] [Value] }*
//! [PayloadLen: 4] [Payload]
//!
//! The same encoding is used in both directions.

use bytemuck::{Pod, Zeroable};

pub const MAGIC: u32 = 0x6B3F_A0FF;
pub const MAGIC_BYTES: [u8; 4] = MAGIC.to_be_bytes();

/// Frames larger than this are treated as garbage and skipped.
pub const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

// ========================================
// FRAME HEADER
// ========================================

/// Fixed-size Header: [Magic: 4] [Length: 8]
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameHeader {
    pub magic: [u8; 4],
    pub length: [u8; 8],
}

impl FrameHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(length: u64) -> Self {
        Self {
            magic: MAGIC_BYTES,
            length: length.to_be_bytes(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC_BYTES
    }

    /// Body length following the header.
    pub fn length(&self) -> u64 {
        u64::from_be_bytes(self.length)
    }
}
