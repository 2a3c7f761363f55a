//! Segment: one `.log` + `.idx` file pair covering `[start_offset, end_offset)`.
//!
//! Log record: [HeaderLen: u32][PayloadLen: u32][Header][Payload]
//! Index entry: [LogPosition: u64], one per record, so relative offset `k`
//! lives at index position `k * 8`.
//! Metadata entry (segments.log):
//! [Index: u32][LogPathLen: u32][LogPath][IdxPathLen: u32][IdxPath][StartOffset: u32][CreatedAt: u64]

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::warn;

use crate::brokers::topic::message::Message;
use crate::brokers::topic::record::TopicRecord;
use crate::utils::age_ms;

const INDEX_ENTRY_SIZE: u64 = 8;

#[derive(Default)]
struct SegmentFiles {
    log: Option<File>,
    idx: Option<File>,
}

impl SegmentFiles {
    fn open(&mut self, log_path: &Path, idx_path: &Path) -> io::Result<(&mut File, &mut File)> {
        if self.log.is_none() {
            self.log = Some(open_rw(log_path)?);
        }
        if self.idx.is_none() {
            self.idx = Some(open_rw(idx_path)?);
        }
        match (self.log.as_mut(), self.idx.as_mut()) {
            (Some(log), Some(idx)) => Ok((log, idx)),
            _ => Err(io::Error::new(io::ErrorKind::Other, "segment files unavailable")),
        }
    }
}

fn open_rw(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).read(true).append(true).open(path)
}

/// Segment boundaries as persisted in the metadata log.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentMeta {
    pub index: u32,
    pub log_path: PathBuf,
    pub idx_path: PathBuf,
    pub start_offset: u64,
    pub created_at: u64,
}

impl SegmentMeta {
    /// Appends the metadata entry. Paths inside `dir` are stored by file name.
    pub fn encode(&self, dir: &Path, dst: &mut BytesMut) {
        let log = stored_path(&self.log_path, dir);
        let idx = stored_path(&self.idx_path, dir);
        dst.put_u32(self.index);
        dst.put_u32(log.len() as u32);
        dst.put_slice(log.as_bytes());
        dst.put_u32(idx.len() as u32);
        dst.put_slice(idx.as_bytes());
        dst.put_u32(self.start_offset as u32);
        dst.put_u64(self.created_at);
    }

    /// Reads one entry. `Ok(None)` on a clean end of input, `Err` on a torn entry.
    pub fn decode(src: &mut impl Buf, dir: &Path) -> io::Result<Option<Self>> {
        if !src.has_remaining() {
            return Ok(None);
        }
        let index = take_u32(src)?;
        let log_path = resolve_path(&take_string(src)?, dir);
        let idx_path = resolve_path(&take_string(src)?, dir);
        let start_offset = take_u32(src)? as u64;
        if src.remaining() < 8 {
            return Err(torn());
        }
        let created_at = src.get_u64();
        Ok(Some(Self {
            index,
            log_path,
            idx_path,
            start_offset,
            created_at,
        }))
    }
}

fn stored_path(path: &Path, dir: &Path) -> String {
    match path.strip_prefix(dir) {
        Ok(relative) => relative.to_string_lossy().into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

fn resolve_path(stored: &str, dir: &Path) -> PathBuf {
    let path = PathBuf::from(stored);
    if path.is_absolute() {
        path
    } else {
        dir.join(path)
    }
}

pub(super) fn take_u32(src: &mut impl Buf) -> io::Result<u32> {
    if src.remaining() < 4 {
        return Err(torn());
    }
    Ok(src.get_u32())
}

pub(super) fn take_string(src: &mut impl Buf) -> io::Result<String> {
    let len = take_u32(src)? as usize;
    if src.remaining() < len {
        return Err(torn());
    }
    let bytes = src.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn torn() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "torn metadata entry")
}

// ========================================
// SEGMENT
// ========================================

pub struct Segment {
    meta: SegmentMeta,
    end_offset: AtomicU64,
    files: Mutex<SegmentFiles>,
}

impl Segment {
    /// Creates an empty file pair `<index>.log` / `<index>.idx` under `dir`.
    pub fn create(index: u32, dir: &Path, start_offset: u64, created_at: u64) -> io::Result<Self> {
        let meta = SegmentMeta {
            index,
            log_path: dir.join(format!("{}.log", index)),
            idx_path: dir.join(format!("{}.idx", index)),
            start_offset,
            created_at,
        };
        // Leftovers of an index that never made it into the metadata log.
        File::create(&meta.log_path)?;
        File::create(&meta.idx_path)?;
        let files = SegmentFiles {
            log: Some(open_rw(&meta.log_path)?),
            idx: Some(open_rw(&meta.idx_path)?),
        };
        Ok(Self {
            meta,
            end_offset: AtomicU64::new(start_offset),
            files: Mutex::new(files),
        })
    }

    /// Rebuilds a segment from its metadata. The record count comes from the
    /// index file size; a missing index means an empty segment.
    pub fn restore(meta: SegmentMeta) -> Self {
        let records = fs::metadata(&meta.idx_path)
            .map(|m| m.len() / INDEX_ENTRY_SIZE)
            .unwrap_or(0);
        Self {
            end_offset: AtomicU64::new(meta.start_offset + records),
            meta,
            files: Mutex::new(SegmentFiles::default()),
        }
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    pub fn index(&self) -> u32 {
        self.meta.index
    }

    pub fn start_offset(&self) -> u64 {
        self.meta.start_offset
    }

    pub fn end_offset(&self) -> u64 {
        self.end_offset.load(Ordering::Acquire)
    }

    pub fn created_at(&self) -> u64 {
        self.meta.created_at
    }

    pub fn count(&self) -> u64 {
        self.end_offset() - self.start_offset()
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start_offset() && offset < self.end_offset()
    }

    /// Still accepting writes.
    pub fn is_active(&self, duration_ms: u64) -> bool {
        age_ms(self.meta.created_at) < duration_ms
    }

    pub fn is_expired(&self, retention_ms: u64) -> bool {
        age_ms(self.meta.created_at) > retention_ms
    }

    /// Appends one record and its index entry.
    pub fn write(&self, message: &Message) -> io::Result<()> {
        let payload: &[u8] = message.payload.as_deref().unwrap_or(&[]);
        let header_len = message.header_len();

        let mut buf = BytesMut::with_capacity(8 + header_len + payload.len());
        buf.put_u32(header_len as u32);
        buf.put_u32(payload.len() as u32);
        message.encode_header(&mut buf);
        buf.put_slice(payload);

        let mut files = self.files.lock();
        let (log, idx) = files.open(&self.meta.log_path, &self.meta.idx_path)?;
        let position = log.seek(SeekFrom::End(0))?;
        log.write_all(&buf)?;
        idx.write_all(&position.to_be_bytes())?;

        self.end_offset.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Reads the record at `relative` (0-based inside this segment).
    /// The payload is copied out of the log file.
    pub fn read(&self, relative: u64) -> io::Result<TopicRecord> {
        if relative >= self.count() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("offset {} outside segment {}", relative, self.meta.index),
            ));
        }

        let mut files = self.files.lock();
        let (log, idx) = files.open(&self.meta.log_path, &self.meta.idx_path)?;

        let mut position = [0u8; 8];
        idx.seek(SeekFrom::Start(relative * INDEX_ENTRY_SIZE))?;
        idx.read_exact(&mut position)?;

        let mut lengths = [0u8; 8];
        log.seek(SeekFrom::Start(u64::from_be_bytes(position)))?;
        log.read_exact(&mut lengths)?;
        let mut lengths = &lengths[..];
        let header_len = lengths.get_u32() as usize;
        let payload_len = lengths.get_u32() as usize;

        let mut header = vec![0u8; header_len];
        log.read_exact(&mut header)?;
        let mut message = Message::decode_header(&mut &header[..])?;

        if payload_len > 0 {
            let mut payload = vec![0u8; payload_len];
            log.read_exact(&mut payload)?;
            message.payload = Some(Bytes::from(payload));
        }

        Ok(TopicRecord::with_created_at(message, self.meta.created_at))
    }

    /// Relative offset of the first record matching `condition`.
    pub fn find(&self, condition: &HashMap<String, String>) -> Option<u64> {
        (0..self.count()).find(|relative| match self.read(*relative) {
            Ok(record) => record.matches(condition),
            Err(e) => {
                warn!(
                    "[Segment] {:?}: unreadable record {}: {}",
                    self.meta.log_path, relative, e
                );
                false
            }
        })
    }

    /// Closes and deletes both files. Missing files are not an error.
    pub fn clear(&self) -> io::Result<()> {
        let mut files = self.files.lock();
        files.log = None;
        files.idx = None;
        remove_if_exists(&self.meta.log_path)?;
        remove_if_exists(&self.meta.idx_path)
    }
}

pub(super) fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
