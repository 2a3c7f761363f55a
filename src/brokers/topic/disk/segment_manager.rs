//! Segment Manager: the segmented log of one disk partition.
//!
//! Directory layout:
//! - `<index>.log` / `<index>.idx`: one pair per segment
//! - `segments.log`: append-only segment metadata, compacted on load
//! - `client_offsets.log`: append-only `[IdLen: u32][ClientId][Offset: u32]`, compacted on load
//!
//! All bookkeeping sits behind one per-partition lock. Record reads happen
//! outside it, under the segment's own file lock.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::segment::{remove_if_exists, take_string, take_u32, Segment, SegmentMeta};
use crate::brokers::topic::errors::BrokerError;
use crate::brokers::topic::message::{Message, HEADER_OFFSET};
use crate::brokers::topic::record::TopicRecord;
use crate::utils::current_time_ms;

pub const SEGMENTS_FILE: &str = "segments.log";
pub const CLIENT_OFFSETS_FILE: &str = "client_offsets.log";

#[derive(Default)]
struct SegmentState {
    segments: Vec<Arc<Segment>>,
    active: Option<Arc<Segment>>,
    next_index: u32,
    next_offset: u64,
    cursors: HashMap<String, u64>,
    segments_log: Option<File>,
    cursors_log: Option<File>,
}

impl SegmentState {
    fn is_active(&self, segment: &Arc<Segment>) -> bool {
        self.active
            .as_ref()
            .map_or(false, |active| Arc::ptr_eq(active, segment))
    }

    /// The active segment plus every inactive one still within retention.
    fn valid_segments(&self, retention_ms: u64) -> impl Iterator<Item = &Arc<Segment>> {
        self.segments
            .iter()
            .filter(move |segment| self.is_active(segment) || !segment.is_expired(retention_ms))
    }
}

pub struct SegmentManager {
    dir: PathBuf,
    duration_ms: u64,
    retention_ms: u64,
    state: Mutex<SegmentState>,
}

impl SegmentManager {
    /// Opens (or creates) the partition directory and restores its segments
    /// and client cursors. Expired segments are deleted on the way.
    pub fn open(dir: impl Into<PathBuf>, duration_ms: u64, retention_ms: u64) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut state = SegmentState::default();
        load_segments(&dir, retention_ms, &mut state)?;
        load_cursors(&dir, &mut state)?;

        Ok(Self {
            dir,
            duration_ms,
            retention_ms,
            state: Mutex::new(state),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn next_offset(&self) -> u64 {
        self.state.lock().next_offset
    }

    pub fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }

    pub fn cursor(&self, client_id: &str) -> Option<u64> {
        self.state.lock().cursors.get(client_id).copied()
    }

    /// Appends to the active segment, rolling a new one when it has aged out.
    pub fn write(&self, mut message: Message) -> Result<u64, BrokerError> {
        let mut state = self.state.lock();

        let offset = state.next_offset;
        message.set_header(HEADER_OFFSET, offset);
        message.validate_header()?;

        let current = state
            .active
            .clone()
            .filter(|segment| segment.is_active(self.duration_ms));
        let active = match current {
            Some(segment) => segment,
            None => self.rollover(&mut state)?,
        };

        active.write(&message)?;
        state.next_offset += 1;
        Ok(offset)
    }

    pub fn peek(&self, client_id: &str) -> Option<TopicRecord> {
        let (segment, relative) = {
            let mut state = self.state.lock();
            let default = state
                .valid_segments(self.retention_ms)
                .map(|segment| segment.start_offset())
                .min()
                .unwrap_or(0);
            let cursor = state
                .cursors
                .get(client_id)
                .copied()
                .unwrap_or(default)
                .max(default);
            state.cursors.insert(client_id.to_string(), cursor);

            let segment = state
                .valid_segments(self.retention_ms)
                .find(|segment| segment.contains(cursor))
                .cloned()?;
            let relative = cursor - segment.start_offset();
            (segment, relative)
        };

        match segment.read(relative) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    "[SegmentManager] {:?}: failed to read offset {}: {}",
                    self.dir,
                    segment.start_offset() + relative,
                    e
                );
                None
            }
        }
    }

    /// Advances the cursor past `offset` and appends it to the cursor log.
    pub fn commit(&self, client_id: &str, offset: u64) {
        let mut state = self.state.lock();
        let next = offset + 1;
        state.cursors.insert(client_id.to_string(), next);

        let mut buf = BytesMut::new();
        encode_cursor(client_id, next, &mut buf);
        let path = self.dir.join(CLIENT_OFFSETS_FILE);
        if let Err(e) = append(&mut state.cursors_log, &path, &buf) {
            warn!("[SegmentManager] {:?}: failed to persist cursor of '{}': {}", self.dir, client_id, e);
        }
    }

    pub fn find(&self, condition: &HashMap<String, String>) -> Option<u64> {
        let segments: Vec<Arc<Segment>> = {
            let state = self.state.lock();
            state.valid_segments(self.retention_ms).cloned().collect()
        };
        segments.iter().find_map(|segment| {
            segment
                .find(condition)
                .map(|relative| segment.start_offset() + relative)
        })
    }

    /// Accepts `offset < next_offset` only. Not persisted until the next commit.
    pub fn seek(&self, client_id: &str, offset: u64) -> bool {
        let mut state = self.state.lock();
        if offset >= state.next_offset {
            return false;
        }
        state.cursors.insert(client_id.to_string(), offset);
        true
    }

    /// Records in valid segments.
    pub fn count(&self) -> u64 {
        let state = self.state.lock();
        state
            .valid_segments(self.retention_ms)
            .map(|segment| segment.count())
            .sum()
    }

    /// Deletes every inactive segment past retention. The metadata log is left
    /// as is; it is compacted on the next load.
    pub fn clean(&self) -> usize {
        let mut state = self.state.lock();
        let active = state.active.clone();
        let retention = self.retention_ms;
        let before = state.segments.len();

        state.segments.retain(|segment| {
            let is_active = active
                .as_ref()
                .map_or(false, |active| Arc::ptr_eq(active, segment));
            if is_active || !segment.is_expired(retention) {
                return true;
            }
            if let Err(e) = segment.clear() {
                warn!("[SegmentManager] failed to delete segment {}: {}", segment.index(), e);
            }
            false
        });

        let removed = before - state.segments.len();
        if removed > 0 {
            debug!("[SegmentManager] {:?}: removed {} expired segments", self.dir, removed);
        }
        removed
    }

    /// Deletes every segment, both metadata logs and the directory itself.
    pub fn clear_all(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        for segment in state.segments.drain(..) {
            segment.clear()?;
        }
        state.active = None;
        state.segments_log = None;
        state.cursors_log = None;
        state.cursors.clear();

        remove_if_exists(&self.dir.join(SEGMENTS_FILE))?;
        remove_if_exists(&self.dir.join(CLIENT_OFFSETS_FILE))?;
        match fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn rollover(&self, state: &mut SegmentState) -> io::Result<Arc<Segment>> {
        let index = state.next_index;
        let segment = Arc::new(Segment::create(
            index,
            &self.dir,
            state.next_offset,
            current_time_ms(),
        )?);

        let mut buf = BytesMut::new();
        segment.meta().encode(&self.dir, &mut buf);
        let path = self.dir.join(SEGMENTS_FILE);
        if let Err(e) = append(&mut state.segments_log, &path, &buf) {
            let _ = segment.clear();
            return Err(e);
        }

        state.next_index = index.saturating_add(1);
        state.segments.push(Arc::clone(&segment));
        state.active = Some(Arc::clone(&segment));

        debug!(
            "[SegmentManager] {:?}: rolled segment {} at offset {}",
            self.dir,
            index,
            segment.start_offset()
        );
        Ok(segment)
    }
}

// ========================================
// RECOVERY
// ========================================

fn load_segments(dir: &Path, retention_ms: u64, state: &mut SegmentState) -> io::Result<()> {
    let path = dir.join(SEGMENTS_FILE);
    let mut src = match read_file(&path)? {
        Some(bytes) => bytes,
        None => return Ok(()),
    };

    let mut expired = 0;
    loop {
        let meta = match SegmentMeta::decode(&mut src, dir) {
            Ok(Some(meta)) => meta,
            Ok(None) => break,
            Err(e) => {
                warn!("[SegmentManager] {:?}: ignoring torn tail: {}", path, e);
                break;
            }
        };

        let segment = Segment::restore(meta);
        state.next_index = state.next_index.max(segment.index().saturating_add(1));
        state.next_offset = state.next_offset.max(segment.end_offset());

        if segment.is_expired(retention_ms) {
            if let Err(e) = segment.clear() {
                warn!("[SegmentManager] failed to delete segment {}: {}", segment.index(), e);
            }
            expired += 1;
            continue;
        }
        state.segments.push(Arc::new(segment));
    }
    state.segments.sort_by_key(|segment| segment.start_offset());

    let mut compacted = BytesMut::new();
    for segment in &state.segments {
        segment.meta().encode(dir, &mut compacted);
    }
    rewrite(&path, &compacted)?;

    info!(
        "[SegmentManager] {:?}: recovered {} segments ({} expired), next offset {}",
        dir,
        state.segments.len(),
        expired,
        state.next_offset
    );
    Ok(())
}

fn load_cursors(dir: &Path, state: &mut SegmentState) -> io::Result<()> {
    let path = dir.join(CLIENT_OFFSETS_FILE);
    let mut src = match read_file(&path)? {
        Some(bytes) => bytes,
        None => return Ok(()),
    };

    while src.has_remaining() {
        match decode_cursor(&mut src) {
            Ok((client_id, offset)) => {
                state.cursors.insert(client_id, offset.min(state.next_offset));
            }
            Err(e) => {
                warn!("[SegmentManager] {:?}: ignoring torn tail: {}", path, e);
                break;
            }
        }
    }

    let mut compacted = BytesMut::new();
    for (client_id, offset) in &state.cursors {
        encode_cursor(client_id, *offset, &mut compacted);
    }
    rewrite(&path, &compacted)
}

fn encode_cursor(client_id: &str, offset: u64, dst: &mut BytesMut) {
    dst.put_u32(client_id.len() as u32);
    dst.put_slice(client_id.as_bytes());
    dst.put_u32(offset as u32);
}

fn decode_cursor(src: &mut impl Buf) -> io::Result<(String, u64)> {
    let client_id = take_string(src)?;
    let offset = take_u32(src)? as u64;
    Ok((client_id, offset))
}

// ========================================
// FILE HELPERS
// ========================================

fn read_file(path: &Path) -> io::Result<Option<Bytes>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(Bytes::from(bytes))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Replaces `path` atomically with `bytes`.
fn rewrite(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

fn append(file: &mut Option<File>, path: &Path, bytes: &[u8]) -> io::Result<()> {
    if file.is_none() {
        *file = Some(OpenOptions::new().create(true).append(true).open(path)?);
    }
    match file.as_mut() {
        Some(handle) => handle.write_all(bytes),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brokers::topic::message::MessageType;

    const HOUR: u64 = 60 * 60 * 1000;

    fn push(manager: &SegmentManager, job: u32) -> u64 {
        let msg = Message::new(MessageType::ReqPush).with_header("job", job);
        manager.write(msg).unwrap()
    }

    #[test]
    fn cursor_log_is_compacted_and_clamped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        {
            let manager = SegmentManager::open(dir.path(), HOUR, HOUR).unwrap();
            for job in 0..3 {
                push(&manager, job);
            }
            manager.commit("a", 0);
            manager.commit("a", 1);
            manager.commit("b", 2);
        }

        let entry_len = |id: &str| 4 + id.len() + 4;
        let raw = fs::read(dir.path().join(CLIENT_OFFSETS_FILE)).unwrap();
        assert_eq!(raw.len(), 3 * entry_len("a"));

        let manager = SegmentManager::open(dir.path(), HOUR, HOUR).unwrap();
        assert_eq!(manager.cursor("a"), Some(2));
        assert_eq!(manager.cursor("b"), Some(3));
        let raw = fs::read(dir.path().join(CLIENT_OFFSETS_FILE)).unwrap();
        assert_eq!(raw.len(), 2 * entry_len("a"));

        // A cursor past the reconstructed end is pulled back.
        let mut buf = BytesMut::new();
        encode_cursor("c", 99, &mut buf);
        fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(CLIENT_OFFSETS_FILE))
            .unwrap()
            .write_all(&buf)
            .unwrap();
        drop(manager);
        let manager = SegmentManager::open(dir.path(), HOUR, HOUR).unwrap();
        assert_eq!(manager.cursor("c"), Some(3));
    }

    #[test]
    fn torn_metadata_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        {
            let manager = SegmentManager::open(dir.path(), 0, HOUR).unwrap();
            push(&manager, 1);
            push(&manager, 2);
        }
        let path = dir.path().join(SEGMENTS_FILE);
        let mut raw = fs::read(&path).unwrap();
        raw.truncate(raw.len() - 5);
        fs::write(&path, raw).unwrap();

        let manager = SegmentManager::open(dir.path(), 0, HOUR).unwrap();
        assert_eq!(manager.segment_count(), 1);
        assert_eq!(manager.next_offset(), 1);
        assert_eq!(push(&manager, 3), 1);
    }

    #[test]
    fn failed_validation_does_not_roll_a_segment() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SegmentManager::open(dir.path(), HOUR, HOUR).unwrap();

        let mut msg = Message::new(MessageType::ReqPush);
        for i in 0..300 {
            msg.set_header(format!("k{}", i), i);
        }
        assert!(matches!(manager.write(msg), Err(BrokerError::Validation(_))));
        assert_eq!(manager.segment_count(), 0);
        assert_eq!(manager.next_offset(), 0);
    }
}
