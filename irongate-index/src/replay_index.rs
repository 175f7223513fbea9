/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Per-session replay index ring.
//!
//! A fixed-size memory-mapped ring of records, one per archived message,
//! recording where in which recording the message's bytes live. Exactly one
//! writer per file, any number of readers, no locks.
//!
//! The logical write position is exposed through two monotonic byte counters
//! in the header: `begin_change`, the position of the oldest live record, and
//! `end_change`, the position just past the newest. A record is committed by
//! writing its payload and then store-releasing `end_change`; on wrap,
//! `begin_change` is advanced first. A reader keeps its own monotonic byte
//! cursor and detects lapping whenever `begin_change` passes it; an acquire
//! fence between the payload read and the second counter load makes a
//! non-lapped read tear-free.

use irongate_core::error::IndexError;
use irongate_core::types::{RecordingId, SequenceIndex, SequenceNumber, SessionId, StreamPosition};
use memmap2::{Mmap, MmapMut};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering, fence};
use tracing::debug;

/// Header length in bytes; records start on the next sector boundary.
pub const HEADER_LEN: usize = 4096;

/// Fixed record width in bytes.
pub const REPLAY_RECORD_LEN: usize = 32;

/// Header magic, "RPIX".
const MAGIC: u32 = 0x5250_4958;

/// Format version this build reads and writes.
const VERSION: u32 = 1;

/// Default ring capacity in records.
pub const DEFAULT_CAPACITY: u32 = 4096;

const OFFSET_MAGIC: usize = 0;
const OFFSET_VERSION: usize = 4;
const OFFSET_RECORD_LEN: usize = 8;
const OFFSET_CAPACITY: usize = 12;
const OFFSET_BEGIN_CHANGE: usize = 16;
const OFFSET_END_CHANGE: usize = 24;

/// One replay index record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayIndexRecord {
    /// Carrier stream position of the archived message.
    pub stream_position: StreamPosition,
    /// Sequence-space revision the message belongs to.
    pub sequence_index: SequenceIndex,
    /// Message sequence number.
    pub sequence_number: SequenceNumber,
    /// Archive recording holding the bytes.
    pub recording_id: RecordingId,
    /// Fragment-aligned length of the archived frame in bytes.
    pub length: u32,
}

impl ReplayIndexRecord {
    fn encode(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.stream_position.value().to_le_bytes());
        out[8..12].copy_from_slice(&self.sequence_index.value().to_le_bytes());
        out[12..16].copy_from_slice(&self.sequence_number.value().to_le_bytes());
        out[16..24].copy_from_slice(&self.recording_id.value().to_le_bytes());
        out[24..28].copy_from_slice(&self.length.to_le_bytes());
        out[28..32].copy_from_slice(&0u32.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            stream_position: StreamPosition::new(u64::from_le_bytes(
                bytes[0..8].try_into().unwrap_or_default(),
            )),
            sequence_index: SequenceIndex::new(u32::from_le_bytes(
                bytes[8..12].try_into().unwrap_or_default(),
            )),
            sequence_number: SequenceNumber::new(u32::from_le_bytes(
                bytes[12..16].try_into().unwrap_or_default(),
            )),
            recording_id: RecordingId::new(u64::from_le_bytes(
                bytes[16..24].try_into().unwrap_or_default(),
            )),
            length: u32::from_le_bytes(bytes[24..28].try_into().unwrap_or_default()),
        }
    }
}

/// Canonical file name for one `(session, stream)` pair.
#[must_use]
pub fn replay_index_path(dir: &Path, session_id: SessionId, stream_id: u32) -> PathBuf {
    dir.join(format!("replay_index_{}_{}", session_id.value(), stream_id))
}

/// The single writer of one replay index file.
#[derive(Debug)]
pub struct ReplayIndexWriter {
    mmap: MmapMut,
    capacity_bytes: u64,
    /// Local mirror of `begin_change`, avoids an atomic load per write.
    begin: u64,
    /// Local mirror of `end_change`.
    end: u64,
}

// The mmap is owned and the counters are only stored through atomics.
unsafe impl Send for ReplayIndexWriter {}

impl ReplayIndexWriter {
    /// Opens or creates the ring at `path` with `capacity` records.
    ///
    /// `capacity` must be a power of two. An existing file resumes at its
    /// committed counters; its recorded capacity wins over the argument.
    ///
    /// # Errors
    /// Returns `IndexError::Corrupted` for an existing file with a bad magic,
    /// record length, or capacity, `UnsupportedVersion` for a format this
    /// build does not read, and `Io` for filesystem failures.
    pub fn open(path: impl AsRef<Path>, capacity: u32) -> Result<Self, IndexError> {
        assert!(capacity.is_power_of_two(), "capacity must be a power of two");
        let path = path.as_ref();
        let exists = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if exists {
            let mmap = unsafe { MmapMut::map_mut(&file)? };
            let header = validate_header(path, &mmap)?;
            let capacity_bytes = u64::from(header.capacity) * REPLAY_RECORD_LEN as u64;
            let begin = counter_at(&mmap, OFFSET_BEGIN_CHANGE).load(Ordering::Acquire);
            let end = counter_at(&mmap, OFFSET_END_CHANGE).load(Ordering::Acquire);
            debug!(path = %path.display(), begin, end, "resumed replay index");
            return Ok(Self {
                mmap,
                capacity_bytes,
                begin,
                end,
            });
        }

        let capacity_bytes = u64::from(capacity) * REPLAY_RECORD_LEN as u64;
        file.set_len(HEADER_LEN as u64 + capacity_bytes)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        mmap[OFFSET_MAGIC..OFFSET_MAGIC + 4].copy_from_slice(&MAGIC.to_le_bytes());
        mmap[OFFSET_VERSION..OFFSET_VERSION + 4].copy_from_slice(&VERSION.to_le_bytes());
        mmap[OFFSET_RECORD_LEN..OFFSET_RECORD_LEN + 4]
            .copy_from_slice(&(REPLAY_RECORD_LEN as u32).to_le_bytes());
        mmap[OFFSET_CAPACITY..OFFSET_CAPACITY + 4].copy_from_slice(&capacity.to_le_bytes());
        mmap.flush()?;

        Ok(Self {
            mmap,
            capacity_bytes,
            begin: 0,
            end: 0,
        })
    }

    /// Appends one record, overwriting the oldest on wrap.
    pub fn index(&mut self, record: ReplayIndexRecord) {
        if self.end - self.begin == self.capacity_bytes {
            // Retire the oldest record before overwriting its slot so a
            // reader standing on it observes the lap instead of a tear.
            self.begin += REPLAY_RECORD_LEN as u64;
            self.counter(OFFSET_BEGIN_CHANGE)
                .store(self.begin, Ordering::Release);
        }

        let slot = HEADER_LEN + (self.end % self.capacity_bytes) as usize;
        record.encode(&mut self.mmap[slot..slot + REPLAY_RECORD_LEN]);

        self.end += REPLAY_RECORD_LEN as u64;
        self.counter(OFFSET_END_CHANGE)
            .store(self.end, Ordering::Release);
    }

    /// Current `end_change` in bytes.
    #[must_use]
    pub const fn end_change(&self) -> u64 {
        self.end
    }

    /// Current `begin_change` in bytes.
    #[must_use]
    pub const fn begin_change(&self) -> u64 {
        self.begin
    }

    /// Number of live records in the ring.
    #[must_use]
    pub const fn len(&self) -> u64 {
        (self.end - self.begin) / REPLAY_RECORD_LEN as u64
    }

    /// True when nothing has been indexed yet.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end == self.begin
    }

    fn counter(&self, offset: usize) -> &AtomicU64 {
        counter_at(&self.mmap, offset)
    }
}

/// A reader of one replay index file.
///
/// Readers are independent: each owns a byte cursor and polls the writer's
/// counters through the shared mapping.
#[derive(Debug)]
pub struct ReplayIndexReader {
    mmap: Mmap,
    capacity_bytes: u64,
}

unsafe impl Send for ReplayIndexReader {}

impl ReplayIndexReader {
    /// Opens an existing ring read-only.
    ///
    /// # Errors
    /// Returns `IndexError::Corrupted` when the header does not validate and
    /// `Io` when the file cannot be mapped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let header = validate_header(path, &mmap)?;
        let capacity_bytes = u64::from(header.capacity) * REPLAY_RECORD_LEN as u64;
        Ok(Self {
            mmap,
            capacity_bytes,
        })
    }

    /// Current `begin_change`, the cursor at which a fresh scan starts.
    #[must_use]
    pub fn begin_change(&self) -> u64 {
        counter_at(&self.mmap, OFFSET_BEGIN_CHANGE).load(Ordering::Acquire)
    }

    /// Current `end_change`.
    #[must_use]
    pub fn end_change(&self) -> u64 {
        counter_at(&self.mmap, OFFSET_END_CHANGE).load(Ordering::Acquire)
    }

    /// Reads the record at `cursor` and advances it.
    ///
    /// # Returns
    /// `Ok(None)` when the cursor has caught up with the writer.
    ///
    /// # Errors
    /// Returns `IndexError::Lapped` when the writer overwrote the cursor's
    /// record; the caller restarts from [`Self::begin_change`].
    pub fn read(&self, cursor: &mut u64) -> Result<Option<ReplayIndexRecord>, IndexError> {
        let end = self.end_change();
        if *cursor >= end {
            return Ok(None);
        }

        let slot = HEADER_LEN + (*cursor % self.capacity_bytes) as usize;
        let record = ReplayIndexRecord::decode(&self.mmap[slot..slot + REPLAY_RECORD_LEN]);

        // Pairs with the writer's release store of begin_change: if the slot
        // was recycled while we copied it, begin_change has already passed
        // the cursor and the copy must be discarded.
        fence(Ordering::Acquire);
        let begin = self.begin_change();
        if begin > *cursor {
            return Err(IndexError::Lapped {
                cursor: *cursor,
                begin_change: begin,
            });
        }

        *cursor += REPLAY_RECORD_LEN as u64;
        Ok(Some(record))
    }
}

struct Header {
    capacity: u32,
}

fn validate_header(path: &Path, mmap: &[u8]) -> Result<Header, IndexError> {
    let corrupted = |reason: String| IndexError::Corrupted {
        path: path.display().to_string(),
        reason,
    };

    if mmap.len() < HEADER_LEN {
        return Err(corrupted(format!("file too small: {} bytes", mmap.len())));
    }

    let magic = u32::from_le_bytes(mmap[OFFSET_MAGIC..OFFSET_MAGIC + 4].try_into().unwrap_or_default());
    if magic != MAGIC {
        return Err(corrupted(format!("bad magic {:#010x}", magic)));
    }
    let version =
        u32::from_le_bytes(mmap[OFFSET_VERSION..OFFSET_VERSION + 4].try_into().unwrap_or_default());
    if version != VERSION {
        return Err(IndexError::UnsupportedVersion {
            path: path.display().to_string(),
            got: version,
            supported: VERSION,
        });
    }
    let record_len = u32::from_le_bytes(
        mmap[OFFSET_RECORD_LEN..OFFSET_RECORD_LEN + 4]
            .try_into()
            .unwrap_or_default(),
    );
    if record_len as usize != REPLAY_RECORD_LEN {
        return Err(corrupted(format!("unexpected record length {}", record_len)));
    }
    let capacity = u32::from_le_bytes(
        mmap[OFFSET_CAPACITY..OFFSET_CAPACITY + 4]
            .try_into()
            .unwrap_or_default(),
    );
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(corrupted(format!("invalid capacity {}", capacity)));
    }
    let expected = HEADER_LEN as u64 + u64::from(capacity) * REPLAY_RECORD_LEN as u64;
    if (mmap.len() as u64) < expected {
        return Err(corrupted(format!(
            "file truncated: {} bytes, expected {}",
            mmap.len(),
            expected
        )));
    }

    Ok(Header { capacity })
}

fn counter_at(mmap: &[u8], offset: usize) -> &AtomicU64 {
    // Both counter offsets are 8-byte aligned within a page-aligned mapping.
    unsafe { &*(mmap.as_ptr().add(offset) as *const AtomicU64) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(seq: u32, position: u64) -> ReplayIndexRecord {
        ReplayIndexRecord {
            stream_position: StreamPosition::new(position),
            sequence_index: SequenceIndex::new(0),
            sequence_number: SequenceNumber::new(seq),
            recording_id: RecordingId::new(1),
            length: 64,
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = replay_index_path(dir.path(), SessionId::new(1), 1);
        let mut writer = ReplayIndexWriter::open(&path, 8).unwrap();

        for i in 1..=3u32 {
            writer.index(record(i, u64::from(i) * 64));
        }
        assert_eq!(writer.len(), 3);

        let reader = ReplayIndexReader::open(&path).unwrap();
        let mut cursor = reader.begin_change();
        for i in 1..=3u32 {
            let rec = reader.read(&mut cursor).unwrap().unwrap();
            assert_eq!(rec.sequence_number.value(), i);
            assert_eq!(rec.stream_position.value(), u64::from(i) * 64);
        }
        assert!(reader.read(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_ring_wraps_and_retires_oldest() {
        let dir = TempDir::new().unwrap();
        let path = replay_index_path(dir.path(), SessionId::new(1), 1);
        let mut writer = ReplayIndexWriter::open(&path, 4).unwrap();

        for i in 1..=6u32 {
            writer.index(record(i, u64::from(i) * 64));
        }
        // Two laps worth retired.
        assert_eq!(writer.begin_change(), 2 * REPLAY_RECORD_LEN as u64);
        assert_eq!(writer.len(), 4);

        let reader = ReplayIndexReader::open(&path).unwrap();
        let mut cursor = reader.begin_change();
        let mut seqs = Vec::new();
        while let Some(rec) = reader.read(&mut cursor).unwrap() {
            seqs.push(rec.sequence_number.value());
        }
        assert_eq!(seqs, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_lapped_reader_detected() {
        let dir = TempDir::new().unwrap();
        let path = replay_index_path(dir.path(), SessionId::new(1), 1);
        let mut writer = ReplayIndexWriter::open(&path, 4).unwrap();
        writer.index(record(1, 64));

        let reader = ReplayIndexReader::open(&path).unwrap();
        let mut cursor = reader.begin_change();
        assert_eq!(cursor, 0);

        // The writer laps the parked cursor.
        for i in 2..=9u32 {
            writer.index(record(i, u64::from(i) * 64));
        }

        let err = reader.read(&mut cursor).unwrap_err();
        assert!(matches!(err, IndexError::Lapped { cursor: 0, .. }));

        // Restarting at begin_change recovers.
        cursor = reader.begin_change();
        let rec = reader.read(&mut cursor).unwrap().unwrap();
        assert_eq!(rec.sequence_number.value(), 6);
    }

    #[test]
    fn test_reopen_resumes_counters() {
        let dir = TempDir::new().unwrap();
        let path = replay_index_path(dir.path(), SessionId::new(9), 2);

        let mut writer = ReplayIndexWriter::open(&path, 8).unwrap();
        for i in 1..=5u32 {
            writer.index(record(i, u64::from(i) * 64));
        }
        let end = writer.end_change();
        drop(writer);

        let writer = ReplayIndexWriter::open(&path, 8).unwrap();
        assert_eq!(writer.end_change(), end);
        assert_eq!(writer.len(), 5);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("replay_index_1_1");
        std::fs::write(&path, vec![0u8; HEADER_LEN + 4 * REPLAY_RECORD_LEN]).unwrap();

        assert!(matches!(
            ReplayIndexReader::open(&path),
            Err(IndexError::Corrupted { .. })
        ));
        assert!(matches!(
            ReplayIndexWriter::open(&path, 4),
            Err(IndexError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_path_naming() {
        let dir = TempDir::new().unwrap();
        let path = replay_index_path(dir.path(), SessionId::new(12), 3);
        assert!(path.ends_with("replay_index_12_3"));
    }
}
