/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Crash-safe sequence-number index.
//!
//! A single-writer table mapping `session_id` to the last received and sent
//! sequence numbers, the session's sequence index, and the stream position up
//! to which the table is consistent. Used at reconnect to answer "what did we
//! last accept from this counterparty, and how far have we indexed the log".
//!
//! The on-disk image is a linear table of 4096-byte sectors, each trailed by
//! a CRC32C of its payload. Writes mutate an in-memory mirror; a flush writes
//! the mirror to the passing-place path, fsyncs it, and atomically renames it
//! over the canonical path. The rename is the commit point. If the process
//! dies between fsync and rename, the passing-place file remains; startup
//! prefers whichever file validates, taking the greater indexed position when
//! both do.

use crc32c::crc32c;
use irongate_core::error::IndexError;
use irongate_core::types::{SequenceIndex, SequenceNumber, SessionId, StreamPosition};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sector size in bytes. CRC boundaries coincide with sector boundaries.
pub const SECTOR_SIZE: usize = 4096;

/// Bytes of each sector covered by its trailing CRC.
const SECTOR_PAYLOAD: usize = SECTOR_SIZE - 4;

/// Fixed record width in bytes.
pub const RECORD_LEN: usize = 32;

/// Records per sector.
const RECORDS_PER_SECTOR: usize = SECTOR_PAYLOAD / RECORD_LEN;

/// Header magic, "SQNX".
const MAGIC: u32 = 0x5351_4E58;

/// Format version this build reads and writes.
const VERSION: u32 = 1;

/// Sentinel stored for an absent sequence number.
const UNKNOWN_SEQ: u32 = u32::MAX;

/// One session's entry in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumberEntry {
    /// The session the entry belongs to.
    pub session_id: SessionId,
    /// Highest in-order sequence number accepted, `None` if never updated.
    pub last_received: Option<SequenceNumber>,
    /// Highest sequence number sent, `None` if never updated.
    pub last_sent: Option<SequenceNumber>,
    /// Sequence-space revision the numbers belong to.
    pub sequence_index: SequenceIndex,
    /// Position of auxiliary session metadata in the stream, zero if unused.
    pub meta_position: StreamPosition,
}

impl SequenceNumberEntry {
    fn fresh(session_id: SessionId) -> Self {
        Self {
            session_id,
            last_received: None,
            last_sent: None,
            sequence_index: SequenceIndex::new(0),
            meta_position: StreamPosition::new(0),
        }
    }

    fn encode(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.session_id.value().to_le_bytes());
        let received = self.last_received.map_or(UNKNOWN_SEQ, SequenceNumber::value);
        let sent = self.last_sent.map_or(UNKNOWN_SEQ, SequenceNumber::value);
        out[8..12].copy_from_slice(&received.to_le_bytes());
        out[12..16].copy_from_slice(&sent.to_le_bytes());
        out[16..20].copy_from_slice(&self.sequence_index.value().to_le_bytes());
        out[20..24].copy_from_slice(&0u32.to_le_bytes());
        out[24..32].copy_from_slice(&self.meta_position.value().to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        let session_id = u64::from_le_bytes(bytes[0..8].try_into().unwrap_or_default());
        let received = u32::from_le_bytes(bytes[8..12].try_into().unwrap_or_default());
        let sent = u32::from_le_bytes(bytes[12..16].try_into().unwrap_or_default());
        let sequence_index = u32::from_le_bytes(bytes[16..20].try_into().unwrap_or_default());
        let meta_position = u64::from_le_bytes(bytes[24..32].try_into().unwrap_or_default());

        Self {
            session_id: SessionId::new(session_id),
            last_received: (received != UNKNOWN_SEQ).then(|| SequenceNumber::new(received)),
            last_sent: (sent != UNKNOWN_SEQ).then(|| SequenceNumber::new(sent)),
            sequence_index: SequenceIndex::new(sequence_index),
            meta_position: StreamPosition::new(meta_position),
        }
    }
}

/// Flush policy knobs.
#[derive(Debug, Clone)]
pub struct FlushPolicy {
    /// Flush after this long without a flush while dirty.
    pub interval: Duration,
    /// Flush once this many records have changed.
    pub dirty_threshold: usize,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            dirty_threshold: 1024,
        }
    }
}

/// The single writer of the sequence-number index.
///
/// Exactly one writer exists per log directory; it runs on the indexer
/// agent's thread. Readers load the committed file through
/// [`SequenceNumberIndexReader`].
#[derive(Debug)]
pub struct SequenceNumberIndexWriter {
    canonical: PathBuf,
    passing_place: PathBuf,
    stream_id: u32,
    /// Inbound stream position up to which received updates are reflected.
    indexed_position: StreamPosition,
    /// Outbound stream position up to which sent updates are reflected.
    sent_position: StreamPosition,
    entries: HashMap<u64, SequenceNumberEntry>,
    /// Stable slot order, preserved so session rows never move.
    slots: Vec<u64>,
    policy: FlushPolicy,
    dirty_records: usize,
    last_flush: Instant,
}

impl SequenceNumberIndexWriter {
    /// Opens or creates the index under `path`.
    ///
    /// An existing image is recovered through the same validation the reader
    /// uses: the canonical file is preferred, the passing place is promoted
    /// when the canonical fails, and corruption of both is fatal.
    ///
    /// # Errors
    /// Returns `IndexError::Corrupted` when an existing file fails checksum
    /// or magic validation and no valid alternative exists.
    pub fn open(
        path: impl Into<PathBuf>,
        stream_id: u32,
        policy: FlushPolicy,
    ) -> Result<Self, IndexError> {
        let canonical: PathBuf = path.into();
        let passing_place = passing_place_path(&canonical);

        let recovered = recover_image(&canonical, &passing_place)?;

        let mut writer = Self {
            canonical,
            passing_place,
            stream_id,
            indexed_position: StreamPosition::new(0),
            sent_position: StreamPosition::new(0),
            entries: HashMap::new(),
            slots: Vec::new(),
            policy,
            dirty_records: 0,
            last_flush: Instant::now(),
        };

        if let Some(image) = recovered {
            writer.stream_id = image.stream_id;
            writer.indexed_position = image.indexed_position;
            writer.sent_position = image.sent_position;
            for entry in image.entries {
                writer.slots.push(entry.session_id.value());
                writer.entries.insert(entry.session_id.value(), entry);
            }
            info!(
                sessions = writer.slots.len(),
                indexed_position = writer.indexed_position.value(),
                "recovered sequence number index"
            );
        }

        Ok(writer)
    }

    /// Records the last received sequence number for a session.
    ///
    /// Idempotent on replay: a call whose `stream_position` is at or before
    /// the already indexed position is a no-op.
    pub fn record_received(
        &mut self,
        session_id: SessionId,
        seq_num: SequenceNumber,
        sequence_index: SequenceIndex,
        stream_position: StreamPosition,
    ) {
        if stream_position <= self.indexed_position {
            return;
        }
        let entry = self.entry_mut(session_id);
        entry.last_received = Some(seq_num);
        entry.sequence_index = sequence_index;
        self.indexed_position = stream_position;
        self.dirty_records += 1;
    }

    /// Records the last sent sequence number for a session.
    ///
    /// Gated on the outbound stream's own position, with the same replay
    /// idempotence as [`Self::record_received`].
    pub fn record_sent(
        &mut self,
        session_id: SessionId,
        seq_num: SequenceNumber,
        sequence_index: SequenceIndex,
        stream_position: StreamPosition,
    ) {
        if stream_position <= self.sent_position {
            return;
        }
        let entry = self.entry_mut(session_id);
        entry.last_sent = Some(seq_num);
        entry.sequence_index = sequence_index;
        self.sent_position = stream_position;
        self.dirty_records += 1;
    }

    fn entry_mut(&mut self, session_id: SessionId) -> &mut SequenceNumberEntry {
        let slots = &mut self.slots;
        self.entries.entry(session_id.value()).or_insert_with(|| {
            slots.push(session_id.value());
            SequenceNumberEntry::fresh(session_id)
        })
    }

    /// Last received sequence number, answered from the mirror.
    #[must_use]
    pub fn last_known_sequence_number(&self, session_id: SessionId) -> Option<SequenceNumber> {
        self.entries
            .get(&session_id.value())
            .and_then(|e| e.last_received)
    }

    /// Inbound position up to which the mirror is consistent.
    #[must_use]
    pub const fn indexed_position(&self) -> StreamPosition {
        self.indexed_position
    }

    /// Outbound position up to which sent updates are consistent.
    #[must_use]
    pub const fn sent_indexed_position(&self) -> StreamPosition {
        self.sent_position
    }

    /// Flushes when the policy says so.
    ///
    /// # Errors
    /// Propagates flush I/O failures.
    pub fn maybe_flush(&mut self) -> Result<bool, IndexError> {
        if self.dirty_records == 0 {
            return Ok(false);
        }
        if self.dirty_records >= self.policy.dirty_threshold
            || self.last_flush.elapsed() >= self.policy.interval
        {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Writes the mirror to disk through the atomic replacement protocol.
    ///
    /// # Errors
    /// Returns `IndexError::Io` on any filesystem failure.
    pub fn flush(&mut self) -> Result<(), IndexError> {
        let image = self.encode_image();

        let mut file = File::create(&self.passing_place)?;
        file.write_all(&image)?;
        file.sync_all()?;
        drop(file);

        // The rename is the commit point.
        fs::rename(&self.passing_place, &self.canonical)?;
        sync_parent_dir(&self.canonical)?;

        self.dirty_records = 0;
        self.last_flush = Instant::now();
        debug!(
            indexed_position = self.indexed_position.value(),
            "flushed sequence number index"
        );
        Ok(())
    }

    /// Resets one session's numbers, opening a new sequence index for it.
    ///
    /// The entry keeps its slot; only the counters rewind.
    pub fn reset_session(&mut self, session_id: SessionId) {
        if let Some(entry) = self.entries.get_mut(&session_id.value()) {
            entry.last_received = None;
            entry.last_sent = None;
            entry.sequence_index = entry.sequence_index.next();
            self.dirty_records += 1;
            info!(session_id = session_id.value(), "session sequence numbers reset");
        }
    }

    /// Wipes the index: all sessions forgotten, files removed.
    ///
    /// # Errors
    /// Returns `IndexError::Io` when the files cannot be removed.
    pub fn reset_sequence_numbers(&mut self) -> Result<(), IndexError> {
        self.entries.clear();
        self.slots.clear();
        self.indexed_position = StreamPosition::new(0);
        self.sent_position = StreamPosition::new(0);
        self.dirty_records = 0;
        remove_if_exists(&self.canonical)?;
        remove_if_exists(&self.passing_place)?;
        info!("sequence number index reset");
        Ok(())
    }

    fn encode_image(&self) -> Vec<u8> {
        let sectors = 1 + self.slots.len().div_ceil(RECORDS_PER_SECTOR);
        let mut image = vec![0u8; sectors * SECTOR_SIZE];

        // Header sector.
        image[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        image[4..8].copy_from_slice(&VERSION.to_le_bytes());
        image[8..12].copy_from_slice(&self.stream_id.to_le_bytes());
        image[12..16].copy_from_slice(&(self.slots.len() as u32).to_le_bytes());
        image[16..24].copy_from_slice(&self.indexed_position.value().to_le_bytes());
        image[24..32].copy_from_slice(&self.sent_position.value().to_le_bytes());

        for (i, session) in self.slots.iter().enumerate() {
            let sector = 1 + i / RECORDS_PER_SECTOR;
            let offset = sector * SECTOR_SIZE + (i % RECORDS_PER_SECTOR) * RECORD_LEN;
            self.entries[session].encode(&mut image[offset..offset + RECORD_LEN]);
        }

        for sector in 0..sectors {
            let start = sector * SECTOR_SIZE;
            let crc = crc32c(&image[start..start + SECTOR_PAYLOAD]);
            image[start + SECTOR_PAYLOAD..start + SECTOR_SIZE]
                .copy_from_slice(&crc.to_le_bytes());
        }

        image
    }
}

/// Reader of the committed index image.
///
/// Loads a point-in-time snapshot; the writer never mutates a committed file
/// in place, so a loaded snapshot is always internally consistent.
#[derive(Debug)]
pub struct SequenceNumberIndexReader {
    entries: HashMap<u64, SequenceNumberEntry>,
    stream_id: u32,
    indexed_position: StreamPosition,
    sent_position: StreamPosition,
}

impl SequenceNumberIndexReader {
    /// Loads the index from `path`, applying passing-place recovery.
    ///
    /// # Errors
    /// Returns `IndexError::Corrupted` when neither the canonical file nor
    /// the passing place validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let canonical = path.as_ref();
        let passing = passing_place_path(canonical);
        let image = recover_image(canonical, &passing)?.ok_or_else(|| IndexError::Corrupted {
            path: canonical.display().to_string(),
            reason: "index file does not exist".to_string(),
        })?;

        let mut entries = HashMap::new();
        for entry in image.entries {
            entries.insert(entry.session_id.value(), entry);
        }

        Ok(Self {
            entries,
            stream_id: image.stream_id,
            indexed_position: image.indexed_position,
            sent_position: image.sent_position,
        })
    }

    /// Last received sequence number for a session, `None` when unknown.
    #[must_use]
    pub fn last_known_sequence_number(&self, session_id: SessionId) -> Option<SequenceNumber> {
        self.entries
            .get(&session_id.value())
            .and_then(|e| e.last_received)
    }

    /// Full entry for a session.
    #[must_use]
    pub fn entry(&self, session_id: SessionId) -> Option<&SequenceNumberEntry> {
        self.entries.get(&session_id.value())
    }

    /// Inbound position up to which the snapshot is consistent.
    #[must_use]
    pub const fn indexed_position(&self) -> StreamPosition {
        self.indexed_position
    }

    /// Outbound position up to which sent updates are consistent.
    #[must_use]
    pub const fn sent_indexed_position(&self) -> StreamPosition {
        self.sent_position
    }

    /// Stream id the index belongs to.
    #[must_use]
    pub const fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Number of sessions in the snapshot.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.entries.len()
    }
}

/// Decoded file image used during recovery.
struct Image {
    stream_id: u32,
    indexed_position: StreamPosition,
    sent_position: StreamPosition,
    entries: Vec<SequenceNumberEntry>,
}

/// Prefers the canonical file; promotes the passing place when the canonical
/// fails; takes the greater indexed position when both validate.
fn recover_image(canonical: &Path, passing: &Path) -> Result<Option<Image>, IndexError> {
    let canonical_image = try_load(canonical);
    let passing_image = try_load(passing);

    match (canonical_image, passing_image) {
        (Ok(Some(a)), Ok(Some(b))) => {
            if b.indexed_position > a.indexed_position {
                warn!("passing place is ahead of canonical index, promoting it");
                Ok(Some(b))
            } else {
                Ok(Some(a))
            }
        }
        (Ok(Some(a)), _) => Ok(Some(a)),
        (_, Ok(Some(b))) => {
            warn!("canonical index unusable, promoting passing place");
            Ok(Some(b))
        }
        (Ok(None), Ok(None)) => Ok(None),
        (Err(err), Ok(None)) | (Ok(None), Err(err)) => Err(err),
        (Err(err), Err(_)) => Err(err),
    }
}

fn try_load(path: &Path) -> Result<Option<Image>, IndexError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    decode_image(path, &bytes).map(Some)
}

fn decode_image(path: &Path, bytes: &[u8]) -> Result<Image, IndexError> {
    let corrupted = |reason: String| IndexError::Corrupted {
        path: path.display().to_string(),
        reason,
    };

    if bytes.len() < SECTOR_SIZE || bytes.len() % SECTOR_SIZE != 0 {
        return Err(corrupted(format!("invalid file size {}", bytes.len())));
    }

    for (i, sector) in bytes.chunks_exact(SECTOR_SIZE).enumerate() {
        let stored = u32::from_le_bytes(sector[SECTOR_PAYLOAD..].try_into().unwrap_or_default());
        let computed = crc32c(&sector[..SECTOR_PAYLOAD]);
        if stored != computed {
            return Err(corrupted(format!(
                "sector {} crc mismatch: stored {:#010x}, computed {:#010x}",
                i, stored, computed
            )));
        }
    }

    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap_or_default());
    if magic != MAGIC {
        return Err(corrupted(format!("bad magic {:#010x}", magic)));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap_or_default());
    if version != VERSION {
        return Err(IndexError::UnsupportedVersion {
            path: path.display().to_string(),
            got: version,
            supported: VERSION,
        });
    }

    let stream_id = u32::from_le_bytes(bytes[8..12].try_into().unwrap_or_default());
    let count = u32::from_le_bytes(bytes[12..16].try_into().unwrap_or_default()) as usize;
    let indexed_position =
        u64::from_le_bytes(bytes[16..24].try_into().unwrap_or_default());
    let sent_position = u64::from_le_bytes(bytes[24..32].try_into().unwrap_or_default());

    let available = (bytes.len() / SECTOR_SIZE - 1) * RECORDS_PER_SECTOR;
    if count > available {
        return Err(corrupted(format!(
            "record count {} exceeds capacity {}",
            count, available
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let sector = 1 + i / RECORDS_PER_SECTOR;
        let offset = sector * SECTOR_SIZE + (i % RECORDS_PER_SECTOR) * RECORD_LEN;
        entries.push(SequenceNumberEntry::decode(&bytes[offset..offset + RECORD_LEN]));
    }

    Ok(Image {
        stream_id,
        indexed_position: StreamPosition::new(indexed_position),
        sent_position: StreamPosition::new(sent_position),
        entries,
    })
}

fn passing_place_path(canonical: &Path) -> PathBuf {
    let mut name = canonical.as_os_str().to_os_string();
    name.push(".passing_place");
    PathBuf::from(name)
}

fn sync_parent_dir(path: &Path) -> Result<(), IndexError> {
    if let Some(parent) = path.parent() {
        let dir = OpenOptions::new().read(true).open(parent)?;
        dir.sync_all()?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), IndexError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn writer(dir: &TempDir) -> SequenceNumberIndexWriter {
        SequenceNumberIndexWriter::open(
            dir.path().join("sequence_number_index"),
            1,
            FlushPolicy::default(),
        )
        .unwrap()
    }

    fn session(n: u64) -> SessionId {
        SessionId::new(n)
    }

    #[test]
    fn test_record_and_query() {
        let dir = TempDir::new().unwrap();
        let mut index = writer(&dir);

        index.record_received(
            session(1),
            SequenceNumber::new(3),
            SequenceIndex::new(0),
            StreamPosition::new(100),
        );
        assert_eq!(
            index.last_known_sequence_number(session(1)),
            Some(SequenceNumber::new(3))
        );
        assert_eq!(index.last_known_sequence_number(session(2)), None);
        assert_eq!(index.indexed_position().value(), 100);
    }

    #[test]
    fn test_record_is_position_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut index = writer(&dir);

        index.record_received(
            session(1),
            SequenceNumber::new(5),
            SequenceIndex::new(0),
            StreamPosition::new(200),
        );
        // Replay of an already indexed record must not rewind the entry.
        index.record_received(
            session(1),
            SequenceNumber::new(2),
            SequenceIndex::new(0),
            StreamPosition::new(200),
        );
        index.record_received(
            session(1),
            SequenceNumber::new(2),
            SequenceIndex::new(0),
            StreamPosition::new(150),
        );
        assert_eq!(
            index.last_known_sequence_number(session(1)),
            Some(SequenceNumber::new(5))
        );
        assert_eq!(index.indexed_position().value(), 200);
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sequence_number_index");
        let mut index =
            SequenceNumberIndexWriter::open(&path, 7, FlushPolicy::default()).unwrap();

        index.record_received(
            session(1),
            SequenceNumber::new(3),
            SequenceIndex::new(0),
            StreamPosition::new(128),
        );
        index.record_sent(
            session(1),
            SequenceNumber::new(4),
            SequenceIndex::new(0),
            StreamPosition::new(192),
        );
        index.record_received(
            session(2),
            SequenceNumber::new(9),
            SequenceIndex::new(2),
            StreamPosition::new(256),
        );
        index.flush().unwrap();

        let reader = SequenceNumberIndexReader::load(&path).unwrap();
        assert_eq!(reader.stream_id(), 7);
        assert_eq!(reader.session_count(), 2);
        assert_eq!(reader.indexed_position().value(), 256);
        assert_eq!(
            reader.last_known_sequence_number(session(1)),
            Some(SequenceNumber::new(3))
        );
        let entry = reader.entry(session(1)).unwrap();
        assert_eq!(entry.last_sent, Some(SequenceNumber::new(4)));
        let entry2 = reader.entry(session(2)).unwrap();
        assert_eq!(entry2.sequence_index.value(), 2);
    }

    #[test]
    fn test_writer_recovers_previous_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sequence_number_index");

        let mut index =
            SequenceNumberIndexWriter::open(&path, 1, FlushPolicy::default()).unwrap();
        index.record_received(
            session(5),
            SequenceNumber::new(42),
            SequenceIndex::new(1),
            StreamPosition::new(512),
        );
        index.flush().unwrap();
        drop(index);

        let reopened =
            SequenceNumberIndexWriter::open(&path, 1, FlushPolicy::default()).unwrap();
        assert_eq!(
            reopened.last_known_sequence_number(session(5)),
            Some(SequenceNumber::new(42))
        );
        assert_eq!(reopened.indexed_position().value(), 512);
    }

    #[test]
    fn test_passing_place_promoted_when_canonical_missing() {
        // Simulates a crash after fsync but before the rename: only the
        // passing place exists.
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sequence_number_index");

        let mut index =
            SequenceNumberIndexWriter::open(&path, 1, FlushPolicy::default()).unwrap();
        index.record_received(
            session(1),
            SequenceNumber::new(3),
            SequenceIndex::new(0),
            StreamPosition::new(64),
        );
        index.flush().unwrap();
        drop(index);

        fs::rename(&path, passing_place_path(&path)).unwrap();

        let reader = SequenceNumberIndexReader::load(&path).unwrap();
        assert_eq!(
            reader.last_known_sequence_number(session(1)),
            Some(SequenceNumber::new(3))
        );
    }

    #[test]
    fn test_passing_place_preferred_when_ahead() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sequence_number_index");

        // Older canonical image.
        let mut index =
            SequenceNumberIndexWriter::open(&path, 1, FlushPolicy::default()).unwrap();
        index.record_received(
            session(1),
            SequenceNumber::new(3),
            SequenceIndex::new(0),
            StreamPosition::new(64),
        );
        index.flush().unwrap();
        let old = fs::read(&path).unwrap();

        // Newer image, then demote the old one back to canonical and park
        // the new one in the passing place.
        index.record_received(
            session(1),
            SequenceNumber::new(9),
            SequenceIndex::new(0),
            StreamPosition::new(640),
        );
        index.flush().unwrap();
        drop(index);
        fs::rename(&path, passing_place_path(&path)).unwrap();
        fs::write(&path, &old).unwrap();

        let reader = SequenceNumberIndexReader::load(&path).unwrap();
        assert_eq!(
            reader.last_known_sequence_number(session(1)),
            Some(SequenceNumber::new(9))
        );
        assert_eq!(reader.indexed_position().value(), 640);
    }

    #[test]
    fn test_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sequence_number_index");

        let mut index =
            SequenceNumberIndexWriter::open(&path, 1, FlushPolicy::default()).unwrap();
        index.record_received(
            session(1),
            SequenceNumber::new(3),
            SequenceIndex::new(0),
            StreamPosition::new(64),
        );
        index.flush().unwrap();
        drop(index);

        // Flip one payload byte inside the first record sector.
        let mut bytes = fs::read(&path).unwrap();
        bytes[SECTOR_SIZE + 4] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let result = SequenceNumberIndexReader::load(&path);
        assert!(matches!(result, Err(IndexError::Corrupted { .. })));

        // The writer refuses to start over the corrupt image too.
        let result = SequenceNumberIndexWriter::open(&path, 1, FlushPolicy::default());
        assert!(matches!(result, Err(IndexError::Corrupted { .. })));
    }

    #[test]
    fn test_reset_single_session_bumps_index() {
        let dir = TempDir::new().unwrap();
        let mut index = writer(&dir);

        index.record_received(
            session(1),
            SequenceNumber::new(9),
            SequenceIndex::new(0),
            StreamPosition::new(64),
        );
        index.record_received(
            session(2),
            SequenceNumber::new(4),
            SequenceIndex::new(0),
            StreamPosition::new(128),
        );

        index.reset_session(session(1));
        assert_eq!(index.last_known_sequence_number(session(1)), None);
        // Other sessions are untouched.
        assert_eq!(
            index.last_known_sequence_number(session(2)),
            Some(SequenceNumber::new(4))
        );

        index.flush().unwrap();
        let reader = SequenceNumberIndexReader::load(dir.path().join("sequence_number_index"))
            .unwrap();
        assert_eq!(reader.entry(session(1)).unwrap().sequence_index.value(), 1);
    }

    #[test]
    fn test_reset_forgets_everything() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sequence_number_index");

        let mut index =
            SequenceNumberIndexWriter::open(&path, 1, FlushPolicy::default()).unwrap();
        index.record_received(
            session(1),
            SequenceNumber::new(3),
            SequenceIndex::new(0),
            StreamPosition::new(64),
        );
        index.flush().unwrap();

        index.reset_sequence_numbers().unwrap();
        assert_eq!(index.last_known_sequence_number(session(1)), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_many_sessions_span_sectors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sequence_number_index");

        let mut index =
            SequenceNumberIndexWriter::open(&path, 1, FlushPolicy::default()).unwrap();
        let sessions = RECORDS_PER_SECTOR * 2 + 3;
        for i in 0..sessions {
            index.record_received(
                session(i as u64),
                SequenceNumber::new(i as u32 + 1),
                SequenceIndex::new(0),
                StreamPosition::new((i as u64 + 1) * 32),
            );
        }
        index.flush().unwrap();

        let reader = SequenceNumberIndexReader::load(&path).unwrap();
        assert_eq!(reader.session_count(), sessions);
        for i in 0..sessions {
            assert_eq!(
                reader.last_known_sequence_number(session(i as u64)),
                Some(SequenceNumber::new(i as u32 + 1)),
            );
        }
    }

    #[test]
    fn test_maybe_flush_threshold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sequence_number_index");
        let policy = FlushPolicy {
            interval: Duration::from_secs(3600),
            dirty_threshold: 2,
        };
        let mut index = SequenceNumberIndexWriter::open(&path, 1, policy).unwrap();

        index.record_received(
            session(1),
            SequenceNumber::new(1),
            SequenceIndex::new(0),
            StreamPosition::new(32),
        );
        assert!(!index.maybe_flush().unwrap());
        index.record_received(
            session(1),
            SequenceNumber::new(2),
            SequenceIndex::new(0),
            StreamPosition::new(64),
        );
        assert!(index.maybe_flush().unwrap());
        assert!(path.exists());
    }
}
