/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! The indexer agent and the replay service.
//!
//! The indexer is the single writer of both persistent indexes. Each
//! `do_work()` step consumes newly committed carrier records and feeds the
//! sequence-number index (last numbers per session) and the per-session
//! replay index rings (where each message's bytes live), then flushes the
//! sequence-number index per its policy.
//!
//! The replay service answers retransmission requests: it turns a sequence
//! range into recording ranges via the replay query, reads the original
//! bytes back from the carrier, and materialises the outbound frames. For
//! FIX that means gap-filling administrative stretches; for FIXP the
//! archived frames are re-emitted behind the retransmission header.

use crate::carrier::{CarrierStream, INBOUND_STREAM_ID, OUTBOUND_STREAM_ID};
use bytes::{Bytes, BytesMut};
use irongate_core::error::IndexError;
use irongate_core::types::{
    RecordingId, SequenceIndex, SequenceNumber, SessionId, StreamPosition, Timestamp,
    TimestampPrecision,
};
use irongate_index::query::ReplayQuery;
use irongate_index::recording::{RecordingCoordinator, StreamDirection};
use irongate_index::replay_index::{
    ReplayIndexReader, ReplayIndexRecord, ReplayIndexWriter, replay_index_path,
};
use irongate_index::sequence_number_index::{FlushPolicy, SequenceNumberIndexWriter};
use irongate_session::replay::{ReplayedMessage, plan_retransmission};
use irongate_tagvalue::encoder::AdminEncoder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The indexer agent.
pub struct Indexer {
    log_file_dir: PathBuf,
    inbound: CarrierStream,
    outbound: CarrierStream,
    inbound_cursor: StreamPosition,
    outbound_cursor: StreamPosition,
    sequence_numbers: SequenceNumberIndexWriter,
    replay_writers: HashMap<(u64, u32), ReplayIndexWriter>,
    recordings: RecordingCoordinator,
    inbound_recording: RecordingId,
    outbound_recording: RecordingId,
    replay_capacity: u32,
}

impl Indexer {
    /// Opens the indexer over a log directory, recovering prior state.
    ///
    /// # Errors
    /// Returns `IndexError::Corrupted` when a recovered file fails
    /// validation; the engine must not start in that case.
    pub fn open(
        log_file_dir: impl Into<PathBuf>,
        inbound: CarrierStream,
        outbound: CarrierStream,
        flush_policy: FlushPolicy,
        replay_capacity: u32,
    ) -> Result<Self, IndexError> {
        let log_file_dir: PathBuf = log_file_dir.into();
        let sequence_numbers = SequenceNumberIndexWriter::open(
            log_file_dir.join("sequence_number_index"),
            INBOUND_STREAM_ID,
            flush_policy,
        )?;
        let mut recordings =
            RecordingCoordinator::open(log_file_dir.join("recording_coordinator"))?;
        let inbound_recording = recordings.acquire(StreamDirection::Inbound).recording_id;
        let outbound_recording = recordings.acquire(StreamDirection::Outbound).recording_id;

        let inbound_cursor = sequence_numbers.indexed_position();
        let outbound_cursor = sequence_numbers.sent_indexed_position();

        Ok(Self {
            log_file_dir,
            inbound,
            outbound,
            inbound_cursor,
            outbound_cursor,
            sequence_numbers,
            replay_writers: HashMap::new(),
            recordings,
            inbound_recording,
            outbound_recording,
            replay_capacity,
        })
    }

    /// The log directory this indexer writes under.
    #[must_use]
    pub fn log_file_dir(&self) -> &Path {
        &self.log_file_dir
    }

    /// The sequence-number index writer, for admin operations.
    pub fn sequence_numbers_mut(&mut self) -> &mut SequenceNumberIndexWriter {
        &mut self.sequence_numbers
    }

    /// Read access to the sequence-number mirror.
    #[must_use]
    pub fn sequence_numbers(&self) -> &SequenceNumberIndexWriter {
        &self.sequence_numbers
    }

    /// The recording coordinator, for shutdown persistence.
    pub fn recordings_mut(&mut self) -> &mut RecordingCoordinator {
        &mut self.recordings
    }

    /// Sessions with a replay index on disk for the given stream.
    #[must_use]
    pub fn replay_sessions(&self) -> Vec<(u64, u32)> {
        self.replay_writers.keys().copied().collect()
    }

    /// One scheduler step.
    ///
    /// # Errors
    /// Propagates index I/O failures; any error here is fatal to the engine.
    pub fn do_work(&mut self) -> Result<usize, IndexError> {
        let mut work = 0;

        let inbound = self.inbound.read_from(&mut self.inbound_cursor);
        for (record, _payload) in inbound {
            let consistent_to = record
                .position
                .advance(u64::from(record.aligned_length));
            self.sequence_numbers.record_received(
                record.session_id,
                record.sequence_number,
                record.sequence_index,
                consistent_to,
            );
            let recording_id = self.inbound_recording;
            self.index_replay(INBOUND_STREAM_ID, recording_id, &record)?;
            work += 1;
        }

        let outbound = self.outbound.read_from(&mut self.outbound_cursor);
        for (record, _payload) in outbound {
            let consistent_to = record
                .position
                .advance(u64::from(record.aligned_length));
            self.sequence_numbers.record_sent(
                record.session_id,
                record.sequence_number,
                record.sequence_index,
                consistent_to,
            );
            let recording_id = self.outbound_recording;
            self.index_replay(OUTBOUND_STREAM_ID, recording_id, &record)?;
            work += 1;
        }

        if self.sequence_numbers.maybe_flush()? {
            work += 1;
        }

        Ok(work)
    }

    /// Flushes everything unconditionally, as graceful shutdown requires.
    ///
    /// # Errors
    /// Propagates index I/O failures.
    pub fn shutdown_flush(&mut self) -> Result<(), IndexError> {
        self.sequence_numbers.flush()?;
        self.recordings
            .release(StreamDirection::Inbound, self.inbound_recording);
        self.recordings
            .release(StreamDirection::Outbound, self.outbound_recording);
        self.recordings.save()?;
        Ok(())
    }

    fn index_replay(
        &mut self,
        stream_id: u32,
        recording_id: RecordingId,
        record: &crate::carrier::CarrierRecord,
    ) -> Result<(), IndexError> {
        let key = (record.session_id.value(), stream_id);
        if !self.replay_writers.contains_key(&key) {
            let path = replay_index_path(&self.log_file_dir, record.session_id, stream_id);
            let writer = ReplayIndexWriter::open(&path, self.replay_capacity)?;
            debug!(path = %path.display(), "opened replay index");
            self.replay_writers.insert(key, writer);
        }
        if let Some(writer) = self.replay_writers.get_mut(&key) {
            writer.index(ReplayIndexRecord {
                stream_position: record.position,
                sequence_index: record.sequence_index,
                sequence_number: record.sequence_number,
                recording_id,
                length: record.aligned_length,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("log_file_dir", &self.log_file_dir)
            .field("inbound_cursor", &self.inbound_cursor)
            .field("outbound_cursor", &self.outbound_cursor)
            .finish()
    }
}

/// Materialises retransmissions from the replay index and the carrier.
#[derive(Debug)]
pub struct ReplayService {
    log_file_dir: PathBuf,
    outbound: CarrierStream,
}

impl ReplayService {
    /// Creates a service over the log directory and the outbound carrier.
    #[must_use]
    pub fn new(log_file_dir: impl Into<PathBuf>, outbound: CarrierStream) -> Self {
        Self {
            log_file_dir: log_file_dir.into(),
            outbound,
        }
    }

    /// Answers a FIX resend request.
    ///
    /// Business messages are republished verbatim as possible duplicates;
    /// administrative stretches and archive holes coalesce into gap fills.
    ///
    /// # Errors
    /// Returns `IndexError` when the replay index cannot be read; a lapped
    /// scan surfaces as `IndexError::Lapped` and the caller may retry.
    #[allow(clippy::too_many_arguments)]
    pub fn fix_resend(
        &self,
        session_id: SessionId,
        sequence_index: SequenceIndex,
        begin: SequenceNumber,
        end: Option<SequenceNumber>,
        admin: &AdminEncoder,
        next_sent: SequenceNumber,
        now: Timestamp,
        precision: TimestampPrecision,
    ) -> Result<Vec<BytesMut>, IndexError> {
        let messages = self.materialise(session_id, sequence_index, begin, end)?;
        Ok(plan_retransmission(
            admin, begin, end, next_sent, &messages, now, precision,
        ))
    }

    /// Answers a FIXP retransmit request with the archived frames in order.
    ///
    /// # Errors
    /// Returns `IndexError` when the replay index cannot be read.
    pub fn fixp_retransmit(
        &self,
        session_id: SessionId,
        sequence_index: SequenceIndex,
        from_seq_no: u32,
        count: u32,
    ) -> Result<Vec<Bytes>, IndexError> {
        let begin = SequenceNumber::new(from_seq_no);
        let end = Some(SequenceNumber::new(from_seq_no + count - 1));
        let messages = self.materialise(session_id, sequence_index, begin, end)?;
        Ok(messages.into_iter().map(|m| m.bytes).collect())
    }

    fn materialise(
        &self,
        session_id: SessionId,
        sequence_index: SequenceIndex,
        begin: SequenceNumber,
        end: Option<SequenceNumber>,
    ) -> Result<Vec<ReplayedMessage>, IndexError> {
        let path = replay_index_path(&self.log_file_dir, session_id, OUTBOUND_STREAM_ID);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = ReplayIndexReader::open(&path)?;
        let ranges = ReplayQuery::new(&reader).query(
            sequence_index,
            begin,
            end.map(|e| (sequence_index, e)),
        )?;

        let mut messages = Vec::new();
        for range in &ranges {
            let range_end = range.begin_position.value() + range.length;
            let mut position = range.begin_position;
            while position.value() < range_end {
                let Some((record, payload)) = self.outbound.read_at(position) else {
                    break;
                };
                messages.push(ReplayedMessage {
                    seq_num: record.sequence_number.value(),
                    is_admin: record.is_admin,
                    bytes: payload,
                });
                position = position.advance(u64::from(record.aligned_length));
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irongate_core::types::CompId;
    use tempfile::TempDir;

    fn streams() -> (CarrierStream, CarrierStream) {
        (
            CarrierStream::new(INBOUND_STREAM_ID, 1 << 20),
            CarrierStream::new(OUTBOUND_STREAM_ID, 1 << 20),
        )
    }

    fn publish(
        stream: &CarrierStream,
        session: u64,
        index: u32,
        seq: u32,
        is_admin: bool,
        payload: &[u8],
    ) -> StreamPosition {
        let mut claim = stream
            .try_claim(
                SessionId::new(session),
                SequenceIndex::new(index),
                SequenceNumber::new(seq),
                is_admin,
                payload.len(),
            )
            .unwrap();
        claim.buffer().copy_from_slice(payload);
        claim.commit()
    }

    fn indexer(dir: &TempDir, inbound: &CarrierStream, outbound: &CarrierStream) -> Indexer {
        Indexer::open(
            dir.path(),
            inbound.clone(),
            outbound.clone(),
            FlushPolicy::default(),
            64,
        )
        .unwrap()
    }

    #[test]
    fn test_indexer_tracks_last_received_and_sent() {
        let dir = TempDir::new().unwrap();
        let (inbound, outbound) = streams();
        let mut indexer = indexer(&dir, &inbound, &outbound);

        publish(&inbound, 1, 0, 1, true, b"logon");
        publish(&inbound, 1, 0, 2, false, b"order");
        publish(&outbound, 1, 0, 1, true, b"logon-ack");

        let work = indexer.do_work().unwrap();
        assert!(work >= 3);

        let entry_source = indexer.sequence_numbers();
        assert_eq!(
            entry_source.last_known_sequence_number(SessionId::new(1)),
            Some(SequenceNumber::new(2))
        );
    }

    #[test]
    fn test_indexer_is_idempotent_across_restart() {
        // Invariant: reprocessing already indexed records is a no-op.
        let dir = TempDir::new().unwrap();
        let (inbound, outbound) = streams();

        publish(&inbound, 1, 0, 5, false, b"order");
        {
            let mut first = indexer(&dir, &inbound, &outbound);
            first.do_work().unwrap();
            first.shutdown_flush().unwrap();
        }

        // A restarted indexer resumes from the flushed positions and sees
        // the same records again without rewinding the table.
        let mut second = indexer(&dir, &inbound, &outbound);
        second.do_work().unwrap();
        assert_eq!(
            second
                .sequence_numbers()
                .last_known_sequence_number(SessionId::new(1)),
            Some(SequenceNumber::new(5))
        );
    }

    #[test]
    fn test_fixp_retransmit_returns_archived_frames() {
        let dir = TempDir::new().unwrap();
        let (inbound, outbound) = streams();
        let mut indexer = indexer(&dir, &inbound, &outbound);

        publish(&outbound, 1, 0, 1, false, b"exec-1");
        publish(&outbound, 1, 0, 2, false, b"exec-2");
        publish(&outbound, 1, 0, 3, false, b"exec-3");
        indexer.do_work().unwrap();

        let service = ReplayService::new(dir.path(), outbound);
        let frames = service
            .fixp_retransmit(SessionId::new(1), SequenceIndex::new(0), 2, 2)
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], b"exec-2");
        assert_eq!(&frames[1][..], b"exec-3");
    }

    #[test]
    fn test_fix_resend_round_trip() {
        // Scenario: three archived admin messages answer a resend request
        // with one gap fill landing the counterparty on 4.
        let dir = TempDir::new().unwrap();
        let (inbound, outbound) = streams();
        let mut indexer = indexer(&dir, &inbound, &outbound);

        publish(&outbound, 1, 0, 1, true, b"8=FIX.4.4\x019=5\x0135=A\x0110=000\x01");
        publish(&outbound, 1, 0, 2, true, b"8=FIX.4.4\x019=5\x0135=0\x0110=000\x01");
        publish(&outbound, 1, 0, 3, true, b"8=FIX.4.4\x019=5\x0135=5\x0110=000\x01");
        indexer.do_work().unwrap();

        let service = ReplayService::new(dir.path(), outbound);
        let admin = AdminEncoder::new(
            "FIX.4.4",
            CompId::new("ACC").unwrap(),
            CompId::new("INIT").unwrap(),
            TimestampPrecision::Millis,
        );
        let frames = service
            .fix_resend(
                SessionId::new(1),
                SequenceIndex::new(0),
                SequenceNumber::new(1),
                Some(SequenceNumber::new(1)),
                &admin,
                SequenceNumber::new(4),
                Timestamp::from_millis(0),
                TimestampPrecision::Millis,
            )
            .unwrap();

        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        let contains = |needle: &str| {
            frame
                .windows(needle.len())
                .any(|w| w == needle.as_bytes())
        };
        assert!(contains("35=4\x01"));
        assert!(contains("34=1\x01"));
        assert!(contains("123=Y\x01"));
        assert!(contains("36=4\x01"));
    }

    #[test]
    fn test_resend_with_empty_index_returns_gap_fill() {
        let dir = TempDir::new().unwrap();
        let (_, outbound) = streams();
        let service = ReplayService::new(dir.path(), outbound);
        let admin = AdminEncoder::new(
            "FIX.4.4",
            CompId::new("ACC").unwrap(),
            CompId::new("INIT").unwrap(),
            TimestampPrecision::Millis,
        );

        let frames = service
            .fix_resend(
                SessionId::new(1),
                SequenceIndex::new(0),
                SequenceNumber::new(1),
                None,
                &admin,
                SequenceNumber::new(4),
                Timestamp::from_millis(0),
                TimestampPrecision::Millis,
            )
            .unwrap();
        // Everything is missing from the archive: one covering gap fill.
        assert_eq!(frames.len(), 1);
    }
}
