/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Replay queries over a session's replay index.
//!
//! [`ReplayQuery`] maps a `(sequence_index, sequence_number)` range onto the
//! ordered list of contiguous recording extents that hold the original bytes,
//! ready to be streamed back from the archive. [`StartPositionScan`] finds the
//! earliest position still needed per recording, used to prune the archive
//! after renegotiations.

use crate::replay_index::{REPLAY_RECORD_LEN, ReplayIndexReader, ReplayIndexRecord};
use irongate_core::error::IndexError;
use irongate_core::types::{RecordingId, SequenceIndex, SequenceNumber, StreamPosition};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Retries after a lap before the query gives up.
const MAX_LAP_RETRIES: usize = 3;

/// One contiguous extent of archived bytes to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingRange {
    /// Recording holding the extent.
    pub recording_id: RecordingId,
    /// Byte position of the first frame within the recording's stream.
    pub begin_position: StreamPosition,
    /// Fragment-aligned length of the extent in bytes.
    pub length: u64,
    /// Number of distinct sequence numbers inside the extent. Fragments of
    /// one message do not re-count.
    pub expected_message_count: u64,
}

/// Ordering key across sequence resets.
type SeqKey = (u32, u32);

fn key(record: &ReplayIndexRecord) -> SeqKey {
    (
        record.sequence_index.value(),
        record.sequence_number.value(),
    )
}

/// Query planner over one replay index.
#[derive(Debug)]
pub struct ReplayQuery<'a> {
    reader: &'a ReplayIndexReader,
}

impl<'a> ReplayQuery<'a> {
    /// Creates a query over an open index.
    #[must_use]
    pub const fn new(reader: &'a ReplayIndexReader) -> Self {
        Self { reader }
    }

    /// Materialises the recording ranges for `[begin, end]`.
    ///
    /// `end` is inclusive; `None` means "up to the latest indexed message".
    /// A lapped scan restarts from the ring's current begin; after
    /// [`MAX_LAP_RETRIES`] laps the error is surfaced to the caller, which
    /// retries or abandons the replay.
    ///
    /// # Errors
    /// Returns `IndexError::Lapped` when the writer keeps overtaking the
    /// scan.
    pub fn query(
        &self,
        begin_index: SequenceIndex,
        begin_seq: SequenceNumber,
        end: Option<(SequenceIndex, SequenceNumber)>,
    ) -> Result<Vec<RecordingRange>, IndexError> {
        let begin_key: SeqKey = (begin_index.value(), begin_seq.value());
        let end_key: Option<SeqKey> = end.map(|(i, n)| (i.value(), n.value()));

        let mut lap_retries = 0;
        'restart: loop {
            let mut ranges: Vec<RecordingRange> = Vec::new();
            let mut last_counted_seq: Option<SeqKey> = None;
            let mut cursor = self.reader.begin_change();

            loop {
                let record = match self.reader.read(&mut cursor) {
                    Ok(Some(record)) => record,
                    Ok(None) => return Ok(ranges),
                    Err(IndexError::Lapped { .. }) if lap_retries < MAX_LAP_RETRIES => {
                        lap_retries += 1;
                        warn!(lap_retries, "replay query lapped, restarting scan");
                        continue 'restart;
                    }
                    Err(err) => return Err(err),
                };

                let record_key = key(&record);
                if record_key < begin_key {
                    // Outbound sequence numbers are indexed contiguously
                    // within one sequence index, so the distance to the
                    // requested begin is a record count we can jump.
                    if record.sequence_index.value() == begin_key.0
                        && record.sequence_number.value() < begin_key.1
                    {
                        let gap = u64::from(begin_key.1 - record.sequence_number.value());
                        cursor += (gap - 1) * REPLAY_RECORD_LEN as u64;
                    }
                    continue;
                }
                if let Some(end_key) = end_key
                    && record_key > end_key
                {
                    return Ok(ranges);
                }

                append(&mut ranges, &mut last_counted_seq, &record, record_key);
            }
        }
    }
}

fn append(
    ranges: &mut Vec<RecordingRange>,
    last_counted_seq: &mut Option<SeqKey>,
    record: &ReplayIndexRecord,
    record_key: SeqKey,
) {
    let new_message = *last_counted_seq != Some(record_key);
    if new_message {
        *last_counted_seq = Some(record_key);
    }

    if let Some(current) = ranges.last_mut()
        && current.recording_id == record.recording_id
        && current.begin_position.value() + current.length == record.stream_position.value()
    {
        current.length += u64::from(record.length);
        if new_message {
            current.expected_message_count += 1;
        }
        return;
    }

    ranges.push(RecordingRange {
        recording_id: record.recording_id,
        begin_position: record.stream_position,
        length: u64::from(record.length),
        expected_message_count: u64::from(new_message),
    });
}

/// Scans a whole ring for the earliest live position per recording.
///
/// Only entries of the highest observed sequence index count: after a
/// renegotiation, everything belonging to earlier sequence indexes is
/// prunable. Lapping during the scan abandons it with an error; the caller
/// treats an abandoned scan as "nothing prunable yet" and collects the lap
/// as a diagnostic.
#[derive(Debug)]
pub struct StartPositionScan<'a> {
    reader: &'a ReplayIndexReader,
}

impl<'a> StartPositionScan<'a> {
    /// Creates a scan over an open index.
    #[must_use]
    pub const fn new(reader: &'a ReplayIndexReader) -> Self {
        Self { reader }
    }

    /// Returns `recording_id -> earliest position still needed`.
    ///
    /// # Errors
    /// Returns `IndexError::Lapped` when the writer overtakes the scan.
    pub fn scan(&self) -> Result<HashMap<RecordingId, StreamPosition>, IndexError> {
        let mut highest_index = 0u32;
        let mut starts: HashMap<RecordingId, StreamPosition> = HashMap::new();
        let mut cursor = self.reader.begin_change();

        while let Some(record) = self.reader.read(&mut cursor)? {
            let index = record.sequence_index.value();
            if index > highest_index {
                // A newer sequence space supersedes everything before it.
                highest_index = index;
                starts.clear();
            }
            if index == highest_index {
                starts
                    .entry(record.recording_id)
                    .and_modify(|p| *p = (*p).min(record.stream_position))
                    .or_insert(record.stream_position);
            }
        }

        debug!(
            highest_index,
            recordings = starts.len(),
            "start position scan complete"
        );
        Ok(starts)
    }
}
