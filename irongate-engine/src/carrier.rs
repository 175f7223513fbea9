/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! In-process carrier streams.
//!
//! A carrier stream is a single-writer, multi-reader log of framed records
//! with monotonic byte positions. The framer publishes every accepted
//! inbound message and every transmitted outbound message; the indexer and
//! replay machinery read them back by position. Records are aligned to a
//! 32-byte fragment boundary so indexed lengths match archived extents.
//!
//! Publication is two-step: [`CarrierStream::try_claim`] reserves space and
//! returns a [`Claim`], which is either committed (the record becomes
//! visible at its position) or aborted (the reservation is released).
//! `try_claim` never blocks; a full stream returns the backpressure
//! sentinel and the caller retries.

use bytes::Bytes;
use irongate_core::error::EngineError;
use irongate_core::types::{SequenceIndex, SequenceNumber, SessionId, StreamPosition};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stream id carrying counterparty-to-application messages.
pub const INBOUND_STREAM_ID: u32 = 1;

/// Stream id carrying application-to-counterparty messages.
pub const OUTBOUND_STREAM_ID: u32 = 2;

/// Fragment alignment of record starts, in bytes.
pub const FRAME_ALIGNMENT: usize = 32;

/// Fixed record header length in bytes.
const RECORD_HEADER_LEN: usize = 32;

/// Metadata of one carrier record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarrierRecord {
    /// Session the message belongs to.
    pub session_id: SessionId,
    /// Sequence-space revision.
    pub sequence_index: SequenceIndex,
    /// Message sequence number.
    pub sequence_number: SequenceNumber,
    /// True for session-level message types.
    pub is_admin: bool,
    /// Position of the record's first byte in the stream.
    pub position: StreamPosition,
    /// Aligned length of the whole record in bytes.
    pub aligned_length: u32,
    /// Exact payload length in bytes, excluding header and padding.
    pub payload_len: u32,
}

struct Inner {
    buf: Mutex<Vec<u8>>,
    /// Position up to which records are committed and visible to readers.
    committed: AtomicU64,
    capacity: usize,
}

/// One in-process log stream.
#[derive(Clone)]
pub struct CarrierStream {
    stream_id: u32,
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CarrierStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarrierStream")
            .field("stream_id", &self.stream_id)
            .field("committed", &self.inner.committed.load(Ordering::Acquire))
            .finish()
    }
}

impl CarrierStream {
    /// Creates a stream bounded at `capacity` bytes.
    #[must_use]
    pub fn new(stream_id: u32, capacity: usize) -> Self {
        Self {
            stream_id,
            inner: Arc::new(Inner {
                buf: Mutex::new(Vec::with_capacity(capacity.min(64 * 1024))),
                committed: AtomicU64::new(0),
                capacity,
            }),
        }
    }

    /// The stream's identifier.
    #[must_use]
    pub const fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Position past the newest committed record.
    #[must_use]
    pub fn committed_position(&self) -> StreamPosition {
        StreamPosition::new(self.inner.committed.load(Ordering::Acquire))
    }

    /// Reserves space for one record.
    ///
    /// # Errors
    /// Returns `EngineError::Backpressure` when the stream has no room; the
    /// caller retries later.
    pub fn try_claim(
        &self,
        session_id: SessionId,
        sequence_index: SequenceIndex,
        sequence_number: SequenceNumber,
        is_admin: bool,
        payload_len: usize,
    ) -> Result<Claim<'_>, EngineError> {
        let unaligned = RECORD_HEADER_LEN + payload_len;
        let aligned = unaligned.div_ceil(FRAME_ALIGNMENT) * FRAME_ALIGNMENT;

        let mut buf = self.inner.buf.lock();
        if buf.len() + aligned > self.inner.capacity {
            return Err(EngineError::Backpressure {
                stream_id: self.stream_id,
            });
        }

        let start = buf.len();
        buf.resize(start + aligned, 0);

        buf[start..start + 4].copy_from_slice(&(aligned as u32).to_le_bytes());
        buf[start + 4..start + 8].copy_from_slice(&(payload_len as u32).to_le_bytes());
        buf[start + 8..start + 16].copy_from_slice(&session_id.value().to_le_bytes());
        buf[start + 16..start + 20].copy_from_slice(&sequence_index.value().to_le_bytes());
        buf[start + 20..start + 24].copy_from_slice(&sequence_number.value().to_le_bytes());
        buf[start + 24] = u8::from(is_admin);
        let payload_offset = start + RECORD_HEADER_LEN;

        Ok(Claim {
            stream: self,
            buf,
            start,
            payload_offset,
            payload_len,
            aligned,
        })
    }

    /// Reads the committed record at `position`.
    ///
    /// # Returns
    /// The record's metadata and payload, or `None` when `position` is not a
    /// committed record start.
    #[must_use]
    pub fn read_at(&self, position: StreamPosition) -> Option<(CarrierRecord, Bytes)> {
        let committed = self.inner.committed.load(Ordering::Acquire) as usize;
        let start = position.value() as usize;
        if start + RECORD_HEADER_LEN > committed {
            return None;
        }

        let buf = self.inner.buf.lock();
        let aligned =
            u32::from_le_bytes(buf[start..start + 4].try_into().unwrap_or_default()) as usize;
        if aligned == 0 || start + aligned > committed {
            return None;
        }

        let record = decode_header(&buf, start);
        let payload_end = start + RECORD_HEADER_LEN + record.payload_len as usize;
        let payload = Bytes::copy_from_slice(&buf[start + RECORD_HEADER_LEN..payload_end]);
        Some((record, payload))
    }

    /// Reads all committed records from `cursor`, advancing it.
    #[must_use]
    pub fn read_from(&self, cursor: &mut StreamPosition) -> Vec<(CarrierRecord, Bytes)> {
        let committed = self.inner.committed.load(Ordering::Acquire) as usize;
        let mut out = Vec::new();
        let buf = self.inner.buf.lock();

        let mut offset = cursor.value() as usize;
        while offset + RECORD_HEADER_LEN <= committed {
            let aligned =
                u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap_or_default()) as usize;
            if aligned == 0 || offset + aligned > committed {
                break;
            }
            let record = decode_header(&buf, offset);
            let payload_end = offset + RECORD_HEADER_LEN + record.payload_len as usize;
            let payload = Bytes::copy_from_slice(&buf[offset + RECORD_HEADER_LEN..payload_end]);
            out.push((record, payload));
            offset += aligned;
        }

        *cursor = StreamPosition::new(offset as u64);
        out
    }
}

fn decode_header(buf: &[u8], start: usize) -> CarrierRecord {
    let aligned = u32::from_le_bytes(buf[start..start + 4].try_into().unwrap_or_default());
    let payload_len =
        u32::from_le_bytes(buf[start + 4..start + 8].try_into().unwrap_or_default());
    let session_id =
        u64::from_le_bytes(buf[start + 8..start + 16].try_into().unwrap_or_default());
    let sequence_index =
        u32::from_le_bytes(buf[start + 16..start + 20].try_into().unwrap_or_default());
    let sequence_number =
        u32::from_le_bytes(buf[start + 20..start + 24].try_into().unwrap_or_default());
    let is_admin = buf[start + 24] != 0;

    CarrierRecord {
        session_id: SessionId::new(session_id),
        sequence_index: SequenceIndex::new(sequence_index),
        sequence_number: SequenceNumber::new(sequence_number),
        is_admin,
        position: StreamPosition::new(start as u64),
        aligned_length: aligned,
        payload_len,
    }
}

/// A reserved, not yet visible record.
///
/// Every claim must end in [`Claim::commit`] or [`Claim::abort`]; the claim
/// holds the stream's write lock until then.
pub struct Claim<'a> {
    stream: &'a CarrierStream,
    buf: parking_lot::MutexGuard<'a, Vec<u8>>,
    start: usize,
    payload_offset: usize,
    payload_len: usize,
    aligned: usize,
}

impl std::fmt::Debug for Claim<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Claim")
            .field("start", &self.start)
            .field("payload_len", &self.payload_len)
            .finish()
    }
}

impl Claim<'_> {
    /// The writable payload slice.
    pub fn buffer(&mut self) -> &mut [u8] {
        let end = self.payload_offset + self.payload_len;
        &mut self.buf[self.payload_offset..end]
    }

    /// Publishes the record and returns its position.
    #[must_use]
    pub fn commit(self) -> StreamPosition {
        let position = self.start as u64;
        let end = (self.start + self.aligned) as u64;
        drop(self.buf);
        self.stream.inner.committed.store(end, Ordering::Release);
        StreamPosition::new(position)
    }

    /// Releases the reservation without publishing.
    pub fn abort(mut self) {
        self.buf.truncate(self.start);
    }
}
