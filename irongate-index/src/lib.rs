/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! # IronGate Index
//!
//! Persistent indexes that make exactly-once delivery survivable across
//! process restarts:
//!
//! - **Sequence-number index**: crash-safe, single-writer table mapping each
//!   session to the last sequence numbers accepted and sent, committed by
//!   atomic file replacement with a passing-place recovery copy
//! - **Replay index**: per-session memory-mapped ring recording where every
//!   message lives in the archive, written lock-free with lap-detectable
//!   readers
//! - **Replay query**: turns a sequence range into the list of contiguous
//!   recording extents to stream back from the archive
//! - **Recording coordinator**: reuses archive recordings across restarts so
//!   a counterparty never observes its sequence space reset
//!
//! Every durable file carries a magic, a version, and CRC32C checksums; a
//! file that fails validation is reported as corruption and the engine
//! refuses to start its writer.

pub mod query;
pub mod recording;
pub mod replay_index;
pub mod sequence_number_index;

pub use query::{RecordingRange, ReplayQuery, StartPositionScan};
pub use recording::{AcquiredRecording, RecordingCoordinator, StreamDirection};
pub use replay_index::{
    DEFAULT_CAPACITY, REPLAY_RECORD_LEN, ReplayIndexReader, ReplayIndexRecord, ReplayIndexWriter,
    replay_index_path,
};
pub use sequence_number_index::{
    FlushPolicy, SequenceNumberEntry, SequenceNumberIndexReader, SequenceNumberIndexWriter,
};
