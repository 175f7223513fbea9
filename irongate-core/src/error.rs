/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Error types for the IronGate gateway engine.
//!
//! This module provides a unified error hierarchy using `thiserror` for typed,
//! domain-specific errors across all IronGate operations. The taxonomy follows
//! the recovery strategy: protocol and sequence errors are recovered locally
//! (disconnect, reject, or retransmit), backpressure is retried, and index
//! corruption is fatal to the engine.

use thiserror::Error;

/// Result type alias using [`GatewayError`] as the error type.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Top-level error type for all IronGate operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Error during message decoding.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Error during message encoding.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Error in session layer operations.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Error in the persistent index layer.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Error in engine orchestration.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// I/O error from underlying transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that occur during FIX message decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Message buffer is incomplete, need more data.
    #[error("incomplete message, need more data")]
    Incomplete,

    /// Invalid BeginString field (tag 8).
    #[error("invalid begin string: expected 8=FIX.x.y")]
    InvalidBeginString,

    /// Missing BodyLength field (tag 9).
    #[error("missing body length field (tag 9)")]
    MissingBodyLength,

    /// Invalid BodyLength value.
    #[error("invalid body length value")]
    InvalidBodyLength,

    /// Missing MsgType field (tag 35).
    #[error("missing msg type field (tag 35)")]
    MissingMsgType,

    /// Checksum mismatch between calculated and declared values.
    #[error("checksum mismatch: calculated {calculated}, declared {declared}")]
    ChecksumMismatch {
        /// Calculated checksum value.
        calculated: u8,
        /// Declared checksum value in message.
        declared: u8,
    },

    /// Missing required session header field.
    #[error("missing required field: tag {tag}")]
    MissingRequiredField {
        /// The tag number of the missing field.
        tag: u32,
    },

    /// Invalid field value for the expected type.
    #[error("invalid field value for tag {tag}: {reason}")]
    InvalidFieldValue {
        /// The tag number of the field.
        tag: u32,
        /// Description of why the value is invalid.
        reason: String,
    },

    /// Invalid UTF-8 in string field.
    #[error("invalid utf-8 in field: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Message exceeds maximum allowed size.
    #[error("message too large: {size} bytes exceeds maximum {max_size}")]
    MessageTooLarge {
        /// Actual message size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max_size: usize,
    },
}

/// Errors that occur during FIX message encoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Buffer capacity exceeded during encoding.
    #[error("buffer overflow: need {needed} bytes, have {available}")]
    BufferOverflow {
        /// Bytes needed to complete encoding.
        needed: usize,
        /// Bytes available in buffer.
        available: usize,
    },

    /// Missing required field during encoding.
    #[error("missing required field: tag {tag}")]
    MissingRequiredField {
        /// The tag number of the missing field.
        tag: u32,
    },

    /// Field value exceeds maximum length.
    #[error("field value too long for tag {tag}: {length} exceeds max {max_length}")]
    FieldTooLong {
        /// The tag number of the field.
        tag: u32,
        /// Actual length of the value.
        length: usize,
        /// Maximum allowed length.
        max_length: usize,
    },
}

/// Errors in session layer operations for either protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Session is not in the correct state for the operation.
    #[error("invalid session state: expected {expected}, current {current}")]
    InvalidState {
        /// Expected state for the operation.
        expected: String,
        /// Current session state.
        current: String,
    },

    /// SenderCompID or TargetCompID does not match the session.
    #[error("comp id problem: expected {expected}, received {received}")]
    CompIdProblem {
        /// Expected comp id.
        expected: String,
        /// Received comp id.
        received: String,
    },

    /// SendingTime outside the accepted accuracy window.
    #[error("sending time accuracy: delta {delta_ms} ms exceeds window {window_ms} ms")]
    SendingTimeAccuracy {
        /// Observed difference in milliseconds.
        delta_ms: i64,
        /// Configured window in milliseconds.
        window_ms: i64,
    },

    /// Logon was rejected.
    #[error("logon rejected: {reason}")]
    LogonRejected {
        /// Reason for rejection.
        reason: String,
    },

    /// Authentication strategy rejected the counterparty.
    #[error("authentication failure: {reason}")]
    AuthenticationFailure {
        /// Reason for rejection.
        reason: String,
    },

    /// Heartbeat timeout with no response to a test request.
    #[error("heartbeat timeout after {elapsed_ms} milliseconds")]
    HeartbeatTimeout {
        /// Elapsed time in milliseconds since last message.
        elapsed_ms: u64,
    },

    /// Sequence number gap detected.
    #[error("sequence gap detected: expected {expected}, received {received}")]
    SequenceGap {
        /// Expected sequence number.
        expected: u32,
        /// Received sequence number.
        received: u32,
    },

    /// Sequence number lower than expected without PossDupFlag.
    #[error("MsgSeqNum too low, expecting {expected} but received {received}")]
    SequenceTooLow {
        /// Minimum expected sequence number.
        expected: u32,
        /// Received sequence number.
        received: u32,
    },

    /// Too many concurrent retransmission requests for this session.
    #[error("replay limit exceeded: {outstanding} outstanding, limit {limit}")]
    ReplayLimitExceeded {
        /// Number of replays currently in flight.
        outstanding: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Resend requested for messages missing from the archive.
    #[error("resend request for unavailable range: {begin}..{end}")]
    ResendUnavailable {
        /// Begin sequence number of requested range.
        begin: u32,
        /// End sequence number of requested range.
        end: u32,
    },

    /// Session configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Errors in the persistent index layer.
///
/// `Corrupted` is fatal: the engine refuses to start its writer agents over
/// a file that fails its checksum or magic validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// File checksum or magic invalid. Fatal to the engine.
    #[error("file system corruption in {path}: {reason}")]
    Corrupted {
        /// Path of the corrupt file.
        path: String,
        /// Description of the corruption.
        reason: String,
    },

    /// A ring reader was overtaken by the writer.
    #[error("reader lapped: cursor {cursor}, begin change {begin_change}")]
    Lapped {
        /// Reader cursor at detection time.
        cursor: u64,
        /// Writer begin-change counter at detection time.
        begin_change: u64,
    },

    /// Requested replay range is not present in the index.
    #[error("range not indexed: ({begin_index}, {begin_seq}) to ({end_index}, {end_seq})")]
    RangeNotIndexed {
        /// Begin sequence index.
        begin_index: u32,
        /// Begin sequence number.
        begin_seq: u32,
        /// End sequence index.
        end_index: u32,
        /// End sequence number.
        end_seq: u32,
    },

    /// Unsupported file format version.
    #[error("unsupported version in {path}: got {got}, supported {supported}")]
    UnsupportedVersion {
        /// Path of the file.
        path: String,
        /// Version found in the header.
        got: u32,
        /// Version this build supports.
        supported: u32,
    },

    /// I/O error in the index layer.
    #[error("index i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors in engine orchestration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Incompatible configuration, surfaced at initiate time.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A reply deadline expired.
    #[error("timeout after {elapsed_ms} ms waiting for {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// Elapsed time in milliseconds.
        elapsed_ms: u64,
    },

    /// Carrier stream is full. Retried automatically by callers.
    #[error("backpressure on stream {stream_id}")]
    Backpressure {
        /// The stream that rejected the claim.
        stream_id: u32,
    },

    /// The session key is already bound to an active connection.
    #[error("duplicate session: {key}")]
    DuplicateSession {
        /// Display form of the contested session key.
        key: String,
    },

    /// The engine is shutting down.
    #[error("engine closed")]
    Closed,
}
