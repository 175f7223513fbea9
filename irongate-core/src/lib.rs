/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! # IronGate Core
//!
//! Core types, traits, and error definitions for the IronGate trading gateway.
//!
//! This crate provides the fundamental building blocks used across all IronGate crates:
//! - **Error types**: Unified error handling with `thiserror`
//! - **Identifier types**: `SessionId`, `SequenceNumber`, `SequenceIndex`, `CompId`
//! - **Position types**: `StreamPosition`, `RecordingId`
//! - **Session contexts**: `SessionContext`, `SessionKey`, `DisconnectReason`
//!
//! ## Ordering Model
//!
//! Every message a session ever carries is totally ordered by the pair
//! `(SequenceIndex, SequenceNumber)`: the sequence index increments only on
//! explicit sequence resets, so the pair survives resets that rewind the raw
//! sequence number. Stream positions are monotonic byte offsets into a carrier
//! stream and act as causal timestamps for the persistent indexes.

pub mod context;
pub mod error;
pub mod types;

pub use context::{DisconnectReason, FixSessionKey, NegotiateOutcome, SessionContext, SessionKey};
pub use error::{
    DecodeError, EncodeError, EngineError, GatewayError, IndexError, Result, SessionError,
};
pub use types::{
    CompId, RecordingId, SequenceIndex, SequenceNumber, SessionId, SessionVerId, StreamPosition,
    Timestamp, TimestampPrecision,
};
