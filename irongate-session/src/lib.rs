/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! # IronGate Session
//!
//! FIX session layer protocol implementation for the IronGate gateway.
//!
//! This crate provides:
//! - **State machine**: The acceptor-side session FSM covering logon,
//!   heartbeating, sequence discipline, resend handling, and logout
//! - **Sequence management**: Atomic sequence number handling with gap and
//!   rewind classification
//! - **Heartbeat handling**: Heartbeat/TestRequest liveness tracking
//! - **Retransmission**: Resend planning with admin gap-fill coalescing and
//!   a concurrent-replay limiter
//! - **Configuration**: Per-session configuration options

pub mod config;
pub mod fix;
pub mod heartbeat;
pub mod replay;
pub mod sequence;

pub use config::SessionConfig;
pub use fix::{FixAction, FixSession, FixState};
pub use heartbeat::HeartbeatManager;
pub use replay::{ReplayedMessage, mark_poss_dup, plan_retransmission};
pub use sequence::{SequenceCheck, SequenceManager};
