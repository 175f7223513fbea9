/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! # IronGate Engine
//!
//! The gateway engine: everything between the wire and the application.
//!
//! This crate provides:
//! - **Carrier streams**: In-process shared log streams with positions,
//!   two-step claim/commit publication, and a backpressure sentinel
//! - **Receiver dispatcher**: The framer agent demultiplexing framed bytes
//!   into per-connection state machines, with per-endpoint backpressure
//!   pausing and taxonomised disconnects
//! - **Gateway sessions registry**: `SessionKey -> SessionContext` with
//!   duplicate-session policy and sequence-index management
//! - **Indexer agent**: Consumes the carrier streams and maintains the
//!   sequence-number and replay indexes
//! - **Application interface**: Async callbacks for session lifecycle and
//!   inbound business messages
//! - **Admin operations**: Sequence resets, session lookup, archive pruning
//!
//! The engine runs as single-threaded agents stepped by `do_work()`; no
//! agent ever blocks, and cross-agent communication goes through the carrier
//! streams and indexes only.

pub mod admin;
pub mod application;
pub mod carrier;
pub mod config;
pub mod framer;
pub mod indexer;
pub mod registry;

pub use admin::GatewayAdmin;
pub use application::{Application, NoOpApplication};
pub use carrier::{CarrierRecord, CarrierStream, Claim, INBOUND_STREAM_ID, OUTBOUND_STREAM_ID};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use framer::{
    ConnectionId, EngineEvent, Framer, LibraryCommand, ProtocolKind, ReplayRange,
};
pub use indexer::{Indexer, ReplayService};
pub use registry::{AcquireOutcome, GatewaySessions, LibraryId};
