/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! # IronGate
//!
//! A high-performance electronic-trading gateway engine for Rust.
//!
//! IronGate terminates sessions of two financial-message protocols, classic
//! FIX (4.2 through 5.0 SP2) and the binary FIXP entry point, delivering
//! every accepted business message to the embedded application exactly once
//! and in order. Sessions survive process restarts: persistent sequence and
//! replay indexes reconstruct the conversation and replay any gap from the
//! archived log after a reconnect.
//!
//! ## Architecture
//!
//! Four single-threaded agents cooperate without shared mutable state:
//! the framer (I/O, dispatch, state machines), the indexer (persistent
//! indexes), the external archiver, and the application libraries. All
//! cross-agent communication goes through single-writer multi-reader
//! carrier streams.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use irongate::prelude::*;
//!
//! let (config, application) = EngineConfigBuilder::new(
//!     "gateway-logs",
//!     SessionConfig::new(
//!         CompId::new("ACCEPTOR").unwrap(),
//!         CompId::new("INITIATOR").unwrap(),
//!         "FIX.4.4",
//!     ),
//! )
//! .with_application(MyApplication)
//! .build()?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`]: Identifier types, session contexts, and error taxonomy
//! - [`tagvalue`]: Zero-copy FIX tag=value encoding and decoding
//! - [`fixp`]: Binary Entry Point codec and acceptor state machine
//! - [`index`]: Persistent sequence-number and replay indexes
//! - [`session`]: FIX session state machine and retransmission planning
//! - [`transport`]: Tokio framing codecs
//! - [`engine`]: Dispatcher, registry, indexer agent, and admin operations

pub mod core {
    //! Identifier types, session contexts, and error taxonomy.
    pub use irongate_core::*;
}

pub mod tagvalue {
    //! Zero-copy FIX tag=value encoding and decoding.
    pub use irongate_tagvalue::*;
}

pub mod fixp {
    //! Binary Entry Point codec and acceptor state machine.
    pub use irongate_fixp::*;
}

pub mod index {
    //! Persistent sequence-number and replay indexes.
    pub use irongate_index::*;
}

pub mod session {
    //! FIX session state machine and retransmission planning.
    pub use irongate_session::*;
}

pub mod transport {
    //! Tokio framing codecs.
    pub use irongate_transport::*;
}

pub mod engine {
    //! Dispatcher, registry, indexer agent, and admin operations.
    pub use irongate_engine::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Core types
    pub use irongate_core::{
        CompId, DisconnectReason, FixSessionKey, GatewayError, RecordingId, Result,
        SequenceIndex, SequenceNumber, SessionContext, SessionId, SessionKey, SessionVerId,
        StreamPosition, Timestamp, TimestampPrecision,
    };

    // Tag-value codec
    pub use irongate_tagvalue::{AdminEncoder, Decoder, Encoder, FixFrame, FixMsgType};

    // Binary protocol
    pub use irongate_fixp::{
        Acceptor, AcceptorConfig, AcceptorState, AuthenticationStrategy, FixpMessage,
    };

    // Indexes
    pub use irongate_index::{
        RecordingCoordinator, ReplayIndexReader, ReplayIndexWriter, ReplayQuery,
        SequenceNumberIndexReader, SequenceNumberIndexWriter,
    };

    // Session layer
    pub use irongate_session::{FixAction, FixSession, FixState, SessionConfig};

    // Transport
    pub use irongate_transport::{FixCodec, SofhCodec};

    // Engine
    pub use irongate_engine::{
        Application, CarrierStream, EngineConfig, EngineConfigBuilder, EngineEvent, Framer,
        GatewayAdmin, Indexer, NoOpApplication, ProtocolKind, ReplayService,
    };
}
