/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! # IronGate FIXP
//!
//! Binary Entry Point session protocol for the IronGate gateway engine.
//!
//! This crate provides:
//! - **SOFH framing**: The Simple Open Framing Header that length-prefixes
//!   every binary message
//! - **Session templates**: Codecs for the fourteen session-level messages
//!   (negotiate, establish, sequence, retransmission, finalisation, terminate)
//! - **Acceptor**: The acceptor-side state machine with strict
//!   session-version discipline
//!
//! The gateway is acceptor-only for the binary protocol. Business messages
//! pass through as opaque template payloads; only the session layer is
//! interpreted here.

pub mod acceptor;
pub mod error;
pub mod messages;
pub mod sofh;

pub use acceptor::{
    Acceptor, AcceptorAction, AcceptorConfig, AcceptorState, AuthenticationStrategy,
    PermissiveAuthentication,
};
pub use error::FixpError;
pub use messages::{
    EstablishmentRejectCode, FixpMessage, NegotiationRejectCode, RetransmitRejectCode,
    TerminationCode,
};
pub use sofh::{FrameHeader, SOFH_ENCODING_SBE_LE, SOFH_LEN};
