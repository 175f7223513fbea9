/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! # IronGate Transport
//!
//! Network framing for the IronGate gateway engine.
//!
//! This crate provides the two tokio codecs the receiver dispatcher drives:
//! - **FIX framing**: SOH-delimited tag=value messages, validated against
//!   BeginString, BodyLength, and Checksum before a frame is surfaced
//! - **SOFH framing**: length-prefixed binary frames for FIXP connections
//!
//! Frames are surfaced as raw byte buffers; interpretation belongs to the
//! session state machines.

pub mod binary;
pub mod codec;

pub use binary::SofhCodec;
pub use codec::{FixCodec, FramingError};
