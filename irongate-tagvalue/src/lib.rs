/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! # IronGate TagValue
//!
//! Zero-copy FIX tag=value codec for the IronGate gateway engine.
//!
//! This crate provides:
//! - **Decoder**: Zero-copy parsing into [`FixFrame`] plus [`SessionHeader`]
//!   extraction of the fields the session engine validates
//! - **Encoder**: Tag=value assembly with automatic BeginString, BodyLength,
//!   and Checksum, plus builders for every administrative message the engine
//!   emits
//! - **Checksum**: FIX modulo-256 checksum helpers
//! - **Password wiping**: Blanking of credential fields before a message is
//!   committed to the archive stream
//!
//! The engine treats business message bodies as opaque bytes; only the
//! session-level header and the administrative messages are interpreted here.

pub mod checksum;
pub mod decoder;
pub mod encoder;
pub mod field;

pub use checksum::{calculate_checksum, format_checksum, parse_checksum};
pub use decoder::{Decoder, FixFrame, FixMsgType, SessionHeader};
pub use encoder::{AdminEncoder, Encoder, wipe_credentials};
pub use field::{FieldRef, tags};
