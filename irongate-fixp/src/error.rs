/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Binary protocol error types.

use thiserror::Error;

/// Errors that can occur during binary message encoding/decoding and
/// acceptor operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FixpError {
    /// Unexpected end of input.
    #[error("unexpected end of input: need {needed} bytes, have {available}")]
    UnexpectedEof {
        /// Bytes needed to decode the value.
        needed: usize,
        /// Bytes available in the buffer.
        available: usize,
    },

    /// Framing header carries an unknown encoding value.
    #[error("unsupported encoding: {0:#06x}")]
    UnsupportedEncoding(u16),

    /// Frame length smaller than the framing header itself.
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(u16),

    /// Unknown session-level template.
    #[error("unknown template id: {0}")]
    UnknownTemplate(u16),

    /// Unknown enumeration value in a message field.
    #[error("invalid enum value {value} for {field}")]
    InvalidEnumValue {
        /// Field name.
        field: &'static str,
        /// Raw value found.
        value: u8,
    },

    /// A message arrived in a state that does not admit it.
    #[error("protocol violation in state {state}: {reason}")]
    ProtocolViolation {
        /// State name at the time of the violation.
        state: &'static str,
        /// What was violated.
        reason: &'static str,
    },
}
