/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Simple Open Framing Header.
//!
//! Every binary message is prefixed by a four-byte header: a big-endian
//! `message_length` covering the whole frame including the header itself,
//! followed by a big-endian encoding discriminator.

use crate::error::FixpError;
use bytes::{BufMut, BytesMut};

/// Length of the framing header in bytes.
pub const SOFH_LEN: usize = 4;

/// Encoding value for SBE little-endian payloads.
pub const SOFH_ENCODING_SBE_LE: u16 = 0xCB01;

/// Decoded framing header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame length including this header.
    pub message_length: u16,
    /// Encoding discriminator.
    pub encoding: u16,
}

impl FrameHeader {
    /// Creates a header for a payload of `payload_len` bytes.
    ///
    /// # Panics
    /// Panics if the frame would exceed `u16::MAX`; callers frame payloads
    /// far below that bound.
    #[must_use]
    pub fn for_payload(payload_len: usize) -> Self {
        let total = payload_len + SOFH_LEN;
        debug_assert!(total <= u16::MAX as usize);
        Self {
            message_length: total as u16,
            encoding: SOFH_ENCODING_SBE_LE,
        }
    }

    /// Decodes a header from the start of `buf`.
    ///
    /// # Errors
    /// Returns `FixpError::UnexpectedEof` when fewer than [`SOFH_LEN`] bytes
    /// are available, `UnsupportedEncoding` or `InvalidFrameLength` when the
    /// header is malformed.
    pub fn decode(buf: &[u8]) -> Result<Self, FixpError> {
        if buf.len() < SOFH_LEN {
            return Err(FixpError::UnexpectedEof {
                needed: SOFH_LEN,
                available: buf.len(),
            });
        }
        let message_length = u16::from_be_bytes([buf[0], buf[1]]);
        let encoding = u16::from_be_bytes([buf[2], buf[3]]);

        if encoding != SOFH_ENCODING_SBE_LE {
            return Err(FixpError::UnsupportedEncoding(encoding));
        }
        if (message_length as usize) < SOFH_LEN {
            return Err(FixpError::InvalidFrameLength(message_length));
        }

        Ok(Self {
            message_length,
            encoding,
        })
    }

    /// Encodes this header into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.message_length);
        buf.put_u16(self.encoding);
    }

    /// Returns the payload length this header frames.
    #[inline]
    #[must_use]
    pub const fn payload_len(&self) -> usize {
        self.message_length as usize - SOFH_LEN
    }
}
