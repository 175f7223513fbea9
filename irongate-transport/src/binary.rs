/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Tokio codec for SOFH-framed binary messages.
//!
//! Splits the stream on the Simple Open Framing Header. The frame handed up
//! includes the header; the FIXP layer decodes the payload.

use crate::codec::FramingError;
use bytes::{BufMut, BytesMut};
use irongate_core::error::DecodeError;
use irongate_fixp::sofh::{FrameHeader, SOFH_LEN};
use tokio_util::codec::{Decoder, Encoder};

/// Tokio codec for SOFH frames.
#[derive(Debug, Clone)]
pub struct SofhCodec {
    /// Maximum frame size in bytes.
    max_frame_size: usize,
}

impl SofhCodec {
    /// Creates a new codec with default settings.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: 64 * 1024,
        }
    }

    /// Sets the maximum frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}

impl Default for SofhCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SofhCodec {
    type Item = BytesMut;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < SOFH_LEN {
            return Ok(None);
        }

        let header = FrameHeader::decode(src)?;
        let total = header.message_length as usize;

        if total > self.max_frame_size {
            return Err(DecodeError::MessageTooLarge {
                size: total,
                max_size: self.max_frame_size,
            }
            .into());
        }

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(total)))
    }
}

impl Encoder<BytesMut> for SofhCodec {
    type Error = FramingError;

    fn encode(&mut self, item: BytesMut, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}
