/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Tokio codec for FIX message framing.
//!
//! A FIX frame announces its own extent: the BodyLength field counts the
//! bytes between its own delimiter and the checksum trailer. The codec reads
//! just the first two fields to size the frame, waits for it to arrive in
//! full, verifies the trailer through [`verify_trailer`], and hands the
//! complete message up without interpreting anything else. Session-level
//! parsing belongs to the state machines.

use bytes::{BufMut, BytesMut};
use irongate_core::error::DecodeError;
use irongate_fixp::error::FixpError;
use irongate_tagvalue::checksum::{TRAILER_LEN, verify_trailer};
use irongate_tagvalue::decoder::SOH;
use memchr::memchr_iter;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Errors surfaced by the framing codecs.
///
/// Parse-level problems reuse the core [`DecodeError`] taxonomy; the binary
/// codec adds its SOFH failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// The byte stream does not frame a valid message.
    #[error("framing error: {0}")]
    Frame(#[from] DecodeError),

    /// The SOFH header is invalid (binary connections only).
    #[error("sofh error: {0}")]
    Sofh(#[from] FixpError),

    /// I/O error from the underlying transport.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FramingError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Tokio codec for FIX message framing.
///
/// Checksum validation happens at the framing layer so a corrupt frame
/// never reaches a session state machine.
#[derive(Debug, Clone)]
pub struct FixCodec {
    /// Maximum message size in bytes.
    max_message_size: usize,
    /// Whether to verify the checksum trailer.
    validate_checksum: bool,
}

impl FixCodec {
    /// Creates a new codec with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: 1024 * 1024,
            validate_checksum: true,
        }
    }

    /// Sets the maximum message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets whether to verify checksum trailers.
    #[must_use]
    pub const fn with_checksum_validation(mut self, validate: bool) -> Self {
        self.validate_checksum = validate;
        self
    }
}

impl Default for FixCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FixCodec {
    type Item = BytesMut;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame_len) = announced_frame_length(src)? else {
            return Ok(None);
        };

        if frame_len > self.max_message_size {
            return Err(DecodeError::MessageTooLarge {
                size: frame_len,
                max_size: self.max_message_size,
            }
            .into());
        }

        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        if self.validate_checksum {
            match verify_trailer(&src[..frame_len]) {
                Some((calculated, declared)) if calculated == declared => {}
                Some((calculated, declared)) => {
                    return Err(DecodeError::ChecksumMismatch {
                        calculated,
                        declared,
                    }
                    .into());
                }
                None => return Err(DecodeError::InvalidBodyLength.into()),
            }
        }

        Ok(Some(src.split_to(frame_len)))
    }
}

impl Encoder<BytesMut> for FixCodec {
    type Error = FramingError;

    fn encode(&mut self, item: BytesMut, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}

/// Derives the full frame length from the leading BeginString and
/// BodyLength fields.
///
/// # Returns
/// `Ok(None)` while the two sizing fields have not fully arrived.
///
/// # Errors
/// Returns a [`DecodeError`] when the stream cannot be a FIX message.
fn announced_frame_length(src: &[u8]) -> Result<Option<usize>, FramingError> {
    if src.is_empty() {
        return Ok(None);
    }
    if !src.starts_with(b"8=") {
        if src.len() >= 2 {
            return Err(DecodeError::InvalidBeginString.into());
        }
        return Ok(None);
    }

    let mut delimiters = memchr_iter(SOH, src);
    let Some(begin_string_end) = delimiters.next() else {
        return Ok(None);
    };
    let Some(length_field_end) = delimiters.next() else {
        return Ok(None);
    };

    let Some(digits) = src[begin_string_end + 1..length_field_end].strip_prefix(b"9=") else {
        return Err(DecodeError::MissingBodyLength.into());
    };
    let body_length = parse_length(digits).ok_or(DecodeError::InvalidBodyLength)?;

    // BodyLength spans from past its own delimiter up to the trailer.
    Ok(Some(length_field_end + 1 + body_length + TRAILER_LEN))
}

/// Parses a BodyLength value, rejecting empty or non-digit input.
fn parse_length(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() || digits.len() > 9 {
        return None;
    }
    digits.iter().try_fold(0usize, |acc, &b| {
        b.is_ascii_digit()
            .then(|| acc * 10 + usize::from(b - b'0'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use irongate_tagvalue::checksum::{calculate_checksum, format_checksum};

    fn make_fix_message(body: &str) -> Vec<u8> {
        let header = format!("8=FIX.4.4\x019={}\x01", body.len());
        let without_checksum = format!("{}{}", header, body);
        let checksum = calculate_checksum(without_checksum.as_bytes());
        let digits = format_checksum(checksum);
        let mut out = without_checksum.into_bytes();
        out.extend_from_slice(b"10=");
        out.extend_from_slice(&digits);
        out.push(SOH);
        out
    }

    #[test]
    fn test_announced_frame_length() {
        let msg = make_fix_message("35=0\x01");
        assert_eq!(announced_frame_length(&msg).unwrap(), Some(msg.len()));

        // Sizing fields incomplete: undecided.
        assert_eq!(announced_frame_length(b"8=FIX.4.4\x019=12").unwrap(), None);
        assert_eq!(announced_frame_length(b"8").unwrap(), None);
    }

    #[test]
    fn test_parse_length() {
        assert_eq!(parse_length(b"0"), Some(0));
        assert_eq!(parse_length(b"812"), Some(812));
        assert_eq!(parse_length(b""), None);
        assert_eq!(parse_length(b"12a"), None);
        assert_eq!(parse_length(b"1234567890"), None);
    }

    #[test]
    fn test_decode_complete_message() {
        let mut codec = FixCodec::new();
        let msg = make_fix_message("35=0\x01");
        let mut buf = BytesMut::from(&msg[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], &msg[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut codec = FixCodec::new();
        let msg = make_fix_message("35=0\x01");

        // Deliver one byte at a time; only the last byte completes a frame.
        let mut buf = BytesMut::new();
        for &b in &msg[..msg.len() - 1] {
            buf.put_u8(b);
            assert!(codec.decode(&mut buf).unwrap().is_none());
        }
        buf.put_u8(msg[msg.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_two_pipelined_messages() {
        let mut codec = FixCodec::new();
        let first = make_fix_message("35=0\x01");
        let second = make_fix_message("35=1\x01112=TR1\x01");
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second);

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], &first[..]);
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], &second[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_non_fix_stream() {
        let mut codec = FixCodec::new();
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(FramingError::Frame(DecodeError::InvalidBeginString))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_body_length() {
        let mut codec = FixCodec::new();
        let mut buf = BytesMut::from(&b"8=FIX.4.4\x0135=0\x0110=000\x01"[..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(FramingError::Frame(DecodeError::MissingBodyLength))
        ));
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let mut codec = FixCodec::new();
        let mut msg = make_fix_message("35=0\x01");
        let len = msg.len();
        msg[len - 2] = b'9'; // corrupt the last checksum digit
        let mut buf = BytesMut::from(&msg[..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(FramingError::Frame(DecodeError::ChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn test_decode_without_checksum_validation() {
        let mut codec = FixCodec::new().with_checksum_validation(false);
        let mut msg = make_fix_message("35=0\x01");
        let len = msg.len();
        msg[len - 2] = b'9';
        let mut buf = BytesMut::from(&msg[..]);

        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_message_too_large() {
        let mut codec = FixCodec::new().with_max_message_size(32);
        let msg = make_fix_message("35=D\x0111=0123456789012345678901234567890123456789\x01");
        let mut buf = BytesMut::from(&msg[..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(FramingError::Frame(DecodeError::MessageTooLarge { .. }))
        ));
    }

    #[test]
    fn test_encode_passthrough() {
        let mut codec = FixCodec::new();
        let msg = make_fix_message("35=0\x01");
        let mut dst = BytesMut::new();

        codec
            .encode(BytesMut::from(&msg[..]), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], &msg[..]);
    }
}
