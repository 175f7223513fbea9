/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Zero-copy FIX message decoder.
//!
//! Parses a framed message into a [`FixFrame`] without copying field values,
//! then extracts the [`SessionHeader`] the session state machine validates:
//! message type, sequence number, comp ids, sending time, and the duplicate
//! and gap-fill flags. Everything else in the body is left untouched.

use crate::checksum::{calculate_checksum, parse_checksum};
use crate::field::{FieldRef, tags};
use irongate_core::error::DecodeError;
use irongate_core::types::{SequenceNumber, Timestamp};
use memchr::memchr;
use smallvec::SmallVec;

/// SOH (Start of Header) delimiter used in FIX messages.
pub const SOH: u8 = 0x01;

/// Equals sign delimiter between tag and value.
pub const EQUALS: u8 = b'=';

/// Message types the session engine distinguishes.
///
/// Business message types are carried opaquely; the engine only needs to know
/// they are not administrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixMsgType {
    /// Heartbeat (0).
    Heartbeat,
    /// Test Request (1).
    TestRequest,
    /// Resend Request (2).
    ResendRequest,
    /// Reject (3).
    Reject,
    /// Sequence Reset (4).
    SequenceReset,
    /// Logout (5).
    Logout,
    /// Logon (A).
    Logon,
    /// User Request (BE), carries credentials that are wiped before archival.
    UserRequest,
    /// Any other message type, delivered to the application unmodified.
    Business,
}

impl FixMsgType {
    /// Classifies a raw MsgType value.
    #[must_use]
    pub fn classify(value: &[u8]) -> Self {
        match value {
            b"0" => Self::Heartbeat,
            b"1" => Self::TestRequest,
            b"2" => Self::ResendRequest,
            b"3" => Self::Reject,
            b"4" => Self::SequenceReset,
            b"5" => Self::Logout,
            b"A" => Self::Logon,
            b"BE" => Self::UserRequest,
            _ => Self::Business,
        }
    }

    /// Returns the wire representation of this message type.
    ///
    /// `Business` has no single representation and returns an empty slice.
    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Heartbeat => b"0",
            Self::TestRequest => b"1",
            Self::ResendRequest => b"2",
            Self::Reject => b"3",
            Self::SequenceReset => b"4",
            Self::Logout => b"5",
            Self::Logon => b"A",
            Self::UserRequest => b"BE",
            Self::Business => b"",
        }
    }

    /// Returns true if this is an administrative message.
    ///
    /// Administrative stretches are the unit of gap-fill coalescence during
    /// retransmission. User requests carry application intent and are
    /// replayed verbatim, so they are not administrative.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        !matches!(self, Self::Business | Self::UserRequest)
    }
}

/// Session-level header of a decoded message.
///
/// These are the only fields the engine validates; the decoder surfaces them
/// eagerly so the hot path never re-scans the field list.
#[derive(Debug, Clone)]
pub struct SessionHeader<'a> {
    /// Classified message type.
    pub msg_type: FixMsgType,
    /// Raw MsgType bytes (distinguishes business types).
    pub msg_type_bytes: &'a [u8],
    /// MsgSeqNum (34).
    pub msg_seq_num: SequenceNumber,
    /// SenderCompID (49).
    pub sender_comp_id: &'a [u8],
    /// TargetCompID (56).
    pub target_comp_id: &'a [u8],
    /// Parsed SendingTime (52).
    pub sending_time: Timestamp,
    /// PossDupFlag (43), false when absent.
    pub poss_dup: bool,
}

/// Zero-copy view of one framed FIX message.
#[derive(Debug, Clone)]
pub struct FixFrame<'a> {
    /// The complete message buffer, including header and trailer.
    buffer: &'a [u8],
    /// Parsed field references in wire order.
    fields: SmallVec<[FieldRef<'a>; 32]>,
}

impl<'a> FixFrame<'a> {
    /// Returns the complete message bytes.
    #[inline]
    #[must_use]
    pub const fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    /// Returns the message length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if the frame is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns an iterator over all fields in wire order.
    #[inline]
    pub fn fields(&self) -> impl Iterator<Item = &FieldRef<'a>> {
        self.fields.iter()
    }

    /// Gets the first field with the given tag.
    #[must_use]
    pub fn get_field(&self, tag: u32) -> Option<&FieldRef<'a>> {
        self.fields.iter().find(|f| f.tag == tag)
    }

    /// Gets a field value as a string.
    #[must_use]
    pub fn get_field_str(&self, tag: u32) -> Option<&'a str> {
        self.get_field(tag).and_then(|f| f.as_str().ok())
    }

    /// Extracts the session header the engine validates.
    ///
    /// # Errors
    /// Returns `DecodeError::MissingRequiredField` when a mandatory header
    /// field is absent, or `DecodeError::InvalidFieldValue` when a value does
    /// not parse.
    pub fn session_header(&self) -> Result<SessionHeader<'a>, DecodeError> {
        let msg_type_field = self
            .get_field(tags::MSG_TYPE)
            .ok_or(DecodeError::MissingMsgType)?;
        let msg_seq_num = self
            .get_field(tags::MSG_SEQ_NUM)
            .ok_or(DecodeError::MissingRequiredField {
                tag: tags::MSG_SEQ_NUM,
            })?
            .as_u32()?;
        let sender_comp_id = self
            .get_field(tags::SENDER_COMP_ID)
            .ok_or(DecodeError::MissingRequiredField {
                tag: tags::SENDER_COMP_ID,
            })?
            .value;
        let target_comp_id = self
            .get_field(tags::TARGET_COMP_ID)
            .ok_or(DecodeError::MissingRequiredField {
                tag: tags::TARGET_COMP_ID,
            })?
            .value;
        let sending_time_field =
            self.get_field(tags::SENDING_TIME)
                .ok_or(DecodeError::MissingRequiredField {
                    tag: tags::SENDING_TIME,
                })?;
        let sending_time = Timestamp::parse_fix(sending_time_field.as_str()?).ok_or_else(|| {
            DecodeError::InvalidFieldValue {
                tag: tags::SENDING_TIME,
                reason: "not a UTCTimestamp".to_string(),
            }
        })?;
        let poss_dup = match self.get_field(tags::POSS_DUP_FLAG) {
            Some(f) => f.as_bool()?,
            None => false,
        };

        Ok(SessionHeader {
            msg_type: FixMsgType::classify(msg_type_field.value),
            msg_type_bytes: msg_type_field.value,
            msg_seq_num: SequenceNumber::new(msg_seq_num),
            sender_comp_id,
            target_comp_id,
            sending_time,
            poss_dup,
        })
    }
}

/// Zero-copy FIX message decoder.
#[derive(Debug)]
pub struct Decoder<'a> {
    /// Input buffer.
    input: &'a [u8],
    /// Current position in the buffer.
    offset: usize,
    /// Whether to validate checksums.
    validate_checksum: bool,
}

impl<'a> Decoder<'a> {
    /// Creates a new decoder for the given input buffer.
    #[inline]
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            offset: 0,
            validate_checksum: true,
        }
    }

    /// Sets whether to validate checksums during decoding.
    #[inline]
    #[must_use]
    pub const fn with_checksum_validation(mut self, validate: bool) -> Self {
        self.validate_checksum = validate;
        self
    }

    /// Decodes one complete FIX message from the buffer.
    ///
    /// # Errors
    /// Returns `DecodeError` if the message is malformed or incomplete.
    pub fn decode(&mut self) -> Result<FixFrame<'a>, DecodeError> {
        let start_offset = self.offset;

        let begin_string_field = self.next_field().ok_or(DecodeError::Incomplete)?;
        if begin_string_field.tag != tags::BEGIN_STRING {
            return Err(DecodeError::InvalidBeginString);
        }

        let body_length_field = self.next_field().ok_or(DecodeError::MissingBodyLength)?;
        if body_length_field.tag != tags::BODY_LENGTH {
            return Err(DecodeError::MissingBodyLength);
        }
        let _body_length: usize = body_length_field
            .as_str()?
            .parse()
            .map_err(|_| DecodeError::InvalidBodyLength)?;

        let mut fields: SmallVec<[FieldRef<'a>; 32]> = SmallVec::new();
        fields.push(begin_string_field);
        fields.push(body_length_field);

        let mut checksum_field: Option<FieldRef<'a>> = None;
        while let Some(field) = self.next_field() {
            if field.tag == tags::CHECK_SUM {
                checksum_field = Some(field);
                break;
            }
            fields.push(field);
        }

        if self.validate_checksum {
            let checksum_ref = checksum_field.ok_or(DecodeError::Incomplete)?;
            let declared = parse_checksum(checksum_ref.value).ok_or_else(|| {
                DecodeError::InvalidFieldValue {
                    tag: tags::CHECK_SUM,
                    reason: "invalid checksum format".to_string(),
                }
            })?;

            // Everything before the "10=" tag bytes participates.
            let checksum_start =
                checksum_ref.value.as_ptr() as usize - self.input.as_ptr() as usize - 3;
            let calculated = calculate_checksum(&self.input[start_offset..checksum_start]);

            if calculated != declared {
                return Err(DecodeError::ChecksumMismatch {
                    calculated,
                    declared,
                });
            }
        }

        Ok(FixFrame {
            buffer: &self.input[start_offset..self.offset],
            fields,
        })
    }

    /// Parses the next field from the buffer.
    ///
    /// # Returns
    /// The next field, or `None` if the buffer is exhausted.
    #[inline]
    pub fn next_field(&mut self) -> Option<FieldRef<'a>> {
        if self.offset >= self.input.len() {
            return None;
        }

        let remaining = &self.input[self.offset..];

        let eq_pos = memchr(EQUALS, remaining)?;
        let tag = parse_tag(&remaining[..eq_pos])?;

        let value_start = eq_pos + 1;
        let soh_pos = memchr(SOH, &remaining[value_start..])?;
        let value = &remaining[value_start..value_start + soh_pos];

        self.offset += value_start + soh_pos + 1;

        Some(FieldRef::new(tag, value))
    }

    /// Returns the current offset in the buffer.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Returns true if the buffer has been fully consumed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offset >= self.input.len()
    }
}

/// Parses a tag number from ASCII bytes.
#[inline]
fn parse_tag(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() || bytes.len() > 10 {
        return None;
    }

    let mut result: u32 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        result = result.checked_mul(10)?.checked_add((b - b'0') as u32)?;
    }

    Some(result)
}
