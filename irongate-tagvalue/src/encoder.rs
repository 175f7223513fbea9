/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! FIX message encoder and administrative message builders.
//!
//! [`Encoder`] assembles a single message in tag=value format, handling
//! BeginString, BodyLength, and Checksum automatically. [`AdminEncoder`]
//! wraps it with one builder per administrative message the session engine
//! emits, stamping the standard header (comp ids, sequence number, sending
//! time at the configured precision) on every message.

use crate::checksum::{calculate_checksum, format_checksum};
use crate::decoder::SOH;
use crate::field::tags;
use bytes::{BufMut, BytesMut};
use irongate_core::types::{CompId, SequenceNumber, Timestamp, TimestampPrecision};

/// FIX message encoder.
///
/// Appends fields in tag=value format; [`Encoder::finish`] wraps the body
/// with the header and trailer.
#[derive(Debug)]
pub struct Encoder {
    /// Buffer for the message body (between BodyLength and Checksum).
    body: BytesMut,
    /// The BeginString value (e.g., "FIX.4.4").
    begin_string: &'static str,
}

impl Encoder {
    /// Creates a new encoder with the specified BeginString.
    #[must_use]
    pub fn new(begin_string: &'static str) -> Self {
        Self {
            body: BytesMut::with_capacity(256),
            begin_string,
        }
    }

    /// Appends a field with a string value.
    #[inline]
    pub fn put_str(&mut self, tag: u32, value: &str) {
        self.put_raw(tag, value.as_bytes());
    }

    /// Appends a field with an unsigned integer value.
    #[inline]
    pub fn put_uint(&mut self, tag: u32, value: u64) {
        let mut buf = itoa::Buffer::new();
        let s = buf.format(value);
        self.put_raw(tag, s.as_bytes());
    }

    /// Appends a field with a boolean value (Y/N).
    #[inline]
    pub fn put_bool(&mut self, tag: u32, value: bool) {
        self.put_raw(tag, if value { b"Y" } else { b"N" });
    }

    /// Appends a field with raw bytes.
    #[inline]
    pub fn put_raw(&mut self, tag: u32, value: &[u8]) {
        let mut tag_buf = itoa::Buffer::new();
        let tag_str = tag_buf.format(tag);

        self.body.put_slice(tag_str.as_bytes());
        self.body.put_u8(b'=');
        self.body.put_slice(value);
        self.body.put_u8(SOH);
    }

    /// Finalizes the message: prepends BeginString and BodyLength, appends
    /// Checksum, and returns the complete encoded bytes.
    #[must_use]
    pub fn finish(self) -> BytesMut {
        let body_len = self.body.len();

        let mut header = BytesMut::with_capacity(32);
        header.put_slice(b"8=");
        header.put_slice(self.begin_string.as_bytes());
        header.put_u8(SOH);
        header.put_slice(b"9=");

        let mut len_buf = itoa::Buffer::new();
        header.put_slice(len_buf.format(body_len).as_bytes());
        header.put_u8(SOH);

        let mut message = BytesMut::with_capacity(header.len() + body_len + 8);
        message.put_slice(&header);
        message.put_slice(&self.body);

        let checksum = calculate_checksum(&message);
        message.put_slice(b"10=");
        message.put_slice(&format_checksum(checksum));
        message.put_u8(SOH);

        message
    }

    /// Returns the current body length.
    #[inline]
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

/// Builder for the administrative messages the session engine sends.
///
/// Holds the session's identity and encoding settings so each builder call
/// only supplies the message-specific fields. The caller allocates the
/// sequence number; the builder never mutates session state.
#[derive(Debug, Clone)]
pub struct AdminEncoder {
    /// BeginString for the session's FIX version.
    begin_string: &'static str,
    /// Our comp id (tag 49 outbound).
    sender_comp_id: CompId,
    /// Counterparty comp id (tag 56 outbound).
    target_comp_id: CompId,
    /// SendingTime precision.
    precision: TimestampPrecision,
}

impl AdminEncoder {
    /// Creates a builder for one session.
    #[must_use]
    pub fn new(
        begin_string: &'static str,
        sender_comp_id: CompId,
        target_comp_id: CompId,
        precision: TimestampPrecision,
    ) -> Self {
        Self {
            begin_string,
            sender_comp_id,
            target_comp_id,
            precision,
        }
    }

    fn start(&self, msg_type: &str, seq_num: SequenceNumber, time: Timestamp) -> Encoder {
        let mut enc = Encoder::new(self.begin_string);
        enc.put_str(tags::MSG_TYPE, msg_type);
        enc.put_uint(tags::MSG_SEQ_NUM, u64::from(seq_num.value()));
        enc.put_str(tags::SENDER_COMP_ID, self.sender_comp_id.as_str());
        enc.put_str(tags::TARGET_COMP_ID, self.target_comp_id.as_str());
        enc.put_str(tags::SENDING_TIME, &time.format_fix(self.precision));
        enc
    }

    /// Encodes a Logon (A).
    #[must_use]
    pub fn logon(
        &self,
        seq_num: SequenceNumber,
        time: Timestamp,
        heartbeat_interval_secs: u64,
        reset_seq_num: bool,
    ) -> BytesMut {
        let mut enc = self.start("A", seq_num, time);
        enc.put_uint(tags::ENCRYPT_METHOD, 0);
        enc.put_uint(tags::HEART_BT_INT, heartbeat_interval_secs);
        if reset_seq_num {
            enc.put_bool(tags::RESET_SEQ_NUM_FLAG, true);
        }
        enc.finish()
    }

    /// Encodes a Heartbeat (0), echoing a TestReqID when answering a test request.
    #[must_use]
    pub fn heartbeat(
        &self,
        seq_num: SequenceNumber,
        time: Timestamp,
        test_req_id: Option<&str>,
    ) -> BytesMut {
        let mut enc = self.start("0", seq_num, time);
        if let Some(id) = test_req_id {
            enc.put_str(tags::TEST_REQ_ID, id);
        }
        enc.finish()
    }

    /// Encodes a Test Request (1).
    #[must_use]
    pub fn test_request(
        &self,
        seq_num: SequenceNumber,
        time: Timestamp,
        test_req_id: &str,
    ) -> BytesMut {
        let mut enc = self.start("1", seq_num, time);
        enc.put_str(tags::TEST_REQ_ID, test_req_id);
        enc.finish()
    }

    /// Encodes a Resend Request (2). `end_seq_no` 0 means "up to latest".
    #[must_use]
    pub fn resend_request(
        &self,
        seq_num: SequenceNumber,
        time: Timestamp,
        begin_seq_no: SequenceNumber,
        end_seq_no: u32,
    ) -> BytesMut {
        let mut enc = self.start("2", seq_num, time);
        enc.put_uint(tags::BEGIN_SEQ_NO, u64::from(begin_seq_no.value()));
        enc.put_uint(tags::END_SEQ_NO, u64::from(end_seq_no));
        enc.finish()
    }

    /// Encodes a Sequence Reset (4).
    ///
    /// Gap fills carry `123=Y` and `43=Y`; a hard reset omits the gap-fill
    /// flag and unconditionally moves the counterparty's expectation.
    #[must_use]
    pub fn sequence_reset(
        &self,
        seq_num: SequenceNumber,
        time: Timestamp,
        new_seq_no: SequenceNumber,
        gap_fill: bool,
    ) -> BytesMut {
        let mut enc = Encoder::new(self.begin_string);
        enc.put_str(tags::MSG_TYPE, "4");
        enc.put_uint(tags::MSG_SEQ_NUM, u64::from(seq_num.value()));
        enc.put_str(tags::SENDER_COMP_ID, self.sender_comp_id.as_str());
        enc.put_str(tags::TARGET_COMP_ID, self.target_comp_id.as_str());
        if gap_fill {
            enc.put_bool(tags::POSS_DUP_FLAG, true);
        }
        enc.put_str(tags::SENDING_TIME, &time.format_fix(self.precision));
        if gap_fill {
            enc.put_bool(tags::GAP_FILL_FLAG, true);
        }
        enc.put_uint(tags::NEW_SEQ_NO, u64::from(new_seq_no.value()));
        enc.finish()
    }

    /// Encodes a Logout (5) with optional explanatory text.
    #[must_use]
    pub fn logout(
        &self,
        seq_num: SequenceNumber,
        time: Timestamp,
        text: Option<&str>,
    ) -> BytesMut {
        let mut enc = self.start("5", seq_num, time);
        if let Some(text) = text {
            enc.put_str(tags::TEXT, text);
        }
        enc.finish()
    }

    /// Encodes a session-level Reject (3).
    #[must_use]
    pub fn reject(
        &self,
        seq_num: SequenceNumber,
        time: Timestamp,
        ref_seq_num: SequenceNumber,
        reason: u32,
        text: &str,
    ) -> BytesMut {
        let mut enc = self.start("3", seq_num, time);
        enc.put_uint(tags::REF_SEQ_NUM, u64::from(ref_seq_num.value()));
        enc.put_uint(tags::SESSION_REJECT_REASON, u64::from(reason));
        enc.put_str(tags::TEXT, text);
        enc.finish()
    }
}

/// Blanks credential bytes in a framed message before archival.
///
/// Overwrites the values of RawData (96) and Password (554) with `*` in
/// place, preserving the frame length so stream positions remain valid.
/// The stored checksum is left stale on purpose: administrative messages are
/// never replayed verbatim, only gap-filled.
pub fn wipe_credentials(message: &mut [u8]) {
    let mut offset = 0;
    while offset < message.len() {
        let Some(eq_rel) = memchr::memchr(b'=', &message[offset..]) else {
            return;
        };
        let tag_end = offset + eq_rel;
        let Some(soh_rel) = memchr::memchr(SOH, &message[tag_end + 1..]) else {
            return;
        };
        let value_start = tag_end + 1;
        let value_end = value_start + soh_rel;

        let tag = &message[offset..tag_end];
        if tag == b"96" || tag == b"554" {
            for b in &mut message[value_start..value_end] {
                *b = b'*';
            }
        }
        offset = value_end + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> AdminEncoder {
        AdminEncoder::new(
            "FIX.4.4",
            CompId::new("ACC").unwrap(),
            CompId::new("INIT").unwrap(),
            TimestampPrecision::Millis,
        )
    }

    fn contains(haystack: &[u8], needle: &str) -> bool {
        haystack
            .windows(needle.len())
            .any(|w| w == needle.as_bytes())
    }

    #[test]
    fn test_encoder_basic() {
        let mut encoder = Encoder::new("FIX.4.4");
        encoder.put_str(tags::MSG_TYPE, "0");

        let message = encoder.finish();
        assert!(message.starts_with(b"8=FIX.4.4\x01"));
        assert!(contains(&message, "35=0\x01"));
        assert!(contains(&message, "10="));
    }

    #[test]
    fn test_logon_fields() {
        let msg = admin().logon(SequenceNumber::new(1), Timestamp::from_millis(0), 30, false);
        assert!(contains(&msg, "35=A\x01"));
        assert!(contains(&msg, "34=1\x01"));
        assert!(contains(&msg, "49=ACC\x01"));
        assert!(contains(&msg, "56=INIT\x01"));
        assert!(contains(&msg, "108=30\x01"));
        assert!(!contains(&msg, "141="));
    }

    #[test]
    fn test_heartbeat_echoes_test_req_id() {
        let msg = admin().heartbeat(
            SequenceNumber::new(2),
            Timestamp::from_millis(0),
            Some("TR1"),
        );
        assert!(contains(&msg, "35=0\x01"));
        assert!(contains(&msg, "112=TR1\x01"));
    }

    #[test]
    fn test_gap_fill_sequence_reset() {
        let msg = admin().sequence_reset(
            SequenceNumber::new(1),
            Timestamp::from_millis(0),
            SequenceNumber::new(4),
            true,
        );
        assert!(contains(&msg, "35=4\x01"));
        assert!(contains(&msg, "123=Y\x01"));
        assert!(contains(&msg, "43=Y\x01"));
        assert!(contains(&msg, "36=4\x01"));
    }

    #[test]
    fn test_hard_sequence_reset_has_no_gap_fill_flag() {
        let msg = admin().sequence_reset(
            SequenceNumber::new(1),
            Timestamp::from_millis(0),
            SequenceNumber::new(1),
            false,
        );
        assert!(!contains(&msg, "123="));
        assert!(!contains(&msg, "43="));
    }

    #[test]
    fn test_resend_request_range() {
        let msg = admin().resend_request(
            SequenceNumber::new(2),
            Timestamp::from_millis(0),
            SequenceNumber::new(1),
            0,
        );
        assert!(contains(&msg, "7=1\x01"));
        assert!(contains(&msg, "16=0\x01"));
    }

    #[test]
    fn test_encoded_message_checksum_verifies() {
        let msg = admin().logout(SequenceNumber::new(3), Timestamp::from_millis(0), None);
        let (calculated, declared) = crate::checksum::verify_trailer(&msg).unwrap();
        assert_eq!(calculated, declared);
    }

    #[test]
    fn test_wipe_credentials() {
        let mut msg =
            b"8=FIX.4.4\x019=30\x0135=A\x0134=1\x01553=user\x01554=secret\x0110=123\x01".to_vec();
        let original_len = msg.len();
        wipe_credentials(&mut msg);
        let s = String::from_utf8(msg).unwrap();
        assert!(s.contains("554=******\x01"));
        assert!(s.contains("553=user\x01"));
        assert_eq!(s.len(), original_len);
    }

    #[test]
    fn test_wipe_credentials_raw_data() {
        let mut msg = b"96=pw\x0195=2\x01".to_vec();
        wipe_credentials(&mut msg);
        assert_eq!(&msg, b"96=**\x0195=2\x01");
    }
}
