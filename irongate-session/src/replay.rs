/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Retransmission planning.
//!
//! Turns the archived messages for a resend range into the outbound frames
//! that answer it: business messages are republished byte-for-byte with
//! `PossDupFlag=Y` and `OrigSendingTime` set to the original send time, while
//! stretches of administrative messages, and messages missing from the
//! archive entirely, coalesce into a single gap-fill `SequenceReset`. The
//! unit of coalescence is a run of contiguous sequence numbers whose message
//! is administrative or absent.

use bytes::{BufMut, Bytes, BytesMut};
use irongate_core::types::{SequenceNumber, Timestamp, TimestampPrecision};
use irongate_tagvalue::checksum::{calculate_checksum, format_checksum};
use irongate_tagvalue::decoder::{Decoder, SOH};
use irongate_tagvalue::encoder::AdminEncoder;
use irongate_tagvalue::field::tags;
use std::collections::HashMap;
use tracing::debug;

/// One archived message handed back by the replay query.
#[derive(Debug, Clone)]
pub struct ReplayedMessage {
    /// The message's sequence number.
    pub seq_num: u32,
    /// True for session-level message types.
    pub is_admin: bool,
    /// The original framed bytes.
    pub bytes: Bytes,
}

/// Plans the frames answering a resend request.
///
/// `end` of `None` means "up to the latest sent". Administrative runs extend
/// past the requested end so the counterparty's expectation lands on the next
/// real message.
#[must_use]
pub fn plan_retransmission(
    admin: &AdminEncoder,
    begin: SequenceNumber,
    end: Option<SequenceNumber>,
    next_sent: SequenceNumber,
    messages: &[ReplayedMessage],
    now: Timestamp,
    precision: TimestampPrecision,
) -> Vec<BytesMut> {
    let last_sent = next_sent.value().saturating_sub(1);
    let effective_end = end.map_or(last_sent, |e| e.value().min(last_sent));

    let by_seq: HashMap<u32, &ReplayedMessage> =
        messages.iter().map(|m| (m.seq_num, m)).collect();

    let mut out = Vec::new();
    let mut gap_run_start: Option<u32> = None;
    let mut seq = begin.value();

    while seq <= last_sent {
        let message = by_seq.get(&seq).copied();

        // Past the requested end, only an adjacent admin run keeps going.
        if seq > effective_end && !message.is_some_and(|m| m.is_admin) {
            break;
        }

        if let Some(original) = message.filter(|m| !m.is_admin) {
            if let Some(run_start) = gap_run_start.take() {
                out.push(admin.sequence_reset(
                    SequenceNumber::new(run_start),
                    now,
                    SequenceNumber::new(seq),
                    true,
                ));
            }
            out.push(mark_poss_dup(&original.bytes, now, precision));
        } else {
            // Admin or missing from the archive: both gap-fill.
            gap_run_start.get_or_insert(seq);
        }

        seq += 1;
    }

    if let Some(run_start) = gap_run_start {
        out.push(admin.sequence_reset(
            SequenceNumber::new(run_start),
            now,
            SequenceNumber::new(seq),
            true,
        ));
    }

    if out.is_empty() {
        // Nothing sent in the range at all; move the counterparty forward.
        out.push(admin.sequence_reset(begin, now, next_sent, true));
    }

    debug!(
        begin = begin.value(),
        effective_end,
        frames = out.len(),
        "retransmission planned"
    );
    out
}

/// Re-frames an archived message as a possible duplicate.
///
/// Sets `PossDupFlag=Y`, preserves the original `SendingTime` as
/// `OrigSendingTime`, stamps a fresh `SendingTime`, and recomputes
/// BodyLength and Checksum. Field order is otherwise preserved.
#[must_use]
pub fn mark_poss_dup(original: &[u8], now: Timestamp, precision: TimestampPrecision) -> BytesMut {
    let mut decoder = Decoder::new(original).with_checksum_validation(false);
    let Ok(frame) = decoder.decode() else {
        // Archived frames were validated on the way in; pass through as-is.
        return BytesMut::from(original);
    };

    let begin_string = frame
        .get_field(tags::BEGIN_STRING)
        .map(|f| f.value)
        .unwrap_or(b"FIX.4.4");
    let orig_sending_time = frame.get_field(tags::SENDING_TIME).map(|f| f.value);
    let has_orig_sending_time = frame.get_field(tags::ORIG_SENDING_TIME).is_some();
    let has_poss_dup = frame.get_field(tags::POSS_DUP_FLAG).is_some();

    let mut body = BytesMut::with_capacity(original.len() + 48);
    let put = |body: &mut BytesMut, tag: u32, value: &[u8]| {
        let mut buf = itoa::Buffer::new();
        body.put_slice(buf.format(tag).as_bytes());
        body.put_u8(b'=');
        body.put_slice(value);
        body.put_u8(SOH);
    };

    for field in frame.fields() {
        match field.tag {
            tags::BEGIN_STRING | tags::BODY_LENGTH | tags::CHECK_SUM => {}
            tags::POSS_DUP_FLAG => put(&mut body, tags::POSS_DUP_FLAG, b"Y"),
            tags::SENDING_TIME => {
                if !has_poss_dup {
                    put(&mut body, tags::POSS_DUP_FLAG, b"Y");
                }
                put(
                    &mut body,
                    tags::SENDING_TIME,
                    now.format_fix(precision).as_bytes(),
                );
                if !has_orig_sending_time
                    && let Some(orig) = orig_sending_time
                {
                    put(&mut body, tags::ORIG_SENDING_TIME, orig);
                }
            }
            other => put(&mut body, other, field.value),
        }
    }

    let mut message = BytesMut::with_capacity(body.len() + 32);
    message.put_slice(b"8=");
    message.put_slice(begin_string);
    message.put_u8(SOH);
    message.put_slice(b"9=");
    let mut buf = itoa::Buffer::new();
    message.put_slice(buf.format(body.len()).as_bytes());
    message.put_u8(SOH);
    message.put_slice(&body);

    let checksum = calculate_checksum(&message);
    message.put_slice(b"10=");
    message.put_slice(&format_checksum(checksum));
    message.put_u8(SOH);

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use irongate_core::types::CompId;
    use irongate_tagvalue::checksum::verify_trailer;

    fn admin_encoder() -> AdminEncoder {
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

    fn admin_msg(seq: u32) -> ReplayedMessage {
        ReplayedMessage {
            seq_num: seq,
            is_admin: true,
            bytes: Bytes::from(format!("8=FIX.4.4\x019=10\x0135=0\x0134={}\x0110=000\x01", seq)),
        }
    }

    fn business_msg(seq: u32) -> ReplayedMessage {
        let body = format!(
            "35=D\x0134={}\x0149=ACC\x0156=INIT\x0152=20260802-09:00:00.000\x0111=C{}\x01",
            seq, seq
        );
        let header = format!("8=FIX.4.4\x019={}\x01", body.len());
        let without = format!("{}{}", header, body);
        let checksum = calculate_checksum(without.as_bytes());
        let framed = format!(
            "{}10={}\x01",
            without,
            std::str::from_utf8(&format_checksum(checksum)).unwrap()
        );
        ReplayedMessage {
            seq_num: seq,
            is_admin: false,
            bytes: Bytes::from(framed),
        }
    }

    fn now() -> Timestamp {
        Timestamp::from_millis(1_700_000_000_000)
    }

    #[test]
    fn test_admin_only_range_coalesces_to_single_gap_fill() {
        // Messages 1..=3 are all administrative; the counterparty asked for
        // 1..=1 and must land on 4.
        let frames = plan_retransmission(
            &admin_encoder(),
            SequenceNumber::new(1),
            Some(SequenceNumber::new(1)),
            SequenceNumber::new(4),
            &[admin_msg(1), admin_msg(2), admin_msg(3)],
            now(),
            TimestampPrecision::Millis,
        );

        assert_eq!(frames.len(), 1);
        assert!(contains(&frames[0], "35=4\x01"));
        assert!(contains(&frames[0], "34=1\x01"));
        assert!(contains(&frames[0], "123=Y\x01"));
        assert!(contains(&frames[0], "43=Y\x01"));
        assert!(contains(&frames[0], "36=4\x01"));
    }

    #[test]
    fn test_mixed_range_interleaves_gap_fills_and_business() {
        // 1 admin, 2 business, 3..4 admin, 5 business.
        let frames = plan_retransmission(
            &admin_encoder(),
            SequenceNumber::new(1),
            None,
            SequenceNumber::new(6),
            &[
                admin_msg(1),
                business_msg(2),
                admin_msg(3),
                admin_msg(4),
                business_msg(5),
            ],
            now(),
            TimestampPrecision::Millis,
        );

        assert_eq!(frames.len(), 4);
        // Gap fill 1 -> 2.
        assert!(contains(&frames[0], "35=4\x01"));
        assert!(contains(&frames[0], "36=2\x01"));
        // Business 2 republished as a duplicate.
        assert!(contains(&frames[1], "11=C2\x01"));
        assert!(contains(&frames[1], "43=Y\x01"));
        // Gap fill 3 -> 5.
        assert!(contains(&frames[2], "34=3\x01"));
        assert!(contains(&frames[2], "36=5\x01"));
        // Business 5.
        assert!(contains(&frames[3], "11=C5\x01"));
    }

    #[test]
    fn test_missing_messages_are_gap_filled() {
        // Message 2 vanished from the archive entirely.
        let frames = plan_retransmission(
            &admin_encoder(),
            SequenceNumber::new(1),
            None,
            SequenceNumber::new(4),
            &[business_msg(1), business_msg(3)],
            now(),
            TimestampPrecision::Millis,
        );

        assert_eq!(frames.len(), 3);
        assert!(contains(&frames[0], "11=C1\x01"));
        assert!(contains(&frames[1], "35=4\x01"));
        assert!(contains(&frames[1], "34=2\x01"));
        assert!(contains(&frames[1], "36=3\x01"));
        assert!(contains(&frames[2], "11=C3\x01"));
    }

    #[test]
    fn test_empty_range_moves_counterparty_forward() {
        let frames = plan_retransmission(
            &admin_encoder(),
            SequenceNumber::new(5),
            None,
            SequenceNumber::new(5),
            &[],
            now(),
            TimestampPrecision::Millis,
        );
        assert_eq!(frames.len(), 1);
        assert!(contains(&frames[0], "34=5\x01"));
        assert!(contains(&frames[0], "36=5\x01"));
    }

    #[test]
    fn test_mark_poss_dup_rewrites_header() {
        let original = business_msg(7);
        let replayed = mark_poss_dup(&original.bytes, now(), TimestampPrecision::Millis);

        assert!(contains(&replayed, "43=Y\x01"));
        assert!(contains(&replayed, "122=20260802-09:00:00.000\x01"));
        assert!(!contains(&replayed, "52=20260802-09:00:00.000\x01"));
        assert!(contains(&replayed, "11=C7\x01"));

        // BodyLength and Checksum were recomputed.
        let (calculated, declared) = verify_trailer(&replayed).unwrap();
        assert_eq!(calculated, declared);
    }

    #[test]
    fn test_mark_poss_dup_idempotent_on_existing_flags() {
        let original = business_msg(7);
        let once = mark_poss_dup(&original.bytes, now(), TimestampPrecision::Millis);
        let twice = mark_poss_dup(&once, now(), TimestampPrecision::Millis);

        // No duplicated 43 or 122 fields.
        let count = |haystack: &[u8], needle: &str| {
            haystack
                .windows(needle.len())
                .filter(|w| *w == needle.as_bytes())
                .count()
        };
        assert_eq!(count(&twice, "43=Y"), 1);
        assert_eq!(count(&twice, "122="), 1);
    }
}
