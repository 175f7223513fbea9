/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Session-level binary message templates.
//!
//! Each message is a fixed little-endian layout identified by a leading
//! template id. Business templates outside the session range are carried
//! opaquely; the acceptor never inspects their payloads.

use crate::error::FixpError;
use crate::sofh::FrameHeader;
use bytes::{BufMut, Bytes, BytesMut};

/// First template id of the session-level range.
pub const TEMPLATE_NEGOTIATE: u16 = 500;
/// NegotiateResponse template id.
pub const TEMPLATE_NEGOTIATE_RESPONSE: u16 = 501;
/// NegotiateReject template id.
pub const TEMPLATE_NEGOTIATE_REJECT: u16 = 502;
/// Establish template id.
pub const TEMPLATE_ESTABLISH: u16 = 503;
/// EstablishAck template id.
pub const TEMPLATE_ESTABLISH_ACK: u16 = 504;
/// EstablishReject template id.
pub const TEMPLATE_ESTABLISH_REJECT: u16 = 505;
/// Sequence template id.
pub const TEMPLATE_SEQUENCE: u16 = 506;
/// NotApplied template id.
pub const TEMPLATE_NOT_APPLIED: u16 = 507;
/// RetransmitRequest template id.
pub const TEMPLATE_RETRANSMIT_REQUEST: u16 = 508;
/// Retransmission template id.
pub const TEMPLATE_RETRANSMISSION: u16 = 509;
/// RetransmitReject template id.
pub const TEMPLATE_RETRANSMIT_REJECT: u16 = 510;
/// FinishedSending template id.
pub const TEMPLATE_FINISHED_SENDING: u16 = 511;
/// FinishedReceiving template id.
pub const TEMPLATE_FINISHED_RECEIVING: u16 = 512;
/// Terminate template id.
pub const TEMPLATE_TERMINATE: u16 = 513;

/// Reason carried by a NegotiateReject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NegotiationRejectCode {
    /// Unclassified rejection.
    Unspecified = 0,
    /// Authentication strategy rejected the counterparty.
    Credentials = 1,
    /// Session version already used, equal or lesser than current.
    DuplicateId = 2,
}

impl TryFrom<u8> for NegotiationRejectCode {
    type Error = FixpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unspecified),
            1 => Ok(Self::Credentials),
            2 => Ok(Self::DuplicateId),
            _ => Err(FixpError::InvalidEnumValue {
                field: "negotiation_reject_code",
                value,
            }),
        }
    }
}

/// Reason carried by an EstablishReject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EstablishmentRejectCode {
    /// Unclassified rejection.
    Unspecified = 0,
    /// No prior negotiation for this session version.
    Unnegotiated = 1,
    /// The session is already established. Non-disconnecting.
    AlreadyEstablished = 2,
    /// Keep-alive interval outside the accepted bounds.
    KeepaliveInterval = 3,
    /// Authentication strategy rejected the counterparty.
    Credentials = 4,
}

impl TryFrom<u8> for EstablishmentRejectCode {
    type Error = FixpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unspecified),
            1 => Ok(Self::Unnegotiated),
            2 => Ok(Self::AlreadyEstablished),
            3 => Ok(Self::KeepaliveInterval),
            4 => Ok(Self::Credentials),
            _ => Err(FixpError::InvalidEnumValue {
                field: "establishment_reject_code",
                value,
            }),
        }
    }
}

/// Reason carried by a RetransmitReject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RetransmitRejectCode {
    /// Requested range extends past the last sent sequence number.
    OutOfRange = 0,
    /// Requested session does not match the connection.
    InvalidSession = 1,
    /// Too many retransmit requests in flight.
    RequestLimitExceeded = 2,
}

impl TryFrom<u8> for RetransmitRejectCode {
    type Error = FixpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::OutOfRange),
            1 => Ok(Self::InvalidSession),
            2 => Ok(Self::RequestLimitExceeded),
            _ => Err(FixpError::InvalidEnumValue {
                field: "retransmit_reject_code",
                value,
            }),
        }
    }
}

/// Reason carried by a Terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TerminationCode {
    /// Orderly termination after finalisation.
    Finished = 0,
    /// Unclassified termination, including protocol violations.
    Unspecified = 1,
}

impl TryFrom<u8> for TerminationCode {
    type Error = FixpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Finished),
            1 => Ok(Self::Unspecified),
            _ => Err(FixpError::InvalidEnumValue {
                field: "termination_code",
                value,
            }),
        }
    }
}

/// One decoded binary message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixpMessage {
    /// First message of a new session version.
    Negotiate {
        /// Counterparty-assigned session id.
        session_id: u64,
        /// Session version, must strictly supersede any previous version.
        session_ver_id: u64,
        /// Client clock at send time, nanoseconds since epoch.
        timestamp: u64,
        /// Opaque credential bytes for the authentication strategy.
        credentials: Bytes,
    },
    /// Acceptance of a negotiate.
    NegotiateResponse {
        /// Echoed session id.
        session_id: u64,
        /// Echoed session version.
        session_ver_id: u64,
    },
    /// Rejection of a negotiate.
    NegotiateReject {
        /// Echoed session id.
        session_id: u64,
        /// Echoed session version.
        session_ver_id: u64,
        /// Rejection reason.
        code: NegotiationRejectCode,
    },
    /// Binding request for a negotiated session version.
    Establish {
        /// Session id.
        session_id: u64,
        /// Session version being bound.
        session_ver_id: u64,
        /// Client clock at send time, nanoseconds since epoch.
        timestamp: u64,
        /// Keep-alive interval in milliseconds.
        keep_alive_interval_ms: u32,
        /// Client's next outbound sequence number.
        next_seq_no: u32,
    },
    /// Acceptance of an establish.
    EstablishAck {
        /// Echoed session id.
        session_id: u64,
        /// Echoed session version.
        session_ver_id: u64,
        /// Granted keep-alive interval in milliseconds.
        keep_alive_interval_ms: u32,
        /// Acceptor's next expected inbound sequence number.
        next_recv_seq: u32,
        /// Acceptor's next outbound sequence number.
        next_sent_seq: u32,
    },
    /// Rejection of an establish.
    EstablishReject {
        /// Echoed session id.
        session_id: u64,
        /// Rejection reason.
        code: EstablishmentRejectCode,
    },
    /// Sequence heartbeat announcing the sender's next sequence number.
    Sequence {
        /// Sender's next outbound sequence number.
        next_seq_no: u32,
    },
    /// Gap signal: `count` messages starting at `from_seq_no` were not applied.
    NotApplied {
        /// First missing sequence number.
        from_seq_no: u32,
        /// Number of missing messages.
        count: u32,
    },
    /// Request to retransmit a range of previously sent messages.
    RetransmitRequest {
        /// Session id the range belongs to.
        session_id: u64,
        /// Request clock, echoed in the response.
        timestamp: u64,
        /// First requested sequence number.
        from_seq_no: u32,
        /// Number of requested messages.
        count: u32,
    },
    /// Header preceding a burst of retransmitted messages.
    Retransmission {
        /// Echoed session id.
        session_id: u64,
        /// Echoed request clock.
        request_timestamp: u64,
        /// First retransmitted sequence number.
        from_seq_no: u32,
        /// Number of retransmitted messages.
        count: u32,
    },
    /// Rejection of a retransmit request.
    RetransmitReject {
        /// Echoed session id.
        session_id: u64,
        /// Echoed request clock.
        request_timestamp: u64,
        /// Rejection reason.
        code: RetransmitRejectCode,
    },
    /// Announcement that the sender will send no further business messages.
    FinishedSending {
        /// Session id.
        session_id: u64,
        /// Session version being finalised.
        session_ver_id: u64,
        /// Sender's last used sequence number.
        last_seq_no: u32,
    },
    /// Acknowledgement of a FinishedSending.
    FinishedReceiving {
        /// Session id.
        session_id: u64,
        /// Session version being finalised.
        session_ver_id: u64,
    },
    /// Session teardown.
    Terminate {
        /// Session id.
        session_id: u64,
        /// Session version.
        session_ver_id: u64,
        /// Termination reason.
        code: TerminationCode,
    },
    /// Application-defined template, carried opaquely.
    Business {
        /// Template id outside the session range.
        template_id: u16,
        /// Raw payload after the template id.
        payload: Bytes,
    },
}

impl FixpMessage {
    /// Encodes this message as a complete frame including the SOFH.
    #[must_use]
    pub fn encode(&self) -> BytesMut {
        let mut payload = BytesMut::with_capacity(40);
        self.encode_payload(&mut payload);

        let mut frame = BytesMut::with_capacity(payload.len() + crate::sofh::SOFH_LEN);
        FrameHeader::for_payload(payload.len()).encode(&mut frame);
        frame.put_slice(&payload);
        frame
    }

    fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Self::Negotiate {
                session_id,
                session_ver_id,
                timestamp,
                credentials,
            } => {
                buf.put_u16_le(TEMPLATE_NEGOTIATE);
                buf.put_u64_le(*session_id);
                buf.put_u64_le(*session_ver_id);
                buf.put_u64_le(*timestamp);
                buf.put_u16_le(credentials.len() as u16);
                buf.put_slice(credentials);
            }
            Self::NegotiateResponse {
                session_id,
                session_ver_id,
            } => {
                buf.put_u16_le(TEMPLATE_NEGOTIATE_RESPONSE);
                buf.put_u64_le(*session_id);
                buf.put_u64_le(*session_ver_id);
            }
            Self::NegotiateReject {
                session_id,
                session_ver_id,
                code,
            } => {
                buf.put_u16_le(TEMPLATE_NEGOTIATE_REJECT);
                buf.put_u64_le(*session_id);
                buf.put_u64_le(*session_ver_id);
                buf.put_u8(*code as u8);
            }
            Self::Establish {
                session_id,
                session_ver_id,
                timestamp,
                keep_alive_interval_ms,
                next_seq_no,
            } => {
                buf.put_u16_le(TEMPLATE_ESTABLISH);
                buf.put_u64_le(*session_id);
                buf.put_u64_le(*session_ver_id);
                buf.put_u64_le(*timestamp);
                buf.put_u32_le(*keep_alive_interval_ms);
                buf.put_u32_le(*next_seq_no);
            }
            Self::EstablishAck {
                session_id,
                session_ver_id,
                keep_alive_interval_ms,
                next_recv_seq,
                next_sent_seq,
            } => {
                buf.put_u16_le(TEMPLATE_ESTABLISH_ACK);
                buf.put_u64_le(*session_id);
                buf.put_u64_le(*session_ver_id);
                buf.put_u32_le(*keep_alive_interval_ms);
                buf.put_u32_le(*next_recv_seq);
                buf.put_u32_le(*next_sent_seq);
            }
            Self::EstablishReject { session_id, code } => {
                buf.put_u16_le(TEMPLATE_ESTABLISH_REJECT);
                buf.put_u64_le(*session_id);
                buf.put_u8(*code as u8);
            }
            Self::Sequence { next_seq_no } => {
                buf.put_u16_le(TEMPLATE_SEQUENCE);
                buf.put_u32_le(*next_seq_no);
            }
            Self::NotApplied { from_seq_no, count } => {
                buf.put_u16_le(TEMPLATE_NOT_APPLIED);
                buf.put_u32_le(*from_seq_no);
                buf.put_u32_le(*count);
            }
            Self::RetransmitRequest {
                session_id,
                timestamp,
                from_seq_no,
                count,
            } => {
                buf.put_u16_le(TEMPLATE_RETRANSMIT_REQUEST);
                buf.put_u64_le(*session_id);
                buf.put_u64_le(*timestamp);
                buf.put_u32_le(*from_seq_no);
                buf.put_u32_le(*count);
            }
            Self::Retransmission {
                session_id,
                request_timestamp,
                from_seq_no,
                count,
            } => {
                buf.put_u16_le(TEMPLATE_RETRANSMISSION);
                buf.put_u64_le(*session_id);
                buf.put_u64_le(*request_timestamp);
                buf.put_u32_le(*from_seq_no);
                buf.put_u32_le(*count);
            }
            Self::RetransmitReject {
                session_id,
                request_timestamp,
                code,
            } => {
                buf.put_u16_le(TEMPLATE_RETRANSMIT_REJECT);
                buf.put_u64_le(*session_id);
                buf.put_u64_le(*request_timestamp);
                buf.put_u8(*code as u8);
            }
            Self::FinishedSending {
                session_id,
                session_ver_id,
                last_seq_no,
            } => {
                buf.put_u16_le(TEMPLATE_FINISHED_SENDING);
                buf.put_u64_le(*session_id);
                buf.put_u64_le(*session_ver_id);
                buf.put_u32_le(*last_seq_no);
            }
            Self::FinishedReceiving {
                session_id,
                session_ver_id,
            } => {
                buf.put_u16_le(TEMPLATE_FINISHED_RECEIVING);
                buf.put_u64_le(*session_id);
                buf.put_u64_le(*session_ver_id);
            }
            Self::Terminate {
                session_id,
                session_ver_id,
                code,
            } => {
                buf.put_u16_le(TEMPLATE_TERMINATE);
                buf.put_u64_le(*session_id);
                buf.put_u64_le(*session_ver_id);
                buf.put_u8(*code as u8);
            }
            Self::Business {
                template_id,
                payload,
            } => {
                buf.put_u16_le(*template_id);
                buf.put_slice(payload);
            }
        }
    }

    /// Decodes one message from a frame payload (the bytes after the SOFH).
    ///
    /// # Errors
    /// Returns `FixpError` when the payload is truncated or carries an
    /// invalid enumeration value.
    pub fn decode(payload: &[u8]) -> Result<Self, FixpError> {
        let mut cursor = Cursor::new(payload);
        let template_id = cursor.u16()?;

        let msg = match template_id {
            TEMPLATE_NEGOTIATE => {
                let session_id = cursor.u64()?;
                let session_ver_id = cursor.u64()?;
                let timestamp = cursor.u64()?;
                let credentials_len = cursor.u16()? as usize;
                let credentials = Bytes::copy_from_slice(cursor.bytes(credentials_len)?);
                Self::Negotiate {
                    session_id,
                    session_ver_id,
                    timestamp,
                    credentials,
                }
            }
            TEMPLATE_NEGOTIATE_RESPONSE => Self::NegotiateResponse {
                session_id: cursor.u64()?,
                session_ver_id: cursor.u64()?,
            },
            TEMPLATE_NEGOTIATE_REJECT => Self::NegotiateReject {
                session_id: cursor.u64()?,
                session_ver_id: cursor.u64()?,
                code: NegotiationRejectCode::try_from(cursor.u8()?)?,
            },
            TEMPLATE_ESTABLISH => Self::Establish {
                session_id: cursor.u64()?,
                session_ver_id: cursor.u64()?,
                timestamp: cursor.u64()?,
                keep_alive_interval_ms: cursor.u32()?,
                next_seq_no: cursor.u32()?,
            },
            TEMPLATE_ESTABLISH_ACK => Self::EstablishAck {
                session_id: cursor.u64()?,
                session_ver_id: cursor.u64()?,
                keep_alive_interval_ms: cursor.u32()?,
                next_recv_seq: cursor.u32()?,
                next_sent_seq: cursor.u32()?,
            },
            TEMPLATE_ESTABLISH_REJECT => Self::EstablishReject {
                session_id: cursor.u64()?,
                code: EstablishmentRejectCode::try_from(cursor.u8()?)?,
            },
            TEMPLATE_SEQUENCE => Self::Sequence {
                next_seq_no: cursor.u32()?,
            },
            TEMPLATE_NOT_APPLIED => Self::NotApplied {
                from_seq_no: cursor.u32()?,
                count: cursor.u32()?,
            },
            TEMPLATE_RETRANSMIT_REQUEST => Self::RetransmitRequest {
                session_id: cursor.u64()?,
                timestamp: cursor.u64()?,
                from_seq_no: cursor.u32()?,
                count: cursor.u32()?,
            },
            TEMPLATE_RETRANSMISSION => Self::Retransmission {
                session_id: cursor.u64()?,
                request_timestamp: cursor.u64()?,
                from_seq_no: cursor.u32()?,
                count: cursor.u32()?,
            },
            TEMPLATE_RETRANSMIT_REJECT => Self::RetransmitReject {
                session_id: cursor.u64()?,
                request_timestamp: cursor.u64()?,
                code: RetransmitRejectCode::try_from(cursor.u8()?)?,
            },
            TEMPLATE_FINISHED_SENDING => Self::FinishedSending {
                session_id: cursor.u64()?,
                session_ver_id: cursor.u64()?,
                last_seq_no: cursor.u32()?,
            },
            TEMPLATE_FINISHED_RECEIVING => Self::FinishedReceiving {
                session_id: cursor.u64()?,
                session_ver_id: cursor.u64()?,
            },
            TEMPLATE_TERMINATE => Self::Terminate {
                session_id: cursor.u64()?,
                session_ver_id: cursor.u64()?,
                code: TerminationCode::try_from(cursor.u8()?)?,
            },
            other => Self::Business {
                template_id: other,
                payload: Bytes::copy_from_slice(cursor.rest()),
            },
        };

        Ok(msg)
    }
}

/// Little-endian read cursor over a frame payload.
struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], FixpError> {
        if self.data.len() - self.offset < len {
            return Err(FixpError::UnexpectedEof {
                needed: len,
                available: self.data.len() - self.offset,
            });
        }
        let out = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(out)
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.offset..];
        self.offset = self.data.len();
        out
    }

    fn u8(&mut self) -> Result<u8, FixpError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, FixpError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, FixpError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, FixpError> {
        let b = self.bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sofh::SOFH_LEN;

    fn roundtrip(msg: FixpMessage) {
        let frame = msg.encode();
        let header = FrameHeader::decode(&frame).unwrap();
        assert_eq!(header.message_length as usize, frame.len());
        let decoded = FixpMessage::decode(&frame[SOFH_LEN..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_negotiate_roundtrip() {
        roundtrip(FixpMessage::Negotiate {
            session_id: 1,
            session_ver_id: 1,
            timestamp: 1_700_000_000_000_000_000,
            credentials: Bytes::from_static(b"firm-a"),
        });
    }

    #[test]
    fn test_establish_ack_roundtrip() {
        roundtrip(FixpMessage::EstablishAck {
            session_id: 1,
            session_ver_id: 2,
            keep_alive_interval_ms: 10_000,
            next_recv_seq: 1,
            next_sent_seq: 1,
        });
    }

    #[test]
    fn test_retransmit_reject_roundtrip() {
        roundtrip(FixpMessage::RetransmitReject {
            session_id: 9,
            request_timestamp: 42,
            code: RetransmitRejectCode::OutOfRange,
        });
    }

    #[test]
    fn test_finalisation_roundtrip() {
        roundtrip(FixpMessage::FinishedSending {
            session_id: 1,
            session_ver_id: 1,
            last_seq_no: 17,
        });
        roundtrip(FixpMessage::FinishedReceiving {
            session_id: 1,
            session_ver_id: 1,
        });
        roundtrip(FixpMessage::Terminate {
            session_id: 1,
            session_ver_id: 1,
            code: TerminationCode::Finished,
        });
    }

    #[test]
    fn test_business_passthrough() {
        roundtrip(FixpMessage::Business {
            template_id: 77,
            payload: Bytes::from_static(&[1, 2, 3, 4, 5]),
        });
    }

    #[test]
    fn test_truncated_payload() {
        let frame = FixpMessage::Sequence { next_seq_no: 10 }.encode();
        let truncated = &frame[SOFH_LEN..frame.len() - 2];
        assert!(matches!(
            FixpMessage::decode(truncated),
            Err(FixpError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_invalid_enum_value() {
        let mut payload = BytesMut::new();
        payload.put_u16_le(TEMPLATE_TERMINATE);
        payload.put_u64_le(1);
        payload.put_u64_le(1);
        payload.put_u8(99);
        assert!(matches!(
            FixpMessage::decode(&payload),
            Err(FixpError::InvalidEnumValue { .. })
        ));
    }
}
