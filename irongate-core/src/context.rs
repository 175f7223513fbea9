/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Session identity and per-session context.
//!
//! A [`SessionKey`] is the protocol-specific identification tuple presented at
//! logon or negotiate time. The gateway sessions registry maps each key to a
//! [`SessionContext`] holding the stable [`SessionId`] and the sequence-space
//! revision state that survives disconnects and process restarts.

use crate::types::{CompId, SequenceIndex, SequenceNumber, SessionId, SessionVerId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// FIX session identification tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixSessionKey {
    /// SenderCompID as seen from the counterparty (tag 49 of inbound messages).
    pub sender_comp_id: CompId,
    /// TargetCompID as seen from the counterparty (tag 56 of inbound messages).
    pub target_comp_id: CompId,
    /// Optional session qualifier distinguishing parallel sessions
    /// between the same pair of comp ids.
    pub qualifier: Option<String>,
}

impl FixSessionKey {
    /// Creates a new FIX session key without a qualifier.
    #[must_use]
    pub fn new(sender_comp_id: CompId, target_comp_id: CompId) -> Self {
        Self {
            sender_comp_id,
            target_comp_id,
            qualifier: None,
        }
    }

    /// Sets the session qualifier.
    #[must_use]
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }
}

impl fmt::Display for FixSessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}->{}:{}", self.sender_comp_id, self.target_comp_id, q),
            None => write!(f, "{}->{}", self.sender_comp_id, self.target_comp_id),
        }
    }
}

/// Protocol-specific session identification.
///
/// The two protocols share nothing at the wire level; they share only the
/// registry and index machinery keyed by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKey {
    /// Classic tag=value protocol, keyed by comp ids.
    Fix(FixSessionKey),
    /// Binary protocol, keyed by the counterparty-assigned session id.
    FixP {
        /// The FIXP session identifier.
        session_id: u64,
    },
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fix(key) => write!(f, "fix:{}", key),
            Self::FixP { session_id } => write!(f, "fixp:{}", session_id),
        }
    }
}

/// Durable per-session state, assigned on first successful logon or negotiate.
///
/// Lives in the gateway sessions registry and is never destroyed; a session
/// whose transport disconnects becomes an offline session that still accepts
/// store-and-forward sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Process-unique session identifier.
    pub session_id: SessionId,
    /// Current revision of the sequence space. Monotonically non-decreasing.
    pub sequence_index: SequenceIndex,
    /// Time of the last accepted sequence reset, if any.
    pub last_sequence_reset_time: Option<Timestamp>,
    /// Time of the last accepted logon, if any.
    pub last_logon_time: Option<Timestamp>,
    /// True once a FIXP finished-sending/finished-receiving pair has completed.
    /// An ended session version cannot be re-established.
    pub ended: bool,
    /// FIXP session version, absent for FIX sessions.
    pub session_ver_id: Option<SessionVerId>,
    /// Sequence number carried by the most recent logon.
    pub logon_received_sequence_number: SequenceNumber,
}

impl SessionContext {
    /// Creates a fresh context for a newly registered session.
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            sequence_index: SequenceIndex::new(0),
            last_sequence_reset_time: None,
            last_logon_time: None,
            ended: false,
            session_ver_id: None,
            logon_received_sequence_number: SequenceNumber::new(0),
        }
    }

    /// Records an accepted logon.
    pub fn on_logon(&mut self, received_seq_num: SequenceNumber, time: Timestamp) {
        self.logon_received_sequence_number = received_seq_num;
        self.last_logon_time = Some(time);
    }

    /// Records a value-carrying sequence reset, opening a new sequence index.
    ///
    /// Gap fills do not come through here: a gap fill advances the expected
    /// number within the current index.
    pub fn on_sequence_reset(&mut self, time: Timestamp) {
        self.sequence_index = self.sequence_index.next();
        self.last_sequence_reset_time = Some(time);
    }

    /// Outcome of comparing an incoming negotiate against this context.
    ///
    /// First contact and strictly greater versions are accepted; an equal or
    /// lesser version is a duplicate. An ended version can never be revived,
    /// whatever its number, unless the new version is higher.
    #[must_use]
    pub fn check_negotiate(&self, session_ver_id: SessionVerId) -> NegotiateOutcome {
        match self.session_ver_id {
            None => NegotiateOutcome::Accept,
            Some(current) if session_ver_id > current => NegotiateOutcome::Accept,
            Some(_) => NegotiateOutcome::DuplicateId,
        }
    }

    /// Records an accepted negotiate, superseding any previous version.
    pub fn on_negotiate(&mut self, session_ver_id: SessionVerId, time: Timestamp) {
        self.session_ver_id = Some(session_ver_id);
        self.ended = false;
        self.last_logon_time = Some(time);
    }

    /// Marks the current session version as finalised.
    pub fn end(&mut self) {
        self.ended = true;
    }

    /// Whether an establish for `session_ver_id` can proceed.
    ///
    /// Establish requires a prior negotiation of exactly this version and
    /// fails against a finalised version.
    #[must_use]
    pub fn can_establish(&self, session_ver_id: SessionVerId) -> bool {
        self.session_ver_id == Some(session_ver_id) && !self.ended
    }
}

/// Outcome of validating a FIXP negotiate against existing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiateOutcome {
    /// First contact or a superseding version.
    Accept,
    /// Equal or lesser session version.
    DuplicateId,
}

/// Taxonomised reason published with every disconnect control event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisconnectReason {
    /// Counterparty closed the TCP connection.
    RemoteDisconnect,
    /// Clean logout exchange completed.
    Logout,
    /// No response to a test request within the heartbeat interval.
    HeartbeatTimeout,
    /// No logon or establish within the configured window.
    NoLogon,
    /// Logon, negotiate, or establish was rejected.
    LogonRejected,
    /// Authentication strategy rejected the counterparty.
    AuthenticationFailure,
    /// The session key was already bound to another connection.
    DuplicateSession,
    /// The owning library stopped responding and the engine reclaimed the session.
    LibraryTimeout,
    /// A message violated the protocol.
    InvalidMessage,
    /// Persistent backpressure forced the endpoint closed.
    Backpressure,
    /// FIXP terminate exchange completed.
    Terminated,
    /// The engine is shutting down.
    EngineShutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RemoteDisconnect => "remote disconnect",
            Self::Logout => "logout",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::NoLogon => "no logon",
            Self::LogonRejected => "logon rejected",
            Self::AuthenticationFailure => "authentication failure",
            Self::DuplicateSession => "duplicate session",
            Self::LibraryTimeout => "library timeout",
            Self::InvalidMessage => "invalid message",
            Self::Backpressure => "backpressure",
            Self::Terminated => "terminated",
            Self::EngineShutdown => "engine shutdown",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> SessionContext {
        SessionContext::new(SessionId::new(7))
    }

    #[test]
    fn test_fix_session_key_display() {
        let key = FixSessionKey::new(
            CompId::new("INIT").unwrap(),
            CompId::new("ACC").unwrap(),
        );
        assert_eq!(key.to_string(), "INIT->ACC");
        assert_eq!(
            key.with_qualifier("A").to_string(),
            "INIT->ACC:A"
        );
    }

    #[test]
    fn test_sequence_reset_bumps_index() {
        let mut ctx = context();
        assert_eq!(ctx.sequence_index.value(), 0);
        ctx.on_sequence_reset(Timestamp::from_millis(1));
        assert_eq!(ctx.sequence_index.value(), 1);
        assert!(ctx.last_sequence_reset_time.is_some());
    }

    #[test]
    fn test_negotiate_first_contact_accepts() {
        let ctx = context();
        assert_eq!(
            ctx.check_negotiate(SessionVerId::new(1)),
            NegotiateOutcome::Accept
        );
    }

    #[test]
    fn test_negotiate_duplicate_version_rejected() {
        let mut ctx = context();
        ctx.on_negotiate(SessionVerId::new(1), Timestamp::from_millis(1));
        assert_eq!(
            ctx.check_negotiate(SessionVerId::new(1)),
            NegotiateOutcome::DuplicateId
        );
        assert_eq!(
            ctx.check_negotiate(SessionVerId::new(2)),
            NegotiateOutcome::Accept
        );
    }

    #[test]
    fn test_ended_version_cannot_establish() {
        let mut ctx = context();
        ctx.on_negotiate(SessionVerId::new(3), Timestamp::from_millis(1));
        assert!(ctx.can_establish(SessionVerId::new(3)));
        ctx.end();
        assert!(!ctx.can_establish(SessionVerId::new(3)));
        // A higher version renegotiation revives the session.
        ctx.on_negotiate(SessionVerId::new(4), Timestamp::from_millis(2));
        assert!(ctx.can_establish(SessionVerId::new(4)));
    }
}
