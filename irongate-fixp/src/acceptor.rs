/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Acceptor-side FIXP session state machine.
//!
//! The acceptor walks `ACCEPTED -> NEGOTIATED -> ESTABLISHED`, with the
//! finalisation states `SENT_FINISHED_SENDING` / `RECV_FINISHED_SENDING` and
//! `UNBINDING` on the way to `UNBOUND`. Session-version discipline is strict:
//! a version can only ever be superseded by a strictly greater one, and a
//! finalised version can never be re-established.
//!
//! The machine is pure: every input returns the list of [`AcceptorAction`]s
//! the caller must perform. It never blocks and never does I/O.

use crate::error::FixpError;
use crate::messages::{
    EstablishmentRejectCode, FixpMessage, NegotiationRejectCode, RetransmitRejectCode,
    TerminationCode,
};
use bytes::Bytes;
use irongate_core::context::{DisconnectReason, NegotiateOutcome, SessionContext};
use irongate_core::types::{SessionVerId, Timestamp};
use tracing::{debug, warn};

/// Acceptor connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorState {
    /// TCP accepted, nothing received yet.
    Accepted,
    /// Negotiate accepted, awaiting establish.
    Negotiated,
    /// Fully established, business flows.
    Established,
    /// Counterparty finished sending; we may still send.
    RecvFinishedSending,
    /// We finished sending; awaiting the counterparty's acknowledgement.
    SentFinishedSending,
    /// Terminate sent, awaiting the echo.
    Unbinding,
    /// Session unbound, connection closing.
    Unbound,
}

impl AcceptorState {
    const fn name(self) -> &'static str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::Negotiated => "NEGOTIATED",
            Self::Established => "ESTABLISHED",
            Self::RecvFinishedSending => "RECV_FINISHED_SENDING",
            Self::SentFinishedSending => "SENT_FINISHED_SENDING",
            Self::Unbinding => "UNBINDING",
            Self::Unbound => "UNBOUND",
        }
    }
}

/// Authentication hook invoked at negotiate and establish time.
///
/// Implementations are owned by the session and invoked directly; rejection
/// maps to the CREDENTIALS reject code.
pub trait AuthenticationStrategy: Send {
    /// Validates the credentials presented with a negotiate.
    fn on_negotiate(&self, session_id: u64, session_ver_id: u64, credentials: &[u8]) -> bool;

    /// Validates an establish for an already negotiated version.
    fn on_establish(&self, _session_id: u64, _session_ver_id: u64) -> bool {
        true
    }
}

impl<T: AuthenticationStrategy + ?Sized> AuthenticationStrategy for Box<T> {
    fn on_negotiate(&self, session_id: u64, session_ver_id: u64, credentials: &[u8]) -> bool {
        (**self).on_negotiate(session_id, session_ver_id, credentials)
    }

    fn on_establish(&self, session_id: u64, session_ver_id: u64) -> bool {
        (**self).on_establish(session_id, session_ver_id)
    }
}

impl<T> AuthenticationStrategy for std::sync::Arc<T>
where
    T: AuthenticationStrategy + Send + Sync + ?Sized,
{
    fn on_negotiate(&self, session_id: u64, session_ver_id: u64, credentials: &[u8]) -> bool {
        (**self).on_negotiate(session_id, session_ver_id, credentials)
    }

    fn on_establish(&self, session_id: u64, session_ver_id: u64) -> bool {
        (**self).on_establish(session_id, session_ver_id)
    }
}

/// Accepts every counterparty.
#[derive(Debug, Default)]
pub struct PermissiveAuthentication;

impl AuthenticationStrategy for PermissiveAuthentication {
    fn on_negotiate(&self, _session_id: u64, _session_ver_id: u64, _credentials: &[u8]) -> bool {
        true
    }
}

/// Acceptor tuning knobs.
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    /// Lowest acceptable keep-alive interval in milliseconds.
    pub keep_alive_min_ms: u32,
    /// Highest acceptable keep-alive interval in milliseconds.
    pub keep_alive_max_ms: u32,
    /// Disconnect if no establish arrives within this window after negotiate.
    pub no_establish_timeout_ms: u64,
    /// Largest retransmission range served by a single request.
    pub max_retransmission_range: u32,
    /// Maximum retransmit requests in flight at once.
    pub max_concurrent_replays: usize,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            keep_alive_min_ms: 100,
            keep_alive_max_ms: 60_000,
            no_establish_timeout_ms: 10_000,
            max_retransmission_range: 10_000,
            max_concurrent_replays: 2,
        }
    }
}

/// Side effects the caller must perform after feeding the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptorAction {
    /// Encode and send this message on the connection.
    Send(FixpMessage),
    /// Deliver a business message to the application, in sequence order.
    DeliverBusiness {
        /// Implicitly assigned inbound sequence number.
        sequence_number: u32,
        /// Application template id.
        template_id: u16,
        /// Opaque payload.
        payload: Bytes,
    },
    /// Stream the requested range from the archive after the
    /// `Retransmission` header that precedes this action.
    Retransmit {
        /// First sequence number to replay.
        from_seq_no: u32,
        /// Number of messages to replay.
        count: u32,
    },
    /// The finished-sending handshake completed; the session version is dead.
    SessionEnded,
    /// Tear the connection down with the given reason.
    Disconnect(DisconnectReason),
}

/// The acceptor state machine for one connection.
#[derive(Debug)]
pub struct Acceptor<A> {
    state: AcceptorState,
    config: AcceptorConfig,
    auth: A,
    /// Durable context handed over by the sessions registry.
    context: SessionContext,
    /// FIXP session id bound to this connection, zero until negotiate.
    fixp_session_id: u64,
    session_ver_id: u64,
    /// Next expected inbound business sequence number.
    next_recv_seq: u32,
    /// Next outbound business sequence number.
    next_sent_seq: u32,
    keep_alive_ms: u32,
    /// Replays currently being streamed.
    outstanding_replays: usize,
    /// Inbound retransmission in progress: next sequence number to assign
    /// and messages remaining.
    inbound_retransmit: Option<(u32, u32)>,
    /// True once the counterparty acknowledged our finished-sending.
    finished_receiving_seen: bool,
    last_inbound: Timestamp,
    last_outbound: Timestamp,
    /// Deadline for the establish after a negotiate.
    establish_deadline: Option<Timestamp>,
}

impl<A: AuthenticationStrategy> Acceptor<A> {
    /// Creates a machine for a freshly accepted connection.
    ///
    /// `context` comes from the gateway sessions registry; for a returning
    /// session it carries the previous version and finalisation state.
    #[must_use]
    pub fn new(config: AcceptorConfig, auth: A, context: SessionContext, now: Timestamp) -> Self {
        Self {
            state: AcceptorState::Accepted,
            config,
            auth,
            context,
            fixp_session_id: 0,
            session_ver_id: 0,
            next_recv_seq: 1,
            next_sent_seq: 1,
            keep_alive_ms: 0,
            outstanding_replays: 0,
            inbound_retransmit: None,
            finished_receiving_seen: false,
            last_inbound: now,
            last_outbound: now,
            establish_deadline: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AcceptorState {
        self.state
    }

    /// Next expected inbound sequence number.
    #[must_use]
    pub const fn next_recv_seq(&self) -> u32 {
        self.next_recv_seq
    }

    /// Next outbound sequence number.
    #[must_use]
    pub const fn next_sent_seq(&self) -> u32 {
        self.next_sent_seq
    }

    /// Returns the durable context for hand-back to the registry.
    #[must_use]
    pub const fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Restores sequencing state recovered from the indexes after a restart.
    pub fn restore_sequences(&mut self, next_recv_seq: u32, next_sent_seq: u32) {
        self.next_recv_seq = next_recv_seq;
        self.next_sent_seq = next_sent_seq;
    }

    /// Whether a new outbound business message may be claimed.
    ///
    /// Claims fail once we have announced finished-sending and in every
    /// state outside the established family.
    #[must_use]
    pub const fn can_claim(&self) -> bool {
        matches!(
            self.state,
            AcceptorState::Established | AcceptorState::RecvFinishedSending
        )
    }

    /// Allocates the next outbound sequence number.
    ///
    /// The caller must have checked [`Acceptor::can_claim`].
    pub fn allocate_sent_seq(&mut self, now: Timestamp) -> u32 {
        let seq = self.next_sent_seq;
        self.next_sent_seq += 1;
        self.last_outbound = now;
        seq
    }

    /// Marks one streamed replay as complete.
    pub fn retransmission_complete(&mut self) {
        self.outstanding_replays = self.outstanding_replays.saturating_sub(1);
    }

    /// Feeds one decoded message into the machine.
    ///
    /// # Errors
    /// Returns `FixpError::ProtocolViolation` for messages the current state
    /// can never admit; the caller disconnects on error.
    pub fn on_message(
        &mut self,
        msg: FixpMessage,
        now: Timestamp,
    ) -> Result<Vec<AcceptorAction>, FixpError> {
        self.last_inbound = now;

        match msg {
            FixpMessage::Negotiate {
                session_id,
                session_ver_id,
                credentials,
                ..
            } => self.on_negotiate(session_id, session_ver_id, &credentials, now),
            FixpMessage::Establish {
                session_id,
                session_ver_id,
                keep_alive_interval_ms,
                next_seq_no,
                ..
            } => self.on_establish(session_id, session_ver_id, keep_alive_interval_ms, next_seq_no),
            FixpMessage::Sequence { next_seq_no } => self.on_sequence(next_seq_no),
            FixpMessage::Business {
                template_id,
                payload,
            } => self.on_business(template_id, payload),
            FixpMessage::RetransmitRequest {
                session_id,
                timestamp,
                from_seq_no,
                count,
            } => Ok(self.on_retransmit_request(session_id, timestamp, from_seq_no, count)),
            FixpMessage::Retransmission {
                from_seq_no, count, ..
            } => {
                // The counterparty refills a gap we signalled; the burst's
                // business messages carry the old numbers.
                self.require_established()?;
                self.inbound_retransmit = Some((from_seq_no, count));
                Ok(Vec::new())
            }
            FixpMessage::NotApplied { from_seq_no, count } => {
                debug!(from_seq_no, count, "counterparty reported unapplied messages");
                Ok(Vec::new())
            }
            FixpMessage::FinishedSending { last_seq_no, .. } => {
                Ok(self.on_finished_sending(last_seq_no))
            }
            FixpMessage::FinishedReceiving { .. } => Ok(self.on_finished_receiving()),
            FixpMessage::Terminate { .. } => Ok(self.on_terminate()),
            other => {
                warn!(state = self.state.name(), ?other, "unexpected message");
                Err(FixpError::ProtocolViolation {
                    state: self.state.name(),
                    reason: "acceptor received an acceptor-side message",
                })
            }
        }
    }

    fn on_negotiate(
        &mut self,
        session_id: u64,
        session_ver_id: u64,
        credentials: &[u8],
        now: Timestamp,
    ) -> Result<Vec<AcceptorAction>, FixpError> {
        if self.state != AcceptorState::Accepted {
            return Err(FixpError::ProtocolViolation {
                state: self.state.name(),
                reason: "negotiate after session start",
            });
        }

        if !self.auth.on_negotiate(session_id, session_ver_id, credentials) {
            return Ok(vec![
                AcceptorAction::Send(FixpMessage::NegotiateReject {
                    session_id,
                    session_ver_id,
                    code: NegotiationRejectCode::Credentials,
                }),
                AcceptorAction::Disconnect(DisconnectReason::AuthenticationFailure),
            ]);
        }

        match self.context.check_negotiate(SessionVerId::new(session_ver_id)) {
            NegotiateOutcome::Accept => {
                self.context
                    .on_negotiate(SessionVerId::new(session_ver_id), now);
                self.fixp_session_id = session_id;
                self.session_ver_id = session_ver_id;
                self.next_recv_seq = 1;
                self.next_sent_seq = 1;
                self.state = AcceptorState::Negotiated;
                self.establish_deadline = Some(Timestamp::from_millis(
                    now.as_millis() + self.config.no_establish_timeout_ms,
                ));
                debug!(session_id, session_ver_id, "negotiate accepted");
                Ok(vec![AcceptorAction::Send(FixpMessage::NegotiateResponse {
                    session_id,
                    session_ver_id,
                })])
            }
            NegotiateOutcome::DuplicateId => {
                debug!(session_id, session_ver_id, "duplicate negotiate");
                Ok(vec![
                    AcceptorAction::Send(FixpMessage::NegotiateReject {
                        session_id,
                        session_ver_id,
                        code: NegotiationRejectCode::DuplicateId,
                    }),
                    AcceptorAction::Disconnect(DisconnectReason::LogonRejected),
                ])
            }
        }
    }

    fn on_establish(
        &mut self,
        session_id: u64,
        session_ver_id: u64,
        keep_alive_ms: u32,
        _next_seq_no: u32,
    ) -> Result<Vec<AcceptorAction>, FixpError> {
        match self.state {
            AcceptorState::Established => {
                // Non-disconnecting by specification.
                return Ok(vec![AcceptorAction::Send(FixpMessage::EstablishReject {
                    session_id,
                    code: EstablishmentRejectCode::AlreadyEstablished,
                })]);
            }
            AcceptorState::Accepted => {
                // First message of a reconnect: the version must have been
                // negotiated on a previous connection and not finalised.
                if !self.context.can_establish(SessionVerId::new(session_ver_id)) {
                    return Ok(vec![
                        AcceptorAction::Send(FixpMessage::EstablishReject {
                            session_id,
                            code: EstablishmentRejectCode::Unnegotiated,
                        }),
                        AcceptorAction::Disconnect(DisconnectReason::LogonRejected),
                    ]);
                }
                self.fixp_session_id = session_id;
                self.session_ver_id = session_ver_id;
            }
            AcceptorState::Negotiated => {
                if session_ver_id != self.session_ver_id {
                    return Ok(vec![
                        AcceptorAction::Send(FixpMessage::EstablishReject {
                            session_id,
                            code: EstablishmentRejectCode::Unnegotiated,
                        }),
                        AcceptorAction::Disconnect(DisconnectReason::LogonRejected),
                    ]);
                }
            }
            _ => {
                return Err(FixpError::ProtocolViolation {
                    state: self.state.name(),
                    reason: "establish during finalisation",
                });
            }
        }

        if keep_alive_ms < self.config.keep_alive_min_ms
            || keep_alive_ms > self.config.keep_alive_max_ms
        {
            return Ok(vec![
                AcceptorAction::Send(FixpMessage::EstablishReject {
                    session_id,
                    code: EstablishmentRejectCode::KeepaliveInterval,
                }),
                AcceptorAction::Disconnect(DisconnectReason::LogonRejected),
            ]);
        }

        if !self.auth.on_establish(session_id, session_ver_id) {
            return Ok(vec![
                AcceptorAction::Send(FixpMessage::EstablishReject {
                    session_id,
                    code: EstablishmentRejectCode::Credentials,
                }),
                AcceptorAction::Disconnect(DisconnectReason::AuthenticationFailure),
            ]);
        }

        self.keep_alive_ms = keep_alive_ms;
        self.establish_deadline = None;
        self.state = AcceptorState::Established;
        debug!(
            session_id,
            session_ver_id, keep_alive_ms, "session established"
        );
        Ok(vec![AcceptorAction::Send(FixpMessage::EstablishAck {
            session_id,
            session_ver_id,
            keep_alive_interval_ms: keep_alive_ms,
            next_recv_seq: self.next_recv_seq,
            next_sent_seq: self.next_sent_seq,
        })])
    }

    fn on_sequence(&mut self, next_seq_no: u32) -> Result<Vec<AcceptorAction>, FixpError> {
        self.require_established()?;

        if next_seq_no > self.next_recv_seq {
            let from = self.next_recv_seq;
            let count = next_seq_no - self.next_recv_seq;
            self.next_recv_seq = next_seq_no;
            debug!(from, count, "inbound sequence gap");
            return Ok(vec![AcceptorAction::Send(FixpMessage::NotApplied {
                from_seq_no: from,
                count,
            })]);
        }

        if next_seq_no < self.next_recv_seq {
            // A rewind is unrecoverable for the binary protocol.
            return Ok(self.terminate_now(TerminationCode::Unspecified));
        }

        Ok(Vec::new())
    }

    fn on_business(
        &mut self,
        template_id: u16,
        payload: Bytes,
    ) -> Result<Vec<AcceptorAction>, FixpError> {
        match self.state {
            AcceptorState::Established | AcceptorState::RecvFinishedSending => {}
            AcceptorState::SentFinishedSending => {
                // We may receive business after our own finished-sending;
                // the forbidden direction is business after the counterparty
                // finished. Still deliver.
            }
            _ => {
                return Err(FixpError::ProtocolViolation {
                    state: self.state.name(),
                    reason: "business message outside established session",
                });
            }
        }

        if self.state == AcceptorState::RecvFinishedSending {
            // Counterparty declared it would send no more business messages.
            warn!(template_id, "business message after finished sending");
            return Ok(self.terminate_now(TerminationCode::Unspecified));
        }

        // Messages inside a retransmission burst carry the refilled numbers
        // and do not move the live expectation.
        let sequence_number = match self.inbound_retransmit {
            Some((next, remaining)) => {
                self.inbound_retransmit =
                    (remaining > 1).then(|| (next + 1, remaining - 1));
                next
            }
            None => {
                let seq = self.next_recv_seq;
                self.next_recv_seq += 1;
                seq
            }
        };
        Ok(vec![AcceptorAction::DeliverBusiness {
            sequence_number,
            template_id,
            payload,
        }])
    }

    fn on_retransmit_request(
        &mut self,
        session_id: u64,
        timestamp: u64,
        from_seq_no: u32,
        count: u32,
    ) -> Vec<AcceptorAction> {
        let reject = |code| {
            vec![AcceptorAction::Send(FixpMessage::RetransmitReject {
                session_id,
                request_timestamp: timestamp,
                code,
            })]
        };

        if session_id != self.fixp_session_id {
            return reject(RetransmitRejectCode::InvalidSession);
        }
        let end = u64::from(from_seq_no) + u64::from(count);
        if from_seq_no == 0 || end > u64::from(self.next_sent_seq) {
            return reject(RetransmitRejectCode::OutOfRange);
        }
        if count > self.config.max_retransmission_range
            || self.outstanding_replays >= self.config.max_concurrent_replays
        {
            return reject(RetransmitRejectCode::RequestLimitExceeded);
        }

        self.outstanding_replays += 1;
        vec![
            AcceptorAction::Send(FixpMessage::Retransmission {
                session_id,
                request_timestamp: timestamp,
                from_seq_no,
                count,
            }),
            AcceptorAction::Retransmit { from_seq_no, count },
        ]
    }

    fn on_finished_sending(&mut self, last_seq_no: u32) -> Vec<AcceptorAction> {
        let mut actions = Vec::new();

        // Surface any tail gap before acknowledging.
        if last_seq_no + 1 > self.next_recv_seq {
            let from = self.next_recv_seq;
            let count = last_seq_no + 1 - self.next_recv_seq;
            self.next_recv_seq = last_seq_no + 1;
            actions.push(AcceptorAction::Send(FixpMessage::NotApplied {
                from_seq_no: from,
                count,
            }));
        }

        actions.push(AcceptorAction::Send(FixpMessage::FinishedReceiving {
            session_id: self.fixp_session_id,
            session_ver_id: self.session_ver_id,
        }));

        match self.state {
            AcceptorState::Established => {
                self.state = AcceptorState::RecvFinishedSending;
            }
            AcceptorState::SentFinishedSending if self.finished_receiving_seen => {
                self.context.end();
                actions.push(AcceptorAction::SessionEnded);
            }
            _ => {}
        }
        actions
    }

    fn on_finished_receiving(&mut self) -> Vec<AcceptorAction> {
        if self.state != AcceptorState::SentFinishedSending {
            return Vec::new();
        }
        self.finished_receiving_seen = true;
        self.context.end();
        vec![AcceptorAction::SessionEnded]
    }

    fn on_terminate(&mut self) -> Vec<AcceptorAction> {
        match self.state {
            AcceptorState::Unbinding => {
                // Echo of our own terminate.
                self.state = AcceptorState::Unbound;
                vec![AcceptorAction::Disconnect(DisconnectReason::Terminated)]
            }
            AcceptorState::Unbound => Vec::new(),
            _ => {
                self.state = AcceptorState::Unbound;
                vec![
                    AcceptorAction::Send(FixpMessage::Terminate {
                        session_id: self.fixp_session_id,
                        session_ver_id: self.session_ver_id,
                        code: TerminationCode::Finished,
                    }),
                    AcceptorAction::Disconnect(DisconnectReason::Terminated),
                ]
            }
        }
    }

    /// Begins acceptor-side finalisation.
    ///
    /// Sends finished-sending and keeps resending it as the keep-alive until
    /// the counterparty acknowledges. Retransmit requests are still served in
    /// this window; new claims fail.
    pub fn finish_sending(&mut self, now: Timestamp) -> Vec<AcceptorAction> {
        if !matches!(
            self.state,
            AcceptorState::Established | AcceptorState::RecvFinishedSending
        ) {
            return Vec::new();
        }
        self.state = AcceptorState::SentFinishedSending;
        self.last_outbound = now;
        vec![AcceptorAction::Send(FixpMessage::FinishedSending {
            session_id: self.fixp_session_id,
            session_ver_id: self.session_ver_id,
            last_seq_no: self.next_sent_seq - 1,
        })]
    }

    /// Initiates termination from the acceptor side.
    pub fn terminate(&mut self, code: TerminationCode) -> Vec<AcceptorAction> {
        if matches!(self.state, AcceptorState::Unbinding | AcceptorState::Unbound) {
            return Vec::new();
        }
        self.state = AcceptorState::Unbinding;
        vec![AcceptorAction::Send(FixpMessage::Terminate {
            session_id: self.fixp_session_id,
            session_ver_id: self.session_ver_id,
            code,
        })]
    }

    /// Periodic liveness check.
    ///
    /// Emits a sequence heartbeat after one idle keep-alive interval and
    /// terminates after two. In the negotiated state, enforces the
    /// no-establish deadline.
    pub fn on_tick(&mut self, now: Timestamp) -> Vec<AcceptorAction> {
        if self.state == AcceptorState::Negotiated
            && let Some(deadline) = self.establish_deadline
            && now > deadline
        {
            self.state = AcceptorState::Unbound;
            return vec![AcceptorAction::Disconnect(DisconnectReason::NoLogon)];
        }

        if !matches!(
            self.state,
            AcceptorState::Established
                | AcceptorState::RecvFinishedSending
                | AcceptorState::SentFinishedSending
        ) || self.keep_alive_ms == 0
        {
            return Vec::new();
        }

        let idle_in = now.as_millis().saturating_sub(self.last_inbound.as_millis());
        let idle_out = now.as_millis().saturating_sub(self.last_outbound.as_millis());
        let interval = u64::from(self.keep_alive_ms);

        if idle_in >= 2 * interval {
            warn!(idle_ms = idle_in, "keep-alive expired twice, terminating");
            return self.terminate_now(TerminationCode::Unspecified);
        }

        if idle_out >= interval {
            self.last_outbound = now;
            let heartbeat = if self.state == AcceptorState::SentFinishedSending {
                // Resend finished-sending until acknowledged.
                FixpMessage::FinishedSending {
                    session_id: self.fixp_session_id,
                    session_ver_id: self.session_ver_id,
                    last_seq_no: self.next_sent_seq - 1,
                }
            } else {
                FixpMessage::Sequence {
                    next_seq_no: self.next_sent_seq,
                }
            };
            return vec![AcceptorAction::Send(heartbeat)];
        }

        Vec::new()
    }

    fn require_established(&self) -> Result<(), FixpError> {
        match self.state {
            AcceptorState::Established
            | AcceptorState::RecvFinishedSending
            | AcceptorState::SentFinishedSending => Ok(()),
            _ => Err(FixpError::ProtocolViolation {
                state: self.state.name(),
                reason: "sequenced message outside established session",
            }),
        }
    }

    fn terminate_now(&mut self, code: TerminationCode) -> Vec<AcceptorAction> {
        self.state = AcceptorState::Unbound;
        vec![
            AcceptorAction::Send(FixpMessage::Terminate {
                session_id: self.fixp_session_id,
                session_ver_id: self.session_ver_id,
                code,
            }),
            AcceptorAction::Disconnect(DisconnectReason::InvalidMessage),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irongate_core::types::SessionId;

    fn acceptor() -> Acceptor<PermissiveAuthentication> {
        Acceptor::new(
            AcceptorConfig::default(),
            PermissiveAuthentication,
            SessionContext::new(SessionId::new(1)),
            t(0),
        )
    }

    fn t(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn negotiate(ver: u64) -> FixpMessage {
        FixpMessage::Negotiate {
            session_id: 1,
            session_ver_id: ver,
            timestamp: 0,
            credentials: Bytes::from_static(b"firm"),
        }
    }

    fn establish(ver: u64) -> FixpMessage {
        FixpMessage::Establish {
            session_id: 1,
            session_ver_id: ver,
            timestamp: 0,
            keep_alive_interval_ms: 10_000,
            next_seq_no: 1,
        }
    }

    fn business(n: u8) -> FixpMessage {
        FixpMessage::Business {
            template_id: 100,
            payload: Bytes::copy_from_slice(&[n]),
        }
    }

    fn establish_session(acc: &mut Acceptor<PermissiveAuthentication>) {
        acc.on_message(negotiate(1), t(0)).unwrap();
        acc.on_message(establish(1), t(1)).unwrap();
        assert_eq!(acc.state(), AcceptorState::Established);
    }

    #[test]
    fn test_negotiate_establish_business_terminate() {
        // Scenario: fresh session, one business exchange, clean terminate.
        let mut acc = acceptor();

        let actions = acc.on_message(negotiate(1), t(0)).unwrap();
        assert!(matches!(
            actions[0],
            AcceptorAction::Send(FixpMessage::NegotiateResponse { .. })
        ));

        let actions = acc.on_message(establish(1), t(1)).unwrap();
        assert_eq!(
            actions[0],
            AcceptorAction::Send(FixpMessage::EstablishAck {
                session_id: 1,
                session_ver_id: 1,
                keep_alive_interval_ms: 10_000,
                next_recv_seq: 1,
                next_sent_seq: 1,
            })
        );

        let actions = acc.on_message(business(42), t(2)).unwrap();
        assert_eq!(
            actions[0],
            AcceptorAction::DeliverBusiness {
                sequence_number: 1,
                template_id: 100,
                payload: Bytes::copy_from_slice(&[42]),
            }
        );
        assert_eq!(acc.allocate_sent_seq(t(3)), 1);
        assert_eq!(acc.next_recv_seq(), 2);
        assert_eq!(acc.next_sent_seq(), 2);

        let actions = acc
            .on_message(
                FixpMessage::Terminate {
                    session_id: 1,
                    session_ver_id: 1,
                    code: TerminationCode::Finished,
                },
                t(4),
            )
            .unwrap();
        assert!(matches!(
            actions[0],
            AcceptorAction::Send(FixpMessage::Terminate { .. })
        ));
        assert_eq!(
            actions[1],
            AcceptorAction::Disconnect(DisconnectReason::Terminated)
        );
        assert_eq!(acc.state(), AcceptorState::Unbound);
    }

    #[test]
    fn test_sequence_gap_emits_not_applied() {
        // Scenario: counterparty skips 2 and 3, then retransmits.
        let mut acc = acceptor();
        establish_session(&mut acc);

        acc.on_message(business(1), t(2)).unwrap();
        let actions = acc
            .on_message(FixpMessage::Sequence { next_seq_no: 4 }, t(3))
            .unwrap();
        assert_eq!(
            actions[0],
            AcceptorAction::Send(FixpMessage::NotApplied {
                from_seq_no: 2,
                count: 2,
            })
        );
        assert_eq!(acc.next_recv_seq(), 4);

        // Message 4 arrives in order after the gap.
        let actions = acc.on_message(business(4), t(4)).unwrap();
        assert!(matches!(
            actions[0],
            AcceptorAction::DeliverBusiness {
                sequence_number: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_retransmission_refills_gap_in_order() {
        // Scenario: gap signalled with NotApplied, counterparty replays the
        // missing messages, then normal flow resumes at 4.
        let mut acc = acceptor();
        establish_session(&mut acc);

        acc.on_message(business(1), t(2)).unwrap();
        acc.on_message(FixpMessage::Sequence { next_seq_no: 4 }, t(3))
            .unwrap();
        assert_eq!(acc.next_recv_seq(), 4);

        acc.on_message(
            FixpMessage::Retransmission {
                session_id: 1,
                request_timestamp: 0,
                from_seq_no: 2,
                count: 2,
            },
            t(4),
        )
        .unwrap();

        let mut delivered = Vec::new();
        for n in [2u8, 3, 4] {
            let actions = acc.on_message(business(n), t(5)).unwrap();
            let AcceptorAction::DeliverBusiness {
                sequence_number, ..
            } = actions[0]
            else {
                panic!("expected delivery");
            };
            delivered.push(sequence_number);
        }
        assert_eq!(delivered, vec![2, 3, 4]);
        assert_eq!(acc.next_recv_seq(), 5);
    }

    #[test]
    fn test_sequence_rewind_terminates() {
        let mut acc = acceptor();
        establish_session(&mut acc);
        acc.on_message(business(1), t(2)).unwrap();
        acc.on_message(business(2), t(3)).unwrap();

        let actions = acc
            .on_message(FixpMessage::Sequence { next_seq_no: 1 }, t(4))
            .unwrap();
        assert!(matches!(
            actions[0],
            AcceptorAction::Send(FixpMessage::Terminate {
                code: TerminationCode::Unspecified,
                ..
            })
        ));
        assert_eq!(acc.state(), AcceptorState::Unbound);
    }

    #[test]
    fn test_duplicate_negotiate_rejected_then_higher_accepted() {
        // Scenario: renegotiate with the same version is a duplicate; a
        // higher version supersedes.
        let mut acc = acceptor();
        establish_session(&mut acc);
        let context = acc.context().clone();

        let mut second = Acceptor::new(
            AcceptorConfig::default(),
            PermissiveAuthentication,
            context.clone(),
            t(10),
        );
        let actions = second.on_message(negotiate(1), t(10)).unwrap();
        assert_eq!(
            actions[0],
            AcceptorAction::Send(FixpMessage::NegotiateReject {
                session_id: 1,
                session_ver_id: 1,
                code: NegotiationRejectCode::DuplicateId,
            })
        );
        assert_eq!(
            actions[1],
            AcceptorAction::Disconnect(DisconnectReason::LogonRejected)
        );

        let mut third = Acceptor::new(
            AcceptorConfig::default(),
            PermissiveAuthentication,
            context,
            t(20),
        );
        let actions = third.on_message(negotiate(2), t(20)).unwrap();
        assert!(matches!(
            actions[0],
            AcceptorAction::Send(FixpMessage::NegotiateResponse { .. })
        ));
    }

    #[test]
    fn test_establish_without_negotiate_rejected() {
        let mut acc = acceptor();
        let actions = acc.on_message(establish(1), t(0)).unwrap();
        assert_eq!(
            actions[0],
            AcceptorAction::Send(FixpMessage::EstablishReject {
                session_id: 1,
                code: EstablishmentRejectCode::Unnegotiated,
            })
        );
    }

    #[test]
    fn test_establish_previously_negotiated_session() {
        // A reconnect may lead with establish when the version was
        // negotiated on an earlier connection.
        let mut first = acceptor();
        first.on_message(negotiate(1), t(0)).unwrap();
        let context = first.context().clone();

        let mut second = Acceptor::new(
            AcceptorConfig::default(),
            PermissiveAuthentication,
            context,
            t(5),
        );
        let actions = second.on_message(establish(1), t(5)).unwrap();
        assert!(matches!(
            actions[0],
            AcceptorAction::Send(FixpMessage::EstablishAck { .. })
        ));
    }

    #[test]
    fn test_establish_bad_keep_alive_rejected() {
        let mut acc = acceptor();
        acc.on_message(negotiate(1), t(0)).unwrap();
        let actions = acc
            .on_message(
                FixpMessage::Establish {
                    session_id: 1,
                    session_ver_id: 1,
                    timestamp: 0,
                    keep_alive_interval_ms: 1, // below minimum
                    next_seq_no: 1,
                },
                t(1),
            )
            .unwrap();
        assert_eq!(
            actions[0],
            AcceptorAction::Send(FixpMessage::EstablishReject {
                session_id: 1,
                code: EstablishmentRejectCode::KeepaliveInterval,
            })
        );
    }

    #[test]
    fn test_already_established_is_non_disconnecting() {
        let mut acc = acceptor();
        establish_session(&mut acc);
        let actions = acc.on_message(establish(1), t(2)).unwrap();
        assert_eq!(
            actions,
            vec![AcceptorAction::Send(FixpMessage::EstablishReject {
                session_id: 1,
                code: EstablishmentRejectCode::AlreadyEstablished,
            })]
        );
        assert_eq!(acc.state(), AcceptorState::Established);
    }

    #[test]
    fn test_retransmit_request_validation() {
        let mut acc = acceptor();
        establish_session(&mut acc);
        acc.allocate_sent_seq(t(2));
        acc.allocate_sent_seq(t(2));
        acc.allocate_sent_seq(t(2)); // sent 1..=3

        // Valid range replays.
        let actions = acc
            .on_message(
                FixpMessage::RetransmitRequest {
                    session_id: 1,
                    timestamp: 7,
                    from_seq_no: 2,
                    count: 2,
                },
                t(3),
            )
            .unwrap();
        assert_eq!(
            actions[0],
            AcceptorAction::Send(FixpMessage::Retransmission {
                session_id: 1,
                request_timestamp: 7,
                from_seq_no: 2,
                count: 2,
            })
        );
        assert_eq!(
            actions[1],
            AcceptorAction::Retransmit {
                from_seq_no: 2,
                count: 2,
            }
        );

        // Out of range.
        let actions = acc
            .on_message(
                FixpMessage::RetransmitRequest {
                    session_id: 1,
                    timestamp: 8,
                    from_seq_no: 3,
                    count: 5,
                },
                t(4),
            )
            .unwrap();
        assert!(matches!(
            actions[0],
            AcceptorAction::Send(FixpMessage::RetransmitReject {
                code: RetransmitRejectCode::OutOfRange,
                ..
            })
        ));

        // Wrong session.
        let actions = acc
            .on_message(
                FixpMessage::RetransmitRequest {
                    session_id: 99,
                    timestamp: 9,
                    from_seq_no: 1,
                    count: 1,
                },
                t(5),
            )
            .unwrap();
        assert!(matches!(
            actions[0],
            AcceptorAction::Send(FixpMessage::RetransmitReject {
                code: RetransmitRejectCode::InvalidSession,
                ..
            })
        ));
    }

    #[test]
    fn test_replay_limiter() {
        let mut acc = acceptor();
        establish_session(&mut acc);
        for _ in 0..10 {
            acc.allocate_sent_seq(t(2));
        }

        let request = |ts| FixpMessage::RetransmitRequest {
            session_id: 1,
            timestamp: ts,
            from_seq_no: 1,
            count: 2,
        };
        acc.on_message(request(1), t(3)).unwrap();
        acc.on_message(request(2), t(3)).unwrap();
        // Third concurrent replay exceeds the default limit of 2.
        let actions = acc.on_message(request(3), t(3)).unwrap();
        assert!(matches!(
            actions[0],
            AcceptorAction::Send(FixpMessage::RetransmitReject {
                code: RetransmitRejectCode::RequestLimitExceeded,
                ..
            })
        ));

        acc.retransmission_complete();
        let actions = acc.on_message(request(4), t(4)).unwrap();
        assert!(matches!(
            actions[0],
            AcceptorAction::Send(FixpMessage::Retransmission { .. })
        ));
    }

    #[test]
    fn test_client_finished_sending() {
        let mut acc = acceptor();
        establish_session(&mut acc);
        acc.on_message(business(1), t(2)).unwrap();

        let actions = acc
            .on_message(
                FixpMessage::FinishedSending {
                    session_id: 1,
                    session_ver_id: 1,
                    last_seq_no: 1,
                },
                t(3),
            )
            .unwrap();
        assert_eq!(
            actions[0],
            AcceptorAction::Send(FixpMessage::FinishedReceiving {
                session_id: 1,
                session_ver_id: 1,
            })
        );
        assert_eq!(acc.state(), AcceptorState::RecvFinishedSending);

        // The acceptor may still send.
        assert!(acc.can_claim());

        // But business from the counterparty now terminates.
        let actions = acc.on_message(business(2), t(4)).unwrap();
        assert!(matches!(
            actions[0],
            AcceptorAction::Send(FixpMessage::Terminate { .. })
        ));
    }

    #[test]
    fn test_acceptor_finish_sending_handshake() {
        let mut acc = acceptor();
        establish_session(&mut acc);
        acc.allocate_sent_seq(t(2));

        let actions = acc.finish_sending(t(3));
        assert_eq!(
            actions,
            vec![AcceptorAction::Send(FixpMessage::FinishedSending {
                session_id: 1,
                session_ver_id: 1,
                last_seq_no: 1,
            })]
        );
        assert!(!acc.can_claim());

        // Unacknowledged finished-sending is resent as the heartbeat.
        let actions = acc.on_tick(t(3 + 10_000));
        assert!(matches!(
            actions[0],
            AcceptorAction::Send(FixpMessage::FinishedSending { .. })
        ));

        let actions = acc.on_message(
            FixpMessage::FinishedReceiving {
                session_id: 1,
                session_ver_id: 1,
            },
            t(20_000),
        );
        assert_eq!(actions.unwrap(), vec![AcceptorAction::SessionEnded]);
        assert!(acc.context().ended);
    }

    #[test]
    fn test_ended_version_cannot_reestablish() {
        let mut acc = acceptor();
        establish_session(&mut acc);
        acc.finish_sending(t(2));
        acc.on_message(
            FixpMessage::FinishedReceiving {
                session_id: 1,
                session_ver_id: 1,
            },
            t(3),
        )
        .unwrap();
        let context = acc.context().clone();

        let mut reconnect = Acceptor::new(
            AcceptorConfig::default(),
            PermissiveAuthentication,
            context,
            t(10),
        );
        let actions = reconnect.on_message(establish(1), t(10)).unwrap();
        assert_eq!(
            actions[0],
            AcceptorAction::Send(FixpMessage::EstablishReject {
                session_id: 1,
                code: EstablishmentRejectCode::Unnegotiated,
            })
        );
    }

    #[test]
    fn test_keep_alive_heartbeat_and_timeout() {
        let mut acc = acceptor();
        establish_session(&mut acc);

        // One idle interval: sequence heartbeat.
        let actions = acc.on_tick(t(11_000));
        assert_eq!(
            actions,
            vec![AcceptorAction::Send(FixpMessage::Sequence { next_seq_no: 1 })]
        );

        // Two idle intervals without inbound traffic: terminate.
        let actions = acc.on_tick(t(22_000));
        assert!(matches!(
            actions[0],
            AcceptorAction::Send(FixpMessage::Terminate {
                code: TerminationCode::Unspecified,
                ..
            })
        ));
    }

    #[test]
    fn test_no_establish_timeout() {
        let mut acc = acceptor();
        acc.on_message(negotiate(1), t(0)).unwrap();
        assert!(acc.on_tick(t(5_000)).is_empty());
        let actions = acc.on_tick(t(10_001));
        assert_eq!(
            actions,
            vec![AcceptorAction::Disconnect(DisconnectReason::NoLogon)]
        );
    }

    #[test]
    fn test_credentials_rejected() {
        struct DenyAll;
        impl AuthenticationStrategy for DenyAll {
            fn on_negotiate(&self, _: u64, _: u64, _: &[u8]) -> bool {
                false
            }
        }

        let mut acc = Acceptor::new(
            AcceptorConfig::default(),
            DenyAll,
            SessionContext::new(SessionId::new(1)),
            t(0),
        );
        let actions = acc.on_message(negotiate(1), t(0)).unwrap();
        assert_eq!(
            actions[0],
            AcceptorAction::Send(FixpMessage::NegotiateReject {
                session_id: 1,
                session_ver_id: 1,
                code: NegotiationRejectCode::Credentials,
            })
        );
        assert_eq!(
            actions[1],
            AcceptorAction::Disconnect(DisconnectReason::AuthenticationFailure)
        );
    }
}
