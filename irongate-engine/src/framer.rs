/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! The receiver dispatcher.
//!
//! A single-threaded agent that demultiplexes framed bytes into the
//! per-connection protocol state machines and routes their actions: outbound
//! frames to the connection's write queue, accepted messages to the carrier
//! streams, business messages and lifecycle changes to the engine event
//! queue.
//!
//! When a carrier stream back-pressures, the offending endpoint is marked
//! and [`Framer::do_work`] retries it exclusively until its pending records
//! drain; only then does regular polling resume. The dispatcher owns
//! teardown, publishing a disconnect event with a taxonomised reason.

use crate::carrier::CarrierStream;
use crate::registry::{AcquireOutcome, GatewaySessions, LibraryId};
use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, Sender};
use irongate_core::context::{DisconnectReason, SessionContext, SessionKey};
use irongate_core::error::EngineError;
use irongate_core::types::{SequenceIndex, SequenceNumber, SessionId, Timestamp};
use irongate_fixp::acceptor::{
    Acceptor, AcceptorAction, AcceptorConfig, AuthenticationStrategy, PermissiveAuthentication,
};
use irongate_fixp::messages::FixpMessage;
use irongate_fixp::sofh::SOFH_LEN;
use irongate_session::config::SessionConfig;
use irongate_session::fix::{FixAction, FixSession, FixState};
use irongate_tagvalue::decoder::Decoder;
use irongate_tagvalue::encoder::wipe_credentials;
use irongate_tagvalue::field::tags;
use irongate_transport::binary::SofhCodec;
use irongate_transport::codec::FixCodec;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio_util::codec::Decoder as _;
use tracing::{debug, info, warn};

/// Identifier of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Wire protocol spoken on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    /// Classic tag=value protocol.
    Fix,
    /// Binary Entry Point.
    FixP,
}

/// A replay range requested by a counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayRange {
    /// FIX resend request.
    Fix {
        /// First requested sequence number.
        begin: SequenceNumber,
        /// Last requested sequence number, `None` for "up to latest".
        end: Option<SequenceNumber>,
    },
    /// FIXP retransmit request.
    FixP {
        /// First requested sequence number.
        from_seq_no: u32,
        /// Number of requested messages.
        count: u32,
    },
}

/// Events surfaced to the engine wrapper and application.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A session became active on a connection.
    SessionActive {
        /// The connection.
        connection_id: ConnectionId,
        /// The session.
        session_id: SessionId,
        /// Its identification tuple.
        key: SessionKey,
    },
    /// An accepted inbound business message, in sequence order.
    Message {
        /// The session.
        session_id: SessionId,
        /// Inbound sequence number.
        seq_num: SequenceNumber,
        /// Complete original frame bytes.
        bytes: Bytes,
    },
    /// A counterparty asked for a retransmission; the replay service
    /// materialises it and hands the frames back to the dispatcher.
    ReplayRequested {
        /// The connection to answer on.
        connection_id: ConnectionId,
        /// The session.
        session_id: SessionId,
        /// Sequence-space revision to query.
        sequence_index: SequenceIndex,
        /// The requested range.
        range: ReplayRange,
    },
    /// A connection was torn down.
    Disconnect {
        /// The connection.
        connection_id: ConnectionId,
        /// The bound session, if any.
        session_id: Option<SessionId>,
        /// Why.
        reason: DisconnectReason,
    },
}

/// Commands application libraries enqueue for the framer thread.
///
/// Libraries never touch the dispatcher's state directly; sends cross over
/// on a channel and are applied during [`Framer::do_work`].
#[derive(Debug)]
pub enum LibraryCommand {
    /// Publish an outbound business message for a session, connected or
    /// offline.
    Send {
        /// The session.
        session_id: SessionId,
        /// Sequence-space revision the message belongs to.
        sequence_index: SequenceIndex,
        /// Outbound sequence number allocated by the library.
        seq_num: SequenceNumber,
        /// The framed message bytes.
        bytes: Bytes,
    },
}

/// A record whose carrier publication is pending on backpressure.
#[derive(Debug)]
struct PendingRecord {
    inbound: bool,
    session_id: SessionId,
    sequence_index: SequenceIndex,
    sequence_number: SequenceNumber,
    is_admin: bool,
    bytes: Bytes,
}

enum Machine {
    Fix(Box<FixSession>),
    FixP(Box<Acceptor<Arc<dyn AuthenticationStrategy + Send + Sync>>>),
}

struct Connection {
    id: u64,
    kind: ProtocolKind,
    read_buf: BytesMut,
    fix_codec: FixCodec,
    sofh_codec: SofhCodec,
    machine: Option<Machine>,
    /// Durable context for the FIX side; the FIXP context lives inside the
    /// acceptor.
    context: Option<SessionContext>,
    key: Option<SessionKey>,
    outbound: VecDeque<BytesMut>,
    pending_publish: VecDeque<PendingRecord>,
}

/// The receiver dispatcher agent.
pub struct Framer {
    fix_config: SessionConfig,
    acceptor_config: AcceptorConfig,
    auth: Arc<dyn AuthenticationStrategy + Send + Sync>,
    registry: GatewaySessions,
    inbound: CarrierStream,
    outbound: CarrierStream,
    connections: HashMap<u64, Connection>,
    next_connection_id: u64,
    /// Endpoint being retried exclusively after carrier backpressure.
    backpressured: Option<u64>,
    events: VecDeque<EngineEvent>,
    library: LibraryId,
    command_tx: Sender<LibraryCommand>,
    command_rx: Receiver<LibraryCommand>,
}

impl Framer {
    /// Creates the dispatcher.
    #[must_use]
    pub fn new(
        fix_config: SessionConfig,
        acceptor_config: AcceptorConfig,
        inbound: CarrierStream,
        outbound: CarrierStream,
    ) -> Self {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        Self {
            fix_config,
            acceptor_config,
            auth: Arc::new(PermissiveAuthentication),
            registry: GatewaySessions::new(),
            inbound,
            outbound,
            connections: HashMap::new(),
            next_connection_id: 1,
            backpressured: None,
            events: VecDeque::new(),
            library: LibraryId(1),
            command_tx,
            command_rx,
        }
    }

    /// A handle libraries use to enqueue commands from their own threads.
    #[must_use]
    pub fn command_sender(&self) -> Sender<LibraryCommand> {
        self.command_tx.clone()
    }

    /// Installs an authentication strategy for FIXP sessions.
    #[must_use]
    pub fn with_authentication(
        mut self,
        auth: Arc<dyn AuthenticationStrategy + Send + Sync>,
    ) -> Self {
        self.auth = auth;
        self
    }

    /// The sessions registry, for admin operations and recovery wiring.
    pub fn registry_mut(&mut self) -> &mut GatewaySessions {
        &mut self.registry
    }

    /// Shared access to the registry.
    #[must_use]
    pub fn registry(&self) -> &GatewaySessions {
        &self.registry
    }

    /// Registers a freshly accepted connection.
    pub fn on_connect(&mut self, kind: ProtocolKind, now: Timestamp) -> ConnectionId {
        let id = self.next_connection_id;
        self.next_connection_id += 1;

        let machine = match kind {
            ProtocolKind::Fix => Some(Machine::Fix(Box::new(FixSession::new(
                self.fix_config.clone(),
                now,
            )))),
            // The FIXP machine needs the negotiate's session id before a
            // context can be acquired.
            ProtocolKind::FixP => None,
        };

        self.connections.insert(
            id,
            Connection {
                id,
                kind,
                read_buf: BytesMut::with_capacity(4096),
                fix_codec: FixCodec::new(),
                sofh_codec: SofhCodec::new(),
                machine,
                context: None,
                key: None,
                outbound: VecDeque::new(),
                pending_publish: VecDeque::new(),
            },
        );
        debug!(connection_id = id, ?kind, "connection registered");
        ConnectionId(id)
    }

    /// Appends received bytes to a connection's read buffer.
    pub fn on_bytes(&mut self, connection_id: ConnectionId, bytes: &[u8]) {
        if let Some(conn) = self.connections.get_mut(&connection_id.0) {
            conn.read_buf.extend_from_slice(bytes);
        }
    }

    /// The remote end closed the connection.
    pub fn on_remote_close(&mut self, connection_id: ConnectionId) {
        self.teardown(connection_id.0, DisconnectReason::RemoteDisconnect);
    }

    /// Restores a FIX connection's sequence state from recovered indexes.
    pub fn restore_fix_sequences(
        &mut self,
        connection_id: ConnectionId,
        next_sent: u32,
        next_expected: u32,
    ) {
        if let Some(Machine::Fix(session)) = self
            .connections
            .get_mut(&connection_id.0)
            .and_then(|c| c.machine.as_mut())
        {
            session.restore_sequences(next_sent, next_expected);
        }
    }

    /// Drains queued outbound frames for a connection.
    pub fn poll_outbound(&mut self, connection_id: ConnectionId) -> Vec<BytesMut> {
        self.connections
            .get_mut(&connection_id.0)
            .map(|c| c.outbound.drain(..).collect())
            .unwrap_or_default()
    }

    /// Drains surfaced engine events.
    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }

    /// Queues replayed frames produced by the replay service.
    ///
    /// Replayed copies go to the socket only; the originals are already
    /// archived.
    pub fn send_replayed(&mut self, connection_id: ConnectionId, frames: Vec<BytesMut>) {
        if let Some(conn) = self.connections.get_mut(&connection_id.0) {
            conn.outbound.extend(frames);
            if let Some(Machine::FixP(acceptor)) = conn.machine.as_mut() {
                acceptor.retransmission_complete();
            }
        }
    }

    /// Marks a FIX replay as complete, unblocking the session's limiter.
    pub fn fix_replay_complete(
        &mut self,
        connection_id: ConnectionId,
        begin: SequenceNumber,
        end: Option<SequenceNumber>,
    ) {
        if let Some(Machine::Fix(session)) = self
            .connections
            .get_mut(&connection_id.0)
            .and_then(|c| c.machine.as_mut())
        {
            session.replay_complete(begin, end);
        }
    }

    /// Publishes an application-side outbound business message.
    ///
    /// Works for offline sessions too: with no connected transport the
    /// bytes still reach the outbound carrier and are replayed on the
    /// counterparty's next resend request.
    ///
    /// # Errors
    /// Returns `EngineError::Backpressure` when the outbound carrier is
    /// full; the caller retries.
    pub fn offline_send(
        &mut self,
        session_id: SessionId,
        sequence_index: SequenceIndex,
        seq_num: SequenceNumber,
        bytes: &[u8],
    ) -> Result<(), EngineError> {
        publish(
            &self.outbound,
            session_id,
            sequence_index,
            seq_num,
            false,
            bytes,
        )
    }

    /// One scheduler step: drains backpressure, then parses and dispatches.
    ///
    /// # Returns
    /// The number of events processed; zero means idle.
    pub fn do_work(&mut self, now: Timestamp) -> usize {
        let mut work = 0;

        // A backpressured endpoint is retried exclusively until drained.
        if let Some(id) = self.backpressured {
            work += self.drain_pending(id);
            if self
                .connections
                .get(&id)
                .is_some_and(|c| !c.pending_publish.is_empty())
            {
                return work;
            }
            self.backpressured = None;
        }

        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                LibraryCommand::Send {
                    session_id,
                    sequence_index,
                    seq_num,
                    bytes,
                } => {
                    // Offline or connected, the message reaches the
                    // outbound carrier; a full carrier re-queues it.
                    if self
                        .offline_send(session_id, sequence_index, seq_num, &bytes)
                        .is_err()
                    {
                        warn!(
                            session_id = session_id.value(),
                            "outbound carrier full, library send requeued"
                        );
                        let _ = self.command_tx.send(LibraryCommand::Send {
                            session_id,
                            sequence_index,
                            seq_num,
                            bytes,
                        });
                        break;
                    }
                    work += 1;
                }
            }
        }

        let ids: Vec<u64> = self.connections.keys().copied().collect();
        for id in ids {
            work += self.poll_connection(id, now);
            if self.backpressured.is_some() {
                break;
            }
        }

        let ids: Vec<u64> = self.connections.keys().copied().collect();
        for id in ids {
            work += self.tick_connection(id, now);
        }

        work
    }

    fn drain_pending(&mut self, id: u64) -> usize {
        let Some(conn) = self.connections.get_mut(&id) else {
            return 0;
        };
        let mut drained = 0;
        while let Some(record) = conn.pending_publish.front() {
            let stream = if record.inbound {
                &self.inbound
            } else {
                &self.outbound
            };
            match publish(
                stream,
                record.session_id,
                record.sequence_index,
                record.sequence_number,
                record.is_admin,
                &record.bytes,
            ) {
                Ok(()) => {
                    conn.pending_publish.pop_front();
                    drained += 1;
                }
                Err(_) => break,
            }
        }
        drained
    }

    fn poll_connection(&mut self, id: u64, now: Timestamp) -> usize {
        let mut work = 0;
        loop {
            let Some(conn) = self.connections.get_mut(&id) else {
                return work;
            };
            if !conn.pending_publish.is_empty() {
                self.backpressured = Some(id);
                return work;
            }

            let kind = conn.kind;
            let frame = match kind {
                ProtocolKind::Fix => conn.fix_codec.decode(&mut conn.read_buf),
                ProtocolKind::FixP => conn.sofh_codec.decode(&mut conn.read_buf),
            };

            match frame {
                Ok(Some(frame)) => {
                    work += 1;
                    match kind {
                        ProtocolKind::Fix => self.on_fix_frame(id, &frame, now),
                        ProtocolKind::FixP => self.on_fixp_frame(id, &frame, now),
                    }
                }
                Ok(None) => return work,
                Err(err) => {
                    warn!(connection_id = id, %err, "frame error");
                    self.teardown(id, DisconnectReason::InvalidMessage);
                    return work + 1;
                }
            }
        }
    }

    fn on_fix_frame(&mut self, id: u64, bytes: &BytesMut, now: Timestamp) {
        let mut decoder = Decoder::new(bytes).with_checksum_validation(false);
        let Ok(frame) = decoder.decode() else {
            self.teardown(id, DisconnectReason::InvalidMessage);
            return;
        };
        let header = frame.session_header().ok();

        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        let Some(Machine::Fix(session)) = conn.machine.as_mut() else {
            return;
        };

        let was_active = session.state() == FixState::Active;
        let expected_before = session.sequences().next_expected();
        let actions = session.on_frame(&frame, now);
        let accepted = session.sequences().next_expected() != expected_before;
        let became_active = !was_active && session.state() == FixState::Active;

        // Bind before archiving so the activating logon is journaled under
        // its session id, not an unbound placeholder.
        if became_active {
            let reset_requested = actions.contains(&FixAction::SequenceIndexReset);
            self.bind_fix_session(id, reset_requested, now);
        }

        // Archive the accepted inbound frame, credentials wiped. Rejected
        // and deferred frames never reach the carrier, and neither does
        // anything on a connection with no bound session.
        if let Some(header) = &header
            && accepted
            && let Some(conn) = self.connections.get(&id)
            && let Some(context) = &conn.context
        {
            let mut archived = bytes.to_vec();
            wipe_credentials(&mut archived);
            let record = PendingRecord {
                inbound: true,
                session_id: context.session_id,
                sequence_index: context.sequence_index,
                sequence_number: header.msg_seq_num,
                is_admin: header.msg_type.is_admin(),
                bytes: Bytes::from(archived),
            };
            self.queue_publish(id, record);
        }

        self.handle_fix_actions(id, actions, now);
    }

    fn bind_fix_session(&mut self, id: u64, reset_requested: bool, now: Timestamp) {
        let key = SessionKey::Fix(irongate_core::context::FixSessionKey::new(
            self.fix_config.remote_comp_id.clone(),
            self.fix_config.local_comp_id.clone(),
        ));

        match self
            .registry
            .acquire(&key, self.library, reset_requested, now)
        {
            AcquireOutcome::Acquired(mut context) => {
                let Some(conn) = self.connections.get_mut(&id) else {
                    return;
                };
                if let Some(Machine::Fix(session)) = conn.machine.as_ref() {
                    context.on_logon(
                        session.logon_received_seq().unwrap_or_default(),
                        now,
                    );
                }
                info!(
                    connection_id = id,
                    session_id = context.session_id.value(),
                    "fix session active"
                );
                self.events.push_back(EngineEvent::SessionActive {
                    connection_id: ConnectionId(id),
                    session_id: context.session_id,
                    key: key.clone(),
                });
                conn.key = Some(key);
                conn.context = Some(context);
            }
            AcquireOutcome::Duplicate => {
                warn!(connection_id = id, %key, "duplicate fix session");
                self.teardown(id, DisconnectReason::DuplicateSession);
            }
        }
    }

    fn handle_fix_actions(&mut self, id: u64, actions: Vec<FixAction>, now: Timestamp) {
        for action in actions {
            match action {
                FixAction::Send(frame) => {
                    let seq_num = frame_seq(&frame);
                    let Some(conn) = self.connections.get_mut(&id) else {
                        return;
                    };
                    // Pre-bind replies (rejects on an unbound connection)
                    // still reach the wire but are not journaled.
                    let record = conn.context.as_ref().map(|context| PendingRecord {
                        inbound: false,
                        session_id: context.session_id,
                        sequence_index: context.sequence_index,
                        sequence_number: SequenceNumber::new(seq_num.unwrap_or(0)),
                        is_admin: true,
                        bytes: Bytes::copy_from_slice(&frame),
                    });
                    conn.outbound.push_back(frame);
                    if let Some(record) = record {
                        self.queue_publish(id, record);
                    }
                }
                FixAction::DeliverBusiness { seq_num, bytes } => {
                    let Some(conn) = self.connections.get(&id) else {
                        return;
                    };
                    if let Some(context) = &conn.context {
                        self.events.push_back(EngineEvent::Message {
                            session_id: context.session_id,
                            seq_num,
                            bytes,
                        });
                    }
                }
                FixAction::Replay { begin, end } => {
                    let Some(conn) = self.connections.get(&id) else {
                        return;
                    };
                    if let Some(context) = &conn.context {
                        self.events.push_back(EngineEvent::ReplayRequested {
                            connection_id: ConnectionId(id),
                            session_id: context.session_id,
                            sequence_index: context.sequence_index,
                            range: ReplayRange::Fix { begin, end },
                        });
                    }
                }
                FixAction::SequenceIndexReset => {
                    let Some(conn) = self.connections.get_mut(&id) else {
                        return;
                    };
                    if let Some(context) = conn.context.as_mut() {
                        context.on_sequence_reset(now);
                        if let Some(key) = &conn.key {
                            self.registry.hand_back(key, context.clone());
                            self.registry.acquire(key, self.library, false, now);
                        }
                    }
                }
                FixAction::Disconnect(reason) => {
                    self.teardown(id, reason);
                    return;
                }
            }
        }
    }

    fn on_fixp_frame(&mut self, id: u64, bytes: &BytesMut, now: Timestamp) {
        let payload = &bytes[SOFH_LEN..];
        let message = match FixpMessage::decode(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(connection_id = id, %err, "undecodable fixp frame");
                self.teardown(id, DisconnectReason::InvalidMessage);
                return;
            }
        };

        // First contact binds the context by the counterparty session id.
        let needs_machine = self
            .connections
            .get(&id)
            .is_some_and(|c| c.machine.is_none());
        if needs_machine {
            let fixp_session_id = match &message {
                FixpMessage::Negotiate { session_id, .. }
                | FixpMessage::Establish { session_id, .. } => *session_id,
                _ => {
                    warn!(connection_id = id, "fixp session must start with negotiate");
                    self.teardown(id, DisconnectReason::NoLogon);
                    return;
                }
            };
            let key = SessionKey::FixP {
                session_id: fixp_session_id,
            };
            match self.registry.acquire(&key, self.library, false, now) {
                AcquireOutcome::Acquired(context) => {
                    let session_id = context.session_id;
                    let Some(conn) = self.connections.get_mut(&id) else {
                        return;
                    };
                    conn.machine = Some(Machine::FixP(Box::new(Acceptor::new(
                        self.acceptor_config.clone(),
                        Arc::clone(&self.auth),
                        context,
                        now,
                    ))));
                    conn.key = Some(key.clone());
                    self.events.push_back(EngineEvent::SessionActive {
                        connection_id: ConnectionId(id),
                        session_id,
                        key,
                    });
                }
                AcquireOutcome::Duplicate => {
                    warn!(connection_id = id, fixp_session_id, "duplicate fixp session");
                    self.teardown(id, DisconnectReason::DuplicateSession);
                    return;
                }
            }
        }

        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        let Some(Machine::FixP(acceptor)) = conn.machine.as_mut() else {
            return;
        };

        match acceptor.on_message(message, now) {
            Ok(actions) => self.handle_fixp_actions(id, actions),
            Err(err) => {
                warn!(connection_id = id, %err, "fixp protocol violation");
                self.teardown(id, DisconnectReason::InvalidMessage);
            }
        }
    }

    fn handle_fixp_actions(&mut self, id: u64, actions: Vec<AcceptorAction>) {
        for action in actions {
            match action {
                AcceptorAction::Send(message) => {
                    if let Some(conn) = self.connections.get_mut(&id) {
                        conn.outbound.push_back(message.encode());
                    }
                }
                AcceptorAction::DeliverBusiness {
                    sequence_number,
                    template_id,
                    payload,
                } => {
                    let Some(conn) = self.connections.get_mut(&id) else {
                        return;
                    };
                    let Some(Machine::FixP(acceptor)) = conn.machine.as_ref() else {
                        return;
                    };
                    let context = acceptor.context();
                    let session_id = context.session_id;
                    let sequence_index = context.sequence_index;

                    let mut framed = BytesMut::with_capacity(payload.len() + 2);
                    framed.extend_from_slice(&template_id.to_le_bytes());
                    framed.extend_from_slice(&payload);
                    let record = PendingRecord {
                        inbound: true,
                        session_id,
                        sequence_index,
                        sequence_number: SequenceNumber::new(sequence_number),
                        is_admin: false,
                        bytes: framed.freeze(),
                    };
                    self.queue_publish(id, record);

                    self.events.push_back(EngineEvent::Message {
                        session_id,
                        seq_num: SequenceNumber::new(sequence_number),
                        bytes: payload,
                    });
                }
                AcceptorAction::Retransmit { from_seq_no, count } => {
                    let Some(conn) = self.connections.get(&id) else {
                        return;
                    };
                    let Some(Machine::FixP(acceptor)) = conn.machine.as_ref() else {
                        return;
                    };
                    let context = acceptor.context();
                    self.events.push_back(EngineEvent::ReplayRequested {
                        connection_id: ConnectionId(id),
                        session_id: context.session_id,
                        sequence_index: context.sequence_index,
                        range: ReplayRange::FixP { from_seq_no, count },
                    });
                }
                AcceptorAction::SessionEnded => {
                    let Some(conn) = self.connections.get(&id) else {
                        return;
                    };
                    if let (Some(key), Some(Machine::FixP(acceptor))) =
                        (&conn.key, conn.machine.as_ref())
                    {
                        self.registry.hand_back(key, acceptor.context().clone());
                        // The session stays bound until the terminate.
                        self.registry.acquire(key, self.library, false, Timestamp::now());
                    }
                }
                AcceptorAction::Disconnect(reason) => {
                    self.teardown(id, reason);
                    return;
                }
            }
        }
    }

    fn tick_connection(&mut self, id: u64, now: Timestamp) -> usize {
        let Some(conn) = self.connections.get_mut(&id) else {
            return 0;
        };
        match conn.machine.as_mut() {
            Some(Machine::Fix(session)) => {
                let actions = session.on_tick(now);
                if actions.is_empty() {
                    0
                } else {
                    self.handle_fix_actions(id, actions, now);
                    1
                }
            }
            Some(Machine::FixP(acceptor)) => {
                let actions = acceptor.on_tick(now);
                if actions.is_empty() {
                    0
                } else {
                    self.handle_fixp_actions(id, actions);
                    1
                }
            }
            None => 0,
        }
    }

    fn queue_publish(&mut self, id: u64, record: PendingRecord) {
        let stream = if record.inbound {
            &self.inbound
        } else {
            &self.outbound
        };
        match publish(
            stream,
            record.session_id,
            record.sequence_index,
            record.sequence_number,
            record.is_admin,
            &record.bytes,
        ) {
            Ok(()) => {}
            Err(EngineError::Backpressure { stream_id }) => {
                debug!(connection_id = id, stream_id, "endpoint backpressured");
                if let Some(conn) = self.connections.get_mut(&id) {
                    conn.pending_publish.push_back(record);
                    self.backpressured = Some(id);
                }
            }
            Err(err) => {
                warn!(connection_id = id, %err, "publish failed");
            }
        }
    }

    fn teardown(&mut self, id: u64, reason: DisconnectReason) {
        let Some(mut conn) = self.connections.remove(&id) else {
            return;
        };

        let session_id = match (&conn.key, conn.machine.as_mut()) {
            (Some(key), Some(Machine::FixP(acceptor))) => {
                let context = acceptor.context().clone();
                let session_id = context.session_id;
                self.registry.hand_back(key, context);
                Some(session_id)
            }
            (Some(key), Some(Machine::Fix(session))) => {
                session.on_disconnect();
                let context = conn.context.clone();
                if let Some(context) = context {
                    let session_id = context.session_id;
                    self.registry.hand_back(key, context);
                    Some(session_id)
                } else {
                    None
                }
            }
            _ => None,
        };

        if self.backpressured == Some(id) {
            self.backpressured = None;
        }

        info!(connection_id = id, %reason, "connection torn down");
        self.events.push_back(EngineEvent::Disconnect {
            connection_id: ConnectionId(id),
            session_id,
            reason,
        });
    }
}

impl std::fmt::Debug for Framer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framer")
            .field("connections", &self.connections.len())
            .field("backpressured", &self.backpressured)
            .finish()
    }
}

fn publish(
    stream: &CarrierStream,
    session_id: SessionId,
    sequence_index: SequenceIndex,
    sequence_number: SequenceNumber,
    is_admin: bool,
    bytes: &[u8],
) -> Result<(), EngineError> {
    let mut claim = stream.try_claim(
        session_id,
        sequence_index,
        sequence_number,
        is_admin,
        bytes.len(),
    )?;
    claim.buffer().copy_from_slice(bytes);
    let _ = claim.commit();
    Ok(())
}

/// Extracts MsgSeqNum from an encoded frame.
fn frame_seq(bytes: &[u8]) -> Option<u32> {
    let mut decoder = Decoder::new(bytes).with_checksum_validation(false);
    let frame = decoder.decode().ok()?;
    frame.get_field(tags::MSG_SEQ_NUM)?.as_u32().ok()
}
