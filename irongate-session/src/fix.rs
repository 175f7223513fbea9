/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! The FIX session state machine.
//!
//! Walks `CONNECTED -> [SENT_LOGON ->] ACTIVE -> [AWAITING_LOGOUT ->]
//! DISCONNECTED`, with `DISABLED` as the terminal state after a library
//! timeout. The machine is pure: every inbound frame and every clock tick
//! returns the list of [`FixAction`]s the caller must perform. It never
//! blocks and never does I/O.
//!
//! Reception discipline, in order: header validation (comp ids, sending
//! time), then sequence classification (in-order, gap, rewind), then
//! per-message dispatch. Gaps trigger a single resend request; rewinds
//! without `PossDupFlag` log the counterparty out with the exact reason
//! text.

use crate::config::SessionConfig;
use crate::heartbeat::HeartbeatManager;
use crate::sequence::{SequenceCheck, SequenceManager};
use bytes::{Bytes, BytesMut};
use irongate_core::context::DisconnectReason;
use irongate_core::types::{SequenceNumber, Timestamp};
use irongate_tagvalue::decoder::{FixFrame, FixMsgType, SessionHeader};
use irongate_tagvalue::encoder::AdminEncoder;
use irongate_tagvalue::field::{reject_reason, tags};
use tracing::{debug, info, warn};

/// FIX session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixState {
    /// TCP connected, no logon yet.
    Connected,
    /// Logon sent (initiator side), awaiting the acknowledgement.
    SentLogon,
    /// Session established.
    Active,
    /// Logout sent, awaiting the acknowledgement.
    AwaitingLogout,
    /// Transport gone; the session may come back as an offline session.
    Disconnected,
    /// Terminal state after a library timeout.
    Disabled,
}

/// Side effects the caller must perform after feeding the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixAction {
    /// Encode and send these bytes on the connection.
    Send(BytesMut),
    /// Deliver a business message to the application, in sequence order.
    DeliverBusiness {
        /// Inbound sequence number of the message.
        seq_num: SequenceNumber,
        /// The complete framed message.
        bytes: Bytes,
    },
    /// Serve the counterparty's resend request from the replay index.
    Replay {
        /// First requested sequence number.
        begin: SequenceNumber,
        /// Last requested sequence number, `None` for "up to latest".
        end: Option<SequenceNumber>,
    },
    /// A value-carrying sequence reset happened; the registry opens a new
    /// sequence index for this session.
    SequenceIndexReset,
    /// Tear the connection down with the given reason.
    Disconnect(DisconnectReason),
}

/// The session state machine for one FIX connection.
#[derive(Debug)]
pub struct FixSession {
    state: FixState,
    config: SessionConfig,
    admin: AdminEncoder,
    sequences: SequenceManager,
    heartbeat: HeartbeatManager,
    /// Highest sequence number seen while a gap is being refilled.
    resend_target: Option<u32>,
    /// Resend ranges currently being served.
    replays_in_flight: Vec<(u32, u32)>,
    connected_at: Timestamp,
    last_logon_time: Option<Timestamp>,
    logon_received_seq: Option<SequenceNumber>,
}

impl FixSession {
    /// Creates a machine for a freshly accepted connection.
    #[must_use]
    pub fn new(config: SessionConfig, now: Timestamp) -> Self {
        let admin = AdminEncoder::new(
            config.begin_string,
            config.local_comp_id.clone(),
            config.remote_comp_id.clone(),
            config.sending_time_precision,
        );
        let heartbeat = HeartbeatManager::new(config.heartbeat_interval, now);
        Self {
            state: FixState::Connected,
            config,
            admin,
            sequences: SequenceManager::new(),
            heartbeat,
            resend_target: None,
            replays_in_flight: Vec::new(),
            connected_at: now,
            last_logon_time: None,
            logon_received_seq: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> FixState {
        self.state
    }

    /// The sequence counters, for indexing and recovery.
    #[must_use]
    pub const fn sequences(&self) -> &SequenceManager {
        &self.sequences
    }

    /// Sequence number carried by the accepted logon.
    #[must_use]
    pub const fn logon_received_seq(&self) -> Option<SequenceNumber> {
        self.logon_received_seq
    }

    /// Time of the accepted logon.
    #[must_use]
    pub const fn last_logon_time(&self) -> Option<Timestamp> {
        self.last_logon_time
    }

    /// Restores sequence state recovered from the indexes after a restart.
    pub fn restore_sequences(&mut self, next_sent: u32, next_expected: u32) {
        self.sequences.set_next_sent(SequenceNumber::new(next_sent));
        self.sequences
            .set_next_expected(SequenceNumber::new(next_expected));
    }

    /// Sends the initiator-side logon.
    pub fn send_logon(&mut self, now: Timestamp) -> Vec<FixAction> {
        let seq = self.sequences.allocate_sent();
        self.heartbeat.on_message_sent(now);
        self.state = FixState::SentLogon;
        vec![FixAction::Send(self.admin.logon(
            seq,
            now,
            self.config.heartbeat_interval_secs(),
            false,
        ))]
    }

    /// Starts a clean logout.
    pub fn initiate_logout(&mut self, now: Timestamp) -> Vec<FixAction> {
        if self.state != FixState::Active {
            return Vec::new();
        }
        let seq = self.sequences.allocate_sent();
        self.heartbeat.on_message_sent(now);
        self.state = FixState::AwaitingLogout;
        vec![FixAction::Send(self.admin.logout(seq, now, None))]
    }

    /// Marks one served replay as complete, unblocking the limiter.
    pub fn replay_complete(&mut self, begin: SequenceNumber, end: Option<SequenceNumber>) {
        let key = (begin.value(), end.map_or(0, SequenceNumber::value));
        if let Some(i) = self.replays_in_flight.iter().position(|r| *r == key) {
            self.replays_in_flight.swap_remove(i);
        }
    }

    /// The transport dropped; the session becomes offline.
    pub fn on_disconnect(&mut self) {
        self.state = FixState::Disconnected;
    }

    /// The owning library timed out; the session is disabled for good.
    pub fn disable(&mut self) {
        self.state = FixState::Disabled;
    }

    /// Feeds one decoded frame into the machine.
    pub fn on_frame(&mut self, frame: &FixFrame<'_>, now: Timestamp) -> Vec<FixAction> {
        let header = match frame.session_header() {
            Ok(header) => header,
            Err(err) => {
                warn!(%err, "unparseable session header");
                return vec![FixAction::Disconnect(DisconnectReason::InvalidMessage)];
            }
        };

        self.heartbeat.on_message_received(
            now,
            header.msg_type == FixMsgType::Heartbeat,
            frame.get_field_str(tags::TEST_REQ_ID),
        );

        if let Some(actions) = self.validate_header(&header, now) {
            return actions;
        }

        // A sequence reset moves the expectation rather than consuming one.
        if header.msg_type == FixMsgType::SequenceReset {
            return self.on_sequence_reset(frame, &header);
        }

        match self.state {
            FixState::Connected => self.on_frame_connected(frame, &header, now),
            FixState::SentLogon => self.on_frame_sent_logon(&header, now),
            FixState::Active | FixState::AwaitingLogout => {
                self.on_frame_active(frame, &header, now)
            }
            FixState::Disconnected | FixState::Disabled => Vec::new(),
        }
    }

    /// Periodic liveness check.
    pub fn on_tick(&mut self, now: Timestamp) -> Vec<FixAction> {
        match self.state {
            FixState::Connected | FixState::SentLogon => {
                let waited = now.as_millis().saturating_sub(self.connected_at.as_millis());
                if waited >= self.config.no_logon_timeout.as_millis() as u64 {
                    return vec![FixAction::Disconnect(DisconnectReason::NoLogon)];
                }
                Vec::new()
            }
            FixState::Active => {
                if self.heartbeat.is_timed_out(now) {
                    warn!(
                        idle_ms = self.heartbeat.idle_inbound_ms(now),
                        "test request unanswered, disconnecting"
                    );
                    return vec![FixAction::Disconnect(DisconnectReason::HeartbeatTimeout)];
                }
                if self.heartbeat.should_send_test_request(now) {
                    let id = self.heartbeat.on_test_request_sent(now);
                    let seq = self.sequences.allocate_sent();
                    return vec![FixAction::Send(self.admin.test_request(seq, now, &id))];
                }
                if self.heartbeat.should_send_heartbeat(now) {
                    let seq = self.sequences.allocate_sent();
                    self.heartbeat.on_message_sent(now);
                    return vec![FixAction::Send(self.admin.heartbeat(seq, now, None))];
                }
                Vec::new()
            }
            FixState::AwaitingLogout => {
                if self.heartbeat.idle_inbound_ms(now)
                    >= self.config.heartbeat_interval.as_millis() as u64
                {
                    return vec![FixAction::Disconnect(DisconnectReason::Logout)];
                }
                Vec::new()
            }
            FixState::Disconnected | FixState::Disabled => Vec::new(),
        }
    }

    fn validate_header(
        &mut self,
        header: &SessionHeader<'_>,
        now: Timestamp,
    ) -> Option<Vec<FixAction>> {
        if header.sender_comp_id != self.config.remote_comp_id.as_bytes()
            || header.target_comp_id != self.config.local_comp_id.as_bytes()
        {
            warn!(
                sender = %String::from_utf8_lossy(header.sender_comp_id),
                target = %String::from_utf8_lossy(header.target_comp_id),
                "comp id mismatch"
            );
            let seq = self.sequences.allocate_sent();
            return Some(vec![
                FixAction::Send(self.admin.reject(
                    seq,
                    now,
                    header.msg_seq_num,
                    reject_reason::COMPID_PROBLEM,
                    "CompID problem",
                )),
                FixAction::Disconnect(DisconnectReason::InvalidMessage),
            ]);
        }

        let delta = now.delta_millis(header.sending_time).unsigned_abs();
        let window = self.config.sending_time_window.as_millis() as u64;
        if delta > window && !header.poss_dup {
            warn!(delta_ms = delta, "sending time outside accuracy window");
            let seq = self.sequences.allocate_sent();
            return Some(vec![
                FixAction::Send(self.admin.reject(
                    seq,
                    now,
                    header.msg_seq_num,
                    reject_reason::SENDING_TIME_ACCURACY,
                    "SendingTime accuracy problem",
                )),
                FixAction::Disconnect(DisconnectReason::InvalidMessage),
            ]);
        }

        None
    }

    fn on_sequence_reset(
        &mut self,
        frame: &FixFrame<'_>,
        header: &SessionHeader<'_>,
    ) -> Vec<FixAction> {
        let Some(new_seq_no) = frame
            .get_field(tags::NEW_SEQ_NO)
            .and_then(|f| f.as_u32().ok())
        else {
            return vec![FixAction::Disconnect(DisconnectReason::InvalidMessage)];
        };
        let gap_fill = frame
            .get_field(tags::GAP_FILL_FLAG)
            .and_then(|f| f.as_bool().ok())
            .unwrap_or(false);

        let expected = self.sequences.next_expected().value();
        if gap_fill {
            if new_seq_no < expected {
                if header.poss_dup {
                    return Vec::new();
                }
                warn!(new_seq_no, expected, "gap fill attempts to rewind");
                return Vec::new();
            }
            debug!(new_seq_no, "gap fill advances expectation");
            self.sequences
                .set_next_expected(SequenceNumber::new(new_seq_no));
            self.finish_resend_if_done();
            Vec::new()
        } else {
            // A value-carrying reset opens a fresh sequence index.
            info!(new_seq_no, "hard sequence reset");
            self.sequences
                .set_next_expected(SequenceNumber::new(new_seq_no));
            self.resend_target = None;
            vec![FixAction::SequenceIndexReset]
        }
    }

    fn on_frame_connected(
        &mut self,
        frame: &FixFrame<'_>,
        header: &SessionHeader<'_>,
        now: Timestamp,
    ) -> Vec<FixAction> {
        if header.msg_type != FixMsgType::Logon {
            warn!(msg_type = ?header.msg_type, "first message was not a logon");
            return vec![FixAction::Disconnect(DisconnectReason::NoLogon)];
        }

        let mut actions = Vec::new();

        let reset_requested = frame
            .get_field(tags::RESET_SEQ_NUM_FLAG)
            .and_then(|f| f.as_bool().ok())
            .unwrap_or(false);
        if reset_requested && self.config.accept_seq_num_reset {
            info!("counterparty requested sequence reset on logon");
            self.sequences.reset();
            actions.push(FixAction::SequenceIndexReset);
        }

        match self.sequences.check_inbound(header.msg_seq_num) {
            SequenceCheck::TooLow { expected, received } => {
                return self.logout_too_low(expected, received, now);
            }
            SequenceCheck::InOrder => {
                self.sequences.accept_inbound();
            }
            SequenceCheck::Gap { expected, received } => {
                // Acknowledge the logon first, then recover the gap.
                self.resend_target = Some(received);
                let seq = self.sequences.allocate_sent();
                actions.push(FixAction::Send(self.admin.logon(
                    seq,
                    now,
                    self.config.heartbeat_interval_secs(),
                    reset_requested,
                )));
                let seq = self.sequences.allocate_sent();
                actions.push(FixAction::Send(self.admin.resend_request(
                    seq,
                    now,
                    SequenceNumber::new(expected),
                    0,
                )));
                self.heartbeat.on_message_sent(now);
                self.accept_logon(header, now);
                return actions;
            }
        }

        let seq = self.sequences.allocate_sent();
        actions.push(FixAction::Send(self.admin.logon(
            seq,
            now,
            self.config.heartbeat_interval_secs(),
            reset_requested,
        )));
        self.heartbeat.on_message_sent(now);
        self.accept_logon(header, now);
        actions
    }

    fn on_frame_sent_logon(
        &mut self,
        header: &SessionHeader<'_>,
        now: Timestamp,
    ) -> Vec<FixAction> {
        if header.msg_type != FixMsgType::Logon {
            warn!(msg_type = ?header.msg_type, "expected logon acknowledgement");
            return vec![FixAction::Disconnect(DisconnectReason::LogonRejected)];
        }
        match self.sequences.check_inbound(header.msg_seq_num) {
            SequenceCheck::TooLow { expected, received } => {
                self.logout_too_low(expected, received, now)
            }
            SequenceCheck::InOrder => {
                self.sequences.accept_inbound();
                self.accept_logon(header, now);
                Vec::new()
            }
            SequenceCheck::Gap { expected, received } => {
                self.resend_target = Some(received);
                self.accept_logon(header, now);
                let seq = self.sequences.allocate_sent();
                self.heartbeat.on_message_sent(now);
                vec![FixAction::Send(self.admin.resend_request(
                    seq,
                    now,
                    SequenceNumber::new(expected),
                    0,
                ))]
            }
        }
    }

    fn on_frame_active(
        &mut self,
        frame: &FixFrame<'_>,
        header: &SessionHeader<'_>,
        now: Timestamp,
    ) -> Vec<FixAction> {
        match self.sequences.check_inbound(header.msg_seq_num) {
            SequenceCheck::InOrder => {
                self.sequences.accept_inbound();
                self.finish_resend_if_done();
                self.dispatch(frame, header, now)
            }
            SequenceCheck::TooLow { expected, received } => {
                if header.poss_dup {
                    // Silent discard of duplicates.
                    return Vec::new();
                }
                self.logout_too_low(expected, received, now)
            }
            SequenceCheck::Gap { expected, received } => {
                // A logout still takes effect even across a gap.
                if header.msg_type == FixMsgType::Logout {
                    return self.on_logout(now);
                }
                let mut actions = Vec::new();
                if self.resend_target.is_none() {
                    let seq = self.sequences.allocate_sent();
                    self.heartbeat.on_message_sent(now);
                    actions.push(FixAction::Send(self.admin.resend_request(
                        seq,
                        now,
                        SequenceNumber::new(expected),
                        0,
                    )));
                }
                debug!(expected, received, "sequence gap, message deferred");
                self.resend_target = Some(self.resend_target.map_or(received, |t| t.max(received)));
                actions
            }
        }
    }

    fn dispatch(
        &mut self,
        frame: &FixFrame<'_>,
        header: &SessionHeader<'_>,
        now: Timestamp,
    ) -> Vec<FixAction> {
        match header.msg_type {
            FixMsgType::Heartbeat => Vec::new(),
            FixMsgType::TestRequest => {
                let id = frame.get_field_str(tags::TEST_REQ_ID);
                let seq = self.sequences.allocate_sent();
                self.heartbeat.on_message_sent(now);
                vec![FixAction::Send(self.admin.heartbeat(seq, now, id))]
            }
            FixMsgType::ResendRequest => self.on_resend_request(frame),
            FixMsgType::Reject => {
                warn!(
                    text = frame.get_field_str(tags::TEXT).unwrap_or(""),
                    "session-level reject received"
                );
                Vec::new()
            }
            FixMsgType::Logout => self.on_logout(now),
            FixMsgType::Logon => {
                debug!("logon on an active session ignored");
                Vec::new()
            }
            FixMsgType::SequenceReset => Vec::new(),
            FixMsgType::UserRequest | FixMsgType::Business => {
                vec![FixAction::DeliverBusiness {
                    seq_num: header.msg_seq_num,
                    bytes: Bytes::copy_from_slice(frame.buffer()),
                }]
            }
        }
    }

    fn on_resend_request(&mut self, frame: &FixFrame<'_>) -> Vec<FixAction> {
        let begin = frame
            .get_field(tags::BEGIN_SEQ_NO)
            .and_then(|f| f.as_u32().ok());
        let end = frame
            .get_field(tags::END_SEQ_NO)
            .and_then(|f| f.as_u32().ok());
        let (Some(begin), Some(end)) = (begin, end) else {
            return vec![FixAction::Disconnect(DisconnectReason::InvalidMessage)];
        };

        let key = (begin, end);
        if self.replays_in_flight.contains(&key) {
            // The counterparty re-asked for a range already being served.
            debug!(begin, end, "duplicate resend request ignored");
            return Vec::new();
        }
        if self.replays_in_flight.len() >= self.config.max_concurrent_replays {
            warn!(
                begin,
                end,
                outstanding = self.replays_in_flight.len(),
                limit = self.config.max_concurrent_replays,
                "replay limit exceeded, dropping resend request"
            );
            return Vec::new();
        }

        self.replays_in_flight.push(key);
        vec![FixAction::Replay {
            begin: SequenceNumber::new(begin),
            end: (end != 0).then(|| SequenceNumber::new(end)),
        }]
    }

    fn on_logout(&mut self, now: Timestamp) -> Vec<FixAction> {
        if self.state == FixState::AwaitingLogout {
            // Acknowledgement of our logout.
            self.state = FixState::Disconnected;
            return vec![FixAction::Disconnect(DisconnectReason::Logout)];
        }
        let seq = self.sequences.allocate_sent();
        self.heartbeat.on_message_sent(now);
        self.state = FixState::Disconnected;
        vec![
            FixAction::Send(self.admin.logout(seq, now, None)),
            FixAction::Disconnect(DisconnectReason::Logout),
        ]
    }

    fn logout_too_low(&mut self, expected: u32, received: u32, now: Timestamp) -> Vec<FixAction> {
        let text = format!(
            "MsgSeqNum too low, expecting {} but received {}",
            expected, received
        );
        warn!("{}", text);
        let seq = self.sequences.allocate_sent();
        self.state = FixState::Disconnected;
        vec![
            FixAction::Send(self.admin.logout(seq, now, Some(&text))),
            FixAction::Disconnect(DisconnectReason::InvalidMessage),
        ]
    }

    fn accept_logon(&mut self, header: &SessionHeader<'_>, now: Timestamp) {
        self.state = FixState::Active;
        self.last_logon_time = Some(now);
        self.logon_received_seq = Some(header.msg_seq_num);
        info!(seq = header.msg_seq_num.value(), "logon accepted");
    }

    fn finish_resend_if_done(&mut self) {
        if let Some(target) = self.resend_target
            && self.sequences.next_expected().value() > target
        {
            debug!(target, "gap refilled");
            self.resend_target = None;
        }
    }
}
