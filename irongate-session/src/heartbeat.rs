/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Heartbeat and TestRequest liveness tracking.
//!
//! Timing is driven by the [`Timestamp`]s the framer passes in rather than a
//! wall clock read inside the manager, so liveness decisions replay
//! deterministically in tests.

use irongate_core::types::Timestamp;
use std::time::Duration;

/// Tracks heartbeat timing for one session.
#[derive(Debug)]
pub struct HeartbeatManager {
    /// Heartbeat interval.
    interval: Duration,
    /// Time of last message sent.
    last_sent: Timestamp,
    /// Time of last message received.
    last_received: Timestamp,
    /// Pending TestRequest id, if any.
    test_request_pending: Option<String>,
    /// Time when the pending TestRequest was sent.
    test_request_sent_at: Option<Timestamp>,
    /// Counter feeding generated TestRequest ids.
    test_request_counter: u64,
}

impl HeartbeatManager {
    /// Creates a manager with the given interval.
    #[must_use]
    pub fn new(interval: Duration, now: Timestamp) -> Self {
        Self {
            interval,
            last_sent: now,
            last_received: now,
            test_request_pending: None,
            test_request_sent_at: None,
            test_request_counter: 0,
        }
    }

    /// Records that a message was sent.
    #[inline]
    pub fn on_message_sent(&mut self, now: Timestamp) {
        self.last_sent = now;
    }

    /// Records that a message was received.
    ///
    /// A Heartbeat carrying the pending TestReqID clears the outstanding
    /// test request.
    pub fn on_message_received(
        &mut self,
        now: Timestamp,
        is_heartbeat: bool,
        test_req_id: Option<&str>,
    ) {
        self.last_received = now;

        if is_heartbeat
            && let (Some(pending), Some(received)) = (&self.test_request_pending, test_req_id)
            && pending == received
        {
            self.test_request_pending = None;
            self.test_request_sent_at = None;
        }
    }

    /// True when nothing was sent for a full interval.
    #[must_use]
    pub fn should_send_heartbeat(&self, now: Timestamp) -> bool {
        self.elapsed(self.last_sent, now) >= self.interval
    }

    /// True when nothing was received for an interval and no TestRequest is
    /// outstanding.
    #[must_use]
    pub fn should_send_test_request(&self, now: Timestamp) -> bool {
        if self.test_request_pending.is_some() {
            return false;
        }
        self.elapsed(self.last_received, now) >= self.interval
    }

    /// True when the outstanding TestRequest went unanswered for an interval.
    #[must_use]
    pub fn is_timed_out(&self, now: Timestamp) -> bool {
        match self.test_request_sent_at {
            Some(sent_at) => self.elapsed(sent_at, now) >= self.interval,
            None => false,
        }
    }

    /// Registers a sent TestRequest and returns its generated id.
    pub fn on_test_request_sent(&mut self, now: Timestamp) -> String {
        self.test_request_counter += 1;
        let id = format!("TEST{}", self.test_request_counter);
        self.test_request_pending = Some(id.clone());
        self.test_request_sent_at = Some(now);
        self.last_sent = now;
        id
    }

    /// The pending TestRequest id, if any.
    #[must_use]
    pub fn pending_test_request(&self) -> Option<&str> {
        self.test_request_pending.as_deref()
    }

    /// The configured interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Milliseconds since the last inbound message.
    #[must_use]
    pub fn idle_inbound_ms(&self, now: Timestamp) -> u64 {
        now.as_millis().saturating_sub(self.last_received.as_millis())
    }

    fn elapsed(&self, since: Timestamp, now: Timestamp) -> Duration {
        Duration::from_millis(now.as_millis().saturating_sub(since.as_millis()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn manager() -> HeartbeatManager {
        HeartbeatManager::new(Duration::from_secs(30), t(0))
    }

    #[test]
    fn test_should_send_heartbeat_after_idle_interval() {
        let mut mgr = manager();
        assert!(!mgr.should_send_heartbeat(t(10_000)));
        assert!(mgr.should_send_heartbeat(t(30_000)));

        mgr.on_message_sent(t(30_000));
        assert!(!mgr.should_send_heartbeat(t(40_000)));
    }

    #[test]
    fn test_test_request_flow() {
        let mut mgr = manager();
        assert!(!mgr.should_send_test_request(t(10_000)));
        assert!(mgr.should_send_test_request(t(31_000)));

        let id = mgr.on_test_request_sent(t(31_000));
        assert_eq!(mgr.pending_test_request(), Some(id.as_str()));
        // Only one test request at a time.
        assert!(!mgr.should_send_test_request(t(62_000)));

        mgr.on_message_received(t(40_000), true, Some(&id));
        assert!(mgr.pending_test_request().is_none());
        assert!(!mgr.is_timed_out(t(70_000)));
    }

    #[test]
    fn test_timeout_when_test_request_unanswered() {
        let mut mgr = manager();
        mgr.on_test_request_sent(t(31_000));
        assert!(!mgr.is_timed_out(t(45_000)));
        assert!(mgr.is_timed_out(t(61_000)));
    }

    #[test]
    fn test_wrong_test_req_id_keeps_pending() {
        let mut mgr = manager();
        let _id = mgr.on_test_request_sent(t(31_000));
        mgr.on_message_received(t(32_000), true, Some("OTHER"));
        assert!(mgr.pending_test_request().is_some());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let mut mgr = manager();
        let a = mgr.on_test_request_sent(t(1));
        mgr.on_message_received(t(2), true, Some(&a));
        let b = mgr.on_test_request_sent(t(3));
        assert_ne!(a, b);
    }
}
