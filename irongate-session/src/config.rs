/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Session configuration.

use irongate_core::types::{CompId, TimestampPrecision};
use std::time::Duration;

/// Configuration for one FIX session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Our comp id (tag 49 of outbound messages).
    pub local_comp_id: CompId,
    /// Counterparty comp id (tag 49 of inbound messages).
    pub remote_comp_id: CompId,
    /// FIX version BeginString (e.g., "FIX.4.4").
    pub begin_string: &'static str,
    /// Heartbeat interval.
    pub heartbeat_interval: Duration,
    /// Accepted |now - SendingTime| window.
    pub sending_time_window: Duration,
    /// SendingTime encoding precision.
    pub sending_time_precision: TimestampPrecision,
    /// Whether an inbound `ResetSeqNumFlag=Y` logon resets the sequence space.
    pub accept_seq_num_reset: bool,
    /// Maximum retransmissions served concurrently; extra requests are
    /// dropped with a warning.
    pub max_concurrent_replays: usize,
    /// Disconnect when no logon arrives within this window after connect.
    pub no_logon_timeout: Duration,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl SessionConfig {
    /// Creates a configuration with required fields and defaults.
    #[must_use]
    pub fn new(local_comp_id: CompId, remote_comp_id: CompId, begin_string: &'static str) -> Self {
        Self {
            local_comp_id,
            remote_comp_id,
            begin_string,
            heartbeat_interval: Duration::from_secs(30),
            sending_time_window: Duration::from_secs(120),
            sending_time_precision: TimestampPrecision::Millis,
            accept_seq_num_reset: true,
            max_concurrent_replays: 2,
            no_logon_timeout: Duration::from_secs(10),
            max_message_size: 1024 * 1024,
        }
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the sending time accuracy window.
    #[must_use]
    pub const fn with_sending_time_window(mut self, window: Duration) -> Self {
        self.sending_time_window = window;
        self
    }

    /// Sets the sending time precision.
    #[must_use]
    pub const fn with_sending_time_precision(mut self, precision: TimestampPrecision) -> Self {
        self.sending_time_precision = precision;
        self
    }

    /// Sets the concurrent replay limit.
    #[must_use]
    pub const fn with_max_concurrent_replays(mut self, limit: usize) -> Self {
        self.max_concurrent_replays = limit;
        self
    }

    /// Heartbeat interval in whole seconds, as carried by tag 108.
    #[must_use]
    pub fn heartbeat_interval_secs(&self) -> u64 {
        self.heartbeat_interval.as_secs()
    }
}
