/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Application callback interface.
//!
//! The embedded application implements [`Application`] to receive session
//! lifecycle events and in-order business messages. Callbacks that panic are
//! caught by the engine wrapper and reported through `on_error`; they never
//! unwind into the framer.

use async_trait::async_trait;
use bytes::Bytes;
use irongate_core::context::{DisconnectReason, SessionKey};
use irongate_core::error::GatewayError;
use irongate_core::types::{SequenceNumber, SessionId};

/// Application callback interface.
#[async_trait]
pub trait Application: Send + Sync {
    /// Called when a session becomes active on a connection.
    async fn on_session_active(&self, session_id: SessionId, key: &SessionKey);

    /// Called for every accepted inbound business message, in sequence order.
    ///
    /// `bytes` is the complete original frame; for FIX that includes the
    /// header and trailer, for FIXP the template id and payload.
    async fn on_message(&self, session_id: SessionId, seq_num: SequenceNumber, bytes: Bytes);

    /// Called when a connection is torn down.
    async fn on_disconnect(&self, session_id: SessionId, reason: DisconnectReason);

    /// Called for engine errors that cannot be attributed to one message.
    async fn on_error(&self, error: &GatewayError);
}

/// Default no-op application implementation.
#[derive(Debug, Default)]
pub struct NoOpApplication;

#[async_trait]
impl Application for NoOpApplication {
    async fn on_session_active(&self, _session_id: SessionId, _key: &SessionKey) {}

    async fn on_message(&self, _session_id: SessionId, _seq_num: SequenceNumber, _bytes: Bytes) {}

    async fn on_disconnect(&self, _session_id: SessionId, _reason: DisconnectReason) {}

    async fn on_error(&self, _error: &GatewayError) {}
}
