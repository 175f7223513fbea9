/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Engine configuration and builder.
//!
//! The builder is consumed once at startup; afterwards the engine exposes
//! read-only observers only. Validation failures surface as
//! `EngineError::ConfigInvalid` before any agent starts.

use crate::application::{Application, NoOpApplication};
use irongate_core::error::EngineError;
use irongate_fixp::acceptor::AcceptorConfig;
use irongate_index::sequence_number_index::FlushPolicy;
use irongate_session::config::SessionConfig;
use std::path::PathBuf;
use std::sync::Arc;

/// Immutable engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding every durable index file.
    pub log_file_dir: PathBuf,
    /// FIX session defaults.
    pub fix_session: SessionConfig,
    /// FIXP acceptor tuning.
    pub acceptor: AcceptorConfig,
    /// Sequence-number index flush policy.
    pub flush_policy: FlushPolicy,
    /// Replay index ring capacity in records, a power of two.
    pub replay_index_capacity: u32,
    /// Carrier stream capacity in bytes.
    pub carrier_capacity: usize,
    /// Wait for publications to complete before stopping recordings.
    pub graceful_shutdown: bool,
    /// Testing switch: skip the unconditional index flush on shutdown.
    pub flush_on_shutdown: bool,
}

impl EngineConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `EngineError::ConfigInvalid` describing the first problem.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.log_file_dir.as_os_str().is_empty() {
            return Err(EngineError::ConfigInvalid(
                "log_file_dir must not be empty".to_string(),
            ));
        }
        if !self.replay_index_capacity.is_power_of_two() {
            return Err(EngineError::ConfigInvalid(format!(
                "replay_index_capacity {} is not a power of two",
                self.replay_index_capacity
            )));
        }
        if self.carrier_capacity < 4096 {
            return Err(EngineError::ConfigInvalid(format!(
                "carrier_capacity {} is below the 4096-byte minimum",
                self.carrier_capacity
            )));
        }
        if self.acceptor.keep_alive_min_ms > self.acceptor.keep_alive_max_ms {
            return Err(EngineError::ConfigInvalid(
                "keep_alive_min_ms exceeds keep_alive_max_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for the engine configuration and application wiring.
#[derive(Debug)]
pub struct EngineConfigBuilder<A: Application = NoOpApplication> {
    application: Arc<A>,
    log_file_dir: PathBuf,
    fix_session: SessionConfig,
    acceptor: AcceptorConfig,
    flush_policy: FlushPolicy,
    replay_index_capacity: u32,
    carrier_capacity: usize,
    graceful_shutdown: bool,
    flush_on_shutdown: bool,
}

impl EngineConfigBuilder<NoOpApplication> {
    /// Creates a builder with defaults.
    #[must_use]
    pub fn new(log_file_dir: impl Into<PathBuf>, fix_session: SessionConfig) -> Self {
        Self {
            application: Arc::new(NoOpApplication),
            log_file_dir: log_file_dir.into(),
            fix_session,
            acceptor: AcceptorConfig::default(),
            flush_policy: FlushPolicy::default(),
            replay_index_capacity: 4096,
            carrier_capacity: 16 * 1024 * 1024,
            graceful_shutdown: true,
            flush_on_shutdown: true,
        }
    }
}

impl<A: Application> EngineConfigBuilder<A> {
    /// Sets the application callback handler.
    #[must_use]
    pub fn with_application<B: Application>(self, application: B) -> EngineConfigBuilder<B> {
        EngineConfigBuilder {
            application: Arc::new(application),
            log_file_dir: self.log_file_dir,
            fix_session: self.fix_session,
            acceptor: self.acceptor,
            flush_policy: self.flush_policy,
            replay_index_capacity: self.replay_index_capacity,
            carrier_capacity: self.carrier_capacity,
            graceful_shutdown: self.graceful_shutdown,
            flush_on_shutdown: self.flush_on_shutdown,
        }
    }

    /// Sets the FIXP acceptor tuning.
    #[must_use]
    pub fn with_acceptor_config(mut self, acceptor: AcceptorConfig) -> Self {
        self.acceptor = acceptor;
        self
    }

    /// Sets the sequence-number index flush policy.
    #[must_use]
    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    /// Sets the replay index ring capacity in records.
    #[must_use]
    pub const fn with_replay_index_capacity(mut self, capacity: u32) -> Self {
        self.replay_index_capacity = capacity;
        self
    }

    /// Sets the carrier stream capacity in bytes.
    #[must_use]
    pub const fn with_carrier_capacity(mut self, capacity: usize) -> Self {
        self.carrier_capacity = capacity;
        self
    }

    /// Enables or disables the graceful shutdown wait.
    #[must_use]
    pub const fn with_graceful_shutdown(mut self, enabled: bool) -> Self {
        self.graceful_shutdown = enabled;
        self
    }

    /// Testing switch: disables the unconditional flush on shutdown.
    #[must_use]
    pub const fn with_flush_on_shutdown(mut self, enabled: bool) -> Self {
        self.flush_on_shutdown = enabled;
        self
    }

    /// The application handler.
    #[must_use]
    pub fn application(&self) -> Arc<A> {
        Arc::clone(&self.application)
    }

    /// Validates and produces the configuration.
    ///
    /// # Errors
    /// Returns `EngineError::ConfigInvalid` when a setting is unusable.
    pub fn build(self) -> Result<(EngineConfig, Arc<A>), EngineError> {
        let config = EngineConfig {
            log_file_dir: self.log_file_dir,
            fix_session: self.fix_session,
            acceptor: self.acceptor,
            flush_policy: self.flush_policy,
            replay_index_capacity: self.replay_index_capacity,
            carrier_capacity: self.carrier_capacity,
            graceful_shutdown: self.graceful_shutdown,
            flush_on_shutdown: self.flush_on_shutdown,
        };
        config.validate()?;
        Ok((config, self.application))
    }
}
