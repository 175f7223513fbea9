/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Admin operations.
//!
//! These are the RPCs a host exposes verbatim on the running engine:
//! sequence resets, session id resets with a backup, session lookup and
//! enumeration, and archive pruning driven by the replay index's
//! start-position scan.

use crate::framer::Framer;
use crate::indexer::Indexer;
use irongate_core::context::{SessionContext, SessionKey};
use irongate_core::error::IndexError;
use irongate_core::types::{RecordingId, SessionId, StreamPosition};
use irongate_index::query::StartPositionScan;
use irongate_index::replay_index::ReplayIndexReader;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Admin surface over the running engine's agents.
#[derive(Debug)]
pub struct GatewayAdmin<'a> {
    framer: &'a mut Framer,
    indexer: &'a mut Indexer,
}

impl<'a> GatewayAdmin<'a> {
    /// Creates the admin surface.
    #[must_use]
    pub fn new(framer: &'a mut Framer, indexer: &'a mut Indexer) -> Self {
        Self { framer, indexer }
    }

    /// Resets one session's sequence numbers, opening a new sequence index.
    pub fn reset_sequence_number(&mut self, session_id: SessionId) {
        self.indexer.sequence_numbers_mut().reset_session(session_id);
    }

    /// Wipes the sequence-number index for every session.
    ///
    /// # Errors
    /// Returns `IndexError::Io` when the index files cannot be removed.
    pub fn reset_sequence_numbers(&mut self) -> Result<(), IndexError> {
        self.indexer
            .sequence_numbers_mut()
            .reset_sequence_numbers()?;
        info!("sequence numbers reset");
        Ok(())
    }

    /// Forgets every session identity, parking the old index files under
    /// `backup_dir`.
    ///
    /// # Errors
    /// Returns `IndexError::Io` when files cannot be moved.
    pub fn reset_session_ids(&mut self, backup_dir: &Path) -> Result<(), IndexError> {
        fs::create_dir_all(backup_dir)?;

        let log_dir = self.indexer.log_file_dir().to_path_buf();
        for entry in fs::read_dir(&log_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if name_str.starts_with("sequence_number_index")
                || name_str.starts_with("replay_index_")
                || name_str == "recording_coordinator"
            {
                fs::rename(entry.path(), backup_dir.join(&name))?;
            }
        }

        self.indexer
            .sequence_numbers_mut()
            .reset_sequence_numbers()?;
        self.indexer.recordings_mut().reset()?;
        self.framer.registry_mut().reset();
        info!(backup = %backup_dir.display(), "session ids reset");
        Ok(())
    }

    /// Resolves a FIX comp id pair to its session id.
    #[must_use]
    pub fn lookup_session_id(&self, local: &str, remote: &str) -> Option<SessionId> {
        self.framer.registry().lookup_session_id(local, remote)
    }

    /// Enumerates every registered session.
    #[must_use]
    pub fn all_sessions(&self) -> Vec<(SessionKey, SessionContext)> {
        self.framer.registry().all_sessions()
    }

    /// Computes the earliest position still needed per archive recording.
    ///
    /// Scans every replay index under the log directory, keeping only
    /// entries of each session's highest sequence index. `floor_positions`
    /// caps how far pruning may go: a recording never advances past its
    /// provided floor. The operation is idempotent.
    ///
    /// # Errors
    /// Returns `IndexError` when an index cannot be read. A lapped scan of
    /// one index skips that index and is collected as a diagnostic.
    pub fn prune_archive(
        &mut self,
        floor_positions: Option<&HashMap<RecordingId, StreamPosition>>,
    ) -> Result<HashMap<RecordingId, StreamPosition>, IndexError> {
        let mut starts: HashMap<RecordingId, StreamPosition> = HashMap::new();
        let log_dir = self.indexer.log_file_dir().to_path_buf();

        for entry in fs::read_dir(&log_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with("replay_index_") {
                continue;
            }

            let reader = ReplayIndexReader::open(entry.path())?;
            match StartPositionScan::new(&reader).scan() {
                Ok(session_starts) => {
                    for (recording_id, position) in session_starts {
                        starts
                            .entry(recording_id)
                            .and_modify(|p| *p = (*p).min(position))
                            .or_insert(position);
                    }
                }
                Err(IndexError::Lapped { .. }) => {
                    // An actively written ring overtook the scan; this
                    // session contributes nothing to pruning this round.
                    warn!(path = %entry.path().display(), "start position scan lapped");
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(floors) = floor_positions {
            for (recording_id, start) in &mut starts {
                if let Some(floor) = floors.get(recording_id) {
                    *start = (*start).min(*floor);
                }
            }
        }

        info!(recordings = starts.len(), "archive prune computed");
        Ok(starts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::{CarrierStream, INBOUND_STREAM_ID, OUTBOUND_STREAM_ID};
    use irongate_core::types::{CompId, SequenceIndex, SequenceNumber};
    use irongate_fixp::acceptor::AcceptorConfig;
    use irongate_index::sequence_number_index::FlushPolicy;
    use irongate_session::config::SessionConfig;
    use tempfile::TempDir;

    fn components(dir: &TempDir) -> (Framer, Indexer, CarrierStream, CarrierStream) {
        let inbound = CarrierStream::new(INBOUND_STREAM_ID, 1 << 20);
        let outbound = CarrierStream::new(OUTBOUND_STREAM_ID, 1 << 20);
        let framer = Framer::new(
            SessionConfig::new(
                CompId::new("ACC").unwrap(),
                CompId::new("INIT").unwrap(),
                "FIX.4.4",
            ),
            AcceptorConfig::default(),
            inbound.clone(),
            outbound.clone(),
        );
        let indexer = Indexer::open(
            dir.path(),
            inbound.clone(),
            outbound.clone(),
            FlushPolicy::default(),
            64,
        )
        .unwrap();
        (framer, indexer, inbound, outbound)
    }

    fn publish(stream: &CarrierStream, session: u64, index: u32, seq: u32, payload: &[u8]) {
        let mut claim = stream
            .try_claim(
                SessionId::new(session),
                SequenceIndex::new(index),
                SequenceNumber::new(seq),
                false,
                payload.len(),
            )
            .unwrap();
        claim.buffer().copy_from_slice(payload);
        let _ = claim.commit();
    }

    #[test]
    fn test_reset_sequence_numbers_forgets_everything() {
        let dir = TempDir::new().unwrap();
        let (mut framer, mut indexer, inbound, _outbound) = components(&dir);

        publish(&inbound, 1, 0, 7, b"order");
        indexer.do_work().unwrap();
        assert!(
            indexer
                .sequence_numbers()
                .last_known_sequence_number(SessionId::new(1))
                .is_some()
        );

        let mut admin = GatewayAdmin::new(&mut framer, &mut indexer);
        admin.reset_sequence_numbers().unwrap();
        assert_eq!(
            indexer
                .sequence_numbers()
                .last_known_sequence_number(SessionId::new(1)),
            None
        );
    }

    #[test]
    fn test_prune_archive_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (mut framer, mut indexer, _inbound, outbound) = components(&dir);

        // Old sequence space, then a renegotiated one.
        publish(&outbound, 1, 0, 1, b"old-1");
        publish(&outbound, 1, 0, 2, b"old-2");
        publish(&outbound, 1, 1, 1, b"new-1");
        indexer.do_work().unwrap();

        let mut admin = GatewayAdmin::new(&mut framer, &mut indexer);
        let first = admin.prune_archive(None).unwrap();
        let second = admin.prune_archive(None).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);

        // Only the renegotiated space's start survives.
        let start = first.values().next().unwrap();
        assert_eq!(start.value(), 128); // two 64-byte records precede it
    }

    #[test]
    fn test_prune_archive_respects_floor() {
        let dir = TempDir::new().unwrap();
        let (mut framer, mut indexer, _inbound, outbound) = components(&dir);

        publish(&outbound, 1, 0, 1, b"old");
        publish(&outbound, 1, 1, 1, b"new");
        indexer.do_work().unwrap();

        let mut admin = GatewayAdmin::new(&mut framer, &mut indexer);
        let unbounded = admin.prune_archive(None).unwrap();
        let (recording, start) = unbounded.iter().next().unwrap();
        assert!(start.value() > 0);

        let mut floors = HashMap::new();
        floors.insert(*recording, StreamPosition::new(0));
        let floored = admin.prune_archive(Some(&floors)).unwrap();
        assert_eq!(floored[recording].value(), 0);
    }

    #[test]
    fn test_reset_session_ids_moves_files_to_backup() {
        let dir = TempDir::new().unwrap();
        let backup = TempDir::new().unwrap();
        let (mut framer, mut indexer, inbound, _outbound) = components(&dir);

        publish(&inbound, 1, 0, 1, b"order");
        indexer.do_work().unwrap();
        indexer.sequence_numbers_mut().flush().unwrap();

        let mut admin = GatewayAdmin::new(&mut framer, &mut indexer);
        admin.reset_session_ids(backup.path()).unwrap();

        assert!(backup.path().join("sequence_number_index").exists());
        assert!(!dir.path().join("sequence_number_index").exists());
        assert!(framer.registry().all_sessions().is_empty());
    }
}
