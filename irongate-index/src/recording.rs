/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 2/8/26
******************************************************************************/

//! Recording coordinator.
//!
//! Assigns each carrier stream session to an archive recording and persists
//! the recording-id sets across restarts, so a restarted engine extends its
//! previous recordings instead of starting fresh ones. A counterparty must
//! never observe its sequence space reset because the archive rolled.
//!
//! The coordinator only manages identity. Querying a reused recording's stop
//! position and creating the publication at that position is the engine's
//! job against the (external) archive.

use crc32c::crc32c;
use irongate_core::error::IndexError;
use irongate_core::types::RecordingId;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Header magic, "RCOR".
const MAGIC: u32 = 0x5243_4F52;

/// Format version this build reads and writes.
const VERSION: u32 = 1;

/// Carrier stream direction a recording belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// Counterparty to application.
    Inbound,
    /// Application to counterparty.
    Outbound,
}

impl StreamDirection {
    const fn slot(self) -> usize {
        match self {
            Self::Inbound => 0,
            Self::Outbound => 1,
        }
    }
}

/// Outcome of acquiring a recording for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredRecording {
    /// The recording to publish into.
    pub recording_id: RecordingId,
    /// True when the id was recovered from a previous run; the publication
    /// must extend the recording at its stopped position.
    pub reused: bool,
}

/// Persistent allocator of archive recording ids.
#[derive(Debug)]
pub struct RecordingCoordinator {
    path: PathBuf,
    free: [BTreeSet<u64>; 2],
    used: [BTreeSet<u64>; 2],
    next_recording_id: u64,
}

impl RecordingCoordinator {
    /// Opens the coordinator state at `path`, starting empty when the file
    /// does not exist.
    ///
    /// # Errors
    /// Returns `IndexError::Corrupted` when an existing file fails its CRC
    /// or magic validation.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let path: PathBuf = path.into();
        let mut coordinator = Self {
            path,
            free: [BTreeSet::new(), BTreeSet::new()],
            used: [BTreeSet::new(), BTreeSet::new()],
            next_recording_id: 1,
        };

        if coordinator.path.exists() {
            let bytes = fs::read(&coordinator.path)?;
            coordinator.load(&bytes)?;
            info!(
                inbound_free = coordinator.free[0].len(),
                outbound_free = coordinator.free[1].len(),
                "recovered recording coordinator state"
            );
        }

        Ok(coordinator)
    }

    /// Hands out a recording for a new stream session.
    ///
    /// A free id from a previous run is reused and must be extended at its
    /// stopped position; otherwise a fresh id starts a new recording.
    pub fn acquire(&mut self, direction: StreamDirection) -> AcquiredRecording {
        let slot = direction.slot();
        if let Some(id) = self.free[slot].pop_first() {
            self.used[slot].insert(id);
            debug!(recording_id = id, ?direction, "reusing recording");
            return AcquiredRecording {
                recording_id: RecordingId::new(id),
                reused: true,
            };
        }

        let id = self.next_recording_id;
        self.next_recording_id += 1;
        self.used[slot].insert(id);
        debug!(recording_id = id, ?direction, "starting fresh recording");
        AcquiredRecording {
            recording_id: RecordingId::new(id),
            reused: false,
        }
    }

    /// Returns a recording to the free set when its publication closes.
    pub fn release(&mut self, direction: StreamDirection, recording_id: RecordingId) {
        let slot = direction.slot();
        if self.used[slot].remove(&recording_id.value()) {
            self.free[slot].insert(recording_id.value());
        }
    }

    /// Number of recordings currently owned by active publications.
    #[must_use]
    pub fn used_count(&self, direction: StreamDirection) -> usize {
        self.used[direction.slot()].len()
    }

    /// Number of recordings available for reuse.
    #[must_use]
    pub fn free_count(&self, direction: StreamDirection) -> usize {
        self.free[direction.slot()].len()
    }

    /// Persists `used` and `free` together via atomic rename.
    ///
    /// Called on graceful shutdown after every publication has reached its
    /// completion position; a restart then finds every recording reusable.
    ///
    /// # Errors
    /// Returns `IndexError::Io` on filesystem failures.
    pub fn save(&self) -> Result<(), IndexError> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&self.next_recording_id.to_le_bytes());

        for slot in 0..2 {
            let all: BTreeSet<u64> = self.free[slot]
                .iter()
                .chain(self.used[slot].iter())
                .copied()
                .collect();
            buf.extend_from_slice(&(all.len() as u32).to_le_bytes());
            for id in all {
                buf.extend_from_slice(&id.to_le_bytes());
            }
        }

        let crc = crc32c(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        let tmp = self.path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;
        sync_parent_dir(&self.path)?;
        Ok(())
    }

    /// Forgets all recordings and removes the state file.
    ///
    /// # Errors
    /// Returns `IndexError::Io` when the file cannot be removed.
    pub fn reset(&mut self) -> Result<(), IndexError> {
        self.free = [BTreeSet::new(), BTreeSet::new()];
        self.used = [BTreeSet::new(), BTreeSet::new()];
        self.next_recording_id = 1;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn load(&mut self, bytes: &[u8]) -> Result<(), IndexError> {
        let corrupted = |reason: String| IndexError::Corrupted {
            path: self.path.display().to_string(),
            reason,
        };

        if bytes.len() < 24 {
            return Err(corrupted(format!("file too small: {} bytes", bytes.len())));
        }

        let (payload, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes(crc_bytes.try_into().unwrap_or_default());
        let computed = crc32c(payload);
        if stored != computed {
            return Err(corrupted(format!(
                "crc mismatch: stored {:#010x}, computed {:#010x}",
                stored, computed
            )));
        }

        let magic = u32::from_le_bytes(payload[0..4].try_into().unwrap_or_default());
        if magic != MAGIC {
            return Err(corrupted(format!("bad magic {:#010x}", magic)));
        }
        let version = u32::from_le_bytes(payload[4..8].try_into().unwrap_or_default());
        if version != VERSION {
            return Err(IndexError::UnsupportedVersion {
                path: self.path.display().to_string(),
                got: version,
                supported: VERSION,
            });
        }
        self.next_recording_id =
            u64::from_le_bytes(payload[8..16].try_into().unwrap_or_default());

        let mut offset = 16;
        for slot in 0..2 {
            if payload.len() < offset + 4 {
                return Err(corrupted("truncated id list".to_string()));
            }
            let count =
                u32::from_le_bytes(payload[offset..offset + 4].try_into().unwrap_or_default())
                    as usize;
            offset += 4;
            if payload.len() < offset + count * 8 {
                return Err(corrupted("truncated id list".to_string()));
            }
            for _ in 0..count {
                let id =
                    u64::from_le_bytes(payload[offset..offset + 8].try_into().unwrap_or_default());
                self.free[slot].insert(id);
                offset += 8;
            }
        }

        Ok(())
    }
}

fn sync_parent_dir(path: &Path) -> Result<(), IndexError> {
    if let Some(parent) = path.parent() {
        let dir = OpenOptions::new().read(true).open(parent)?;
        dir.sync_all()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fresh_acquire_allocates_new_ids() {
        let dir = TempDir::new().unwrap();
        let mut coordinator =
            RecordingCoordinator::open(dir.path().join("recording_coordinator")).unwrap();

        let a = coordinator.acquire(StreamDirection::Inbound);
        let b = coordinator.acquire(StreamDirection::Outbound);
        assert!(!a.reused);
        assert!(!b.reused);
        assert_ne!(a.recording_id, b.recording_id);
        assert_eq!(coordinator.used_count(StreamDirection::Inbound), 1);
    }

    #[test]
    fn test_recordings_reused_across_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recording_coordinator");

        let mut coordinator = RecordingCoordinator::open(&path).unwrap();
        let first = coordinator.acquire(StreamDirection::Outbound);
        coordinator.save().unwrap();
        drop(coordinator);

        let mut restarted = RecordingCoordinator::open(&path).unwrap();
        assert_eq!(restarted.free_count(StreamDirection::Outbound), 1);
        let again = restarted.acquire(StreamDirection::Outbound);
        assert!(again.reused);
        assert_eq!(again.recording_id, first.recording_id);
    }

    #[test]
    fn test_save_persists_used_and_free_together() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recording_coordinator");

        let mut coordinator = RecordingCoordinator::open(&path).unwrap();
        let active = coordinator.acquire(StreamDirection::Inbound);
        let released = coordinator.acquire(StreamDirection::Inbound);
        coordinator.release(StreamDirection::Inbound, released.recording_id);
        coordinator.save().unwrap();
        drop(coordinator);

        let restarted = RecordingCoordinator::open(&path).unwrap();
        assert_eq!(restarted.free_count(StreamDirection::Inbound), 2);
        let _ = active;
    }

    #[test]
    fn test_fresh_ids_do_not_collide_after_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recording_coordinator");

        let mut coordinator = RecordingCoordinator::open(&path).unwrap();
        let a = coordinator.acquire(StreamDirection::Inbound);
        coordinator.save().unwrap();
        drop(coordinator);

        let mut restarted = RecordingCoordinator::open(&path).unwrap();
        let reused = restarted.acquire(StreamDirection::Inbound);
        let fresh = restarted.acquire(StreamDirection::Inbound);
        assert_eq!(reused.recording_id, a.recording_id);
        assert_ne!(fresh.recording_id, a.recording_id);
    }

    #[test]
    fn test_corrupt_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recording_coordinator");

        let mut coordinator = RecordingCoordinator::open(&path).unwrap();
        coordinator.acquire(StreamDirection::Inbound);
        coordinator.save().unwrap();
        drop(coordinator);

        let mut bytes = fs::read(&path).unwrap();
        bytes[8] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            RecordingCoordinator::open(&path),
            Err(IndexError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_reset_removes_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recording_coordinator");

        let mut coordinator = RecordingCoordinator::open(&path).unwrap();
        coordinator.acquire(StreamDirection::Inbound);
        coordinator.save().unwrap();
        coordinator.reset().unwrap();
        assert!(!path.exists());

        let fresh = coordinator.acquire(StreamDirection::Inbound);
        assert!(!fresh.reused);
        assert_eq!(fresh.recording_id.value(), 1);
    }
}
