//! CLI command implementations.

pub mod compact;
pub mod drop;
pub mod dump;
pub mod inspect;
pub mod verify;

use std::path::{Path, PathBuf};
use tether_engine::{FileJournal, MemoryJournal, MutationQueue, QueueOptions, SyncResult};
use tether_protocol::{JournalRecord, QueuedChange};
use tether_storage::{scan_frames, FrameDamage, SkippedRegion};
use thiserror::Error;

/// Errors reported by the commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The journal file does not exist.
    #[error("no journal found at {}", .0.display())]
    NotFound(PathBuf),

    /// Verification found problems.
    #[error("journal verification failed")]
    VerificationFailed,

    /// No queued change has the given id.
    #[error("no queued change with id {0}")]
    UnknownChange(String),
}

/// A decoded journal, read without taking the journal lock.
#[derive(Debug)]
pub struct JournalSnapshot {
    /// Raw journal bytes.
    pub bytes: Vec<u8>,
    /// Decoded records with their frame offsets.
    pub records: Vec<(u64, JournalRecord)>,
    /// Offsets of frames whose payload is not a valid record.
    pub undecodable: Vec<u64>,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// Damaged regions between valid frames.
    pub skipped: Vec<SkippedRegion>,
    /// Damage of the tail, if any.
    pub damage: Option<FrameDamage>,
}

impl JournalSnapshot {
    /// Journal size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Live changes in replay order, rebuilt from a private copy.
    pub fn live_changes(&self) -> SyncResult<Vec<QueuedChange>> {
        let copy = MemoryJournal::with_data(self.bytes.clone());
        let queue = MutationQueue::open(Box::new(copy), QueueOptions::default())?;
        Ok(queue.entries())
    }
}

/// Reads and decodes the journal at `path`.
pub fn read_journal(path: &Path) -> Result<JournalSnapshot, Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(CliError::NotFound(path.to_path_buf()).into());
    }
    let bytes = std::fs::read(path)?;
    let scan = scan_frames(&bytes);

    let mut records = Vec::with_capacity(scan.frames.len());
    let mut undecodable = Vec::new();
    for frame in &scan.frames {
        match JournalRecord::decode(&frame.payload) {
            Ok(record) => records.push((frame.offset, record)),
            Err(e) => {
                tracing::debug!(offset = frame.offset, error = %e, "undecodable record");
                undecodable.push(frame.offset);
            }
        }
    }

    Ok(JournalSnapshot {
        records,
        undecodable,
        valid_len: scan.valid_len,
        skipped: scan.skipped,
        damage: scan.damage,
        bytes,
    })
}

/// Opens the journal for writing, taking its lock.
pub fn open_queue(path: &Path) -> Result<MutationQueue, Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(CliError::NotFound(path.to_path_buf()).into());
    }
    let journal = FileJournal::open(path)?;
    Ok(MutationQueue::open(Box::new(journal), QueueOptions::default())?)
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::sample_journal;
    use super::*;

    #[test]
    fn snapshot_replays_live_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.journal");
        let live = sample_journal(&path);

        let snapshot = read_journal(&path).unwrap();
        assert_eq!(snapshot.records.len(), 4);
        assert!(snapshot.damage.is_none());
        let ids: Vec<_> = snapshot
            .live_changes()
            .unwrap()
            .into_iter()
            .map(|c| c.queue_id)
            .collect();
        assert_eq!(ids, live);
    }

    #[test]
    fn missing_journal_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_journal(&dir.path().join("absent")).unwrap_err();
        assert!(err.to_string().starts_with("no journal found"));
    }
}
