//! Verify command implementation.

use super::{read_journal, CliError, JournalSnapshot};
use std::collections::HashSet;
use std::path::Path;
use tether_protocol::JournalRecord;
use tether_storage::FrameDamage;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Frames checked.
    pub frames_checked: usize,
    /// Frames holding a valid record.
    pub valid_records: usize,
    /// Problems found.
    pub errors: Vec<String>,
    /// Oddities that replay tolerates.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying journal at {:?}", path);
    println!();

    let snapshot = read_journal(path)?;
    let result = verify(&snapshot);

    println!("  Frames checked: {}", result.frames_checked);
    println!("  Valid records:  {}", result.valid_records);
    for warning in &result.warnings {
        println!("  warning: {}", warning);
    }
    for error in &result.errors {
        println!("  error: {}", error);
    }

    println!();
    if result.is_ok() {
        println!("✓ Journal verification passed");
        Ok(())
    } else {
        println!("✗ Journal verification failed");
        println!("  Run `tether compact` to drop the damaged frames.");
        Err(CliError::VerificationFailed.into())
    }
}

/// Checks frame integrity and record consistency.
pub fn verify(snapshot: &JournalSnapshot) -> VerifyResult {
    let mut result = VerifyResult {
        frames_checked: snapshot.records.len()
            + snapshot.undecodable.len()
            + snapshot.skipped.len(),
        valid_records: snapshot.records.len(),
        ..VerifyResult::default()
    };

    match snapshot.damage {
        Some(FrameDamage::Truncated { offset }) => result.errors.push(format!(
            "journal ends inside a frame at offset {} ({} bytes)",
            offset,
            snapshot.size() - snapshot.valid_len
        )),
        Some(FrameDamage::BadMagic { offset }) => {
            result.errors.push(format!("bad frame header at offset {}", offset))
        }
        Some(FrameDamage::ChecksumMismatch { offset }) => {
            result.errors.push(format!("checksum mismatch at offset {}", offset))
        }
        None => {}
    }
    for region in &snapshot.skipped {
        result.errors.push(format!(
            "damaged frame at offset {} ({} bytes skipped)",
            region.damage.offset(),
            region.len
        ));
    }
    for offset in &snapshot.undecodable {
        result
            .errors
            .push(format!("undecodable record at offset {}", offset));
    }

    let mut live = HashSet::new();
    for (offset, record) in &snapshot.records {
        match record {
            JournalRecord::Enqueued { change } => {
                if !live.insert(change.queue_id.clone()) {
                    result.warnings.push(format!(
                        "duplicate enqueue of {} at offset {}",
                        change.queue_id, offset
                    ));
                }
            }
            JournalRecord::Attempted { queue_id, .. } | JournalRecord::Removed { queue_id } => {
                if !live.contains(queue_id) {
                    result.warnings.push(format!(
                        "{} record for unknown change {} at offset {}",
                        record.kind(),
                        queue_id,
                        offset
                    ));
                }
                if matches!(record, JournalRecord::Removed { .. }) {
                    live.remove(queue_id);
                }
            }
        }
    }

    result
}
