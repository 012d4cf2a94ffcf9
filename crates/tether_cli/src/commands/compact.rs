//! Compact command implementation.

use super::{format_size, open_queue, read_journal};
use std::path::Path;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Records before compaction.
    pub records_before: usize,
    /// Live changes kept.
    pub live_changes: usize,
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction.
    pub bytes_after: u64,
}

/// Runs the compact command.
///
/// Reopening the journal truncates a damaged tail and drops damaged frames,
/// so this also repairs journals that fail `verify`.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting journal at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = if dry_run { plan(path)? } else { compact(path)? };

    println!("  Records before: {}", stats.records_before);
    println!("  Live changes:   {}", stats.live_changes);
    println!();
    println!("  Size before: {}", format_size(stats.bytes_before));
    println!("  Size after:  {}", format_size(stats.bytes_after));
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(stats.bytes_before.saturating_sub(stats.bytes_after)),
        if stats.bytes_before > 0 {
            (stats.bytes_before.saturating_sub(stats.bytes_after) as f64
                / stats.bytes_before as f64)
                * 100.0
        } else {
            0.0
        }
    );

    if !dry_run {
        println!();
        println!("✓ Compaction complete");
    }
    Ok(())
}

/// Computes what a compaction would do without writing.
pub fn plan(path: &Path) -> Result<CompactStats, Box<dyn std::error::Error>> {
    let snapshot = read_journal(path)?;
    let live = snapshot.live_changes()?;
    let after = super::inspect::inspect(path, &snapshot)?.valid_size;
    Ok(CompactStats {
        records_before: snapshot.records.len(),
        live_changes: live.len(),
        bytes_before: snapshot.size(),
        bytes_after: after,
    })
}

/// Rewrites the journal to hold only live changes.
pub fn compact(path: &Path) -> Result<CompactStats, Box<dyn std::error::Error>> {
    let snapshot = read_journal(path)?;
    let queue = open_queue(path)?;
    queue.compact()?;
    Ok(CompactStats {
        records_before: snapshot.records.len(),
        live_changes: queue.len(),
        bytes_before: snapshot.size(),
        bytes_after: queue.journal_size()?,
    })
}
