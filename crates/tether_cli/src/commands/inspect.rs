//! Inspect command implementation.

use super::{format_size, read_journal, JournalSnapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tether_protocol::{JournalRecord, QueuedChange};
use tether_storage::FRAME_HEADER_SIZE;

/// Journal inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Journal size in bytes.
    pub size: u64,
    /// Bytes that a compaction would keep.
    pub valid_size: u64,
    /// Records by kind.
    pub records: BTreeMap<&'static str, usize>,
    /// Frames whose payload could not be decoded.
    pub undecodable_records: usize,
    /// Offset of the damaged tail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub damage_offset: Option<u64>,
    /// Bytes of damaged frames between valid ones.
    pub skipped_bytes: u64,
    /// Changes waiting to be replayed.
    pub pending: usize,
    /// Pending changes per entity.
    pub entities: BTreeMap<String, usize>,
    /// Pending changes that already failed at least once.
    pub retried: usize,
    /// Highest attempt count among pending changes.
    pub max_attempts: u32,
    /// Enqueue time of the oldest pending change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest: Option<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = read_journal(path)?;
    let result = inspect(path, &snapshot)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Summarizes a journal snapshot.
pub fn inspect(
    path: &Path,
    snapshot: &JournalSnapshot,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let mut records = BTreeMap::new();
    for (_, record) in &snapshot.records {
        *records.entry(record.kind()).or_insert(0) += 1;
    }

    let live = snapshot.live_changes()?;
    let mut entities = BTreeMap::new();
    for change in &live {
        *entities.entry(change.entity.clone()).or_insert(0) += 1;
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        size: snapshot.size(),
        valid_size: compacted_size(&live),
        records,
        undecodable_records: snapshot.undecodable.len(),
        damage_offset: snapshot.damage.map(|d| d.offset()),
        skipped_bytes: snapshot.skipped.iter().map(|r| r.len).sum(),
        pending: live.len(),
        entities,
        retried: live.iter().filter(|c| c.attempts > 0).count(),
        max_attempts: live.iter().map(|c| c.attempts).max().unwrap_or(0),
        oldest: live.first().map(|c| c.enqueued_at.to_rfc3339()),
    })
}

fn compacted_size(live: &[QueuedChange]) -> u64 {
    live.iter()
        .cloned()
        .filter_map(|change| JournalRecord::Enqueued { change }.encode().ok())
        .map(|payload| (FRAME_HEADER_SIZE + payload.len()) as u64)
        .sum()
}

fn print_text_output(result: &InspectResult) {
    println!("Tether Queue Journal");
    println!("====================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Storage:");
    println!("  Journal size:   {}", format_size(result.size));
    println!("  After compact:  {}", format_size(result.valid_size));
    if let Some(offset) = result.damage_offset {
        println!("  Damaged from:   offset {}", offset);
    }
    if result.skipped_bytes > 0 {
        println!("  Damaged frames: {}", format_size(result.skipped_bytes));
    }
    println!();
    println!("Records:");
    for (kind, count) in &result.records {
        println!("  {:<10} {}", kind, count);
    }
    if result.undecodable_records > 0 {
        println!("  UNDECODABLE {}", result.undecodable_records);
    }
    println!();
    println!("Queue:");
    println!("  Pending changes: {}", result.pending);
    println!("  Retried:         {}", result.retried);
    println!("  Max attempts:    {}", result.max_attempts);
    if let Some(oldest) = &result.oldest {
        println!("  Oldest:          {}", oldest);
    }

    if !result.entities.is_empty() {
        println!();
        println!("Entities:");
        for (entity, count) in &result.entities {
            println!("  {:<16} {}", entity, count);
        }
    }
}
