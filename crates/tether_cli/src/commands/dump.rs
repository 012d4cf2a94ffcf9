//! Dump command implementation.

use super::read_journal;
use serde::Serialize;
use std::path::Path;
use tether_protocol::{JournalRecord, QueuedChange};

/// One raw journal record with its position.
#[derive(Debug, Serialize)]
pub struct RecordEntry<'a> {
    /// Frame offset in the journal.
    pub offset: u64,
    /// The record.
    pub record: &'a JournalRecord,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    records: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = read_journal(path)?;
    let limit = limit.unwrap_or(usize::MAX);

    if records {
        let entries: Vec<RecordEntry<'_>> = snapshot
            .records
            .iter()
            .take(limit)
            .map(|(offset, record)| RecordEntry {
                offset: *offset,
                record,
            })
            .collect();
        match format {
            "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
            _ => {
                for entry in &entries {
                    println!("{}", describe_record(entry.offset, entry.record));
                }
                println!();
                println!("{} of {} records", entries.len(), snapshot.records.len());
            }
        }
        return Ok(());
    }

    let live = snapshot.live_changes()?;
    let shown: Vec<&QueuedChange> = live.iter().take(limit).collect();
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&shown)?),
        _ => {
            for (position, change) in shown.iter().enumerate() {
                println!("{}", describe_change(position + 1, change));
            }
            println!();
            println!("{} of {} pending changes", shown.len(), live.len());
        }
    }
    Ok(())
}

/// One-line description of a queued change.
pub fn describe_change(position: usize, change: &QueuedChange) -> String {
    let target = match (&change.endpoint, &change.entity_id) {
        (Some(endpoint), _) => endpoint.clone(),
        (None, Some(id)) => format!("{}/{}", change.entity, id),
        (None, None) => change.entity.clone(),
    };
    let mut line = format!(
        "{:>4}. {} {:<6} {} (queued {})",
        position,
        change.queue_id,
        change.change_type.as_str(),
        target,
        change.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
    );
    if change.attempts > 0 {
        line.push_str(&format!(", {} failed attempts", change.attempts));
    }
    line
}

fn describe_record(offset: u64, record: &JournalRecord) -> String {
    match record {
        JournalRecord::Enqueued { change } => format!(
            "@{:<8} {:<9} {} {} {}",
            offset,
            record.kind(),
            change.queue_id,
            change.change_type.as_str(),
            change.entity
        ),
        JournalRecord::Attempted { queue_id, attempts } => format!(
            "@{:<8} {:<9} {} attempts={}",
            offset,
            record.kind(),
            queue_id,
            attempts
        ),
        JournalRecord::Removed { queue_id } => {
            format!("@{:<8} {:<9} {}", offset, record.kind(), queue_id)
        }
    }
}
