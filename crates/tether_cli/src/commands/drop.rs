//! Drop command implementation.

use super::dump::describe_change;
use super::{open_queue, CliError};
use std::path::Path;
use tether_protocol::{QueueId, QueuedChange};

/// Runs the drop command.
pub fn run(path: &Path, queue_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let dropped = drop_change(path, queue_id)?;
    println!("Dropped {}", describe_change(1, &dropped).trim_start_matches(' '));
    Ok(())
}

/// Removes one queued change from the journal at `path`.
pub fn drop_change(path: &Path, queue_id: &str) -> Result<QueuedChange, Box<dyn std::error::Error>> {
    let queue = open_queue(path)?;
    queue
        .drop_change(&QueueId::from(queue_id))
        .ok_or_else(|| CliError::UnknownChange(queue_id.to_string()).into())
}
