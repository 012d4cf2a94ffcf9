//! Journal records persisted by the mutation queue.
//!
//! The queue is rebuilt on startup by replaying these records in order:
//! `Enqueued` adds a change, `Attempted` updates its attempt counter and
//! `Removed` drops it.

use crate::change::{QueueId, QueuedChange};
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// A single queue journal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalRecord {
    /// A change was enqueued.
    Enqueued {
        /// The change.
        change: QueuedChange,
    },
    /// A replay attempt failed.
    Attempted {
        /// Queue id.
        queue_id: QueueId,
        /// Attempt count after the failure.
        attempts: u32,
    },
    /// A change left the queue (replayed, dropped or exhausted).
    Removed {
        /// Queue id.
        queue_id: QueueId,
    },
}

impl JournalRecord {
    /// Returns a short name of the record kind.
    pub fn kind(&self) -> &'static str {
        match self {
            JournalRecord::Enqueued { .. } => "ENQUEUED",
            JournalRecord::Attempted { .. } => "ATTEMPTED",
            JournalRecord::Removed { .. } => "REMOVED",
        }
    }

    /// Returns the queue id the record refers to.
    pub fn queue_id(&self) -> &QueueId {
        match self {
            JournalRecord::Enqueued { change } => &change.queue_id,
            JournalRecord::Attempted { queue_id, .. } | JournalRecord::Removed { queue_id } => {
                queue_id
            }
        }
    }

    /// Encodes to CBOR bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| ProtocolError::encoding_failed(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::decoding_failed(e.to_string()))
    }
}
