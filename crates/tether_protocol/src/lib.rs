//! # Tether Protocol
//!
//! Data and wire types shared by the Tether sync engine.
//!
//! This crate provides:
//! - [`QueuedChange`] records for writes deferred while offline
//! - [`RouteTable`] mapping REST endpoints to entity names
//! - [`RealtimeEvent`] push envelopes and dot-namespaced event names
//! - The synthetic response returned for deferred writes
//! - [`JournalRecord`] CBOR records persisted by the mutation queue
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod error;
mod event;
mod journal;
mod response;
mod route;

pub use change::{
    entity_id_of, is_temp_id, mint_temp_id, ChangeType, NewChange, QueueId, QueuedChange,
    TEMP_ID_PREFIX,
};
pub use error::{ProtocolError, ProtocolResult};
pub use event::{EntityAction, EventName, RealtimeEvent};
pub use journal::JournalRecord;
pub use response::{
    is_pending, pending_response, PENDING_FIELD, QUEUED_AT_FIELD, QUEUE_ID_FIELD,
};
pub use route::{EndpointTarget, Route, RouteTable};

/// Header carrying the account scope on every request.
pub const ACCOUNT_HEADER: &str = "X-Account-Id";

/// Header carrying the per-change idempotency token on replayed writes.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
