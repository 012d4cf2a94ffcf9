//! Synthetic responses for deferred writes.

use crate::change::QueuedChange;
use serde_json::{Map, Value};

/// Marks a response as not yet confirmed by the server.
pub const PENDING_FIELD: &str = "_pending";
/// Queue id of the deferred write.
pub const QUEUE_ID_FIELD: &str = "_queueId";
/// RFC 3339 enqueue time of the deferred write.
pub const QUEUED_AT_FIELD: &str = "_queuedAt";

/// Builds the response returned in place of a server reply when a write is
/// queued: the original payload plus `{id, _pending, _queueId, _queuedAt}`.
pub fn pending_response(change: &QueuedChange) -> Value {
    let mut body = match &change.payload {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    if let Some(id) = &change.entity_id {
        if !body.contains_key("id") {
            body.insert("id".into(), Value::String(id.clone()));
        }
    }
    body.insert(PENDING_FIELD.into(), Value::Bool(true));
    body.insert(
        QUEUE_ID_FIELD.into(),
        Value::String(change.queue_id.to_string()),
    );
    body.insert(
        QUEUED_AT_FIELD.into(),
        Value::String(change.enqueued_at.to_rfc3339()),
    );

    Value::Object(body)
}

/// Returns true if a response came from [`pending_response`].
pub fn is_pending(value: &Value) -> bool {
    value.get(PENDING_FIELD).and_then(Value::as_bool) == Some(true)
}
