//! Push channel envelopes.

use crate::change::entity_id_of;
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// An inbound push message: `{type, data?}`.
///
/// Events are transient; they are never persisted and each one is handled
/// exactly once, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// Dot-namespaced event type, e.g. `chore.updated`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RealtimeEvent {
    /// Creates an event.
    pub fn new(event_type: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Decodes a text frame.
    ///
    /// Anything that is not a JSON object with a non-empty string `type` and
    /// an optional object `data` is rejected.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::InvalidEnvelope(format!("not JSON: {e}")))?;

        let Value::Object(mut map) = value else {
            return Err(ProtocolError::InvalidEnvelope("not an object".into()));
        };

        let event_type = match map.remove("type") {
            Some(Value::String(t)) if !t.is_empty() => t,
            _ => return Err(ProtocolError::InvalidEnvelope("missing type".into())),
        };

        let data = match map.remove("data") {
            None | Some(Value::Null) => None,
            Some(data @ Value::Object(_)) => Some(data),
            Some(_) => {
                return Err(ProtocolError::InvalidEnvelope(format!(
                    "data of {event_type} is not an object"
                )))
            }
        };

        Ok(Self { event_type, data })
    }

    /// Splits the type into namespace and action.
    pub fn name(&self) -> Option<EventName<'_>> {
        EventName::parse(&self.event_type)
    }

    /// Returns the `id` carried in `data`, if any.
    pub fn entity_id(&self) -> Option<String> {
        self.data.as_ref().and_then(entity_id_of)
    }
}

/// A parsed `namespace.action` event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventName<'a> {
    /// Part before the first dot (usually the entity).
    pub namespace: &'a str,
    /// Everything after the first dot.
    pub action: &'a str,
}

impl<'a> EventName<'a> {
    /// Parses a dot-namespaced type. Returns `None` if there is no dot or
    /// either side is empty.
    pub fn parse(event_type: &'a str) -> Option<Self> {
        let (namespace, action) = event_type.split_once('.')?;
        if namespace.is_empty() || action.is_empty() {
            return None;
        }
        Some(Self { namespace, action })
    }

    /// Returns the action as an [`EntityAction`].
    pub fn entity_action(&self) -> EntityAction {
        EntityAction::from_action(self.action)
    }
}

/// Reconciliation action of an entity event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityAction {
    /// `created`: append if absent.
    Created,
    /// `updated`: replace in place if present.
    Updated,
    /// `deleted`: remove by id.
    Deleted,
    /// Any other action.
    Other(String),
}

impl EntityAction {
    /// Maps an action string.
    pub fn from_action(action: &str) -> Self {
        match action {
            "created" => EntityAction::Created,
            "updated" => EntityAction::Updated,
            "deleted" => EntityAction::Deleted,
            other => EntityAction::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EntityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityAction::Created => f.write_str("created"),
            EntityAction::Updated => f.write_str("updated"),
            EntityAction::Deleted => f.write_str("deleted"),
            EntityAction::Other(action) => f.write_str(action),
        }
    }
}
