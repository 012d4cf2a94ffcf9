//! Queued changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Prefix of locally minted entity ids that the server has not assigned yet.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Type of a deferred write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    /// Entity was created.
    Create,
    /// Entity was updated.
    Update,
    /// Entity was deleted.
    Delete,
}

impl ChangeType {
    /// Maps an HTTP method to a change type.
    ///
    /// Returns `None` for read methods.
    pub fn from_method(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "POST" => Some(ChangeType::Create),
            "PUT" | "PATCH" => Some(ChangeType::Update),
            "DELETE" => Some(ChangeType::Delete),
            _ => None,
        }
    }

    /// Upper-case name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "CREATE",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier of a queued change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(String);

impl QueueId {
    /// Generates a fresh random queue id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for QueueId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A write that has not been queued yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChange {
    /// Change type.
    pub change_type: ChangeType,
    /// Entity name (e.g. `chore`).
    pub entity: String,
    /// Server id of the entity, if known.
    pub entity_id: Option<String>,
    /// Request body.
    pub payload: Value,
    /// Original endpoint, kept so replay hits the same path.
    pub endpoint: Option<String>,
}

impl NewChange {
    /// Creates a CREATE change.
    pub fn create(entity: impl Into<String>, payload: Value) -> Self {
        Self {
            change_type: ChangeType::Create,
            entity: entity.into(),
            entity_id: None,
            payload,
            endpoint: None,
        }
    }

    /// Creates an UPDATE change.
    pub fn update(entity: impl Into<String>, entity_id: impl Into<String>, payload: Value) -> Self {
        Self {
            change_type: ChangeType::Update,
            entity: entity.into(),
            entity_id: Some(entity_id.into()),
            payload,
            endpoint: None,
        }
    }

    /// Creates a DELETE change.
    pub fn delete(entity: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            change_type: ChangeType::Delete,
            entity: entity.into(),
            entity_id: Some(entity_id.into()),
            payload: Value::Null,
            endpoint: None,
        }
    }

    /// Records the endpoint the write was originally issued against.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// A durable record of a write awaiting replay.
///
/// # Invariants
///
/// - `queue_id` is unique within a queue
/// - Replay order is enqueue order; changes to the same entity are never
///   collapsed or reordered
/// - After construction `entity_id` is always set (a temporary id is minted
///   for creates the server has not seen)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedChange {
    /// Unique queue id.
    pub queue_id: QueueId,
    /// Change type.
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Entity name.
    pub entity: String,
    /// Entity id (server id or temporary id).
    pub entity_id: Option<String>,
    /// Request body.
    pub payload: Value,
    /// When the change was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Number of failed replay attempts.
    pub attempts: u32,
    /// Original endpoint, if the write came through the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl QueuedChange {
    /// Builds a queued record from a new change.
    ///
    /// Creates without an id get a temporary id, which is also written into
    /// the payload under `id` so optimistic UI and replay see the same value.
    pub fn from_new(change: NewChange, enqueued_at: DateTime<Utc>) -> Self {
        let NewChange {
            change_type,
            entity,
            mut entity_id,
            mut payload,
            endpoint,
        } = change;

        if entity_id.is_none() {
            entity_id = entity_id_of(&payload);
        }

        if change_type == ChangeType::Create && entity_id.is_none() {
            let temp_id = mint_temp_id();
            match &mut payload {
                Value::Object(map) => {
                    map.insert("id".into(), Value::String(temp_id.clone()));
                }
                Value::Null => {
                    let mut map = Map::new();
                    map.insert("id".into(), Value::String(temp_id.clone()));
                    payload = Value::Object(map);
                }
                _ => {}
            }
            entity_id = Some(temp_id);
        }

        Self {
            queue_id: QueueId::generate(),
            change_type,
            entity,
            entity_id,
            payload,
            enqueued_at,
            attempts: 0,
            endpoint,
        }
    }

    /// Returns true if the entity id was minted locally.
    pub fn has_temp_id(&self) -> bool {
        self.entity_id.as_deref().is_some_and(is_temp_id)
    }
}

/// Mints a temporary, locally-unique entity id.
pub fn mint_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4().simple())
}

/// Returns true for ids produced by [`mint_temp_id`].
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Extracts the `id` field of an entity as a string key.
///
/// Numeric and string ids compare equal when they print the same, so
/// `{"id": 1}` and `{"id": "1"}` refer to the same entity.
pub fn entity_id_of(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_type_methods() {
        assert_eq!(ChangeType::from_method("post"), Some(ChangeType::Create));
        assert_eq!(ChangeType::from_method("PATCH"), Some(ChangeType::Update));
        assert_eq!(ChangeType::from_method("PUT"), Some(ChangeType::Update));
        assert_eq!(ChangeType::from_method("DELETE"), Some(ChangeType::Delete));
        assert_eq!(ChangeType::from_method("GET"), None);

        assert_eq!(ChangeType::Create.to_string(), "CREATE");
    }

    #[test]
    fn create_without_id_mints_temp_id() {
        let change = QueuedChange::from_new(
            NewChange::create("chore", json!({"name": "Take out trash"})),
            Utc::now(),
        );

        let id = change.entity_id.clone().unwrap();
        assert!(is_temp_id(&id));
        assert!(change.has_temp_id());
        assert_eq!(change.payload["id"], json!(id));
        assert_eq!(change.payload["name"], json!("Take out trash"));
        assert_eq!(change.attempts, 0);
    }

    #[test]
    fn create_with_payload_id_keeps_it() {
        let change = QueuedChange::from_new(
            NewChange::create("chore", json!({"id": 42, "name": "x"})),
            Utc::now(),
        );
        assert_eq!(change.entity_id.as_deref(), Some("42"));
        assert!(!change.has_temp_id());
    }

    #[test]
    fn delete_keeps_null_payload() {
        let change = QueuedChange::from_new(NewChange::delete("chore", "7"), Utc::now());
        assert_eq!(change.payload, Value::Null);
        assert_eq!(change.entity_id.as_deref(), Some("7"));
    }

    #[test]
    fn queue_ids_are_unique() {
        let a = QueueId::generate();
        let b = QueueId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn entity_id_normalization() {
        assert_eq!(entity_id_of(&json!({"id": 1})), Some("1".into()));
        assert_eq!(entity_id_of(&json!({"id": "1"})), Some("1".into()));
        assert_eq!(entity_id_of(&json!({"id": null})), None);
        assert_eq!(entity_id_of(&json!([1, 2])), None);
    }

    #[test]
    fn serializes_camel_case() {
        let change = QueuedChange::from_new(NewChange::update("chore", "3", json!({})), Utc::now());
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["type"], json!("UPDATE"));
        assert!(value.get("queueId").is_some());
        assert!(value.get("enqueuedAt").is_some());
        assert!(value.get("endpoint").is_none());
    }
}
