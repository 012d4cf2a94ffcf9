//! Locally displayed entity collections.
//!
//! An [`EntityCollection`] is the in-memory list a screen renders. Push
//! events reconcile it item by item; a [`CollectionRegistry`] refetches it
//! wholesale from the server.

use crate::error::{SyncError, SyncResult};
use crate::gateway::SyncGateway;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tether_protocol::entity_id_of;
use tokio::sync::watch;

/// Reconciliation target for one entity type.
pub trait EntityStore: Send + Sync {
    /// Entity name, e.g. `chore`.
    fn entity(&self) -> &str;

    /// Appends `item` unless an item with the same id exists.
    fn apply_created(&self, item: &Value) -> bool;

    /// Replaces the item with the same id; does nothing if absent.
    fn apply_updated(&self, item: &Value) -> bool;

    /// Removes the item with `id`. Idempotent.
    fn apply_deleted(&self, id: &str) -> bool;

    /// Replaces every item.
    fn replace_all(&self, items: Vec<Value>);
}

/// Refetches collections from the server.
#[async_trait]
pub trait Refetcher: Send + Sync {
    /// Refetches one collection. Returns the new item count.
    async fn refetch(&self, entity: &str) -> SyncResult<usize>;

    /// Refetches every primary collection.
    async fn refetch_primary(&self) -> SyncResult<()>;
}

/// An in-memory list of JSON items keyed by their `id` field.
#[derive(Debug)]
pub struct EntityCollection {
    entity: String,
    endpoint: String,
    items: RwLock<Vec<Value>>,
    revision: watch::Sender<u64>,
}

impl EntityCollection {
    /// Creates an empty collection loaded from `endpoint`.
    pub fn new(entity: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let (revision, _rx) = watch::channel(0);
        Self {
            entity: entity.into(),
            endpoint: endpoint.into(),
            items: RwLock::new(Vec::new()),
            revision,
        }
    }

    /// Endpoint the collection is loaded from.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Snapshot of the items.
    pub fn items(&self) -> Vec<Value> {
        self.items.read().clone()
    }

    /// Looks up an item by id.
    pub fn get(&self, id: &str) -> Option<Value> {
        self.items
            .read()
            .iter()
            .find(|item| entity_id_of(item).as_deref() == Some(id))
            .cloned()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the items. Used to restore optimistic snapshots.
    pub fn set_items(&self, items: Vec<Value>) {
        *self.items.write() = items;
        self.bump();
    }

    /// Inserts or replaces an item locally (optimistic mutation).
    pub fn upsert_local(&self, item: Value) {
        {
            let mut items = self.items.write();
            let id = entity_id_of(&item);
            match items
                .iter_mut()
                .find(|existing| id.is_some() && entity_id_of(existing) == id)
            {
                Some(existing) => *existing = item,
                None => items.push(item),
            }
        }
        self.bump();
    }

    /// Removes an item locally (optimistic mutation).
    pub fn remove_local(&self, id: &str) -> bool {
        self.apply_deleted(id)
    }

    /// Watches the revision counter, bumped on every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}

impl EntityStore for EntityCollection {
    fn entity(&self) -> &str {
        &self.entity
    }

    fn apply_created(&self, item: &Value) -> bool {
        let Some(id) = entity_id_of(item) else {
            tracing::warn!(entity = %self.entity, "created event without id ignored");
            return false;
        };
        {
            let mut items = self.items.write();
            if items.iter().any(|i| entity_id_of(i).as_deref() == Some(id.as_str())) {
                return false;
            }
            items.push(item.clone());
        }
        self.bump();
        true
    }

    fn apply_updated(&self, item: &Value) -> bool {
        let Some(id) = entity_id_of(item) else {
            tracing::warn!(entity = %self.entity, "updated event without id ignored");
            return false;
        };
        {
            let mut items = self.items.write();
            let Some(existing) = items
                .iter_mut()
                .find(|i| entity_id_of(i).as_deref() == Some(id.as_str()))
            else {
                tracing::debug!(entity = %self.entity, id = %id, "update for unknown item dropped");
                return false;
            };
            *existing = item.clone();
        }
        self.bump();
        true
    }

    fn apply_deleted(&self, id: &str) -> bool {
        let removed = {
            let mut items = self.items.write();
            let before = items.len();
            items.retain(|i| entity_id_of(i).as_deref() != Some(id));
            items.len() != before
        };
        if removed {
            self.bump();
        }
        removed
    }

    fn replace_all(&self, items: Vec<Value>) {
        self.set_items(items);
    }
}

struct Registered {
    collection: Arc<EntityCollection>,
    primary: bool,
}

/// The collections known to the engine, refetchable through the gateway.
pub struct CollectionRegistry {
    gateway: Arc<SyncGateway>,
    collections: RwLock<Vec<Registered>>,
}

impl CollectionRegistry {
    /// Creates an empty registry.
    pub fn new(gateway: Arc<SyncGateway>) -> Self {
        Self {
            gateway,
            collections: RwLock::new(Vec::new()),
        }
    }

    /// Registers a collection. Primary collections are refetched on reconnect.
    pub fn register(&self, collection: Arc<EntityCollection>, primary: bool) {
        let mut collections = self.collections.write();
        collections.retain(|r| r.collection.entity() != collection.entity());
        collections.push(Registered {
            collection,
            primary,
        });
    }

    /// Looks up a collection by entity name.
    pub fn get(&self, entity: &str) -> Option<Arc<EntityCollection>> {
        self.collections
            .read()
            .iter()
            .find(|r| r.collection.entity() == entity)
            .map(|r| Arc::clone(&r.collection))
    }

    /// All registered collections.
    pub fn all(&self) -> Vec<Arc<EntityCollection>> {
        self.collections
            .read()
            .iter()
            .map(|r| Arc::clone(&r.collection))
            .collect()
    }

    fn primary(&self) -> Vec<Arc<EntityCollection>> {
        self.collections
            .read()
            .iter()
            .filter(|r| r.primary)
            .map(|r| Arc::clone(&r.collection))
            .collect()
    }

    async fn load(&self, collection: &EntityCollection) -> SyncResult<usize> {
        let body = self.gateway.get(collection.endpoint()).await?;
        let items = list_items(body)?;
        let count = items.len();
        collection.replace_all(items);
        tracing::debug!(entity = collection.entity(), count, "collection refetched");
        Ok(count)
    }
}

#[async_trait]
impl Refetcher for CollectionRegistry {
    async fn refetch(&self, entity: &str) -> SyncResult<usize> {
        let Some(collection) = self.get(entity) else {
            tracing::debug!(entity, "refetch requested for unregistered collection");
            return Ok(0);
        };
        self.load(&collection).await
    }

    async fn refetch_primary(&self) -> SyncResult<()> {
        let mut first_error = None;
        for collection in self.primary() {
            if let Err(e) = self.load(&collection).await {
                tracing::warn!(entity = collection.entity(), error = %e, "refetch failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for CollectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entities: Vec<String> = self
            .collections
            .read()
            .iter()
            .map(|r| r.collection.entity().to_string())
            .collect();
        f.debug_struct("CollectionRegistry")
            .field("collections", &entities)
            .finish()
    }
}

/// Extracts the item list from a list response: a bare array, or an object
/// wrapping it under `data` or `items`.
fn list_items(body: Value) -> SyncResult<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut fields) => {
            for key in ["data", "items"] {
                if let Some(Value::Array(items)) = fields.remove(key) {
                    return Ok(items);
                }
            }
            Err(SyncError::Decode("list response has no item array".into()))
        }
        other => Err(SyncError::Decode(format!("expected a list, got {other}"))),
    }
}
