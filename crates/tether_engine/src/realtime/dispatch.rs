//! Fan-out of push events to collections, handlers and UI callbacks.

use crate::collections::{EntityStore, Refetcher};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tether_protocol::{EntityAction, EventName, RealtimeEvent};

type Handler = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

/// A decoded push event, classified by what it affects.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// `<entity>.<action>` for an entity with a registered store.
    Entity {
        /// Entity name.
        entity: String,
        /// Action.
        action: EntityAction,
        /// Event data.
        data: Option<Value>,
        /// The raw event.
        raw: RealtimeEvent,
    },
    /// An event that invalidates whole collections.
    Recompute {
        /// Collections to refetch.
        collections: Vec<String>,
        /// The raw event.
        raw: RealtimeEvent,
    },
    /// Anything else.
    Other(RealtimeEvent),
}

impl DomainEvent {
    /// The raw event.
    pub fn raw(&self) -> &RealtimeEvent {
        match self {
            DomainEvent::Entity { raw, .. } | DomainEvent::Recompute { raw, .. } => raw,
            DomainEvent::Other(raw) => raw,
        }
    }
}

/// What dispatching an event did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// A collection changed.
    pub reconciled: bool,
    /// Refetches were started.
    pub refetches: usize,
    /// Custom handlers and UI callbacks invoked.
    pub handlers: usize,
}

impl DispatchOutcome {
    /// True if nothing consumed the event.
    pub fn is_unhandled(&self) -> bool {
        !self.reconciled && self.refetches == 0 && self.handlers == 0
    }
}

/// Routes push events to their consumers.
///
/// Handlers run synchronously in arrival order. Refetches are spawned so a
/// slow server never stalls the push channel.
#[derive(Default)]
pub struct EventDispatcher {
    stores: RwLock<HashMap<String, Arc<dyn EntityStore>>>,
    recompute: RwLock<HashMap<String, Vec<String>>>,
    handlers: RwLock<HashMap<String, Handler>>,
    callbacks: RwLock<HashMap<String, Vec<Handler>>>,
    refetcher: Option<Arc<dyn Refetcher>>,
}

impl EventDispatcher {
    /// Creates a dispatcher. Without a refetcher, recompute events are only logged.
    pub fn new(refetcher: Option<Arc<dyn Refetcher>>) -> Self {
        Self {
            refetcher,
            ..Self::default()
        }
    }

    /// Reconciles `<entity>.created|updated|deleted` events into `store`.
    pub fn register_store(&self, store: Arc<dyn EntityStore>) {
        let entity = store.entity().to_string();
        self.stores.write().insert(entity, store);
    }

    /// Refetches `collections` whenever `event_type` arrives.
    pub fn register_recompute<I, S>(&self, event_type: impl Into<String>, collections: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recompute.write().insert(
            event_type.into(),
            collections.into_iter().map(Into::into).collect(),
        );
    }

    /// Installs the handler for one event type, replacing any previous one.
    pub fn set_handler<F>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .insert(event_type.into(), Arc::new(handler));
    }

    /// Adds a UI callback for one event type.
    pub fn on<F>(&self, event_type: impl Into<String>, callback: F)
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .entry(event_type.into())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Removes every UI callback for one event type.
    pub fn off(&self, event_type: &str) {
        self.callbacks.write().remove(event_type);
    }

    /// Classifies a raw event.
    pub fn classify(&self, event: RealtimeEvent) -> DomainEvent {
        if let Some(collections) = self.recompute.read().get(&event.event_type) {
            return DomainEvent::Recompute {
                collections: collections.clone(),
                raw: event,
            };
        }

        let entity = EventName::parse(&event.event_type).and_then(|name| {
            self.stores
                .read()
                .contains_key(name.namespace)
                .then(|| (name.namespace.to_string(), name.entity_action()))
        });
        match entity {
            Some((entity, action)) => DomainEvent::Entity {
                entity,
                action,
                data: event.data.clone(),
                raw: event,
            },
            None => DomainEvent::Other(event),
        }
    }

    /// Classifies and dispatches a raw event.
    pub fn dispatch(&self, event: RealtimeEvent) -> DispatchOutcome {
        let event = self.classify(event);
        self.dispatch_event(&event)
    }

    /// Dispatches a classified event.
    pub fn dispatch_event(&self, event: &DomainEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        match event {
            DomainEvent::Entity {
                entity,
                action,
                data,
                ..
            } => outcome.reconciled = self.reconcile(entity, action, data.as_ref()),
            DomainEvent::Recompute { collections, .. } => {
                outcome.refetches = self.spawn_refetches(collections)
            }
            DomainEvent::Other(_) => {}
        }

        let raw = event.raw();
        let handler = self.handlers.read().get(&raw.event_type).cloned();
        if let Some(handler) = handler {
            invoke(&raw.event_type, &handler, raw);
            outcome.handlers += 1;
        }
        let callbacks = self
            .callbacks
            .read()
            .get(&raw.event_type)
            .cloned()
            .unwrap_or_default();
        for callback in &callbacks {
            invoke(&raw.event_type, callback, raw);
            outcome.handlers += 1;
        }

        if outcome.is_unhandled() {
            tracing::debug!(event_type = %raw.event_type, "unhandled push event ignored");
        }
        outcome
    }

    fn reconcile(&self, entity: &str, action: &EntityAction, data: Option<&Value>) -> bool {
        let Some(store) = self.stores.read().get(entity).cloned() else {
            return false;
        };
        let Some(data) = data else {
            tracing::warn!(entity, %action, "entity event without data ignored");
            return false;
        };

        let changed = match action {
            EntityAction::Created => store.apply_created(data),
            EntityAction::Updated => store.apply_updated(data),
            EntityAction::Deleted => match tether_protocol::entity_id_of(data) {
                Some(id) => store.apply_deleted(&id),
                None => {
                    tracing::warn!(entity, "deleted event without id ignored");
                    false
                }
            },
            EntityAction::Other(_) => false,
        };
        tracing::debug!(entity, %action, changed, "push event reconciled");
        changed
    }

    fn spawn_refetches(&self, collections: &[String]) -> usize {
        let Some(refetcher) = &self.refetcher else {
            tracing::debug!(?collections, "no refetcher; recompute event ignored");
            return 0;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("recompute event outside a runtime ignored");
            return 0;
        };

        for entity in collections {
            let refetcher = Arc::clone(refetcher);
            let entity = entity.clone();
            runtime.spawn(async move {
                if let Err(e) = refetcher.refetch(&entity).await {
                    tracing::warn!(entity = %entity, error = %e, "recompute refetch failed");
                }
            });
        }
        collections.len()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut stores: Vec<String> = self.stores.read().keys().cloned().collect();
        stores.sort();
        f.debug_struct("EventDispatcher")
            .field("stores", &stores)
            .field("recompute", &self.recompute.read().len())
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}

fn invoke(event_type: &str, handler: &Handler, event: &RealtimeEvent) {
    if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
        tracing::error!(event_type, "push event handler panicked");
    }
}
