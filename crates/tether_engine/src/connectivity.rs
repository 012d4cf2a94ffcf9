//! Connectivity monitoring.
//!
//! [`ConnectivityMonitor`] is the single source of truth for whether the
//! device is online. Platform code feeds it through a [`ConnectivitySource`]
//! or by calling [`ConnectivityMonitor::report`] directly.

use crate::signal::ProcessQueueSignal;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Platform connectivity feed.
pub trait ConnectivitySource: Send + Sync {
    /// Returns a receiver of online flags.
    fn watch(&self) -> watch::Receiver<bool>;
}

/// A connectivity source driven by hand.
///
/// Used by embedders that receive network events through their own channel,
/// and by tests.
#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    /// Creates a source with an initial status.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Publishes a status.
    pub fn set_online(&self, online: bool) {
        self.tx.send_replace(online);
    }

    /// Last published status.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }
}

impl ConnectivitySource for ManualConnectivity {
    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Current connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    /// Whether the device is online.
    pub is_online: bool,
    /// When the status last changed.
    pub last_transition_at: Option<DateTime<Utc>>,
}

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

type SubscriberList = RwLock<Vec<Subscriber>>;

/// Tracks online/offline status and notifies subscribers of transitions.
///
/// Notifications are coalesced: subscribers only hear about real changes.
/// Delivery of one transition finishes before the next one starts.
pub struct ConnectivityMonitor {
    state: RwLock<ConnectivityState>,
    subscribers: Arc<SubscriberList>,
    next_id: AtomicU64,
    delivery: ReentrantMutex<()>,
    signal: Arc<ProcessQueueSignal>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with an initial status.
    pub fn new(initial_online: bool, signal: Arc<ProcessQueueSignal>) -> Self {
        Self {
            state: RwLock::new(ConnectivityState {
                is_online: initial_online,
                last_transition_at: None,
            }),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            delivery: ReentrantMutex::new(()),
            signal,
            watcher: Mutex::new(None),
        }
    }

    /// Attaches to a platform source.
    ///
    /// Must be called from within a tokio runtime. Calling it again while
    /// attached does nothing.
    pub fn init(self: &Arc<Self>, source: &dyn ConnectivitySource) {
        let mut watcher = self.watcher.lock();
        if watcher.is_some() {
            tracing::debug!("connectivity monitor already attached");
            return;
        }

        let mut rx = source.watch();
        let initial = *rx.borrow_and_update();
        self.report(initial);

        let monitor = Arc::downgrade(self);
        *watcher = Some(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.report(online);
            }
            tracing::debug!("connectivity source closed");
        }));
        tracing::info!(online = initial, "connectivity monitor attached");
    }

    /// Detaches from the platform source. Idempotent.
    pub fn destroy(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
            tracing::info!("connectivity monitor detached");
        }
    }

    /// Returns true while attached to a source.
    pub fn is_attached(&self) -> bool {
        self.watcher.lock().is_some()
    }

    /// Current state.
    pub fn state(&self) -> ConnectivityState {
        *self.state.read()
    }

    /// Whether the device is online.
    pub fn is_online(&self) -> bool {
        self.state.read().is_online
    }

    /// Records a status reported by the platform.
    ///
    /// Returns true if this was a transition. On a transition to online the
    /// process-queue signal is raised after subscribers have been notified.
    pub fn report(&self, online: bool) -> bool {
        let _delivery = self.delivery.lock();
        {
            let mut state = self.state.write();
            if state.is_online == online {
                return false;
            }
            state.is_online = online;
            state.last_transition_at = Some(Utc::now());
        }

        if online {
            tracing::info!("connectivity restored");
        } else {
            tracing::warn!("connectivity lost");
        }

        let callbacks: Vec<(u64, Callback)> = self
            .subscribers
            .read()
            .iter()
            .map(|s| (s.id, Arc::clone(&s.callback)))
            .collect();
        for (id, callback) in &callbacks {
            invoke(*id, callback, online);
        }

        if online {
            self.signal.raise();
        }
        true
    }

    /// Registers a callback.
    ///
    /// The callback is invoked immediately with the current status, then on
    /// every transition until the returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let _delivery = self.delivery.lock();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push(Subscriber {
            id,
            callback: Arc::clone(&callback),
        });
        invoke(id, &callback, self.is_online());

        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn invoke(id: u64, callback: &Callback, online: bool) {
    if catch_unwind(AssertUnwindSafe(|| callback(online))).is_err() {
        tracing::error!(subscriber = id, online, "connectivity subscriber panicked");
    }
}

/// Keeps a connectivity callback registered.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<SubscriberList>,
}

impl Subscription {
    /// Removes the callback.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.write().retain(|s| s.id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
