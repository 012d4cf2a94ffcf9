//! Engine wiring and lifecycle.
//!
//! [`SyncEngine`] builds every service by constructor injection and runs the
//! background tasks that connect them:
//!
//! - the queue worker drains the mutation queue whenever the process-queue
//!   signal is raised
//! - connectivity transitions are forwarded to the state store in order
//! - the pending count and push channel state are mirrored into the status

use crate::collections::{CollectionRegistry, EntityCollection, Refetcher};
use crate::config::EngineConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivitySource, Subscription};
use crate::credentials::{CredentialProvider, StaticCredentials};
use crate::error::SyncResult;
use crate::gateway::SyncGateway;
use crate::http::{HttpClient, ReqwestClient};
use crate::notify::{Notification, Notifier, TracingNotifier};
use crate::optimistic::OptimisticExecutor;
use crate::queue::{DrainReport, MutationQueue, QueueOptions};
use crate::realtime::{ConnectionState, EventDispatcher, PushConnector, RealtimeRouter, WsConnector};
use crate::signal::ProcessQueueSignal;
use crate::state::SyncStateStore;
use parking_lot::Mutex;
use std::sync::Arc;
use tether_protocol::RouteTable;
use tether_storage::{JournalBackend, MemoryJournal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Builds a [`SyncEngine`].
pub struct SyncEngineBuilder {
    config: EngineConfig,
    routes: RouteTable,
    initial_online: bool,
    http: Option<Arc<dyn HttpClient>>,
    push: Option<Arc<dyn PushConnector>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    notifier: Option<Arc<dyn Notifier>>,
    journal: Option<Box<dyn JournalBackend>>,
    collections: Vec<(String, bool)>,
    recompute: Vec<(String, Vec<String>)>,
}

impl SyncEngineBuilder {
    /// Starts a builder with the default route table.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            routes: RouteTable::default(),
            initial_online: true,
            http: None,
            push: None,
            credentials: None,
            notifier: None,
            journal: None,
            collections: Vec::new(),
            recompute: Vec::new(),
        }
    }

    /// Replaces the route table.
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Connectivity assumed until a source reports.
    pub fn initially_online(mut self, online: bool) -> Self {
        self.initial_online = online;
        self
    }

    /// HTTP client. Defaults to [`ReqwestClient`].
    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Push connector. Defaults to [`WsConnector`].
    pub fn push_connector(mut self, push: Arc<dyn PushConnector>) -> Self {
        self.push = Some(push);
        self
    }

    /// Credential source. Defaults to signed-out [`StaticCredentials`].
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Notification surface. Defaults to [`TracingNotifier`].
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Queue journal. Defaults to an in-memory journal.
    pub fn journal(mut self, journal: impl JournalBackend + 'static) -> Self {
        self.journal = Some(Box::new(journal));
        self
    }

    /// Registers a collection for `entity`, loaded from its route prefix.
    /// Primary collections are refetched on reconnect.
    pub fn collection(mut self, entity: impl Into<String>, primary: bool) -> Self {
        self.collections.push((entity.into(), primary));
        self
    }

    /// Refetches `collections` whenever `event_type` is pushed.
    pub fn recompute_on<I, S>(mut self, event_type: impl Into<String>, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recompute.push((
            event_type.into(),
            collections.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Wires the services.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be replayed or the default
    /// HTTP client cannot be created.
    pub fn build(self) -> SyncResult<SyncEngine> {
        let config = Arc::new(self.config);
        let signal = Arc::new(ProcessQueueSignal::new());
        let connectivity = Arc::new(ConnectivityMonitor::new(
            self.initial_online,
            Arc::clone(&signal),
        ));

        let journal = self
            .journal
            .unwrap_or_else(|| Box::new(MemoryJournal::new()));
        let queue = Arc::new(MutationQueue::open(
            journal,
            QueueOptions {
                max_replay_attempts: config.max_replay_attempts,
                compaction_threshold: config.compaction_threshold,
            },
        )?);

        let http = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestClient::new(config.request_timeout)?),
        };
        let push = self.push.unwrap_or_else(|| Arc::new(WsConnector));
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(StaticCredentials::new()));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier));

        let gateway = Arc::new(SyncGateway::new(
            &config,
            http,
            Arc::clone(&credentials),
            Arc::clone(&connectivity),
            Arc::clone(&queue),
            Arc::clone(&notifier),
            self.routes.clone(),
        ));

        let registry = Arc::new(CollectionRegistry::new(Arc::clone(&gateway)));
        let refetcher: Arc<dyn Refetcher> = registry.clone();
        let dispatcher = Arc::new(EventDispatcher::new(Some(Arc::clone(&refetcher))));
        for (entity, primary) in self.collections {
            let endpoint = self.routes.endpoint_for(&entity, None);
            let collection = Arc::new(EntityCollection::new(entity, endpoint));
            registry.register(Arc::clone(&collection), primary);
            dispatcher.register_store(collection);
        }
        for (event_type, collections) in self.recompute {
            dispatcher.register_recompute(event_type, collections);
        }

        let router = Arc::new(RealtimeRouter::new(
            &config,
            push,
            Arc::clone(&credentials),
            Arc::clone(&dispatcher),
        ));
        let state = Arc::new(SyncStateStore::new(
            self.initial_online,
            Arc::clone(&signal),
            Some(refetcher),
            config.network_required_features.clone(),
        )
        .with_refetch_after_drain());
        state.set_pending_sync_count(queue.len());

        Ok(SyncEngine {
            config,
            signal,
            connectivity,
            queue,
            gateway,
            registry,
            dispatcher,
            router,
            state,
            optimistic: OptimisticExecutor::new(Arc::clone(&notifier)),
            notifier,
            credentials,
            runtime: Mutex::new(None),
        })
    }
}

struct Running {
    tasks: Vec<JoinHandle<()>>,
    _connectivity: Subscription,
}

/// The assembled sync engine.
pub struct SyncEngine {
    config: Arc<EngineConfig>,
    signal: Arc<ProcessQueueSignal>,
    connectivity: Arc<ConnectivityMonitor>,
    queue: Arc<MutationQueue>,
    gateway: Arc<SyncGateway>,
    registry: Arc<CollectionRegistry>,
    dispatcher: Arc<EventDispatcher>,
    router: Arc<RealtimeRouter>,
    state: Arc<SyncStateStore>,
    optimistic: OptimisticExecutor,
    notifier: Arc<dyn Notifier>,
    credentials: Arc<dyn CredentialProvider>,
    runtime: Mutex<Option<Running>>,
}

impl SyncEngine {
    /// Starts a builder.
    pub fn builder(config: EngineConfig) -> SyncEngineBuilder {
        SyncEngineBuilder::new(config)
    }

    /// Attaches connectivity, starts the background tasks and connects the
    /// push channel. Idempotent. Must be called from within a tokio runtime.
    pub fn start(&self, source: &dyn ConnectivitySource) {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            tracing::debug!("sync engine already started");
            return;
        }

        // Transitions go through one task so the store sees them in order.
        let (online_tx, mut online_rx) = mpsc::unbounded_channel::<bool>();
        let subscription = self.connectivity.subscribe(move |online| {
            let _ = online_tx.send(online);
        });
        self.connectivity.init(source);

        let mut tasks = Vec::new();

        let state = Arc::clone(&self.state);
        tasks.push(tokio::spawn(async move {
            while let Some(online) = online_rx.recv().await {
                state.set_online_status(online).await;
            }
        }));

        tasks.push(tokio::spawn(run_queue_worker(
            Arc::clone(&self.signal),
            Arc::clone(&self.connectivity),
            Arc::clone(&self.queue),
            Arc::clone(&self.gateway),
            Arc::clone(&self.state),
            Arc::clone(&self.notifier),
        )));

        let mut pending = self.queue.subscribe_pending();
        let state = Arc::clone(&self.state);
        tasks.push(tokio::spawn(async move {
            loop {
                let count = *pending.borrow_and_update();
                state.set_pending_sync_count(count);
                if pending.changed().await.is_err() {
                    break;
                }
            }
        }));

        let mut realtime = self.router.subscribe_state();
        let state = Arc::clone(&self.state);
        tasks.push(tokio::spawn(async move {
            loop {
                let connected = *realtime.borrow_and_update() == ConnectionState::Connected;
                state.set_realtime_connected(connected);
                if realtime.changed().await.is_err() {
                    break;
                }
            }
        }));

        // Replay whatever a previous session left behind.
        if !self.queue.is_empty() {
            self.signal.raise();
        }
        self.router.connect();

        *runtime = Some(Running {
            tasks,
            _connectivity: subscription,
        });
        tracing::info!(pending = self.queue.len(), "sync engine started");
    }

    /// Stops background tasks, the push channel and the connectivity watcher.
    pub fn shutdown(&self) {
        let Some(running) = self.runtime.lock().take() else {
            return;
        };
        self.router.disconnect();
        self.connectivity.destroy();
        for task in running.tasks {
            task.abort();
        }
        tracing::info!("sync engine stopped");
    }

    /// True between [`start`](Self::start) and [`shutdown`](Self::shutdown).
    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Requests a drain.
    pub fn sync_now(&self) {
        self.signal.raise();
    }

    /// Drains the queue now and records the result.
    pub async fn drain_now(&self) -> DrainReport {
        drain_once(&self.queue, &self.gateway, &self.state, self.notifier.as_ref()).await
    }

    /// Connects the push channel, e.g. after sign-in.
    pub fn connect_realtime(&self) -> bool {
        self.router.connect()
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Connectivity monitor.
    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    /// Mutation queue.
    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    /// Network gateway.
    pub fn gateway(&self) -> &Arc<SyncGateway> {
        &self.gateway
    }

    /// Registered collections.
    pub fn collections(&self) -> &Arc<CollectionRegistry> {
        &self.registry
    }

    /// Looks up a registered collection.
    pub fn collection(&self, entity: &str) -> Option<Arc<EntityCollection>> {
        self.registry.get(entity)
    }

    /// Push event dispatcher.
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Push channel router.
    pub fn router(&self) -> &Arc<RealtimeRouter> {
        &self.router
    }

    /// Sync status store.
    pub fn state(&self) -> &Arc<SyncStateStore> {
        &self.state
    }

    /// Optimistic update executor.
    pub fn optimistic(&self) -> &OptimisticExecutor {
        &self.optimistic
    }

    /// Credential source.
    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("base_url", &self.config.base_url)
            .field("running", &self.is_running())
            .field("status", &self.state.status())
            .finish()
    }
}

async fn run_queue_worker(
    signal: Arc<ProcessQueueSignal>,
    connectivity: Arc<ConnectivityMonitor>,
    queue: Arc<MutationQueue>,
    gateway: Arc<SyncGateway>,
    state: Arc<SyncStateStore>,
    notifier: Arc<dyn Notifier>,
) {
    loop {
        signal.wait().await;
        if !connectivity.is_online() {
            tracing::debug!("drain requested while offline; skipped");
            continue;
        }
        if !queue.is_empty() {
            drain_once(&queue, &gateway, &state, notifier.as_ref()).await;
        }
        // Reconnect refetch sees the replayed writes.
        state.refetch_if_due().await;
    }
}

async fn drain_once(
    queue: &MutationQueue,
    gateway: &SyncGateway,
    state: &SyncStateStore,
    notifier: &dyn Notifier,
) -> DrainReport {
    state.begin_sync();
    let report = queue.drain(gateway).await;
    for dead in &report.exhausted {
        notifier.notify(Notification::warning(format!(
            "A change to {} could not be synced and was discarded.",
            dead.change.entity.replace('_', " ")
        )));
    }
    state.record_drain(&report);
    state.end_sync();
    report
}
