//! The realtime event router.
//!
//! Keeps one push connection per signed-in session, reconnecting with
//! exponential backoff, and hands every inbound event to the
//! [`EventDispatcher`].
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──open──▶ Connected
//!      ▲                          │                    │
//!      └──── backoff delay ◀──────┴──── error/close ◀──┘
//!
//! any state ──disconnect()──▶ Closed
//! ```

mod backoff;
mod dispatch;
mod transport;

pub use backoff::Backoff;
pub use dispatch::{DispatchOutcome, DomainEvent, EventDispatcher};
pub use transport::{MockPushConnector, MockSession, PushConnection, PushConnector, WsConnector};

use crate::config::{EngineConfig, ReconnectConfig};
use crate::credentials::CredentialProvider;
use crate::error::{SyncError, SyncResult};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_protocol::RealtimeEvent;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

/// Number of reconnect delays kept in [`RealtimeStats`].
const DELAY_HISTORY: usize = 64;

/// Push connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; a reconnect may be scheduled.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Open and receiving.
    Connected,
    /// Shut down by [`RealtimeRouter::disconnect`].
    Closed,
}

/// Push channel counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RealtimeStats {
    /// Connection attempts.
    pub connection_attempts: u64,
    /// Attempts that opened.
    pub successful_opens: u64,
    /// Messages received.
    pub messages_received: u64,
    /// Malformed messages dropped.
    pub messages_dropped: u64,
    /// Recent reconnect delays, oldest first.
    pub reconnect_delays: Vec<Duration>,
    /// Last connection error.
    pub last_error: Option<String>,
}

/// Derives the push address from the REST base URL.
///
/// `http` becomes `ws`, `https` becomes `wss`, the push path is appended and
/// the credential is passed as the `token` query parameter.
///
/// # Errors
///
/// Returns an error if `base_url` is not an http(s) or ws(s) URL.
pub fn push_url(base_url: &str, push_path: &str, token: &str) -> SyncResult<Url> {
    let mut url =
        Url::parse(base_url).map_err(|e| SyncError::InvalidConfig(format!("base url: {e}")))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(SyncError::InvalidConfig(format!(
                "unsupported base url scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SyncError::InvalidConfig(format!("cannot derive {scheme} url")))?;

    let path = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        push_path.trim_start_matches('/')
    );
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

struct Session {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the push connection.
pub struct RealtimeRouter {
    base_url: String,
    push_path: String,
    reconnect: ReconnectConfig,
    connector: Arc<dyn PushConnector>,
    credentials: Arc<dyn CredentialProvider>,
    dispatcher: Arc<EventDispatcher>,
    state: watch::Sender<ConnectionState>,
    stats: RwLock<RealtimeStats>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
}

impl RealtimeRouter {
    /// Creates a disconnected router.
    pub fn new(
        config: &EngineConfig,
        connector: Arc<dyn PushConnector>,
        credentials: Arc<dyn CredentialProvider>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            base_url: config.base_url.clone(),
            push_path: config.push_path.clone(),
            reconnect: config.reconnect.clone(),
            connector,
            credentials,
            dispatcher,
            state,
            stats: RwLock::new(RealtimeStats::default()),
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// The dispatcher receiving inbound events.
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watches the connection state.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> RealtimeStats {
        self.stats.read().clone()
    }

    /// Starts the connection loop.
    ///
    /// Returns false, after logging, when no push credential is available;
    /// call again once signed in. Does nothing while a session is running.
    /// Must be called from within a tokio runtime.
    pub fn connect(self: &Arc<Self>) -> bool {
        let mut session = self.session.lock();
        if let Some(running) = session.as_ref() {
            if !running.handle.is_finished() {
                tracing::debug!("push channel already running");
                return true;
            }
        }
        if self.credentials.push_token().is_none() {
            tracing::info!("no push credential; push channel stays down until sign-in");
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(ConnectionState::Disconnected);
        let (cancel, cancel_rx) = watch::channel(false);
        let router = Arc::clone(self);
        let handle = tokio::spawn(async move { router.run(generation, cancel_rx).await });
        *session = Some(Session { cancel, handle });
        true
    }

    /// Closes the connection and cancels any scheduled reconnect. Terminal
    /// until the next [`connect`](Self::connect).
    pub fn disconnect(&self) {
        let session = self.session.lock().take();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(session) = session {
            let _ = session.cancel.send(true);
            tracing::info!("push channel disconnected");
        }
        self.state.send_replace(ConnectionState::Closed);
    }

    /// Decodes and dispatches one inbound text message. Malformed messages
    /// are dropped.
    pub fn handle_message(&self, text: &str) -> Option<DispatchOutcome> {
        self.stats.write().messages_received += 1;
        match RealtimeEvent::decode(text) {
            Ok(event) => {
                tracing::debug!(event_type = %event.event_type, "push event received");
                Some(self.dispatcher.dispatch(event))
            }
            Err(e) => {
                self.stats.write().messages_dropped += 1;
                let error = SyncError::MalformedPush(e.to_string());
                tracing::warn!(error = %error, "dropping push message");
                None
            }
        }
    }

    fn set_state(&self, generation: u64, state: ConnectionState) {
        if self.generation.load(Ordering::SeqCst) == generation {
            self.state.send_replace(state);
        }
    }

    async fn run(self: Arc<Self>, generation: u64, mut cancel: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.reconnect.clone());

        loop {
            if *cancel.borrow() {
                break;
            }
            // Re-read on every attempt: push credentials are short-lived.
            let Some(token) = self.credentials.push_token() else {
                tracing::info!("push credential gone; push channel stopped");
                self.set_state(generation, ConnectionState::Disconnected);
                break;
            };
            let url = match push_url(&self.base_url, &self.push_path, &token) {
                Ok(url) => url,
                Err(e) => {
                    tracing::error!(error = %e, "cannot derive push address");
                    self.set_state(generation, ConnectionState::Disconnected);
                    break;
                }
            };

            self.set_state(generation, ConnectionState::Connecting);
            self.stats.write().connection_attempts += 1;
            tracing::debug!(host = url.host_str().unwrap_or(""), "opening push channel");

            let connected = tokio::select! {
                biased;
                _ = cancel.changed() => break,
                result = self.connector.connect(&url) => result,
            };

            match connected {
                Ok(mut connection) => {
                    backoff.reset();
                    self.stats.write().successful_opens += 1;
                    self.set_state(generation, ConnectionState::Connected);
                    tracing::info!("push channel open");

                    if self.pump(connection.as_mut(), &mut cancel).await {
                        connection.close().await;
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "push channel connection failed");
                    self.stats.write().last_error = Some(e.to_string());
                }
            }

            self.set_state(generation, ConnectionState::Disconnected);
            let delay = backoff.next_delay();
            {
                let mut stats = self.stats.write();
                if stats.reconnect_delays.len() == DELAY_HISTORY {
                    stats.reconnect_delays.remove(0);
                }
                stats.reconnect_delays.push(delay);
            }
            tracing::info!(delay_ms = delay.as_millis() as u64, "push channel reconnect scheduled");

            tokio::select! {
                biased;
                _ = cancel.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::debug!("push channel loop finished");
    }

    /// Reads until the connection ends. Returns true if cancelled.
    async fn pump(
        &self,
        connection: &mut dyn PushConnection,
        cancel: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.changed() => return true,
                next = connection.next_message() => next,
            };
            match next {
                Some(Ok(text)) => {
                    self.handle_message(&text);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "push channel error");
                    self.stats.write().last_error = Some(e.to_string());
                    return false;
                }
                None => {
                    tracing::info!("push channel closed by server");
                    return false;
                }
            }
        }
    }
}

impl std::fmt::Debug for RealtimeRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeRouter")
            .field("state", &self.state())
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::EntityCollection;
    use crate::credentials::StaticCredentials;

    fn router(
        connector: Arc<MockPushConnector>,
        credentials: Arc<StaticCredentials>,
    ) -> (Arc<RealtimeRouter>, Arc<EntityCollection>) {
        let dispatcher = Arc::new(EventDispatcher::new(None));
        let chores = Arc::new(EntityCollection::new("chore", "/chores"));
        dispatcher.register_store(chores.clone());
        let router = Arc::new(RealtimeRouter::new(
            &EngineConfig::new("https://api.example.com"),
            connector,
            credentials,
            dispatcher,
        ));
        (router, chores)
    }

    async fn wait_for(router: &RealtimeRouter, state: ConnectionState) {
        let mut rx = router.subscribe_state();
        while *rx.borrow_and_update() != state {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    #[test]
    fn push_url_derivation() {
        let url = push_url("https://api.example.com", "/ws", "abc").unwrap();
        assert_eq!(url.as_str(), "wss://api.example.com/ws?token=abc");

        let url = push_url("http://localhost:8080/api/", "ws", "a b").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/api/ws?token=a+b");

        assert!(push_url("ftp://example.com", "/ws", "t").is_err());
        assert!(push_url("not a url", "/ws", "t").is_err());
    }

    #[tokio::test]
    async fn connect_without_credential_is_a_no_op() {
        let connector = Arc::new(MockPushConnector::new());
        let (router, _) = router(connector.clone(), Arc::new(StaticCredentials::new()));

        assert!(!router.connect());
        assert_eq!(router.state(), ConnectionState::Disconnected);
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn malformed_messages_are_dropped_without_closing() {
        let connector = Arc::new(MockPushConnector::new());
        let (session, tx) = MockSession::channel();
        connector.push(session);
        let (router, chores) = router(connector, Arc::new(StaticCredentials::new().with_token("t")));

        assert!(router.connect());
        wait_for(&router, ConnectionState::Connected).await;

        tx.send("not json".into()).unwrap();
        tx.send(r#"{"data": {}}"#.into()).unwrap();
        tx.send(r#"{"type": "chore.created", "data": {"id": 1}}"#.into()).unwrap();

        for _ in 0..100 {
            if chores.len() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(chores.len(), 1);
        assert_eq!(router.state(), ConnectionState::Connected);

        let stats = router.stats();
        assert_eq!(stats.messages_received, 3);
        assert_eq!(stats.messages_dropped, 2);

        router.disconnect();
        assert_eq!(router.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_scheduled_reconnect() {
        let connector = Arc::new(MockPushConnector::new());
        connector.push(MockSession::Fail("refused".into()));
        let (router, _) = router(connector.clone(), Arc::new(StaticCredentials::new().with_token("t")));

        router.connect();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(connector.attempts(), 1);
        assert_eq!(router.stats().reconnect_delays, vec![Duration::from_millis(1000)]);

        router.disconnect();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(router.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn connect_is_idempotent_while_running() {
        let connector = Arc::new(MockPushConnector::new());
        let (router, _) = router(connector.clone(), Arc::new(StaticCredentials::new().with_token("t")));

        assert!(router.connect());
        wait_for(&router, ConnectionState::Connected).await;
        assert!(router.connect());
        tokio::task::yield_now().await;
        assert_eq!(connector.attempts(), 1);
        router.disconnect();
    }
}
