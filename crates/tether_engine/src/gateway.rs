//! The sync gateway: the single call surface for network requests.
//!
//! Reads always go to the server. Writes go to the server while online and
//! are queued otherwise; a write that cannot reach the server is queued too.
//! Queued writes answer immediately with a synthetic pending response.

use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::credentials::CredentialProvider;
use crate::error::{SyncError, SyncResult};
use crate::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use crate::notify::Notifier;
use crate::queue::{ChangeSender, MutationQueue};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tether_protocol::{
    pending_response, ChangeType, NewChange, QueueId, QueuedChange, RouteTable, ACCOUNT_HEADER,
    IDEMPOTENCY_HEADER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Delivery {
    #[default]
    Auto,
    Deferred,
    DirectOnly,
}

/// Per-call delivery options for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestOptions {
    delivery: Delivery,
}

impl RequestOptions {
    /// Send now while online, queue otherwise.
    pub fn auto() -> Self {
        Self::default()
    }

    /// Always queue, even while online.
    pub fn deferred() -> Self {
        Self {
            delivery: Delivery::Deferred,
        }
    }

    /// Never queue; fail with a connectivity error while offline.
    pub fn direct_only() -> Self {
        Self {
            delivery: Delivery::DirectOnly,
        }
    }
}

/// Routes requests to the server or the mutation queue.
pub struct SyncGateway {
    base_url: String,
    auth_scheme: String,
    http: Arc<dyn HttpClient>,
    credentials: Arc<dyn CredentialProvider>,
    connectivity: Arc<ConnectivityMonitor>,
    queue: Arc<MutationQueue>,
    notifier: Arc<dyn Notifier>,
    routes: RouteTable,
}

impl SyncGateway {
    /// Creates a gateway.
    pub fn new(
        config: &EngineConfig,
        http: Arc<dyn HttpClient>,
        credentials: Arc<dyn CredentialProvider>,
        connectivity: Arc<ConnectivityMonitor>,
        queue: Arc<MutationQueue>,
        notifier: Arc<dyn Notifier>,
        routes: RouteTable,
    ) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_scheme: config.auth_scheme.clone(),
            http,
            credentials,
            connectivity,
            queue,
            notifier,
            routes,
        }
    }

    /// The endpoint route table.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// GET `endpoint`. Reads are never queued.
    pub async fn get(&self, endpoint: &str) -> SyncResult<Value> {
        self.request(HttpMethod::Get, endpoint, None, RequestOptions::auto())
            .await
    }

    /// POST `payload` to `endpoint`.
    pub async fn post(&self, endpoint: &str, payload: Value) -> SyncResult<Value> {
        self.request(HttpMethod::Post, endpoint, Some(payload), RequestOptions::auto())
            .await
    }

    /// PUT `payload` to `endpoint`.
    pub async fn put(&self, endpoint: &str, payload: Value) -> SyncResult<Value> {
        self.request(HttpMethod::Put, endpoint, Some(payload), RequestOptions::auto())
            .await
    }

    /// PATCH `payload` to `endpoint`.
    pub async fn patch(&self, endpoint: &str, payload: Value) -> SyncResult<Value> {
        self.request(HttpMethod::Patch, endpoint, Some(payload), RequestOptions::auto())
            .await
    }

    /// DELETE `endpoint`.
    pub async fn delete(&self, endpoint: &str) -> SyncResult<Value> {
        self.request(HttpMethod::Delete, endpoint, None, RequestOptions::auto())
            .await
    }

    /// Issues a request with explicit delivery options.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Connectivity`] for reads and direct-only writes that
    ///   cannot reach the server
    /// - [`SyncError::AuthRequired`] on 401
    /// - [`SyncError::ServerRejected`] on any other non-2xx status
    pub async fn request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> SyncResult<Value> {
        if !method.is_mutating() {
            return self.execute(method, endpoint, body.as_ref(), None).await;
        }

        match options.delivery {
            Delivery::Deferred => return self.defer(method, endpoint, body),
            Delivery::DirectOnly => {
                if !self.connectivity.is_online() {
                    return Err(SyncError::connectivity("offline"));
                }
                return self.execute(method, endpoint, body.as_ref(), None).await;
            }
            Delivery::Auto => {}
        }

        if !self.connectivity.is_online() {
            return self.defer(method, endpoint, body);
        }

        match self.execute(method, endpoint, body.as_ref(), None).await {
            Err(SyncError::Connectivity { detail, .. }) => {
                tracing::warn!(%method, endpoint, error = %detail, "write could not reach the server; queueing");
                self.defer(method, endpoint, body)
            }
            other => other,
        }
    }

    fn defer(&self, method: HttpMethod, endpoint: &str, body: Option<Value>) -> SyncResult<Value> {
        let Some(change_type) = method.change_type() else {
            return Err(SyncError::InvalidConfig(format!(
                "{method} requests cannot be queued"
            )));
        };
        let target = self.routes.resolve(endpoint)?;

        let change = NewChange {
            change_type,
            entity: target.entity,
            entity_id: target.entity_id,
            payload: body.unwrap_or(Value::Null),
            endpoint: Some(endpoint.to_string()),
        };
        let queued = self.queue.enqueue(change);
        tracing::info!(
            queue_id = %queued.queue_id,
            entity = %queued.entity,
            %method,
            endpoint,
            "write deferred"
        );
        Ok(pending_response(&queued))
    }

    /// Builds the request for `endpoint`, attaching credentials.
    pub fn build_request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&Value>,
        idempotency_key: Option<&QueueId>,
    ) -> HttpRequest {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(token) = self.credentials.bearer_token() {
            headers.push((
                "Authorization".to_string(),
                format!("{} {}", self.auth_scheme, token),
            ));
        }
        if let Some(account) = self.credentials.account_id() {
            headers.push((ACCOUNT_HEADER.to_string(), account));
        }
        if let Some(key) = idempotency_key {
            headers.push((IDEMPOTENCY_HEADER.to_string(), key.to_string()));
        }

        HttpRequest {
            method,
            url: format!("{}{}", self.base_url, endpoint),
            headers,
            body: body.cloned(),
        }
    }

    async fn execute(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&Value>,
        idempotency_key: Option<&QueueId>,
    ) -> SyncResult<Value> {
        let request = self.build_request(method, endpoint, body, idempotency_key);
        tracing::debug!(%method, endpoint, "sending request");

        let response = self.http.execute(request).await.map_err(|e| {
            tracing::debug!(%method, endpoint, error = %e, "transport failure");
            SyncError::from(e)
        })?;
        self.interpret(method, endpoint, response)
    }

    fn interpret(
        &self,
        method: HttpMethod,
        endpoint: &str,
        response: HttpResponse,
    ) -> SyncResult<Value> {
        if response.is_success() {
            if response.body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str::<Value>(&response.body)
                .unwrap_or(Value::String(response.body)));
        }

        if response.status == 401 {
            tracing::warn!(%method, endpoint, "server requires sign-in");
            self.notifier.prompt_sign_in();
            return Err(SyncError::AuthRequired);
        }

        let message = rejection_message(response.status, &response.body);
        tracing::warn!(%method, endpoint, status = response.status, %message, "request rejected");
        Err(SyncError::ServerRejected {
            status: response.status,
            message,
        })
    }

    fn replay_endpoint(&self, change: &QueuedChange) -> String {
        if let Some(endpoint) = &change.endpoint {
            return endpoint.clone();
        }
        let id = match change.change_type {
            ChangeType::Create => None,
            ChangeType::Update | ChangeType::Delete => change.entity_id.as_deref(),
        };
        self.routes.endpoint_for(&change.entity, id)
    }
}

#[async_trait]
impl ChangeSender for SyncGateway {
    async fn send(&self, change: &QueuedChange) -> SyncResult<Value> {
        let endpoint = self.replay_endpoint(change);
        let method = HttpMethod::for_change(change.change_type);
        let body = match (&change.change_type, &change.payload) {
            (ChangeType::Delete, Value::Null) => None,
            (_, payload) => Some(payload),
        };
        tracing::debug!(queue_id = %change.queue_id, %method, endpoint, "replaying change");
        self.execute(method, &endpoint, body, Some(&change.queue_id))
            .await
    }
}

impl std::fmt::Debug for SyncGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncGateway")
            .field("base_url", &self.base_url)
            .field("routes", &self.routes.routes().len())
            .finish()
    }
}

/// Message for a rejected request: the body's `message` or `error` field,
/// else the status text.
fn rejection_message(status: u16, body: &str) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error"] {
            if let Some(Value::String(text)) = fields.get(key) {
                if !text.is_empty() {
                    return text.clone();
                }
            }
        }
    }
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Request failed with status {status}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::http::MockHttpClient;
    use crate::notify::RecordingNotifier;
    use crate::signal::ProcessQueueSignal;
    use serde_json::json;
    use tether_protocol::{is_pending, PENDING_FIELD, QUEUE_ID_FIELD};

    struct Fixture {
        gateway: SyncGateway,
        http: Arc<MockHttpClient>,
        credentials: Arc<StaticCredentials>,
        connectivity: Arc<ConnectivityMonitor>,
        queue: Arc<MutationQueue>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture(online: bool) -> Fixture {
        let http = Arc::new(MockHttpClient::new());
        let credentials = Arc::new(StaticCredentials::new());
        let connectivity = Arc::new(ConnectivityMonitor::new(
            online,
            Arc::new(ProcessQueueSignal::new()),
        ));
        let queue = Arc::new(MutationQueue::in_memory());
        let notifier = Arc::new(RecordingNotifier::new());
        let gateway = SyncGateway::new(
            &EngineConfig::new("https://api.example.com/"),
            http.clone(),
            credentials.clone(),
            connectivity.clone(),
            queue.clone(),
            notifier.clone(),
            RouteTable::default(),
        );
        Fixture {
            gateway,
            http,
            credentials,
            connectivity,
            queue,
            notifier,
        }
    }

    #[tokio::test]
    async fn online_write_goes_direct() {
        let f = fixture(true);
        let response = f
            .gateway
            .post("/chores", json!({"name": "Dishes"}))
            .await
            .unwrap();

        assert_eq!(response["name"], "Dishes");
        assert!(!is_pending(&response));
        assert!(f.queue.is_empty());
        let requests = f.http.requests();
        assert_eq!(requests[0].url, "https://api.example.com/chores");
        assert_eq!(requests[0].method, HttpMethod::Post);
    }

    #[tokio::test]
    async fn offline_write_is_queued_with_pending_response() {
        let f = fixture(false);
        let response = f
            .gateway
            .put("/chores/42", json!({"name": "Laundry"}))
            .await
            .unwrap();

        assert_eq!(response[PENDING_FIELD], true);
        assert_eq!(response["name"], "Laundry");
        assert!(f.http.requests().is_empty());

        let queued = f.queue.entries();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].entity, "chore");
        assert_eq!(queued[0].entity_id.as_deref(), Some("42"));
        assert_eq!(queued[0].change_type, ChangeType::Update);
        assert_eq!(response[QUEUE_ID_FIELD], queued[0].queue_id.as_str());
    }

    #[tokio::test]
    async fn offline_read_fails_with_connectivity_error() {
        let f = fixture(true);
        f.http.set_unreachable(true);
        let err = f.gateway.get("/chores").await.unwrap_err();
        assert!(err.is_connectivity());
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn unreachable_write_is_queued() {
        let f = fixture(true);
        f.http.push_transport_error("connection reset by peer");
        let response = f.gateway.delete("/rewards/9").await.unwrap();

        assert!(is_pending(&response));
        assert_eq!(f.queue.entries()[0].change_type, ChangeType::Delete);
    }

    #[tokio::test]
    async fn deferred_and_direct_only_options() {
        let f = fixture(true);
        let response = f
            .gateway
            .request(
                HttpMethod::Post,
                "/notes",
                Some(json!({"text": "later"})),
                RequestOptions::deferred(),
            )
            .await
            .unwrap();
        assert!(is_pending(&response));
        assert!(f.http.requests().is_empty());

        f.connectivity.report(false);
        let err = f
            .gateway
            .request(
                HttpMethod::Post,
                "/notes",
                Some(json!({"text": "now"})),
                RequestOptions::direct_only(),
            )
            .await
            .unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(f.queue.len(), 1);
    }

    #[tokio::test]
    async fn headers_follow_credentials() {
        let f = fixture(true);
        f.gateway.get("/members").await.unwrap();
        let anonymous = &f.http.requests()[0];
        assert_eq!(anonymous.header("Content-Type"), Some("application/json"));
        assert_eq!(anonymous.header("Authorization"), None);
        assert_eq!(anonymous.header(ACCOUNT_HEADER), None);

        f.credentials.set_token(Some("tok".into()));
        f.credentials.set_account(Some("household-1".into()));
        f.gateway.get("/members").await.unwrap();
        let signed_in = &f.http.requests()[1];
        assert_eq!(signed_in.header("Authorization"), Some("Bearer tok"));
        assert_eq!(signed_in.header(ACCOUNT_HEADER), Some("household-1"));
    }

    #[tokio::test]
    async fn unauthorized_prompts_sign_in_and_is_not_queued() {
        let f = fixture(true);
        f.http.push_response(HttpResponse::new(401, ""));
        let err = f.gateway.post("/chores", json!({})).await.unwrap_err();

        assert!(matches!(err, SyncError::AuthRequired));
        assert_eq!(f.notifier.sign_in_prompts(), 1);
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn rejection_message_comes_from_body() {
        let f = fixture(true);
        f.http
            .push_response(HttpResponse::new(409, r#"{"message":"Already completed"}"#));
        let err = f.gateway.post("/chores/1/complete", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::ServerRejected { status: 409, ref message } if message == "Already completed"
        ));

        f.http.push_response(HttpResponse::new(503, "<html>"));
        let err = f.gateway.get("/chores").await.unwrap_err();
        assert_eq!(err.user_message(), "Service Unavailable");
    }

    #[tokio::test]
    async fn replay_carries_idempotency_key() {
        let f = fixture(false);
        f.gateway.patch("/chores/5", json!({"done": true})).await.unwrap();
        let queued = f.queue.entries().remove(0);

        f.gateway.send(&queued).await.unwrap();
        let replayed = &f.http.requests()[0];
        assert_eq!(replayed.method, HttpMethod::Put);
        assert_eq!(replayed.url, "https://api.example.com/chores/5");
        assert_eq!(replayed.header(IDEMPOTENCY_HEADER), Some(queued.queue_id.as_str()));
    }

    #[test]
    fn replay_endpoint_falls_back_to_routes() {
        let f = fixture(true);
        let change = QueuedChange::from_new(
            NewChange::delete("shopping_item", "17"),
            chrono::Utc::now(),
        );
        assert_eq!(f.gateway.replay_endpoint(&change), "/shopping-items/17");
    }
}
