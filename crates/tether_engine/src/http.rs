//! HTTP client abstraction.
//!
//! The gateway talks to the server through [`HttpClient`], so tests and
//! embedders can swap the network stack. [`ReqwestClient`] is the production
//! implementation; [`MockHttpClient`] records requests and answers from a
//! script.

use crate::error::{SyncError, SyncResult, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_protocol::ChangeType;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// True for methods that change server state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, HttpMethod::Get)
    }

    /// Change type recorded when a request with this method is queued.
    pub fn change_type(&self) -> Option<ChangeType> {
        ChangeType::from_method(self.as_str())
    }

    /// Method used to replay a queued change.
    pub fn for_change(change_type: ChangeType) -> Self {
        match change_type {
            ChangeType::Create => HttpMethod::Post,
            ChangeType::Update => HttpMethod::Put,
            ChangeType::Delete => HttpMethod::Delete,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Headers in insertion order.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
}

impl HttpRequest {
    /// Returns a header value (case-insensitive name).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Raw body text.
    pub body: String,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A 200 response with a JSON body.
    pub fn ok(body: &Value) -> Self {
        Self::new(200, body.to_string())
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes HTTP requests.
///
/// An `Err` means no response was received at all (DNS failure, refused
/// connection, timeout). Any status code, including 4xx and 5xx, is `Ok`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Executes a request.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.to_string());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::new(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::new(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

type Handler = Arc<dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;

/// A scripted HTTP client for testing.
///
/// Answers, in order of precedence: a transport failure while unreachable,
/// the next scripted response, the installed handler, or a 200 echoing the
/// request body.
#[derive(Default)]
pub struct MockHttpClient {
    unreachable: AtomicBool,
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    handler: Mutex<Option<Handler>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttpClient {
    /// Creates a reachable mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every request fail at the transport level.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Queues a response.
    pub fn push_response(&self, response: HttpResponse) {
        self.script.lock().push_back(Ok(response));
    }

    /// Queues a transport failure.
    pub fn push_transport_error(&self, message: impl Into<String>) {
        self.script
            .lock()
            .push_back(Err(TransportError::new(message)));
    }

    /// Installs a handler for unscripted requests.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        *self.handler.lock() = Some(Arc::new(handler));
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Requests with the given method.
    pub fn requests_with(&self, method: HttpMethod) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    /// Forgets recorded requests.
    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::new("network unreachable"));
        }
        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            return handler(&request);
        }
        Ok(HttpResponse::ok(
            request.body.as_ref().unwrap_or(&Value::Object(Default::default())),
        ))
    }
}

impl fmt::Debug for MockHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockHttpClient")
            .field("unreachable", &self.unreachable.load(Ordering::SeqCst))
            .field("scripted", &self.script.lock().len())
            .field("requests", &self.requests.lock().len())
            .finish()
    }
}
