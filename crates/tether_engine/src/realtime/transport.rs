//! Push channel transports.

use crate::error::TransportError;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

/// Opens push connections.
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Connects to `url`.
    async fn connect(&self, url: &Url) -> Result<Box<dyn PushConnection>, TransportError>;
}

/// An open push connection.
#[async_trait]
pub trait PushConnection: Send {
    /// Next text message. `None` once the server closed the connection.
    async fn next_message(&mut self) -> Option<Result<String, TransportError>>;

    /// Closes the connection.
    async fn close(&mut self);
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn PushConnection>, TransportError> {
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::new(e.to_string()))?;
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for WsConnection {
    async fn next_message(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                // Decoding decides whether a binary frame is a valid envelope.
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::new(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "push channel close failed");
        }
    }
}

/// What the next mock connection attempt does.
#[derive(Debug)]
pub enum MockSession {
    /// The attempt fails.
    Fail(String),
    /// The attempt opens, delivers the messages and then the server closes.
    Messages(Vec<String>),
    /// The attempt opens and delivers whatever is sent on the channel; the
    /// server closes when the sender is dropped.
    Channel(mpsc::UnboundedReceiver<String>),
}

impl MockSession {
    /// A live session and the sender feeding it.
    pub fn channel() -> (Self, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MockSession::Channel(rx), tx)
    }
}

/// A scripted push connector for testing.
///
/// Each connection attempt consumes the next scripted session. Once the
/// script is exhausted, attempts open a connection that stays silent until
/// closed.
#[derive(Debug, Default)]
pub struct MockPushConnector {
    script: Mutex<VecDeque<MockSession>>,
    urls: Mutex<Vec<Url>>,
}

impl MockPushConnector {
    /// Creates a connector with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a session to the script.
    pub fn push(&self, session: MockSession) {
        self.script.lock().push_back(session);
    }

    /// URLs of every attempt so far.
    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().clone()
    }

    /// Number of attempts so far.
    pub fn attempts(&self) -> usize {
        self.urls.lock().len()
    }
}

#[async_trait]
impl PushConnector for MockPushConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn PushConnection>, TransportError> {
        self.urls.lock().push(url.clone());
        let session = self.script.lock().pop_front();
        match session {
            Some(MockSession::Fail(message)) => Err(TransportError::new(message)),
            Some(MockSession::Messages(messages)) => Ok(Box::new(MockConnection {
                messages: messages.into(),
                live: None,
                hold: false,
            })),
            Some(MockSession::Channel(rx)) => Ok(Box::new(MockConnection {
                messages: VecDeque::new(),
                live: Some(rx),
                hold: false,
            })),
            None => Ok(Box::new(MockConnection {
                messages: VecDeque::new(),
                live: None,
                hold: true,
            })),
        }
    }
}

struct MockConnection {
    messages: VecDeque<String>,
    live: Option<mpsc::UnboundedReceiver<String>>,
    hold: bool,
}

#[async_trait]
impl PushConnection for MockConnection {
    async fn next_message(&mut self) -> Option<Result<String, TransportError>> {
        if let Some(message) = self.messages.pop_front() {
            return Some(Ok(message));
        }
        if let Some(live) = &mut self.live {
            return live.recv().await.map(Ok);
        }
        if self.hold {
            std::future::pending::<()>().await;
        }
        None
    }

    async fn close(&mut self) {
        self.live = None;
        self.hold = false;
    }
}
