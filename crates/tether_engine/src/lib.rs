//! # Tether Engine
//!
//! Offline-first sync engine for REST clients.
//!
//! This crate provides:
//! - Connectivity monitoring with coalesced transition notifications
//! - A durable FIFO mutation queue replayed when the device reconnects
//! - A network gateway that defers writes while offline and answers them
//!   with a synthetic pending response
//! - Optimistic updates with snapshot rollback
//! - A realtime push channel that reconciles local collections
//! - An observable sync status for UI banners
//!
//! ## Architecture
//!
//! ```text
//!  ConnectivitySource ─▶ ConnectivityMonitor ─▶ SyncStateStore
//!                               │ online             │ refetch primary
//!                               ▼                    ▼
//!                       ProcessQueueSignal   CollectionRegistry ◀─ EventDispatcher
//!                               │                    │                   ▲
//!                               ▼                    ▼                   │
//!  caller ─▶ SyncGateway ─▶ MutationQueue ─drain─▶ SyncGateway    RealtimeRouter
//! ```
//!
//! Services are built once by [`SyncEngineBuilder`] and shared behind
//! `Arc`s. Every outer dependency sits behind a trait with an in-memory
//! double exported from this crate: [`HttpClient`] / [`MockHttpClient`],
//! [`PushConnector`] / [`MockPushConnector`], [`ConnectivitySource`] /
//! [`ManualConnectivity`] and [`Notifier`] / [`RecordingNotifier`].
//!
//! ## Key Invariants
//!
//! - Queued changes replay in enqueue order, at most one drain at a time
//! - A change leaves the queue only after the server accepted it
//! - A failed optimistic update restores exactly the snapshot taken
//! - `disconnect` cancels any scheduled push reconnect

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collections;
mod config;
mod connectivity;
mod credentials;
mod engine;
mod error;
mod gateway;
mod http;
mod notify;
mod optimistic;
mod queue;
pub mod realtime;
mod signal;
mod state;

pub use collections::{CollectionRegistry, EntityCollection, EntityStore, Refetcher};
pub use config::{EngineConfig, ReconnectConfig, DEFAULT_NETWORK_REQUIRED_FEATURES};
pub use connectivity::{
    ConnectivityMonitor, ConnectivitySource, ConnectivityState, ManualConnectivity, Subscription,
};
pub use credentials::{CredentialProvider, StaticCredentials};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult, TransportError, CONNECTIVITY_MESSAGE, SIGN_IN_MESSAGE};
pub use gateway::{RequestOptions, SyncGateway};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, MockHttpClient, ReqwestClient};
pub use notify::{Notification, NotificationLevel, Notifier, RecordingNotifier, TracingNotifier};
pub use optimistic::{OptimisticExecutor, OptimisticOutcome, OptimisticUpdate};
pub use queue::{
    ChangeSender, DeadLetter, DrainReport, DrainStop, MutationQueue, QueueOptions, ReplayFailure,
};
pub use realtime::{
    push_url, ConnectionState, DispatchOutcome, DomainEvent, EventDispatcher, MockPushConnector,
    MockSession, PushConnection, PushConnector, RealtimeRouter, RealtimeStats, WsConnector,
};
pub use signal::ProcessQueueSignal;
pub use state::{Banner, SyncStateStore, SyncStatus};

pub use tether_protocol::{
    ChangeType, NewChange, QueueId, QueuedChange, RealtimeEvent, RouteTable,
};
pub use tether_storage::{FileJournal, JournalBackend, MemoryJournal};
