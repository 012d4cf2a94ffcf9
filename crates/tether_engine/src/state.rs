//! Sync status for the UI.

use crate::collections::Refetcher;
use crate::queue::DrainReport;
use crate::signal::ProcessQueueSignal;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Observable sync status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Whether the device is online.
    pub is_online: bool,
    /// Changes waiting to be replayed.
    pub pending_sync_count: usize,
    /// A drain or refetch is running.
    pub sync_in_progress: bool,
    /// When the last sync completed cleanly.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Error of the last sync, cleared by a clean one.
    pub last_sync_error: Option<String>,
    /// Whether the push channel is open.
    pub realtime_connected: bool,
}

/// A status banner to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum Banner {
    /// The device is offline.
    Offline,
    /// Changes are waiting to sync.
    PendingChanges(usize),
}

impl SyncStatus {
    /// Banners to show, most important first.
    pub fn banners(&self) -> Vec<Banner> {
        let mut banners = Vec::new();
        if !self.is_online {
            banners.push(Banner::Offline);
        }
        if self.pending_sync_count > 0 {
            banners.push(Banner::PendingChanges(self.pending_sync_count));
        }
        banners
    }

    /// The most important banner.
    pub fn banner(&self) -> Option<Banner> {
        self.banners().into_iter().next()
    }
}

/// Owns [`SyncStatus`].
pub struct SyncStateStore {
    status: watch::Sender<SyncStatus>,
    active_syncs: Mutex<usize>,
    signal: Arc<ProcessQueueSignal>,
    refetcher: Option<Arc<dyn Refetcher>>,
    refetch_after_drain: bool,
    refetch_due: AtomicBool,
    network_required: HashSet<String>,
}

impl SyncStateStore {
    /// Creates a store.
    pub fn new<I, S>(
        initial_online: bool,
        signal: Arc<ProcessQueueSignal>,
        refetcher: Option<Arc<dyn Refetcher>>,
        network_required: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (status, _rx) = watch::channel(SyncStatus {
            is_online: initial_online,
            ..SyncStatus::default()
        });
        Self {
            status,
            active_syncs: Mutex::new(0),
            signal,
            refetcher,
            refetch_after_drain: false,
            refetch_due: AtomicBool::new(false),
            network_required: network_required.into_iter().map(Into::into).collect(),
        }
    }

    /// Leaves the reconnect refetch to [`refetch_if_due`](Self::refetch_if_due).
    ///
    /// Used when a queue worker drains on the signal and refetches once the
    /// replay has reached the server.
    pub fn with_refetch_after_drain(mut self) -> Self {
        self.refetch_after_drain = true;
        self
    }

    /// Snapshot of the status.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Watches the status.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Records connectivity.
    ///
    /// On a transition to online the process-queue signal is raised, then
    /// primary collections are refetched. With
    /// [`with_refetch_after_drain`](Self::with_refetch_after_drain) the
    /// refetch is only marked due. Returns true on that transition.
    pub async fn set_online_status(&self, online: bool) -> bool {
        let went_online = {
            let mut went_online = false;
            self.status.send_if_modified(|status| {
                if status.is_online == online {
                    return false;
                }
                went_online = online;
                status.is_online = online;
                true
            });
            went_online
        };
        if !went_online {
            return false;
        }

        tracing::info!("back online; draining queue and refetching");
        if self.refetch_after_drain {
            self.refetch_due.store(true, Ordering::Release);
            self.signal.raise();
            return true;
        }
        self.signal.raise();
        self.refetch_primary().await;
        true
    }

    /// Runs a reconnect refetch marked due by
    /// [`set_online_status`](Self::set_online_status). Returns true if one ran.
    pub async fn refetch_if_due(&self) -> bool {
        if !self.refetch_due.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.refetch_primary().await;
        true
    }

    async fn refetch_primary(&self) {
        let Some(refetcher) = &self.refetcher else {
            return;
        };
        self.begin_sync();
        let result = refetcher.refetch_primary().await;
        self.finish_sync(result.map_err(|e| e.user_message()));
    }

    /// Counts one more pending change.
    pub fn increment_pending_sync(&self) {
        self.status.send_modify(|s| s.pending_sync_count += 1);
    }

    /// Counts one less pending change, never below zero.
    pub fn decrement_pending_sync(&self) {
        self.status
            .send_modify(|s| s.pending_sync_count = s.pending_sync_count.saturating_sub(1));
    }

    /// Sets the pending change count.
    pub fn set_pending_sync_count(&self, count: usize) {
        self.status.send_if_modified(|s| {
            let changed = s.pending_sync_count != count;
            s.pending_sync_count = count;
            changed
        });
    }

    /// Marks a sync as started. Nested calls are counted.
    pub fn begin_sync(&self) {
        let mut active = self.active_syncs.lock();
        *active += 1;
        self.status.send_if_modified(|s| {
            let changed = !s.sync_in_progress;
            s.sync_in_progress = true;
            changed
        });
    }

    /// Marks a sync as finished with its result.
    pub fn finish_sync(&self, result: Result<(), String>) {
        self.end_sync();
        self.record_result(result);
    }

    /// Marks a sync as finished without recording a result.
    pub fn end_sync(&self) {
        let mut active = self.active_syncs.lock();
        *active = active.saturating_sub(1);
        let still_active = *active > 0;
        self.status.send_if_modified(|s| {
            let changed = s.sync_in_progress != still_active;
            s.sync_in_progress = still_active;
            changed
        });
    }

    fn record_result(&self, result: Result<(), String>) {
        self.status.send_modify(|s| match result {
            Ok(()) => {
                s.last_sync_time = Some(Utc::now());
                s.last_sync_error = None;
            }
            Err(message) => s.last_sync_error = Some(message),
        });
    }

    /// Records the outcome of a queue drain.
    ///
    /// An absorbed report carries no outcome and leaves the status alone.
    pub fn record_drain(&self, report: &DrainReport) {
        if report.absorbed {
            return;
        }
        self.set_pending_sync_count(report.remaining);
        self.record_result(match report.error_message() {
            Some(message) => Err(message),
            None => Ok(()),
        });
    }

    /// Records the push channel state.
    pub fn set_realtime_connected(&self, connected: bool) {
        self.status.send_if_modified(|s| {
            let changed = s.realtime_connected != connected;
            s.realtime_connected = connected;
            changed
        });
    }

    /// Whether a feature can be used now.
    ///
    /// Everything is available online. Offline, only features outside the
    /// network-required list are.
    pub fn is_feature_available(&self, feature: &str) -> bool {
        self.status.borrow().is_online || !self.network_required.contains(feature)
    }
}

impl std::fmt::Debug for SyncStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStateStore")
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SyncError, SyncResult};
    use crate::queue::ReplayFailure;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tether_protocol::QueueId;

    #[derive(Default)]
    struct CountingRefetcher {
        primary: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Refetcher for CountingRefetcher {
        async fn refetch(&self, _entity: &str) -> SyncResult<usize> {
            Ok(0)
        }

        async fn refetch_primary(&self) -> SyncResult<()> {
            self.primary.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SyncError::connectivity("timeout"));
            }
            Ok(())
        }
    }

    fn store(online: bool, refetcher: Arc<CountingRefetcher>) -> (SyncStateStore, Arc<ProcessQueueSignal>) {
        let signal = Arc::new(ProcessQueueSignal::new());
        let store = SyncStateStore::new(
            online,
            signal.clone(),
            Some(refetcher),
            ["export_data"],
        );
        (store, signal)
    }

    #[tokio::test]
    async fn reconnect_raises_signal_then_refetches() {
        let refetcher = Arc::new(CountingRefetcher::default());
        let (store, signal) = store(false, refetcher.clone());

        assert!(store.set_online_status(true).await);
        assert_eq!(signal.raised_count(), 1);
        assert_eq!(refetcher.primary.load(Ordering::SeqCst), 1);

        let status = store.status();
        assert!(status.is_online);
        assert!(!status.sync_in_progress);
        assert!(status.last_sync_time.is_some());

        // Not a transition.
        assert!(!store.set_online_status(true).await);
        assert!(!store.set_online_status(false).await);
        assert_eq!(signal.raised_count(), 1);
        assert_eq!(refetcher.primary.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refetch_is_recorded() {
        let refetcher = Arc::new(CountingRefetcher {
            fail: true,
            ..Default::default()
        });
        let (store, _) = store(false, refetcher);
        store.set_online_status(true).await;
        assert!(store.status().last_sync_error.is_some());
    }

    #[test]
    fn pending_count_clamps_at_zero() {
        let (store, _) = store(true, Arc::default());
        store.decrement_pending_sync();
        assert_eq!(store.status().pending_sync_count, 0);

        store.increment_pending_sync();
        store.increment_pending_sync();
        store.decrement_pending_sync();
        assert_eq!(store.status().pending_sync_count, 1);

        store.set_pending_sync_count(7);
        assert_eq!(store.status().banner(), Some(Banner::PendingChanges(7)));
    }

    #[test]
    fn nested_syncs() {
        let (store, _) = store(true, Arc::default());
        store.begin_sync();
        store.begin_sync();
        store.finish_sync(Ok(()));
        assert!(store.status().sync_in_progress);
        store.finish_sync(Err("boom".into()));
        let status = store.status();
        assert!(!status.sync_in_progress);
        assert_eq!(status.last_sync_error.as_deref(), Some("boom"));
    }

    #[test]
    fn drain_reports_update_status() {
        let (store, _) = store(true, Arc::default());
        store.record_drain(&DrainReport {
            remaining: 2,
            failed: vec![ReplayFailure {
                queue_id: QueueId::from("q1"),
                attempts: 1,
                error: "rejected".into(),
            }],
            ..DrainReport::default()
        });
        let status = store.status();
        assert_eq!(status.pending_sync_count, 2);
        assert_eq!(status.last_sync_error.as_deref(), Some("rejected"));

        store.record_drain(&DrainReport::default());
        let status = store.status();
        assert_eq!(status.pending_sync_count, 0);
        assert!(status.last_sync_error.is_none());
        assert!(status.last_sync_time.is_some());
    }

    #[test]
    fn absorbed_drain_keeps_pending_count() {
        let (store, _) = store(true, Arc::default());
        store.set_pending_sync_count(3);
        store.record_drain(&DrainReport::absorbed());
        let status = store.status();
        assert_eq!(status.pending_sync_count, 3);
        assert!(status.last_sync_time.is_none());
        assert_eq!(status.banner(), Some(Banner::PendingChanges(3)));
    }

    #[tokio::test]
    async fn refetch_can_wait_for_the_drain() {
        let refetcher = Arc::new(CountingRefetcher::default());
        let (store, signal) = store(false, refetcher.clone());
        let store = store.with_refetch_after_drain();

        assert!(!store.refetch_if_due().await);
        assert!(store.set_online_status(true).await);
        assert_eq!(signal.raised_count(), 1);
        assert_eq!(refetcher.primary.load(Ordering::SeqCst), 0);

        assert!(store.refetch_if_due().await);
        assert_eq!(refetcher.primary.load(Ordering::SeqCst), 1);
        assert!(!store.refetch_if_due().await);
        assert!(store.status().last_sync_time.is_some());
    }

    #[test]
    fn status_serializes_for_ui() {
        let (store, _) = store(false, Arc::default());
        store.set_pending_sync_count(3);
        let value = serde_json::to_value(store.status()).unwrap();
        assert_eq!(value["isOnline"], false);
        assert_eq!(value["pendingSyncCount"], 3);
        assert!(value["lastSyncTime"].is_null());
        let banner = serde_json::to_value(Banner::PendingChanges(3)).unwrap();
        assert_eq!(banner, serde_json::json!({"kind": "pending_changes", "count": 3}));
    }

    #[test]
    fn feature_availability() {
        let (store, _) = store(false, Arc::default());
        assert!(!store.is_feature_available("export_data"));
        assert!(store.is_feature_available("complete_chore"));
        assert_eq!(store.status().banners(), vec![Banner::Offline]);
    }
}
