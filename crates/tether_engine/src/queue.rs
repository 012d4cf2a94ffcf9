//! The durable mutation queue.
//!
//! Writes made while offline are appended to a journal and replayed in
//! enqueue order once connectivity returns. The in-memory queue is the
//! authority during a session; the journal rebuilds it after a reload.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tether_protocol::{JournalRecord, NewChange, QueueId, QueuedChange};
use tether_storage::{encode_frame, scan_frames, JournalBackend, MemoryJournal};
use tokio::sync::watch;

/// Replays queued changes against the server.
#[async_trait]
pub trait ChangeSender: Send + Sync {
    /// Sends one change.
    async fn send(&self, change: &QueuedChange) -> SyncResult<Value>;
}

/// Queue tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Failed replays after which a change is dead-lettered.
    pub max_replay_attempts: u32,
    /// Journal size above which the journal is rewritten after a drain.
    pub compaction_threshold: u64,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_replay_attempts: 5,
            compaction_threshold: 1024 * 1024,
        }
    }
}

/// A change dropped after exhausting its replay attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    /// The dropped change.
    pub change: QueuedChange,
    /// Error of the last attempt.
    pub last_error: String,
    /// When it was dropped.
    pub dropped_at: DateTime<Utc>,
}

impl DeadLetter {
    /// The error describing this dead letter.
    pub fn to_error(&self) -> SyncError {
        SyncError::ReplayExhausted {
            queue_id: self.change.queue_id.to_string(),
            attempts: self.change.attempts,
            last_error: self.last_error.clone(),
        }
    }
}

/// A failed replay that stays queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayFailure {
    /// Queue id.
    pub queue_id: QueueId,
    /// Attempts so far.
    pub attempts: u32,
    /// Error message.
    pub error: String,
}

/// Why a drain pass stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStop {
    /// The server became unreachable.
    Offline,
    /// The server asked for a new sign-in.
    AuthRequired,
}

/// Outcome of a drain request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Another drain was running; this request was folded into it.
    pub absorbed: bool,
    /// Changes replayed successfully, in order.
    pub replayed: Vec<QueueId>,
    /// Changes that failed and stay queued.
    pub failed: Vec<ReplayFailure>,
    /// Changes dropped after exhausting their attempts.
    pub exhausted: Vec<DeadLetter>,
    /// Set when the pass stopped before visiting every change.
    pub stopped: Option<DrainStop>,
    /// Changes still queued after the pass.
    pub remaining: usize,
}

impl DrainReport {
    /// Report of a request absorbed by a running drain.
    pub fn absorbed() -> Self {
        Self {
            absorbed: true,
            ..Self::default()
        }
    }

    /// True if every visited change was replayed and the pass was not cut short.
    pub fn is_clean(&self) -> bool {
        !self.absorbed && self.stopped.is_none() && self.failed.is_empty() && self.exhausted.is_empty()
    }

    /// Message of the first problem, if any.
    pub fn error_message(&self) -> Option<String> {
        if let Some(stop) = self.stopped {
            return Some(match stop {
                DrainStop::Offline => SyncError::connectivity("drain interrupted").user_message(),
                DrainStop::AuthRequired => SyncError::AuthRequired.user_message(),
            });
        }
        if let Some(failure) = self.failed.first() {
            return Some(failure.error.clone());
        }
        self.exhausted.first().map(|d| d.to_error().to_string())
    }
}

struct QueueInner {
    entries: VecDeque<QueuedChange>,
    journal: Box<dyn JournalBackend>,
}

impl QueueInner {
    fn persist(&mut self, record: &JournalRecord) {
        let result = record
            .encode()
            .map_err(SyncError::from)
            .and_then(|payload| Ok(self.journal.append(&encode_frame(&payload))?));
        if let Err(e) = result {
            tracing::error!(
                queue_id = %record.queue_id(),
                record = record.kind(),
                error = %e,
                "failed to persist queue record; change kept in memory only"
            );
        }
    }

    fn position(&self, queue_id: &QueueId) -> Option<usize> {
        self.entries.iter().position(|c| &c.queue_id == queue_id)
    }

    fn remove(&mut self, queue_id: &QueueId) -> Option<QueuedChange> {
        let index = self.position(queue_id)?;
        let removed = self.entries.remove(index);
        self.persist(&JournalRecord::Removed {
            queue_id: queue_id.clone(),
        });
        removed
    }

    fn rewrite(&mut self) -> SyncResult<()> {
        let mut bytes = Vec::new();
        for change in &self.entries {
            let record = JournalRecord::Enqueued {
                change: change.clone(),
            };
            bytes.extend(encode_frame(&record.encode()?));
        }
        self.journal.replace(&bytes)?;
        Ok(())
    }
}

fn apply_record(entries: &mut VecDeque<QueuedChange>, record: JournalRecord) {
    match record {
        JournalRecord::Enqueued { change } => {
            if !entries.iter().any(|c| c.queue_id == change.queue_id) {
                entries.push_back(change);
            }
        }
        JournalRecord::Attempted { queue_id, attempts } => {
            if let Some(change) = entries.iter_mut().find(|c| c.queue_id == queue_id) {
                change.attempts = attempts;
            }
        }
        JournalRecord::Removed { queue_id } => entries.retain(|c| c.queue_id != queue_id),
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Durable FIFO of pending writes.
pub struct MutationQueue {
    inner: Mutex<QueueInner>,
    draining: AtomicBool,
    pending: watch::Sender<usize>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    options: QueueOptions,
}

impl MutationQueue {
    /// Opens a queue over a journal, replaying its records.
    ///
    /// A damaged tail (a crash mid-append) is truncated. Damaged frames that
    /// valid frames follow are skipped and the journal is rewritten without
    /// them. Records that fail to decode are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or truncated.
    pub fn open(mut journal: Box<dyn JournalBackend>, options: QueueOptions) -> SyncResult<Self> {
        let bytes = journal.read_all()?;
        let scan = scan_frames(&bytes);

        if let Some(damage) = scan.damage {
            tracing::warn!(
                offset = damage.offset(),
                damage = ?damage,
                discarded = bytes.len() as u64 - scan.valid_len,
                "truncating damaged journal tail"
            );
            journal.truncate(scan.valid_len)?;
        }
        let repair = !scan.skipped.is_empty();
        if let Some(first) = scan.skipped.first() {
            tracing::warn!(
                offset = first.damage.offset(),
                regions = scan.skipped.len(),
                discarded = scan.skipped_bytes(),
                "skipping damaged journal frames"
            );
        }

        let mut entries = VecDeque::new();
        for frame in scan.frames {
            match JournalRecord::decode(&frame.payload) {
                Ok(record) => apply_record(&mut entries, record),
                Err(e) => tracing::warn!(
                    offset = frame.offset,
                    error = %e,
                    "skipping undecodable journal record"
                ),
            }
        }

        let pending = entries.len();
        let mut inner = QueueInner { entries, journal };
        if repair {
            inner.rewrite()?;
        }
        tracing::info!(pending, "mutation queue opened");

        let (pending_tx, _rx) = watch::channel(pending);
        Ok(Self {
            inner: Mutex::new(inner),
            draining: AtomicBool::new(false),
            pending: pending_tx,
            dead_letters: Mutex::new(Vec::new()),
            options,
        })
    }

    /// Creates a queue over a fresh in-memory journal.
    pub fn in_memory() -> Self {
        let journal: Box<dyn JournalBackend> = Box::new(MemoryJournal::new());
        let (pending, _rx) = watch::channel(0);
        Self {
            inner: Mutex::new(QueueInner {
                entries: VecDeque::new(),
                journal,
            }),
            draining: AtomicBool::new(false),
            pending,
            dead_letters: Mutex::new(Vec::new()),
            options: QueueOptions::default(),
        }
    }

    /// Queue options.
    pub fn options(&self) -> QueueOptions {
        self.options
    }

    /// Appends a change and returns the stored record.
    ///
    /// A CREATE without an id receives a temporary one. Storage failures are
    /// logged; the change is still queued for this session.
    pub fn enqueue(&self, change: NewChange) -> QueuedChange {
        let queued = QueuedChange::from_new(change, Utc::now());
        let len = {
            let mut inner = self.inner.lock();
            inner.persist(&JournalRecord::Enqueued {
                change: queued.clone(),
            });
            inner.entries.push_back(queued.clone());
            inner.entries.len()
        };
        self.pending.send_replace(len);

        tracing::debug!(
            queue_id = %queued.queue_id,
            change_type = %queued.change_type,
            entity = %queued.entity,
            entity_id = queued.entity_id.as_deref().unwrap_or(""),
            pending = len,
            "change enqueued"
        );
        queued
    }

    /// Replays queued changes in order through `sender`.
    ///
    /// Only one drain runs at a time; a concurrent call returns
    /// [`DrainReport::absorbed`] and the running pass picks up anything
    /// enqueued meanwhile.
    pub async fn drain(&self, sender: &dyn ChangeSender) -> DrainReport {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("drain already running; request absorbed");
            return DrainReport {
                remaining: self.len(),
                ..DrainReport::absorbed()
            };
        }
        let _guard = DrainGuard(&self.draining);

        let mut report = DrainReport::default();
        let mut visited: HashSet<QueueId> = HashSet::new();

        loop {
            let next = {
                let inner = self.inner.lock();
                inner
                    .entries
                    .iter()
                    .find(|c| !visited.contains(&c.queue_id))
                    .cloned()
            };
            let Some(change) = next else {
                break;
            };
            visited.insert(change.queue_id.clone());

            match sender.send(&change).await {
                Ok(_) => {
                    self.remove(&change.queue_id);
                    tracing::debug!(queue_id = %change.queue_id, entity = %change.entity, "change replayed");
                    report.replayed.push(change.queue_id);
                }
                Err(SyncError::Connectivity { detail, .. }) => {
                    tracing::info!(queue_id = %change.queue_id, error = %detail, "drain stopped: server unreachable");
                    report.stopped = Some(DrainStop::Offline);
                    break;
                }
                Err(SyncError::AuthRequired) => {
                    tracing::warn!(queue_id = %change.queue_id, "drain stopped: sign-in required");
                    report.stopped = Some(DrainStop::AuthRequired);
                    break;
                }
                Err(e) => self.record_failure(change, &e, &mut report),
            }
        }

        report.remaining = self.len();
        self.maybe_compact();

        tracing::info!(
            replayed = report.replayed.len(),
            failed = report.failed.len(),
            exhausted = report.exhausted.len(),
            remaining = report.remaining,
            "drain finished"
        );
        report
    }

    fn record_failure(&self, change: QueuedChange, error: &SyncError, report: &mut DrainReport) {
        let attempts = change.attempts.saturating_add(1);
        let message = error.to_string();

        if attempts >= self.options.max_replay_attempts {
            if self.remove(&change.queue_id).is_none() {
                return;
            }
            let dead = DeadLetter {
                change: QueuedChange { attempts, ..change },
                last_error: message,
                dropped_at: Utc::now(),
            };
            tracing::warn!(
                queue_id = %dead.change.queue_id,
                entity = %dead.change.entity,
                attempts,
                error = %dead.last_error,
                "queued change exhausted its replay attempts; dead-lettered"
            );
            self.dead_letters.lock().push(dead.clone());
            report.exhausted.push(dead);
            return;
        }

        {
            let mut inner = self.inner.lock();
            let Some(index) = inner.position(&change.queue_id) else {
                return;
            };
            inner.entries[index].attempts = attempts;
            inner.persist(&JournalRecord::Attempted {
                queue_id: change.queue_id.clone(),
                attempts,
            });
        }
        tracing::warn!(
            queue_id = %change.queue_id,
            entity = %change.entity,
            attempts,
            error = %message,
            "replay failed; change stays queued"
        );
        report.failed.push(ReplayFailure {
            queue_id: change.queue_id,
            attempts,
            error: message,
        });
    }

    fn remove(&self, queue_id: &QueueId) -> Option<QueuedChange> {
        let (removed, len) = {
            let mut inner = self.inner.lock();
            let removed = inner.remove(queue_id);
            (removed, inner.entries.len())
        };
        if removed.is_some() {
            self.pending.send_replace(len);
        }
        removed
    }

    /// True while a drain is running.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Number of queued changes.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of queued changes in replay order.
    pub fn entries(&self) -> Vec<QueuedChange> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// Looks up a queued change.
    pub fn get(&self, queue_id: &QueueId) -> Option<QueuedChange> {
        let inner = self.inner.lock();
        inner.entries.iter().find(|c| &c.queue_id == queue_id).cloned()
    }

    /// Drops a queued change without replaying it.
    pub fn drop_change(&self, queue_id: &QueueId) -> Option<QueuedChange> {
        let removed = self.remove(queue_id);
        if let Some(change) = &removed {
            tracing::info!(queue_id = %change.queue_id, entity = %change.entity, "queued change dropped");
            self.maybe_compact();
        }
        removed
    }

    /// Drops every queued change. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let count = {
            let mut inner = self.inner.lock();
            let count = inner.entries.len();
            inner.entries.clear();
            if let Err(e) = inner.journal.replace(&[]) {
                tracing::error!(error = %e, "failed to clear journal");
            }
            count
        };
        self.pending.send_replace(0);
        tracing::info!(count, "mutation queue cleared");
        count
    }

    /// Dead-lettered changes of this session.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().clone()
    }

    /// Takes and clears the dead-letter list.
    pub fn take_dead_letters(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.dead_letters.lock())
    }

    /// Watches the number of queued changes.
    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }

    /// Current journal size in bytes.
    pub fn journal_size(&self) -> SyncResult<u64> {
        Ok(self.inner.lock().journal.size()?)
    }

    /// Rewrites the journal to hold only live changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be rewritten.
    pub fn compact(&self) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        let before = inner.journal.size()?;
        inner.rewrite()?;
        tracing::debug!(before, after = inner.journal.size()?, "journal compacted");
        Ok(())
    }

    fn maybe_compact(&self) {
        let due = {
            let inner = self.inner.lock();
            match inner.journal.size() {
                Ok(0) => false,
                Ok(size) => inner.entries.is_empty() || size > self.options.compaction_threshold,
                Err(_) => false,
            }
        };
        if due {
            if let Err(e) = self.compact() {
                tracing::error!(error = %e, "journal compaction failed");
            }
        }
    }
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationQueue")
            .field("len", &self.len())
            .field("draining", &self.is_draining())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tether_protocol::ChangeType;

    /// Records what it receives and answers from a script.
    #[derive(Default)]
    struct ScriptedSender {
        sent: Mutex<Vec<QueuedChange>>,
        script: Mutex<VecDeque<SyncResult<Value>>>,
    }

    impl ScriptedSender {
        fn push(&self, result: SyncResult<Value>) {
            self.script.lock().push_back(result);
        }

        fn sent_ids(&self) -> Vec<QueueId> {
            self.sent.lock().iter().map(|c| c.queue_id.clone()).collect()
        }
    }

    #[async_trait]
    impl ChangeSender for ScriptedSender {
        async fn send(&self, change: &QueuedChange) -> SyncResult<Value> {
            self.sent.lock().push(change.clone());
            self.script.lock().pop_front().unwrap_or(Ok(json!({})))
        }
    }

    fn rejected() -> SyncResult<Value> {
        Err(SyncError::ServerRejected {
            status: 422,
            message: "invalid".into(),
        })
    }

    fn open(journal: &MemoryJournal, max_attempts: u32) -> MutationQueue {
        MutationQueue::open(
            Box::new(journal.clone()),
            QueueOptions {
                max_replay_attempts: max_attempts,
                ..QueueOptions::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn enqueue_mints_temp_id_for_create() {
        let queue = MutationQueue::in_memory();
        let queued = queue.enqueue(NewChange::create("chore", json!({"name": "Dishes"})));

        assert_eq!(queued.change_type, ChangeType::Create);
        assert!(queued.has_temp_id());
        assert_eq!(queued.payload["id"].as_str(), queued.entity_id.as_deref());
        assert_eq!(queue.len(), 1);
        assert_eq!(*queue.subscribe_pending().borrow(), 1);
    }

    #[tokio::test]
    async fn drain_replays_in_enqueue_order() {
        let queue = MutationQueue::in_memory();
        let ids: Vec<QueueId> = (0..5)
            .map(|i| queue.enqueue(NewChange::update("chore", i.to_string(), json!({"n": i}))).queue_id)
            .collect();
        let sender = ScriptedSender::default();

        let report = queue.drain(&sender).await;

        assert_eq!(sender.sent_ids(), ids);
        assert_eq!(report.replayed, ids);
        assert!(report.is_clean());
        assert!(queue.is_empty());
        assert_eq!(*queue.subscribe_pending().borrow(), 0);
    }

    #[tokio::test]
    async fn same_entity_changes_are_not_collapsed() {
        let queue = MutationQueue::in_memory();
        queue.enqueue(NewChange::update("chore", "7", json!({"name": "a"})));
        queue.enqueue(NewChange::update("chore", "7", json!({"name": "b"})));
        queue.enqueue(NewChange::delete("chore", "7"));
        let sender = ScriptedSender::default();

        queue.drain(&sender).await;
        let sent = sender.sent.lock();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2].change_type, ChangeType::Delete);
    }

    #[tokio::test]
    async fn queue_survives_reload() {
        let journal = MemoryJournal::new();
        let first = {
            let queue = open(&journal, 5);
            let a = queue.enqueue(NewChange::create("note", json!({"text": "a"})));
            queue.enqueue(NewChange::create("note", json!({"text": "b"})));
            a
        };

        let queue = open(&journal, 5);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.entries()[0], first);
    }

    #[tokio::test]
    async fn torn_tail_is_truncated_on_open() {
        let journal = MemoryJournal::new();
        {
            let queue = open(&journal, 5);
            queue.enqueue(NewChange::create("note", json!({"text": "kept"})));
        }
        let valid = journal.data().len();
        let mut torn = journal.clone();
        torn.append(&[b'T', b'Q', 9, 0]).unwrap();

        let queue = open(&journal, 5);
        assert_eq!(queue.len(), 1);
        assert_eq!(journal.data().len(), valid);
    }

    #[tokio::test]
    async fn damaged_middle_record_does_not_lose_later_changes() {
        let journal = MemoryJournal::new();
        let ids: Vec<QueueId> = {
            let queue = open(&journal, 5);
            ["first", "second", "third"]
                .into_iter()
                .map(|text| {
                    queue
                        .enqueue(NewChange::create("note", json!({ "text": text })))
                        .queue_id
                })
                .collect()
        };

        let mut bytes = journal.data();
        let second = scan_frames(&bytes).frames[1].offset as usize;
        bytes[second + tether_storage::FRAME_HEADER_SIZE] ^= 0xFF;
        let damaged = MemoryJournal::with_data(bytes);

        let queue = open(&damaged, 5);
        let live: Vec<QueueId> = queue.entries().into_iter().map(|c| c.queue_id).collect();
        assert_eq!(live, vec![ids[0].clone(), ids[2].clone()]);

        // Rewritten without the damaged frame.
        let scan = scan_frames(&damaged.data());
        assert!(scan.skipped.is_empty());
        assert!(scan.damage.is_none());
        assert_eq!(scan.frames.len(), 2);
    }

    #[tokio::test]
    async fn rejected_change_stays_until_attempts_exhausted() {
        let journal = MemoryJournal::new();
        let queue = open(&journal, 2);
        let queued = queue.enqueue(NewChange::update("reward", "3", json!({"cost": 10})));
        let sender = ScriptedSender::default();

        sender.push(rejected());
        let report = queue.drain(&sender).await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].attempts, 1);
        assert_eq!(queue.get(&queued.queue_id).unwrap().attempts, 1);

        // The attempt count is durable.
        drop(queue);
        let queue = open(&journal, 2);
        assert_eq!(queue.get(&queued.queue_id).unwrap().attempts, 1);

        sender.push(rejected());
        let report = queue.drain(&sender).await;
        assert_eq!(report.exhausted.len(), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.dead_letters().len(), 1);
        assert!(matches!(
            queue.take_dead_letters()[0].to_error(),
            SyncError::ReplayExhausted { attempts: 2, .. }
        ));
        assert!(queue.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn failure_does_not_block_later_changes() {
        let queue = MutationQueue::in_memory();
        let a = queue.enqueue(NewChange::delete("member", "1"));
        let b = queue.enqueue(NewChange::delete("member", "2"));
        let sender = ScriptedSender::default();
        sender.push(rejected());

        let report = queue.drain(&sender).await;
        assert_eq!(report.replayed, vec![b.queue_id]);
        assert_eq!(queue.entries()[0].queue_id, a.queue_id);
    }

    #[tokio::test]
    async fn connectivity_error_stops_pass_without_counting() {
        let queue = MutationQueue::in_memory();
        queue.enqueue(NewChange::delete("member", "1"));
        queue.enqueue(NewChange::delete("member", "2"));
        let sender = ScriptedSender::default();
        sender.push(Err(SyncError::connectivity("connection refused")));

        let report = queue.drain(&sender).await;
        assert_eq!(report.stopped, Some(DrainStop::Offline));
        assert_eq!(sender.sent.lock().len(), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.entries()[0].attempts, 0);
        assert!(report.error_message().is_some());
    }

    #[tokio::test]
    async fn auth_required_stops_pass() {
        let queue = MutationQueue::in_memory();
        queue.enqueue(NewChange::delete("member", "1"));
        let sender = ScriptedSender::default();
        sender.push(Err(SyncError::AuthRequired));

        let report = queue.drain(&sender).await;
        assert_eq!(report.stopped, Some(DrainStop::AuthRequired));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_drain_is_absorbed() {
        struct SlowSender {
            gate: tokio::sync::Notify,
        }

        #[async_trait]
        impl ChangeSender for SlowSender {
            async fn send(&self, _change: &QueuedChange) -> SyncResult<Value> {
                self.gate.notified().await;
                Ok(Value::Null)
            }
        }

        let queue = Arc::new(MutationQueue::in_memory());
        queue.enqueue(NewChange::delete("note", "1"));
        let sender = Arc::new(SlowSender {
            gate: tokio::sync::Notify::new(),
        });

        let running = {
            let queue = Arc::clone(&queue);
            let sender = Arc::clone(&sender);
            tokio::spawn(async move { queue.drain(&*sender).await })
        };
        while !queue.is_draining() {
            tokio::task::yield_now().await;
        }

        // Enqueued during the pass: picked up by the same pass.
        queue.enqueue(NewChange::delete("note", "2"));
        let absorbed = queue.drain(&*sender).await;
        assert!(absorbed.absorbed);
        assert_eq!(absorbed.remaining, 2);

        sender.gate.notify_one();
        tokio::task::yield_now().await;
        sender.gate.notify_one();
        let report = running.await.unwrap();
        assert_eq!(report.replayed.len(), 2);
        assert!(queue.is_empty());
        assert!(!queue.is_draining());
    }

    #[tokio::test]
    async fn journal_is_compacted_once_empty() {
        let journal = MemoryJournal::new();
        let queue = open(&journal, 5);
        queue.enqueue(NewChange::delete("note", "1"));
        assert!(queue.journal_size().unwrap() > 0);

        queue.drain(&ScriptedSender::default()).await;
        assert_eq!(queue.journal_size().unwrap(), 0);
    }

    #[test]
    fn storage_failure_keeps_change_in_memory() {
        let journal = MemoryJournal::new();
        let queue = open(&journal, 5);
        journal.set_fail_writes(true);

        let queued = queue.enqueue(NewChange::create("note", json!({"text": "x"})));
        assert_eq!(queue.get(&queued.queue_id), Some(queued));
        assert!(journal.data().is_empty());
    }

    #[test]
    fn drop_and_clear() {
        let queue = MutationQueue::in_memory();
        let a = queue.enqueue(NewChange::delete("note", "1"));
        queue.enqueue(NewChange::delete("note", "2"));
        queue.enqueue(NewChange::delete("note", "3"));

        assert_eq!(queue.drop_change(&a.queue_id).map(|c| c.queue_id), Some(a.queue_id.clone()));
        assert!(queue.drop_change(&a.queue_id).is_none());
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
