//! End-to-end tests for the assembled engine.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tether_engine::{
    ConnectionState, EngineConfig, FileJournal, HttpMethod, HttpResponse, ManualConnectivity,
    MockHttpClient, MockPushConnector, MockSession, NotificationLevel, OptimisticExecutor,
    OptimisticUpdate, RecordingNotifier, RequestOptions, StaticCredentials, SyncEngine,
    SyncError, SyncStatus,
};
use tether_protocol::{is_pending, IDEMPOTENCY_HEADER, QUEUE_ID_FIELD};

const BASE_URL: &str = "http://api.test";

struct Harness {
    engine: SyncEngine,
    http: Arc<MockHttpClient>,
    push: Arc<MockPushConnector>,
    notifier: Arc<RecordingNotifier>,
    source: ManualConnectivity,
}

impl Harness {
    fn new(online: bool) -> Self {
        Self::with_journal(online, None)
    }

    fn with_journal(online: bool, journal: Option<FileJournal>) -> Self {
        let http = Arc::new(MockHttpClient::new());
        http.set_handler(|request| match request.method {
            HttpMethod::Get => Ok(HttpResponse::ok(&json!([]))),
            _ => Ok(HttpResponse::ok(request.body.as_ref().unwrap_or(&Value::Null))),
        });
        let push = Arc::new(MockPushConnector::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let credentials = Arc::new(
            StaticCredentials::new()
                .with_token("session-token")
                .with_account("acct-1"),
        );

        let mut builder = SyncEngine::builder(EngineConfig::new(BASE_URL))
            .initially_online(online)
            .http_client(http.clone())
            .push_connector(push.clone())
            .credentials(credentials)
            .notifier(notifier.clone())
            .collection("chore", true)
            .collection("reward", false);
        if let Some(journal) = journal {
            builder = builder.journal(journal);
        }

        Self {
            engine: builder.build().unwrap(),
            http,
            push,
            notifier,
            source: ManualConnectivity::new(online),
        }
    }
}

async fn wait_for_status<F>(engine: &SyncEngine, predicate: F) -> SyncStatus
where
    F: Fn(&SyncStatus) -> bool,
{
    let mut rx = engine.state().subscribe();
    let status = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s)))
        .await
        .expect("timed out waiting for status")
        .expect("status channel closed")
        .clone();
    status
}

async fn wait_for_request(http: &MockHttpClient, method: HttpMethod, url: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !http.requests_with(method).iter().any(|r| r.url == url) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for request");
}

#[tokio::test]
async fn offline_create_replays_after_reconnect() {
    let h = Harness::new(false);
    h.engine.start(&h.source);

    let response = h
        .engine
        .gateway()
        .post("/chores", json!({"name": "Take out trash"}))
        .await
        .unwrap();
    assert!(is_pending(&response));
    assert!(h.http.requests().is_empty());
    wait_for_status(&h.engine, |s| s.pending_sync_count == 1).await;

    h.source.set_online(true);
    let status = wait_for_status(&h.engine, |s| {
        s.is_online && s.pending_sync_count == 0 && s.last_sync_time.is_some() && !s.sync_in_progress
    })
    .await;
    assert!(status.last_sync_error.is_none());
    assert!(h.engine.queue().is_empty());

    let posts = h.http.requests_with(HttpMethod::Post);
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].url, "http://api.test/chores");
    assert_eq!(posts[0].body.as_ref().unwrap()["name"], "Take out trash");
    assert_eq!(
        posts[0].header(IDEMPOTENCY_HEADER),
        response[QUEUE_ID_FIELD].as_str()
    );
    assert_eq!(posts[0].header("x-account-id"), Some("acct-1"));

    // The primary collection is refetched once the replay has landed.
    wait_for_request(&h.http, HttpMethod::Get, "http://api.test/chores").await;
    let requests = h.http.requests();
    let post = requests.iter().position(|r| r.method == HttpMethod::Post);
    let get = requests.iter().position(|r| r.method == HttpMethod::Get);
    assert!(post < get, "refetch ran before the replay: {:?}", requests);
}

#[tokio::test]
async fn reconnect_refetch_sees_replayed_writes() {
    let h = Harness::new(false);
    let server: Arc<Mutex<Vec<Value>>> = Arc::default();
    let rows = server.clone();
    h.http.set_handler(move |request| match request.method {
        HttpMethod::Get => Ok(HttpResponse::ok(&Value::Array(rows.lock().clone()))),
        _ => {
            let mut row = request.body.clone().unwrap_or(Value::Null);
            let mut rows = rows.lock();
            row["id"] = json!(rows.len() + 1);
            rows.push(row.clone());
            Ok(HttpResponse::ok(&row))
        }
    });
    h.engine.start(&h.source);

    h.engine
        .gateway()
        .post("/chores", json!({"name": "Water plants"}))
        .await
        .unwrap();
    wait_for_status(&h.engine, |s| s.pending_sync_count == 1).await;

    h.source.set_online(true);
    wait_for_request(&h.http, HttpMethod::Get, "http://api.test/chores").await;
    let chores = h.engine.collection("chore").unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while chores.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("collection never refetched");

    assert_eq!(server.lock().len(), 1);
    let items = chores.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], 1);
    assert_eq!(items[0]["name"], "Water plants");
    assert!(!is_pending(&items[0]));
}

#[tokio::test]
async fn rejected_update_restores_a_copy_of_the_snapshot() {
    let notifier = Arc::new(RecordingNotifier::new());
    let executor = OptimisticExecutor::new(notifier.clone());
    let initial = json!([{"id": 1, "name": "a"}]);
    let state = Arc::new(Mutex::new(initial.clone()));
    let restored = Arc::new(Mutex::new(Vec::<Value>::new()));

    let (read, write, apply) = (state.clone(), state.clone(), state.clone());
    let calls = restored.clone();
    let outcome = executor
        .execute(
            OptimisticUpdate::new(
                move || read.lock().clone(),
                move |snapshot: Value| {
                    calls.lock().push(snapshot.clone());
                    *write.lock() = snapshot;
                },
                || async { Err::<Value, _>(SyncError::failed("boom")) },
            )
            .apply(move || apply.lock()[0]["name"] = json!("b"))
            .error_message("Could not rename chore"),
        )
        .await;

    assert_eq!(outcome.error().map(ToString::to_string).as_deref(), Some("boom"));
    assert_eq!(*restored.lock(), vec![initial.clone()]);
    assert_eq!(*state.lock(), initial);
    assert_eq!(
        notifier.messages(NotificationLevel::Error),
        vec!["Could not rename chore".to_string()]
    );
}

#[tokio::test]
async fn delete_event_for_unknown_item_is_a_no_op() {
    let h = Harness::new(true);
    let chores = h.engine.collection("chore").unwrap();
    chores.set_items(vec![json!({"id": "a", "name": "Dishes"})]);

    let outcome = h
        .engine
        .router()
        .handle_message(r#"{"type":"chore.deleted","data":{"id":"x"}}"#)
        .unwrap();

    assert!(!outcome.reconciled);
    assert_eq!(chores.items(), vec![json!({"id": "a", "name": "Dishes"})]);
}

#[tokio::test]
async fn pushed_events_reconcile_collections() {
    let h = Harness::new(true);
    let (session, tx) = MockSession::channel();
    h.push.push(session);
    let chores = h.engine.collection("chore").unwrap();
    let mut revisions = chores.subscribe();

    h.engine.start(&h.source);
    wait_for_status(&h.engine, |s| s.realtime_connected).await;
    assert_eq!(
        h.push.urls()[0].as_str(),
        "ws://api.test/ws?token=session-token"
    );

    tx.send(r#"{"type":"chore.created","data":{"id":"c1","name":"Laundry"}}"#.into())
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), revisions.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chores.get("c1").unwrap()["name"], "Laundry");

    h.engine.shutdown();
    assert_eq!(h.engine.router().state(), ConnectionState::Closed);
    assert!(!h.engine.connectivity().is_attached());
}

#[tokio::test(start_paused = true)]
async fn reconnect_delays_back_off_and_reset_after_success() {
    let h = Harness::new(true);
    h.push.push(MockSession::Messages(Vec::new()));
    h.push.push(MockSession::Fail("connection refused".into()));
    h.push.push(MockSession::Messages(Vec::new()));

    h.engine.start(&h.source);
    while h.engine.router().stats().connection_attempts < 4 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let stats = h.engine.router().stats();
    assert_eq!(
        stats.reconnect_delays,
        vec![
            Duration::from_millis(1000),
            Duration::from_millis(2000),
            Duration::from_millis(1000),
        ]
    );
    assert_eq!(stats.successful_opens, 3);
    assert_eq!(stats.last_error.as_deref(), Some("connection refused"));

    h.engine.shutdown();
    let attempts = h.push.attempts();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.push.attempts(), attempts);
}

#[tokio::test]
async fn queued_changes_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.journal");

    {
        let h = Harness::with_journal(false, Some(FileJournal::open(&path).unwrap()));
        let gateway = h.engine.gateway();
        gateway.post("/chores", json!({"name": "Water plants"})).await.unwrap();
        gateway.put("/chores/7", json!({"name": "Walk dog"})).await.unwrap();
        gateway.delete("/rewards/3").await.unwrap();
        assert_eq!(h.engine.queue().len(), 3);
    }

    let h = Harness::with_journal(true, Some(FileJournal::open(&path).unwrap()));
    assert_eq!(h.engine.state().status().pending_sync_count, 3);
    h.engine.start(&h.source);
    wait_for_status(&h.engine, |s| {
        s.pending_sync_count == 0 && s.last_sync_time.is_some() && !s.sync_in_progress
    })
    .await;

    let replayed: Vec<(HttpMethod, String)> = h
        .http
        .requests()
        .into_iter()
        .filter(|r| r.method != HttpMethod::Get)
        .map(|r| (r.method, r.url))
        .collect();
    assert_eq!(
        replayed,
        vec![
            (HttpMethod::Post, "http://api.test/chores".to_string()),
            (HttpMethod::Put, "http://api.test/chores/7".to_string()),
            (HttpMethod::Delete, "http://api.test/rewards/3".to_string()),
        ]
    );
    assert_eq!(h.engine.queue().journal_size().unwrap(), 0);
}

#[tokio::test]
async fn rejected_replays_are_dead_lettered() {
    let h = Harness::new(true);
    h.http.set_handler(|_| Ok(HttpResponse::new(422, r#"{"message":"name is required"}"#)));

    let response = h
        .engine
        .gateway()
        .request(
            HttpMethod::Post,
            "/shopping-items",
            Some(json!({"quantity": 2})),
            RequestOptions::deferred(),
        )
        .await
        .unwrap();
    assert!(is_pending(&response));

    for attempt in 1..5 {
        let report = h.engine.drain_now().await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].attempts, attempt);
        assert_eq!(report.remaining, 1);
    }
    assert_eq!(
        h.engine.state().status().last_sync_error.as_deref(),
        Some("server rejected request (422): name is required")
    );

    let report = h.engine.drain_now().await;
    assert_eq!(report.exhausted.len(), 1);
    assert!(h.engine.queue().is_empty());
    assert_eq!(h.engine.queue().dead_letters().len(), 1);
    assert_eq!(
        h.notifier.messages(NotificationLevel::Warning),
        vec!["A change to shopping item could not be synced and was discarded.".to_string()]
    );
    assert_eq!(h.engine.state().status().pending_sync_count, 0);
}

#[tokio::test]
async fn expired_session_stops_the_drain() {
    let h = Harness::new(true);
    h.engine
        .gateway()
        .request(
            HttpMethod::Patch,
            "/members/m1",
            Some(json!({"points": 40})),
            RequestOptions::deferred(),
        )
        .await
        .unwrap();
    h.http.push_response(HttpResponse::new(401, ""));

    let report = h.engine.drain_now().await;
    assert_eq!(report.stopped, Some(tether_engine::DrainStop::AuthRequired));
    assert_eq!(report.remaining, 1);
    assert_eq!(h.notifier.sign_in_prompts(), 1);
    assert_eq!(h.engine.queue().entries()[0].attempts, 0);

    let report = h.engine.drain_now().await;
    assert!(report.is_clean());
    let replay = h.http.requests_with(HttpMethod::Put);
    assert_eq!(replay.last().unwrap().url, "http://api.test/members/m1");
}
