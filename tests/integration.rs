//! End-to-end scheduler scenarios on a hand-driven clock, a scripted
//! sender, and an in-memory bucket.
//!
//! These run on the current-thread test runtime, so the dispatcher task
//! only makes progress while a test awaits; submitting, moving the clock,
//! and waking are deterministic with respect to dispatch.

use std::{sync::Arc, time::Duration};

use courier::{
    clock::ManualClock,
    error::Error,
    message::{Message, Record, Status},
    scheduler::Scheduler,
    sender::{ScriptedSender, SendOutcome},
    store::{memory::MemoryObjectStore, StateStore},
};

struct Harness {
    scheduler: Scheduler,
    clock: Arc<ManualClock>,
    sender: Arc<ScriptedSender>,
    bucket: MemoryObjectStore,
    store: StateStore,
}

fn state_store(bucket: &MemoryObjectStore) -> StateStore {
    StateStore::new(Arc::new(bucket.clone()), "state", "success", "failed")
}

async fn harness(start: f64, sender: ScriptedSender) -> Harness {
    let bucket = MemoryObjectStore::new();
    let store = state_store(&bucket);
    let clock = Arc::new(ManualClock::new(start));
    let sender = Arc::new(sender);

    let scheduler = Scheduler::start()
        .store(store.clone())
        .sender(sender.clone())
        .clock(clock.clone())
        .call()
        .await
        .expect("scheduler start");

    Harness {
        scheduler,
        clock,
        sender,
        bucket,
        store,
    }
}

fn message(id: &str) -> Message {
    Message {
        message_id: id.to_owned(),
        content: "hello".to_owned(),
        metadata: None,
    }
}

const POLL: Duration = Duration::from_millis(5);
const POLL_ROUNDS: usize = 1000;

async fn wait_until_succeeded(scheduler: &Scheduler, n: u64) {
    for _ in 0..POLL_ROUNDS {
        if scheduler.stats().await.total_succeeded == n {
            return;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("timed out waiting for {n} successes");
}

async fn wait_until_failed(scheduler: &Scheduler, n: u64) {
    for _ in 0..POLL_ROUNDS {
        if scheduler.stats().await.total_failed == n {
            return;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("timed out waiting for {n} failures");
}

/// Waits until the active document for `id` records `attempts` completed
/// attempts, i.e. the dispatcher has rescheduled it that many times.
async fn wait_for_attempts(store: &StateStore, id: &str, attempts: u32) {
    for _ in 0..POLL_ROUNDS {
        if let Some(record) = store.get_active(id).await.expect("get active") {
            if record.attempt_count == attempts {
                return;
            }
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("timed out waiting for attempt {attempts} of {id}");
}

fn keys_under(bucket: &MemoryObjectStore, prefix: &str) -> Vec<String> {
    bucket
        .keys()
        .into_iter()
        .filter(|key| key.starts_with(prefix))
        .collect()
}

fn document(bucket: &MemoryObjectStore, key: &str) -> Record {
    let body = bucket
        .object(key)
        .unwrap_or_else(|| panic!("missing document {key}"));
    serde_json::from_slice(&body).expect("decode document")
}

#[tokio::test]
async fn delivers_on_first_attempt() {
    let h = harness(1000.0, ScriptedSender::new([SendOutcome::Delivered])).await;
    h.scheduler.submit(message("m1")).await.unwrap();

    h.clock.set(1000.01);
    h.scheduler.wake();
    wait_until_succeeded(&h.scheduler, 1).await;

    assert!(h.store.list_active().await.unwrap().is_empty());
    assert_eq!(
        keys_under(&h.bucket, "success/"),
        vec!["success/1000010_m1.json"]
    );

    let record = document(&h.bucket, "success/1000010_m1.json");
    assert_eq!(record.attempt_count, 0);
    assert_eq!(record.status, Status::Succeeded);
    assert_eq!(record.created_at, 1000.0);

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn retries_until_success() {
    let h = harness(
        2000.0,
        ScriptedSender::new([
            SendOutcome::TransientFailure,
            SendOutcome::TransientFailure,
            SendOutcome::Delivered,
        ]),
    )
    .await;
    h.scheduler.submit(message("m2")).await.unwrap();

    h.clock.set(2000.01);
    h.scheduler.wake();
    wait_for_attempts(&h.store, "m2", 1).await;
    let record = h.store.get_active("m2").await.unwrap().unwrap();
    assert_eq!(record.next_retry_at, 2060.0);

    h.clock.set(2060.01);
    h.scheduler.wake();
    wait_for_attempts(&h.store, "m2", 2).await;
    let record = h.store.get_active("m2").await.unwrap().unwrap();
    assert_eq!(record.next_retry_at, 2300.0);

    h.clock.set(2300.01);
    h.scheduler.wake();
    wait_until_succeeded(&h.scheduler, 1).await;

    assert!(h.store.list_active().await.unwrap().is_empty());
    let record = document(&h.bucket, "success/2300010_m2.json");
    assert_eq!(record.attempt_count, 2);
    assert_eq!(record.status, Status::Succeeded);

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn exhausts_retries_and_dead_letters() {
    let h = harness(3000.0, ScriptedSender::always(SendOutcome::TransientFailure)).await;
    h.scheduler.submit(message("m3")).await.unwrap();

    // the full schedule: 0, 60, 300, 1800, 7200, 21600 seconds from creation
    for (wake_at, attempts) in [
        (3000.01, 1),
        (3060.01, 2),
        (3300.01, 3),
        (4800.01, 4),
        (10200.01, 5),
    ] {
        h.clock.set(wake_at);
        h.scheduler.wake();
        wait_for_attempts(&h.store, "m3", attempts).await;
    }

    h.clock.set(24600.01);
    h.scheduler.wake();
    wait_until_failed(&h.scheduler, 1).await;

    assert!(h.store.list_active().await.unwrap().is_empty());
    let record = document(&h.bucket, "failed/24600010_m3.json");
    assert_eq!(record.attempt_count, 6);
    assert_eq!(record.status, Status::Failed);
    assert_eq!(h.sender.calls().len(), 6);

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn permanent_failure_dead_letters_immediately() {
    let h = harness(6000.0, ScriptedSender::new([SendOutcome::PermanentFailure])).await;
    h.scheduler.submit(message("m4")).await.unwrap();

    h.clock.set(6000.01);
    h.scheduler.wake();
    wait_until_failed(&h.scheduler, 1).await;

    assert!(h.store.list_active().await.unwrap().is_empty());
    let record = document(&h.bucket, "failed/6000010_m4.json");
    assert_eq!(record.attempt_count, 1);
    assert_eq!(record.status, Status::Failed);
    assert_eq!(h.sender.calls().len(), 1);

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn recovers_pending_state_after_restart() {
    let h = harness(5000.0, ScriptedSender::new([SendOutcome::TransientFailure])).await;
    h.scheduler.submit(message("m5")).await.unwrap();

    h.clock.set(5000.01);
    h.scheduler.wake();
    wait_for_attempts(&h.store, "m5", 1).await;
    let persisted = h.store.get_active("m5").await.unwrap().unwrap();
    assert_eq!(persisted.next_retry_at, 5060.0);

    h.scheduler.shutdown().await;

    // restart over the same bucket
    let store = state_store(&h.bucket);
    let clock = Arc::new(ManualClock::new(5060.01));
    let scheduler = Scheduler::start()
        .store(store.clone())
        .sender(Arc::new(ScriptedSender::new([SendOutcome::Delivered])))
        .clock(clock)
        .call()
        .await
        .unwrap();

    // recovery must not rewrite the surviving record
    assert_eq!(store.get_active("m5").await.unwrap(), Some(persisted));
    assert_eq!(scheduler.stats().await.pending, 1);

    scheduler.wake();
    wait_until_succeeded(&scheduler, 1).await;

    assert!(store.list_active().await.unwrap().is_empty());
    let record = document(&h.bucket, "success/5060010_m5.json");
    assert_eq!(record.attempt_count, 1);
    assert_eq!(record.status, Status::Succeeded);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn equal_due_times_dispatch_in_submission_order() {
    let h = harness(
        4000.0,
        ScriptedSender::new([
            SendOutcome::TransientFailure,
            SendOutcome::TransientFailure,
            SendOutcome::Delivered,
            SendOutcome::Delivered,
        ]),
    )
    .await;
    h.scheduler.submit(message("a")).await.unwrap();
    h.scheduler.submit(message("b")).await.unwrap();

    h.clock.set(4000.01);
    h.scheduler.wake();
    wait_for_attempts(&h.store, "a", 1).await;
    wait_for_attempts(&h.store, "b", 1).await;

    h.clock.set(4060.01);
    h.scheduler.wake();
    wait_until_succeeded(&h.scheduler, 2).await;

    assert_eq!(h.sender.calls(), vec!["a", "b", "a", "b"]);

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn retry_times_do_not_drift_with_dispatch_latency() {
    let h = harness(7000.0, ScriptedSender::always(SendOutcome::TransientFailure)).await;
    h.scheduler.submit(message("m6")).await.unwrap();

    // first attempt happens 50s late; the retry is still anchored to creation
    h.clock.set(7050.0);
    h.scheduler.wake();
    wait_for_attempts(&h.store, "m6", 1).await;

    let record = h.store.get_active("m6").await.unwrap().unwrap();
    assert_eq!(record.next_retry_at, 7060.0);
    assert_eq!(record.created_at, 7000.0);

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn rejects_duplicate_pending_identifiers() {
    let h = harness(8000.0, ScriptedSender::always(SendOutcome::TransientFailure)).await;
    h.scheduler.submit(message("dup")).await.unwrap();

    match h.scheduler.submit(message("dup")).await {
        Err(Error::DuplicateMessage { message_id }) => assert_eq!(message_id, "dup"),
        other => panic!("expected duplicate rejection, got {other:?}"),
    }
    assert_eq!(h.scheduler.stats().await.total_submitted, 1);

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn rejects_empty_identifier() {
    let h = harness(8000.0, ScriptedSender::always(SendOutcome::Delivered)).await;
    assert!(matches!(
        h.scheduler.submit(message("")).await,
        Err(Error::EmptyMessageId)
    ));
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn rejects_submissions_during_shutdown() {
    let h = harness(8000.0, ScriptedSender::always(SendOutcome::Delivered)).await;
    h.scheduler.shutdown().await;

    assert!(!h.scheduler.is_running());
    assert!(matches!(
        h.scheduler.submit(message("late")).await,
        Err(Error::ShutdownInProgress)
    ));
}

#[tokio::test]
async fn submission_failure_leaves_no_state_behind() {
    let h = harness(9000.0, ScriptedSender::always(SendOutcome::Delivered)).await;

    h.bucket.set_failing(true);
    assert!(matches!(
        h.scheduler.submit(message("m7")).await,
        Err(Error::Gateway { .. })
    ));
    h.bucket.set_failing(false);

    let stats = h.scheduler.stats().await;
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.total_submitted, 0);
    assert!(h.store.list_active().await.unwrap().is_empty());

    // the identifier is free to be submitted again
    h.scheduler.submit(message("m7")).await.unwrap();
    wait_until_succeeded(&h.scheduler, 1).await;

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn recovery_discards_stale_terminal_documents() {
    let bucket = MemoryObjectStore::new();
    let store = state_store(&bucket);

    // a crash between terminal write and active delete leaves both behind
    let mut stale = Record::new(message("done"), 100.0);
    stale.status = Status::Succeeded;
    store.put_active(&stale).await.unwrap();
    store.put_success(&stale).await.unwrap();

    let live = Record::new(message("live"), 200.0);
    store.put_active(&live).await.unwrap();

    let scheduler = Scheduler::start()
        .store(store.clone())
        .sender(Arc::new(ScriptedSender::always(
            SendOutcome::TransientFailure,
        )))
        .clock(Arc::new(ManualClock::new(100.0)))
        .call()
        .await
        .unwrap();

    assert_eq!(scheduler.stats().await.pending, 1);
    assert_eq!(store.get_active("done").await.unwrap(), None);
    assert_eq!(store.get_active("live").await.unwrap(), Some(live));
    // the terminal outcome itself is untouched
    assert_eq!(keys_under(&bucket, "success/").len(), 1);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn recovery_fails_on_corrupt_document_by_default() {
    let bucket = MemoryObjectStore::new();
    let store = state_store(&bucket);
    bucket.insert("state/corrupt.json", b"{ not json".as_ref());

    let result = Scheduler::start()
        .store(store)
        .sender(Arc::new(ScriptedSender::always(SendOutcome::Delivered)))
        .clock(Arc::new(ManualClock::new(0.0)))
        .call()
        .await;

    assert!(matches!(result, Err(Error::Serialization { .. })));
}

#[tokio::test]
async fn recovery_skips_corrupt_documents_when_configured() {
    let bucket = MemoryObjectStore::new();
    let store = state_store(&bucket);
    bucket.insert("state/corrupt.json", b"{ not json".as_ref());
    store
        .put_active(&Record::new(message("ok"), 50.0))
        .await
        .unwrap();

    let scheduler = Scheduler::start()
        .store(store)
        .sender(Arc::new(ScriptedSender::always(
            SendOutcome::TransientFailure,
        )))
        .clock(Arc::new(ManualClock::new(50.0)))
        .skip_corrupt(true)
        .call()
        .await
        .unwrap();

    assert_eq!(scheduler.stats().await.pending, 1);
    // the undecodable document is left in place for inspection
    assert!(bucket.object("state/corrupt.json").is_some());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn recovery_fails_when_store_unreachable() {
    let bucket = MemoryObjectStore::new();
    bucket.set_failing(true);

    let result = Scheduler::start()
        .store(state_store(&bucket))
        .sender(Arc::new(ScriptedSender::always(SendOutcome::Delivered)))
        .clock(Arc::new(ManualClock::new(0.0)))
        .call()
        .await;

    assert!(matches!(result, Err(Error::Gateway { .. })));
}
