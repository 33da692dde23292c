//! The scheduling engine.
//!
//! One mutex guards all shared state: a min-heap of `(due, seq)` entries,
//! an id index holding the live records, the sequence counter, and the
//! running statistics. A [`tokio::sync::Notify`] is the condition variable:
//! the dispatcher waits on it untimed while the heap is empty and with a
//! timeout of `head - now` otherwise, and it is signalled on submission,
//! reschedule, shutdown, and explicit [`Scheduler::wake`].
//!
//! State transitions couple to the object store in a fixed order. A
//! submission is durable before the caller observes success. A terminal
//! transition writes the terminal document before deleting the active one,
//! so a crash between the two leaves a duplicate at worst (recovery
//! reconciles it), never a lost record.
//!
//! Helpers that take `&mut EngineState` expect the engine lock to be held
//! by the caller.

use std::{
    cmp::Ordering as CmpOrdering,
    collections::{BinaryHeap, HashMap},
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::{
    sync::{Mutex, Notify},
    task::JoinHandle,
};

use crate::{
    clock::{Clock, SystemClock},
    config::defaults,
    error::Error,
    message::{Message, Record, Status},
    retry::RetryPolicy,
    sender::{SendOutcome, Sender},
    store::StateStore,
};

pub mod recovery;

/// Back-off for object store writes on the dispatcher path. Submission-path
/// failures are not retried here; they surface to the caller.
const WRITE_RETRY_BASE: Duration = Duration::from_millis(100);
const WRITE_RETRY_CAP: Duration = Duration::from_secs(5);
const WRITE_RETRY_ATTEMPTS: u32 = 5;

/// Point-in-time counters, internally consistent under the engine lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub pending: usize,
    pub total_submitted: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub next_due: Option<f64>,
}

/// Heap entry; the record itself lives in the index. Ordered earliest due
/// time first, ties broken by insertion sequence so equal due times
/// dispatch in submission order.
struct HeapEntry {
    due: f64,
    seq: u64,
    message_id: String,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // reversed: BinaryHeap is a max-heap, we want the earliest entry on top
        other
            .due
            .total_cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct EngineState {
    heap: BinaryHeap<HeapEntry>,
    index: HashMap<String, Record>,
    next_seq: u64,
    total_submitted: u64,
    total_succeeded: u64,
    total_failed: u64,
}

impl EngineState {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            index: HashMap::new(),
            next_seq: 0,
            total_submitted: 0,
            total_succeeded: 0,
            total_failed: 0,
        }
    }

    /// Lock held. Inserts a record due at `due` behind every earlier entry
    /// with the same due time.
    fn enqueue(&mut self, record: Record, due: f64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(HeapEntry {
            due,
            seq,
            message_id: record.message_id.clone(),
        });
        self.index.insert(record.message_id.clone(), record);
    }

    /// Lock held. Drains up to `max` due records, removing them from both
    /// the heap and the index.
    fn pop_due(&mut self, now: f64, max: usize) -> Vec<Record> {
        let mut batch = Vec::new();
        while batch.len() < max {
            match self.heap.peek() {
                Some(entry) if entry.due <= now => {}
                _ => break,
            }
            if let Some(entry) = self.heap.pop() {
                if let Some(record) = self.index.remove(&entry.message_id) {
                    batch.push(record);
                }
            }
        }
        batch
    }
}

struct Inner {
    state: Mutex<EngineState>,
    notify: Notify,
    shutdown: AtomicBool,
    store: StateStore,
    sender: Arc<dyn Sender>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    batch_size: usize,
}

/// Thread-safe scheduler façade; submissions race freely with the
/// background dispatcher.
pub struct Scheduler {
    inner: Arc<Inner>,
    worker: StdMutex<Option<JoinHandle<()>>>,
}

#[bon::bon]
impl Scheduler {
    /// Recovers pending records from the store, seeds the engine, and
    /// spawns the dispatcher.
    #[builder(finish_fn = call)]
    pub async fn start(
        store: StateStore,
        sender: Arc<dyn Sender>,
        clock: Option<Arc<dyn Clock>>,
        policy: Option<RetryPolicy>,
        batch_size: Option<usize>,
        skip_corrupt: Option<bool>,
    ) -> Result<Self, Error> {
        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let policy = policy.unwrap_or_default();
        let batch_size = batch_size.unwrap_or(defaults::DISPATCH_BATCH_SIZE);

        let recovered = recovery::load_pending(&store, skip_corrupt.unwrap_or(false)).await?;

        let mut state = EngineState::new();
        for record in recovered {
            let due = record.next_retry_at;
            state.enqueue(record, due);
        }

        let inner = Arc::new(Inner {
            state: Mutex::new(state),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            store,
            sender,
            clock,
            policy,
            batch_size,
        });

        let worker = tokio::spawn(dispatch_loop(Arc::clone(&inner)));

        Ok(Self {
            inner,
            worker: StdMutex::new(Some(worker)),
        })
    }
}

impl Scheduler {
    /// Accepts a message for delivery. The active document is durable
    /// before this returns; a gateway failure surfaces here and leaves no
    /// in-memory state behind.
    ///
    /// Rejects empty identifiers and identifiers that are already pending.
    pub async fn submit(&self, message: Message) -> Result<String, Error> {
        if message.message_id.is_empty() {
            return Err(Error::EmptyMessageId);
        }
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(Error::ShutdownInProgress);
        }

        let mut state = self.inner.state.lock().await;
        if state.index.contains_key(&message.message_id) {
            return Err(Error::DuplicateMessage {
                message_id: message.message_id,
            });
        }

        let record = Record::new(message, self.inner.clock.now());
        self.inner.store.put_active(&record).await?;

        let message_id = record.message_id.clone();
        let due = record.next_retry_at;
        state.enqueue(record, due);
        state.total_submitted += 1;
        drop(state);

        self.inner.notify.notify_one();
        tracing::info!(%message_id, "message accepted");
        Ok(message_id)
    }

    /// Nudges the dispatcher to re-examine the heap head. Idempotent.
    pub fn wake(&self) {
        self.inner.notify.notify_one();
    }

    pub async fn stats(&self) -> Stats {
        let state = self.inner.state.lock().await;
        Stats {
            pending: state.heap.len(),
            total_submitted: state.total_submitted,
            total_succeeded: state.total_succeeded,
            total_failed: state.total_failed,
            next_due: state.heap.peek().map(|entry| entry.due),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    /// True while the dispatcher task is alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Stops accepting submissions and joins the dispatcher once its
    /// in-flight batch has drained. Pending records stay in the object
    /// store for the next recovery.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();

        let handle = self.worker.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        tracing::info!("scheduler stopped");
    }
}

async fn dispatch_loop(inner: Arc<Inner>) {
    tracing::info!("dispatcher started");
    loop {
        let batch = {
            let mut state = inner.state.lock().await;
            if inner.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let now = inner.clock.now();
            match state.heap.peek().map(|entry| entry.due) {
                None => {
                    drop(state);
                    inner.notify.notified().await;
                    continue;
                }
                Some(due) if due > now => {
                    let wait = Duration::from_secs_f64(due - now);
                    drop(state);
                    let _ = tokio::time::timeout(wait, inner.notify.notified()).await;
                    continue;
                }
                Some(_) => state.pop_due(now, inner.batch_size),
            }
        };

        for record in batch {
            attempt(&inner, record).await;
        }
    }
    tracing::info!("dispatcher stopped");
}

/// One delivery attempt plus its state transition. The sender runs outside
/// the lock; the transition and its writes happen under it.
async fn attempt(inner: &Inner, mut record: Record) {
    let prior_due = record.next_retry_at;
    tracing::debug!(
        message_id = %record.message_id,
        attempt = record.attempt_count + 1,
        max = inner.policy.max_attempts(),
        "attempting delivery"
    );

    let outcome = match inner.sender.send(&record.message).await {
        Ok(outcome) => outcome,
        Err(error) => {
            tracing::warn!(
                message_id = %record.message_id,
                %error,
                "sender error, treating as transient failure"
            );
            SendOutcome::TransientFailure
        }
    };

    let now = inner.clock.now();
    let mut state = inner.state.lock().await;
    match outcome {
        SendOutcome::Delivered => {
            record.status = Status::Succeeded;
            record.updated_at = now;
            finish(inner, &mut state, record, prior_due).await;
        }
        SendOutcome::TransientFailure => {
            record.attempt_count += 1;
            match inner
                .policy
                .next_retry_at(record.created_at, record.attempt_count)
            {
                Some(due) => {
                    record.next_retry_at = due;
                    record.updated_at = now;
                    reschedule(inner, &mut state, record, prior_due).await;
                }
                None => {
                    record.status = Status::Failed;
                    record.updated_at = now;
                    finish(inner, &mut state, record, prior_due).await;
                }
            }
        }
        SendOutcome::PermanentFailure => {
            record.attempt_count += 1;
            record.status = Status::Failed;
            record.updated_at = now;
            finish(inner, &mut state, record, prior_due).await;
        }
    }
    drop(state);

    // the new head may be sooner than the dispatcher's current wait target
    inner.notify.notify_one();
}

/// Lock held. Persists the rescheduled record, then re-inserts it. If the
/// store stays unreachable the record re-enters the heap at its prior due
/// time instead, so delivery is retried promptly and the document catches
/// up on the next successful write.
async fn reschedule(inner: &Inner, state: &mut EngineState, mut record: Record, prior_due: f64) {
    tracing::info!(
        message_id = %record.message_id,
        attempt = record.attempt_count,
        next_retry_at = record.next_retry_at,
        "delivery failed, rescheduling"
    );

    match persist_with_retry(|| inner.store.put_active(&record)).await {
        Ok(()) => {
            let due = record.next_retry_at;
            state.enqueue(record, due);
        }
        Err(error) => {
            tracing::error!(
                message_id = %record.message_id,
                %error,
                "failed to persist reschedule, requeueing at prior due time"
            );
            record.next_retry_at = prior_due;
            state.enqueue(record, prior_due);
        }
    }
}

/// Lock held. Terminal transition: write the terminal document, then delete
/// the active one. If the terminal write stays failing, the record returns
/// to the heap so the outcome is not lost; a failed delete is left for
/// recovery to reconcile.
async fn finish(inner: &Inner, state: &mut EngineState, mut record: Record, prior_due: f64) {
    let write = match record.status {
        Status::Succeeded => persist_with_retry(|| inner.store.put_success(&record)).await,
        _ => persist_with_retry(|| inner.store.put_failed(&record)).await,
    };

    match write {
        Ok(()) => {
            if let Err(error) =
                persist_with_retry(|| inner.store.delete_active(&record.message_id)).await
            {
                tracing::error!(
                    message_id = %record.message_id,
                    %error,
                    "terminal document written but active document not deleted"
                );
            }
            match record.status {
                Status::Succeeded => {
                    state.total_succeeded += 1;
                    tracing::info!(
                        message_id = %record.message_id,
                        failed_attempts = record.attempt_count,
                        "message delivered"
                    );
                }
                _ => {
                    state.total_failed += 1;
                    tracing::warn!(
                        message_id = %record.message_id,
                        failed_attempts = record.attempt_count,
                        "message dead-lettered"
                    );
                }
            }
        }
        Err(error) => {
            tracing::error!(
                message_id = %record.message_id,
                %error,
                "failed to persist terminal document, requeueing"
            );
            record.status = Status::Pending;
            record.next_retry_at = prior_due;
            state.enqueue(record, prior_due);
        }
    }
}

/// Bounded exponential back-off for dispatcher-side store writes.
async fn persist_with_retry<F, Fut>(mut op: F) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    let mut delay = WRITE_RETRY_BASE;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(error) if attempt < WRITE_RETRY_ATTEMPTS => {
                tracing::warn!(%error, attempt, "object store write failed, backing off");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(WRITE_RETRY_CAP);
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
