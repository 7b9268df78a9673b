//! Deadline-driven expiration scheduler
//!
//! A single worker task owns a min-heap of pending expiration tasks keyed by
//! deadline. External callers never touch the heap; they submit add/remove
//! commands over a channel and the worker re-arms its timer accordingly.
//!
//! At most one live task exists per record id: a later `add_task` for the
//! same id supersedes the earlier one. Callbacks are dispatched on their own
//! tokio task so a slow or panicking callback cannot stall the worker.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Future produced by an expiration callback
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Expiration callback; invoked at most once, on the task's own tokio task
pub type TaskFn = Box<dyn FnOnce() -> TaskFuture + Send>;

// ============================================================================
// Commands
// ============================================================================

enum Command {
    Add {
        deadline: DateTime<Utc>,
        record_id: i64,
        task: TaskFn,
    },
    Remove {
        record_id: i64,
        reply: oneshot::Sender<bool>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
}

// ============================================================================
// Scheduler Handle
// ============================================================================

/// Handle to the scheduler worker.
///
/// Cloneable; all clones feed the same worker. Dropping every clone closes
/// the command channel and terminates the worker with its pending tasks.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Command>,
}

impl Scheduler {
    /// Spawn the worker task and return a handle to it
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(rx));
        Self { tx }
    }

    /// Insert or supersede the expiration task for `record_id`.
    ///
    /// Never blocks on a running callback. A deadline in the past fires on
    /// the worker's next loop turn.
    pub fn add_task<F, Fut>(&self, deadline: DateTime<Utc>, record_id: i64, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task: TaskFn = Box::new(move || {
            let fut: TaskFuture = Box::pin(task());
            fut
        });
        let sent = self.tx.send(Command::Add {
            deadline,
            record_id,
            task,
        });
        if sent.is_err() {
            tracing::warn!(record_id, "scheduler is stopped; expiration task dropped");
        }
    }

    /// Remove the pending task for `record_id`.
    ///
    /// Returns false when no live task existed, including when its callback
    /// was already dispatched.
    pub async fn remove_task(&self, record_id: i64) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Remove { record_id, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Stop the worker, discarding pending tasks.
    ///
    /// Idempotent. When this returns, no further callback will be
    /// dispatched; callbacks already in flight run to completion.
    pub async fn stop(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(Command::Stop { done }).is_ok() {
            let _ = rx.await;
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Heap entry; `seq` breaks ties between equal deadlines and identifies the
/// live generation of a record's task
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct Pending {
    deadline: DateTime<Utc>,
    seq: u64,
    record_id: i64,
}

async fn worker(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut heap: BinaryHeap<Reverse<Pending>> = BinaryHeap::new();
    // record_id -> seq of the live generation; superseded heap entries are
    // skipped when popped
    let mut live: HashMap<i64, u64> = HashMap::new();
    let mut callbacks: HashMap<u64, TaskFn> = HashMap::new();
    let mut next_seq: u64 = 0;

    loop {
        // Drop superseded entries so the timer arms on a live deadline
        while let Some(Reverse(head)) = heap.peek() {
            if live.get(&head.record_id) == Some(&head.seq) {
                break;
            }
            heap.pop();
        }

        let next_deadline = heap.peek().map(|Reverse(p)| p.deadline);

        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Add { deadline, record_id, task }) => {
                    let seq = next_seq;
                    next_seq += 1;
                    if let Some(old) = live.insert(record_id, seq) {
                        callbacks.remove(&old);
                        tracing::debug!(record_id, "superseding pending expiration task");
                    }
                    callbacks.insert(seq, task);
                    heap.push(Reverse(Pending { deadline, seq, record_id }));
                }
                Some(Command::Remove { record_id, reply }) => {
                    let removed = match live.remove(&record_id) {
                        Some(seq) => callbacks.remove(&seq).is_some(),
                        None => false,
                    };
                    let _ = reply.send(removed);
                }
                Some(Command::Stop { done }) => {
                    tracing::debug!(pending = live.len(), "scheduler stopping");
                    let _ = done.send(());
                    return;
                }
                None => return,
            },
            _ = wait_until(next_deadline), if next_deadline.is_some() => {
                if let Some(Reverse(due)) = heap.pop() {
                    if live.get(&due.record_id) == Some(&due.seq) {
                        live.remove(&due.record_id);
                        if let Some(task) = callbacks.remove(&due.seq) {
                            dispatch(due.record_id, task);
                        }
                    }
                }
            }
        }
    }
}

/// Sleep until the given instant; an elapsed deadline returns immediately
async fn wait_until(deadline: Option<DateTime<Utc>>) {
    let Some(deadline) = deadline else {
        return;
    };
    let delay = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    tokio::time::sleep(delay).await;
}

/// Run the callback on its own task; a panic is contained there and logged
fn dispatch(record_id: i64, task: TaskFn) {
    let handle = tokio::spawn(task());
    tokio::spawn(async move {
        if let Err(err) = handle.await {
            if err.is_panic() {
                tracing::error!(record_id, "expiration callback panicked: {err}");
            }
        }
    });
}

// ============================================================================
// Tests
// ============================================================================
