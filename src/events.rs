//! Notification surface: typed events, capability-based observers, and the
//! dispatcher task.
//!
//! Every observer and per-operation callback is invoked from one dispatcher
//! task per manager, in event order, so callers never see two callbacks run
//! concurrently. Batch workers and query tasks only emit events; they never
//! touch a callback themselves.

use crate::editor::BatchReport;
use crate::error::DirectoryError;
use crate::types::{NodeStatus, QueryRecord};
use chrono::{SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Identifier correlating a batch or query operation with its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(u64);

impl OpId {
    /// Allocate the next operation id.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        OpId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Status-change observer.
pub type StatusCallback = Arc<dyn Fn(NodeStatus) + Send + Sync>;
/// Streaming-query observer, one invocation per discovered record.
pub type QueryCallback = Arc<dyn Fn(&QueryRecord) + Send + Sync>;
/// Batch add progress: `(identifier, percent 0.0..=100.0)`.
pub type AddProgressCallback = Arc<dyn Fn(&str, f64) + Send + Sync>;
/// Batch removal progress: `(user, group, percent)`; the group is `None`
/// when accounts are being removed rather than memberships.
pub type RemovalProgressCallback = Arc<dyn Fn(&str, Option<&str>, f64) + Send + Sync>;
/// Batch completion, invoked exactly once per batch.
pub type CompletionCallback = Box<dyn FnOnce(BatchReport) + Send>;
/// Buffered-list completion, invoked exactly once per list call.
pub type ListReply = Box<dyn FnOnce(Result<Vec<String>, DirectoryError>) + Send>;

/// An event flowing from the session, editor, or query engine to the
/// dispatcher.
#[derive(Debug, Clone)]
pub enum DirectoryEvent {
    StatusChanged(NodeStatus),
    RecordFound {
        op: OpId,
        record: QueryRecord,
    },
    AddProgress {
        op: OpId,
        name: String,
        percent: f64,
    },
    RemovalProgress {
        op: OpId,
        user: String,
        group: Option<String>,
        percent: f64,
    },
    BatchFinished {
        op: OpId,
        report: BatchReport,
    },
    ListFinished {
        op: OpId,
        result: Result<Vec<String>, DirectoryError>,
    },
    StreamFinished {
        op: OpId,
    },
}

/// An event paired with its emission timestamp. The stamp is taken when the
/// event enters the channel, not when the dispatcher delivers it, so the
/// completion log shows queue delay under load.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    /// RFC 3339 UTC emission time with millisecond precision.
    pub ts: String,
    pub event: DirectoryEvent,
}

impl EventEnvelope {
    pub fn with_now(event: DirectoryEvent) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        }
    }
}

/// Best-effort sender half of the dispatcher channel.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event. A closed dispatcher (manager shutting down) drops the
    /// event silently.
    pub fn emit(&self, event: DirectoryEvent) {
        if self.tx.send(EventEnvelope::with_now(event)).is_err() {
            trace!("event dropped after dispatcher shutdown");
        }
    }
}

/// Capability-based observer registry. Callers register only the channels
/// they care about; unregistered channels cost nothing.
#[derive(Default)]
pub struct ObserverSet {
    status: RwLock<Option<StatusCallback>>,
    query: RwLock<Option<QueryCallback>>,
    add_progress: RwLock<Option<AddProgressCallback>>,
    removal_progress: RwLock<Option<RemovalProgressCallback>>,
}

impl ObserverSet {
    pub fn set_status(&self, cb: Option<StatusCallback>) {
        *self.status.write() = cb;
    }

    pub fn set_query(&self, cb: Option<QueryCallback>) {
        *self.query.write() = cb;
    }

    pub fn set_add_progress(&self, cb: Option<AddProgressCallback>) {
        *self.add_progress.write() = cb;
    }

    pub fn set_removal_progress(&self, cb: Option<RemovalProgressCallback>) {
        *self.removal_progress.write() = cb;
    }

    // Accessors clone the Arc out so no lock is held while a callback runs;
    // a callback may re-register observers.

    fn status(&self) -> Option<StatusCallback> {
        self.status.read().clone()
    }

    fn query(&self) -> Option<QueryCallback> {
        self.query.read().clone()
    }

    fn add_progress(&self) -> Option<AddProgressCallback> {
        self.add_progress.read().clone()
    }

    fn removal_progress(&self) -> Option<RemovalProgressCallback> {
        self.removal_progress.read().clone()
    }
}

/// Per-operation callbacks, registered before an operation is spawned and
/// consumed by the dispatcher.
#[derive(Default)]
pub struct CallbackRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    add_progress: HashMap<OpId, AddProgressCallback>,
    removal_progress: HashMap<OpId, RemovalProgressCallback>,
    query: HashMap<OpId, QueryCallback>,
    completion: HashMap<OpId, CompletionCallback>,
    list_reply: HashMap<OpId, ListReply>,
}

impl CallbackRegistry {
    pub fn register_add_batch(
        &self,
        op: OpId,
        progress: Option<AddProgressCallback>,
        completion: Option<CompletionCallback>,
    ) {
        let mut inner = self.inner.lock();
        if let Some(p) = progress {
            inner.add_progress.insert(op, p);
        }
        if let Some(c) = completion {
            inner.completion.insert(op, c);
        }
    }

    pub fn register_removal_batch(
        &self,
        op: OpId,
        progress: Option<RemovalProgressCallback>,
        completion: Option<CompletionCallback>,
    ) {
        let mut inner = self.inner.lock();
        if let Some(p) = progress {
            inner.removal_progress.insert(op, p);
        }
        if let Some(c) = completion {
            inner.completion.insert(op, c);
        }
    }

    pub fn register_query(&self, op: OpId, on_record: Option<QueryCallback>) {
        if let Some(cb) = on_record {
            self.inner.lock().query.insert(op, cb);
        }
    }

    pub fn register_list(&self, op: OpId, reply: ListReply) {
        self.inner.lock().list_reply.insert(op, reply);
    }

    fn add_progress_for(&self, op: OpId) -> Option<AddProgressCallback> {
        self.inner.lock().add_progress.get(&op).cloned()
    }

    fn removal_progress_for(&self, op: OpId) -> Option<RemovalProgressCallback> {
        self.inner.lock().removal_progress.get(&op).cloned()
    }

    fn query_for(&self, op: OpId) -> Option<QueryCallback> {
        self.inner.lock().query.get(&op).cloned()
    }

    fn take_completion(&self, op: OpId) -> Option<CompletionCallback> {
        self.inner.lock().completion.remove(&op)
    }

    fn take_list_reply(&self, op: OpId) -> Option<ListReply> {
        self.inner.lock().list_reply.remove(&op)
    }

    fn finish(&self, op: OpId) {
        let mut inner = self.inner.lock();
        inner.add_progress.remove(&op);
        inner.removal_progress.remove(&op);
        inner.query.remove(&op);
        inner.completion.remove(&op);
        inner.list_reply.remove(&op);
    }
}

/// Spawn the dispatcher task. It runs until every `EventSink` clone is
/// dropped or the handle is aborted.
pub(crate) fn spawn_dispatcher(
    mut rx: mpsc::UnboundedReceiver<EventEnvelope>,
    observers: Arc<ObserverSet>,
    callbacks: Arc<CallbackRegistry>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            deliver(&observers, &callbacks, envelope);
        }
        debug!("event dispatcher stopped");
    })
}

fn deliver(observers: &ObserverSet, callbacks: &CallbackRegistry, envelope: EventEnvelope) {
    let EventEnvelope { ts, event } = envelope;
    match event {
        DirectoryEvent::StatusChanged(status) => {
            if let Some(cb) = observers.status() {
                cb(status);
            }
        }
        DirectoryEvent::RecordFound { op, record } => {
            if let Some(cb) = callbacks.query_for(op) {
                cb(&record);
            }
            if let Some(cb) = observers.query() {
                cb(&record);
            }
        }
        DirectoryEvent::AddProgress { op, name, percent } => {
            if let Some(cb) = callbacks.add_progress_for(op) {
                cb(&name, percent);
            }
            if let Some(cb) = observers.add_progress() {
                cb(&name, percent);
            }
        }
        DirectoryEvent::RemovalProgress {
            op,
            user,
            group,
            percent,
        } => {
            if let Some(cb) = callbacks.removal_progress_for(op) {
                cb(&user, group.as_deref(), percent);
            }
            if let Some(cb) = observers.removal_progress() {
                cb(&user, group.as_deref(), percent);
            }
        }
        DirectoryEvent::BatchFinished { op, report } => {
            debug!(op = %op, ts = %ts, outcome = ?report.outcome, processed = report.processed, "batch finished");
            if let Some(cb) = callbacks.take_completion(op) {
                cb(report);
            }
            callbacks.finish(op);
        }
        DirectoryEvent::ListFinished { op, result } => {
            if let Some(cb) = callbacks.take_list_reply(op) {
                cb(result);
            }
            callbacks.finish(op);
        }
        DirectoryEvent::StreamFinished { op } => {
            callbacks.finish(op);
        }
    }
}
