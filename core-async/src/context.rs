//! Single-consumer execution context.
//!
//! An [`ExecutionContext`] is a private FIFO work queue plus a drain loop. Any
//! thread may [`post`](ExecutionContext::post) work onto it; exactly one thread
//! (the one that owns the bridge) runs that work, one item at a time, inside
//! [`drain`](ExecutionContext::drain). This gives asynchronous code the same
//! single-threaded execution guarantee a UI dispatcher thread would.
//!
//! Futures are driven by a waker that re-posts a poll of the task onto the
//! queue. When an operation resumes on some worker thread (a timer, an I/O
//! completion, a channel send), its continuation is marshalled back onto the
//! draining thread instead of running where the wake happened.
//!
//! # Ambient context
//!
//! The bridge installs its context as the *current* one for the owning thread
//! while the scope is open. Code running inside an operation can reach it with
//! [`ExecutionContext::current`]; everything else should pass the handle
//! explicitly.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::task::Context;

use futures::future::BoxFuture;
use futures::task::{waker_ref, ArcWake};
use tokio::runtime::Handle;
use tracing::{debug, error, trace, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, OperationFailure, OperationId, Result};

type Callback = Box<dyn FnOnce() + Send + 'static>;

enum WorkItem {
    Callback(Callback),
    /// Ends the drain loop once executed.
    Stop,
}

#[derive(Default)]
struct WorkQueue {
    items: VecDeque<WorkItem>,
    closed: bool,
}

struct Shared {
    label: String,
    queue: Mutex<WorkQueue>,
    available: Condvar,
    stopped: AtomicBool,
    draining: AtomicBool,
    started: AtomicBool,
    in_flight: AtomicUsize,
    next_operation: AtomicU64,
    failed: AtomicBool,
    failure: Mutex<Option<OperationFailure>>,
    runtime: Option<Handle>,
    log_discarded_failures: bool,
    /// Context to restore in place of this one once it was closed out of
    /// order.
    handover: Mutex<Option<ExecutionContext>>,
}

thread_local! {
    static CURRENT: RefCell<Option<ExecutionContext>> = const { RefCell::new(None) };
}

/// Handle to a single-consumer work queue and its drain loop.
///
/// Cloning the handle is cheap; all clones refer to the same queue.
#[derive(Clone)]
pub struct ExecutionContext {
    shared: Arc<Shared>,
}

impl ExecutionContext {
    /// Creates a context with the default configuration.
    pub fn new() -> Self {
        Self::with_config(&BridgeConfig::default())
    }

    /// Creates a context from a bridge configuration.
    pub fn with_config(config: &BridgeConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                label: config.label.clone(),
                queue: Mutex::new(WorkQueue::default()),
                available: Condvar::new(),
                stopped: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                started: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                next_operation: AtomicU64::new(1),
                failed: AtomicBool::new(false),
                failure: Mutex::new(None),
                runtime: config.runtime_handle.clone(),
                log_discarded_failures: config.log_discarded_failures,
                handover: Mutex::new(None),
            }),
        }
    }

    /// Returns the context installed on the calling thread, if any.
    pub fn current() -> Option<ExecutionContext> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Installs `next` as the calling thread's current context and returns the
    /// one it replaces.
    pub(crate) fn install(next: Option<ExecutionContext>) -> Option<ExecutionContext> {
        CURRENT.with(|current| current.replace(next))
    }

    /// Returns true if this context is the calling thread's current context.
    pub fn is_current(&self) -> bool {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .is_some_and(|installed| installed.ptr_eq(self))
        })
    }

    /// Returns true if both handles refer to the same context.
    pub fn ptr_eq(&self, other: &ExecutionContext) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// The label this context logs under.
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Enqueues `work` and wakes the consumer.
    ///
    /// Never blocks. Posts made by one thread run in the order they were made;
    /// the relative order of posts racing on different threads is unspecified.
    /// Work posted after the context was closed is dropped.
    pub fn post<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(WorkItem::Callback(Box::new(work)));
    }

    /// Synchronous dispatch onto the context.
    ///
    /// Always fails: running work synchronously on the context's own
    /// consumer thread from within itself would deadlock it.
    pub fn send<F>(&self, _work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        Err(BridgeError::UnsupportedOperation(
            "cannot send synchronously to the execution context's own thread",
        ))
    }

    /// Runs the consumer loop on the calling thread until the stop marker is
    /// processed.
    ///
    /// Work items execute strictly one after another. If an item records a
    /// failure, the loop stops right after that item and returns it; items
    /// still queued are left unprocessed. When the queue is empty the calling
    /// thread blocks until more work is posted.
    ///
    /// Only one thread may drain a context at a time; a concurrent call
    /// returns [`BridgeError::AlreadyDraining`]. Draining a context that never
    /// receives a stop marker blocks forever.
    pub fn drain(&self) -> Result<()> {
        if self.shared.draining.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::AlreadyDraining);
        }
        let _draining = DrainFlag(&self.shared.draining);

        let span = tracing::debug_span!("drain", context = %self.shared.label);
        let _entered = span.enter();

        let mut executed = 0_usize;
        while !self.shared.stopped.load(Ordering::Acquire) {
            match self.next_item() {
                WorkItem::Stop => {
                    self.shared.stopped.store(true, Ordering::Release);
                }
                WorkItem::Callback(callback) => {
                    executed += 1;
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                        self.record_failure(OperationFailure::from_panic(None, payload));
                    }
                    if let Some(failure) = self.take_failure() {
                        error!(%failure, executed, "Drain stopped by operation failure");
                        return Err(BridgeError::OperationFailed(failure));
                    }
                }
            }
        }

        debug!(executed, "Drain finished");
        Ok(())
    }

    /// Number of submitted operations that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Number of work items waiting in the queue.
    pub fn pending(&self) -> usize {
        self.lock_queue().items.len()
    }

    /// Returns true once the stop marker has been processed.
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Returns true if at least one operation was ever submitted.
    pub fn has_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    /// Returns true once the owning bridge has been disposed. Work posted to a
    /// closed context is dropped.
    pub fn is_closed(&self) -> bool {
        self.lock_queue().closed
    }

    pub(crate) fn hand_over(&self, prior: Option<ExecutionContext>) {
        *lock(&self.shared.handover) = prior;
    }

    pub(crate) fn take_handover(&self) -> Option<ExecutionContext> {
        lock(&self.shared.handover).take()
    }

    /// Marks the start of a tracked operation: bumps the in-flight counter
    /// before anything is posted.
    pub(crate) fn begin_operation(&self) -> OperationId {
        self.shared.started.store(true, Ordering::Release);
        let id = OperationId(self.shared.next_operation.fetch_add(1, Ordering::Relaxed));
        let in_flight = self.shared.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(context = %self.shared.label, operation = %id, in_flight, "Operation submitted");
        id
    }

    /// Marks the end of a tracked operation. The transition from one to zero
    /// posts the stop marker.
    pub(crate) fn end_operation(&self, id: OperationId) {
        let remaining = self.shared.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        trace!(context = %self.shared.label, operation = %id, remaining, "Operation finished");
        if remaining == 0 {
            self.enqueue(WorkItem::Stop);
        }
    }

    /// Stores `failure` unless an earlier failure was already captured.
    pub(crate) fn record_failure(&self, failure: OperationFailure) {
        if self.shared.failed.swap(true, Ordering::AcqRel) {
            if self.shared.log_discarded_failures {
                warn!(
                    context = %self.shared.label,
                    %failure,
                    "Discarding failure; an earlier failure was already captured"
                );
            }
            return;
        }
        *lock(&self.shared.failure) = Some(failure);
    }

    /// Schedules `future` to be polled on this context.
    pub(crate) fn spawn(&self, future: BoxFuture<'static, ()>) {
        let task = Arc::new(Task {
            future: Mutex::new(Some(future)),
            scheduled: AtomicBool::new(false),
            context: Arc::downgrade(&self.shared),
        });
        ArcWake::wake(task);
    }

    /// Drops every queued item and refuses further posts.
    pub(crate) fn close(&self) {
        let abandoned = {
            let mut queue = self.lock_queue();
            queue.closed = true;
            std::mem::take(&mut queue.items)
        };
        if !abandoned.is_empty() {
            warn!(
                context = %self.shared.label,
                abandoned = abandoned.len(),
                "Closing context with unprocessed work"
            );
        }
    }

    fn take_failure(&self) -> Option<OperationFailure> {
        lock(&self.shared.failure).take()
    }

    fn enqueue(&self, item: WorkItem) {
        let mut queue = self.lock_queue();
        if queue.closed {
            drop(queue);
            if let WorkItem::Callback(_) = item {
                warn!(context = %self.shared.label, "Dropping work posted to a closed context");
            }
            return;
        }
        queue.items.push_back(item);
        drop(queue);
        self.shared.available.notify_one();
    }

    fn next_item(&self) -> WorkItem {
        let mut queue = self.lock_queue();
        loop {
            if let Some(item) = queue.items.pop_front() {
                return item;
            }
            queue = self
                .shared
                .available
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, WorkQueue> {
        lock(&self.shared.queue)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("label", &self.shared.label)
            .field("in_flight", &self.in_flight())
            .field("pending", &self.pending())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// Work items run outside the locks, so a poisoned mutex still holds
// consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct DrainFlag<'a>(&'a AtomicBool);

impl Drop for DrainFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A future scheduled on a context.
struct Task {
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    scheduled: AtomicBool,
    context: Weak<Shared>,
}

impl Task {
    fn poll(self: Arc<Self>, runtime: Option<&Handle>) {
        self.scheduled.store(false, Ordering::Release);

        let Some(mut future) = lock(&self.future).take() else {
            return;
        };

        let waker = waker_ref(&self);
        let mut cx = Context::from_waker(&waker);
        let _runtime = runtime.map(Handle::enter);

        if future.as_mut().poll(&mut cx).is_pending() {
            *lock(&self.future) = Some(future);
        }
    }
}

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if arc_self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(shared) = arc_self.context.upgrade() else {
            return;
        };
        let runtime = shared.runtime.clone();
        let context = ExecutionContext { shared };
        let task = Arc::clone(arc_self);
        context.post(move || task.poll(runtime.as_ref()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) + Clone + Send + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (log, move |value| sink.lock().unwrap().push(value))
    }

    fn stop(context: &ExecutionContext) {
        context.enqueue(WorkItem::Stop);
    }

    #[test]
    fn test_send_is_always_unsupported() {
        let context = ExecutionContext::new();
        assert!(matches!(
            context.send(|| {}),
            Err(BridgeError::UnsupportedOperation(_))
        ));

        context.post(|| {});
        stop(&context);
        context.drain().unwrap();

        assert!(matches!(
            context.send(|| {}),
            Err(BridgeError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_drain_runs_items_in_fifo_order() {
        let context = ExecutionContext::new();
        let (log, record) = recorder();

        for value in 1..=5 {
            let record = record.clone();
            context.post(move || record(value));
        }
        stop(&context);

        context.drain().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 4, 5]);
        assert!(context.is_stopped());
    }

    #[test]
    fn test_items_after_stop_marker_are_left_queued() {
        let context = ExecutionContext::new();
        let (log, record) = recorder();

        let first = record.clone();
        context.post(move || first(1));
        stop(&context);
        context.post(move || record(2));

        context.drain().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert_eq!(context.pending(), 1);
    }

    #[test]
    fn test_drain_blocks_until_work_arrives_from_another_thread() {
        let context = ExecutionContext::new();
        let (log, record) = recorder();

        let producer = context.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            producer.post(move || record(42));
            stop(&producer);
        });

        context.drain().unwrap();
        worker.join().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![42]);
    }

    #[test]
    fn test_failure_stops_drain_immediately() {
        let context = ExecutionContext::new();
        let (log, record) = recorder();

        let failing = context.clone();
        context.post(move || {
            failing.record_failure(OperationFailure::from_error(
                Some(OperationId(1)),
                anyhow::anyhow!("first"),
            ))
        });
        context.post(move || record(2));
        stop(&context);

        let err = context.drain().unwrap_err();
        let failure = err.failure().expect("failure expected");
        assert_eq!(failure.operation(), Some(OperationId(1)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_first_failure_wins() {
        let context = ExecutionContext::new();
        context.record_failure(OperationFailure::from_error(
            Some(OperationId(1)),
            anyhow::anyhow!("first"),
        ));
        context.record_failure(OperationFailure::from_error(
            Some(OperationId(2)),
            anyhow::anyhow!("second"),
        ));

        let failure = context.take_failure().unwrap();
        assert_eq!(failure.cause().to_string(), "first");
        assert!(context.take_failure().is_none());
    }

    #[test]
    fn test_panicking_callback_is_captured() {
        let context = ExecutionContext::new();
        context.post(|| panic!("callback exploded"));
        stop(&context);

        let err = context.drain().unwrap_err();
        let failure = err.into_failure().unwrap();
        assert!(failure.is_panic());
        assert_eq!(failure.operation(), None);
        assert!(failure.to_string().contains("callback exploded"));
    }

    #[test]
    fn test_concurrent_drain_is_rejected() {
        let context = ExecutionContext::new();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        context.post(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        stop(&context);

        let consumer = context.clone();
        let drainer = thread::spawn(move || consumer.drain());

        started_rx.recv().unwrap();
        assert!(matches!(context.drain(), Err(BridgeError::AlreadyDraining)));
        release_tx.send(()).unwrap();

        drainer.join().unwrap().unwrap();
    }

    #[test]
    fn test_in_flight_counter_posts_single_stop() {
        let context = ExecutionContext::new();
        let first = context.begin_operation();
        let second = context.begin_operation();
        assert_eq!(context.in_flight(), 2);
        assert!(first < second);

        context.end_operation(first);
        assert_eq!(context.pending(), 0);

        context.end_operation(second);
        assert_eq!(context.in_flight(), 0);
        assert_eq!(context.pending(), 1);

        context.drain().unwrap();
        assert!(context.is_stopped());
    }

    #[test]
    fn test_spawned_future_resumes_on_draining_thread() {
        let context = ExecutionContext::new();
        let drain_thread = thread::current().id();
        let (tx, rx) = futures::channel::oneshot::channel::<u32>();
        let (seen_tx, seen_rx) = mpsc::channel();

        let stopper = context.clone();
        context.spawn(Box::pin(async move {
            let value = rx.await.unwrap();
            seen_tx.send((value, thread::current().id())).unwrap();
            stop(&stopper);
        }));

        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(7).unwrap();
        });

        context.drain().unwrap();
        sender.join().unwrap();

        let (value, thread_id) = seen_rx.recv().unwrap();
        assert_eq!(value, 7);
        assert_eq!(thread_id, drain_thread);
    }

    #[test]
    fn test_closed_context_drops_new_work() {
        let context = ExecutionContext::new();
        context.post(|| {});
        context.close();
        assert_eq!(context.pending(), 0);

        context.post(|| {});
        assert_eq!(context.pending(), 0);
        assert!(context.is_closed());
    }

    #[test]
    fn test_current_context_install_and_restore() {
        assert!(ExecutionContext::current().is_none());

        let context = ExecutionContext::new();
        let prior = ExecutionContext::install(Some(context.clone()));
        assert!(prior.is_none());
        assert!(context.is_current());

        let restored = ExecutionContext::install(prior);
        assert!(restored.unwrap().ptr_eq(&context));
        assert!(ExecutionContext::current().is_none());
    }
}
