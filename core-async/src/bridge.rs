//! Synchronous-execution bridge.
//!
//! An [`AsyncBridge`] lets a plain, synchronous thread run asynchronous
//! operations to completion. Operations submitted with [`AsyncBridge::run`]
//! are scheduled onto a private [`ExecutionContext`]; when the bridge is
//! finished (or dropped) the calling thread drains that context until every
//! operation, and everything those operations post back, has completed.
//!
//! # Lifecycle
//!
//! 1. Opening a bridge captures the thread's current context and installs a
//!    fresh one.
//! 2. Each `run*` call bumps the in-flight counter and posts the operation.
//! 3. [`AsyncBridge::finish`] drains the context if anything was submitted,
//!    then restores the prior context, even when the drain failed.
//!
//! The first failure raised by any operation (returned error or panic) is
//! surfaced once, as
//! [`BridgeError::OperationFailed`](crate::error::BridgeError::OperationFailed).
//! Later failures in the same scope are logged and discarded.
//!
//! # Examples
//!
//! ```rust
//! use core_async::bridge::wait;
//! use std::sync::{Arc, Mutex};
//!
//! let total = Arc::new(Mutex::new(0));
//! let sink = Arc::clone(&total);
//!
//! wait(|bridge| {
//!     bridge.run_with_result(async { Ok::<_, std::io::Error>(40) }, move |value| {
//!         *sink.lock().unwrap() += value + 2;
//!     });
//! })
//! .expect("bridge run failed");
//!
//! assert_eq!(*total.lock().unwrap(), 42);
//! ```
//!
//! # Nesting
//!
//! Every bridge owns an independent execution context. Opening a bridge
//! inside another one (on the same thread, or from within an operation the
//! outer bridge is running) never shares queues: the inner stop marker can
//! only end the inner drain.
//!
//! Bridges opened on one thread must be finished in reverse opening order.
//! Finishing an outer bridge first logs a warning; the thread's current
//! context is then repaired when the inner bridge finishes, so a closed
//! context is never left installed.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, trace, warn};

use crate::config::BridgeConfig;
use crate::context::ExecutionContext;
use crate::error::{BridgeError, OperationFailure, OperationId, Result};

/// The completion handle passed to [`AsyncBridge::run_with`] callbacks.
#[derive(Debug)]
pub struct Completion<T> {
    id: OperationId,
    value: T,
}

impl<T> Completion<T> {
    /// The operation that completed.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// The value the operation produced.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consumes the handle, returning the produced value.
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Thread-safe handle for submitting operations to a bridge.
///
/// Obtained from [`AsyncBridge::handle`]. Unlike the bridge itself, the
/// handle is `Send + Sync` and may be cloned onto other threads, so `run` can
/// be called concurrently. Submissions must happen while the bridge is still
/// open: work submitted after every in-flight operation has finished and the
/// stop marker was queued is never run, and a successful
/// [`AsyncBridge::finish`] says nothing about it. Such late submissions are
/// logged at `warn`.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    context: ExecutionContext,
}

impl BridgeHandle {
    /// Submits an operation, discarding its output.
    pub fn run<F, T, E>(&self, operation: F) -> OperationId
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        self.run_with(operation, |_| {})
    }

    /// Submits an operation; `on_complete` receives the completion handle once
    /// it succeeds. The callback is skipped if the operation fails.
    pub fn run_with<F, T, E, C>(&self, operation: F, on_complete: C) -> OperationId
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
        C: FnOnce(Completion<T>) + Send + 'static,
    {
        self.submit(move |id| complete(id, operation, on_complete).boxed())
    }

    /// Submits an operation; `on_value` receives the produced value once it
    /// succeeds. The callback is skipped if the operation fails.
    pub fn run_with_result<F, T, E, C>(&self, operation: F, on_value: C) -> OperationId
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        self.run_with(operation, move |completion| {
            on_value(completion.into_value())
        })
    }

    /// The context operations are scheduled on.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    fn submit<S>(&self, start: S) -> OperationId
    where
        S: FnOnce(OperationId) -> BoxFuture<'static, anyhow::Result<()>>,
    {
        let id = self.context.begin_operation();
        if self.context.is_closed() {
            warn!(
                context = %self.context.label(),
                operation = %id,
                "Operation submitted after the bridge finished; it will not run"
            );
            self.context.end_operation(id);
            return id;
        }
        let operation = start(id);
        let context = self.context.clone();

        self.context.spawn(
            async move {
                match AssertUnwindSafe(operation).catch_unwind().await {
                    Ok(Ok(())) => trace!(operation = %id, "Operation completed"),
                    Ok(Err(cause)) => {
                        context.record_failure(OperationFailure::from_error(Some(id), cause))
                    }
                    Err(payload) => {
                        context.record_failure(OperationFailure::from_panic(Some(id), payload))
                    }
                }
                context.end_operation(id);
            }
            .boxed(),
        );

        id
    }
}

async fn complete<F, T, E, C>(id: OperationId, operation: F, on_complete: C) -> anyhow::Result<()>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<anyhow::Error>,
    C: FnOnce(Completion<T>),
{
    let value = match operation.await {
        Ok(value) => value,
        Err(err) => return Err(err.into()),
    };
    on_complete(Completion { id, value });
    Ok(())
}

/// Restores the prior context when dropped. Not `Send`: the thread-local it
/// writes belongs to the thread that opened the scope.
struct ContextScope {
    own: ExecutionContext,
    prior: Option<ExecutionContext>,
    _thread_bound: PhantomData<*const ()>,
}

impl ContextScope {
    fn enter(context: &ExecutionContext) -> Self {
        Self {
            own: context.clone(),
            prior: ExecutionContext::install(Some(context.clone())),
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        // A closed prior was finished out of order and left its own prior
        // behind; skip down to the first context still open.
        let mut prior = self.prior.take();
        while let Some(context) = prior.take() {
            if !context.is_closed() {
                prior = Some(context);
                break;
            }
            prior = context.take_handover();
        }

        if self.own.is_current() {
            ExecutionContext::install(prior);
        } else {
            warn!(
                context = %self.own.label(),
                "Bridge finished out of order; bridges on one thread must be finished in reverse opening order"
            );
            self.own.hand_over(prior);
        }
    }
}

/// One run-to-completion scope.
///
/// Single-use: submit any number of operations, then [`finish`](Self::finish)
/// it. Dropping an unfinished bridge performs the same blocking disposal and
/// logs a warning if work was submitted; a captured failure is logged and
/// re-raised as a panic, unless the thread is already unwinding.
///
/// Bridges opened on the same thread must be finished in reverse opening
/// order.
#[must_use = "dropping the bridge blocks until submitted operations finish; call `finish` to observe failures"]
pub struct AsyncBridge {
    handle: BridgeHandle,
    scope: Option<ContextScope>,
}

impl AsyncBridge {
    /// Opens a bridge with the default configuration.
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    /// Opens a bridge with the given configuration.
    pub fn with_config(config: BridgeConfig) -> Self {
        let context = ExecutionContext::with_config(&config);
        let scope = ContextScope::enter(&context);
        debug!(
            context = %config.label,
            nested = scope.prior.is_some(),
            "Bridge opened"
        );
        Self {
            handle: BridgeHandle { context },
            scope: Some(scope),
        }
    }

    /// Submits an operation, discarding its output.
    pub fn run<F, T, E>(&self, operation: F) -> OperationId
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        self.handle.run(operation)
    }

    /// Submits an operation with a callback over its completion handle.
    pub fn run_with<F, T, E, C>(&self, operation: F, on_complete: C) -> OperationId
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
        C: FnOnce(Completion<T>) + Send + 'static,
    {
        self.handle.run_with(operation, on_complete)
    }

    /// Submits an operation with a callback over its produced value.
    pub fn run_with_result<F, T, E, C>(&self, operation: F, on_value: C) -> OperationId
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        self.handle.run_with_result(operation, on_value)
    }

    /// Returns a cloneable, thread-safe submission handle.
    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    /// The bridge's execution context.
    pub fn context(&self) -> &ExecutionContext {
        &self.handle.context
    }

    /// Blocks until every submitted operation has finished, then restores the
    /// prior context.
    ///
    /// Returns immediately if nothing was submitted.
    ///
    /// # Errors
    ///
    /// Returns
    /// [`BridgeError::OperationFailed`](crate::error::BridgeError::OperationFailed)
    /// wrapping the first failure raised by a submitted operation. The prior
    /// context is restored before the error is returned.
    pub fn finish(mut self) -> Result<()> {
        self.dispose()
    }

    fn dispose(&mut self) -> Result<()> {
        let Some(scope) = self.scope.take() else {
            return Ok(());
        };
        let context = self.handle.context.clone();

        let result = if context.has_started() {
            context.drain()
        } else {
            Ok(())
        };

        context.close();
        drop(scope);

        debug!(context = %context.label(), failed = result.is_err(), "Bridge closed");
        result
    }
}

impl Default for AsyncBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AsyncBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncBridge")
            .field("context", &self.handle.context)
            .field("finished", &self.scope.is_none())
            .finish()
    }
}

impl Drop for AsyncBridge {
    fn drop(&mut self) {
        if self.scope.is_some() && self.handle.context.has_started() {
            warn!(
                context = %self.handle.context.label(),
                "Bridge dropped without finish; call `finish` to observe failures"
            );
        }
        if let Err(err) = self.dispose() {
            error!(error = %err, "Unfinished bridge dropped with a captured failure");
            if !std::thread::panicking() {
                panic!("{err}");
            }
        }
    }
}

/// Runs `scope` with a fresh bridge and finishes it on exit.
///
/// ```rust
/// use core_async::bridge::wait;
///
/// let id = wait(|bridge| bridge.run(async { Ok::<_, std::io::Error>(()) }))?;
/// assert_eq!(id.get(), 1);
/// # Ok::<(), core_async::BridgeError>(())
/// ```
pub fn wait<R>(scope: impl FnOnce(&AsyncBridge) -> R) -> Result<R> {
    wait_with(BridgeConfig::default(), scope)
}

/// Like [`wait`], with an explicit configuration.
pub fn wait_with<R>(config: BridgeConfig, scope: impl FnOnce(&AsyncBridge) -> R) -> Result<R> {
    let bridge = AsyncBridge::with_config(config);
    let output = scope(&bridge);
    bridge.finish()?;
    Ok(output)
}

/// Runs one operation to completion on the calling thread and returns its
/// value.
///
/// # Errors
///
/// Returns a [`BridgeError`](crate::error::BridgeError) wrapping the failure
/// if the operation fails or panics.
pub fn block_on<F, T, E>(operation: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
{
    let slot = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&slot);

    wait(|bridge| {
        bridge.run_with_result(operation, move |value| {
            if let Ok(mut guard) = sink.lock() {
                *guard = Some(value);
            }
        });
    })?;

    take_value(&slot)
}

fn take_value<T>(slot: &Mutex<Option<T>>) -> Result<T> {
    let value = match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    value.ok_or(BridgeError::MissingValue)
}
