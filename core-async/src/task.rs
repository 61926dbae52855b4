//! Fire-and-forget launching.
//!
//! [`fire_and_forget`] starts an asynchronous operation somewhere in the
//! background and returns immediately. Nothing is delivered back to the
//! caller: no result, no completion signal. A failure handler may be supplied
//! to observe the operation's error (or panic); without one the failure is
//! logged.
//!
//! Where the work runs is decided by a [`BackgroundSpawner`]:
//!
//! - [`TokioSpawner`] spawns onto a Tokio runtime.
//! - [`BackgroundRuntimeSpawner`] spawns onto the shared background runtime
//!   (see [`runtime::background_handle`]).
//! - [`ThreadSpawner`] starts a dedicated OS thread with its own
//!   current-thread runtime.
//!
//! [`default_spawner`] prefers the calling context's Tokio runtime when it is
//! a multi-thread runtime and falls back to the shared background runtime.
//! A current-thread runtime is never reused: its owner may be blocked (in a
//! bridge drain, for instance) and would never get around to the work.
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//! use std::sync::mpsc;
//!
//! let (tx, rx) = mpsc::channel();
//! task::fire_and_forget_with(
//!     async { Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "offline")) },
//!     move |failure| tx.send(failure.to_string()).unwrap(),
//! );
//!
//! assert!(rx.recv().unwrap().contains("offline"));
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tracing::{error, trace};

#[cfg(test)]
use mockall::automock;

use crate::error::{BridgeError, OperationFailure, Result};
use crate::runtime;

/// Default name for threads started by [`ThreadSpawner`].
pub const DEFAULT_THREAD_NAME: &str = "fire-and-forget";

/// Launches detached work somewhere other than the calling thread.
#[cfg_attr(test, automock)]
pub trait BackgroundSpawner: Send + Sync {
    /// Starts driving `future` in the background.
    ///
    /// Must not block on the future's completion.
    fn spawn(&self, future: BoxFuture<'static, ()>) -> Result<()>;
}

/// Spawns onto a Tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioSpawner {
    handle: Handle,
}

impl TokioSpawner {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the Tokio runtime of the calling context, if there is one and it
    /// is a multi-thread runtime.
    pub fn current() -> Option<Self> {
        runtime::current_multi_thread_handle().map(Self::new)
    }
}

impl BackgroundSpawner for TokioSpawner {
    fn spawn(&self, future: BoxFuture<'static, ()>) -> Result<()> {
        drop(self.handle.spawn(future));
        Ok(())
    }
}

/// Spawns onto the process-wide background runtime, building it on first use.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackgroundRuntimeSpawner;

impl BackgroundSpawner for BackgroundRuntimeSpawner {
    fn spawn(&self, future: BoxFuture<'static, ()>) -> Result<()> {
        let handle = runtime::background_handle()?;
        drop(handle.spawn(future));
        Ok(())
    }
}

/// Runs each launch on its own named OS thread.
///
/// The thread's runtime ends with the launched future. Detached work started
/// from inside it through [`fire_and_forget`] goes to the shared background
/// runtime instead, so it is not cut short.
#[derive(Debug, Clone)]
pub struct ThreadSpawner {
    name: String,
}

impl ThreadSpawner {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for ThreadSpawner {
    fn default() -> Self {
        Self::new(DEFAULT_THREAD_NAME)
    }
}

impl BackgroundSpawner for ThreadSpawner {
    fn spawn(&self, future: BoxFuture<'static, ()>) -> Result<()> {
        std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                if let Err(err) = runtime::block_on(future) {
                    error!(error = %err, "Failed to start runtime for detached work");
                }
            })
            .map(drop)
            .map_err(|e| BridgeError::Spawn(e.to_string()))
    }
}

/// Picks the spawner used by [`fire_and_forget`]: the calling context's
/// multi-thread Tokio runtime when available, the shared background runtime
/// otherwise.
pub fn default_spawner() -> Arc<dyn BackgroundSpawner> {
    match TokioSpawner::current() {
        Some(spawner) => Arc::new(spawner),
        None => Arc::new(BackgroundRuntimeSpawner),
    }
}

/// Launches `operation` in the background and returns immediately.
///
/// A failure is logged and otherwise ignored.
pub fn fire_and_forget<F, T, E>(operation: F)
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
{
    fire_and_forget_on(
        default_spawner().as_ref(),
        operation,
        None::<fn(OperationFailure)>,
    );
}

/// Launches `operation` in the background; `on_failure` observes its failure.
pub fn fire_and_forget_with<F, T, E, H>(operation: F, on_failure: H)
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
    H: FnOnce(OperationFailure) + Send + 'static,
{
    fire_and_forget_on(default_spawner().as_ref(), operation, Some(on_failure));
}

/// Launches `operation` on an explicit spawner.
///
/// If the spawner refuses the work, the refusal is reported like any other
/// failure: to `on_failure` when given, to the log otherwise. Never blocks and
/// never panics on the caller's thread.
pub fn fire_and_forget_on<F, T, E, H>(
    spawner: &dyn BackgroundSpawner,
    operation: F,
    on_failure: Option<H>,
) where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
    H: FnOnce(OperationFailure) + Send + 'static,
{
    let handler = Arc::new(Mutex::new(on_failure));
    let detached_handler = Arc::clone(&handler);

    let launched = spawner.spawn(
        async move {
            let failure = match AssertUnwindSafe(operation).catch_unwind().await {
                Ok(Ok(_)) => {
                    trace!("Detached work completed");
                    return;
                }
                Ok(Err(err)) => OperationFailure::from_error(None, err.into()),
                Err(payload) => OperationFailure::from_panic(None, payload),
            };
            report(failure, take_handler(&detached_handler));
        }
        .boxed(),
    );

    if let Err(err) = launched {
        report(
            OperationFailure::from_error(None, anyhow::Error::new(err)),
            take_handler(&handler),
        );
    }
}

fn take_handler<H>(handler: &Mutex<Option<H>>) -> Option<H> {
    handler
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

fn report<H>(failure: OperationFailure, handler: Option<H>)
where
    H: FnOnce(OperationFailure),
{
    match handler {
        Some(handle) => handle(failure),
        None => error!(%failure, "Detached work failed with no failure handler"),
    }
}
