//! Runtime utilities that abstract over the Tokio executor.
//!
//! Downstream crates never need to depend on Tokio directly: the runtime
//! types are re-exported here, and [`block_on`] runs a future on a throwaway
//! current-thread runtime. The bridge does not use Tokio to drive its own
//! operations; this module serves background launches and runtime interop.
//!
//! Detached work that has no multi-thread runtime of its own runs on the
//! [`background_handle`] runtime, built on first use and kept for the life of
//! the process.

use std::sync::{Mutex, PoisonError};

pub use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};

use crate::error::Result;

/// Thread name used by the shared background runtime's workers.
pub const BACKGROUND_THREAD_NAME: &str = "core-async-background";

// Lives until process exit. Never dropped, since a drop from inside async
// code panics.
static BACKGROUND: Mutex<Option<Runtime>> = Mutex::new(None);

/// Runs the provided future to completion on a lightweight current-thread
/// runtime with all drivers enabled.
///
/// # Errors
///
/// Returns [`BridgeError::Runtime`](crate::error::BridgeError::Runtime) if the
/// runtime cannot be built.
pub fn block_on<F>(future: F) -> Result<F::Output>
where
    F: std::future::Future,
{
    let runtime = Builder::new_current_thread().enable_all().build()?;
    Ok(runtime.block_on(future))
}

/// Returns the Tokio runtime of the calling context, if there is one.
pub fn current_handle() -> Option<Handle> {
    Handle::try_current().ok()
}

/// Returns the calling context's Tokio runtime only if it is a multi-thread
/// runtime. A current-thread runtime makes progress only while its owner
/// drives it, so work handed to it from a blocking caller may never run.
pub fn current_multi_thread_handle() -> Option<Handle> {
    current_handle().filter(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
}

/// Handle to the process-wide multi-thread runtime for detached work.
///
/// # Errors
///
/// Returns [`BridgeError::Runtime`](crate::error::BridgeError::Runtime) if the
/// runtime cannot be built. A later call retries.
pub fn background_handle() -> Result<Handle> {
    let mut background = BACKGROUND.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(runtime) = background.as_ref() {
        return Ok(runtime.handle().clone());
    }

    let runtime = Builder::new_multi_thread()
        .thread_name(BACKGROUND_THREAD_NAME)
        .enable_all()
        .build()?;
    let handle = runtime.handle().clone();
    *background = Some(runtime);
    Ok(handle)
}
