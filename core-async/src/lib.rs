//! Synchronous-execution bridge for async code.
//!
//! This crate lets a plain, blocking thread run asynchronous operations to
//! completion without handing control to a general-purpose runtime:
//!
//! - [`bridge`]: [`AsyncBridge`] scopes, [`wait`], [`bridge::block_on`]
//! - [`context`]: the single-consumer [`ExecutionContext`] the bridge drains
//! - [`task`]: [`fire_and_forget`](task::fire_and_forget) launching
//! - [`runtime`]: Tokio runtime re-exports and a throwaway `block_on`
//! - [`config`]: [`BridgeConfig`]
//! - [`error`]: [`BridgeError`] and [`OperationFailure`]
//!
//! # Architecture
//!
//! A bridge owns one execution context: an unbounded FIFO queue drained by the
//! thread that opened the bridge. Operations are posted onto the queue and
//! their wakers re-post continuations onto it, so every callback and every
//! poll runs on the owning thread, strictly one at a time. The drain ends when
//! the last in-flight operation finishes.
//!
//! # Examples
//!
//! ```rust
//! use core_async::{wait, ExecutionContext};
//! use std::sync::{Arc, Mutex};
//!
//! let order = Arc::new(Mutex::new(Vec::new()));
//! let log = Arc::clone(&order);
//!
//! wait(|bridge| {
//!     bridge.run(async move {
//!         let context = ExecutionContext::current().expect("running on the bridge");
//!         let later = Arc::clone(&log);
//!         context.post(move || later.lock().unwrap().push("posted"));
//!         log.lock().unwrap().push("operation");
//!         Ok::<_, std::io::Error>(())
//!     });
//! })?;
//!
//! assert_eq!(*order.lock().unwrap(), vec!["operation", "posted"]);
//! # Ok::<(), core_async::BridgeError>(())
//! ```

// Re-export the entry-point/test macros so downstream crates can write
// `#[core_async::test] async fn ...` without a runtime dependency.
pub use core_async_macros::{main, test};

pub mod bridge;
pub mod config;
pub mod context;
pub mod error;
pub mod runtime;
pub mod task;

pub use bridge::{wait, wait_with, AsyncBridge, BridgeHandle, Completion};
pub use config::BridgeConfig;
pub use context::ExecutionContext;
pub use error::{BridgeError, OperationFailure, OperationId, Result};
pub use task::{fire_and_forget, fire_and_forget_with};
