//! Workspace facade crate.
//!
//! This crate exists to expose the workspace crates behind a single dependency.
//! Host applications can depend on `async-bridge-workspace` and enable the
//! documented features without wiring each crate individually:
//!
//! - `core_async` is always available (the bridge itself).
//! - `core_runtime` (feature `runtime`, on by default) adds logging setup and
//!   environment-driven configuration.

pub use core_async;

#[cfg(feature = "runtime")]
pub use core_runtime;
