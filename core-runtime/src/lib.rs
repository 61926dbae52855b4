//! # Core Runtime Module
//!
//! Provides the ambient runtime infrastructure around the bridge:
//! - Logging and tracing setup
//! - Configuration management (programmatic and environment-driven)
//!
//! ## Overview
//!
//! `core-async` emits structured `tracing` events but never installs a
//! subscriber. Applications call [`logging::init_logging`] (or
//! [`config::RuntimeConfig::init_logging`]) once at startup, then open bridges
//! and launch background work through the same [`config::RuntimeConfig`].

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
