//! # Bridge Configuration
//!
//! [`BridgeConfig`] controls how a single bridge scope behaves. It is built
//! with [`BridgeConfigBuilder`], which validates its input fail-fast:
//!
//! ```rust
//! use core_async::config::BridgeConfig;
//!
//! let config = BridgeConfig::builder()
//!     .label("import-job")
//!     .log_discarded_failures(false)
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.label, "import-job");
//! ```
//!
//! ## Tokio interop
//!
//! Operations run on the bridge's private executor, not inside a Tokio
//! runtime. Supplying a runtime handle makes every poll enter that runtime, so
//! Tokio timers and I/O resources work from bridged operations. The runtime
//! must be driven by its own threads (a multi-thread runtime), otherwise timers
//! never fire while the calling thread is blocked in the drain loop.

use crate::error::{BridgeError, Result};
use tokio::runtime::Handle;

/// Label used when none is configured.
pub const DEFAULT_LABEL: &str = "async-bridge";

/// Settings for one bridge scope.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Name recorded on log events and spans emitted by the scope.
    pub label: String,

    /// Tokio runtime entered while polling operations (optional).
    pub runtime_handle: Option<Handle>,

    /// Log failures that lose the first-failure race at `warn` level.
    pub log_discarded_failures: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            runtime_handle: None,
            log_discarded_failures: true,
        }
    }
}

impl BridgeConfig {
    /// Creates a builder seeded with the defaults.
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if the label is empty or contains only
    /// whitespace.
    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(BridgeError::Config(
                "bridge label must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`BridgeConfig`].
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    label: Option<String>,
    runtime_handle: Option<Handle>,
    log_discarded_failures: Option<bool>,
}

impl BridgeConfigBuilder {
    /// Sets the label recorded on logs and spans.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Enters the given Tokio runtime while polling operations.
    pub fn runtime_handle(mut self, handle: Handle) -> Self {
        self.runtime_handle = Some(handle);
        self
    }

    /// Uses the Tokio runtime of the calling context, if there is one.
    pub fn current_runtime(mut self) -> Self {
        self.runtime_handle = Handle::try_current().ok();
        self
    }

    /// Enables or disables logging of discarded (non-first) failures.
    pub fn log_discarded_failures(mut self, enabled: bool) -> Self {
        self.log_discarded_failures = Some(enabled);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<BridgeConfig> {
        let defaults = BridgeConfig::default();
        let config = BridgeConfig {
            label: self.label.unwrap_or(defaults.label),
            runtime_handle: self.runtime_handle,
            log_discarded_failures: self
                .log_discarded_failures
                .unwrap_or(defaults.log_discarded_failures),
        };
        config.validate()?;
        Ok(config)
    }
}
