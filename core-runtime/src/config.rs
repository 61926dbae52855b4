//! # Runtime Configuration Module
//!
//! Bundles everything an application needs to set up around the bridge:
//! logging, default bridge settings and the thread name used for
//! fire-and-forget launches.
//!
//! ## Overview
//!
//! [`RuntimeConfig`] is built with a builder that validates fail-fast, or read
//! from the environment with [`RuntimeConfig::from_env`]:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `ASYNC_BRIDGE_LOG` | custom `EnvFilter` directives |
//! | `ASYNC_BRIDGE_LOG_LEVEL` | `trace`, `debug`, `info`, `warn`, `error` |
//! | `ASYNC_BRIDGE_LOG_FORMAT` | `pretty`, `json`, `compact` |
//! | `ASYNC_BRIDGE_LABEL` | label of bridges opened through the config |
//! | `ASYNC_BRIDGE_THREAD_NAME` | name of fire-and-forget threads |
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env()?;
//! config.init_logging()?;
//!
//! let bridge = config.open_bridge();
//! bridge.run(async { Ok::<_, std::io::Error>(()) });
//! bridge.finish()?;
//! ```

use std::sync::Arc;

use core_async::config::BridgeConfig;
use core_async::runtime::RuntimeFlavor;
use core_async::task::{BackgroundSpawner, ThreadSpawner, TokioSpawner, DEFAULT_THREAD_NAME};
use core_async::AsyncBridge;
use tracing::debug;

use crate::error::{Error, Result};
use crate::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};

pub const ENV_LOG_FILTER: &str = "ASYNC_BRIDGE_LOG";
pub const ENV_LOG_LEVEL: &str = "ASYNC_BRIDGE_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "ASYNC_BRIDGE_LOG_FORMAT";
pub const ENV_LABEL: &str = "ASYNC_BRIDGE_LABEL";
pub const ENV_THREAD_NAME: &str = "ASYNC_BRIDGE_THREAD_NAME";

/// Application-level runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Logging setup applied by [`RuntimeConfig::init_logging`]
    pub logging: LoggingConfig,

    /// Settings for bridges opened through [`RuntimeConfig::open_bridge`]
    pub bridge: BridgeConfig,

    /// Name of threads started for fire-and-forget work
    pub fire_and_forget_thread: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            bridge: BridgeConfig::default(),
            fire_and_forget_thread: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Creates a new builder.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Reads the configuration from the process environment.
    ///
    /// Unset variables keep their defaults; malformed ones are errors.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary key lookup.
    pub fn from_lookup<L>(lookup: L) -> Result<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut logging = LoggingConfig::default();
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            logging = logging.with_level(level.parse::<LogLevel>()?);
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            logging = logging.with_format(format.parse::<LogFormat>()?);
        }
        if let Some(filter) = lookup(ENV_LOG_FILTER) {
            logging = logging.with_filter(filter);
        }

        let mut builder = Self::builder().logging(logging);
        if let Some(label) = lookup(ENV_LABEL) {
            builder = builder.bridge_label(label);
        }
        if let Some(name) = lookup(ENV_THREAD_NAME) {
            builder = builder.fire_and_forget_thread(name);
        }
        builder.build()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.bridge.validate()?;

        let name = self.fire_and_forget_thread.as_str();
        if name.trim().is_empty() {
            return Err(Error::Config(
                "fire-and-forget thread name must not be empty".to_string(),
            ));
        }
        if name.contains('\0') {
            return Err(Error::Config(
                "fire-and-forget thread name must not contain NUL bytes".to_string(),
            ));
        }
        Ok(())
    }

    /// Installs the global tracing subscriber described by `logging`.
    pub fn init_logging(&self) -> Result<()> {
        init_logging(self.logging.clone())?;
        debug!(format = ?self.logging.format, level = %self.logging.level, "Logging initialized");
        Ok(())
    }

    /// Opens a bridge with the configured bridge settings.
    pub fn open_bridge(&self) -> AsyncBridge {
        AsyncBridge::with_config(self.bridge.clone())
    }

    /// Spawner for fire-and-forget work: the configured Tokio runtime when the
    /// bridge settings carry a multi-thread one, otherwise named threads.
    ///
    /// A configured current-thread runtime is skipped; it only runs work while
    /// its owner drives it.
    pub fn spawner(&self) -> Arc<dyn BackgroundSpawner> {
        match &self.bridge.runtime_handle {
            Some(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                Arc::new(TokioSpawner::new(handle.clone()))
            }
            _ => Arc::new(ThreadSpawner::new(self.fire_and_forget_thread.clone())),
        }
    }
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    logging: Option<LoggingConfig>,
    bridge: Option<BridgeConfig>,
    bridge_label: Option<String>,
    fire_and_forget_thread: Option<String>,
}

impl RuntimeConfigBuilder {
    /// Sets the logging configuration.
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Sets the bridge configuration.
    pub fn bridge(mut self, bridge: BridgeConfig) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Overrides only the bridge label.
    pub fn bridge_label(mut self, label: impl Into<String>) -> Self {
        self.bridge_label = Some(label.into());
        self
    }

    /// Sets the fire-and-forget thread name.
    pub fn fire_and_forget_thread(mut self, name: impl Into<String>) -> Self {
        self.fire_and_forget_thread = Some(name.into());
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<RuntimeConfig> {
        let defaults = RuntimeConfig::default();
        let mut bridge = self.bridge.unwrap_or(defaults.bridge);
        if let Some(label) = self.bridge_label {
            bridge.label = label;
        }

        let config = RuntimeConfig {
            logging: self.logging.unwrap_or(defaults.logging),
            bridge,
            fire_and_forget_thread: self
                .fire_and_forget_thread
                .unwrap_or(defaults.fire_and_forget_thread),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_async::task::fire_and_forget_on;
    use core_async::{BridgeError, OperationFailure};
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::time::Duration;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::builder().build().unwrap();
        assert_eq!(config.bridge.label, core_async::config::DEFAULT_LABEL);
        assert_eq!(config.fire_and_forget_thread, DEFAULT_THREAD_NAME);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_from_lookup_reads_all_variables() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            (ENV_LOG_LEVEL, "debug"),
            (ENV_LOG_FORMAT, "json"),
            (ENV_LOG_FILTER, "core_async=trace"),
            (ENV_LABEL, "nightly-import"),
            (ENV_THREAD_NAME, "bg-worker"),
        ]))
        .unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.filter.as_deref(), Some("core_async=trace"));
        assert_eq!(config.bridge.label, "nightly-import");
        assert_eq!(config.fire_and_forget_thread, "bg-worker");
    }

    #[test]
    fn test_from_lookup_with_nothing_set_uses_defaults() {
        let config = RuntimeConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.logging, LoggingConfig::default());
        assert_eq!(config.bridge.label, core_async::config::DEFAULT_LABEL);
    }

    #[test]
    fn test_from_lookup_rejects_malformed_values() {
        let err = RuntimeConfig::from_lookup(lookup(&[(ENV_LOG_FORMAT, "yaml")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = RuntimeConfig::from_lookup(lookup(&[(ENV_LABEL, " ")])).unwrap_err();
        assert!(matches!(err, Error::Bridge(BridgeError::Config(_))));
    }

    #[test]
    fn test_thread_name_validation() {
        let err = RuntimeConfig::builder()
            .fire_and_forget_thread("")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = RuntimeConfig::builder()
            .fire_and_forget_thread("bad\0name")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_open_bridge_uses_configured_label() {
        let config = RuntimeConfig::builder()
            .bridge_label("reports")
            .build()
            .unwrap();

        let bridge = config.open_bridge();
        assert_eq!(bridge.context().label(), "reports");
        bridge.run(async { Ok::<_, std::io::Error>(()) });
        bridge.finish().unwrap();
    }

    #[test]
    fn test_thread_spawner_uses_configured_name() {
        let config = RuntimeConfig::builder()
            .fire_and_forget_thread("runtime-config-test")
            .build()
            .unwrap();

        let (tx, rx) = mpsc::channel();
        fire_and_forget_on(
            config.spawner().as_ref(),
            async move {
                let name = std::thread::current().name().map(str::to_owned);
                Err::<(), _>(anyhow::anyhow!("{}", name.unwrap_or_default()))
            },
            Some(move |failure: OperationFailure| tx.send(failure.cause().to_string()).unwrap()),
        );

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name, "runtime-config-test");
    }

    #[test]
    fn test_runtime_handle_selects_tokio_spawner() {
        let runtime = core_async::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("config-tokio")
            .enable_all()
            .build()
            .unwrap();
        let bridge = BridgeConfig::builder()
            .runtime_handle(runtime.handle().clone())
            .build()
            .unwrap();
        let config = RuntimeConfig::builder().bridge(bridge).build().unwrap();

        let (tx, rx) = mpsc::channel();
        fire_and_forget_on(
            config.spawner().as_ref(),
            async move {
                let name = std::thread::current().name().map(str::to_owned);
                Err::<(), _>(anyhow::anyhow!("{}", name.unwrap_or_default()))
            },
            Some(move |failure: OperationFailure| tx.send(failure.cause().to_string()).unwrap()),
        );

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name, "config-tokio");
    }

    #[test]
    fn test_current_thread_runtime_handle_falls_back_to_threads() {
        let current_thread = core_async::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let bridge = BridgeConfig::builder()
            .runtime_handle(current_thread.handle().clone())
            .build()
            .unwrap();
        let config = RuntimeConfig::builder()
            .bridge(bridge)
            .fire_and_forget_thread("config-fallback")
            .build()
            .unwrap();

        let (tx, rx) = mpsc::channel();
        fire_and_forget_on(
            config.spawner().as_ref(),
            async move {
                let name = std::thread::current().name().map(str::to_owned);
                Err::<(), _>(anyhow::anyhow!("{}", name.unwrap_or_default()))
            },
            Some(move |failure: OperationFailure| tx.send(failure.cause().to_string()).unwrap()),
        );

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name, "config-fallback");
    }
}
