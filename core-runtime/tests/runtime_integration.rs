//! Integration tests for the runtime configuration layer.
//!
//! The global subscriber can only be installed once per process, so
//! everything that depends on it lives in a single test.

use core_async::task::fire_and_forget_on;
use core_async::{BridgeError, ExecutionContext, OperationFailure};
use core_runtime::config::{RuntimeConfig, ENV_LABEL, ENV_LOG_FORMAT, ENV_LOG_LEVEL};
use core_runtime::logging::{LogFormat, LogLevel, LoggingConfig};
use core_runtime::Error;
use std::sync::mpsc;
use std::time::Duration;

#[test]
fn test_logging_initializes_once() {
    let config = RuntimeConfig::builder()
        .logging(
            LoggingConfig::default()
                .with_format(LogFormat::Compact)
                .with_level(LogLevel::Debug)
                .with_thread_info(true),
        )
        .build()
        .unwrap();

    config.init_logging().unwrap();

    let err = config.init_logging().unwrap_err();
    assert!(matches!(err, Error::Config(message) if message.contains("Failed to initialize logging")));

    // Bridges keep working with the global subscriber installed.
    let bridge = config.open_bridge();
    bridge.run(async { Ok::<_, std::io::Error>(()) });
    bridge.finish().unwrap();
}

#[test]
fn test_environment_driven_bridge() {
    let config = RuntimeConfig::from_lookup(|key| match key {
        ENV_LABEL => Some("env-bridge".to_string()),
        ENV_LOG_LEVEL => Some("warning".to_string()),
        ENV_LOG_FORMAT => Some("json".to_string()),
        _ => None,
    })
    .unwrap();
    assert_eq!(config.logging.level, LogLevel::Warn);

    let bridge = config.open_bridge();
    assert_eq!(bridge.context().label(), "env-bridge");
    assert!(bridge.context().is_current());

    bridge.run(async { Err::<(), _>(anyhow::anyhow!("rejected by env bridge")) });
    let err = bridge.finish().unwrap_err();
    assert!(matches!(&err, BridgeError::OperationFailed(failure) if failure.cause().to_string() == "rejected by env bridge"));
    assert!(ExecutionContext::current().is_none());

    // Bridge errors convert into the runtime error type.
    let err: Error = err.into();
    assert!(matches!(err, Error::Bridge(_)));
}

#[test]
fn test_spawner_reports_to_handler() {
    let config = RuntimeConfig::builder()
        .fire_and_forget_thread("integration-bg")
        .build()
        .unwrap();

    let (tx, rx) = mpsc::channel();
    fire_and_forget_on(
        config.spawner().as_ref(),
        async { Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "lost connection")) },
        Some(move |failure: OperationFailure| tx.send(failure.to_string()).unwrap()),
    );

    let message = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(message.contains("lost connection"));
}
