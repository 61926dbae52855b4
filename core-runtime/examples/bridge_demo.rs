//! Bridge demonstration
//!
//! Opens a bridge from a plain `main`, runs a few operations that resume on
//! helper threads, and shows the drain, the failure path and fire-and-forget
//! work in the log output.
//!
//! Run with:
//! ```bash
//! # Pretty format (default in debug)
//! cargo run -p core-runtime --example bridge_demo
//!
//! # JSON format
//! cargo run -p core-runtime --example bridge_demo -- json
//!
//! # Custom filter
//! cargo run -p core-runtime --example bridge_demo -- compact "core_async=trace"
//! ```

use core_async::{fire_and_forget_with, wait, ExecutionContext};
use core_runtime::config::RuntimeConfig;
use core_runtime::logging::{LogFormat, LogLevel, LoggingConfig};
use futures::channel::oneshot;
use std::env;
use std::thread;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

fn delayed<T: Send + 'static>(value: T, delay: Duration) -> oneshot::Receiver<T> {
    let (tx, rx) = oneshot::channel();
    thread::spawn(move || {
        thread::sleep(delay);
        let _ = tx.send(value);
    });
    rx
}

#[instrument]
async fn fetch_page(page: u32) -> Result<String, oneshot::Canceled> {
    let body = delayed(format!("page {page}"), Duration::from_millis(20 * page as u64)).await?;
    info!(page, "Page fetched");
    Ok(body)
}

fn main() -> core_runtime::Result<()> {
    let args: Vec<String> = env::args().collect();

    let mut logging = LoggingConfig::default()
        .with_level(LogLevel::Debug)
        .with_thread_info(true);
    if let Some(format) = args.get(1) {
        logging = logging.with_format(format.parse::<LogFormat>()?);
    }
    if let Some(filter) = args.get(2) {
        logging = logging.with_filter(filter.clone());
    }

    let config = RuntimeConfig::builder()
        .logging(logging)
        .bridge_label("demo")
        .build()?;
    config.init_logging()?;

    info!("Running three fetches through one bridge");
    let pages = wait(|bridge| {
        let (tx, rx) = std::sync::mpsc::channel();
        for page in 1..=3 {
            let tx = tx.clone();
            bridge.run_with_result(fetch_page(page), move |body| {
                let _ = tx.send(body);
            });
        }
        rx
    })?;
    for body in pages.try_iter() {
        info!(%body, "Collected");
    }

    info!("Running a failing operation next to a slow one");
    let outcome = wait(|bridge| {
        bridge.run(async {
            delayed((), Duration::from_millis(10)).await?;
            Err::<(), _>(anyhow::anyhow!("upstream returned 503"))
        });
        bridge.run(async {
            delayed((), Duration::from_millis(500)).await?;
            Ok::<_, oneshot::Canceled>(())
        });
    });
    if let Err(err) = outcome {
        warn!(error = %err, "Bridge reported the first failure");
    }
    assert!(ExecutionContext::current().is_none());

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    fire_and_forget_with(
        async move {
            delayed((), Duration::from_millis(10)).await?;
            let _ = done_tx.send(());
            Err::<(), _>(anyhow::anyhow!("background cleanup failed"))
        },
        |failure| error!(%failure, "Background work failed"),
    );
    let _ = done_rx.recv_timeout(Duration::from_secs(1));
    thread::sleep(Duration::from_millis(50));

    info!("Demo complete");
    Ok(())
}
