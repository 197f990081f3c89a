use std::sync::Once;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Output format of the process-wide subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, multi-line events.
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Keeps the non-blocking writer alive.
///
/// Buffered events are flushed when this value is dropped, so it must live until the process
/// exits.
#[must_use]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to install the global tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Installs the global subscriber for an ingestion process.
///
/// The filter is read from `RUST_LOG` and defaults to `info` for `app_name` and the `ingest`
/// crate, and `warn` for everything else.
pub fn init_tracing(app_name: &str, format: LogFormat) -> Result<LogFlusher, TracingError> {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(app_name).into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(writer))
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(writer),
            )
            .try_init()?,
    }

    Ok(LogFlusher { _guard: guard })
}

/// Installs a subscriber writing to the test harness output. Safe to call from every test.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "ingest=debug,warn".into());

        // Another subscriber may already be installed by the embedding test binary.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}

fn default_filter(app_name: &str) -> String {
    format!("{}=info,ingest=info,warn", app_name.replace('-', "_"))
}
