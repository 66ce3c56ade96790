use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Installs the global subscriber: `RUST_LOG` filter (default `info`) and a
/// compact formatter with UTC timestamps, thread ids and targets.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_logging() -> bool {
    init_logging_with("info")
}

/// Like [`init_logging`], with an explicit fallback directive for when
/// `RUST_LOG` is unset.
pub fn init_logging_with(default_directive: &str) -> bool {
    let filter: EnvFilter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let formatting_layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_thread_ids(true)
        .with_target(true)
        .compact();

    let subscriber = Registry::default().with(filter).with(formatting_layer);

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
