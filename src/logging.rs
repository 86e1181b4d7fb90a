// Logging
//
// tracing subscriber for the binary and for hosts that don't install their
// own. Human readable output on stderr.

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable with the filter directives
pub const LOG_ENV: &str = "SESSION_WATCH_LOG";

/// Filter from SESSION_WATCH_LOG, then RUST_LOG, then `level`
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(format!("session_watch={}", level)))
}

/// Install the global subscriber; returns false if one was already set
pub fn init_logging(level: &str) -> bool {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .with_ansi(std::io::stderr().is_terminal());

    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(layer)
        .try_init()
        .is_ok()
}
