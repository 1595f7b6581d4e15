//! Logging and tracing configuration
//!
//! The orchestrator logs to stderr. The worker also logs to stderr because
//! its stdout carries the control protocol.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the CLI
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli(verbose: bool) {
    let default = if verbose {
        "conductor=debug,warn"
    } else {
        "conductor=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for a worker process
///
/// Never writes to stdout. Default is DEBUG so protocol traffic is visible.
pub fn init_worker() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("conductor=debug,mock_worker=debug,info"));

    // A second init (e.g. in tests) is harmless
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init();
}
