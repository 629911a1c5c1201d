//! Tidy Cache - interactive console
//!
//! Drives a string cache from stdin, one command per line, printing one JSON
//! reply per line on stdout. Logs go to stderr.

use std::sync::Arc;

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tidy_cache::console::{run_console, ConsoleState};
use tidy_cache::{CacheOptions, ServiceHost, TidyWorker};

/// Main entry point for the Tidy Cache console.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load cache options from environment variables
/// 3. Create the cache
/// 4. Start the tidy worker
/// 5. Serve console commands until EOF, `QUIT` or a shutdown signal
/// 6. Stop the worker and dispose the cache
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" for this crate, can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tidy_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting Tidy Cache console");

    let options = CacheOptions::from_env();
    options.validate()?;
    info!(
        strategy = ?options.default_strategy,
        hard_count_limit = options.hard_count_limit,
        hard_size_limit = options.hard_size_limit,
        soft_count_limit = options.soft_count_limit,
        soft_size_limit = options.soft_size_limit,
        tidy_interval_ms = options.tidy_interval.as_millis() as u64,
        "Configuration loaded"
    );

    let state = ConsoleState::from_options(options)?;

    let mut host = ServiceHost::new();
    host.register(Arc::new(TidyWorker::new(state.cache.clone())));
    host.start_all().await?;

    tokio::select! {
        result = run_console(state.clone(), tokio::io::stdin(), tokio::io::stdout()) => {
            if let Err(e) = result {
                warn!(error = %e, "Console stopped with an error");
            }
        }
        _ = shutdown_signal() => {}
    }

    host.stop_all().await;
    state.cache.dispose();
    info!("Shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
