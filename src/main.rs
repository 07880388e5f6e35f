//! loopback-echo server binary.
//!
//! Loads configuration, installs logging, and runs the listener until
//! Ctrl-C.

use loopback_echo::config::Config;
use loopback_echo::{ExecutionContext, Listener, TracingDiagnostics};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        address = %config.listen,
        buffer_size = config.buffer_size,
        workers = ?config.workers,
        "Starting loopback-echo server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    // Zero falls back to one worker per core, like leaving it unset.
    if let Some(workers) = config.workers.filter(|&n| n > 0) {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let context = ExecutionContext::current()?;
    let listener = Listener::start(
        &context,
        config.listen,
        config.buffer_size,
        Arc::new(TracingDiagnostics),
    )?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    listener.close();
    let reason = listener.stopped().await;
    info!(reason = %reason, "Listener stopped");
    Ok(())
}
