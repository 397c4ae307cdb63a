//! Runtime and shutdown plumbing for serve mode.

use anyhow::{Context, Result};
use crossbeam::channel::Receiver;

/// Runtime for the session actor, the HTTP server tasks and the watcher.
pub fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")
}

/// Wait for Ctrl+C (delivered through `shutdown_rx`).
pub async fn wait_for_shutdown(shutdown_rx: Receiver<()>) {
    // crossbeam recv blocks, keep it off the runtime workers
    let _ = tokio::task::spawn_blocking(move || shutdown_rx.recv()).await;
}
