//! Process-wide shutdown state for serve mode.
//!
//! `SHUTDOWN` is set by Ctrl+C; the serve loop and the HTTP server
//! observe it through `is_shutdown()` and the registered channel.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shutdown has been requested (Ctrl+C received)
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Shutdown signal sender for the serve loop
static SHUTDOWN_TX: OnceLock<crossbeam::channel::Sender<()>> = OnceLock::new();

/// Setup the global Ctrl+C handler. Call once at program start
///
/// Before `register_shutdown()` the process exits immediately; afterwards
/// the registered channel is notified and the serve loop closes the
/// session before returning.
pub fn setup_shutdown_handler() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        if !request_shutdown() {
            std::process::exit(0);
        }
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {}", e))
}

/// Register the channel notified on shutdown
pub fn register_shutdown(tx: crossbeam::channel::Sender<()>) {
    let _ = SHUTDOWN_TX.set(tx);
}

/// Flag shutdown and notify the serve loop. Returns false when nobody
/// is listening yet.
pub fn request_shutdown() -> bool {
    SHUTDOWN.store(true, Ordering::SeqCst);
    match SHUTDOWN_TX.get() {
        Some(tx) => {
            crate::log!("serve"; "shutting down...");
            let _ = tx.send(());
            true
        }
        None => false,
    }
}

/// Check if shutdown has been requested
pub fn is_shutdown() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}
