//! Live preview server: `livedev serve`.
//!
//! ```text
//! LiveConfig ──► Protocol + WsTransport ──► ServerManager (HttpServer)
//!                                                  │
//! MemoryWorkspace ◄── FsWatcher                    ▼
//!        └──────────────────────────────► SessionActor ──► status line
//! ```
//!
//! The session opens once at startup and keeps following the workspace
//! until Ctrl+C, when it is closed before the process exits.

mod lifecycle;

use crate::{
    cli::ServeArgs,
    config::LiveConfig,
    core::{CloseReason, register_shutdown},
    editor::{FsWatcher, MemoryWorkspace, Workspace},
    log, logger,
    protocol::Protocol,
    server::{HttpServer, ServerManager},
    session::{Session, SessionActor, SessionEvent},
    transport::WsTransport,
};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Run `livedev serve` until Ctrl+C.
pub fn serve(config: LiveConfig, args: &ServeArgs) -> Result<()> {
    let rt = lifecycle::build_runtime()?;
    rt.block_on(run(Arc::new(config), args.clone()))
}

async fn run(config: Arc<LiveConfig>, args: ServeArgs) -> Result<()> {
    let protocol = Protocol::new();
    let transport = Arc::new(WsTransport::new(config.serve.ws_port));
    protocol
        .set_transport(Arc::clone(&transport) as _)
        .context("Failed to start the WebSocket transport")?;
    crate::debug!("serve"; "ws://{}:{}", config.serve.interface, transport.port());

    let servers = Arc::new(ServerManager::new());
    servers.register(
        0,
        HttpServer::provider(
            config.root.clone(),
            config.serve.interface,
            config.serve.port,
            Arc::clone(&protocol),
        ),
    );

    let workspace = Arc::new(MemoryWorkspace::new(&config.root));
    let mut session = Session::new(
        Arc::clone(&config),
        Arc::clone(&workspace) as Arc<dyn Workspace>,
        servers,
        protocol,
    );
    let _report = session.events().subscribe(report);

    if let Some(file) = &args.file {
        let path = config.root_join(file);
        workspace
            .document_for_path(&path)
            .await
            .with_context(|| format!("Cannot preview {}", file.display()))?;
        workspace.set_current(Some(&path));
        if args.pin {
            session.set_pinned(true, Some(path));
        }
    }

    let (actor, handle) = SessionActor::new(session).context("Session already running")?;
    let actor = tokio::spawn(actor.run());

    let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded(1);
    register_shutdown(shutdown_tx);

    handle.open().await.context("Failed to open the live preview")?;

    let watcher = match config.serve.watch {
        true => {
            let watcher = FsWatcher::new(&config.root, Arc::clone(&workspace), config.preview.clone())
                .context("Failed to watch the project root")?;
            Some(tokio::spawn(watcher.run()))
        }
        false => None,
    };

    lifecycle::wait_for_shutdown(shutdown_rx).await;

    if let Some(watcher) = watcher {
        watcher.abort();
    }
    let _ = handle.close_with(Some(CloseReason::ExplicitClose)).await;
    let _ = handle.shutdown().await;
    let _ = actor.await;
    Ok(())
}

/// Session events → terminal.
fn report(event: &SessionEvent) {
    match event {
        SessionEvent::StatusChange(change) => logger::status(change.status, change.reason),
        SessionEvent::OpenPreviewUrl { url, path } => {
            log!("serve"; "{} ({})", url, path.display());
        }
        SessionEvent::ConnectionClose { client_id } => {
            crate::debug!("serve"; "page {} disconnected", client_id);
        }
        SessionEvent::PreviewClicked { details, .. } => {
            crate::debug!("serve"; "clicked {}", details);
        }
        SessionEvent::PreviewReload { .. } => {}
    }
}
