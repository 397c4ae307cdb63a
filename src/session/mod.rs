//! Live preview session: the orchestrator.
//!
//! # Architecture
//!
//! ```text
//! Workspace --[file change / save / dirty]--+
//!                                           |
//! Protocol --[connect / stylesheets / ...]--+--> inbox --> Session
//!                                           |               |
//! LiveDocument --[error / updateDoc]--------+               +--> ServerAdapter (registration)
//!                                                           +--> Protocol (reload / navigate)
//! ```
//!
//! Listeners never touch the session directly: they push an [`Inbound`]
//! message and the owner of the session drains the inbox, either through
//! [`Session::process_pending`] or the [`SessionActor`] loop. Every status
//! change goes through the [`StatusController`].

mod actor;
mod related;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::LiveConfig;
use crate::core::{CloseReason, Status, StatusChange, StatusController, origin_and_path};
use crate::debug;
use crate::document::{self, ErrorObserver, LiveDocParams, LiveDocument, Variant};
use crate::editor::{Document, EditorEvent, Workspace};
use crate::event::{EventHub, SubscriptionSet};
use crate::protocol::{ClientId, Protocol, ProtocolEvent};
use crate::server::{ServerAdapter, ServerError, ServerManager};

pub use actor::{SessionActor, SessionCommand, SessionHandle};
use related::RelatedDocuments;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no server can serve `{}`", .0.display())]
    NoServer(PathBuf),

    #[error("live preview server is not ready")]
    ServerNotReady(#[source] ServerError),

    #[error("failed to start live preview server")]
    ServerStart(#[source] ServerError),

    #[error("session actor has stopped")]
    Stopped,
}

/// Notifications for the UI side.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChange(StatusChange),
    /// Ask the UI to open `url` in a browser
    OpenPreviewUrl { url: String, path: PathBuf },
    ConnectionClose { client_id: ClientId },
    PreviewClicked { client_id: ClientId, details: Value },
    PreviewReload { clients: Vec<ClientId> },
}

/// What `live_preview_details` reports.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewDetails {
    pub live_document: Option<LiveDocument>,
    pub url: Option<String>,
}

/// Work queued by listeners for the session.
#[derive(Debug)]
enum Inbound {
    Protocol(ProtocolEvent),
    Editor(EditorEvent),
    DocError { doc_id: u64, has_errors: bool },
    UpdateDoc { url: String, from: u64 },
    RelatedDeleted { url: String },
}

pub struct Session {
    config: Arc<LiveConfig>,
    workspace: Arc<dyn Workspace>,
    servers: Arc<ServerManager>,
    protocol: Arc<Protocol>,
    status: StatusController,
    main_doc: Option<LiveDocument>,
    related: RelatedDocuments,
    server: Option<Arc<dyn ServerAdapter>>,
    pinned: bool,
    pinned_path: Option<PathBuf>,
    /// Protocol listeners installed by `open_preview`
    protocol_subs: SubscriptionSet,
    /// Workspace listeners installed by `init`
    editor_subs: SubscriptionSet,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: Option<mpsc::UnboundedReceiver<Inbound>>,
    events: EventHub<SessionEvent>,
}

impl Session {
    pub fn new(
        config: Arc<LiveConfig>,
        workspace: Arc<dyn Workspace>,
        servers: Arc<ServerManager>,
        protocol: Arc<Protocol>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            config,
            workspace,
            servers,
            protocol,
            status: StatusController::new(),
            main_doc: None,
            related: RelatedDocuments::default(),
            server: None,
            pinned: false,
            pinned_path: None,
            protocol_subs: SubscriptionSet::new(),
            editor_subs: SubscriptionSet::new(),
            inbox_tx,
            inbox_rx: Some(inbox_rx),
            events: EventHub::new(),
        }
    }

    /// Install the workspace listeners. Calling it again replaces them.
    pub fn init(&mut self) {
        self.editor_subs.unsubscribe_all();
        let tx = self.inbox_tx.clone();
        self.editor_subs
            .push(self.workspace.events().subscribe(move |event| {
                let _ = tx.send(Inbound::Editor(event.clone()));
            }));
        self.set_status(Status::Inactive, None);
    }

    /// Close the session and drop the workspace listeners.
    pub fn dispose(&mut self) {
        self.close();
        self.editor_subs.unsubscribe_all();
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn status(&self) -> Status {
        self.status.current()
    }

    /// True while a session exists, connected or not.
    pub fn is_active(&self) -> bool {
        self.status().is_live()
    }

    pub fn events(&self) -> &EventHub<SessionEvent> {
        &self.events
    }

    pub fn server(&self) -> Option<&Arc<dyn ServerAdapter>> {
        self.server.as_ref()
    }

    pub fn main_document(&self) -> Option<&LiveDocument> {
        self.main_doc.as_ref()
    }

    pub fn live_doc_for_path(&self, path: &Path) -> Option<LiveDocument> {
        self.server.as_ref()?.get(path)
    }

    pub fn connection_ids(&self) -> Vec<ClientId> {
        self.protocol.connection_ids()
    }

    pub fn live_preview_details(&self) -> PreviewDetails {
        PreviewDetails {
            live_document: self.main_doc.clone(),
            url: self
                .main_doc
                .as_ref()
                .and_then(|main| self.resolve_url(main.path())),
        }
    }

    fn resolve_url(&self, path: &Path) -> Option<String> {
        self.server.as_ref()?.path_to_url(path)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start previewing: the pinned file, else the current document, else
    /// the project's index file.
    ///
    /// A live session is closed first. When the server rejects the
    /// preparation step nothing else changes.
    pub async fn open(&mut self) -> Result<(), SessionError> {
        if self.is_active() {
            self.close();
        }

        let doc = self.preview_target().await;
        let serve_path = match &doc {
            Some(doc) => doc.path().to_path_buf(),
            None => self
                .workspace
                .project_root()
                .join(&self.config.preview.index_file),
        };

        let server = self
            .servers
            .get_server(&serve_path)
            .ok_or_else(|| SessionError::NoServer(serve_path.clone()))?;
        server
            .ready_to_serve()
            .await
            .map_err(SessionError::ServerNotReady)?;

        self.server = Some(Arc::clone(&server));
        self.set_status(Status::Connecting, None);
        match doc {
            Some(doc) => self.create_main_document(doc),
            None => debug!("session"; "nothing to preview under {}", serve_path.display()),
        }

        if !server.is_active()
            && let Err(err) = server.start().await
        {
            self.close();
            return Err(SessionError::ServerStart(err));
        }

        self.open_preview();
        Ok(())
    }

    /// End the session. A no-op when already inactive.
    pub fn close(&mut self) {
        self.close_with(None);
    }

    /// End the session with `reason` (default: explicit close).
    pub fn close_with(&mut self, reason: Option<CloseReason>) {
        if self.is_active() {
            self.close_documents();
            self.protocol.close_all_connections();
            if let Some(server) = self.server.take() {
                server.stop();
            }
        }
        self.set_status(Status::Inactive, reason);
    }

    /// Reload every connected page.
    pub fn reload(&self) {
        drop(self.protocol.reload(None));
    }

    /// Pages reconnect through the transport on their own; nothing to do.
    pub fn reconnect(&self) -> Result<(), SessionError> {
        Ok(())
    }

    pub fn set_pinned(&mut self, pinned: bool, path: Option<PathBuf>) {
        self.pinned = pinned;
        self.pinned_path = path;
    }

    // ========================================================================
    // Highlighting
    // ========================================================================

    /// Highlight what is under the cursor of the active editor.
    pub fn show_highlight(&self) {
        let Some(editor) = self.workspace.active_editor() else {
            return;
        };
        if let Some(live) = self.live_doc_for_path(editor.document().path()) {
            live.update_highlight();
        }
    }

    pub fn hide_highlight(&self) {
        drop(self.protocol.evaluate("_LD.hideHighlight()", None));
    }

    pub fn redraw_highlight(&self) {
        drop(self.protocol.evaluate("_LD.redrawHighlights()", None));
    }

    // ========================================================================
    // Inbox
    // ========================================================================

    /// Hand the inbox to an event loop. `process_pending` is a no-op
    /// afterwards.
    fn take_inbox(&mut self) -> Option<mpsc::UnboundedReceiver<Inbound>> {
        self.inbox_rx.take()
    }

    /// Handle everything listeners queued so far.
    pub async fn process_pending(&mut self) {
        let Some(mut rx) = self.inbox_rx.take() else {
            return;
        };
        while let Ok(msg) = rx.try_recv() {
            self.handle(msg).await;
        }
        self.inbox_rx = Some(rx);
    }

    async fn handle(&mut self, msg: Inbound) {
        match msg {
            Inbound::Protocol(event) => self.on_protocol_event(event).await,
            Inbound::Editor(EditorEvent::CurrentFileChange) => self.on_file_change(),
            Inbound::Editor(EditorEvent::DocumentSaved(doc)) => self.on_document_saved(&doc),
            Inbound::Editor(EditorEvent::DirtyFlagChange(doc)) => self.on_dirty_flag_change(&doc),
            Inbound::DocError { doc_id, has_errors } => self.on_doc_error(doc_id, has_errors),
            Inbound::UpdateDoc { url, from } => self.on_update_doc(&url, from),
            Inbound::RelatedDeleted { url } => self.handle_related_deleted(&url),
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    fn set_status(&mut self, status: Status, reason: Option<CloseReason>) {
        if let Some(change) = self.status.transition(status, reason) {
            match change.reason {
                Some(reason) => debug!("session"; "status {} ({})", change.status, reason),
                None => debug!("session"; "status {}", change.status),
            }
            self.events.emit(&SessionEvent::StatusChange(change));
        }
    }

    // ========================================================================
    // Documents
    // ========================================================================

    async fn preview_target(&self) -> Option<Arc<Document>> {
        let path = match (&self.pinned_path, self.workspace.current_document()) {
            (Some(path), _) if self.pinned => path.clone(),
            (_, Some(doc)) => return Some(doc),
            _ => self
                .workspace
                .project_root()
                .join(&self.config.preview.index_file),
        };
        match self.workspace.document_for_path(&path).await {
            Ok(doc) => Some(doc),
            Err(err) => {
                debug!("session"; "no preview document: {}", err);
                None
            }
        }
    }

    /// Build the live document for `doc`, reporting its errors to the
    /// inbox. `None` when `doc` is not previewable or there is no server.
    fn create_live_document(&self, doc: Arc<Document>, roots: Vec<String>) -> Option<LiveDocument> {
        let server = Arc::downgrade(self.server.as_ref()?);
        let variant = document::classify(&doc, &self.config.preview);
        if variant == Variant::None {
            return None;
        }

        let tx = self.inbox_tx.clone();
        let on_error: ErrorObserver = Arc::new(move |doc_id, has_errors| {
            let _ = tx.send(Inbound::DocError { doc_id, has_errors });
        });
        document::create(
            variant,
            LiveDocParams {
                protocol: Arc::clone(&self.protocol),
                resolver: Arc::new(move |path: &Path| server.upgrade()?.path_to_url(path)),
                editor: self.workspace.editor_for(&doc),
                doc,
                roots,
                highlight: self.config.preview.highlight,
            },
            Some(on_error),
        )
    }

    /// Make `doc` the main document and register it, with the injected
    /// scripts next to it, on the server.
    fn create_main_document(&mut self, doc: Arc<Document>) {
        let Some(server) = self.server.clone() else {
            return;
        };
        let path = doc.path().to_path_buf();
        let Some(live) = self.create_live_document(doc, Vec::new()) else {
            debug!("session"; "not previewable: {}", path.display());
            return;
        };

        server.add(live.clone());
        let dir = live.path().parent().unwrap_or_else(|| server.project_root());
        let names = self.protocol.script_names();
        server.add_virtual_content(&dir.join(&names.remote), self.protocol.remote_script_contents());
        server.add_virtual_content(
            &dir.join(&names.worker),
            self.protocol.worker_script_contents().to_string(),
        );
        debug!("session"; "main document {}", live.url());
        self.main_doc = Some(live);
    }

    /// Detach, in order: owner listeners, protocol listeners, then close.
    fn close_document(live: &LiveDocument) {
        live.detach_listeners();
        live.detach_protocol_listeners();
        live.close();
    }

    /// Stop listening to the protocol, then close the main and related
    /// documents and forget them on the server.
    fn close_documents(&mut self) {
        self.protocol_subs.unsubscribe_all();
        if let Some(main) = self.main_doc.take() {
            Self::close_document(&main);
        }
        for live in self.related.drain() {
            if let Some(server) = &self.server {
                server.remove(&live);
            }
            Self::close_document(&live);
        }
        if let Some(server) = &self.server {
            server.clear();
        }
    }

    // ========================================================================
    // Browser
    // ========================================================================

    /// Point a browser at the main document and listen to the protocol.
    fn open_preview(&self) {
        let (Some(main), Some(server)) = (&self.main_doc, &self.server) else {
            return;
        };
        let Some(url) = server.path_to_url(main.path()) else {
            debug!("session"; "server cannot serve {}", main.path().display());
            return;
        };

        let status = self.status();
        if status < Status::Active {
            self.events.emit(&SessionEvent::OpenPreviewUrl {
                url: url.clone(),
                path: main.path().to_path_buf(),
            });
        }
        if status == Status::Restarting {
            drop(self.protocol.navigate(&url, None));
        }

        self.protocol_subs.unsubscribe_all();
        let tx = self.inbox_tx.clone();
        self.protocol_subs
            .push(self.protocol.events().subscribe(move |event| {
                let _ = tx.send(Inbound::Protocol(event.clone()));
            }));
    }

    async fn on_protocol_event(&mut self, event: ProtocolEvent) {
        if !self.is_active() {
            return;
        }
        match event {
            ProtocolEvent::ConnectionConnect { client_id, url } => self.on_connect(client_id, &url),
            ProtocolEvent::ConnectionClose { client_id } => {
                debug!("session"; "client {} left, {} remaining", client_id, self.protocol.connection_ids().len());
                self.events
                    .emit(&SessionEvent::ConnectionClose { client_id });
            }
            ProtocolEvent::DocumentRelated { related, .. } => {
                for (href, roots) in related.stylesheets {
                    self.stylesheet_added(&href, roots).await;
                }
            }
            ProtocolEvent::StylesheetAdded { href, roots, .. } => {
                self.stylesheet_added(&href, roots).await;
            }
            ProtocolEvent::StylesheetRemoved { href, .. } => self.handle_related_deleted(&href),
            ProtocolEvent::PreviewClicked { client_id, details } => {
                self.events
                    .emit(&SessionEvent::PreviewClicked { client_id, details });
            }
            ProtocolEvent::PreviewReload { clients } => {
                self.events.emit(&SessionEvent::PreviewReload { clients });
            }
            _ => {}
        }
    }

    /// A page for the main document connecting completes the pending
    /// transition; pages for anything else are left alone.
    fn on_connect(&mut self, client_id: ClientId, url: &str) {
        let expected = self
            .main_doc
            .as_ref()
            .and_then(|main| self.resolve_url(main.path()));
        let matches = expected.is_some() && origin_and_path(url) == expected;
        debug!("session"; "client {} at {} (main: {})", client_id, url, matches);

        if matches
            && matches!(
                self.status(),
                Status::Connecting | Status::Restarting | Status::Reloading
            )
        {
            self.set_status(Status::Active, None);
        }
    }

    // ========================================================================
    // Editor
    // ========================================================================

    /// Follow the editor to another previewable file unless pinned.
    fn on_file_change(&mut self) {
        if !self.is_active() || self.pinned {
            return;
        }
        let (Some(doc), Some(server), Some(main)) = (
            self.workspace.current_document(),
            self.server.clone(),
            self.main_doc.as_ref(),
        ) else {
            return;
        };

        let url = server.path_to_url(doc.path());
        if url.as_deref() == Some(main.url())
            || !server.can_serve(doc.path())
            || document::classify(&doc, &self.config.preview) == Variant::None
        {
            return;
        }

        // A browser that never connected is still on its way to the old
        // URL; launch again instead of navigating.
        let next = match self.status() {
            Status::Connecting => Status::Connecting,
            _ => Status::Restarting,
        };
        self.close_documents();
        self.create_main_document(doc);
        self.set_status(next, None);
        self.open_preview();
    }

    /// Dirty and not patched as you type.
    fn is_out_of_sync(&self, doc: &Document) -> bool {
        let live_editing = self
            .live_doc_for_path(doc.path())
            .is_some_and(|live| live.is_live_editing_enabled());
        doc.is_dirty() && !live_editing
    }

    fn is_related_to_main(&self, path: &Path) -> bool {
        self.main_doc
            .as_ref()
            .is_some_and(|main| main.is_related(path))
    }

    fn on_dirty_flag_change(&mut self, doc: &Document) {
        if !matches!(self.status(), Status::Active | Status::OutOfSync) || self.server.is_none() {
            return;
        }
        if self.is_related_to_main(doc.path()) {
            let status = if self.is_out_of_sync(doc) {
                Status::OutOfSync
            } else {
                Status::Active
            };
            self.set_status(status, None);
        }
    }

    /// Saving a related file the page cannot patch reloads the page.
    fn on_document_saved(&mut self, doc: &Document) {
        if !self.is_active() || self.server.is_none() {
            return;
        }
        if self
            .live_doc_for_path(doc.path())
            .is_some_and(|live| live.is_live_editing_enabled())
        {
            return;
        }
        if self.is_related_to_main(doc.path())
            && self.config.preview.reloads_on_save(doc.language_id())
        {
            debug!("session"; "{} saved, reloading", doc.path().display());
            self.set_status(Status::Reloading, None);
            drop(self.protocol.reload(None));
        }
    }

    fn on_doc_error(&mut self, doc_id: u64, has_errors: bool) {
        let known = self.main_doc.as_ref().is_some_and(|m| m.id() == doc_id)
            || self.related.contains_id(doc_id);
        if !known || !matches!(self.status(), Status::Active | Status::SyncError) {
            return;
        }
        let status = if has_errors {
            Status::SyncError
        } else {
            Status::Active
        };
        self.set_status(status, None);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}
