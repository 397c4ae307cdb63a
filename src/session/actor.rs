//! Session Actor - serialises public calls with inbound events.
//!
//! ```text
//! SessionHandle --[SessionCommand]--+
//!                                   +--> SessionActor (owns Session)
//! listeners ------[Inbound]---------+
//! ```

use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use super::{Inbound, PreviewDetails, Session, SessionError};
use crate::core::{CloseReason, Status};
use crate::document::LiveDocument;
use crate::protocol::ClientId;

/// Command channel capacity
const CHANNEL_BUFFER: usize = 32;

/// Messages to the Session Actor
#[derive(Debug)]
pub enum SessionCommand {
    Open(oneshot::Sender<Result<(), SessionError>>),
    Close {
        reason: Option<CloseReason>,
        done: oneshot::Sender<()>,
    },
    Reload,
    Reconnect(oneshot::Sender<Result<(), SessionError>>),
    ShowHighlight,
    HideHighlight,
    RedrawHighlight,
    SetPinned {
        pinned: bool,
        path: Option<PathBuf>,
    },
    Status(oneshot::Sender<Status>),
    ConnectionIds(oneshot::Sender<Vec<ClientId>>),
    LiveDocForPath {
        path: PathBuf,
        reply: oneshot::Sender<Option<LiveDocument>>,
    },
    Details(oneshot::Sender<PreviewDetails>),
    /// Close and stop the actor
    Shutdown,
}

pub struct SessionActor {
    session: Session,
    rx: mpsc::Receiver<SessionCommand>,
    inbox: mpsc::UnboundedReceiver<Inbound>,
}

impl SessionActor {
    /// Take ownership of `session` (initialising it) and return the actor
    /// with a handle to drive it, or `None` if its inbox is already taken.
    pub fn new(mut session: Session) -> Option<(Self, SessionHandle)> {
        let inbox = session.take_inbox()?;
        session.init();
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        Some((Self { session, rx, inbox }, SessionHandle { tx }))
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(msg) = self.inbox.recv() => self.session.handle(msg).await,
                cmd = self.rx.recv() => match cmd {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(cmd) => self.dispatch(cmd).await,
                },
            }
        }
        crate::debug!("session"; "shutting down");
        self.session.dispose();
    }

    async fn dispatch(&mut self, cmd: SessionCommand) {
        let session = &mut self.session;
        match cmd {
            SessionCommand::Open(reply) => {
                let _ = reply.send(session.open().await);
            }
            SessionCommand::Close { reason, done } => {
                session.close_with(reason);
                let _ = done.send(());
            }
            SessionCommand::Reload => session.reload(),
            SessionCommand::Reconnect(reply) => {
                let _ = reply.send(session.reconnect());
            }
            SessionCommand::ShowHighlight => session.show_highlight(),
            SessionCommand::HideHighlight => session.hide_highlight(),
            SessionCommand::RedrawHighlight => session.redraw_highlight(),
            SessionCommand::SetPinned { pinned, path } => session.set_pinned(pinned, path),
            SessionCommand::Status(reply) => {
                let _ = reply.send(session.status());
            }
            SessionCommand::ConnectionIds(reply) => {
                let _ = reply.send(session.connection_ids());
            }
            SessionCommand::LiveDocForPath { path, reply } => {
                let _ = reply.send(session.live_doc_for_path(&path));
            }
            SessionCommand::Details(reply) => {
                let _ = reply.send(session.live_preview_details());
            }
            SessionCommand::Shutdown => {}
        }
    }
}

/// Cloneable front-end of a running [`SessionActor`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.tx.send(cmd).await.map_err(|_| SessionError::Stopped)
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| SessionError::Stopped)
    }

    pub async fn open(&self) -> Result<(), SessionError> {
        self.ask(SessionCommand::Open).await?
    }

    pub async fn close(&self) -> Result<(), SessionError> {
        self.close_with(None).await
    }

    pub async fn close_with(&self, reason: Option<CloseReason>) -> Result<(), SessionError> {
        self.ask(|done| SessionCommand::Close { reason, done }).await
    }

    pub async fn reload(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Reload).await
    }

    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.ask(SessionCommand::Reconnect).await?
    }

    pub async fn show_highlight(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::ShowHighlight).await
    }

    pub async fn hide_highlight(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::HideHighlight).await
    }

    pub async fn redraw_highlight(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::RedrawHighlight).await
    }

    pub async fn set_pinned(&self, pinned: bool, path: Option<PathBuf>) -> Result<(), SessionError> {
        self.send(SessionCommand::SetPinned { pinned, path }).await
    }

    pub async fn status(&self) -> Result<Status, SessionError> {
        self.ask(SessionCommand::Status).await
    }

    pub async fn connection_ids(&self) -> Result<Vec<ClientId>, SessionError> {
        self.ask(SessionCommand::ConnectionIds).await
    }

    pub async fn live_doc_for_path(&self, path: &Path) -> Result<Option<LiveDocument>, SessionError> {
        let path = path.to_path_buf();
        self.ask(|reply| SessionCommand::LiveDocForPath { path, reply })
            .await
    }

    pub async fn live_preview_details(&self) -> Result<PreviewDetails, SessionError> {
        self.ask(SessionCommand::Details).await
    }

    /// Stop the actor; it closes the session on the way out.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown).await
    }
}
