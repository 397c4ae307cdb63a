//! Editor-side collaborators: documents, editors and the workspace.
//!
//! The preview engine only depends on the [`Workspace`] contract.
//! [`MemoryWorkspace`] is the implementation the CLI uses, fed by the
//! filesystem watcher in [`watch`].

mod document;
mod memory;
mod view;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::EventHub;

pub use document::{Document, DocumentEvent, language_id_for};
pub use memory::MemoryWorkspace;
pub use view::{Editor, Marker};
pub use watch::FsWatcher;

/// Workspace-wide notifications.
#[derive(Debug, Clone)]
pub enum EditorEvent {
    /// The editor switched to another file
    CurrentFileChange,
    /// A document was written out
    DocumentSaved(Arc<Document>),
    /// A document became dirty or clean
    DirtyFlagChange(Arc<Document>),
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("no such document: `{0}`")]
    NotFound(PathBuf),

    #[error("failed to read `{0}`")]
    Io(PathBuf, #[source] std::io::Error),
}

/// What the preview engine needs from the editor.
#[async_trait]
pub trait Workspace: Send + Sync {
    fn project_root(&self) -> &Path;

    /// Document of the focused editor.
    fn current_document(&self) -> Option<Arc<Document>>;

    fn active_editor(&self) -> Option<Arc<Editor>>;

    /// The master editor of `doc`, created on first use.
    fn editor_for(&self, doc: &Arc<Document>) -> Arc<Editor>;

    /// Open (or return the already open) document for `path`.
    async fn document_for_path(&self, path: &Path) -> Result<Arc<Document>, WorkspaceError>;

    fn events(&self) -> &EventHub<EditorEvent>;
}
