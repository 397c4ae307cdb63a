use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::{Document, Editor, EditorEvent, Workspace, WorkspaceError};
use crate::event::EventHub;
use crate::utils::path::clean;

/// Workspace holding open documents in memory.
///
/// Paths are made absolute against the project root. Unknown paths are
/// loaded from disk on first request.
pub struct MemoryWorkspace {
    root: PathBuf,
    documents: DashMap<PathBuf, Arc<Document>>,
    editors: DashMap<PathBuf, Arc<Editor>>,
    current: RwLock<Option<PathBuf>>,
    events: EventHub<EditorEvent>,
}

impl MemoryWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            documents: DashMap::new(),
            editors: DashMap::new(),
            current: RwLock::new(None),
            events: EventHub::new(),
        }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            clean(path)
        } else {
            clean(&self.root.join(path))
        }
    }

    /// Open a document with the given text, replacing nothing if it is
    /// already open.
    pub fn open(&self, path: impl AsRef<Path>, text: impl Into<String>) -> Arc<Document> {
        let path = self.resolve(path.as_ref());
        self.documents
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Document::new(path, text)))
            .clone()
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<Arc<Document>> {
        let path = self.resolve(path.as_ref());
        self.documents.get(&path).map(|d| Arc::clone(&d))
    }

    /// Focus the editor on `path`. Emits `CurrentFileChange` when the
    /// focus moved.
    pub fn set_current(&self, path: Option<&Path>) {
        let path = path.map(|p| self.resolve(p));
        {
            let mut current = self.current.write();
            if *current == path {
                return;
            }
            *current = path;
        }
        crate::debug!("watch"; "current file: {:?}", self.current.read().as_deref());
        self.events.emit(&EditorEvent::CurrentFileChange);
    }

    /// Replace the text of an open document as the user would by typing.
    pub fn edit(&self, path: impl AsRef<Path>, text: impl Into<String>) -> Option<Arc<Document>> {
        let doc = self.get(path)?;
        if doc.replace_text(text) && doc.set_dirty(true) {
            self.events.emit(&EditorEvent::DirtyFlagChange(Arc::clone(&doc)));
        }
        Some(doc)
    }

    /// Mark a document clean and announce the save.
    pub fn save(&self, path: impl AsRef<Path>) -> Option<Arc<Document>> {
        let doc = self.get(path)?;
        if doc.set_dirty(false) {
            self.events.emit(&EditorEvent::DirtyFlagChange(Arc::clone(&doc)));
        }
        self.events.emit(&EditorEvent::DocumentSaved(Arc::clone(&doc)));
        Some(doc)
    }

    /// Pick up a change made on disk and report it as a save. Files not
    /// open yet are opened from disk; files that are gone are ignored.
    pub async fn reload_from_disk(&self, path: &Path) -> Result<Option<Arc<Document>>, WorkspaceError> {
        let path = self.resolve(path);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(_) if path.is_dir() => return Ok(None),
            Err(err) => return Err(WorkspaceError::Io(path, err)),
        };
        let doc = match self.get(&path) {
            Some(doc) => {
                doc.replace_text(text);
                doc
            }
            None => self.open(&path, text),
        };
        self.save(&path);
        Ok(Some(doc))
    }

    /// Forget a document whose file was removed.
    pub fn delete(&self, path: impl AsRef<Path>) -> Option<Arc<Document>> {
        let path = self.resolve(path.as_ref());
        let (_, doc) = self.documents.remove(&path)?;
        self.editors.remove(&path);
        doc.mark_deleted();
        if self.current.read().as_deref() == Some(path.as_path()) {
            self.set_current(None);
        }
        Some(doc)
    }
}

#[async_trait]
impl Workspace for MemoryWorkspace {
    fn project_root(&self) -> &Path {
        &self.root
    }

    fn current_document(&self) -> Option<Arc<Document>> {
        let current = self.current.read().clone()?;
        self.get(current)
    }

    fn active_editor(&self) -> Option<Arc<Editor>> {
        let doc = self.current_document()?;
        Some(self.editor_for(&doc))
    }

    fn editor_for(&self, doc: &Arc<Document>) -> Arc<Editor> {
        self.editors
            .entry(doc.path().to_path_buf())
            .or_insert_with(|| Arc::new(Editor::new(Arc::clone(doc))))
            .clone()
    }

    async fn document_for_path(&self, path: &Path) -> Result<Arc<Document>, WorkspaceError> {
        let path = self.resolve(path);
        if let Some(doc) = self.get(&path) {
            return Ok(doc);
        }
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkspaceError::NotFound(path));
            }
            Err(err) => return Err(WorkspaceError::Io(path, err)),
        };
        Ok(self.open(&path, text))
    }

    fn events(&self) -> &EventHub<EditorEvent> {
        &self.events
    }
}
