//! In-memory source documents.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::event::EventHub;

/// Events a document emits about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentEvent {
    /// Text was replaced
    Changed,
    /// The file backing the document went away
    Deleted,
}

/// One editable source file.
pub struct Document {
    path: PathBuf,
    language_id: &'static str,
    text: RwLock<String>,
    dirty: AtomicBool,
    events: EventHub<DocumentEvent>,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            language_id: language_id_for(&path),
            path,
            text: RwLock::new(text.into()),
            dirty: AtomicBool::new(false),
            events: EventHub::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lowercase extension without the dot, empty when there is none.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    }

    pub fn language_id(&self) -> &'static str {
        self.language_id
    }

    pub fn text(&self) -> String {
        self.text.read().clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Returns true when the flag actually flipped.
    pub fn set_dirty(&self, dirty: bool) -> bool {
        self.dirty.swap(dirty, Ordering::SeqCst) != dirty
    }

    /// Replace the text and emit `Changed`. Returns false (and emits
    /// nothing) when the text is identical.
    pub fn replace_text(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        {
            let mut current = self.text.write();
            if *current == text {
                return false;
            }
            *current = text;
        }
        self.events.emit(&DocumentEvent::Changed);
        true
    }

    pub(crate) fn mark_deleted(&self) {
        self.events.emit(&DocumentEvent::Deleted);
    }

    pub fn events(&self) -> &EventHub<DocumentEvent> {
        &self.events
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("path", &self.path)
            .field("language_id", &self.language_id)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

/// Map a file extension to the editor language id.
pub fn language_id_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html" | "htm" | "xhtml") => "html",
        Some("css") => "css",
        Some("scss") => "scss",
        Some("less") => "less",
        Some("js" | "mjs" | "cjs") => "javascript",
        Some("json") => "json",
        Some("md" | "markdown") => "markdown",
        Some("svg" | "xml") => "xml",
        _ => "text",
    }
}
