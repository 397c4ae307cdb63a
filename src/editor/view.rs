//! Editor views: cursor selections and highlight markers.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::Document;

/// Range of text tagged by a live document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub owner: u64,
    pub range: Range<usize>,
}

/// The master editor of a document.
pub struct Editor {
    document: Arc<Document>,
    /// Byte ranges; an empty range is a plain cursor
    selections: RwLock<Vec<Range<usize>>>,
    markers: Mutex<Vec<Marker>>,
}

impl Editor {
    pub fn new(document: Arc<Document>) -> Self {
        Self {
            document,
            selections: RwLock::new(vec![0..0]),
            markers: Mutex::new(Vec::new()),
        }
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn selections(&self) -> Vec<Range<usize>> {
        self.selections.read().clone()
    }

    pub fn set_selections(&self, selections: Vec<Range<usize>>) {
        *self.selections.write() = selections;
    }

    pub fn set_cursor(&self, offset: usize) {
        self.set_selections(vec![offset..offset]);
    }

    pub fn add_marker(&self, owner: u64, range: Range<usize>) {
        self.markers.lock().push(Marker { owner, range });
    }

    /// Drop every marker placed by `owner`, returning how many went away.
    pub fn release_markers(&self, owner: u64) -> usize {
        let mut markers = self.markers.lock();
        let before = markers.len();
        markers.retain(|m| m.owner != owner);
        before - markers.len()
    }

    pub fn markers_of(&self, owner: u64) -> Vec<Marker> {
        self.markers
            .lock()
            .iter()
            .filter(|m| m.owner == owner)
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("document", &self.document.path())
            .field("selections", &*self.selections.read())
            .finish()
    }
}
