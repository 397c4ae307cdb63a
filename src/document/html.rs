//! Page live documents.
//!
//! The page reports the scripts and stylesheets it loads; the document
//! keeps that set so a saved file can be matched to the page it affects.

use std::path::Path;

use super::{LiveDocEvent, LiveDocument};
use crate::core::strip_query;
use crate::editor::DocumentEvent;
use crate::protocol::ProtocolEvent;

impl LiveDocument {
    pub(super) fn attach_html(&self) {
        let weak = self.downgrade();
        let sub = self.0.protocol.events().subscribe(move |event| {
            if let Some(live) = LiveDocument::upgrade(&weak) {
                live.on_protocol_event(event);
            }
        });
        self.0.protocol_subs.push(sub);

        let weak = self.downgrade();
        let sub = self.0.doc.events().subscribe(move |event| {
            if *event == DocumentEvent::Deleted
                && let Some(live) = LiveDocument::upgrade(&weak)
            {
                live.close();
                live.0.events.emit(&LiveDocEvent::Deleted {
                    url: live.url().to_string(),
                });
            }
        });
        self.0.doc_subs.push(sub);
    }

    fn on_protocol_event(&self, event: &ProtocolEvent) {
        let mut state = self.0.state.lock();
        match event {
            ProtocolEvent::DocumentRelated { related, .. } => {
                state.related_scripts = related.scripts.iter().map(|s| strip_query(s)).collect();
                state.related_stylesheets = related
                    .stylesheets
                    .iter()
                    .map(|(href, _)| strip_query(href))
                    .collect();
            }
            ProtocolEvent::ScriptAdded { src, .. } => {
                state.related_scripts.insert(strip_query(src));
            }
            ProtocolEvent::ScriptRemoved { src, .. } => {
                state.related_scripts.remove(&strip_query(src));
            }
            ProtocolEvent::StylesheetAdded { href, .. } => {
                state.related_stylesheets.insert(strip_query(href));
            }
            ProtocolEvent::StylesheetRemoved { href, .. } => {
                state.related_stylesheets.remove(&strip_query(href));
            }
            _ => {}
        }
    }

    pub(super) fn html_is_related(&self, path: &Path) -> bool {
        let Some(url) = (self.0.resolver)(path) else {
            return false;
        };
        let url = strip_query(&url);
        let state = self.0.state.lock();
        state.related_scripts.contains(&url) || state.related_stylesheets.contains(&url)
    }

    /// Scripts the page reported, sorted.
    pub fn related_scripts(&self) -> Vec<String> {
        let mut scripts: Vec<_> = self.0.state.lock().related_scripts.iter().cloned().collect();
        scripts.sort();
        scripts
    }

    /// Stylesheets the page reported, sorted.
    pub fn related_stylesheets(&self) -> Vec<String> {
        let mut sheets: Vec<_> = self
            .0
            .state
            .lock()
            .related_stylesheets
            .iter()
            .cloned()
            .collect();
        sheets.sort();
        sheets
    }

    pub(super) fn html_highlight_target(&self) -> Option<(&'static str, String)> {
        let cursor = self.0.editor.selections().first()?.start;
        let hit = super::element_at(&self.0.doc.text(), cursor)?;
        self.0.editor.release_markers(self.0.id);
        self.0.editor.add_marker(self.0.id, hit.range);
        Some(("highlightElement", hit.selector))
    }
}
