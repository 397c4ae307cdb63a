//! Related documents: stylesheets the previewed page loaded.
//!
//! The page reports stylesheets as it loads them (and again after
//! incremental updates, so adds are idempotent). Each one that maps to a
//! CSS file in the project gets a live document, registered with the
//! server and keyed by its URL.

use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::{Inbound, Session};
use crate::core::strip_query;
use crate::debug;
use crate::document::{self, LiveDocEvent, LiveDocument, Variant};

#[derive(Default)]
pub(super) struct RelatedDocuments {
    docs: FxHashMap<String, LiveDocument>,
}

impl RelatedDocuments {
    pub(super) fn contains(&self, url: &str) -> bool {
        self.docs.contains_key(url)
    }

    pub(super) fn contains_id(&self, id: u64) -> bool {
        self.docs.values().any(|live| live.id() == id)
    }

    pub(super) fn insert(&mut self, url: String, live: LiveDocument) {
        self.docs.insert(url, live);
    }

    pub(super) fn remove(&mut self, url: &str) -> Option<LiveDocument> {
        self.docs.remove(url)
    }

    pub(super) fn len(&self) -> usize {
        self.docs.len()
    }

    /// Tracked URLs, sorted.
    pub(super) fn urls(&self) -> Vec<String> {
        let mut urls: Vec<_> = self.docs.keys().cloned().collect();
        urls.sort();
        urls
    }

    pub(super) fn drain(&mut self) -> Vec<LiveDocument> {
        self.docs.drain().map(|(_, live)| live).collect()
    }
}

impl Session {
    /// URLs of the tracked related documents, sorted.
    pub fn related_urls(&self) -> Vec<String> {
        self.related.urls()
    }

    pub fn related_count(&self) -> usize {
        self.related.len()
    }

    /// Key and project path for a reported stylesheet URL. `None` for
    /// resources outside the project.
    fn related_key(&self, href: &str) -> Option<(String, PathBuf)> {
        let server = self.server.as_ref()?;
        let url = strip_query(href);
        let path = server.url_to_path(&url)?;
        let key = server.path_to_url(&path).unwrap_or(url);
        Some((key, path))
    }

    /// The page loaded the stylesheet at `href`.
    pub(super) async fn stylesheet_added(&mut self, href: &str, roots: Vec<String>) {
        let Some((key, path)) = self.related_key(href) else {
            debug!("related"; "ignoring external stylesheet {}", href);
            return;
        };
        if self.related.contains(&key) {
            return;
        }

        let doc = match self.workspace.document_for_path(&path).await {
            Ok(doc) => doc,
            Err(err) => {
                debug!("related"; "no document for {}: {}", href, err);
                return;
            }
        };

        // The session may have moved on while the document loaded
        if !self.is_active() || self.related.contains(&key) {
            return;
        }
        if document::classify(&doc, &self.config.preview) != Variant::Css
            || self
                .main_doc
                .as_ref()
                .is_some_and(|main| Arc::ptr_eq(main.doc(), &doc))
        {
            return;
        }
        let Some(server) = self.server.clone() else {
            return;
        };
        let roots = roots.iter().map(|root| strip_query(root)).collect();
        let Some(live) = self.create_live_document(doc, roots) else {
            return;
        };

        let tx = self.inbox_tx.clone();
        let from = live.id();
        live.attach_listener(live.events().subscribe(move |event| {
            let msg = match event {
                LiveDocEvent::UpdateDoc { url } => Inbound::UpdateDoc {
                    url: url.clone(),
                    from,
                },
                LiveDocEvent::Deleted { url } => Inbound::RelatedDeleted { url: url.clone() },
                LiveDocEvent::ErrorStatusChanged { .. } => return,
            };
            let _ = tx.send(msg);
        }));

        server.add(live.clone());
        debug!("related"; "tracking {}", key);
        self.related.insert(key, live);
    }

    /// The stylesheet at `url` is gone from the page or from disk.
    pub(super) fn handle_related_deleted(&mut self, url: &str) {
        let key = self
            .related_key(url)
            .map(|(key, _)| key)
            .unwrap_or_else(|| strip_query(url));
        let Some(live) = self.related.remove(&key) else {
            return;
        };
        if let Some(server) = &self.server {
            server.remove(&live);
        }
        Self::close_document(&live);
        debug!("related"; "dropped {}", key);
    }

    /// The stylesheet `from` asked for the sheet at `url` to be refreshed.
    /// A sheet never refreshes itself this way.
    pub(super) fn on_update_doc(&self, url: &str, from: u64) {
        let Some(server) = &self.server else {
            return;
        };
        let live = server
            .url_to_path(url)
            .and_then(|path| server.get(&path));
        match live {
            Some(live) if live.id() == from => {
                debug!("related"; "{} is its own root, not refreshing", url)
            }
            Some(live) => live.update_browser(),
            None => debug!("related"; "no live document for {}", url),
        }
    }
}
