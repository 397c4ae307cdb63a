//! Live documents: source documents wired to their resource in the page.
//!
//! | Variant | Live editing | On change                                  |
//! |---------|--------------|--------------------------------------------|
//! | CSS     | yes          | patch the stylesheet text in place          |
//! | HTML    | no           | nothing until saved; tracks page resources  |
//!
//! A [`LiveDocument`] is a cheap handle. Three subscription sets hang off
//! it: listeners attached by its owner, the document's own protocol
//! listeners, and its listeners on the source document. Teardown releases
//! them in that order, then `close()` releases editor markers.

mod css;
pub mod factory;
mod highlight;
mod html;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::editor::{Document, Editor};
use crate::event::{EventHub, Subscription, SubscriptionSet};
use crate::protocol::{Protocol, ProtocolError, Response};

pub use factory::{ErrorObserver, LiveDocParams, classify, create};
pub use highlight::{element_at, selector_at};

/// Maps a project path to the URL the preview serves it at.
pub type UrlResolver = Arc<dyn Fn(&Path) -> Option<String> + Send + Sync>;

/// Live document kind of a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Html,
    Css,
    /// Not previewable
    None,
}

/// Notifications from a live document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveDocEvent {
    /// The resource at `url` must be refreshed for this document's change
    /// to show up (an importing stylesheet, for instance).
    UpdateDoc { url: String },
    ErrorStatusChanged { has_errors: bool },
    /// The source file was deleted; the document has closed itself.
    Deleted { url: String },
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct DocState {
    closed: bool,
    highlight_enabled: bool,
    highlighting: bool,
    has_errors: bool,
    /// Resources the page reported (HTML only), query-stripped URLs
    related_scripts: FxHashSet<String>,
    related_stylesheets: FxHashSet<String>,
}

struct Inner {
    id: u64,
    variant: Variant,
    doc: Arc<Document>,
    editor: Arc<Editor>,
    protocol: Arc<Protocol>,
    resolver: UrlResolver,
    url: String,
    roots: Vec<String>,
    state: Mutex<DocState>,
    events: EventHub<LiveDocEvent>,
    /// Attached by the owner (session / tracker)
    listeners: SubscriptionSet,
    /// The document's own protocol listeners
    protocol_subs: SubscriptionSet,
    /// Listeners on the source document
    doc_subs: SubscriptionSet,
}

/// Handle to a live document.
#[derive(Clone)]
pub struct LiveDocument(Arc<Inner>);

impl LiveDocument {
    fn build(variant: Variant, params: LiveDocParams) -> Self {
        let LiveDocParams {
            protocol,
            resolver,
            doc,
            editor,
            roots,
            highlight,
        } = params;

        let url = resolver(doc.path()).unwrap_or_else(|| file_url(doc.path()));
        let roots = if roots.is_empty() && variant == Variant::Css {
            vec![url.clone()]
        } else {
            roots
        };

        Self(Arc::new(Inner {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            variant,
            doc,
            editor,
            protocol,
            resolver,
            url,
            roots,
            state: Mutex::new(DocState {
                highlight_enabled: highlight,
                ..DocState::default()
            }),
            events: EventHub::new(),
            listeners: SubscriptionSet::new(),
            protocol_subs: SubscriptionSet::new(),
            doc_subs: SubscriptionSet::new(),
        }))
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.0)
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(Self)
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn variant(&self) -> Variant {
        self.0.variant
    }

    pub fn doc(&self) -> &Arc<Document> {
        &self.0.doc
    }

    pub fn path(&self) -> &Path {
        self.0.doc.path()
    }

    pub fn editor(&self) -> &Arc<Editor> {
        &self.0.editor
    }

    /// URL the preview serves this document at.
    pub fn url(&self) -> &str {
        &self.0.url
    }

    pub fn roots(&self) -> &[String] {
        &self.0.roots
    }

    pub fn events(&self) -> &EventHub<LiveDocEvent> {
        &self.0.events
    }

    pub fn is_closed(&self) -> bool {
        self.0.state.lock().closed
    }

    pub fn has_errors(&self) -> bool {
        self.0.state.lock().has_errors
    }

    /// Whether edits show up in the page without a reload.
    pub fn is_live_editing_enabled(&self) -> bool {
        self.0.variant == Variant::Css
    }

    /// Whether a change to `path` affects this document's page.
    pub fn is_related(&self, path: &Path) -> bool {
        if self.path() == path {
            return true;
        }
        match self.0.variant {
            Variant::Html => self.html_is_related(path),
            Variant::Css | Variant::None => false,
        }
    }

    /// Push the current text to the page.
    pub fn update_browser(&self) {
        if self.is_closed() {
            return;
        }
        match self.0.variant {
            Variant::Css => self.css_update_browser(),
            Variant::Html => {
                let _ = self.0.protocol.reload(None);
            }
            Variant::None => {}
        }
    }

    // ========================================================================
    // Highlighting
    // ========================================================================

    pub fn set_highlight_enabled(&self, enabled: bool) {
        self.0.state.lock().highlight_enabled = enabled;
        if !enabled {
            self.hide_highlight();
        }
    }

    pub fn is_highlight_enabled(&self) -> bool {
        self.0.state.lock().highlight_enabled
    }

    /// Highlight what the cursor is on.
    pub fn update_highlight(&self) {
        if self.is_closed() || !self.is_highlight_enabled() {
            return;
        }
        let target = match self.0.variant {
            Variant::Css => self.css_highlight_target(),
            Variant::Html => self.html_highlight_target(),
            Variant::None => None,
        };
        match target {
            Some((fn_name, selector)) => {
                self.0.state.lock().highlighting = true;
                self.0
                    .protocol
                    .trigger_remote(fn_name, vec![Value::String(selector)], None);
            }
            None => self.hide_highlight(),
        }
    }

    pub fn hide_highlight(&self) {
        let was = std::mem::replace(&mut self.0.state.lock().highlighting, false);
        self.0.editor.release_markers(self.0.id);
        if was {
            self.0.protocol.trigger_remote("hideHighlight", Vec::new(), None);
        }
    }

    pub fn redraw_highlights(&self) {
        if self.0.state.lock().highlighting {
            self.0
                .protocol
                .trigger_remote("redrawHighlights", Vec::new(), None);
        }
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Record the error state, emitting `ErrorStatusChanged` on change.
    pub fn set_errors(&self, has_errors: bool) {
        let changed = {
            let mut state = self.0.state.lock();
            std::mem::replace(&mut state.has_errors, has_errors) != has_errors
        };
        if changed {
            crate::debug!("session"; "{} errors: {}", self.url(), has_errors);
            self.0
                .events
                .emit(&LiveDocEvent::ErrorStatusChanged { has_errors });
        }
    }

    /// Map the outcome of a page request onto the error state, once it
    /// arrives. Without a runtime the outcome is ignored.
    fn track_outcome(&self, response: Response) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak = self.downgrade();
        handle.spawn(async move {
            let outcome = response.wait().await;
            let Some(doc) = Self::upgrade(&weak) else {
                return;
            };
            match outcome {
                Ok(_) => doc.set_errors(false),
                Err(ProtocolError::Remote(message)) => {
                    crate::debug!("session"; "{} rejected: {}", doc.url(), message);
                    doc.set_errors(true);
                }
                Err(_) => {}
            }
        });
    }

    // ========================================================================
    // Listeners and teardown
    // ========================================================================

    /// Keep an owner's subscription alive until `detach_listeners`.
    pub fn attach_listener(&self, sub: Subscription) {
        self.0.listeners.push(sub);
    }

    pub fn detach_listeners(&self) {
        self.0.listeners.unsubscribe_all();
    }

    pub fn detach_protocol_listeners(&self) {
        self.0.protocol_subs.unsubscribe_all();
    }

    /// Stop tracking the source document and release editor markers.
    /// Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.0.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.0.doc_subs.unsubscribe_all();
        self.0.protocol_subs.unsubscribe_all();
        self.hide_highlight();
        crate::debug!("session"; "closed live document {}", self.url());
    }

    /// Ask the page for the text it currently applies (CSS only).
    pub async fn source_from_browser(&self) -> Result<String, ProtocolError> {
        let value = self
            .0
            .protocol
            .get_stylesheet_text(self.url(), None)
            .wait()
            .await?;
        Ok(value
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

impl PartialEq for LiveDocument {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for LiveDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveDocument")
            .field("id", &self.0.id)
            .field("variant", &self.0.variant)
            .field("url", &self.0.url)
            .finish()
    }
}

fn file_url(path: &Path) -> String {
    url::Url::from_file_path(path)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| path.display().to_string())
}
