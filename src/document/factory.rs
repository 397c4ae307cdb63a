//! Choosing and building the live document for a source document.

use std::sync::Arc;

use super::{LiveDocEvent, LiveDocument, UrlResolver, Variant};
use crate::config::PreviewConfig;
use crate::editor::{Document, Editor};
use crate::protocol::Protocol;

/// Called with the live document's id and its new error state whenever
/// that state changes.
pub type ErrorObserver = Arc<dyn Fn(u64, bool) + Send + Sync>;

/// Everything a live document is built from.
pub struct LiveDocParams {
    pub protocol: Arc<Protocol>,
    pub resolver: UrlResolver,
    pub doc: Arc<Document>,
    pub editor: Arc<Editor>,
    /// Stylesheets whose refresh shows this one's changes; empty means
    /// the document itself
    pub roots: Vec<String>,
    /// Initial highlight setting
    pub highlight: bool,
}

/// Live document kind for `doc`.
pub fn classify(doc: &Document, preview: &PreviewConfig) -> Variant {
    if doc.language_id() == "css" {
        Variant::Css
    } else if preview.is_html_extension(&doc.extension()) {
        Variant::Html
    } else {
        Variant::None
    }
}

/// Build a live document of `variant`, or `None` for non-previewable
/// documents. `on_error` follows the document's error state until its
/// listeners are detached.
pub fn create(
    variant: Variant,
    params: LiveDocParams,
    on_error: Option<ErrorObserver>,
) -> Option<LiveDocument> {
    let live = match variant {
        Variant::None => return None,
        Variant::Css => {
            let live = LiveDocument::build(variant, params);
            live.attach_css();
            live
        }
        Variant::Html => {
            let live = LiveDocument::build(variant, params);
            live.attach_html();
            live
        }
    };

    if let Some(on_error) = on_error {
        let id = live.id();
        let sub = live.events().subscribe(move |event| {
            if let LiveDocEvent::ErrorStatusChanged { has_errors } = event {
                on_error(id, *has_errors);
            }
        });
        live.attach_listener(sub);
    }

    crate::debug!("session"; "live {:?} document for {}", variant, live.url());
    Some(live)
}
