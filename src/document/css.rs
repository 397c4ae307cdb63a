//! Stylesheet live documents.
//!
//! Every text change is pushed to the page as the full stylesheet text,
//! with relative `url()` references made absolute against the sheet's own
//! URL (the page applies the text from a different base).

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{LiveDocEvent, LiveDocument};
use crate::core::make_absolute;
use crate::editor::DocumentEvent;

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\burl\(\s*(?:"([^"\n]*)"|'([^'\n]*)'|([^)\s'"][^)\n]*?))\s*\)"#).unwrap()
});

static HAS_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*:").unwrap());

/// Rewrite relative `url(...)` references in `text` against `base`,
/// keeping the original quoting.
pub fn rewrite_urls(text: &str, base: &str) -> String {
    CSS_URL
        .replace_all(text, |caps: &Captures| {
            let (reference, quote) = match (caps.get(1), caps.get(2), caps.get(3)) {
                (Some(m), _, _) => (m.as_str(), "\""),
                (_, Some(m), _) => (m.as_str(), "'"),
                (_, _, Some(m)) => (m.as_str(), ""),
                _ => return caps[0].to_string(),
            };
            if reference.is_empty() || HAS_SCHEME.is_match(reference) || reference.starts_with('#') {
                return caps[0].to_string();
            }
            format!("url({quote}{}{quote})", make_absolute(base, reference))
        })
        .into_owned()
}

impl LiveDocument {
    /// Follow the source document: push changes, close on deletion.
    pub(super) fn attach_css(&self) {
        let weak = self.downgrade();
        let sub = self.0.doc.events().subscribe(move |event| {
            let Some(live) = LiveDocument::upgrade(&weak) else {
                return;
            };
            match event {
                DocumentEvent::Changed => live.update_browser(),
                DocumentEvent::Deleted => live.on_deleted(),
            }
        });
        self.0.doc_subs.push(sub);
    }

    pub(super) fn css_update_browser(&self) {
        let url = self.url();
        for root in self.roots() {
            if root != url {
                // Imported sheet: the importing sheet has to be refreshed
                self.0
                    .events
                    .emit(&LiveDocEvent::UpdateDoc { url: root.clone() });
                continue;
            }
            let text = rewrite_urls(&self.0.doc.text(), url);
            let response = self.0.protocol.set_stylesheet_text(url, &text, None);
            self.track_outcome(response);
        }
        self.redraw_highlights();
    }

    pub(super) fn css_highlight_target(&self) -> Option<(&'static str, String)> {
        let text = self.0.doc.text();
        let mut selectors: Vec<String> = Vec::new();
        for selection in self.0.editor.selections() {
            if let Some(selector) = super::selector_at(&text, selection.start)
                && !selectors.contains(&selector)
            {
                selectors.push(selector);
            }
        }
        (!selectors.is_empty()).then(|| ("highlightRule", selectors.join(",")))
    }

    pub(super) fn on_deleted(&self) {
        self.close();
        self.0.events.emit(&LiveDocEvent::Deleted {
            url: self.url().to_string(),
        });
    }
}
