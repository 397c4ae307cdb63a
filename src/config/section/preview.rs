//! `[preview]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [preview]
//! html_extensions = ["html", "htm", "xhtml"]   # Files previewed as pages
//! index_file = "index.html"                   # Fallback when nothing is open
//! reload_languages = ["javascript"]           # Saving these reloads the page
//! highlight = true                            # Mirror the cursor in the browser
//! follow_changes = true                       # Preview the HTML file that last changed
//! ```

use serde::{Deserialize, Serialize};

/// Live preview behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Extensions (without dot, lowercase) treated as HTML pages.
    pub html_extensions: Vec<String>,

    /// Project-relative file previewed when no document is open.
    pub index_file: String,

    /// Language ids whose save triggers a full page reload when the page
    /// loads them.
    pub reload_languages: Vec<String>,

    /// Highlight the element or rule under the cursor.
    pub highlight: bool,

    /// Make an HTML file changed on disk the current document.
    pub follow_changes: bool,
}

impl PreviewConfig {
    pub fn is_html_extension(&self, ext: &str) -> bool {
        self.html_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext))
    }

    pub fn reloads_on_save(&self, language_id: &str) -> bool {
        self.reload_languages.iter().any(|l| l == language_id)
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            html_extensions: vec!["html".into(), "htm".into(), "xhtml".into()],
            index_file: "index.html".into(),
            reload_languages: vec!["javascript".into()],
            highlight: true,
            follow_changes: true,
        }
    }
}
