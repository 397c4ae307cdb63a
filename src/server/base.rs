//! Bookkeeping shared by every server adapter.
//!
//! Resources are keyed by `/` + the percent-encoded project-relative path,
//! which is also the URL path under the server's base URL.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use parking_lot::RwLock;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use url::Url;

use crate::core::join_url;
use crate::document::LiveDocument;
use crate::utils::path::{clean, relative_segments};

/// Characters escaped inside one URL path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

pub struct BaseServer {
    root: PathBuf,
    base_url: RwLock<Url>,
    live_docs: DashMap<String, LiveDocument>,
    virtual_content: DashMap<String, String>,
}

impl BaseServer {
    pub fn new(root: impl Into<PathBuf>, base_url: Url) -> Self {
        Self {
            root: root.into(),
            base_url: RwLock::new(base_url),
            live_docs: DashMap::new(),
            virtual_content: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_url(&self) -> Url {
        self.base_url.read().clone()
    }

    /// Servers that bind late (port retry) update their URL once bound.
    pub fn set_base_url(&self, url: Url) {
        *self.base_url.write() = url;
    }

    /// Resource key for a project path, `None` outside the root.
    pub fn key_for(&self, path: &Path) -> Option<String> {
        let path = if path.is_absolute() {
            clean(path)
        } else {
            clean(&self.root.join(path))
        };
        let segments = relative_segments(&self.root, &path)?;
        let encoded: Vec<String> = segments
            .iter()
            .map(|s| utf8_percent_encode(s, SEGMENT).to_string())
            .collect();
        Some(format!("/{}", encoded.join("/")))
    }

    /// Key for the path part of a request URL, query and fragment dropped.
    pub fn key_for_request(&self, request_path: &str) -> String {
        let path = request_path.split(['?', '#']).next().unwrap_or_default();
        let base = self.base_url.read().path().trim_end_matches('/').to_string();
        let rel = path.strip_prefix(&base).unwrap_or(path);
        // Browsers escape a different character set than we do
        let segments: Vec<String> = rel
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                let decoded = percent_decode_str(s).decode_utf8_lossy();
                utf8_percent_encode(&decoded, SEGMENT).to_string()
            })
            .collect();
        format!("/{}", segments.join("/"))
    }

    pub fn can_serve(&self, path: &Path) -> bool {
        self.key_for(path).is_some()
    }

    pub fn path_to_url(&self, path: &Path) -> Option<String> {
        let key = self.key_for(path)?;
        join_url(&self.base_url.read(), &key)
    }

    /// Project path a URL refers to. Query and fragment are ignored;
    /// foreign origins and paths escaping the root resolve to `None`.
    pub fn url_to_path(&self, raw: &str) -> Option<PathBuf> {
        let url = Url::parse(raw).ok()?;
        let base = self.base_url.read();
        if url.origin() != base.origin() {
            return None;
        }
        let base_path = base.path().trim_end_matches('/');
        let rel = url.path().strip_prefix(base_path)?;
        if !rel.is_empty() && !rel.starts_with('/') {
            return None;
        }
        self.path_for_key(rel)
    }

    /// Project path for a resource key (or any `/`-separated encoded path).
    pub fn path_for_key(&self, key: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            let decoded = percent_decode_str(segment).decode_utf8().ok()?;
            if decoded == ".." || decoded.contains('/') {
                return None;
            }
            if decoded != "." {
                path.push(decoded.as_ref());
            }
        }
        Some(path)
    }

    // ========================================================================
    // Live documents
    // ========================================================================

    pub fn add(&self, live: LiveDocument) {
        if let Some(key) = self.key_for(live.path()) {
            crate::debug!("server"; "serving live {}", key);
            self.live_docs.insert(key, live);
        }
    }

    pub fn remove(&self, live: &LiveDocument) {
        if let Some(key) = self.key_for(live.path()) {
            self.live_docs.remove_if(&key, |_, held| held == live);
        }
    }

    pub fn get(&self, path: &Path) -> Option<LiveDocument> {
        let key = self.key_for(path)?;
        self.live_docs.get(&key).map(|doc| doc.clone())
    }

    pub fn live_doc_for_key(&self, key: &str) -> Option<LiveDocument> {
        self.live_docs.get(key).map(|doc| doc.clone())
    }

    pub fn live_doc_count(&self) -> usize {
        self.live_docs.len()
    }

    /// Forget every live document and virtual resource.
    pub fn clear(&self) {
        self.live_docs.clear();
        self.virtual_content.clear();
    }

    // ========================================================================
    // Virtual content
    // ========================================================================

    pub fn add_virtual_content(&self, path: &Path, content: String) {
        if let Some(key) = self.key_for(path) {
            crate::debug!("server"; "virtual {}", key);
            self.virtual_content.insert(key, content);
        }
    }

    pub fn remove_virtual_content(&self, path: &Path) {
        if let Some(key) = self.key_for(path) {
            self.virtual_content.remove(&key);
        }
    }

    pub fn virtual_content_for_key(&self, key: &str) -> Option<String> {
        self.virtual_content.get(key).map(|c| c.clone())
    }
}
