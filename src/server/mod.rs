//! Server adapters: project paths ↔ preview URLs, and the content behind
//! them.
//!
//! A server serves, in order of precedence:
//! 1. virtual content registered at a path (the injected runtime scripts)
//! 2. the in-memory text of a registered live document
//! 3. the file on disk
//!
//! [`ServerManager`] picks the server for a path from registered
//! providers; [`HttpServer`] is the one the CLI registers.

mod base;
mod http;
mod manager;


use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::document::LiveDocument;

pub use base::BaseServer;
pub use http::HttpServer;
pub use manager::{ProviderId, ServerFactory, ServerManager};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("project root {} is not a directory", .0.display())]
    RootMissing(PathBuf),

    #[error("failed to bind after {attempts} attempts (ports {first}-{last}): {message}")]
    Bind {
        first: u16,
        last: u16,
        attempts: u16,
        message: String,
    },

    #[error("failed to start request loop")]
    Spawn(#[source] std::io::Error),
}

/// Contract between the session and whatever serves the preview.
///
/// Implementors provide the lifecycle; the bookkeeping methods delegate to
/// their [`BaseServer`] unless overridden.
#[async_trait]
pub trait ServerAdapter: Send + Sync {
    fn base(&self) -> &BaseServer;

    /// Prepare to serve. A rejection aborts the session open.
    async fn ready_to_serve(&self) -> Result<(), ServerError>;

    async fn start(&self) -> Result<(), ServerError>;

    fn stop(&self);

    fn is_active(&self) -> bool;

    fn project_root(&self) -> &Path {
        self.base().root()
    }

    fn can_serve(&self, path: &Path) -> bool {
        self.base().can_serve(path)
    }

    fn path_to_url(&self, path: &Path) -> Option<String> {
        self.base().path_to_url(path)
    }

    fn url_to_path(&self, url: &str) -> Option<PathBuf> {
        self.base().url_to_path(url)
    }

    fn add(&self, live: LiveDocument) {
        self.base().add(live);
    }

    fn remove(&self, live: &LiveDocument) {
        self.base().remove(live);
    }

    fn get(&self, path: &Path) -> Option<LiveDocument> {
        self.base().get(path)
    }

    fn clear(&self) {
        self.base().clear();
    }

    fn add_virtual_content(&self, path: &Path, content: String) {
        self.base().add_virtual_content(path, content);
    }

    fn remove_virtual_content(&self, path: &Path) {
        self.base().remove_virtual_content(path);
    }
}
