//! livedev - keeps a browser preview in step with the files you edit.
//!
//! # Module Structure
//!
//! ```text
//! core/       status machine, shutdown state, URL helpers
//! event       listener registry shared by every emitter
//! protocol/   typed messages to and from preview pages
//! transport/  WebSocket link to the pages
//! document/   live HTML and CSS documents
//! server/     serving the project with the runtime injected
//! session/    the state machine tying it all together
//! editor/     workspace, documents and the filesystem watcher
//! ```

pub mod logger;

pub mod cli;
pub mod config;
pub mod core;
pub mod document;
pub mod editor;
pub mod embed;
pub mod event;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod testing;
