//! Configuration section definitions.
//!
//! Each module corresponds to a section in `livedev.toml`:
//!
//! | Module    | TOML Section  | Purpose                                |
//! |-----------|---------------|----------------------------------------|
//! | `serve`   | `[serve]`     | HTTP server, WebSocket port, watcher   |
//! | `preview` | `[preview]`   | Live document classification, reloads  |

mod preview;
mod serve;

pub use preview::PreviewConfig;
pub use serve::ServeConfig;
