//! Core types - pure abstractions shared across the codebase.

mod state;
mod status;
mod url;

pub use state::{is_shutdown, register_shutdown, request_shutdown, setup_shutdown_handler};
pub use status::{CloseReason, Status, StatusChange, StatusController};
pub use url::{join_url, make_absolute, origin_and_path, strip_query};
