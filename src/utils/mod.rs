//! Small helpers shared by the server and the workspace.

pub mod mime;
pub mod path;
