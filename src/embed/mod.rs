//! Browser-side runtime shipped to the preview page.
//!
//! - `REMOTE_JS`: protocol broker, document observer and highlighter
//! - `WORKER_JS`: background worker keeping the connection warm
//! - `WS_TRANSPORT_JS`: WebSocket glue prepended by the WS transport
//!
//! ```ignore
//! let js = REMOTE_JS.render(&RemoteVars { worker_name: "worker_ab12cd34.js".into() });
//! ```

mod template;

pub use template::{Template, TemplateVars};

/// Variables for remote.js.
pub struct RemoteVars {
    pub worker_name: String,
}

impl TemplateVars for RemoteVars {
    fn apply(&self, content: &str) -> String {
        content.replace("__LIVEDEV_WORKER__", &self.worker_name)
    }
}

/// Variables for ws-transport.js.
pub struct WsTransportVars {
    pub ws_port: u16,
}

impl TemplateVars for WsTransportVars {
    fn apply(&self, content: &str) -> String {
        content.replace("__LIVEDEV_WS_PORT__", &self.ws_port.to_string())
    }
}

/// Protocol broker injected into every previewed page.
pub const REMOTE_JS: Template<RemoteVars> = Template::new(include_str!("remote.js"));

/// Worker script served next to the page.
pub const WORKER_JS: &str = include_str!("worker.js");

/// WebSocket transport glue.
pub const WS_TRANSPORT_JS: Template<WsTransportVars> =
    Template::new(include_str!("ws-transport.js"));
