//! Contract between the protocol adapter and a concrete wire transport.

use thiserror::Error;

use super::ClientId;
use crate::event::EventHub;

/// Raw events a transport reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A page connected; `url` is its reported location
    Connect { client_id: ClientId, url: String },
    /// A protocol message arrived. `message_id` lets the adapter drop
    /// duplicates delivered twice.
    Message {
        client_id: ClientId,
        message: String,
        message_id: Option<String>,
    },
    Close { client_id: ClientId },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind transport after {attempts} attempts from port {port}")]
    Bind {
        port: u16,
        attempts: u16,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Bidirectional channel to browser clients.
pub trait Transport: Send + Sync {
    /// Begin accepting connections. Calling it twice is harmless.
    fn start(&self) -> Result<(), TransportError>;

    /// Deliver `message` to every listed client. Unknown ids are skipped.
    fn send(&self, clients: &[ClientId], message: &str);

    /// Terminate one connection.
    fn close(&self, client: ClientId);

    /// Script the page must run to reach this transport, if any.
    fn remote_script(&self) -> Option<String>;

    fn events(&self) -> &EventHub<TransportEvent>;
}
