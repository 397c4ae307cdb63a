//! Concrete transports between the protocol adapter and browser pages.

mod ws;

pub use ws::WsTransport;
