//! WebSocket transport.
//!
//! ```text
//! acceptor thread --[handshake]--> clients <--[poll]-- reader thread
//!                                     |                    |
//!                          Transport::send        TransportEvent (hub)
//! ```
//!
//! Pages speak JSON envelopes: `{"type":"connect","url":...}` once after
//! opening, then `{"type":"message","message":...,"messageId":...}`.
//! Events are emitted after the client lock is released.

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tungstenite::protocol::Message;
use tungstenite::{Error as WsError, WebSocket};

use crate::embed::{WS_TRANSPORT_JS, WsTransportVars};
use crate::event::EventHub;
use crate::protocol::{ClientId, Transport, TransportError, TransportEvent};
use crate::{debug, log};

/// Maximum port retry attempts
const MAX_PORT_RETRIES: u16 = 10;

/// Reader poll interval
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Acceptor back-off when no connection is pending
const ACCEPT_INTERVAL: Duration = Duration::from_millis(50);

struct Client {
    id: ClientId,
    ws: WebSocket<TcpStream>,
}

struct Shared {
    clients: Mutex<Vec<Client>>,
    events: EventHub<TransportEvent>,
    next_id: AtomicU64,
    stopped: AtomicBool,
}

impl Shared {
    fn running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && !crate::core::is_shutdown()
    }
}

pub struct WsTransport {
    shared: Arc<Shared>,
    base_port: u16,
    /// Bound port, 0 until started
    port: AtomicU16,
    started: Mutex<bool>,
}

impl WsTransport {
    pub fn new(base_port: u16) -> Self {
        Self {
            shared: Arc::new(Shared {
                clients: Mutex::new(Vec::new()),
                events: EventHub::new(),
                next_id: AtomicU64::new(1),
                stopped: AtomicBool::new(false),
            }),
            base_port,
            port: AtomicU16::new(0),
            started: Mutex::new(false),
        }
    }

    /// Port pages dial: the bound one once started.
    pub fn port(&self) -> u16 {
        match self.port.load(Ordering::SeqCst) {
            0 => self.base_port,
            port => port,
        }
    }

    pub fn client_count(&self) -> usize {
        self.shared.clients.lock().len()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
    }
}

impl Transport for WsTransport {
    fn start(&self) -> Result<(), TransportError> {
        let mut started = self.started.lock();
        if *started {
            return Ok(());
        }

        let (listener, port) = try_bind_port(self.base_port, MAX_PORT_RETRIES)?;
        listener.set_nonblocking(true)?;
        self.port.store(port, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("livedev-ws-accept".into())
            .spawn(move || accept_loop(listener, shared))?;

        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("livedev-ws-read".into())
            .spawn(move || reader_loop(shared))?;

        *started = true;
        debug!("ws"; "ws://127.0.0.1:{}", port);
        Ok(())
    }

    fn send(&self, clients: &[ClientId], message: &str) {
        let mut closed = Vec::new();
        {
            let mut guard = self.shared.clients.lock();
            guard.retain_mut(|client| {
                if !clients.contains(&client.id) {
                    return true;
                }
                match client.ws.send(Message::Text(message.into())) {
                    Ok(()) => true,
                    // Queued in the write buffer; the reader loop flushes it
                    Err(WsError::Io(ref e)) if e.kind() == ErrorKind::WouldBlock => true,
                    Err(e) => {
                        debug!("ws"; "client {} send failed: {}", client.id, e);
                        closed.push(client.id);
                        false
                    }
                }
            });
        }
        emit_closes(&self.shared, closed);
    }

    fn close(&self, client: ClientId) {
        let removed = {
            let mut guard = self.shared.clients.lock();
            guard
                .iter()
                .position(|c| c.id == client)
                .map(|i| guard.remove(i))
        };
        if let Some(mut removed) = removed {
            let _ = removed.ws.close(None);
            let _ = removed.ws.flush();
            emit_closes(&self.shared, vec![client]);
        }
    }

    fn remote_script(&self) -> Option<String> {
        Some(WS_TRANSPORT_JS.render(&WsTransportVars {
            ws_port: self.port(),
        }))
    }

    fn events(&self) -> &EventHub<TransportEvent> {
        &self.shared.events
    }
}

fn emit_closes(shared: &Shared, ids: Vec<ClientId>) {
    for client_id in ids {
        debug!("ws"; "client {} closed", client_id);
        shared.events.emit(&TransportEvent::Close { client_id });
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    while shared.running() {
        match listener.accept() {
            Ok((stream, addr)) => {
                debug!("ws"; "connection from {}", addr);
                // Blocking for the handshake, polled afterwards
                let _ = stream.set_nonblocking(false);
                match tungstenite::accept(stream) {
                    Ok(ws) => {
                        let _ = ws.get_ref().set_nonblocking(true);
                        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
                        shared.clients.lock().push(Client { id, ws });
                    }
                    Err(e) => log!("ws"; "handshake failed: {}", e),
                }
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_INTERVAL),
            Err(e) => {
                log!("ws"; "accept error: {}", e);
                thread::sleep(ACCEPT_INTERVAL);
            }
        }
    }
}

fn reader_loop(shared: Arc<Shared>) {
    while shared.running() {
        thread::sleep(POLL_INTERVAL);

        let mut events = Vec::new();
        {
            let mut guard = shared.clients.lock();
            guard.retain_mut(|client| {
                let open = drain_client(client, &mut events);
                if !open {
                    events.push(TransportEvent::Close {
                        client_id: client.id,
                    });
                }
                open
            });
        }

        for event in &events {
            shared.events.emit(event);
        }
    }

    for mut client in shared.clients.lock().drain(..) {
        let _ = client.ws.close(None);
    }
}

/// Read everything pending on one client. Returns whether it is still open.
fn drain_client(client: &mut Client, events: &mut Vec<TransportEvent>) -> bool {
    match client.ws.flush() {
        Ok(()) => {}
        Err(WsError::Io(ref e)) if e.kind() == ErrorKind::WouldBlock => {}
        Err(_) => return false,
    }

    loop {
        match client.ws.read() {
            Ok(Message::Text(text)) => {
                if let Some(event) = parse_envelope(client.id, &text) {
                    events.push(event);
                }
            }
            Ok(Message::Close(_)) => return false,
            Ok(_) => {}
            Err(WsError::Io(ref e)) if e.kind() == ErrorKind::WouldBlock => return true,
            Err(_) => return false,
        }
    }
}

/// Decode one client frame.
fn parse_envelope(client_id: ClientId, text: &str) -> Option<TransportEvent> {
    let frame: Value = serde_json::from_str(text).ok()?;
    match frame.get("type").and_then(Value::as_str)? {
        "connect" => Some(TransportEvent::Connect {
            client_id,
            url: frame.get("url").and_then(Value::as_str)?.to_string(),
        }),
        "message" => {
            let message = match frame.get("message")? {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let message_id = frame.get("messageId").and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
            Some(TransportEvent::Message {
                client_id,
                message,
                message_id,
            })
        }
        other => {
            debug!("ws"; "unknown frame type {}", other);
            None
        }
    }
}

/// Try binding to port, retry with incremented port if in use
fn try_bind_port(base_port: u16, max_retries: u16) -> Result<(TcpListener, u16), TransportError> {
    let mut last_error = None;

    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        match TcpListener::bind(("127.0.0.1", port)) {
            Ok(listener) => {
                let actual_port = listener.local_addr()?.port();
                if offset > 0 {
                    log!("ws"; "port {} in use, using {} instead", base_port, actual_port);
                }
                return Ok((listener, actual_port));
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(TransportError::Bind {
        port: base_port,
        attempts: max_retries,
        source: last_error.unwrap_or_else(|| ErrorKind::AddrInUse.into()),
    })
}
