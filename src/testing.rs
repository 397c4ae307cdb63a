//! Test doubles shared by unit tests across modules.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::event::EventHub;
use crate::protocol::{ClientId, Transport, TransportError, TransportEvent};

/// In-process transport recording everything the protocol sends.
pub struct FakeTransport {
    sent: Mutex<Vec<(Vec<ClientId>, Value)>>,
    closed: Mutex<Vec<ClientId>>,
    starts: AtomicUsize,
    script: Option<String>,
    events: EventHub<TransportEvent>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            script: Some("/* fake transport */".into()),
            events: EventHub::new(),
        })
    }

    pub fn connect(&self, client_id: ClientId, url: &str) {
        self.events.emit(&TransportEvent::Connect {
            client_id,
            url: url.to_string(),
        });
    }

    pub fn message(&self, client_id: ClientId, message: Value) {
        self.events.emit(&TransportEvent::Message {
            client_id,
            message: message.to_string(),
            message_id: None,
        });
    }

    pub fn message_with_id(&self, client_id: ClientId, message: Value, id: &str) {
        self.events.emit(&TransportEvent::Message {
            client_id,
            message: message.to_string(),
            message_id: Some(id.to_string()),
        });
    }

    pub fn disconnect(&self, client_id: ClientId) {
        self.events.emit(&TransportEvent::Close { client_id });
    }

    pub fn sent(&self) -> Vec<(Vec<ClientId>, Value)> {
        self.sent.lock().clone()
    }

    /// Methods of every sent message, in order.
    pub fn methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(_, v)| v.get("method").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.methods().iter().filter(|m| *m == method).count()
    }

    /// Most recent message with `method`.
    pub fn last(&self, method: &str) -> Option<Value> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|(_, v)| v.get("method").and_then(Value::as_str) == Some(method))
            .map(|(_, v)| v.clone())
    }

    /// Answer a request the way a page would.
    pub fn respond(&self, client_id: ClientId, request: &Value, result: Value) {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        self.message(client_id, serde_json::json!({ "id": id, "result": result }));
    }

    pub fn closed(&self) -> Vec<ClientId> {
        self.closed.lock().clone()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl Transport for FakeTransport {
    fn start(&self) -> Result<(), TransportError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn send(&self, clients: &[ClientId], message: &str) {
        let value = serde_json::from_str(message).unwrap_or(Value::String(message.to_string()));
        self.sent.lock().push((clients.to_vec(), value));
    }

    fn close(&self, client: ClientId) {
        self.closed.lock().push(client);
        self.disconnect(client);
    }

    fn remote_script(&self) -> Option<String> {
        self.script.clone()
    }

    fn events(&self) -> &EventHub<TransportEvent> {
        &self.events
    }
}

/// Quiet the terminal logger for the duration of the test binary.
pub fn quiet() {
    crate::logger::set_quiet(true);
}
