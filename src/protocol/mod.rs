//! Protocol adapter between the session and browser clients.
//!
//! Turns raw [`Transport`] traffic into typed [`ProtocolEvent`]s and offers
//! the commands the host sends to pages (evaluate, stylesheet patching,
//! reload, navigate).
//!
//! ```text
//! Transport --connect/message/close--> Protocol --ProtocolEvent--> listeners
//! session/live docs --commands--> Protocol --json--> Transport --> pages
//! ```
//!
//! Requests return a [`Response`] that resolves with the page's answer.
//! They reject immediately without a transport or without clients, and
//! later if the client disconnects or the request is evicted from the
//! bounded pending table.

mod message;
mod pending;
mod transport;


use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::embed::{REMOTE_JS, RemoteVars, WORKER_JS};
use crate::event::{EventHub, Subscription};
use message::{Inbound, Outbound};
use pending::{MAX_TRACKED, PendingCalls, RecentIds, Reply};

pub use message::RelatedResources;
pub use transport::{Transport, TransportError, TransportEvent};

/// Transport-assigned client identifier.
pub type ClientId = u64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("no transport installed")]
    NoTransport,

    #[error("no connected clients")]
    NoClients,

    #[error("client {0} disconnected before answering")]
    ClientClosed(ClientId),

    #[error("request evicted from the pending table")]
    Evicted,

    #[error("page reported an error: {0}")]
    Remote(String),

    #[error("request dropped without an answer")]
    Dropped,

    #[error("host function `{0}` is already registered")]
    AlreadyRegistered(String),
}

/// Typed events relayed to the session and live documents.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    ConnectionConnect {
        client_id: ClientId,
        url: String,
    },
    ConnectionClose {
        client_id: ClientId,
    },
    DocumentRelated {
        client_id: ClientId,
        related: RelatedResources,
    },
    StylesheetAdded {
        client_id: ClientId,
        href: String,
        roots: Vec<String>,
    },
    StylesheetRemoved {
        client_id: ClientId,
        href: String,
    },
    ScriptAdded {
        client_id: ClientId,
        src: String,
    },
    ScriptRemoved {
        client_id: ClientId,
        src: String,
    },
    PreviewClicked {
        client_id: ClientId,
        details: Value,
    },
    PreviewReload {
        clients: Vec<ClientId>,
    },
    Custom {
        client_id: ClientId,
        method: String,
        message: Value,
    },
}

/// Pending answer to a request.
#[must_use = "a Response does nothing unless awaited; drop it for fire-and-forget"]
pub struct Response {
    rx: oneshot::Receiver<Result<Value, ProtocolError>>,
}

impl Response {
    fn channel() -> (Reply, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    fn rejected(err: ProtocolError) -> Self {
        let (tx, response) = Self::channel();
        let _ = tx.send(Err(err));
        response
    }

    pub async fn wait(self) -> Result<Value, ProtocolError> {
        self.rx.await.unwrap_or(Err(ProtocolError::Dropped))
    }

    /// Non-blocking check; `None` while still pending.
    pub fn try_result(&mut self) -> Option<Result<Value, ProtocolError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(ProtocolError::Dropped)),
        }
    }
}

type HostFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Names of the resources served next to the previewed page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptNames {
    pub remote: String,
    pub worker: String,
}

impl ScriptNames {
    /// Names with a per-process random suffix.
    pub fn generate() -> Self {
        let seed = format!(
            "{}:{:?}",
            std::process::id(),
            std::time::SystemTime::now()
        );
        let hash = blake3::hash(seed.as_bytes());
        let suffix = hex::encode(&hash.as_bytes()[..4]);
        Self {
            remote: format!("livedev_remote_{suffix}.js"),
            worker: format!("pageLoaderWorker_{suffix}.js"),
        }
    }
}

struct State {
    transport: Option<Arc<dyn Transport>>,
    transport_sub: Option<Subscription>,
    /// client id -> reported url
    connections: FxHashMap<ClientId, String>,
    next_id: u64,
    pending: PendingCalls,
    recent: RecentIds,
    host_fns: FxHashMap<String, HostFn>,
}

/// The protocol adapter. Process-wide; transports are swapped, not the
/// adapter.
pub struct Protocol {
    state: Mutex<State>,
    events: EventHub<ProtocolEvent>,
    names: ScriptNames,
    weak: Weak<Protocol>,
}

impl Protocol {
    pub fn new() -> Arc<Self> {
        Self::with_names(ScriptNames::generate())
    }

    pub fn with_names(names: ScriptNames) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            state: Mutex::new(State {
                transport: None,
                transport_sub: None,
                connections: FxHashMap::default(),
                next_id: 1,
                pending: PendingCalls::new(MAX_TRACKED),
                recent: RecentIds::new(MAX_TRACKED),
                host_fns: FxHashMap::default(),
            }),
            events: EventHub::new(),
            names,
            weak: weak.clone(),
        })
    }

    pub fn events(&self) -> &EventHub<ProtocolEvent> {
        &self.events
    }

    pub fn script_names(&self) -> &ScriptNames {
        &self.names
    }

    /// Install `transport`, detaching the previous one, and start it.
    pub fn set_transport(&self, transport: Arc<dyn Transport>) -> Result<(), TransportError> {
        let weak = self.weak.clone();
        let sub = transport.events().subscribe(move |event| {
            if let Some(protocol) = weak.upgrade() {
                protocol.on_transport_event(event);
            }
        });

        let old_sub = {
            let mut state = self.state.lock();
            state.transport = Some(Arc::clone(&transport));
            state.transport_sub.replace(sub)
        };
        if let Some(old) = old_sub {
            old.unsubscribe();
        }
        transport.start()
    }

    pub fn has_transport(&self) -> bool {
        self.state.lock().transport.is_some()
    }

    /// Ids of every open connection, ascending.
    pub fn connection_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.state.lock().connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn connection_url(&self, client: ClientId) -> Option<String> {
        self.state.lock().connections.get(&client).cloned()
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    fn on_transport_event(&self, event: &TransportEvent) {
        match event {
            TransportEvent::Connect { client_id, url } => self.on_connect(*client_id, url),
            TransportEvent::Message {
                client_id,
                message,
                message_id,
            } => self.on_message(*client_id, message, message_id.as_deref()),
            TransportEvent::Close { client_id } => self.on_close(*client_id),
        }
    }

    fn on_connect(&self, client_id: ClientId, url: &str) {
        self.state
            .lock()
            .connections
            .insert(client_id, url.to_string());
        crate::debug!("protocol"; "client {} connected from {}", client_id, url);
        self.events.emit(&ProtocolEvent::ConnectionConnect {
            client_id,
            url: url.to_string(),
        });
        self.trigger_remote("ready", Vec::new(), Some(&[client_id]));
    }

    fn on_close(&self, client_id: ClientId) {
        let rejected = {
            let mut state = self.state.lock();
            if state.connections.remove(&client_id).is_none() {
                return;
            }
            state.pending.take_client(client_id)
        };
        for reply in rejected {
            let _ = reply.send(Err(ProtocolError::ClientClosed(client_id)));
        }
        crate::debug!("protocol"; "client {} closed", client_id);
        self.events
            .emit(&ProtocolEvent::ConnectionClose { client_id });
    }

    fn on_message(&self, client_id: ClientId, text: &str, message_id: Option<&str>) {
        if let Some(id) = message_id
            && !self.state.lock().recent.insert(id)
        {
            crate::debug!("protocol"; "dropping duplicate message {}", id);
            return;
        }

        let Some(inbound) = Inbound::parse(text) else {
            crate::debug!("protocol"; "unrecognised message from {}: {}", client_id, text);
            return;
        };

        let event = match inbound {
            Inbound::HostCall {
                name,
                params,
                call_id,
            } => {
                self.answer_host_call(client_id, &name, params, &call_id);
                return;
            }
            Inbound::Response { id, result } => {
                let reply = self.state.lock().pending.take(id);
                if let Some(reply) = reply {
                    let _ = reply.send(result.map_err(ProtocolError::Remote));
                }
                return;
            }
            Inbound::Clicked(details) => ProtocolEvent::PreviewClicked { client_id, details },
            Inbound::DocumentRelated(related) => {
                ProtocolEvent::DocumentRelated { client_id, related }
            }
            Inbound::StylesheetAdded { href, roots } => ProtocolEvent::StylesheetAdded {
                client_id,
                href,
                roots,
            },
            Inbound::StylesheetRemoved { href } => {
                ProtocolEvent::StylesheetRemoved { client_id, href }
            }
            Inbound::ScriptAdded { src } => ProtocolEvent::ScriptAdded { client_id, src },
            Inbound::ScriptRemoved { src } => ProtocolEvent::ScriptRemoved { client_id, src },
            Inbound::Other { method, body } => ProtocolEvent::Custom {
                client_id,
                method,
                message: body,
            },
        };
        self.events.emit(&event);
    }

    fn answer_host_call(&self, client_id: ClientId, name: &str, params: Value, call_id: &Value) {
        let host_fn = self.state.lock().host_fns.get(name).cloned();
        let outcome = match host_fn {
            Some(f) => f(params),
            None => Err(format!("no such host function: {name}")),
        };
        let reply = message::host_call_response(call_id, outcome);
        self.send_raw(&[client_id], &reply.to_json());
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Send a request and track its answer. `None` targets every client;
    /// the answer is tracked against the first target.
    pub fn request(&self, method: &str, params: Value, clients: Option<&[ClientId]>) -> Response {
        let (transport, targets, payload, evicted, response) = {
            let mut state = self.state.lock();
            let Some(transport) = state.transport.clone() else {
                return Response::rejected(ProtocolError::NoTransport);
            };
            let targets: Vec<ClientId> = match clients {
                Some(ids) => ids.to_vec(),
                None => {
                    let mut ids: Vec<_> = state.connections.keys().copied().collect();
                    ids.sort_unstable();
                    ids
                }
            };
            let Some(&first) = targets.first() else {
                return Response::rejected(ProtocolError::NoClients);
            };

            let id = state.next_id;
            state.next_id += 1;
            let payload = Outbound {
                id: Some(id),
                method,
                params,
            }
            .to_json();

            let (reply, response) = Response::channel();
            let evicted = state.pending.insert(id, first, reply);
            (transport, targets, payload, evicted, response)
        };

        if let Some(evicted) = evicted {
            let _ = evicted.send(Err(ProtocolError::Evicted));
        }
        transport.send(&targets, &payload);
        response
    }

    fn send_raw(&self, clients: &[ClientId], payload: &str) {
        let transport = self.state.lock().transport.clone();
        if let Some(transport) = transport {
            transport.send(clients, payload);
        }
    }

    fn all_or(&self, clients: Option<&[ClientId]>) -> Vec<ClientId> {
        match clients {
            Some(ids) => ids.to_vec(),
            None => self.connection_ids(),
        }
    }

    /// Evaluate a JavaScript expression in the page.
    pub fn evaluate(&self, expression: &str, clients: Option<&[ClientId]>) -> Response {
        self.request("Runtime.evaluate", json!({ "expression": expression }), clients)
    }

    /// Replace the text of the stylesheet loaded from `url`.
    pub fn set_stylesheet_text(&self, url: &str, text: &str, clients: Option<&[ClientId]>) -> Response {
        self.request("CSS.setStylesheetText", json!({ "url": url, "text": text }), clients)
    }

    pub fn get_stylesheet_text(&self, url: &str, clients: Option<&[ClientId]>) -> Response {
        self.request("CSS.getStylesheetText", json!({ "url": url }), clients)
    }

    /// Full page reload, bypassing the cache.
    pub fn reload(&self, clients: Option<&[ClientId]>) -> Response {
        let targets = self.all_or(clients);
        self.events.emit(&ProtocolEvent::PreviewReload {
            clients: targets.clone(),
        });
        self.request("Page.reload", json!({ "ignoreCache": true }), Some(&targets))
    }

    pub fn navigate(&self, url: &str, clients: Option<&[ClientId]>) -> Response {
        self.request("Page.navigate", json!({ "url": url }), clients)
    }

    /// Fire-and-forget call of a page function.
    pub fn trigger_remote(&self, fn_name: &str, args: Vec<Value>, clients: Option<&[ClientId]>) {
        let targets = self.all_or(clients);
        if targets.is_empty() {
            return;
        }
        self.send_raw(&targets, &message::remote_call(fn_name, args).to_json());
    }

    /// Make `f` callable from the page as `_LD.callHost(name, params)`.
    pub fn register_host_fn<F>(&self, name: &str, f: F) -> Result<(), ProtocolError>
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        if state.host_fns.contains_key(name) {
            return Err(ProtocolError::AlreadyRegistered(name.to_string()));
        }
        state.host_fns.insert(name.to_string(), Arc::new(f));
        Ok(())
    }

    /// Ask the transport to drop one client.
    pub fn close(&self, client: ClientId) {
        let transport = self.state.lock().transport.clone();
        if let Some(transport) = transport {
            transport.close(client);
        }
        self.on_close(client);
    }

    pub fn close_all_connections(&self) {
        for id in self.connection_ids() {
            self.close(id);
        }
    }

    // ========================================================================
    // Injected resources
    // ========================================================================

    /// Tag injected into served pages.
    pub fn remote_script_tag(&self) -> String {
        format!("<script src=\"{}\"></script>", self.names.remote)
    }

    /// Body of the injected script: transport glue, then the runtime.
    pub fn remote_script_contents(&self) -> String {
        let transport_js = self
            .state
            .lock()
            .transport
            .as_ref()
            .and_then(|t| t.remote_script())
            .unwrap_or_default();
        let runtime = REMOTE_JS.render(&RemoteVars {
            worker_name: self.names.worker.clone(),
        });
        format!("{transport_js}\n{runtime}")
    }

    pub fn worker_script_contents(&self) -> &'static str {
        WORKER_JS
    }
}
