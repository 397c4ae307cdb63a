//! Static HTTP server for the preview.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use url::Url;

use super::{BaseServer, ServerAdapter, ServerError, ServerFactory};
use crate::protocol::Protocol;
use crate::utils::mime::{self, types};
use crate::{debug, log};

/// Maximum number of port binding attempts.
const MAX_PORT_RETRIES: u16 = 10;

/// Request handler threads.
const POOL_THREADS: usize = 4;

/// State the request loop shares with the adapter.
struct Shared {
    base: BaseServer,
    protocol: Arc<Protocol>,
    active: AtomicBool,
}

pub struct HttpServer {
    shared: Arc<Shared>,
    interface: IpAddr,
    port: u16,
    bound: Mutex<Option<Arc<Server>>>,
}

impl HttpServer {
    pub fn new(root: impl Into<PathBuf>, interface: IpAddr, port: u16, protocol: Arc<Protocol>) -> Self {
        let base_url = base_url_for(SocketAddr::new(interface, port));
        Self {
            shared: Arc::new(Shared {
                base: BaseServer::new(root, base_url),
                protocol,
                active: AtomicBool::new(false),
            }),
            interface,
            port,
            bound: Mutex::new(None),
        }
    }

    /// Provider building one server per session.
    pub fn provider(root: PathBuf, interface: IpAddr, port: u16, protocol: Arc<Protocol>) -> ServerFactory {
        Arc::new(move || {
            Arc::new(HttpServer::new(root.clone(), interface, port, Arc::clone(&protocol)))
                as Arc<dyn ServerAdapter>
        })
    }

    /// Bind once; later calls reuse the listener.
    fn bind(&self) -> Result<Arc<Server>, ServerError> {
        let mut bound = self.bound.lock();
        if let Some(server) = bound.as_ref() {
            return Ok(Arc::clone(server));
        }
        let (server, addr) = bind_with_retry(self.interface, self.port)?;
        self.shared.base.set_base_url(base_url_for(addr));
        let server = Arc::new(server);
        *bound = Some(Arc::clone(&server));
        Ok(server)
    }
}

#[async_trait]
impl ServerAdapter for HttpServer {
    fn base(&self) -> &BaseServer {
        &self.shared.base
    }

    async fn ready_to_serve(&self) -> Result<(), ServerError> {
        let root = self.shared.base.root();
        if !root.is_dir() {
            return Err(ServerError::RootMissing(root.to_path_buf()));
        }
        self.bind().map(|_| ())
    }

    async fn start(&self) -> Result<(), ServerError> {
        if self.is_active() {
            return Ok(());
        }
        let server = self.bind()?;
        let shared = Arc::clone(&self.shared);
        shared.active.store(true, Ordering::SeqCst);

        thread::Builder::new()
            .name("livedev-http".into())
            .spawn(move || run_request_loop(&server, shared))
            .map_err(|err| {
                self.shared.active.store(false, Ordering::SeqCst);
                ServerError::Spawn(err)
            })?;

        log!("serve"; "{}", self.shared.base.base_url());
        Ok(())
    }

    fn stop(&self) {
        self.shared.active.store(false, Ordering::SeqCst);
        if let Some(server) = self.bound.lock().take() {
            server.unblock();
            debug!("server"; "stopped {}", self.shared.base.base_url());
        }
    }

    fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }
}

/// Bind to the specified interface and port, with automatic port retry.
fn bind_with_retry(interface: IpAddr, base_port: u16) -> Result<(Server, SocketAddr), ServerError> {
    let mut last_error = String::new();
    let mut last_port = base_port;

    for offset in 0..MAX_PORT_RETRIES {
        let port = base_port.saturating_add(offset);
        last_port = port;
        match Server::http(SocketAddr::new(interface, port)) {
            Ok(server) => {
                // Port 0 asks the OS; report what it picked
                let addr = server
                    .server_addr()
                    .to_ip()
                    .unwrap_or_else(|| SocketAddr::new(interface, port));
                if offset > 0 {
                    log!("serve"; "port {} in use, using {} instead", base_port, addr.port());
                }
                return Ok((server, addr));
            }
            Err(err) => last_error = err.to_string(),
        }
    }

    Err(ServerError::Bind {
        first: base_port,
        last: last_port,
        attempts: MAX_PORT_RETRIES,
        message: last_error,
    })
}

fn base_url_for(addr: SocketAddr) -> Url {
    Url::parse(&format!("http://{addr}/")).expect("socket address forms a valid origin")
}

fn run_request_loop(server: &Server, shared: Arc<Shared>) {
    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(POOL_THREADS)
        .thread_name(|i| format!("livedev-http-{i}"))
        .build()
    {
        Ok(pool) => pool,
        Err(err) => {
            log!("serve"; "failed to create thread pool: {err}");
            shared.active.store(false, Ordering::SeqCst);
            return;
        }
    };

    for request in server.incoming_requests() {
        let shared = Arc::clone(&shared);
        pool.spawn(move || {
            if let Err(e) = handle_request(request, &shared) {
                log!("serve"; "request error: {e}");
            }
        });
    }
    debug!("server"; "request loop finished");
}

fn handle_request(request: Request, shared: &Shared) -> Result<()> {
    if !shared.active.load(Ordering::SeqCst) || crate::core::is_shutdown() {
        return send_body(request, 503, types::PLAIN, b"503 Service Unavailable".to_vec());
    }
    if !matches!(request.method(), Method::Get | Method::Head) {
        return send_body(request, 405, types::PLAIN, b"405 Method Not Allowed".to_vec());
    }

    let key = shared.base.key_for_request(request.url());
    debug!("server"; "{} {}", request.method(), key);

    if let Some(content) = shared.base.virtual_content_for_key(&key) {
        let content_type = mime::from_path(Path::new(&key));
        return send_body(request, 200, content_type, content.into_bytes());
    }

    let Some(mut path) = shared.base.path_for_key(&key) else {
        return send_body(request, 404, types::PLAIN, b"404 Not Found".to_vec());
    };
    if path.is_dir() {
        path.push("index.html");
    }
    let content_type = mime::from_path(&path);

    // Live documents serve what the editor holds, saved or not
    let body = match shared.base.get(&path) {
        Some(live) => live.doc().text().into_bytes(),
        None if path.is_file() && within_root(&path, shared.base.root()) => {
            fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?
        }
        None => return send_body(request, 404, types::PLAIN, b"404 Not Found".to_vec()),
    };

    let body = if mime::is_html(content_type) {
        inject_remote_script(&body, &shared.protocol.remote_script_tag())
    } else {
        body
    };
    send_body(request, 200, content_type, body)
}

/// Symlinks must not lead outside the served root.
fn within_root(path: &Path, root: &Path) -> bool {
    match (path.canonicalize(), root.canonicalize()) {
        (Ok(path), Ok(root)) => path.starts_with(root),
        _ => false,
    }
}

/// Inject the remote script tag before `</body>`, or append it.
pub(super) fn inject_remote_script(content: &[u8], tag: &str) -> Vec<u8> {
    const PATTERN: &[u8] = b"</body>";

    let tag = tag.as_bytes();
    let mut result = Vec::with_capacity(content.len() + tag.len());
    match content
        .windows(PATTERN.len())
        .rposition(|w| w.eq_ignore_ascii_case(PATTERN))
    {
        Some(pos) => {
            result.extend_from_slice(&content[..pos]);
            result.extend_from_slice(tag);
            result.extend_from_slice(&content[pos..]);
        }
        None => {
            result.extend_from_slice(content);
            result.extend_from_slice(tag);
        }
    }
    result
}

fn send_body(request: Request, status: u16, content_type: &'static str, body: Vec<u8>) -> Result<()> {
    let is_head = request.method() == &Method::Head;
    let mut response = Response::from_data(if is_head { Vec::new() } else { body })
        .with_status_code(StatusCode(status));
    for header in [
        make_header("Content-Type", content_type),
        make_header("Cache-Control", "no-store"),
    ]
    .into_iter()
    .flatten()
    {
        response.add_header(header);
    }
    request.respond(response)?;
    Ok(())
}

fn make_header(key: &str, value: &str) -> Option<Header> {
    Header::from_bytes(key, value).ok()
}
