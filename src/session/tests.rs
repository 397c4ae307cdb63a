use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::json;
use url::Url;

use super::{Session, SessionActor, SessionError, SessionEvent};
use crate::config::{LiveConfig, PreviewConfig};
use crate::core::{CloseReason, Status, StatusChange};
use crate::editor::watch::{ChangeKind, apply_changes};
use crate::editor::{MemoryWorkspace, Workspace};
use crate::protocol::Protocol;
use crate::server::{BaseServer, ServerAdapter, ServerError, ServerManager};
use crate::testing::FakeTransport;

const ROOT: &str = "/site";
const ORIGIN: &str = "http://127.0.0.1:5277";

fn url(rel: &str) -> String {
    format!("{ORIGIN}/{rel}")
}

// ============================================================================
// Fixture
// ============================================================================

struct TestServer {
    base: BaseServer,
    ready: bool,
    active: AtomicBool,
    starts: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl ServerAdapter for TestServer {
    fn base(&self) -> &BaseServer {
        &self.base
    }

    async fn ready_to_serve(&self) -> Result<(), ServerError> {
        if self.ready {
            Ok(())
        } else {
            Err(ServerError::RootMissing(PathBuf::from(ROOT)))
        }
    }

    async fn start(&self) -> Result<(), ServerError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

struct Fixture {
    session: Session,
    workspace: Arc<MemoryWorkspace>,
    protocol: Arc<Protocol>,
    transport: Arc<FakeTransport>,
    starts: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<SessionEvent>>>,
    _sub: crate::event::Subscription,
}

impl Fixture {
    fn new() -> Self {
        Self::with_server(true)
    }

    fn with_server(ready: bool) -> Self {
        Self::build(Path::new(ROOT), ready)
    }

    fn build(root: &Path, ready: bool) -> Self {
        crate::testing::quiet();
        let protocol = Protocol::new();
        let transport = FakeTransport::new();
        protocol.set_transport(transport.clone()).unwrap();

        let workspace = Arc::new(MemoryWorkspace::new(root));
        workspace.open("index.html", "<html><body><p>home</p></body></html>");
        workspace.open("about.html", "<html><body><p>about</p></body></html>");
        workspace.open("notes.txt", "plain");
        workspace.open("app.js", "let a = 1;");
        workspace.open("css/site.css", "body { color: red }");
        workspace.open("css/base.css", "p { margin: 0 }");

        let starts = Arc::new(AtomicUsize::new(0));
        let servers = Arc::new(ServerManager::new());
        let counter = Arc::clone(&starts);
        let server_root = root.to_path_buf();
        servers.register(
            0,
            Arc::new(move || {
                Arc::new(TestServer {
                    base: BaseServer::new(
                        server_root.clone(),
                        Url::parse(&format!("{ORIGIN}/")).unwrap(),
                    ),
                    ready,
                    active: AtomicBool::new(false),
                    starts: Arc::clone(&counter),
                }) as Arc<dyn ServerAdapter>
            }),
        );

        let mut session = Session::new(
            Arc::new(LiveConfig::with_root(root)),
            Arc::clone(&workspace) as Arc<dyn Workspace>,
            servers,
            Arc::clone(&protocol),
        );
        session.init();

        let events = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&events);
        let sub = session.events().subscribe(move |ev| e.lock().push(ev.clone()));

        Self {
            session,
            workspace,
            protocol,
            transport,
            starts,
            events,
            _sub: sub,
        }
    }

    /// Open on `rel` and connect client 1 from its URL.
    async fn active_on(rel: &str) -> Self {
        Self::active_in(Path::new(ROOT), rel).await
    }

    async fn active_in(root: &Path, rel: &str) -> Self {
        let mut fx = Self::build(root, true);
        fx.workspace.set_current(Some(Path::new(rel)));
        fx.session.process_pending().await;
        fx.session.open().await.unwrap();
        fx.transport.connect(1, &url(rel));
        fx.session.process_pending().await;
        assert_eq!(fx.session.status(), Status::Active);
        fx.events.lock().clear();
        fx.transport.clear();
        fx
    }

    fn page_message(&self, message: serde_json::Value) {
        self.transport.message(1, message);
    }

    fn stylesheet_added(&self, rel: &str, roots: &[String]) {
        self.page_message(json!({ "method": "StylesheetAdded", "href": url(rel), "roots": roots }));
    }

    fn statuses(&self) -> Vec<Status> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::StatusChange(change) => Some(change.status),
                _ => None,
            })
            .collect()
    }

    fn path(rel: &str) -> PathBuf {
        Path::new(ROOT).join(rel)
    }
}

// ============================================================================
// Status
// ============================================================================

#[tokio::test]
async fn test_repeated_status_notifies_once() {
    let mut fx = Fixture::new();
    fx.session.open().await.unwrap();
    fx.session.set_status(Status::Connecting, None);
    fx.session.set_status(Status::Connecting, None);
    assert_eq!(fx.statuses(), vec![Status::Connecting]);
}

#[tokio::test]
async fn test_close_when_inactive_is_silent() {
    let mut fx = Fixture::new();
    for _ in 0..3 {
        fx.session.close();
    }
    assert_eq!(fx.session.status(), Status::Inactive);
    assert!(fx.events.lock().is_empty());
}

// ============================================================================
// Open
// ============================================================================

#[tokio::test]
async fn test_open_launches_and_registers_scripts() {
    let mut fx = Fixture::new();
    fx.workspace.set_current(Some(Path::new("index.html")));
    fx.session.process_pending().await;
    fx.session.open().await.unwrap();

    assert_eq!(fx.session.status(), Status::Connecting);
    assert_eq!(fx.starts.load(Ordering::SeqCst), 1);
    assert!(fx.events.lock().contains(&SessionEvent::OpenPreviewUrl {
        url: url("index.html"),
        path: Fixture::path("index.html"),
    }));

    let server = fx.session.server().unwrap();
    let names = fx.protocol.script_names();
    let remote = server.base().virtual_content_for_key(&format!("/{}", names.remote));
    assert!(remote.unwrap().contains("/* fake transport */"));
    assert!(
        server
            .base()
            .virtual_content_for_key(&format!("/{}", names.worker))
            .is_some()
    );
    assert!(server.get(&Fixture::path("index.html")).is_some());

    let details = fx.session.live_preview_details();
    assert_eq!(details.url, Some(url("index.html")));
    assert_eq!(details.live_document.as_ref(), fx.session.main_document());
}

#[tokio::test]
async fn test_open_falls_back_to_index() {
    let mut fx = Fixture::new();
    fx.session.open().await.unwrap();
    assert_eq!(
        fx.session.main_document().map(|m| m.url().to_string()),
        Some(url("index.html"))
    );
}

#[tokio::test]
async fn test_server_not_ready_leaves_status() {
    let mut fx = Fixture::with_server(false);
    let result = fx.session.open().await;
    assert!(matches!(result, Err(SessionError::ServerNotReady(_))));
    assert_eq!(fx.session.status(), Status::Inactive);
    assert!(fx.session.server().is_none());
    assert!(fx.events.lock().is_empty());
}

#[tokio::test]
async fn test_matching_connection_activates() {
    let mut fx = Fixture::new();
    fx.workspace.set_current(Some(Path::new("index.html")));
    fx.session.open().await.unwrap();

    // A page for another document does not complete the open
    fx.transport.connect(7, &url("about.html"));
    fx.session.process_pending().await;
    assert_eq!(fx.session.status(), Status::Connecting);

    fx.transport.connect(1, &format!("{}?v=1#top", url("index.html")));
    fx.session.process_pending().await;
    assert_eq!(fx.session.status(), Status::Active);
    assert_eq!(fx.session.connection_ids(), vec![1, 7]);

    fx.transport.disconnect(7);
    fx.session.process_pending().await;
    assert!(
        fx.events
            .lock()
            .contains(&SessionEvent::ConnectionClose { client_id: 7 })
    );
    assert_eq!(fx.session.status(), Status::Active);
}

#[tokio::test]
async fn test_open_while_live_restarts() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.session.open().await.unwrap();
    assert_eq!(fx.statuses(), vec![Status::Inactive, Status::Connecting]);
    assert_eq!(fx.transport.closed(), vec![1]);
}

// ============================================================================
// Related documents
// ============================================================================

#[tokio::test]
async fn test_stylesheet_becomes_related_document() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.stylesheet_added("css/site.css?v=2", &[]);
    fx.session.process_pending().await;

    assert_eq!(fx.session.related_urls(), vec![url("css/site.css")]);
    let live = fx.session.live_doc_for_path(&Fixture::path("css/site.css")).unwrap();
    assert!(live.is_live_editing_enabled());
    assert_eq!(fx.session.status(), Status::Active);
}

#[tokio::test]
async fn test_stylesheet_added_twice_is_tracked_once() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.stylesheet_added("css/site.css", &[]);
    fx.stylesheet_added("css/site.css", &[]);
    fx.session.process_pending().await;
    fx.stylesheet_added("css/site.css", &[]);
    fx.session.process_pending().await;
    assert_eq!(fx.session.related_count(), 1);
}

#[tokio::test]
async fn test_external_and_non_css_resources_are_ignored() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.page_message(json!({ "method": "StylesheetAdded", "href": "https://cdn.example.com/a.css", "roots": [] }));
    fx.stylesheet_added("notes.txt", &[]);
    fx.stylesheet_added("css/missing.css", &[]);
    fx.session.process_pending().await;
    assert_eq!(fx.session.related_count(), 0);
}

#[tokio::test]
async fn test_document_related_adds_every_stylesheet() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.page_message(json!({
        "method": "DocumentRelated",
        "related": {
            "scripts": { (url("app.js")): true },
            "stylesheets": { (url("css/site.css")): [], (url("css/base.css")): [] }
        }
    }));
    fx.session.process_pending().await;
    assert_eq!(
        fx.session.related_urls(),
        vec![url("css/base.css"), url("css/site.css")]
    );
}

#[tokio::test]
async fn test_stylesheet_removed_unregisters() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.stylesheet_added("css/site.css", &[]);
    fx.session.process_pending().await;
    let live = fx.session.live_doc_for_path(&Fixture::path("css/site.css")).unwrap();

    fx.page_message(json!({ "method": "StylesheetRemoved", "href": url("css/site.css") }));
    fx.session.process_pending().await;
    assert_eq!(fx.session.related_count(), 0);
    assert!(fx.session.live_doc_for_path(&Fixture::path("css/site.css")).is_none());
    assert!(live.is_closed());
}

#[tokio::test]
async fn test_deleted_stylesheet_is_dropped() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.stylesheet_added("css/site.css", &[]);
    fx.session.process_pending().await;

    fx.workspace.delete("css/site.css");
    fx.session.process_pending().await;
    assert_eq!(fx.session.related_count(), 0);
}

#[tokio::test]
async fn test_imported_sheet_refreshes_importer() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.stylesheet_added("css/site.css", &[]);
    fx.stylesheet_added("css/base.css", &[url("css/site.css")]);
    fx.session.process_pending().await;
    fx.transport.clear();

    fx.workspace.edit("css/base.css", "p { margin: 1px }");
    fx.session.process_pending().await;

    let sent = fx.transport.last("CSS.setStylesheetText").unwrap();
    assert_eq!(sent["params"]["url"], url("css/site.css"));
    assert_eq!(fx.transport.count("CSS.setStylesheetText"), 1);
    // Live-editable: no out-of-sync detour
    assert_eq!(fx.session.status(), Status::Active);
}

#[tokio::test]
async fn test_root_with_query_is_the_sheet_itself() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.stylesheet_added("css/site.css", &[url("css/site.css?v=1")]);
    fx.session.process_pending().await;
    let live = fx.session.live_doc_for_path(&Fixture::path("css/site.css")).unwrap();
    assert_eq!(live.roots(), [url("css/site.css")]);
    fx.transport.clear();

    fx.workspace.edit("css/site.css", "body { color: blue }");
    tokio::time::timeout(std::time::Duration::from_secs(3), fx.session.process_pending())
        .await
        .unwrap();

    let sent = fx.transport.last("CSS.setStylesheetText").unwrap();
    assert_eq!(sent["params"]["url"], url("css/site.css"));
    assert_eq!(fx.transport.count("CSS.setStylesheetText"), 1);
}

// ============================================================================
// File switches
// ============================================================================

#[tokio::test]
async fn test_file_switch_restarts_on_new_document() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.stylesheet_added("css/site.css", &[]);
    fx.session.process_pending().await;
    let sheet = fx.session.live_doc_for_path(&Fixture::path("css/site.css")).unwrap();

    fx.workspace.set_current(Some(Path::new("about.html")));
    fx.session.process_pending().await;

    assert_eq!(fx.session.status(), Status::Restarting);
    assert_eq!(fx.session.related_count(), 0);
    assert!(sheet.is_closed());
    assert_eq!(
        fx.session.main_document().map(|m| m.url().to_string()),
        Some(url("about.html"))
    );
    let navigate = fx.transport.last("Page.navigate").unwrap();
    assert_eq!(navigate["params"]["url"], url("about.html"));

    fx.transport.connect(2, &url("about.html"));
    fx.session.process_pending().await;
    assert_eq!(fx.statuses(), vec![Status::Restarting, Status::Active]);
}

#[tokio::test]
async fn test_switch_to_unpreviewable_file_is_ignored() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.workspace.set_current(Some(Path::new("notes.txt")));
    fx.session.process_pending().await;
    assert_eq!(fx.session.status(), Status::Active);
    assert_eq!(
        fx.session.main_document().map(|m| m.url().to_string()),
        Some(url("index.html"))
    );
}

#[tokio::test]
async fn test_pinned_preview_ignores_file_switch() {
    let mut fx = Fixture::new();
    fx.session
        .set_pinned(true, Some(Fixture::path("index.html")));
    fx.workspace.set_current(Some(Path::new("about.html")));
    fx.session.process_pending().await;
    fx.session.open().await.unwrap();
    fx.transport.connect(1, &url("index.html"));
    fx.session.process_pending().await;
    let main = fx.session.main_document().cloned();
    assert_eq!(main.as_ref().map(|m| m.url().to_string()), Some(url("index.html")));

    fx.workspace.set_current(Some(Path::new("index.html")));
    fx.workspace.set_current(Some(Path::new("about.html")));
    fx.session.process_pending().await;
    assert_eq!(fx.session.main_document().cloned(), main);
    assert!(!fx.statuses().contains(&Status::Restarting));
    assert_eq!(fx.session.status(), Status::Active);
}

// ============================================================================
// Dirty, save and errors
// ============================================================================

#[tokio::test]
async fn test_dirty_main_document_goes_out_of_sync() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.workspace
        .edit("index.html", "<html><body><p>edited</p></body></html>");
    fx.session.process_pending().await;
    assert_eq!(fx.session.status(), Status::OutOfSync);

    fx.workspace.save("index.html");
    fx.session.process_pending().await;
    assert_eq!(fx.session.status(), Status::Active);
    assert_eq!(fx.transport.count("Page.reload"), 0);
}

#[tokio::test]
async fn test_saving_related_script_reloads_once() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.page_message(json!({ "method": "ScriptAdded", "src": url("app.js") }));
    fx.session.process_pending().await;

    fx.workspace.edit("app.js", "let a = 2;");
    fx.session.process_pending().await;
    assert_eq!(fx.session.status(), Status::OutOfSync);

    fx.workspace.save("app.js");
    fx.session.process_pending().await;
    assert_eq!(fx.session.status(), Status::Reloading);
    assert_eq!(fx.transport.count("Page.reload"), 1);
    assert!(
        fx.events
            .lock()
            .contains(&SessionEvent::PreviewReload { clients: vec![1] })
    );

    // The reloaded page connects back
    fx.transport.disconnect(1);
    fx.transport.connect(2, &url("index.html"));
    fx.session.process_pending().await;
    assert_eq!(fx.session.status(), Status::Active);
}

#[tokio::test]
async fn test_saving_unrelated_script_does_nothing() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.workspace.edit("app.js", "let a = 3;");
    fx.workspace.save("app.js");
    fx.session.process_pending().await;
    assert_eq!(fx.session.status(), Status::Active);
    assert_eq!(fx.transport.count("Page.reload"), 0);
}

#[tokio::test]
async fn test_script_changed_on_disk_reloads_page() {
    let dir = tempfile::TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let script = root.join("app.js");
    std::fs::write(&script, "let a = 1;").unwrap();

    let mut fx = Fixture::active_in(&root, "index.html").await;
    // Only what the editor opened lives in the workspace
    fx.workspace.delete("app.js");
    fx.page_message(json!({ "method": "ScriptAdded", "src": url("app.js") }));
    fx.session.process_pending().await;

    std::fs::write(&script, "let a = 2;").unwrap();
    apply_changes(
        &fx.workspace,
        &PreviewConfig::default(),
        vec![(script, ChangeKind::Modified)],
    )
    .await;
    fx.session.process_pending().await;

    assert_eq!(fx.session.status(), Status::Reloading);
    assert_eq!(fx.transport.count("Page.reload"), 1);
}

#[tokio::test]
async fn test_live_document_errors_map_to_sync_error() {
    let mut fx = Fixture::active_on("index.html").await;
    let main = fx.session.main_document().cloned().unwrap();

    main.set_errors(true);
    fx.session.process_pending().await;
    assert_eq!(fx.session.status(), Status::SyncError);

    main.set_errors(false);
    fx.session.process_pending().await;
    assert_eq!(fx.session.status(), Status::Active);
}

#[tokio::test]
async fn test_clicks_are_relayed() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.page_message(json!({ "clicked": true, "tagId": 4, "nodeName": "P" }));
    fx.session.process_pending().await;
    assert!(matches!(
        fx.events.lock().as_slice(),
        [SessionEvent::PreviewClicked { client_id: 1, details }] if details["tagId"] == 4
    ));
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test]
async fn test_close_tears_everything_down() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.stylesheet_added("css/site.css", &[]);
    fx.session.process_pending().await;
    let server = Arc::clone(fx.session.server().unwrap());
    let main = fx.session.main_document().cloned().unwrap();

    fx.session.close_with(Some(CloseReason::NavigatedAway));

    assert!(fx.session.main_document().is_none());
    assert_eq!(fx.session.related_count(), 0);
    assert!(fx.session.server().is_none());
    assert!(main.is_closed());
    assert!(!server.is_active());
    assert_eq!(server.base().live_doc_count(), 0);
    assert_eq!(fx.transport.closed(), vec![1]);
    assert_eq!(fx.protocol.events().listener_count(), 0);
    assert_eq!(
        fx.events.lock().last(),
        Some(&SessionEvent::StatusChange(StatusChange {
            status: Status::Inactive,
            reason: Some(CloseReason::NavigatedAway),
        }))
    );

    // Late page events find nothing to act on
    fx.transport.connect(3, &url("index.html"));
    fx.session.process_pending().await;
    assert_eq!(fx.session.status(), Status::Inactive);
}

#[tokio::test]
async fn test_closing_documents_stops_protocol_listening_first() {
    let mut fx = Fixture::active_on("index.html").await;
    fx.stylesheet_added("css/site.css", &[]);
    fx.session.process_pending().await;
    let main = fx.session.main_document().cloned().unwrap();

    fx.session.close_documents();

    assert!(fx.session.protocol_subs.is_empty());
    assert_eq!(fx.protocol.events().listener_count(), 0);
    assert!(main.is_closed());
    assert_eq!(fx.session.related_count(), 0);

    // Page traffic after the documents are gone queues nothing
    fx.stylesheet_added("css/site.css", &[]);
    fx.transport.disconnect(1);
    fx.session.process_pending().await;
    assert_eq!(fx.session.related_count(), 0);
    assert_eq!(fx.session.status(), Status::Active);
}

#[tokio::test]
async fn test_highlight_commands() {
    let fx = Fixture::active_on("index.html").await;
    fx.session.hide_highlight();
    fx.session.redraw_highlight();
    let expressions: Vec<_> = fx
        .transport
        .sent()
        .into_iter()
        .filter_map(|(_, v)| v["params"]["expression"].as_str().map(str::to_string))
        .collect();
    assert_eq!(expressions, vec!["_LD.hideHighlight()", "_LD.redrawHighlights()"]);
    assert!(fx.session.reconnect().is_ok());
}

// ============================================================================
// Actor
// ============================================================================

#[tokio::test]
async fn test_actor_drives_session() {
    let fx = Fixture::new();
    fx.workspace.set_current(Some(Path::new("index.html")));
    let Fixture {
        session,
        transport,
        events,
        _sub,
        ..
    } = fx;

    let (actor, handle) = SessionActor::new(session).unwrap();
    let task = tokio::spawn(actor.run());

    handle.open().await.unwrap();
    assert_eq!(handle.status().await.unwrap(), Status::Connecting);

    transport.connect(1, &url("index.html"));
    let mut status = Status::Connecting;
    for _ in 0..50 {
        status = handle.status().await.unwrap();
        if status == Status::Active {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(status, Status::Active);
    assert_eq!(handle.connection_ids().await.unwrap(), vec![1]);
    assert!(
        handle
            .live_doc_for_path(&Fixture::path("index.html"))
            .await
            .unwrap()
            .is_some()
    );

    handle.close().await.unwrap();
    assert_eq!(handle.status().await.unwrap(), Status::Inactive);
    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(matches!(handle.status().await, Err(SessionError::Stopped)));
    assert!(
        events
            .lock()
            .iter()
            .any(|e| matches!(e, SessionEvent::OpenPreviewUrl { .. }))
    );
}
