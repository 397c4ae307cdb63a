use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::json;

use super::{LiveDocEvent, LiveDocParams, LiveDocument, UrlResolver, Variant, classify, create};
use crate::config::PreviewConfig;
use crate::editor::{Document, Editor, MemoryWorkspace};
use crate::protocol::Protocol;
use crate::testing::FakeTransport;

const ROOT: &str = "/site";

fn resolver() -> UrlResolver {
    Arc::new(|path: &Path| {
        path.strip_prefix(ROOT)
            .ok()
            .map(|rel| format!("http://127.0.0.1:5277/{}", rel.display()))
    })
}

struct Fixture {
    protocol: Arc<Protocol>,
    transport: Arc<FakeTransport>,
    workspace: MemoryWorkspace,
}

impl Fixture {
    fn new() -> Self {
        crate::testing::quiet();
        let protocol = Protocol::new();
        let transport = FakeTransport::new();
        protocol.set_transport(transport.clone()).unwrap();
        transport.connect(1, "http://127.0.0.1:5277/index.html");
        transport.clear();
        Self {
            protocol,
            transport,
            workspace: MemoryWorkspace::new(ROOT),
        }
    }

    fn live(&self, rel: &str, text: &str, roots: Vec<String>) -> LiveDocument {
        let doc = self.workspace.open(rel, text);
        let variant = classify(&doc, &PreviewConfig::default());
        self.build(variant, doc, roots)
    }

    fn build(&self, variant: Variant, doc: Arc<Document>, roots: Vec<String>) -> LiveDocument {
        create(
            variant,
            LiveDocParams {
                protocol: Arc::clone(&self.protocol),
                resolver: resolver(),
                editor: Arc::new(Editor::new(Arc::clone(&doc))),
                doc,
                roots,
                highlight: true,
            },
            None,
        )
        .unwrap()
    }
}

fn record(live: &LiveDocument) -> Arc<Mutex<Vec<LiveDocEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let e = Arc::clone(&events);
    live.attach_listener(live.events().subscribe(move |ev| e.lock().push(ev.clone())));
    events
}

#[test]
fn test_classify() {
    let preview = PreviewConfig::default();
    assert_eq!(classify(&Document::new("/site/a.HTM", ""), &preview), Variant::Html);
    assert_eq!(classify(&Document::new("/site/a.css", ""), &preview), Variant::Css);
    assert_eq!(classify(&Document::new("/site/a.js", ""), &preview), Variant::None);
}

#[test]
fn test_classify_css_before_html_extensions() {
    let preview = PreviewConfig {
        html_extensions: vec!["css".to_string(), "html".to_string()],
        ..PreviewConfig::default()
    };
    assert_eq!(classify(&Document::new("/site/a.css", ""), &preview), Variant::Css);
    assert_eq!(classify(&Document::new("/site/a.html", ""), &preview), Variant::Html);
}

#[test]
fn test_create_none_variant() {
    let fx = Fixture::new();
    let doc = Arc::new(Document::new("/site/app.js", ""));
    let made = create(
        Variant::None,
        LiveDocParams {
            protocol: Arc::clone(&fx.protocol),
            resolver: resolver(),
            editor: Arc::new(Editor::new(Arc::clone(&doc))),
            doc,
            roots: Vec::new(),
            highlight: true,
        },
        None,
    );
    assert!(made.is_none());
}

#[test]
fn test_css_defaults() {
    let fx = Fixture::new();
    let live = fx.live("css/site.css", "", Vec::new());
    assert_eq!(live.url(), "http://127.0.0.1:5277/css/site.css");
    assert_eq!(live.roots(), ["http://127.0.0.1:5277/css/site.css".to_string()]);
    assert!(live.is_live_editing_enabled());
    assert!(live.is_related(Path::new("/site/css/site.css")));
    assert!(!live.is_related(Path::new("/site/other.css")));
}

#[test]
fn test_css_edit_pushes_stylesheet_text() {
    let fx = Fixture::new();
    let _live = fx.live("css/site.css", "", Vec::new());

    fx.workspace.edit("css/site.css", "body { background: url(bg.png) }");
    let sent = fx.transport.last("CSS.setStylesheetText").unwrap();
    assert_eq!(sent["params"]["url"], "http://127.0.0.1:5277/css/site.css");
    assert_eq!(
        sent["params"]["text"],
        "body { background: url(http://127.0.0.1:5277/css/bg.png) }"
    );
}

#[test]
fn test_css_imported_sheet_updates_root() {
    let fx = Fixture::new();
    let live = fx.live(
        "css/parts.css",
        "",
        vec!["http://127.0.0.1:5277/css/site.css".into()],
    );
    let events = record(&live);

    fx.workspace.edit("css/parts.css", "p { margin: 0 }");
    assert_eq!(fx.transport.count("CSS.setStylesheetText"), 0);
    assert_eq!(
        *events.lock(),
        vec![LiveDocEvent::UpdateDoc {
            url: "http://127.0.0.1:5277/css/site.css".into()
        }]
    );
}

#[test]
fn test_css_deleted_closes() {
    let fx = Fixture::new();
    let live = fx.live("css/site.css", "a{}", Vec::new());
    let events = record(&live);

    fx.workspace.delete("css/site.css");
    assert!(live.is_closed());
    assert_eq!(
        *events.lock(),
        vec![LiveDocEvent::Deleted {
            url: "http://127.0.0.1:5277/css/site.css".into()
        }]
    );

    // Closed documents no longer follow their source
    live.doc().replace_text("b{}");
    assert_eq!(fx.transport.count("CSS.setStylesheetText"), 0);
}

#[test]
fn test_html_tracks_related_resources() {
    let fx = Fixture::new();
    let live = fx.live("index.html", "<html></html>", Vec::new());
    assert!(!live.is_live_editing_enabled());

    fx.transport.message(
        1,
        json!({
            "method": "DocumentRelated",
            "related": {
                "scripts": { "http://127.0.0.1:5277/app.js?v=3": true },
                "stylesheets": { "http://127.0.0.1:5277/css/site.css": [] }
            }
        }),
    );
    assert!(live.is_related(Path::new("/site/app.js")));
    assert!(live.is_related(Path::new("/site/css/site.css")));
    assert!(live.is_related(Path::new("/site/index.html")));
    assert!(!live.is_related(Path::new("/site/other.js")));

    fx.transport.message(1, json!({ "method": "ScriptRemoved", "src": "http://127.0.0.1:5277/app.js" }));
    fx.transport.message(1, json!({ "method": "ScriptAdded", "src": "http://127.0.0.1:5277/other.js" }));
    assert!(!live.is_related(Path::new("/site/app.js")));
    assert!(live.is_related(Path::new("/site/other.js")));
    assert_eq!(live.related_scripts(), vec!["http://127.0.0.1:5277/other.js".to_string()]);

    // Detached protocol listeners stop tracking
    live.detach_protocol_listeners();
    fx.transport.message(1, json!({ "method": "StylesheetRemoved", "href": "http://127.0.0.1:5277/css/site.css" }));
    assert!(live.is_related(Path::new("/site/css/site.css")));
}

#[test]
fn test_css_highlight_follows_cursor() {
    let fx = Fixture::new();
    let css = "h1 { color: red }\n\n.nav a { color: blue }";
    let live = fx.live("css/site.css", css, Vec::new());

    live.editor().set_cursor(css.find("blue").unwrap());
    live.update_highlight();
    let call = fx.transport.last("Remote.call").unwrap();
    assert_eq!(call["params"]["fn"], "highlightRule");
    assert_eq!(call["params"]["args"], json!([".nav a"]));

    // Blank line between rules: nothing to highlight
    live.editor().set_cursor(css.find("\n\n").unwrap() + 1);
    live.update_highlight();
    assert_eq!(fx.transport.last("Remote.call").unwrap()["params"]["fn"], "hideHighlight");

    fx.transport.clear();
    live.update_highlight();
    assert!(fx.transport.sent().is_empty());
}

#[test]
fn test_highlight_disabled() {
    let fx = Fixture::new();
    let live = fx.live("css/site.css", "a { b: c }", Vec::new());
    live.set_highlight_enabled(false);
    live.editor().set_cursor(5);
    live.update_highlight();
    assert_eq!(fx.transport.count("Remote.call"), 0);
}

#[test]
fn test_html_highlight_marks_editor() {
    let fx = Fixture::new();
    let html = "<body><ul><li>a</li><li>b</li></ul></body>";
    let live = fx.live("index.html", html, Vec::new());

    live.editor().set_cursor(html.find(">b<").unwrap() + 1);
    live.update_highlight();
    let call = fx.transport.last("Remote.call").unwrap();
    assert_eq!(call["params"]["fn"], "highlightElement");
    assert_eq!(
        call["params"]["args"],
        json!(["body > ul:nth-of-type(1) > li:nth-of-type(2)"])
    );
    let markers = live.editor().markers_of(live.id());
    assert_eq!(markers.len(), 1);
    assert_eq!(&html[markers[0].range.clone()], "<li>b</li>");

    live.close();
    assert!(live.editor().markers_of(live.id()).is_empty());
    assert_eq!(fx.transport.last("Remote.call").unwrap()["params"]["fn"], "hideHighlight");
}

#[test]
fn test_close_is_idempotent() {
    let fx = Fixture::new();
    let live = fx.live("index.html", "", Vec::new());
    let before = fx.protocol.events().listener_count();
    live.close();
    live.close();
    assert!(live.is_closed());
    assert_eq!(fx.protocol.events().listener_count(), before - 1);
}

#[test]
fn test_detach_listeners() {
    let fx = Fixture::new();
    let live = fx.live("css/site.css", "", Vec::new());
    let events = record(&live);
    live.detach_listeners();
    live.set_errors(true);
    assert!(events.lock().is_empty());
    assert!(live.has_errors());
}

#[test]
fn test_set_errors_emits_on_change_only() {
    let fx = Fixture::new();
    let live = fx.live("css/site.css", "", Vec::new());
    let events = record(&live);
    live.set_errors(false);
    live.set_errors(true);
    live.set_errors(true);
    live.set_errors(false);
    assert_eq!(
        *events.lock(),
        vec![
            LiveDocEvent::ErrorStatusChanged { has_errors: true },
            LiveDocEvent::ErrorStatusChanged { has_errors: false },
        ]
    );
}

#[tokio::test]
async fn test_rejected_stylesheet_reports_error() {
    let fx = Fixture::new();
    let doc = fx.workspace.open("css/site.css", "");
    let flagged = Arc::new(AtomicBool::new(false));
    let f = Arc::clone(&flagged);
    let _live = create(
        Variant::Css,
        LiveDocParams {
            protocol: Arc::clone(&fx.protocol),
            resolver: resolver(),
            editor: Arc::new(Editor::new(Arc::clone(&doc))),
            doc,
            roots: Vec::new(),
            highlight: true,
        },
        Some(Arc::new(move |_, has_errors| f.store(has_errors, Ordering::SeqCst))),
    )
    .unwrap();

    fx.workspace.edit("css/site.css", "a {");
    let request = fx.transport.last("CSS.setStylesheetText").unwrap();
    fx.transport
        .message(1, json!({ "id": request["id"], "error": "parse error" }));

    for _ in 0..100 {
        if flagged.load(Ordering::SeqCst) {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(flagged.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_source_from_browser() {
    let fx = Fixture::new();
    let live = fx.live("css/site.css", "", Vec::new());

    let pending = {
        let live = live.clone();
        tokio::spawn(async move { live.source_from_browser().await })
    };
    let mut request = None;
    for _ in 0..100 {
        request = fx.transport.last("CSS.getStylesheetText");
        if request.is_some() {
            break;
        }
        tokio::task::yield_now().await;
    }
    let request = request.unwrap();
    fx.transport.respond(1, &request, json!({ "text": "p{}" }));

    assert_eq!(pending.await.unwrap(), Ok("p{}".to_string()));
}
