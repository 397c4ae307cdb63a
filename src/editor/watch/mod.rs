//! Filesystem watcher feeding changes made outside the editor into the
//! workspace.
//!
//! ```text
//! notify → Debouncer (timing, dedup) → apply_changes → MemoryWorkspace
//! ```
//!
//! Created and modified files are reloaded (or opened) and reported as
//! saved, removed ones are deleted. With `follow_changes`, a changed HTML
//! page becomes the current document so the preview retargets to it.

mod debouncer;


use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::PreviewConfig;
use crate::editor::{MemoryWorkspace, Workspace};
use debouncer::Debouncer;

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

/// Watches the project root.
pub struct FsWatcher {
    notify_rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    /// Watcher handle (must be kept alive)
    _watcher: RecommendedWatcher,
    workspace: Arc<MemoryWorkspace>,
    preview: PreviewConfig,
}

impl FsWatcher {
    /// Start watching immediately; events buffer until `run` is called.
    pub fn new(
        root: &Path,
        workspace: Arc<MemoryWorkspace>,
        preview: PreviewConfig,
    ) -> notify::Result<Self> {
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        Ok(Self {
            notify_rx,
            _watcher: watcher,
            workspace,
            preview,
        })
    }

    /// Run until the watcher goes away.
    pub async fn run(self) {
        let Self {
            notify_rx,
            _watcher,
            workspace,
            preview,
        } = self;
        let mut debouncer = Debouncer::new();

        let (async_tx, mut async_rx) = tokio::sync::mpsc::channel::<notify::Event>(64);

        // Bridge the sync notify channel into tokio
        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                match result {
                    Ok(event) => {
                        if async_tx.blocking_send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => crate::log!("watch"; "notify error: {}", e),
                }
            }
        });

        loop {
            tokio::select! {
                biased;
                event = async_rx.recv() => match event {
                    Some(event) => debouncer.add_event(&event),
                    None => break,
                },
                _ = tokio::time::sleep(debouncer.sleep_duration()) => {
                    if let Some(batch) = debouncer.take_if_ready() {
                        apply_changes(&workspace, &preview, batch).await;
                    }
                }
            }
        }
    }
}

/// Push a debounced batch into the workspace.
pub async fn apply_changes(
    workspace: &MemoryWorkspace,
    preview: &PreviewConfig,
    batch: Vec<(PathBuf, ChangeKind)>,
) {
    let mut follow: Option<PathBuf> = None;

    for (path, kind) in batch {
        match kind {
            ChangeKind::Removed => {
                if workspace.delete(&path).is_some() {
                    crate::log!("watch"; "removed {}", display(workspace, &path));
                }
            }
            ChangeKind::Created | ChangeKind::Modified => {
                match workspace.reload_from_disk(&path).await {
                    Ok(Some(_)) => crate::log!("watch"; "{} {}", kind.label(), display(workspace, &path)),
                    Ok(None) => {}
                    Err(e) => crate::log!("watch"; "{}", e),
                }
                if preview.follow_changes && is_page(preview, &path) {
                    follow = Some(path);
                }
            }
        }
    }

    if let Some(path) = follow {
        match workspace.document_for_path(&path).await {
            Ok(_) => workspace.set_current(Some(&path)),
            Err(e) => crate::debug!("watch"; "cannot follow {}: {}", path.display(), e),
        }
    }
}

fn is_page(preview: &PreviewConfig, path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| preview.is_html_extension(ext))
}

fn display(workspace: &MemoryWorkspace, path: &Path) -> String {
    path.strip_prefix(workspace.project_root())
        .unwrap_or(path)
        .display()
        .to_string()
}
