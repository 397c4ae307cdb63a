//! Registry of server providers.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::ServerAdapter;

/// Builds a fresh server for a session.
pub type ServerFactory = Arc<dyn Fn() -> Arc<dyn ServerAdapter> + Send + Sync>;

/// Handle returned by [`ServerManager::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderId(u64);

struct Provider {
    id: ProviderId,
    priority: i32,
    create: ServerFactory,
}

#[derive(Default)]
pub struct ServerManager {
    /// Sorted by descending priority, registration order within a priority
    providers: RwLock<Vec<Provider>>,
    next_id: AtomicU64,
}

impl ServerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, priority: i32, create: ServerFactory) -> ProviderId {
        let id = ProviderId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut providers = self.providers.write();
        let at = providers
            .iter()
            .position(|p| p.priority < priority)
            .unwrap_or(providers.len());
        providers.insert(
            at,
            Provider {
                id,
                priority,
                create,
            },
        );
        id
    }

    /// Returns whether the provider was registered.
    pub fn remove_provider(&self, id: ProviderId) -> bool {
        let mut providers = self.providers.write();
        let before = providers.len();
        providers.retain(|p| p.id != id);
        providers.len() != before
    }

    pub fn provider_count(&self) -> usize {
        self.providers.read().len()
    }

    /// First server, by priority, able to serve `path`.
    pub fn get_server(&self, path: &Path) -> Option<Arc<dyn ServerAdapter>> {
        let factories: Vec<ServerFactory> = self
            .providers
            .read()
            .iter()
            .map(|p| Arc::clone(&p.create))
            .collect();
        factories
            .into_iter()
            .map(|create| create())
            .find(|server| server.can_serve(path))
    }
}
