//! Bookkeeping for requests awaiting a browser response, and for inbound
//! message ids already seen.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tokio::sync::oneshot;

use super::{ClientId, ProtocolError};

/// Upper bound on outstanding requests and remembered message ids.
pub const MAX_TRACKED: usize = 1000;

pub(super) type Reply = oneshot::Sender<Result<Value, ProtocolError>>;

/// Outstanding requests, oldest evicted first once `cap` is exceeded.
pub(super) struct PendingCalls {
    cap: usize,
    order: VecDeque<u64>,
    calls: FxHashMap<u64, (ClientId, Reply)>,
    by_client: FxHashMap<ClientId, FxHashSet<u64>>,
}

impl PendingCalls {
    pub(super) fn new(cap: usize) -> Self {
        Self {
            cap,
            order: VecDeque::new(),
            calls: FxHashMap::default(),
            by_client: FxHashMap::default(),
        }
    }

    /// Track a call. Returns the reply channel of an evicted call, if any.
    pub(super) fn insert(&mut self, id: u64, client: ClientId, reply: Reply) -> Option<Reply> {
        self.calls.insert(id, (client, reply));
        self.by_client.entry(client).or_default().insert(id);
        self.order.push_back(id);

        let evicted = if self.calls.len() > self.cap {
            self.evict_oldest()
        } else {
            None
        };

        if self.order.len() > self.cap * 2 {
            let calls = &self.calls;
            self.order.retain(|id| calls.contains_key(id));
        }
        evicted
    }

    fn evict_oldest(&mut self) -> Option<Reply> {
        while let Some(id) = self.order.pop_front() {
            if let Some(reply) = self.take(id) {
                return Some(reply);
            }
        }
        None
    }

    pub(super) fn take(&mut self, id: u64) -> Option<Reply> {
        let (client, reply) = self.calls.remove(&id)?;
        if let Some(ids) = self.by_client.get_mut(&client) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_client.remove(&client);
            }
        }
        Some(reply)
    }

    /// Remove every call tracked against `client`.
    pub(super) fn take_client(&mut self, client: ClientId) -> Vec<Reply> {
        let Some(ids) = self.by_client.remove(&client) else {
            return Vec::new();
        };
        let mut ids: Vec<u64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.calls.remove(&id).map(|(_, reply)| reply))
            .collect()
    }

    pub(super) fn len(&self) -> usize {
        self.calls.len()
    }
}

/// Sliding window of inbound message ids.
pub(super) struct RecentIds {
    cap: usize,
    order: VecDeque<String>,
    seen: FxHashSet<String>,
}

impl RecentIds {
    pub(super) fn new(cap: usize) -> Self {
        Self {
            cap,
            order: VecDeque::new(),
            seen: FxHashSet::default(),
        }
    }

    /// Record `id`. Returns false if it was already in the window.
    pub(super) fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > self.cap
            && let Some(old) = self.order.pop_front()
        {
            self.seen.remove(&old);
        }
        true
    }
}
