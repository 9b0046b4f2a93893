use dashmap::DashMap;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;

/// One origin server registered for an authority.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Backend {
    #[serde(rename = "hostname")]
    pub host: String,

    pub port: u16,

    /// Whether the backend is reached over https.
    #[serde(rename = "secure_connection", default)]
    pub secure: bool,
}

impl Backend {
    pub fn authority(&self) -> String {
        let mut buf = itoa::Buffer::new();
        let mut s = String::with_capacity(self.host.len() + 6);
        s.push_str(&self.host);
        s.push(':');
        s.push_str(buf.format(self.port));
        s
    }
}

/// Concurrent authority → backend-list map.
///
/// Readers are on the hot path and never block behind the refresher: lookups
/// go through dashmap's sharded read locks and the backend lists are shared
/// `Arc`s, so a `put` swaps the value atomically and in-flight readers keep
/// the snapshot they already hold. Staleness between refreshes is expected
/// and accepted.
pub struct RouteCache {
    routes: DashMap<String, Arc<Vec<Backend>>>,
}

impl RouteCache {
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
        }
    }

    /// Host comparison is case-insensitive; ports are digits, so folding the
    /// whole authority is equivalent to folding the host.
    fn key(authority: &str) -> String {
        authority.to_ascii_lowercase()
    }

    /// Replace the backend list for an authority. An empty list is never
    /// stored: it is indistinguishable from "no entry" and is applied as a
    /// removal.
    pub fn put(&self, authority: &str, backends: Vec<Backend>) {
        if backends.is_empty() {
            self.delete(authority);
            return;
        }
        self.routes.insert(Self::key(authority), Arc::new(backends));
    }

    pub fn delete(&self, authority: &str) {
        self.routes.remove(&Self::key(authority));
    }

    pub fn get(&self, authority: &str) -> Option<Arc<Vec<Backend>>> {
        self.routes.get(&Self::key(authority)).map(|e| e.value().clone())
    }

    /// Pick a backend for an authority: `None` when unrouted, the sole entry
    /// when there is one, uniform random otherwise.
    pub fn select(&self, authority: &str) -> Option<Backend> {
        let backends = self.get(authority)?;
        match backends.len() {
            0 => None,
            1 => Some(backends[0].clone()),
            n => {
                let idx = rand::thread_rng().gen_range(0..n);
                Some(backends[idx].clone())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Snapshot of all entries, for diagnostics.
    pub fn snapshot(&self) -> Vec<(String, Arc<Vec<Backend>>)> {
        self.routes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

impl Default for RouteCache {
    fn default() -> Self {
        Self::new()
    }
}
