pub mod client;

pub use client::{RoutePayload, RouteServerClient, TokenSource};

use crate::error::RouterError;
use crate::routing::RouteCache;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unix-second timestamp of the latest successful route reconciliation.
///
/// A single atomic cell: written only by the refresher, read lock-free by the
/// health check. Zero encodes "never refreshed" (process start state).
pub struct LastRefresh(AtomicU64);

impl LastRefresh {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn get(&self) -> Option<u64> {
        match self.0.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }

    /// Advance the timestamp. `fetch_max` keeps the cell monotone even if the
    /// control plane ever reports an older timestamp.
    pub fn advance(&self, timestamp: u64) {
        self.0.fetch_max(timestamp, Ordering::Relaxed);
    }

    /// Seconds since the last successful refresh, or `None` if never.
    pub fn age_secs(&self, now_unix: u64) -> Option<u64> {
        self.get().map(|ts| now_unix.saturating_sub(ts))
    }
}

impl Default for LastRefresh {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts from one reconciliation pass, for the refresher's log line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub updated: usize,
    pub deleted: usize,
    pub bootstrap: bool,
}

/// One reconciliation pass against the route server.
///
/// Before the first success (`last` still unset) this performs a full fetch
/// and replaces whatever is cached. Afterwards it applies the incremental
/// protocol: deleted authorities first, then changed routes, so an authority
/// that was both deleted and re-added within one interval ends up routed.
/// The timestamp advances only when the whole pass succeeds.
pub async fn refresh_once(
    client: &RouteServerClient,
    cache: &RouteCache,
    last: &LastRefresh,
) -> Result<RefreshSummary, RouterError> {
    match last.get() {
        None => {
            let payload = client.fetch_routes(None).await?;
            let updated = payload.routes.len();
            for (authority, backends) in payload.routes {
                cache.put(&authority, backends);
            }
            last.advance(payload.timestamp);
            Ok(RefreshSummary {
                updated,
                deleted: 0,
                bootstrap: true,
            })
        }
        Some(since) => {
            let deleted = client.fetch_deleted(since).await?;
            for authority in &deleted {
                cache.delete(authority);
            }

            let payload = client.fetch_routes(Some(since)).await?;
            let updated = payload.routes.len();
            for (authority, backends) in payload.routes {
                cache.put(&authority, backends);
            }
            last.advance(payload.timestamp);
            Ok(RefreshSummary {
                updated,
                deleted: deleted.len(),
                bootstrap: false,
            })
        }
    }
}
