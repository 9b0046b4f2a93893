use crate::config::RouterConfig;
use crate::discovery::LastRefresh;
use crate::metrics::Metrics;
use crate::proxy::backend::BackendClient;
use crate::routing::RouteCache;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Shared router state, cheaply cloneable — one clone per request.
///
/// The route cache and the last-refresh cell are the only mutable state
/// shared between request tasks and the refresher; both are lock-free on the
/// read side.
#[derive(Clone)]
pub struct RouterState {
    pub config: Arc<ArcSwap<RouterConfig>>,
    pub metrics: Metrics,
    pub routes: Arc<RouteCache>,
    pub last_refresh: Arc<LastRefresh>,
    pub backend: Arc<BackendClient>,
    /// The proxy listener's port, used to complete a `Host` header that
    /// carries no explicit port.
    pub http_port: u16,
}

impl RouterState {
    pub fn new(config: RouterConfig) -> Result<Self> {
        let metrics = Metrics::install();
        let backend = BackendClient::new(&config)?;
        metrics::gauge!("router_routes_loaded").set(0.0);

        let http_port = config.http_port;
        Ok(Self {
            config: Arc::new(ArcSwap::new(Arc::new(config))),
            metrics,
            routes: Arc::new(RouteCache::new()),
            last_refresh: Arc::new(LastRefresh::new()),
            backend: Arc::new(backend),
            http_port,
        })
    }
}
