use crate::{config, discovery, server};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub admin_listen: String,
}

/// Router lifecycle: init → refresh routes → serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let config = config::RouterConfig::load(&args.config_path)?;
    let state = server::RouterState::new(config)?;

    let shutdown = Arc::new(Notify::new());
    start_route_refresher(&state, &shutdown);
    start_admin_server(&state, &args);

    tracing::info!("server: starting router, port={}", state.http_port);

    let proxy_handle = tokio::spawn({
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_proxy_server(state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    // Wait for the proxy to finish draining.
    match proxy_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("server: proxy error: {}", e),
        Err(e) => tracing::error!("server: proxy task error: {}", e),
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

/// Sleep for `duration`, but return `true` immediately if shutdown is signalled.
/// Returns `false` if the full duration elapsed normally.
async fn sleep_or_shutdown(duration: std::time::Duration, shutdown: &Notify) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.notified() => true,
    }
}

/// Own the route-refresher loop: one reconciliation pass immediately, then
/// one per interval. A failed pass is logged and retried at the next tick;
/// the loop only exits on shutdown.
fn start_route_refresher(state: &server::RouterState, shutdown: &Arc<Notify>) {
    let cfg = state.config.load();
    if cfg.route_server.url.is_empty() {
        tracing::warn!("discovery: route refresher disabled, route_server.url not configured");
        return;
    }

    let client = match discovery::RouteServerClient::new(&cfg.route_server) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("discovery: failed to build route server client: {}", e);
            return;
        }
    };
    let interval = cfg.route_server.ttl();

    let routes = state.routes.clone();
    let last_refresh = state.last_refresh.clone();
    let shutdown = shutdown.clone();

    tokio::spawn(async move {
        loop {
            match discovery::refresh_once(&client, &routes, &last_refresh).await {
                Ok(summary) => {
                    metrics::counter!("router_route_refresh_total", "result" => "success")
                        .increment(1);
                    metrics::gauge!("router_routes_loaded").set(routes.len() as f64);
                    if summary.bootstrap {
                        tracing::info!(
                            "discovery: route table loaded, authorities={}",
                            summary.updated
                        );
                    } else if summary.updated > 0 || summary.deleted > 0 {
                        tracing::info!(
                            "discovery: routes reconciled, updated={}, deleted={}",
                            summary.updated,
                            summary.deleted
                        );
                    } else {
                        tracing::debug!("discovery: no route changes");
                    }
                }
                Err(e) => {
                    metrics::counter!("router_route_refresh_total", "result" => "error")
                        .increment(1);
                    tracing::warn!("discovery: route refresh failed: {}", e);
                }
            }

            if sleep_or_shutdown(interval, &shutdown).await {
                return;
            }
        }
    });
}

fn start_admin_server(state: &server::RouterState, args: &BootstrapArgs) {
    let s = state.clone();
    let admin_addr = args.admin_listen.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_admin_server(&admin_addr, s).await {
            tracing::error!("server: admin failed, error={}", e);
        }
    });
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    // Signal all background loops to stop.
    shutdown.notify_waiters();
}
