mod admin;
pub mod bootstrap;
mod state;

pub use state::RouterState;

use crate::proxy;
use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info};

/// Bind the proxy listener on the configured port and serve until shutdown.
pub async fn run_proxy_server(state: RouterState, shutdown: Arc<Notify>) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], state.http_port).into();
    let listener = TcpListener::bind(addr).await?;
    info!("server: proxy listening, addr={}", addr);
    serve(listener, state, shutdown).await
}

/// Accept loop over an already-bound listener, split out so tests can bind an
/// ephemeral port first.
///
/// The acceptor pool (`http_acceptors`) caps concurrently served connections:
/// a permit is taken before each accept and returned when the connection
/// task finishes. When `shutdown` is notified the loop stops accepting and
/// waits up to `DRAIN_TIMEOUT` for in-flight connections to complete.
pub async fn serve(
    listener: TcpListener,
    state: RouterState,
    shutdown: Arc<Notify>,
) -> Result<()> {
    const DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

    let permits = Arc::new(Semaphore::new(state.config.load().http_acceptors));
    let active_conns = Arc::new(AtomicI64::new(0));

    // One pinned Notified future re-polled across iterations, so a signal
    // arriving between selects is not lost.
    let shutdown_signal = shutdown.notified();
    tokio::pin!(shutdown_signal);

    loop {
        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
            _ = &mut shutdown_signal => {
                info!("server: proxy: stop accepting new connections, draining...");
                break;
            }
        };

        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = &mut shutdown_signal => {
                info!("server: proxy: stop accepting new connections, draining...");
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => {
                metrics::counter!("router_connections_total", "status" => "accepted").increment(1);
                v
            }
            Err(e) => {
                error!("server: proxy: accept failed, error={}", e);
                metrics::counter!("router_connections_total", "status" => "error").increment(1);
                continue;
            }
        };

        metrics::gauge!("router_connections_active").increment(1.0);
        active_conns.fetch_add(1, Ordering::Relaxed);

        let state = state.clone();
        let active_conns = active_conns.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let state_inner = state.clone();
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state_inner.clone();
                async move { proxy::handle_request(req, state, peer_addr, "http").await }
            });

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!(
                        "server: proxy: connection error, peer={}, error={}",
                        peer_addr, e
                    );
                }
            }

            metrics::gauge!("router_connections_active").decrement(1.0);
            active_conns.fetch_sub(1, Ordering::Relaxed);
            drop(permit);
        });
    }

    // Drain phase: wait for in-flight connections to finish (or timeout).
    let active = active_conns.load(Ordering::Relaxed);
    if active > 0 {
        info!(
            "server: proxy: waiting for {} active connections to drain",
            active
        );
        let drain = async {
            loop {
                if active_conns.load(Ordering::Relaxed) == 0 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        };
        match tokio::time::timeout(DRAIN_TIMEOUT, drain).await {
            Ok(_) => info!("server: proxy: all connections drained"),
            Err(_) => {
                let remaining = active_conns.load(Ordering::Relaxed);
                info!(
                    "server: proxy: drain timeout ({}s), {} connections still active",
                    DRAIN_TIMEOUT.as_secs(),
                    remaining
                );
            }
        }
    }

    Ok(())
}

/// Run the admin server for metrics and route diagnostics.
pub async fn run_admin_server(listen: &str, state: RouterState) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: admin listening, addr={}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { admin::handle_admin(req, state) }
            });

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, svc)
                .await
            {
                if !e.to_string().contains("connection closed") {
                    error!("server: admin: connection error, error={}", e);
                }
            }
        });
    }
}
