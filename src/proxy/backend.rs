use crate::config::RouterConfig;
use crate::error::RouterError;
use bytes::Bytes;
use futures_util::StreamExt;
use http::{HeaderMap, Method, StatusCode};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lifecycle of one upstream exchange, delivered in order over the session's
/// channel: exactly one `InitialResponse` or `Error` first, then zero or more
/// `Chunk`s, then one terminal `Done` or `Error`.
pub enum BackendEvent {
    InitialResponse {
        status: StatusCode,
        headers: HeaderMap,
        duration_us: u64,
    },
    Chunk(Bytes),
    Done {
        total_duration_us: u64,
    },
    Error {
        kind: BackendErrorKind,
        reason: String,
        duration_us: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The exchange could not be initiated (DNS, connect refused, TLS).
    Connect,
    /// The exchange failed after it was underway.
    Io,
}

const EVENT_CHANNEL_CAPACITY: usize = 32;
const BODY_CHANNEL_CAPACITY: usize = 32;

/// True when the outbound proxy applies to this destination. https traffic
/// and the local development hosts always connect direct.
pub fn proxy_applies(url: &reqwest::Url) -> bool {
    if url.scheme() == "https" {
        return false;
    }
    !matches!(
        url.host_str(),
        Some("localhost") | Some("127.0.0.1") | Some("lvh.me")
    )
}

/// Process-wide outbound HTTP client.
///
/// One pooled client serves every backend; per-request state lives in the
/// `BackendSession`. The `connecting` stage timeout is enforced here at the
/// connector, the remaining stages by the engine around each event wait.
pub struct BackendClient {
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(cfg: &RouterConfig) -> Result<Self, RouterError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(cfg.timeouts.connecting())
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .redirect(reqwest::redirect::Policy::none());

        if !cfg.tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ref proxy_url) = cfg.outbound_proxy {
            let target = reqwest::Url::parse(proxy_url)
                .map_err(|e| RouterError::Config(format!("invalid outbound_proxy: {}", e)))?;
            let proxy = reqwest::Proxy::custom(move |url| {
                if proxy_applies(url) {
                    Some(target.clone())
                } else {
                    None
                }
            });
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            client: builder.build().map_err(RouterError::Http)?,
        })
    }

    /// Begin one upstream exchange. When `has_body` is set the request body
    /// is left open for `send_chunk` calls; otherwise the request phase is
    /// complete as soon as the headers are written.
    pub fn start(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        has_body: bool,
    ) -> Result<BackendSession, RouterError> {
        let target = reqwest::Url::parse(url)
            .map_err(|e| RouterError::BackendStart(format!("invalid backend url {}: {}", url, e)))?;

        let started = Instant::now();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let (body, body_tx) = if has_body {
            let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(BODY_CHANNEL_CAPACITY);
            let stream = futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            (Some(reqwest::Body::wrap_stream(stream)), Some(tx))
        } else {
            (None, None)
        };

        let client = self.client.clone();
        let task = tokio::spawn(run_exchange(
            client, method, target, headers, body, event_tx, started,
        ));

        Ok(BackendSession {
            events: event_rx,
            body_tx,
            task,
            started,
        })
    }
}

/// One in-flight upstream exchange: the open request-body channel, the event
/// channel, and the task driving the socket. Dropping the session tears the
/// exchange down.
pub struct BackendSession {
    events: mpsc::Receiver<BackendEvent>,
    body_tx: Option<mpsc::Sender<Result<Bytes, std::io::Error>>>,
    task: JoinHandle<()>,
    started: Instant,
}

impl BackendSession {
    pub async fn next_event(&mut self) -> Option<BackendEvent> {
        self.events.recv().await
    }

    /// Relay one request-body chunk. `is_last` finalizes the body and moves
    /// the exchange into the response phase.
    pub async fn send_chunk(&mut self, bytes: Bytes, is_last: bool) -> Result<u64, RouterError> {
        let tx = self.body_tx.as_ref().ok_or_else(|| {
            RouterError::BackendIo("request body already finalized".to_string())
        })?;
        if tx.send(Ok(bytes)).await.is_err() {
            self.body_tx = None;
            return Err(RouterError::BackendIo(
                "backend stopped reading request body".to_string(),
            ));
        }
        if is_last {
            self.body_tx = None;
        }
        Ok(self.elapsed_us())
    }

    pub fn elapsed_us(&self) -> u64 {
        elapsed_us(self.started)
    }

    /// Forcibly terminate the exchange, closing the outbound socket.
    pub fn abort(&mut self) {
        self.task.abort();
        self.body_tx = None;
        self.events.close();
    }
}

impl Drop for BackendSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn elapsed_us(started: Instant) -> u64 {
    started.elapsed().as_micros() as u64
}

async fn run_exchange(
    client: reqwest::Client,
    method: Method,
    url: reqwest::Url,
    headers: HeaderMap,
    body: Option<reqwest::Body>,
    events: mpsc::Sender<BackendEvent>,
    started: Instant,
) {
    let mut request = client.request(method, url).headers(headers);
    if let Some(body) = body {
        request = request.body(body);
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            let kind = if e.is_connect() {
                BackendErrorKind::Connect
            } else {
                BackendErrorKind::Io
            };
            let _ = events
                .send(BackendEvent::Error {
                    kind,
                    reason: e.to_string(),
                    duration_us: elapsed_us(started),
                })
                .await;
            return;
        }
    };

    let status = response.status();
    let resp_headers = response.headers().clone();
    if events
        .send(BackendEvent::InitialResponse {
            status,
            headers: resp_headers,
            duration_us: elapsed_us(started),
        })
        .await
        .is_err()
    {
        // Engine already gave up on this exchange.
        return;
    }

    let mut stream = response.bytes_stream();
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                if events.send(BackendEvent::Chunk(chunk)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = events
                    .send(BackendEvent::Error {
                        kind: BackendErrorKind::Io,
                        reason: e.to_string(),
                        duration_us: elapsed_us(started),
                    })
                    .await;
                return;
            }
        }
    }

    let _ = events
        .send(BackendEvent::Done {
            total_duration_us: elapsed_us(started),
        })
        .await;
}
