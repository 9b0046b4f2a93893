use crate::config::TimeoutConfig;
use crate::error::RouterError;
use crate::proxy::backend::{BackendErrorKind, BackendEvent, BackendSession};
use crate::proxy::body::{collect_buffered, passthrough_body, ResponseMode};
use crate::proxy::context::{empty_response, full_body, BoxBody, RequestLog};
use crate::proxy::headers;
use crate::server::RouterState;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Health endpoint served on the main listener.
pub const STATUS_CHECK_PATH: &str = "/openaperture_router_status_check";

/// The router reports unhealthy once the route cache has gone this long
/// without a successful refresh.
const ROUTE_STALENESS_LIMIT_SECS: u64 = 600;

/// Request bodies are relayed upstream in reads of this size; the final read
/// finalizes the outbound body.
const REQUEST_READ_CHUNK: usize = 4_096;

/// Proxy one inbound request through a linear lifecycle:
///
/// 1. ROUTE       — select a backend for the inbound `host:port` authority
/// 2. HEADERS     — inject forwarding headers, strip hop headers
/// 3. START       — open the upstream exchange
/// 4. SEND BODY   — relay the request body in fixed-size reads (if any)
/// 5. RESPOND     — await the initial response, pick a body mode, relay
/// 6. LOG         — one access line with total and backend time
pub async fn handle_request(
    req: Request<Incoming>,
    state: RouterState,
    peer_addr: SocketAddr,
    scheme: &'static str,
) -> Result<Response<BoxBody>, Infallible> {
    if req.uri().path() == STATUS_CHECK_PATH {
        return Ok(status_check_response(&state));
    }

    let timeouts = state.config.load().timeouts.clone();

    let (parts, inbound_body) = req.into_parts();

    let host_header = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let (host, port) = headers::split_authority(host_header, state.http_port);
    let authority = format!("{}:{}", host, port);

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| "/".to_owned());

    let method = headers::canonicalize_method(parts.method.as_str());

    let mut log = RequestLog::new(
        method.as_str().to_string(),
        authority.clone(),
        parts.uri.path().to_string(),
    );

    let backend = match state.routes.select(&authority) {
        Some(b) => b,
        None => {
            debug!("proxy: no route, authority={}", authority);
            log.set_status(StatusCode::SERVICE_UNAVAILABLE.as_u16());
            log.finish("no_route", 0);
            return Ok(empty_response(StatusCode::SERVICE_UNAVAILABLE));
        }
    };
    log.set_backend(backend.authority());

    let mut out_headers = parts.headers.clone();
    headers::inject_forwarding_headers(&mut out_headers, Some(peer_addr), &host, port, scheme);
    headers::prepare_outbound_headers(&mut out_headers);

    let url = headers::backend_url(&backend, &path_and_query);
    // Diagnostic label for log lines: the backend authority, not the full URL.
    let backend_label = headers::extract_authority(&url).unwrap_or(&url).to_string();
    let has_body = headers::request_has_body(&parts.headers);

    let mut session = match state.backend.start(method, &url, out_headers, has_body) {
        Ok(s) => s,
        Err(e) => {
            warn!("proxy: backend start failed, backend={}, error={}", backend_label, e);
            log.set_status(StatusCode::SERVICE_UNAVAILABLE.as_u16());
            log.finish("backend_start_failed", 0);
            return Ok(empty_response(StatusCode::SERVICE_UNAVAILABLE));
        }
    };

    if has_body {
        if let Err((e, backend_us)) = relay_request_body(inbound_body, &mut session, &timeouts).await
        {
            session.abort();
            let (status, outcome) = match &e {
                RouterError::StageTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                RouterError::ClientIo(_) => (StatusCode::BAD_REQUEST, "client_error"),
                _ => (StatusCode::BAD_GATEWAY, "backend_error"),
            };
            warn!(
                "proxy: request body relay failed, backend={}, error={}",
                backend_label, e
            );
            log.set_status(status.as_u16());
            log.finish(outcome, backend_us);
            return Ok(empty_response(status));
        }
    }

    let initial = tokio::time::timeout(timeouts.waiting_for_response(), session.next_event()).await;
    let (status, resp_headers, initial_us) = match initial {
        Ok(Some(BackendEvent::InitialResponse {
            status,
            headers,
            duration_us,
        })) => (status, headers, duration_us),
        Ok(Some(BackendEvent::Error {
            kind,
            reason,
            duration_us,
        })) => {
            let status = match kind {
                BackendErrorKind::Connect => StatusCode::SERVICE_UNAVAILABLE,
                BackendErrorKind::Io => StatusCode::BAD_GATEWAY,
            };
            warn!("proxy: backend error, backend={}, error={}", backend_label, reason);
            log.set_status(status.as_u16());
            log.finish("backend_error", duration_us);
            return Ok(empty_response(status));
        }
        Ok(Some(_)) | Ok(None) => {
            session.abort();
            warn!(
                "proxy: backend event stream ended unexpectedly, backend={}",
                backend_label
            );
            log.set_status(StatusCode::BAD_GATEWAY.as_u16());
            log.finish("backend_error", 0);
            return Ok(empty_response(StatusCode::BAD_GATEWAY));
        }
        Err(_) => {
            session.abort();
            warn!(
                "proxy: timed out waiting for response, backend={}",
                backend_label
            );
            log.set_status(StatusCode::GATEWAY_TIMEOUT.as_u16());
            log.finish("timeout", 0);
            return Ok(empty_response(StatusCode::GATEWAY_TIMEOUT));
        }
    };

    debug!(
        "proxy: initial response, backend={}, status_line={}",
        backend_label,
        headers::status_line(status)
    );

    let sanitized = headers::sanitize_response_headers(&resp_headers);
    log.set_status(status.as_u16());

    // Some origins never send a body (or a terminating chunk) for 204/304
    // without framing headers; complete the response right away instead of
    // waiting for a `done` that will not come.
    let bodyless = (status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
        && !resp_headers.contains_key(CONTENT_LENGTH)
        && !resp_headers.contains_key(TRANSFER_ENCODING);
    if bodyless {
        session.abort();
        log.finish("ok", initial_us);
        let mut resp = empty_response(status);
        *resp.headers_mut() = sanitized;
        return Ok(resp);
    }

    match ResponseMode::select(&resp_headers) {
        ResponseMode::Buffered => {
            match collect_buffered(&mut session, timeouts.receiving_response()).await {
                Ok((body, backend_us)) => {
                    log.finish("ok", backend_us);
                    let mut resp = Response::new(full_body(body));
                    *resp.status_mut() = status;
                    *resp.headers_mut() = sanitized;
                    Ok(resp)
                }
                Err(e) => {
                    let (status, outcome) = match &e {
                        RouterError::StageTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                        _ => (StatusCode::BAD_GATEWAY, "backend_error"),
                    };
                    warn!(
                        "proxy: buffered response failed, backend={}, error={}",
                        backend_label, e
                    );
                    log.set_status(status.as_u16());
                    log.finish(outcome, 0);
                    Ok(empty_response(status))
                }
            }
        }
        mode => {
            let mut resp = Response::new(passthrough_body(
                session,
                log,
                timeouts.receiving_response(),
            ));
            *resp.status_mut() = status;
            *resp.headers_mut() = sanitized;
            if mode == ResponseMode::Chunked {
                // Chunked framing governs; a stray length from the origin
                // must not contradict it.
                resp.headers_mut().remove(CONTENT_LENGTH);
            }
            Ok(resp)
        }
    }
}

/// Relay the inbound request body upstream in `REQUEST_READ_CHUNK`-byte
/// reads. One chunk of lookahead is kept so the final read can be flagged
/// with `is_last`, which finalizes the outbound body. A request that declares
/// a body but carries none still sends one empty finalizing chunk.
///
/// Errors carry the backend time spent so far (from the last completed
/// `send_chunk`), so the access log's overhead split stays truthful; stage
/// timeouts report zero.
async fn relay_request_body(
    mut body: Incoming,
    session: &mut BackendSession,
    timeouts: &TimeoutConfig,
) -> Result<(), (RouterError, u64)> {
    let stage = timeouts.sending_request_body();
    let mut queue: VecDeque<Bytes> = VecDeque::new();
    let mut source_done = false;
    let mut backend_us = 0u64;

    loop {
        while queue.len() < 2 && !source_done {
            match tokio::time::timeout(stage, body.frame()).await {
                Err(_) => return Err((RouterError::StageTimeout("sending_request_body"), 0)),
                Ok(None) => source_done = true,
                Ok(Some(Err(e))) => {
                    return Err((RouterError::ClientIo(e.to_string()), backend_us))
                }
                Ok(Some(Ok(frame))) => {
                    if let Ok(mut data) = frame.into_data() {
                        while data.len() > REQUEST_READ_CHUNK {
                            queue.push_back(data.split_to(REQUEST_READ_CHUNK));
                        }
                        if !data.is_empty() {
                            queue.push_back(data);
                        }
                    }
                }
            }
        }

        let is_last = source_done && queue.len() <= 1;
        let chunk = queue.pop_front().unwrap_or_default();
        match tokio::time::timeout(stage, session.send_chunk(chunk, is_last)).await {
            Err(_) => return Err((RouterError::StageTimeout("sending_request_body"), 0)),
            Ok(Err(e)) => return Err((e, session.elapsed_us())),
            Ok(Ok(us)) => backend_us = us,
        }
        if is_last {
            return Ok(());
        }
    }
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 200 while route refreshes are succeeding, 503 before the first success or
/// once the cache has gone stale.
fn status_check_response(state: &RouterState) -> Response<BoxBody> {
    match state.last_refresh.age_secs(unix_now_secs()) {
        Some(age) if age <= ROUTE_STALENESS_LIMIT_SECS => empty_response(StatusCode::OK),
        _ => empty_response(StatusCode::SERVICE_UNAVAILABLE),
    }
}
