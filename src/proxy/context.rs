use crate::error::RouterError;
use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::Response;
use std::time::Instant;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, RouterError>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_response(status: StatusCode) -> Response<BoxBody> {
    let mut resp = Response::new(empty_body());
    *resp.status_mut() = status;
    resp
}

/// Per-request access-log and metrics context.
///
/// Exactly one `finish` fires per request, on whichever path ends it: inline
/// for buffered and error replies, at stream completion for chunked/streaming
/// replies, and from `Drop` when the client goes away before the body is
/// done. Durations are microseconds internally and logged as milliseconds.
pub struct RequestLog {
    method: String,
    authority: String,
    path: String,
    backend: String,
    status: u16,
    start: Instant,
    finished: bool,
}

impl RequestLog {
    pub fn new(method: String, authority: String, path: String) -> Self {
        metrics::gauge!("router_http_requests_in_flight").increment(1.0);
        Self {
            method,
            authority,
            path,
            backend: String::new(),
            status: 0,
            start: Instant::now(),
            finished: false,
        }
    }

    pub fn set_backend(&mut self, backend: String) {
        self.backend = backend;
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn start_time(&self) -> Instant {
        self.start
    }

    pub fn finish(&mut self, outcome: &'static str, backend_us: u64) {
        if self.finished {
            return;
        }
        self.finished = true;

        let total_us = self.start.elapsed().as_micros() as u64;
        let router_us = total_us.saturating_sub(backend_us);

        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(self.status).to_owned();

        metrics::counter!(
            "router_http_requests_total",
            "method" => self.method.clone(),
            "status_code" => status_str,
            "outcome" => outcome,
        )
        .increment(1);
        metrics::histogram!("router_http_request_duration_seconds")
            .record(total_us as f64 / 1_000_000.0);
        metrics::histogram!("router_backend_duration_seconds")
            .record(backend_us as f64 / 1_000_000.0);
        metrics::gauge!("router_http_requests_in_flight").decrement(1.0);

        let total_ms = format!("{:.3}", total_us as f64 / 1_000.0);
        let router_ms = format!("{:.3}", router_us as f64 / 1_000.0);
        let backend_ms = format!("{:.3}", backend_us as f64 / 1_000.0);

        tracing::info!(
            method = %self.method,
            authority = %self.authority,
            path = %self.path,
            backend = %self.backend,
            status = self.status,
            outcome = outcome,
            total_ms = %total_ms,
            router_ms = %router_ms,
            backend_ms = %backend_ms,
            "access"
        );
    }
}

impl Drop for RequestLog {
    fn drop(&mut self) {
        if !self.finished {
            self.finish("client_abort", 0);
        }
    }
}
