use crate::error::RouterError;
use crate::proxy::backend::{BackendEvent, BackendSession};
use crate::proxy::context::{BoxBody, RequestLog};
use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::HeaderMap;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use std::time::Duration;

/// Responses with a declared length below this are assembled in memory and
/// sent in one reply; everything at or above it is streamed.
pub const BUFFERED_BODY_LIMIT: u64 = 102_400;

/// How a backend response travels back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Forward each backend chunk as one transport chunk as it arrives.
    Chunked,
    /// Accumulate the full body, then reply once.
    Buffered,
    /// Send headers now, then relay an opaque body of unknown or large length.
    Streaming,
}

impl ResponseMode {
    /// Chunked transfer coding wins over any declared length; a small
    /// declared length buffers; everything else streams.
    pub fn select(headers: &HeaderMap) -> ResponseMode {
        let chunked = headers.get_all(TRANSFER_ENCODING).iter().any(|v| {
            v.to_str()
                .map(|s| s.to_ascii_lowercase().contains("chunked"))
                .unwrap_or(false)
        });
        if chunked {
            return ResponseMode::Chunked;
        }

        if let Some(len) = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
        {
            if len < BUFFERED_BODY_LIMIT {
                return ResponseMode::Buffered;
            }
        }

        ResponseMode::Streaming
    }
}

/// Drain the session into memory. Chunks are concatenated in arrival order;
/// the result and the backend's total duration come back together on `Done`.
pub async fn collect_buffered(
    session: &mut BackendSession,
    per_event: Duration,
) -> Result<(Bytes, u64), RouterError> {
    let mut chunks: Vec<Bytes> = Vec::new();
    loop {
        match tokio::time::timeout(per_event, session.next_event()).await {
            Ok(Some(BackendEvent::Chunk(chunk))) => chunks.push(chunk),
            Ok(Some(BackendEvent::Done { total_duration_us })) => {
                let total_len = chunks.iter().map(|c| c.len()).sum();
                let mut body = BytesMut::with_capacity(total_len);
                for chunk in &chunks {
                    body.extend_from_slice(chunk);
                }
                return Ok((body.freeze(), total_duration_us));
            }
            Ok(Some(BackendEvent::Error { reason, .. })) => {
                return Err(RouterError::BackendIo(reason));
            }
            Ok(Some(BackendEvent::InitialResponse { .. })) | Ok(None) => {
                return Err(RouterError::BackendIo(
                    "backend event stream ended unexpectedly".to_string(),
                ));
            }
            Err(_) => {
                session.abort();
                return Err(RouterError::StageTimeout("receiving_response"));
            }
        }
    }
}

struct Passthrough {
    session: BackendSession,
    log: RequestLog,
    per_event: Duration,
    failed: bool,
}

/// Relay the remaining session events to the client as body frames. Serves
/// both the chunked and the streaming mode: the server layer frames each
/// yielded chunk according to the response headers already sent.
///
/// Every inter-chunk wait is bounded by the `receiving_response` timeout; on
/// timeout or backend error the stream yields an error frame, which makes the
/// server layer drop the connection. Bytes already relayed stay sent. The
/// access log is finalized here, on whichever event ends the body.
pub fn passthrough_body(session: BackendSession, log: RequestLog, per_event: Duration) -> BoxBody {
    let state = Passthrough {
        session,
        log,
        per_event,
        failed: false,
    };

    let stream = futures_util::stream::unfold(state, |mut st| async move {
        if st.failed {
            return None;
        }
        match tokio::time::timeout(st.per_event, st.session.next_event()).await {
            Ok(Some(BackendEvent::Chunk(chunk))) => Some((Ok(Frame::data(chunk)), st)),
            Ok(Some(BackendEvent::Done { total_duration_us })) => {
                st.log.finish("ok", total_duration_us);
                None
            }
            Ok(Some(BackendEvent::Error { reason, .. })) => {
                st.failed = true;
                tracing::warn!("proxy: backend failed mid-response: {}", reason);
                st.log.finish("backend_error", 0);
                Some((Err(RouterError::BackendIo(reason)), st))
            }
            Ok(Some(BackendEvent::InitialResponse { .. })) | Ok(None) => {
                st.failed = true;
                st.log.finish("backend_error", 0);
                Some((
                    Err(RouterError::BackendIo(
                        "backend event stream ended unexpectedly".to_string(),
                    )),
                    st,
                ))
            }
            Err(_) => {
                st.failed = true;
                st.session.abort();
                tracing::warn!("proxy: timed out waiting for response chunk");
                st.log.finish("timeout", 0);
                Some((Err(RouterError::StageTimeout("receiving_response")), st))
            }
        }
    });

    BodyExt::boxed(StreamBody::new(stream))
}
