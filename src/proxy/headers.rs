use crate::routing::Backend;
use http::header::{CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use rand::Rng;
use std::net::SocketAddr;

pub static REQUEST_ID: HeaderName = HeaderName::from_static("x-openaperture-request-id");
static XFF: HeaderName = HeaderName::from_static("x-forwarded-for");
static XFH: HeaderName = HeaderName::from_static("x-forwarded-host");
static XFPORT: HeaderName = HeaderName::from_static("x-forwarded-port");
static XFPROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// 128-bit random request ID as 32 lowercase hex chars.
pub fn generate_request_id() -> String {
    let id: u128 = rand::thread_rng().gen();
    format!("{:032x}", id)
}

/// Insert the five forwarding headers when absent. Header-name matching is
/// case-insensitive, so a client-supplied value is never overwritten.
pub fn inject_forwarding_headers(
    headers: &mut HeaderMap,
    peer: Option<SocketAddr>,
    host: &str,
    port: u16,
    scheme: &str,
) {
    if !headers.contains_key(&REQUEST_ID) {
        if let Ok(v) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert(REQUEST_ID.clone(), v);
        }
    }

    if !headers.contains_key(&XFF) {
        let value = match peer {
            Some(addr) => format!("{}:{}", addr.ip(), addr.port()),
            None => "unknown".to_string(),
        };
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(XFF.clone(), v);
        }
    }

    if !headers.contains_key(&XFH) {
        if let Ok(v) = HeaderValue::from_str(host) {
            headers.insert(XFH.clone(), v);
        }
    }

    if !headers.contains_key(&XFPORT) {
        let mut buf = itoa::Buffer::new();
        if let Ok(v) = HeaderValue::from_str(buf.format(port)) {
            headers.insert(XFPORT.clone(), v);
        }
    }

    if !headers.contains_key(&XFPROTO) {
        if let Ok(v) = HeaderValue::from_str(scheme) {
            headers.insert(XFPROTO.clone(), v);
        }
    }
}

/// Strip headers that must not travel to the backend. Hop-by-hop headers are
/// scoped to the inbound connection; `Host` and the body-framing headers are
/// re-established by the outbound client for the backend's authority and the
/// re-streamed body.
pub fn prepare_outbound_headers(headers: &mut HeaderMap) {
    let hop_headers: &[HeaderName] = &[
        CONNECTION,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-authenticate"),
        HeaderName::from_static("proxy-authorization"),
        HeaderName::from_static("te"),
        HeaderName::from_static("trailers"),
        TRANSFER_ENCODING,
        HeaderName::from_static("upgrade"),
    ];

    for h in hop_headers {
        headers.remove(h);
    }
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);
}

/// Deduplicate response headers by case-insensitive name, keeping the last
/// value supplied for each name. The origin's headers come after any the
/// server layer injected, so its versions win. Total by construction — header
/// reshaping can never abort a response.
pub fn sanitize_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut sanitized = HeaderMap::with_capacity(headers.keys_len());
    for name in headers.keys() {
        if let Some(last) = headers.get_all(name).iter().last() {
            sanitized.insert(name.clone(), last.clone());
        }
    }
    sanitized
}

/// True when the request carries a body, judged by the presence of either
/// framing header.
pub fn request_has_body(headers: &HeaderMap) -> bool {
    headers.contains_key(CONTENT_LENGTH) || headers.contains_key(TRANSFER_ENCODING)
}

/// Canonical form of a request method: the seven standard verbs match
/// case-insensitively; anything else passes through as an opaque uppercased
/// token.
pub fn canonicalize_method(raw: &str) -> Method {
    if raw.eq_ignore_ascii_case("GET") {
        Method::GET
    } else if raw.eq_ignore_ascii_case("POST") {
        Method::POST
    } else if raw.eq_ignore_ascii_case("PUT") {
        Method::PUT
    } else if raw.eq_ignore_ascii_case("DELETE") {
        Method::DELETE
    } else if raw.eq_ignore_ascii_case("HEAD") {
        Method::HEAD
    } else if raw.eq_ignore_ascii_case("OPTIONS") {
        Method::OPTIONS
    } else if raw.eq_ignore_ascii_case("PATCH") {
        Method::PATCH
    } else {
        Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).unwrap_or(Method::GET)
    }
}

/// Split an authority into host and port. Without an explicit port the
/// listener's own port applies — that is the port the client addressed.
pub fn split_authority(authority: &str, fallback_port: u16) -> (String, u16) {
    if let Some(rest) = authority.strip_prefix('[') {
        if let Some((host, after)) = rest.split_once(']') {
            let port = after
                .strip_prefix(':')
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(fallback_port);
            return (host.to_string(), port);
        }
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            match port.parse::<u16>() {
                Ok(p) => (host.to_string(), p),
                Err(_) => (authority.to_string(), fallback_port),
            }
        }
        _ => (authority.to_string(), fallback_port),
    }
}

/// The authority portion of `<scheme>://<authority>[/<rest>]`, used only as a
/// diagnostic label in logs.
pub fn extract_authority(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.is_empty() {
        None
    } else {
        Some(authority)
    }
}

/// Outbound URL for a backend: its scheme and authority with the inbound
/// path+query carried over.
pub fn backend_url(backend: &Backend, path_and_query: &str) -> String {
    let scheme = if backend.secure { "https" } else { "http" };
    let mut buf = itoa::Buffer::new();
    let port = buf.format(backend.port);

    let mut url =
        String::with_capacity(scheme.len() + 3 + backend.host.len() + 1 + port.len() + path_and_query.len().max(1));
    url.push_str(scheme);
    url.push_str("://");
    url.push_str(&backend.host);
    url.push(':');
    url.push_str(port);
    if path_and_query.is_empty() {
        url.push('/');
    } else {
        url.push_str(path_and_query);
    }
    url
}

/// HTTP/1.1 status line for diagnostics.
pub fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
}
