use std::fmt;

#[derive(Debug)]
pub enum RouterError {
    /// No backend registered for the inbound authority.
    NoRoute(String),
    /// The outbound request could not be initiated (DNS, connect refused, TLS).
    BackendStart(String),
    /// Failure while streaming the request body or reading a response event.
    BackendIo(String),
    /// No event arrived within the configured per-stage timeout.
    StageTimeout(&'static str),
    /// Failure while writing to the inbound client.
    ClientIo(String),
    /// Failure inside the route refresher; no client impact.
    RouteRefresh(String),
    Http(reqwest::Error),
    Auth(String),
    Config(String),
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::NoRoute(authority) => write!(f, "no route for {}", authority),
            RouterError::BackendStart(msg) => write!(f, "backend start failed: {}", msg),
            RouterError::BackendIo(msg) => write!(f, "backend io error: {}", msg),
            RouterError::StageTimeout(stage) => write!(f, "stage timeout: {}", stage),
            RouterError::ClientIo(msg) => write!(f, "client io error: {}", msg),
            RouterError::RouteRefresh(msg) => write!(f, "route refresh failed: {}", msg),
            RouterError::Http(e) => write!(f, "http error: {}", e),
            RouterError::Auth(msg) => write!(f, "auth error: {}", msg),
            RouterError::Config(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for RouterError {}
