use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Listener port for proxied traffic.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Maximum number of concurrently served downstream connections.
    #[serde(default = "default_http_acceptors")]
    pub http_acceptors: usize,

    #[serde(default)]
    pub route_server: RouteServerConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Optional outbound HTTP proxy URL. Applied to plain-http backends only;
    /// https destinations and localhost/127.0.0.1/lvh.me always connect direct.
    #[serde(default)]
    pub outbound_proxy: Option<String>,

    /// Verify upstream TLS certificates. Off by default for internal traffic
    /// with self-signed certs.
    #[serde(default)]
    pub tls_verify: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            http_acceptors: default_http_acceptors(),
            route_server: RouteServerConfig::default(),
            timeouts: TimeoutConfig::default(),
            outbound_proxy: None,
            tls_verify: false,
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_http_acceptors() -> usize {
    100
}

/// Control-plane connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteServerConfig {
    /// Base URL of the route server.
    #[serde(default)]
    pub url: String,

    /// Refresh interval in milliseconds.
    #[serde(default = "default_route_server_ttl")]
    pub ttl_ms: u64,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// OAuth token endpoint used to obtain the route-server bearer token.
    #[serde(default)]
    pub oauth_url: String,
}

impl Default for RouteServerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            ttl_ms: default_route_server_ttl(),
            client_id: String::new(),
            client_secret: String::new(),
            oauth_url: String::new(),
        }
    }
}

fn default_route_server_ttl() -> u64 {
    60_000
}

impl RouteServerConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Per-stage timeouts, milliseconds. Each bounds a single inter-event wait,
/// not the cumulative request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connecting_ms")]
    pub connecting: u64,

    #[serde(default = "default_stage_ms")]
    pub sending_request_body: u64,

    #[serde(default = "default_stage_ms")]
    pub waiting_for_response: u64,

    #[serde(default = "default_stage_ms")]
    pub receiving_response: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connecting: default_connecting_ms(),
            sending_request_body: default_stage_ms(),
            waiting_for_response: default_stage_ms(),
            receiving_response: default_stage_ms(),
        }
    }
}

fn default_connecting_ms() -> u64 {
    5_000
}

fn default_stage_ms() -> u64 {
    60_000
}

impl TimeoutConfig {
    pub fn connecting(&self) -> Duration {
        Duration::from_millis(self.connecting)
    }

    pub fn sending_request_body(&self) -> Duration {
        Duration::from_millis(self.sending_request_body)
    }

    pub fn waiting_for_response(&self) -> Duration {
        Duration::from_millis(self.waiting_for_response)
    }

    pub fn receiving_response(&self) -> Duration {
        Duration::from_millis(self.receiving_response)
    }
}
