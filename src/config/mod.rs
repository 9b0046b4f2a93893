pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl RouterConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults are
    /// used — the router then serves 503 for everything until the control
    /// plane is configured.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: RouterConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            RouterConfig::default()
        };

        config.apply_env_overrides();

        config.validate()?;
        tracing::info!("loaded router configuration");
        Ok(config)
    }

    /// Apply environment variable overrides for deployment settings.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OPENAPERTURE_HTTP_PORT") {
            if let Ok(n) = v.parse::<u16>() {
                self.http_port = n;
            }
        }
        if let Ok(v) = std::env::var("OPENAPERTURE_HTTP_ACCEPTORS") {
            if let Ok(n) = v.parse::<usize>() {
                self.http_acceptors = n;
            }
        }

        // Route server / control plane
        if let Ok(v) = std::env::var("OPENAPERTURE_ROUTE_SERVER_URL") {
            self.route_server.url = v;
        }
        if let Ok(v) = std::env::var("OPENAPERTURE_ROUTE_SERVER_TTL") {
            if let Ok(n) = v.parse::<u64>() {
                self.route_server.ttl_ms = n;
            }
        }
        if let Ok(v) = std::env::var("OPENAPERTURE_CLIENT_ID") {
            self.route_server.client_id = v;
        }
        if let Ok(v) = std::env::var("OPENAPERTURE_CLIENT_SECRET") {
            self.route_server.client_secret = v;
        }
        if let Ok(v) = std::env::var("OPENAPERTURE_OAUTH_URL") {
            self.route_server.oauth_url = v;
        }

        if let Ok(v) = std::env::var("OPENAPERTURE_OUTBOUND_PROXY") {
            if v.is_empty() {
                self.outbound_proxy = None;
            } else {
                self.outbound_proxy = Some(v);
            }
        }
        if let Ok(v) = std::env::var("OPENAPERTURE_TLS_VERIFY") {
            self.tls_verify = v == "true" || v == "1";
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.http_acceptors == 0 {
            anyhow::bail!("http_acceptors must be at least 1");
        }
        if self.route_server.ttl_ms == 0 {
            anyhow::bail!("route_server.ttl_ms must be positive");
        }
        if !self.route_server.url.is_empty()
            && !self.route_server.url.starts_with("http://")
            && !self.route_server.url.starts_with("https://")
        {
            anyhow::bail!("route_server.url must be an http(s) URL");
        }
        if let Some(ref proxy) = self.outbound_proxy {
            if !proxy.starts_with("http://") && !proxy.starts_with("https://") {
                anyhow::bail!("outbound_proxy must be an http(s) URL");
            }
        }
        let t = &self.timeouts;
        for (name, ms) in [
            ("connecting", t.connecting),
            ("sending_request_body", t.sending_request_body),
            ("waiting_for_response", t.waiting_for_response),
            ("receiving_response", t.receiving_response),
        ] {
            if ms == 0 {
                anyhow::bail!("timeouts.{} must be positive", name);
            }
        }
        Ok(())
    }
}
