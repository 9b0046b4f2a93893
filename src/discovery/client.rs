use crate::config::RouteServerConfig;
use crate::error::RouterError;
use crate::routing::Backend;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Route payload from `GET <route_server_url>[?updated_since=<t>]`.
///
/// The object is keyed by authority, with one non-authority sibling field:
/// `{"api.example.com:80": [{hostname, port, secure_connection}, ...],
///   "timestamp": 1690000000}`.
#[derive(Debug, Deserialize)]
pub struct RoutePayload {
    pub timestamp: u64,

    #[serde(flatten)]
    pub routes: HashMap<String, Vec<Backend>>,
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Obtains and caches the route-server bearer token via the OAuth
/// client-credentials grant. Tokens are reused until shortly before expiry.
pub struct TokenSource {
    client: reqwest::Client,
    oauth_url: String,
    basic_auth: String,
    cached: Mutex<Option<CachedToken>>,
}

/// Refresh this long before the reported expiry.
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(30);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

impl TokenSource {
    pub fn new(client: reqwest::Client, cfg: &RouteServerConfig) -> Self {
        let basic_auth = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", cfg.client_id, cfg.client_secret));
        Self {
            client,
            oauth_url: cfg.oauth_url.clone(),
            basic_auth,
            cached: Mutex::new(None),
        }
    }

    pub async fn bearer(&self) -> Result<String, RouterError> {
        let mut cached = self.cached.lock().await;
        if let Some(ref t) = *cached {
            if Instant::now() < t.expires_at {
                return Ok(t.token.clone());
            }
        }

        if self.oauth_url.is_empty() {
            return Err(RouterError::Auth("oauth_url is not configured".to_string()));
        }

        let resp = self
            .client
            .post(&self.oauth_url)
            .header("Authorization", format!("Basic {}", self.basic_auth))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(RouterError::Http)?;

        if !resp.status().is_success() {
            return Err(RouterError::Auth(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }

        let reply: TokenReply = resp.json().await.map_err(RouterError::Http)?;
        let lifetime = reply
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let expires_at = Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_SLACK);

        *cached = Some(CachedToken {
            token: reply.access_token.clone(),
            expires_at,
        });
        Ok(reply.access_token)
    }
}

/// HTTP client for the route-server control plane.
pub struct RouteServerClient {
    base_url: String,
    client: reqwest::Client,
    tokens: TokenSource,
}

impl RouteServerClient {
    pub fn new(cfg: &RouteServerConfig) -> Result<Self, RouterError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(RouterError::Http)?;

        Ok(Self {
            base_url: cfg.url.trim_end_matches('/').to_string(),
            tokens: TokenSource::new(client.clone(), cfg),
            client,
        })
    }

    async fn authed(&self, url: &str) -> Result<reqwest::RequestBuilder, RouterError> {
        let token = self.tokens.bearer().await?;
        Ok(self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", token)))
    }

    /// Fetch the full route table, or only the routes changed since `updated_since`.
    pub async fn fetch_routes(
        &self,
        updated_since: Option<u64>,
    ) -> Result<RoutePayload, RouterError> {
        let url = match updated_since {
            Some(t) => format!("{}?updated_since={}", self.base_url, t),
            None => self.base_url.clone(),
        };

        let resp = self
            .authed(&url)
            .await?
            .send()
            .await
            .map_err(RouterError::Http)?;

        if !resp.status().is_success() {
            return Err(RouterError::RouteRefresh(format!(
                "route server returned {} for {}",
                resp.status(),
                url
            )));
        }

        resp.json::<RoutePayload>().await.map_err(RouterError::Http)
    }

    /// Fetch the authorities deleted since `updated_since`.
    pub async fn fetch_deleted(&self, updated_since: u64) -> Result<Vec<String>, RouterError> {
        let url = format!("{}/deleted?updated_since={}", self.base_url, updated_since);

        let resp = self
            .authed(&url)
            .await?
            .send()
            .await
            .map_err(RouterError::Http)?;

        if !resp.status().is_success() {
            return Err(RouterError::RouteRefresh(format!(
                "route server returned {} for {}",
                resp.status(),
                url
            )));
        }

        resp.json::<Vec<String>>().await.map_err(RouterError::Http)
    }
}
