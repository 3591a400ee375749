use crate::comps::sources::execute;
use crate::comps::throttle::{CallResult, RequestMeta, SourceGuard};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Tokens are refreshed this long before eBay says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum EbayAuthError {
    #[error("missing ebay app credentials in env")]
    MissingCredentials,
    #[error("oauth request failed: {0}")]
    Request(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    7200
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Client-credentials application token, fetched lazily and reused until it
/// is close to expiry.
pub struct AppTokenProvider {
    http: Client,
    credentials: Option<(String, String)>,
    token_url: String,
    scopes: Vec<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl AppTokenProvider {
    pub fn new(
        http: Client,
        credentials: Option<(String, String)>,
        token_url: impl Into<String>,
        scopes: &[&str],
    ) -> Self {
        Self {
            http,
            credentials,
            token_url: token_url.into(),
            scopes: scopes.iter().map(|scope| scope.to_string()).collect(),
            cached: Mutex::new(None),
        }
    }

    /// Returns the cached token or fetches a new one. The token request goes
    /// through `guard`, so it is throttled and transient failures are retried.
    pub async fn bearer(&self, guard: &SourceGuard) -> Result<String, EbayAuthError> {
        let header = self.basic_auth_header()?;
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }

        let scope = self.scopes.join(" ");
        let params = [("grant_type", "client_credentials"), ("scope", scope.as_str())];
        let meta = RequestMeta::new(&self.token_url).header("Authorization", &header);
        let outcome = guard
            .call(&meta, || {
                execute(
                    self.http
                        .post(&self.token_url)
                        .header("Authorization", &header)
                        .form(&params),
                )
            })
            .await;
        let payload = parse_token(outcome)?;
        let lifetime = Duration::from_secs(payload.expires_in).saturating_sub(EXPIRY_MARGIN);
        debug!(
            target = "flipcheck.ebay",
            expires_in = payload.expires_in,
            "app_token_refreshed"
        );
        *cached = Some(CachedToken {
            value: payload.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(payload.access_token)
    }

    /// Drops the memoised token so the next call fetches a fresh one.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    fn basic_auth_header(&self) -> Result<String, EbayAuthError> {
        let (app_id, secret) = self
            .credentials
            .as_ref()
            .ok_or(EbayAuthError::MissingCredentials)?;
        Ok(format!("Basic {}", BASE64.encode(format!("{app_id}:{secret}"))))
    }
}

fn parse_token(outcome: CallResult) -> Result<TokenResponse, EbayAuthError> {
    let response = outcome.map_err(|err| EbayAuthError::Request(err.to_string()))?;
    if !response.is_success() {
        return Err(EbayAuthError::Request(format!("HTTP {}", response.status)));
    }
    serde_json::from_str(&response.body).map_err(|err| EbayAuthError::Request(err.to_string()))
}
