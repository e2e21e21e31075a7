//! OAuth access-token provider with automatic refresh.
//!
//! Either hands out a fixed token, or exchanges a refresh token for access
//! tokens, caches the result in memory and renews it shortly before expiry.

use tokio::sync::Mutex;
use tracing::{debug, info};

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Where access tokens come from.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// A pre-issued access token, used as-is
    Static(String),
    /// OAuth2 refresh-token grant
    Refresh {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

/// Cached token with expiration.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        chrono::Utc::now() >= self.expires_at - chrono::Duration::minutes(5)
    }
}

#[derive(Debug)]
struct RefreshState {
    cached: Option<CachedToken>,
    refresh_token: String,
}

pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    source: TokenSource,
    state: Mutex<Option<RefreshState>>,
}

impl TokenManager {
    pub fn new(source: TokenSource) -> Self {
        Self::with_token_url(source, GOOGLE_TOKEN_URL)
    }

    pub fn with_token_url(source: TokenSource, token_url: impl Into<String>) -> Self {
        let state = match &source {
            TokenSource::Static(_) => None,
            TokenSource::Refresh { refresh_token, .. } => Some(RefreshState {
                cached: None,
                refresh_token: refresh_token.clone(),
            }),
        };
        Self {
            http: reqwest::Client::new(),
            token_url: token_url.into(),
            source,
            state: Mutex::new(state),
        }
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn get_valid_token(&self) -> anyhow::Result<String> {
        let (client_id, client_secret) = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Refresh {
                client_id,
                client_secret,
                ..
            } => (client_id, client_secret),
        };

        let mut guard = self.state.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("refresh state missing"))?;

        if let Some(cached) = &state.cached {
            if !cached.is_expired() {
                debug!("Token cache hit");
                return Ok(cached.access_token.clone());
            }
            debug!("Token expired, refreshing");
        }

        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", state.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("OAuth token refresh failed: {} {}", status, body);
        }

        #[derive(serde::Deserialize)]
        struct RefreshResponse {
            access_token: String,
            expires_in: u64,
            refresh_token: Option<String>,
        }

        let token_resp: RefreshResponse = resp.json().await?;
        let expires_at =
            chrono::Utc::now() + chrono::Duration::seconds(token_resp.expires_in as i64);

        // Google may rotate the refresh token
        if let Some(rotated) = token_resp.refresh_token {
            state.refresh_token = rotated;
        }
        state.cached = Some(CachedToken {
            access_token: token_resp.access_token.clone(),
            expires_at,
        });

        info!("Refreshed OAuth token, expires at {}", expires_at.to_rfc3339());
        Ok(token_resp.access_token)
    }
}
