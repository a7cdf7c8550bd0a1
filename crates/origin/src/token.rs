//! Bearer token acquisition.

use crate::error::{OriginError, OriginResult};
use async_trait::async_trait;
use serde::Deserialize;
use tessera_core::config::GoogleDriveConfig;
use tracing::{debug, instrument, warn};

/// Short-lived bearer token for origin API calls. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BearerToken").field(&"<redacted>").finish()
    }
}

/// Source of bearer tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// Acquire a fresh token, or `None` if the exchange failed for any reason.
    async fn access_token(&self) -> Option<BearerToken>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchanges a long-lived refresh token for an access token on every call.
pub struct RefreshTokenProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

impl std::fmt::Debug for RefreshTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenProvider")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl RefreshTokenProvider {
    pub fn new(http: reqwest::Client, config: &GoogleDriveConfig) -> Self {
        Self {
            http,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
        }
    }

    async fn exchange(&self) -> OriginResult<BearerToken> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", self.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self.http.post(&self.token_url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OriginError::Status {
                status: status.as_u16(),
                url: self.token_url.clone(),
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| OriginError::InvalidResponse(format!("token response: {e}")))?;
        if body.access_token.is_empty() {
            return Err(OriginError::InvalidResponse(
                "token response has an empty access_token".to_string(),
            ));
        }

        Ok(BearerToken(body.access_token))
    }
}

#[async_trait]
impl TokenProvider for RefreshTokenProvider {
    #[instrument(skip(self), fields(token_url = %self.token_url))]
    async fn access_token(&self) -> Option<BearerToken> {
        match self.exchange().await {
            Ok(token) => {
                debug!("Acquired origin access token");
                Some(token)
            }
            Err(e) => {
                warn!(error = %e, "Origin token exchange failed");
                None
            }
        }
    }
}
