//! Client-credentials tokens for Azure Resource Manager.

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{Error, Result, config::AzureConfig};

/// Tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Clone)]
struct AccessToken {
    secret: String,
    expires_at: DateTime<Utc>,
}

/// Service principal token source with an in-memory cache.
pub struct AzureCredential {
    http: Client,
    token_url: String,
    scope: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<AccessToken>>,
}

impl AzureCredential {
    pub fn new(http: Client, config: &AzureConfig) -> Self {
        Self {
            http,
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                config.authority_host.trim_end_matches('/'),
                config.tenant_id
            ),
            scope: format!(
                "{}/.default",
                config.resource_manager_endpoint.trim_end_matches('/')
            ),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            cached: Mutex::new(None),
        }
    }

    /// A bearer token valid for at least the refresh margin.
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached
            .as_ref()
            .filter(|t| t.expires_at - TimeDelta::seconds(REFRESH_MARGIN_SECS) > now)
        {
            return Ok(token.secret.clone());
        }

        tracing::debug!(url = %self.token_url, "Requesting access token");
        let token = self.request_token(now).await?;
        let secret = token.secret.clone();
        *cached = Some(token);
        Ok(secret)
    }

    async fn request_token(&self, now: DateTime<Utc>) -> Result<AccessToken> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Credential(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Credential(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Credential(format!("malformed token response: {e}")))?;

        let expires_at = TimeDelta::try_seconds(token.expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                Error::Credential(format!(
                    "token lifetime out of range: {}s",
                    token.expires_in
                ))
            })?;

        Ok(AccessToken {
            secret: token.access_token,
            expires_at,
        })
    }
}
