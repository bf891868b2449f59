//! Instance metadata server token provider.
//!
//! On compute instances the metadata server hands out tokens for the
//! instance's default service account. Tokens are cached and refreshed
//! shortly before they expire.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::time::Instant;

use super::{TokenError, TokenProvider};

/// Default metadata server host
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

/// Environment variable overriding the metadata server host
pub const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";

/// Path of the default service account token endpoint
const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh this many seconds before the token expires
const EXPIRY_BUFFER_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    fetched_at: Instant,
    expires_in_secs: u64,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        let elapsed = self.fetched_at.elapsed().as_secs();
        elapsed < self.expires_in_secs.saturating_sub(EXPIRY_BUFFER_SECS)
    }
}

/// Fetches tokens from the instance metadata server.
pub struct MetadataServerProvider {
    host: String,
    client: reqwest::Client,
    cached_token: RwLock<Option<CachedToken>>,
}

impl MetadataServerProvider {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            client: reqwest::Client::new(),
            cached_token: RwLock::new(None),
        }
    }

    /// Metadata host configured for this provider
    pub fn host(&self) -> &str {
        &self.host
    }

    fn token_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}{}", self.host.trim_end_matches('/'), TOKEN_PATH)
        } else {
            format!("http://{}{}", self.host, TOKEN_PATH)
        }
    }

    async fn fetch_token(&self, scopes: &[&str]) -> Result<(String, u64), TokenError> {
        let mut request = self
            .client
            .get(self.token_url())
            .header("Metadata-Flavor", "Google");
        if !scopes.is_empty() {
            request = request.query(&[("scopes", scopes.join(","))]);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Metadata server returned error {}: {}", status, body).into());
        }

        let token_response: TokenResponse = response.json().await?;
        let expires_in = token_response.expires_in.unwrap_or(3600);

        Ok((token_response.access_token, expires_in))
    }
}

#[async_trait]
impl TokenProvider for MetadataServerProvider {
    async fn get_token(&self, scopes: &[&str]) -> Result<Option<String>, TokenError> {
        {
            let cache = self.cached_token.read();
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(Some(cached.token.clone()));
                }
            }
        }

        let (token, expires_in) = self.fetch_token(scopes).await?;

        *self.cached_token.write() = Some(CachedToken {
            token: token.clone(),
            fetched_at: Instant::now(),
            expires_in_secs: expires_in,
        });

        Ok(Some(token))
    }
}
