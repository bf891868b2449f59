//! Fixed-token provider.
//!
//! Hands out a pre-obtained access token, or no token at all for emulators
//! that accept anonymous requests. There is no refresh logic.

use async_trait::async_trait;

use super::{TokenError, TokenProvider};

/// A token provider that returns a fixed token (or none).
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    /// Always hand out `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Send requests without an `Authorization` header.
    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self, _scopes: &[&str]) -> Result<Option<String>, TokenError> {
        Ok(self.token.clone())
    }
}
