//! Service account token provider.
//!
//! Wraps yup_oauth2's ServiceAccountAuthenticator; token refresh is handled
//! by the authenticator.

use async_trait::async_trait;
use hyper_util::client::legacy::connect::HttpConnector;
use yup_oauth2::{ServiceAccountAuthenticator, ServiceAccountKey};

use super::{TokenError, TokenProvider};

pub(crate) type Authenticator =
    yup_oauth2::authenticator::Authenticator<hyper_rustls::HttpsConnector<HttpConnector>>;

/// A token provider backed by a service-account key.
pub struct ServiceAccountProvider {
    auth: Authenticator,
}

impl ServiceAccountProvider {
    /// Create a provider from an already parsed key.
    pub async fn from_key(key: ServiceAccountKey) -> Result<Self, TokenError> {
        let auth = ServiceAccountAuthenticator::builder(key).build().await?;
        Ok(Self { auth })
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountProvider {
    async fn get_token(&self, scopes: &[&str]) -> Result<Option<String>, TokenError> {
        let token = self.auth.token(scopes).await?;
        Ok(token.token().map(|t| t.to_string()))
    }
}
