//! Authorized user token provider.
//!
//! Refresh-token credentials written by `gcloud auth application-default
//! login`; the authenticator exchanges the refresh token as needed.

use async_trait::async_trait;
use yup_oauth2::authorized_user::AuthorizedUserSecret;
use yup_oauth2::AuthorizedUserAuthenticator;

use super::service_account::Authenticator;
use super::{TokenError, TokenProvider};

/// A token provider backed by an end user's refresh token.
pub struct AuthorizedUserProvider {
    auth: Authenticator,
}

impl AuthorizedUserProvider {
    pub async fn from_secret(secret: AuthorizedUserSecret) -> Result<Self, TokenError> {
        let auth = AuthorizedUserAuthenticator::builder(secret).build().await?;
        Ok(Self { auth })
    }
}

#[async_trait]
impl TokenProvider for AuthorizedUserProvider {
    async fn get_token(&self, scopes: &[&str]) -> Result<Option<String>, TokenError> {
        let token = self.auth.token(scopes).await?;
        Ok(token.token().map(|t| t.to_string()))
    }
}
