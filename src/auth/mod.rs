//! Access-token providers for the Cloud Storage backend
//!
//! Each credential kind the client selector can bind maps onto one provider:
//! - Service account keys (key file or application-default file)
//! - Authorized user refresh tokens (gcloud application-default login)
//! - The instance metadata server (compute engine)
//! - Static or anonymous tokens (emulators, tests)

pub mod authorized_user;
pub mod metadata;
pub mod service_account;
pub mod static_token;

use async_trait::async_trait;
use std::error::Error as StdError;
use std::sync::Arc;

pub use authorized_user::AuthorizedUserProvider;
pub use metadata::MetadataServerProvider;
pub use service_account::ServiceAccountProvider;
pub use static_token::StaticTokenProvider;

/// OAuth scope granting read/write access to buckets and objects
pub const DEVSTORAGE_FULL_CONTROL: &str = "https://www.googleapis.com/auth/devstorage.full_control";

/// Error type returned by token providers
pub type TokenError = Box<dyn StdError + Send + Sync>;

/// Source of bearer tokens for storage requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get a token for the given scopes.
    ///
    /// Returns `Ok(Some(token))` if a token is available,
    /// `Ok(None)` if requests should go out unauthenticated,
    /// or `Err` if token fetching failed.
    async fn get_token(&self, scopes: &[&str]) -> Result<Option<String>, TokenError>;
}

/// Shared handle to a token provider
pub type SharedTokenProvider = Arc<dyn TokenProvider>;
