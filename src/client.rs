//! Client selection
//!
//! Turns [`FileSystemOptions`] into a [`BoundClient`]: credentials resolved
//! from the declared [`ClientType`], an optional endpoint override, and the
//! object store handle every file of one file system shares.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};
use yup_oauth2::authorized_user::AuthorizedUserSecret;
use yup_oauth2::ServiceAccountKey;

use crate::auth::metadata::{DEFAULT_METADATA_HOST, METADATA_HOST_ENV};
use crate::auth::{
    AuthorizedUserProvider, MetadataServerProvider, ServiceAccountProvider, SharedTokenProvider,
};
use crate::config::FileSystemOptions;
use crate::error::{GcsVfsError, Result};
use crate::store::gcs::{GcsStore, GcsStoreConfig};
use crate::store::ObjectStore;

/// Environment variable naming an application-default key file
pub const APPLICATION_CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Environment variable overriding the gcloud configuration directory
const CLOUDSDK_CONFIG_ENV: &str = "CLOUDSDK_CONFIG";

/// File name of the gcloud application-default credentials
const WELL_KNOWN_CREDENTIALS_FILE: &str = "application_default_credentials.json";

/// Credential acquisition strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientType {
    /// Ambient credentials discovered from the environment
    Application,
    /// An explicit service-account key
    StorageAccount,
    /// Instance metadata server credentials
    ComputeEngine,
}

impl ClientType {
    /// Numeric tag used in configuration
    pub fn tag(self) -> i64 {
        match self {
            ClientType::Application => 1,
            ClientType::StorageAccount => 2,
            ClientType::ComputeEngine => 3,
        }
    }

    pub fn from_tag(tag: i64) -> Result<Self> {
        match tag {
            1 => Ok(ClientType::Application),
            2 => Ok(ClientType::StorageAccount),
            3 => Ok(ClientType::ComputeEngine),
            other => Err(GcsVfsError::InvalidClientType(format!(
                "unknown client type {}",
                other
            ))),
        }
    }
}

/// Comparable identity of the credentials a client is bound to.
///
/// Two clients with equal identities can copy objects between each other
/// inside the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialIdentity {
    pub kind: ClientType,
    pub principal: String,
}

/// Resolved credentials
#[derive(Clone)]
pub enum Credentials {
    /// Service-account key found through application-default discovery
    Application(ServiceAccountKey),
    /// End-user refresh token found through application-default discovery
    AuthorizedUser(AuthorizedUserSecret),
    /// Service-account key supplied in the options
    ServiceAccount(ServiceAccountKey),
    /// Tokens from the instance metadata server
    ComputeEngine { metadata_host: String },
}

impl Credentials {
    pub fn kind(&self) -> ClientType {
        match self {
            Credentials::Application(_) | Credentials::AuthorizedUser(_) => ClientType::Application,
            Credentials::ServiceAccount(_) => ClientType::StorageAccount,
            Credentials::ComputeEngine { .. } => ClientType::ComputeEngine,
        }
    }

    pub fn identity(&self) -> CredentialIdentity {
        let principal = match self {
            Credentials::Application(key) | Credentials::ServiceAccount(key) => format!(
                "{}#{}",
                key.client_email,
                key.private_key_id.as_deref().unwrap_or_default()
            ),
            Credentials::AuthorizedUser(secret) => format!(
                "user:{}#{}",
                secret.client_id,
                refresh_token_fingerprint(&secret.refresh_token)
            ),
            Credentials::ComputeEngine { metadata_host } => format!("metadata:{}", metadata_host),
        };
        CredentialIdentity {
            kind: self.kind(),
            principal,
        }
    }

    /// The key used for URL signing, when there is one
    pub fn service_account_key(&self) -> Option<&ServiceAccountKey> {
        match self {
            Credentials::Application(key) | Credentials::ServiceAccount(key) => Some(key),
            Credentials::AuthorizedUser(_) | Credentials::ComputeEngine { .. } => None,
        }
    }

    /// Build the token provider for these credentials
    pub async fn token_provider(&self) -> Result<SharedTokenProvider> {
        match self {
            Credentials::Application(key) | Credentials::ServiceAccount(key) => {
                let provider = ServiceAccountProvider::from_key(key.clone())
                    .await
                    .map_err(|e| GcsVfsError::CredentialParse(e.to_string()))?;
                Ok(Arc::new(provider))
            }
            Credentials::AuthorizedUser(secret) => {
                let provider = AuthorizedUserProvider::from_secret(secret.clone())
                    .await
                    .map_err(|e| GcsVfsError::CredentialParse(e.to_string()))?;
                Ok(Arc::new(provider))
            }
            Credentials::ComputeEngine { metadata_host } => {
                Ok(Arc::new(MetadataServerProvider::new(metadata_host.clone())))
            }
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print private key material
        f.debug_struct("Credentials")
            .field("kind", &self.kind())
            .field("principal", &self.identity().principal)
            .finish()
    }
}

/// A storage client bound to credentials and an optional endpoint.
///
/// Created once per file system and shared read-only by all of its files.
#[derive(Clone)]
pub struct BoundClient {
    identity: Option<CredentialIdentity>,
    endpoint: Option<String>,
    store: Arc<dyn ObjectStore>,
}

impl BoundClient {
    /// Bind an existing store, e.g. an in-memory one
    pub fn new(
        identity: Option<CredentialIdentity>,
        endpoint: Option<String>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            identity,
            endpoint,
            store,
        }
    }

    pub fn identity(&self) -> Option<&CredentialIdentity> {
        self.identity.as_ref()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Whether objects can be copied between this client and `other`
    /// without moving bytes through the caller
    pub fn shares_credentials_with(&self, other: Option<&CredentialIdentity>) -> bool {
        matches!((self.identity.as_ref(), other), (Some(a), Some(b)) if a == b)
    }
}

impl fmt::Debug for BoundClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundClient")
            .field("identity", &self.identity)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Resolve credentials for the options' client type.
///
/// This is a one-shot call; nothing is retried or cached.
pub fn select_credentials(options: &FileSystemOptions) -> Result<Credentials> {
    let client_type = options.client_type.ok_or_else(|| {
        GcsVfsError::InvalidClientType("client type is mandatory to create a storage client".to_string())
    })?;

    match client_type {
        ClientType::StorageAccount => {
            let key = options
                .key
                .as_deref()
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    GcsVfsError::MissingCredential(
                        "storage account client requires key material".to_string(),
                    )
                })?;
            Ok(Credentials::ServiceAccount(parse_key(key)?))
        }
        ClientType::ComputeEngine => {
            let host = env::var(METADATA_HOST_ENV)
                .ok()
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
            validate_metadata_host(&host)?;
            Ok(Credentials::ComputeEngine {
                metadata_host: host,
            })
        }
        ClientType::Application => {
            let path = application_credentials_path().ok_or_else(|| {
                GcsVfsError::MissingCredential(format!(
                    "no application default credentials: set {} or run gcloud auth",
                    APPLICATION_CREDENTIALS_ENV
                ))
            })?;
            debug!("Using application default credentials from {:?}", path);
            let bytes = std::fs::read(&path).map_err(|e| {
                GcsVfsError::CredentialParse(format!("failed to read {:?}: {}", path, e))
            })?;
            parse_application_credentials(&bytes)
        }
    }
}

/// The endpoint a client should target.
///
/// Only the storage account kind honours the override.
pub fn effective_endpoint(credentials: &Credentials, options: &FileSystemOptions) -> Option<String> {
    match credentials.kind() {
        ClientType::StorageAccount => options.hostname.as_deref().map(normalize_endpoint),
        _ => {
            if options.hostname.is_some() {
                debug!(
                    "Ignoring hostname override for client type {:?}",
                    credentials.kind()
                );
            }
            None
        }
    }
}

/// Select credentials and bind a Cloud Storage client for them
pub async fn select(options: &FileSystemOptions) -> Result<BoundClient> {
    let credentials = select_credentials(options)?;
    let endpoint = effective_endpoint(&credentials, options);
    let token_provider = credentials.token_provider().await?;

    let store = GcsStore::new(GcsStoreConfig {
        endpoint: endpoint.clone(),
        token_provider,
        signing_key: credentials.service_account_key().cloned(),
    })?;

    let identity = credentials.identity();
    info!(
        "Bound storage client: kind={:?} principal={} endpoint={:?}",
        identity.kind, identity.principal, endpoint
    );

    Ok(BoundClient::new(Some(identity), endpoint, Arc::new(store)))
}

/// Add a scheme to a bare host name and drop trailing separators
pub fn normalize_endpoint(hostname: &str) -> String {
    let trimmed = hostname.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

fn parse_key(bytes: &[u8]) -> Result<ServiceAccountKey> {
    yup_oauth2::parse_service_account_key(bytes)
        .map_err(|e| GcsVfsError::CredentialParse(format!("invalid service account key: {}", e)))
}

/// `type` field shared by every credential file format
#[derive(Deserialize)]
struct CredentialFile {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Parse an application-default credentials file: a service-account key or
/// the authorized user written by `gcloud auth application-default login`
fn parse_application_credentials(bytes: &[u8]) -> Result<Credentials> {
    let file: CredentialFile = serde_json::from_slice(bytes)
        .map_err(|e| GcsVfsError::CredentialParse(format!("invalid credentials file: {}", e)))?;

    match file.kind.as_deref() {
        Some("authorized_user") => serde_json::from_slice::<AuthorizedUserSecret>(bytes)
            .map(Credentials::AuthorizedUser)
            .map_err(|e| {
                GcsVfsError::CredentialParse(format!("invalid authorized user credentials: {}", e))
            }),
        Some("service_account") | None => parse_key(bytes).map(Credentials::Application),
        Some(other) => Err(GcsVfsError::CredentialParse(format!(
            "unsupported credential type '{}'",
            other
        ))),
    }
}

/// Short digest that tells refresh tokens apart without revealing them
fn refresh_token_fingerprint(refresh_token: &str) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, refresh_token.as_bytes());
    hex::encode(&digest.as_ref()[..8])
}

fn validate_metadata_host(host: &str) -> Result<()> {
    let bare = host
        .strip_prefix("http://")
        .or_else(|| host.strip_prefix("https://"))
        .unwrap_or(host)
        .trim_end_matches('/');
    let valid = !bare.is_empty()
        && bare
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'));
    if valid {
        Ok(())
    } else {
        Err(GcsVfsError::CredentialParse(format!(
            "invalid metadata server host '{}'",
            host
        )))
    }
}

fn application_credentials_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(APPLICATION_CREDENTIALS_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }

    let config_dir = match env::var_os(CLOUDSDK_CONFIG_ENV).filter(|p| !p.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None if cfg!(windows) => PathBuf::from(env::var_os("APPDATA")?).join("gcloud"),
        None => PathBuf::from(env::var_os("HOME")?).join(".config").join("gcloud"),
    };

    let path = config_dir.join(WELL_KNOWN_CREDENTIALS_FILE);
    path.is_file().then_some(path)
}
