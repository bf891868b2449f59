//! Configuration parsing and structures
//!
//! [`FileSystemOptions`] is the value every file system is built from. The
//! YAML [`Config`] used by the command-line tool resolves into one.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::client::ClientType;
use crate::env::substitute_env_vars;

/// Default lifetime of signed URLs handed out by the CLI
const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(15 * 60);

// =============================================================================
// File system options
// =============================================================================

/// Options recognised when creating a file system.
///
/// Set once per file system and never changed afterwards. Equal options on
/// the same bucket share one file system.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct FileSystemOptions {
    /// Credential strategy; required
    pub client_type: Option<ClientType>,
    /// Service-account key material; required for [`ClientType::StorageAccount`]
    pub key: Option<Vec<u8>>,
    /// Endpoint override; honoured for [`ClientType::StorageAccount`] only
    pub hostname: Option<String>,
    /// Customer-managed encryption key applied to every created object
    pub cmk_id: Option<String>,
}

impl FileSystemOptions {
    pub fn new(client_type: ClientType) -> Self {
        Self {
            client_type: Some(client_type),
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_cmk_id(mut self, cmk_id: impl Into<String>) -> Self {
        self.cmk_id = Some(cmk_id.into());
        self
    }
}

impl fmt::Debug for FileSystemOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystemOptions")
            .field("client_type", &self.client_type)
            .field("key", &self.key.as_ref().map(|k| format!("<{} bytes>", k.len())))
            .field("hostname", &self.hostname)
            .field("cmk_id", &self.cmk_id)
            .finish()
    }
}

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// File system options
    pub filesystem: RawFileSystemConfig,
}

/// File system section before resolution
#[derive(Debug, Clone, Deserialize)]
pub struct RawFileSystemConfig {
    /// Numeric client type tag (1 = application, 2 = storage account, 3 = compute engine)
    pub client_type: i64,

    /// Path to a service-account key file
    pub key_path: Option<String>,

    /// Inline service-account key JSON
    pub key: Option<String>,

    /// Endpoint override
    pub hostname: Option<String>,

    /// Customer-managed encryption key name
    pub cmk_id: Option<String>,

    /// Lifetime of signed URLs (e.g., "15m", "1h")
    #[serde(default)]
    #[serde(with = "humantime_serde")]
    pub signed_url_ttl: Option<Duration>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Options for every file system the tool creates
    pub options: FileSystemOptions,

    /// Lifetime of signed URLs
    pub signed_url_ttl: Duration,
}

impl RawConfig {
    /// Resolve raw config: expand `${VAR}` references, load key material and
    /// map the client type tag.
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            filesystem,
        } = self;

        let client_type = ClientType::from_tag(filesystem.client_type).map_err(|_| {
            ConfigError::ValidationError(format!(
                "Unknown client_type {} (expected 1, 2 or 3)",
                filesystem.client_type
            ))
        })?;

        if filesystem.key.is_some() && filesystem.key_path.is_some() {
            return Err(ConfigError::ValidationError(
                "Specify either key or key_path, not both".to_string(),
            ));
        }

        let key = match (filesystem.key, filesystem.key_path) {
            (Some(inline), _) => Some(substitute_env_vars(&inline)?.into_bytes()),
            (None, Some(path)) => {
                let path = PathBuf::from(substitute_env_vars(&path)?);
                let bytes = std::fs::read(&path)
                    .map_err(|e| ConfigError::ReadError(path.clone(), e.to_string()))?;
                Some(bytes)
            }
            (None, None) => None,
        };

        let hostname = filesystem
            .hostname
            .map(|h| substitute_env_vars(&h))
            .transpose()?;
        let cmk_id = filesystem
            .cmk_id
            .map(|c| substitute_env_vars(&c))
            .transpose()?;

        Ok(Config {
            logging,
            options: FileSystemOptions {
                client_type: Some(client_type),
                key,
                hostname,
                cmk_id,
            },
            signed_url_ttl: filesystem.signed_url_ttl.unwrap_or(DEFAULT_SIGNED_URL_TTL),
        })
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.clone(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        raw.resolve()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.options.client_type == Some(ClientType::StorageAccount)
            && self.options.key.as_ref().map_or(true, |k| k.is_empty())
        {
            return Err(ConfigError::ValidationError(
                "client_type 2 (storage account) requires key or key_path".to_string(),
            ));
        }

        if matches!(&self.options.hostname, Some(h) if h.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "hostname cannot be empty".to_string(),
            ));
        }

        if self.signed_url_ttl.as_secs() == 0 {
            return Err(ConfigError::ValidationError(
                "signed_url_ttl must be at least one second".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
