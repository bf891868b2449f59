use std::io;
use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for gcs-vfs operations
#[derive(Error, Debug)]
pub enum GcsVfsError {
    #[error("Malformed path: {0}")]
    MalformedPath(String),

    #[error("Bucket {0} does not exist")]
    ContainerNotFound(String),

    #[error("No suitable client type found to create storage client: {0}")]
    InvalidClientType(String),

    #[error("Credential not found: {0}")]
    MissingCredential(String),

    #[error("Failed to parse credential: {0}")]
    CredentialParse(String),

    #[error("Cannot copy {0}: source does not exist")]
    SourceMissing(String),

    #[error("Failed to copy {source_uri} to {destination_uri}: {cause}")]
    CopyFailed {
        source_uri: String,
        destination_uri: String,
        #[source]
        cause: Box<GcsVfsError>,
    },

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Not a folder: {0}")]
    NotAFolder(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GcsVfsError {
    /// Wrap a failure that happened while copying one file
    pub fn copy_failed(
        source_uri: impl Into<String>,
        destination_uri: impl Into<String>,
        cause: GcsVfsError,
    ) -> Self {
        GcsVfsError::CopyFailed {
            source_uri: source_uri.into(),
            destination_uri: destination_uri.into(),
            cause: Box::new(cause),
        }
    }

    /// Errors raised while building a file system; no partial file system survives them
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            GcsVfsError::InvalidClientType(_)
                | GcsVfsError::MissingCredential(_)
                | GcsVfsError::CredentialParse(_)
                | GcsVfsError::Config(_)
        )
    }
}

/// Result type alias for gcs-vfs operations
pub type Result<T> = std::result::Result<T, GcsVfsError>;
