//! gcs-vfs: a hierarchical file-system view over Google Cloud Storage
//!
//! Buckets are flat key/value stores; this library presents them as trees of
//! files and folders addressed by `gcs://<bucket>/<key...>` URIs.
//!
//! # Architecture
//!
//! - **Names** ([`name`]): parsing and normalizing URIs into immutable
//!   [`name::ResourceName`] values.
//! - **Client selection** ([`client`]): binding credentials (application
//!   default, service-account key, or instance metadata) and an optional
//!   endpoint into a [`client::BoundClient`].
//! - **Object stores** ([`store`]): the flat backend API, implemented for
//!   Cloud Storage and in memory.
//! - **File system** ([`vfs`]): type resolution, listing, content access and
//!   copying on top of a store.
//!
//! # Example
//!
//! ```no_run
//! use gcs_vfs::client::ClientType;
//! use gcs_vfs::config::FileSystemOptions;
//! use gcs_vfs::vfs::{FileType, GcsFileProvider};
//!
//! # async fn example() -> gcs_vfs::Result<()> {
//! let provider = GcsFileProvider::new();
//! let options = FileSystemOptions::new(ClientType::ComputeEngine);
//!
//! let mut file = provider.resolve_file("gcs://npd-test/docs", &options).await?;
//! if file.file_type().await? == FileType::Folder {
//!     for child in file.list_children().await? {
//!         println!("{}", child);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod env;
pub mod error;
pub mod name;
pub mod store;
pub mod vfs;

pub use error::{GcsVfsError, Result};
