//! Hierarchical file-system view over a flat object store
//!
//! - [`GcsFileProvider`] parses URIs and hands out files, creating one
//!   [`GcsFileSystem`] per bucket root and client binding and reusing it
//!   afterwards.
//! - [`GcsFileSystem`] owns the bound client and the options of one root.
//! - [`GcsFile`] is a node; it resolves its type lazily and caches the
//!   backend object it is attached to.
//!
//! Folders are emulated: a path is a folder when keys exist under its
//! listing prefix, or when a `key/` marker object exists.

pub mod copy;
pub mod file;
pub mod local;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::client::{self, BoundClient, CredentialIdentity};
use crate::config::FileSystemOptions;
use crate::error::{GcsVfsError, Result};
use crate::name::{self, ResourceName};
use crate::store::ObjectStore;

pub use copy::{CopyMode, CopyProgress, CopySource, Selector};
pub use file::{FileWriter, GcsFile};
pub use local::LocalFile;

/// Default URI scheme
pub const DEFAULT_SCHEME: &str = "gcs";

/// Resolved type of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    File,
    Folder,
    /// Neither an object nor a prefix; not created yet
    Imaginary,
}

impl FileType {
    pub fn has_content(self) -> bool {
        matches!(self, FileType::File)
    }

    pub fn has_children(self) -> bool {
        matches!(self, FileType::Folder)
    }
}

/// Operations the file system offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    GetType,
    ReadContent,
    /// Accepted, but writes always replace the object
    AppendContent,
    ListChildren,
    DirectoryReadContent,
    GetLastModified,
    SetLastModified,
    CreateFile,
    Delete,
    Uri,
    Attributes,
    RandomAccessRead,
    SignedUrl,
}

const CAPABILITIES: &[Capability] = &[
    Capability::GetType,
    Capability::ReadContent,
    Capability::AppendContent,
    Capability::ListChildren,
    Capability::DirectoryReadContent,
    Capability::GetLastModified,
    Capability::SetLastModified,
    Capability::CreateFile,
    Capability::Delete,
    Capability::Uri,
    Capability::Attributes,
    Capability::RandomAccessRead,
    Capability::SignedUrl,
];

/// All files under one bucket root, sharing one bound client
#[derive(Debug)]
pub struct GcsFileSystem {
    root: ResourceName,
    client: BoundClient,
    options: FileSystemOptions,
}

impl GcsFileSystem {
    pub fn new(root: ResourceName, client: BoundClient, options: FileSystemOptions) -> Arc<Self> {
        info!(
            "Created file system {} (client={:?}, cmk={:?})",
            root.root_uri(),
            client.identity().map(|i| &i.principal),
            options.cmk_id
        );
        Arc::new(Self {
            root,
            client,
            options,
        })
    }

    pub fn root(&self) -> &ResourceName {
        &self.root
    }

    pub fn client(&self) -> &BoundClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        self.client.store()
    }

    pub fn options(&self) -> &FileSystemOptions {
        &self.options
    }

    /// Encryption key applied to created objects
    pub fn cmk_id(&self) -> Option<&str> {
        self.options.cmk_id.as_deref()
    }

    /// A node for `name`, which must live under this file system's root
    pub fn file(self: &Arc<Self>, name: ResourceName) -> Result<GcsFile> {
        if name.root_uri() != self.root.root_uri() {
            return Err(GcsVfsError::MalformedPath(format!(
                "{} is not inside {}",
                name,
                self.root.root_uri()
            )));
        }
        Ok(GcsFile::new(self.clone(), name))
    }

    /// A node for `path`, resolved against the root
    pub fn resolve(self: &Arc<Self>, path: &str) -> Result<GcsFile> {
        self.file(name::derive(&self.root, path)?)
    }
}

/// How the client of a cached file system was obtained
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Binding {
    /// Selected from the options
    Selected,
    /// Supplied by the caller, compared by credential identity
    Supplied(Option<CredentialIdentity>),
}

/// Everything that distinguishes one file system from another
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FileSystemKey {
    root_uri: String,
    options: FileSystemOptions,
    binding: Binding,
}

impl FileSystemKey {
    fn new(name: &ResourceName, options: &FileSystemOptions, binding: Binding) -> Self {
        Self {
            root_uri: name.root_uri(),
            options: options.clone(),
            binding,
        }
    }
}

/// Entry point: turns URIs into files
pub struct GcsFileProvider {
    scheme: String,
    file_systems: Mutex<HashMap<FileSystemKey, Arc<GcsFileSystem>>>,
}

impl Default for GcsFileProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GcsFileProvider {
    pub fn new() -> Self {
        Self::with_scheme(DEFAULT_SCHEME)
    }

    pub fn with_scheme(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            file_systems: Mutex::new(HashMap::new()),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    /// Resolve `uri`, binding a client from `options` the first time this
    /// bucket is seen with these options
    pub async fn resolve_file(&self, uri: &str, options: &FileSystemOptions) -> Result<GcsFile> {
        let name = self.parse(uri)?;
        let key = FileSystemKey::new(&name, options, Binding::Selected);
        if let Some(fs) = self.cached(&key) {
            return fs.file(name);
        }

        let client = client::select(options).await?;
        let fs = self.insert(key, &name, client, options)?;
        fs.file(name)
    }

    /// Resolve `uri` against an already bound client, e.g. one over an
    /// in-memory store
    pub fn resolve_with_client(
        &self,
        uri: &str,
        client: BoundClient,
        options: &FileSystemOptions,
    ) -> Result<GcsFile> {
        let name = self.parse(uri)?;
        let binding = Binding::Supplied(client.identity().cloned());
        let key = FileSystemKey::new(&name, options, binding);
        if let Some(fs) = self.cached(&key) {
            return fs.file(name);
        }
        let fs = self.insert(key, &name, client, options)?;
        fs.file(name)
    }

    /// File systems already created for `uri`'s bucket
    pub fn file_systems(&self, uri: &str) -> Result<Vec<Arc<GcsFileSystem>>> {
        let root_uri = self.parse(uri)?.root_uri();
        Ok(self
            .file_systems
            .lock()
            .iter()
            .filter(|(key, _)| key.root_uri == root_uri)
            .map(|(_, fs)| fs.clone())
            .collect())
    }

    fn parse(&self, uri: &str) -> Result<ResourceName> {
        let name = name::parse(uri)?;
        if name.scheme() != self.scheme {
            return Err(GcsVfsError::MalformedPath(format!(
                "{}: expected scheme '{}'",
                uri, self.scheme
            )));
        }
        Ok(name)
    }

    fn cached(&self, key: &FileSystemKey) -> Option<Arc<GcsFileSystem>> {
        self.file_systems.lock().get(key).cloned()
    }

    fn insert(
        &self,
        key: FileSystemKey,
        name: &ResourceName,
        client: BoundClient,
        options: &FileSystemOptions,
    ) -> Result<Arc<GcsFileSystem>> {
        let root = ResourceName::root(name.scheme(), name.bucket())?;
        let mut file_systems = self.file_systems.lock();
        // A concurrent resolution may have won the race; keep the first one
        let fs = file_systems
            .entry(key)
            .or_insert_with(|| GcsFileSystem::new(root, client, options.clone()))
            .clone();
        debug!("File systems cached: {}", file_systems.len());
        Ok(fs)
    }
}
