//! Object store abstraction
//!
//! The file-system layer never talks to a storage service directly; it goes
//! through [`ObjectStore`], a flat, key-addressed API with no notion of
//! directories. [`gcs::GcsStore`] talks to Cloud Storage and
//! [`memory::MemoryStore`] keeps everything in process.

pub mod gcs;
pub mod memory;
pub mod signing;

use std::pin::Pin;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::Result;

/// Chunk size for reads and resumable uploads (32 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024 * 1024;

/// Identity of an object: bucket plus key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub bucket: String,
    pub key: String,
}

impl ObjectId {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub id: ObjectId,
    pub size: u64,
    pub updated: SystemTime,
    /// Backend generation; changes whenever the object is rewritten
    pub generation: i64,
    pub content_type: Option<String>,
    pub kms_key_name: Option<String>,
}

/// One entry of a prefix listing
#[derive(Debug, Clone, PartialEq)]
pub enum ListEntry {
    /// A real object
    Object(ObjectMeta),
    /// A synthetic `prefix/child/` entry standing for deeper keys
    Prefix(String),
}

impl ListEntry {
    /// Full key of the entry
    pub fn name(&self) -> &str {
        match self {
            ListEntry::Object(meta) => &meta.id.key,
            ListEntry::Prefix(prefix) => prefix,
        }
    }
}

/// A page of listing results
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<ListEntry>,
    pub next_page_token: Option<String>,
}

/// Description of an object to create or upload
#[derive(Debug, Clone, PartialEq)]
pub struct NewObject {
    pub id: ObjectId,
    pub content_type: Option<String>,
    /// Customer-managed encryption key to associate with the object
    pub kms_key_name: Option<String>,
    /// Upload chunk size for writers
    pub chunk_size: usize,
}

impl NewObject {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            content_type: None,
            kms_key_name: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_kms_key(mut self, kms_key_name: Option<String>) -> Self {
        self.kms_key_name = kms_key_name;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Stream of object content chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Sequential writer for one object.
///
/// Nothing is visible to readers until [`ObjectWriter::close`] succeeds.
/// Dropping a writer without closing it abandons the upload.
#[async_trait]
pub trait ObjectWriter: Send {
    /// Append bytes to the object
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Finish the upload and return the stored object
    async fn close(self: Box<Self>) -> Result<ObjectMeta>;
}

/// Flat object storage backend
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check whether a bucket exists
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Fetch object metadata; `None` if no object has exactly this key
    async fn get(&self, id: &ObjectId) -> Result<Option<ObjectMeta>>;

    /// List keys starting with `prefix`.
    ///
    /// With `delimited` set, only one level is returned: objects directly
    /// under the prefix plus a [`ListEntry::Prefix`] for each deeper sub-path.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimited: bool,
        page_token: Option<&str>,
    ) -> Result<ListPage>;

    /// Create an object with the given content, replacing any existing one
    async fn create(&self, object: &NewObject, data: Bytes) -> Result<ObjectMeta>;

    /// Open a chunked writer that replaces the object when closed
    async fn open_writer(&self, object: &NewObject) -> Result<Box<dyn ObjectWriter>>;

    /// Read object content in chunks of at most `chunk_size` bytes
    fn read(&self, id: &ObjectId, chunk_size: usize) -> ByteStream;

    /// Read up to `len` bytes starting at `offset`; empty past the end
    async fn read_range(&self, id: &ObjectId, offset: u64, len: u64) -> Result<Bytes>;

    /// Delete an object; returns false if it did not exist
    async fn delete(&self, id: &ObjectId) -> Result<bool>;

    /// Copy an object inside the backend, without moving bytes through the caller
    async fn copy(
        &self,
        source: &ObjectId,
        destination: &ObjectId,
        kms_key_name: Option<&str>,
    ) -> Result<ObjectMeta>;

    /// Produce a time-limited URL granting direct read access
    async fn sign_url(&self, id: &ObjectId, ttl: Duration) -> Result<String>;
}
