//! In-memory object store
//!
//! Keeps buckets and objects in process and reproduces the listing behavior
//! of Cloud Storage, including one-level "current directory" listings with
//! synthetic prefix entries. Payload counters let callers check how many
//! bytes actually moved through the store's read and write paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use tracing::trace;

use super::{
    ByteStream, ListEntry, ListPage, NewObject, ObjectId, ObjectMeta, ObjectStore, ObjectWriter,
};
use crate::error::{GcsVfsError, Result};

/// Default number of entries per listing page
const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    meta: ObjectMeta,
    data: Bytes,
}

#[derive(Default)]
struct MemoryState {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
    generation: AtomicI64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    server_side_copies: AtomicU64,
}

impl MemoryState {
    fn store(&self, object: &NewObject, data: Bytes) -> Result<ObjectMeta> {
        let mut buckets = self.buckets.write();
        let bucket = buckets.get_mut(&object.id.bucket).ok_or_else(|| {
            GcsVfsError::NotFound(format!("bucket {}", object.id.bucket))
        })?;

        let meta = ObjectMeta {
            id: object.id.clone(),
            size: data.len() as u64,
            updated: SystemTime::now(),
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            content_type: object.content_type.clone(),
            kms_key_name: object.kms_key_name.clone(),
        };

        self.bytes_written
            .fetch_add(data.len() as u64, Ordering::SeqCst);
        bucket.insert(
            object.id.key.clone(),
            StoredObject {
                meta: meta.clone(),
                data,
            },
        );
        Ok(meta)
    }
}

/// Transfer counters of a [`MemoryStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub server_side_copies: u64,
}

/// Object store kept entirely in memory
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<MemoryState>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MemoryState::default()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Limit listing pages to `page_size` entries
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create an empty bucket (no-op if it exists)
    pub fn create_bucket(&self, bucket: &str) {
        self.state
            .buckets
            .write()
            .entry(bucket.to_string())
            .or_default();
    }

    /// Builder form of [`MemoryStore::create_bucket`]
    pub fn with_bucket(self, bucket: &str) -> Self {
        self.create_bucket(bucket);
        self
    }

    /// Store an object directly, bypassing the transfer counters
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> Result<ObjectMeta> {
        let meta = self
            .state
            .store(&NewObject::new(ObjectId::new(bucket, key)), data.into())?;
        self.state
            .bytes_written
            .fetch_sub(meta.size, Ordering::SeqCst);
        Ok(meta)
    }

    /// Content of an object, if present
    pub fn object_data(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state
            .buckets
            .read()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|stored| stored.data.clone())
    }

    /// Metadata of an object, if present
    pub fn object_meta(&self, bucket: &str, key: &str) -> Option<ObjectMeta> {
        self.state
            .buckets
            .read()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|stored| stored.meta.clone())
    }

    /// All keys of a bucket, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state
            .buckets
            .read()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> TransferStats {
        TransferStats {
            bytes_read: self.state.bytes_read.load(Ordering::SeqCst),
            bytes_written: self.state.bytes_written.load(Ordering::SeqCst),
            server_side_copies: self.state.server_side_copies.load(Ordering::SeqCst),
        }
    }

    /// Build every listing entry for a prefix, in key order
    fn collect_entries(
        objects: &BTreeMap<String, StoredObject>,
        prefix: &str,
        delimited: bool,
    ) -> Vec<ListEntry> {
        let mut entries = Vec::new();
        let mut last_prefix: Option<String> = None;

        for (key, stored) in objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };

            if delimited {
                if let Some(idx) = rest.find('/') {
                    let synthetic = format!("{}{}", prefix, &rest[..=idx]);
                    // Keys sharing a sub-prefix are contiguous in key order
                    if last_prefix.as_deref() != Some(synthetic.as_str()) {
                        last_prefix = Some(synthetic.clone());
                        entries.push(ListEntry::Prefix(synthetic));
                    }
                    continue;
                }
            }

            entries.push(ListEntry::Object(stored.meta.clone()));
        }

        entries
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.state.buckets.read().contains_key(bucket))
    }

    async fn get(&self, id: &ObjectId) -> Result<Option<ObjectMeta>> {
        trace!("memory get: {}", id);
        Ok(self.object_meta(&id.bucket, &id.key))
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimited: bool,
        page_token: Option<&str>,
    ) -> Result<ListPage> {
        trace!(
            "memory list: bucket={} prefix={:?} delimited={} token={:?}",
            bucket,
            prefix,
            delimited,
            page_token
        );

        let entries = {
            let buckets = self.state.buckets.read();
            let objects = buckets
                .get(bucket)
                .ok_or_else(|| GcsVfsError::NotFound(format!("bucket {}", bucket)))?;
            Self::collect_entries(objects, prefix, delimited)
        };

        let start = match page_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                GcsVfsError::Backend(format!("invalid page token '{}'", token))
            })?,
            None => 0,
        };
        let end = (start + self.page_size).min(entries.len());
        let next_page_token = if end < entries.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(ListPage {
            entries: entries.get(start..end).map(|s| s.to_vec()).unwrap_or_default(),
            next_page_token,
        })
    }

    async fn create(&self, object: &NewObject, data: Bytes) -> Result<ObjectMeta> {
        trace!("memory create: {} ({} bytes)", object.id, data.len());
        self.state.store(object, data)
    }

    async fn open_writer(&self, object: &NewObject) -> Result<Box<dyn ObjectWriter>> {
        if !self.bucket_exists(&object.id.bucket).await? {
            return Err(GcsVfsError::NotFound(format!("bucket {}", object.id.bucket)));
        }
        Ok(Box::new(MemoryWriter {
            state: self.state.clone(),
            object: object.clone(),
            buffer: BytesMut::new(),
        }))
    }

    fn read(&self, id: &ObjectId, chunk_size: usize) -> ByteStream {
        let state = self.state.clone();
        let chunk_size = chunk_size.max(1);
        let lookup = self
            .object_data(&id.bucket, &id.key)
            .ok_or_else(|| GcsVfsError::NotFound(format!("object {}", id)));

        Box::pin(try_stream! {
            let data = lookup?;

            let mut offset = 0;
            while offset < data.len() {
                let end = (offset + chunk_size).min(data.len());
                let chunk = data.slice(offset..end);
                state.bytes_read.fetch_add(chunk.len() as u64, Ordering::SeqCst);
                offset = end;
                yield chunk;
            }
        })
    }

    async fn read_range(&self, id: &ObjectId, offset: u64, len: u64) -> Result<Bytes> {
        trace!("memory read_range: {} offset={} len={}", id, offset, len);
        let data = self
            .object_data(&id.bucket, &id.key)
            .ok_or_else(|| GcsVfsError::NotFound(format!("object {}", id)))?;
        let start = (offset as usize).min(data.len());
        let end = (offset.saturating_add(len) as usize).min(data.len());
        let chunk = data.slice(start..end);
        self.state
            .bytes_read
            .fetch_add(chunk.len() as u64, Ordering::SeqCst);
        Ok(chunk)
    }

    async fn delete(&self, id: &ObjectId) -> Result<bool> {
        trace!("memory delete: {}", id);
        let mut buckets = self.state.buckets.write();
        Ok(buckets
            .get_mut(&id.bucket)
            .map(|objects| objects.remove(&id.key).is_some())
            .unwrap_or(false))
    }

    async fn copy(
        &self,
        source: &ObjectId,
        destination: &ObjectId,
        kms_key_name: Option<&str>,
    ) -> Result<ObjectMeta> {
        trace!("memory copy: {} -> {}", source, destination);
        let stored = {
            let buckets = self.state.buckets.read();
            buckets
                .get(&source.bucket)
                .and_then(|objects| objects.get(&source.key))
                .cloned()
                .ok_or_else(|| GcsVfsError::NotFound(format!("object {}", source)))?
        };

        let target = NewObject {
            id: destination.clone(),
            content_type: stored.meta.content_type.clone(),
            kms_key_name: kms_key_name.map(|k| k.to_string()),
            chunk_size: super::DEFAULT_CHUNK_SIZE,
        };
        let meta = self.state.store(&target, stored.data)?;
        // Server-side copies move no payload through the caller
        self.state.bytes_written.fetch_sub(meta.size, Ordering::SeqCst);
        self.state.server_side_copies.fetch_add(1, Ordering::SeqCst);
        Ok(meta)
    }

    async fn sign_url(&self, id: &ObjectId, ttl: Duration) -> Result<String> {
        if self.object_meta(&id.bucket, &id.key).is_none() {
            return Err(GcsVfsError::NotFound(format!("object {}", id)));
        }
        let expires = SystemTime::now()
            .checked_add(ttl)
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(u64::MAX);
        Ok(format!("memory://{}/{}?expires={}", id.bucket, id.key, expires))
    }
}

/// Buffers an upload until close
struct MemoryWriter {
    state: Arc<MemoryState>,
    object: NewObject,
    buffer: BytesMut,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<ObjectMeta> {
        let MemoryWriter {
            state,
            object,
            buffer,
        } = *self;
        state.store(&object, buffer.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn names(page: &ListPage) -> Vec<String> {
        page.entries.iter().map(|e| e.name().to_string()).collect()
    }

    #[tokio::test]
    async fn test_delimited_listing_collapses_sub_prefixes() {
        let store = MemoryStore::new().with_bucket("b");
        store.insert("b", "p/", "").unwrap();
        store.insert("b", "p/a", "1").unwrap();
        store.insert("b", "p/b/c", "2").unwrap();
        store.insert("b", "p/b/d", "3").unwrap();
        store.insert("b", "q", "4").unwrap();

        let page = store.list("b", "p/", true, None).await.unwrap();
        assert_eq!(names(&page), vec!["p/", "p/a", "p/b/"]);
        assert!(matches!(page.entries[2], ListEntry::Prefix(_)));

        let page = store.list("b", "p/", false, None).await.unwrap();
        assert_eq!(names(&page), vec!["p/", "p/a", "p/b/c", "p/b/d"]);
    }

    #[tokio::test]
    async fn test_listing_pages() {
        let store = MemoryStore::new().with_bucket("b").with_page_size(2);
        for key in ["d/1", "d/2", "d/3"] {
            store.insert("b", key, "x").unwrap();
        }

        let first = store.list("b", "d/", true, None).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        let token = first.next_page_token.unwrap();
        let second = store.list("b", "d/", true, Some(&token)).await.unwrap();
        assert_eq!(names(&second), vec!["d/3"]);
        assert!(second.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_read_range_clamps() {
        let store = MemoryStore::new().with_bucket("b");
        store.insert("b", "k", "0123456789").unwrap();
        let id = ObjectId::new("b", "k");
        assert_eq!(store.read_range(&id, 2, 3).await.unwrap(), Bytes::from("234"));
        assert_eq!(store.read_range(&id, 8, 10).await.unwrap(), Bytes::from("89"));
        assert!(store.read_range(&id, 20, 1).await.unwrap().is_empty());
        assert_eq!(store.stats().bytes_read, 5);
    }

    #[tokio::test]
    async fn test_list_missing_bucket() {
        let store = MemoryStore::new();
        assert!(store.list("nope", "", true, None).await.is_err());
        assert!(!store.bucket_exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_writer_and_chunked_read() {
        let store = MemoryStore::new().with_bucket("b");
        let object = NewObject::new(ObjectId::new("b", "f.bin")).with_content_type("text/plain");
        let mut writer = store.open_writer(&object).await.unwrap();
        writer.write(b"hello ").await.unwrap();
        assert!(store.object_data("b", "f.bin").is_none());
        writer.write(b"world").await.unwrap();
        let meta = writer.close().await.unwrap();
        assert_eq!(meta.size, 11);
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));

        let chunks: Vec<Bytes> = store
            .read(&ObjectId::new("b", "f.bin"), 4)
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), b"hello world");
        assert_eq!(store.stats().bytes_read, 11);
        assert_eq!(store.stats().bytes_written, 11);
    }

    #[tokio::test]
    async fn test_copy_moves_no_payload() {
        let store = MemoryStore::new().with_bucket("a").with_bucket("b");
        store.insert("a", "src", "payload").unwrap();

        let meta = store
            .copy(&ObjectId::new("a", "src"), &ObjectId::new("b", "dst"), Some("kms-1"))
            .await
            .unwrap();
        assert_eq!(meta.kms_key_name.as_deref(), Some("kms-1"));
        assert_eq!(store.object_data("b", "dst").unwrap(), Bytes::from("payload"));
        assert_eq!(
            store.stats(),
            TransferStats {
                bytes_read: 0,
                bytes_written: 0,
                server_side_copies: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_generation_changes_on_rewrite() {
        let store = MemoryStore::new().with_bucket("b");
        let first = store.insert("b", "k", "1").unwrap();
        let second = store.insert("b", "k", "2").unwrap();
        assert!(second.generation > first.generation);
        assert!(store.delete(&ObjectId::new("b", "k")).await.unwrap());
        assert!(!store.delete(&ObjectId::new("b", "k")).await.unwrap());
    }
}
