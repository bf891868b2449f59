//! File nodes
//!
//! A [`GcsFile`] starts detached. The first operation that needs the backend
//! object probes for it and remembers the result until the node is detached,
//! deleted, written or copied onto.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::{FileType, GcsFileSystem};
use crate::error::{GcsVfsError, Result};
use crate::name::{self, DeclaredType, ResourceName, ROOT_KEY};
use crate::store::{
    ByteStream, NewObject, ObjectId, ObjectMeta, ObjectStore, ObjectWriter, DEFAULT_CHUNK_SIZE,
};

/// Content type for objects whose name gives no hint
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// The backend object a node is associated with
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Attachment {
    /// Not probed yet
    Detached,
    Present(ObjectMeta),
    /// Probed; no object has this node's key
    Absent,
}

/// A node in a [`GcsFileSystem`]
pub struct GcsFile {
    name: ResourceName,
    fs: Arc<GcsFileSystem>,
    attachment: Attachment,
    cached_type: Option<FileType>,
}

impl std::fmt::Debug for GcsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsFile")
            .field("name", &self.name.uri())
            .field("attachment", &self.attachment)
            .field("cached_type", &self.cached_type)
            .finish()
    }
}

impl GcsFile {
    pub(crate) fn new(fs: Arc<GcsFileSystem>, name: ResourceName) -> Self {
        Self {
            name,
            fs,
            attachment: Attachment::Detached,
            cached_type: None,
        }
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn uri(&self) -> String {
        self.name.uri()
    }

    pub fn file_system(&self) -> &Arc<GcsFileSystem> {
        &self.fs
    }

    /// A fresh, detached node for the same path
    pub fn reopen(&self) -> GcsFile {
        GcsFile::new(self.fs.clone(), self.name.clone())
    }

    /// Key of the object backing this node
    pub fn object_id(&self) -> ObjectId {
        ObjectId::new(self.name.bucket(), self.name.object_key())
    }

    /// Metadata of the attached object, if attached and present
    pub fn attached(&self) -> Option<&ObjectMeta> {
        match &self.attachment {
            Attachment::Present(meta) => Some(meta),
            _ => None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attachment != Attachment::Detached
    }

    fn store(&self) -> &Arc<dyn ObjectStore> {
        self.fs.store()
    }

    /// Key used for the folder marker and for listing children; no leading separator
    fn prefix_key(&self) -> String {
        if self.name.is_root() {
            String::new()
        } else {
            name::strip_leading_separator(&self.name.listing_prefix()).to_string()
        }
    }

    async fn check_container(&self) -> Result<()> {
        let bucket = self.name.bucket();
        if bucket.is_empty() || !self.store().bucket_exists(bucket).await? {
            return Err(GcsVfsError::ContainerNotFound(bucket.to_string()));
        }
        Ok(())
    }

    // =========================================================================
    // Attachment
    // =========================================================================

    /// Probe for the backing object unless already attached
    pub async fn attach(&mut self) -> Result<()> {
        if self.is_attached() {
            return Ok(());
        }
        self.check_container().await?;

        if self.name.is_root() {
            self.attachment = Attachment::Absent;
            return Ok(());
        }

        let id = self.object_id();
        trace!("attach: probing {}", id);
        self.attachment = match self.store().get(&id).await? {
            Some(meta) => Attachment::Present(meta),
            None => Attachment::Absent,
        };
        debug!("attach: {} -> {:?}", self.name, self.attached().map(|m| m.size));
        Ok(())
    }

    /// Forget the attached object and the resolved type
    pub fn detach(&mut self) {
        self.attachment = Attachment::Detached;
        self.cached_type = None;
    }

    /// Attach, logging instead of failing; the next access probes again
    pub async fn attach_if_required(&mut self) {
        if let Err(e) = self.attach().await {
            warn!("Could not refresh {}: {}", self.name, e);
            self.attachment = Attachment::Detached;
        }
    }

    pub(crate) fn set_attached(&mut self, meta: ObjectMeta, file_type: FileType) {
        self.attachment = Attachment::Present(meta);
        self.cached_type = Some(file_type);
    }

    /// Re-probe the cached type, logging failures and leaving the cache empty.
    ///
    /// Asks the backend even when the name was parsed with a trailing
    /// separator: content copied onto such a node lands at the bare key.
    pub(crate) async fn refresh_type(&mut self) {
        match self.probe_type().await {
            Ok(file_type) => self.cached_type = Some(file_type),
            Err(e) => {
                warn!("Could not refresh type of {}: {}", self.name, e);
                self.cached_type = None;
            }
        }
    }

    // =========================================================================
    // Type resolution
    // =========================================================================

    /// Work out whether this path is a file, a folder or nothing at all.
    ///
    /// Uncached; see [`GcsFile::file_type`].
    pub async fn resolve_type(&self) -> Result<FileType> {
        if self.name.declared_type() == DeclaredType::Folder {
            return Ok(FileType::Folder);
        }
        self.probe_type().await
    }

    /// Object probe, then prefix probe
    async fn probe_type(&self) -> Result<FileType> {
        self.check_container().await?;

        let key = self.name.object_key();
        trace!("resolve_type: probing object {}", key);
        if self
            .store()
            .get(&ObjectId::new(self.name.bucket(), key))
            .await?
            .is_some()
        {
            return Ok(FileType::File);
        }

        let prefix = self.name.listing_prefix();
        if prefix == ROOT_KEY {
            return Ok(FileType::Folder);
        }
        let prefix = name::strip_leading_separator(&prefix);

        trace!("resolve_type: listing prefix {}", prefix);
        let page = self
            .store()
            .list(self.name.bucket(), prefix, true, None)
            .await?;
        if page.entries.is_empty() {
            Ok(FileType::Imaginary)
        } else {
            Ok(FileType::Folder)
        }
    }

    /// Resolved type, cached until the node is detached or changed
    pub async fn file_type(&mut self) -> Result<FileType> {
        if let Some(file_type) = self.cached_type {
            return Ok(file_type);
        }
        let file_type = self.resolve_type().await?;
        self.cached_type = Some(file_type);
        Ok(file_type)
    }

    pub async fn exists(&mut self) -> Result<bool> {
        Ok(self.file_type().await? != FileType::Imaginary)
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// Names of the immediate children, relative to this node.
    ///
    /// Sub-folders appear with a trailing separator (`"b/"`). The folder's
    /// own marker is never included. All pages are fetched before returning.
    pub async fn list_children(&self) -> Result<Vec<String>> {
        let prefix = self.prefix_key();
        let mut children = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            trace!("list_children: prefix={:?} token={:?}", prefix, page_token);
            let page = self
                .store()
                .list(self.name.bucket(), &prefix, true, page_token.as_deref())
                .await?;

            for entry in &page.entries {
                let key = entry.name();
                if key == prefix {
                    continue;
                }
                if let Some(child) = key.strip_prefix(prefix.as_str()) {
                    if !child.is_empty() {
                        children.push(child.to_string());
                    }
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(children)
    }

    /// Child nodes of a folder
    pub async fn children(&mut self) -> Result<Vec<GcsFile>> {
        match self.file_type().await? {
            FileType::Folder => {}
            FileType::File => return Err(GcsVfsError::NotAFolder(self.uri())),
            FileType::Imaginary => return Err(GcsVfsError::NotFound(self.uri())),
        }

        self.list_children()
            .await?
            .iter()
            .map(|child| -> Result<GcsFile> {
                Ok(GcsFile::new(self.fs.clone(), name::derive(&self.name, child)?))
            })
            .collect()
    }

    /// Node for a path relative to this one
    pub fn resolve(&self, relative: &str) -> Result<GcsFile> {
        self.fs.file(name::derive(&self.name, relative)?)
    }

    // =========================================================================
    // Content
    // =========================================================================

    pub async fn content_size(&mut self) -> Result<u64> {
        self.attach().await?;
        self.attached()
            .map(|meta| meta.size)
            .ok_or_else(|| GcsVfsError::NotFound(self.uri()))
    }

    /// Update time of the attached object; the epoch when there is none
    pub async fn last_modified(&mut self) -> Result<SystemTime> {
        self.attach().await?;
        Ok(self
            .attached()
            .map(|meta| meta.updated)
            .unwrap_or(SystemTime::UNIX_EPOCH))
    }

    /// Objects keep the service's update time; the request is accepted and ignored
    pub fn set_last_modified(&mut self, _time: SystemTime) -> bool {
        true
    }

    /// Stream the content in large chunks
    pub async fn open_read(&mut self) -> Result<ByteStream> {
        self.attach().await?;
        let id = self
            .attached()
            .map(|meta| meta.id.clone())
            .ok_or_else(|| GcsVfsError::NotFound(self.uri()))?;
        Ok(self.store().read(&id, DEFAULT_CHUNK_SIZE))
    }

    /// Read up to `len` bytes at `offset`
    pub async fn read_at(&mut self, offset: u64, len: u64) -> Result<Bytes> {
        self.attach().await?;
        let id = self
            .attached()
            .map(|meta| meta.id.clone())
            .ok_or_else(|| GcsVfsError::NotFound(self.uri()))?;
        self.store().read_range(&id, offset, len).await
    }

    /// Read the whole content into memory
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        use futures::TryStreamExt;

        let chunks: Vec<Bytes> = self.open_read().await?.try_collect().await?;
        if chunks.len() == 1 {
            return Ok(chunks.into_iter().next().unwrap_or_default());
        }
        Ok(Bytes::from(chunks.concat()))
    }

    /// Open a writer that replaces the object's content.
    ///
    /// A zero-length placeholder is created first so the path exists while
    /// the upload runs. `append` is accepted but ignored: objects cannot be
    /// appended to. Folder nodes write their `key/` marker instead.
    pub async fn open_write(&mut self, append: bool) -> Result<FileWriter<'_>> {
        if append {
            debug!("open_write: append requested for {}, overwriting", self.name);
        }

        let folder = self.name.declared_type() == DeclaredType::Folder
            || self.cached_type == Some(FileType::Folder);
        self.open_write_as(folder).await
    }

    pub(crate) async fn open_write_as(&mut self, folder: bool) -> Result<FileWriter<'_>> {
        if folder && self.name.is_root() {
            return Err(GcsVfsError::NotSupported(
                "cannot write content to a bucket root".to_string(),
            ));
        }

        let key = if folder {
            self.prefix_key()
        } else {
            self.name.object_key().to_string()
        };
        let content_type = mime_guess::from_path(self.name.base_name())
            .first()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());

        let object = NewObject::new(ObjectId::new(self.name.bucket(), key))
            .with_content_type(content_type)
            .with_kms_key(self.fs.cmk_id().map(|k| k.to_string()));

        debug!(
            "open_write: placeholder {} ({:?})",
            object.id, object.content_type
        );
        let placeholder = self.store().create(&object, Bytes::new()).await?;
        let file_type = if folder {
            FileType::Folder
        } else {
            FileType::File
        };
        if !folder {
            self.set_attached(placeholder, file_type);
        } else {
            self.cached_type = Some(file_type);
        }

        let writer = self.store().open_writer(&object).await?;
        Ok(FileWriter {
            file: self,
            inner: writer,
            file_type,
            written: 0,
        })
    }

    /// Replace the content with `data`
    pub async fn write_all(&mut self, data: &[u8]) -> Result<ObjectMeta> {
        let mut writer = self.open_write(false).await?;
        writer.write(data).await?;
        writer.close().await
    }

    /// Create the folder marker object (`key/`)
    pub async fn create_folder(&mut self) -> Result<()> {
        if self.name.is_root() {
            return Ok(());
        }
        self.check_container().await?;

        let object = NewObject::new(ObjectId::new(self.name.bucket(), self.prefix_key()))
            .with_kms_key(self.fs.cmk_id().map(|k| k.to_string()));
        debug!("create_folder: {}", object.id);
        self.store().create(&object, Bytes::new()).await?;

        self.attachment = Attachment::Detached;
        self.cached_type = Some(FileType::Folder);
        Ok(())
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Delete the object backing this node; returns whether one existed
    pub async fn delete(&mut self) -> Result<bool> {
        self.detach();
        self.attach().await?;

        let deleted = match self.attached() {
            Some(meta) => {
                let id = meta.id.clone();
                debug!("delete: {}", id);
                self.store().delete(&id).await?
            }
            None => false,
        };

        self.attachment = Attachment::Absent;
        self.cached_type = None;
        Ok(deleted)
    }

    /// Delete this node and every object under its listing prefix.
    ///
    /// Returns the number of objects removed.
    pub async fn delete_all(&mut self) -> Result<u64> {
        let mut removed = u64::from(self.delete().await?);

        let prefix = self.prefix_key();
        let mut page_token: Option<String> = None;
        let mut keys = Vec::new();
        loop {
            let page = self
                .store()
                .list(self.name.bucket(), &prefix, false, page_token.as_deref())
                .await?;
            keys.extend(page.entries.iter().map(|e| e.name().to_string()));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        for key in keys {
            if self
                .store()
                .delete(&ObjectId::new(self.name.bucket(), key))
                .await?
            {
                removed += 1;
            }
        }

        debug!("delete_all: {} removed {} objects", self.name, removed);
        self.detach();
        Ok(removed)
    }

    // =========================================================================
    // Extensions
    // =========================================================================

    /// Time-limited read URL for the attached object; `None` without one
    pub async fn signed_url(&mut self, ttl: Duration) -> Result<Option<String>> {
        self.attach().await?;
        match self.attached() {
            Some(meta) => {
                let id = meta.id.clone();
                Ok(Some(self.store().sign_url(&id, ttl).await?))
            }
            None => Ok(None),
        }
    }

    /// Renames are always done as copy plus delete
    pub fn can_rename_to(&self, _destination: &GcsFile) -> bool {
        false
    }

    pub async fn rename_to(&mut self, destination: &GcsFile) -> Result<()> {
        Err(GcsVfsError::NotSupported(format!(
            "rename {} to {}: copy and delete instead",
            self.name, destination.name
        )))
    }
}

/// Writer bound to a node; closing it attaches the node to the new object
pub struct FileWriter<'a> {
    file: &'a mut GcsFile,
    inner: Box<dyn ObjectWriter>,
    file_type: FileType,
    written: u64,
}

impl FileWriter<'_> {
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Bytes accepted so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn close(self) -> Result<ObjectMeta> {
        let meta = self.inner.close().await?;
        debug!("close: {} ({} bytes)", meta.id, meta.size);
        if self.file_type == FileType::File {
            self.file.set_attached(meta.clone(), FileType::File);
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BoundClient;
    use crate::config::FileSystemOptions;
    use crate::store::memory::MemoryStore;

    fn setup() -> (MemoryStore, Arc<GcsFileSystem>) {
        let store = MemoryStore::new().with_bucket("npd-test");
        let fs = GcsFileSystem::new(
            ResourceName::root("gcs", "npd-test").unwrap(),
            BoundClient::new(None, None, Arc::new(store.clone())),
            FileSystemOptions::default(),
        );
        (store, fs)
    }

    #[tokio::test]
    async fn test_attach_states() {
        let (store, fs) = setup();
        store.insert("npd-test", "a.txt", "abc").unwrap();

        let mut file = fs.resolve("a.txt").unwrap();
        assert!(!file.is_attached());
        file.attach().await.unwrap();
        assert_eq!(file.attached().map(|m| m.size), Some(3));

        let mut missing = fs.resolve("b.txt").unwrap();
        missing.attach().await.unwrap();
        assert!(missing.is_attached());
        assert!(missing.attached().is_none());

        missing.detach();
        assert!(!missing.is_attached());
    }

    #[tokio::test]
    async fn test_type_resolution() {
        let (store, fs) = setup();
        store.insert("npd-test", "docs/a.txt", "x").unwrap();

        assert_eq!(fs.resolve("docs/a.txt").unwrap().resolve_type().await.unwrap(), FileType::File);
        assert_eq!(fs.resolve("docs").unwrap().resolve_type().await.unwrap(), FileType::Folder);
        assert_eq!(fs.resolve("orphan").unwrap().resolve_type().await.unwrap(), FileType::Imaginary);
        assert_eq!(fs.resolve("/").unwrap().resolve_type().await.unwrap(), FileType::Folder);
    }

    #[tokio::test]
    async fn test_declared_folder_skips_backend() {
        // The bucket does not exist, so any backend call would fail
        let fs = GcsFileSystem::new(
            ResourceName::root("gcs", "ghost").unwrap(),
            BoundClient::new(None, None, Arc::new(MemoryStore::new())),
            FileSystemOptions::default(),
        );
        let file = fs.resolve("dir/").unwrap();
        assert_eq!(file.resolve_type().await.unwrap(), FileType::Folder);

        let err = fs.resolve("dir").unwrap().resolve_type().await.unwrap_err();
        assert!(matches!(err, GcsVfsError::ContainerNotFound(b) if b == "ghost"));
    }

    #[tokio::test]
    async fn test_marker_only_folder() {
        let (store, fs) = setup();
        store.insert("npd-test", "empty/", "").unwrap();

        let mut folder = fs.resolve("empty").unwrap();
        assert_eq!(folder.file_type().await.unwrap(), FileType::Folder);
        assert!(folder.list_children().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_children_strips_prefix_and_marker() {
        let (store, fs) = setup();
        for key in ["p/", "p/a", "p/b/c", "p/b/d", "pq"] {
            store.insert("npd-test", key, "").unwrap();
        }

        let mut children = fs.resolve("p").unwrap().list_children().await.unwrap();
        children.sort();
        assert_eq!(children, vec!["a", "b/"]);

        let mut root = fs.resolve("/").unwrap().list_children().await.unwrap();
        root.sort();
        assert_eq!(root, vec!["p/", "pq"]);
    }

    #[tokio::test]
    async fn test_list_children_exhausts_pages() {
        let store = MemoryStore::new().with_bucket("npd-test").with_page_size(2);
        for i in 0..5 {
            store.insert("npd-test", &format!("d/{}", i), "").unwrap();
        }
        let fs = GcsFileSystem::new(
            ResourceName::root("gcs", "npd-test").unwrap(),
            BoundClient::new(None, None, Arc::new(store)),
            FileSystemOptions::default(),
        );
        assert_eq!(fs.resolve("d").unwrap().list_children().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_children_of_file_refused() {
        let (store, fs) = setup();
        store.insert("npd-test", "a.txt", "x").unwrap();
        let err = fs.resolve("a.txt").unwrap().children().await.unwrap_err();
        assert!(matches!(err, GcsVfsError::NotAFolder(_)));
    }

    #[tokio::test]
    async fn test_children_are_typed_nodes() {
        let (store, fs) = setup();
        store.insert("npd-test", "p/a", "1").unwrap();
        store.insert("npd-test", "p/b/c", "2").unwrap();

        let mut folder = fs.resolve("p").unwrap();
        let mut children = folder.children().await.unwrap();
        children.sort_by_key(|c| c.uri());
        assert_eq!(children[0].uri(), "gcs://npd-test/p/a");
        assert_eq!(children[1].name().declared_type(), DeclaredType::Folder);
        assert_eq!(children[1].file_type().await.unwrap(), FileType::Folder);
    }

    #[tokio::test]
    async fn test_write_creates_placeholder_with_type_and_cmk() {
        let store = MemoryStore::new().with_bucket("npd-test");
        let fs = GcsFileSystem::new(
            ResourceName::root("gcs", "npd-test").unwrap(),
            BoundClient::new(None, None, Arc::new(store.clone())),
            FileSystemOptions::default().with_cmk_id("projects/p/keys/k"),
        );

        let mut file = fs.resolve("report.txt").unwrap();
        let mut writer = file.open_write(true).await.unwrap();
        // Placeholder is visible while the upload is open
        assert_eq!(store.object_data("npd-test", "report.txt").unwrap().len(), 0);
        writer.write(b"testing...").await.unwrap();
        assert_eq!(writer.written(), 10);
        writer.close().await.unwrap();

        let meta = store.object_meta("npd-test", "report.txt").unwrap();
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
        assert_eq!(meta.kms_key_name.as_deref(), Some("projects/p/keys/k"));
        assert_eq!(file.attached().map(|m| m.size), Some(10));
        assert_eq!(file.file_type().await.unwrap(), FileType::File);
        assert_eq!(&file.read_to_end().await.unwrap()[..], b"testing...");
    }

    #[tokio::test]
    async fn test_folder_write_uses_marker_key() {
        let (store, fs) = setup();
        let mut folder = fs.resolve("dir/").unwrap();
        folder.write_all(b"").await.unwrap();
        assert!(store.object_meta("npd-test", "dir/").is_some());
        assert!(store.object_meta("npd-test", "dir").is_none());

        let mut created = fs.resolve("made").unwrap();
        created.create_folder().await.unwrap();
        assert!(store.object_meta("npd-test", "made/").is_some());
        assert_eq!(fs.resolve("made").unwrap().resolve_type().await.unwrap(), FileType::Folder);
    }

    #[tokio::test]
    async fn test_size_and_last_modified() {
        let (store, fs) = setup();
        store.insert("npd-test", "a.bin", vec![0u8; 42]).unwrap();

        let mut file = fs.resolve("a.bin").unwrap();
        assert_eq!(file.content_size().await.unwrap(), 42);
        assert!(file.last_modified().await.unwrap() > SystemTime::UNIX_EPOCH);
        assert!(file.set_last_modified(SystemTime::now()));

        let mut missing = fs.resolve("missing.bin").unwrap();
        assert_eq!(missing.last_modified().await.unwrap(), SystemTime::UNIX_EPOCH);
        assert!(matches!(
            missing.content_size().await,
            Err(GcsVfsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_read_at() {
        let (store, fs) = setup();
        store.insert("npd-test", "a.txt", "0123456789").unwrap();
        let mut file = fs.resolve("a.txt").unwrap();
        assert_eq!(&file.read_at(3, 4).await.unwrap()[..], b"3456");
    }

    #[tokio::test]
    async fn test_delete_reprobes() {
        let (store, fs) = setup();
        let mut file = fs.resolve("a.txt").unwrap();
        file.attach().await.unwrap();
        assert!(file.attached().is_none());

        // Created behind the node's back; delete must still find it
        store.insert("npd-test", "a.txt", "x").unwrap();
        assert!(file.delete().await.unwrap());
        assert!(store.object_meta("npd-test", "a.txt").is_none());
        assert!(!file.delete().await.unwrap());
        assert!(!file.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_all() {
        let (store, fs) = setup();
        for key in ["t/", "t/a", "t/b/c", "tt"] {
            store.insert("npd-test", key, "x").unwrap();
        }
        let mut tree = fs.resolve("t").unwrap();
        assert_eq!(tree.delete_all().await.unwrap(), 3);
        assert_eq!(store.keys("npd-test"), vec!["tt"]);
    }

    #[tokio::test]
    async fn test_signed_url_and_rename() {
        let (store, fs) = setup();
        store.insert("npd-test", "a.txt", "x").unwrap();

        let mut file = fs.resolve("a.txt").unwrap();
        let url = file.signed_url(Duration::from_secs(60)).await.unwrap();
        assert!(url.unwrap().starts_with("memory://npd-test/a.txt"));

        let mut missing = fs.resolve("none.txt").unwrap();
        assert!(missing.signed_url(Duration::from_secs(60)).await.unwrap().is_none());

        assert!(!file.can_rename_to(&missing));
        assert!(matches!(
            file.rename_to(&missing).await,
            Err(GcsVfsError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_bucket_is_fatal() {
        let fs = GcsFileSystem::new(
            ResourceName::root("gcs", "ghost").unwrap(),
            BoundClient::new(None, None, Arc::new(MemoryStore::new())),
            FileSystemOptions::default(),
        );
        let mut file = fs.resolve("a.txt").unwrap();
        assert!(matches!(
            file.attach().await,
            Err(GcsVfsError::ContainerNotFound(_))
        ));
        assert!(matches!(
            file.exists().await,
            Err(GcsVfsError::ContainerNotFound(_))
        ));
    }
}
