//! Copying trees into a file system
//!
//! [`GcsFile::copy_from`] copies a source node, and whatever the [`Selector`]
//! picks underneath it, onto the destination node. Sources that share the
//! destination's credentials are copied inside the backend; anything else is
//! streamed through this process.

use async_trait::async_trait;
use futures::TryStreamExt;
use globset::{Glob, GlobMatcher};
use tracing::{debug, info};

use super::file::GcsFile;
use super::FileType;
use crate::client::{BoundClient, CredentialIdentity};
use crate::error::{GcsVfsError, Result};
use crate::store::{ByteStream, ObjectId};

/// Which nodes under the source root are copied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// The source node only
    SelfOnly,
    /// The source node and its immediate children
    SelfAndChildren,
    /// Everything below the source node, excluding the node itself
    Descendants,
    /// The source node and everything below it
    All,
    /// Nodes whose path relative to the source matches the pattern.
    /// A file source is matched by its base name.
    Glob(String),
}

/// How bytes move for one copy invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Object-to-object copy inside the backend
    ServerSide,
    /// Read from the source and upload to the destination
    Streamed,
}

impl CopyMode {
    /// Server-side only when both ends are bound to equal credentials
    pub fn between(destination: &BoundClient, source: Option<&CredentialIdentity>) -> Self {
        if destination.shares_credentials_with(source) {
            CopyMode::ServerSide
        } else {
            CopyMode::Streamed
        }
    }
}

/// Observer of streamed copies
pub trait CopyProgress: Send {
    /// Called after each chunk with the running total, the chunk length and
    /// the source size
    fn bytes_transferred(&mut self, total: u64, chunk: usize, stream_size: u64);
}

impl<F> CopyProgress for F
where
    F: FnMut(u64, usize, u64) + Send,
{
    fn bytes_transferred(&mut self, total: u64, chunk: usize, stream_size: u64) {
        self(total, chunk, stream_size)
    }
}

/// Something that can be copied into a [`GcsFile`]
#[async_trait]
pub trait CopySource: Send {
    fn source_uri(&self) -> String;

    /// Last path segment, used to build destination paths
    fn source_name(&self) -> String;

    /// Credentials the source is read with; `None` for local sources
    fn source_identity(&self) -> Option<CredentialIdentity>;

    /// Backend object for server-side copies
    fn source_object(&self) -> Option<ObjectId>;

    /// A fresh handle for the same path
    fn reopen_source(&self) -> Box<dyn CopySource>;

    async fn source_type(&mut self) -> Result<FileType>;

    async fn source_size(&mut self) -> Result<u64>;

    async fn open_source(&mut self) -> Result<ByteStream>;

    async fn source_children(&mut self) -> Result<Vec<Box<dyn CopySource>>>;
}

#[async_trait]
impl CopySource for GcsFile {
    fn source_uri(&self) -> String {
        self.uri()
    }

    fn source_name(&self) -> String {
        self.name().base_name().to_string()
    }

    fn source_identity(&self) -> Option<CredentialIdentity> {
        self.file_system().client().identity().cloned()
    }

    fn source_object(&self) -> Option<ObjectId> {
        Some(self.object_id())
    }

    fn reopen_source(&self) -> Box<dyn CopySource> {
        Box::new(self.reopen())
    }

    async fn source_type(&mut self) -> Result<FileType> {
        self.file_type().await
    }

    async fn source_size(&mut self) -> Result<u64> {
        self.content_size().await
    }

    async fn open_source(&mut self) -> Result<ByteStream> {
        self.open_read().await
    }

    async fn source_children(&mut self) -> Result<Vec<Box<dyn CopySource>>> {
        Ok(self
            .children()
            .await?
            .into_iter()
            .map(|child| Box::new(child) as Box<dyn CopySource>)
            .collect())
    }
}

/// Compiled form of a [`Selector`]
struct SelectorMatcher {
    max_depth: Option<usize>,
    min_depth: usize,
    glob: Option<GlobMatcher>,
}

impl SelectorMatcher {
    fn new(selector: &Selector) -> Result<Self> {
        let (min_depth, max_depth, glob) = match selector {
            Selector::SelfOnly => (0, Some(0), None),
            Selector::SelfAndChildren => (0, Some(1), None),
            Selector::Descendants => (1, None, None),
            Selector::All => (0, None, None),
            Selector::Glob(pattern) => {
                let glob = Glob::new(pattern).map_err(|e| {
                    GcsVfsError::MalformedPath(format!("invalid glob '{}': {}", pattern, e))
                })?;
                (0, None, Some(glob.compile_matcher()))
            }
        };
        Ok(Self {
            max_depth,
            min_depth,
            glob,
        })
    }

    /// Whether children of a folder at `depth` are visited
    fn descends(&self, depth: usize) -> bool {
        self.max_depth.map_or(true, |max| depth < max)
    }

    fn includes(&self, depth: usize, relative: &str, name: &str, file_type: FileType) -> bool {
        if depth < self.min_depth || self.max_depth.map_or(false, |max| depth > max) {
            return false;
        }
        match &self.glob {
            None => true,
            Some(glob) if depth == 0 => file_type == FileType::File && glob.is_match(name),
            Some(glob) => glob.is_match(relative),
        }
    }
}

/// A selected source node and where it lands relative to the destination
struct Discovered {
    relative: String,
    file_type: FileType,
    source: Box<dyn CopySource>,
}

/// Walk the source tree in pre-order, folders before their contents
async fn discover(
    root: Box<dyn CopySource>,
    root_type: FileType,
    matcher: &SelectorMatcher,
) -> Result<Vec<Discovered>> {
    let mut found = Vec::new();
    let mut stack = vec![(String::new(), 0usize, root, root_type)];

    while let Some((relative, depth, mut source, file_type)) = stack.pop() {
        let mut next = Vec::new();
        if file_type == FileType::Folder && matcher.descends(depth) {
            for mut child in source.source_children().await? {
                let child_type = child.source_type().await?;
                if child_type == FileType::Imaginary {
                    continue;
                }
                let child_relative = if relative.is_empty() {
                    child.source_name()
                } else {
                    format!("{}/{}", relative, child.source_name())
                };
                next.push((child_relative, depth + 1, child, child_type));
            }
        }

        if matcher.includes(depth, &relative, &source.source_name(), file_type) {
            found.push(Discovered {
                relative,
                file_type,
                source,
            });
        }

        // Reversed so children pop in listing order
        stack.extend(next.into_iter().rev());
    }

    Ok(found)
}

impl GcsFile {
    /// Copy `source` (and the nodes `selector` picks under it) onto this node.
    ///
    /// Destination nodes whose type differs from their source are deleted,
    /// with everything under them, before being replaced. Files copied
    /// before a failure stay copied.
    pub async fn copy_from(
        &mut self,
        source: &mut dyn CopySource,
        selector: &Selector,
        mut progress: Option<&mut (dyn CopyProgress + '_)>,
    ) -> Result<()> {
        let source_type = source.source_type().await?;
        if source_type == FileType::Imaginary {
            return Err(GcsVfsError::SourceMissing(source.source_uri()));
        }

        let matcher = SelectorMatcher::new(selector)?;
        let mode = CopyMode::between(
            self.file_system().client(),
            source.source_identity().as_ref(),
        );
        info!(
            "Copying {} to {} ({:?}, {:?})",
            source.source_uri(),
            self.uri(),
            mode,
            selector
        );

        let files = discover(source.reopen_source(), source_type, &matcher)
            .await
            .map_err(|e| GcsVfsError::copy_failed(source.source_uri(), self.uri(), e))?;
        debug!("copy: {} nodes selected", files.len());

        for mut item in files {
            let source_uri = item.source.source_uri();
            let result = if item.relative.is_empty() {
                let destination_uri = self.uri();
                copy_node(self, &mut item, mode, progress.as_deref_mut())
                    .await
                    .map_err(|e| (destination_uri, e))
            } else {
                match self.resolve(&item.relative) {
                    Ok(mut destination) => {
                        copy_node(&mut destination, &mut item, mode, progress.as_deref_mut())
                            .await
                            .map_err(|e| (destination.uri(), e))
                    }
                    Err(e) => Err((format!("{}/{}", self.uri(), item.relative), e)),
                }
            };
            result.map_err(|(destination_uri, e)| {
                GcsVfsError::copy_failed(source_uri, destination_uri, e)
            })?;
        }

        Ok(())
    }
}

async fn copy_node(
    destination: &mut GcsFile,
    item: &mut Discovered,
    mode: CopyMode,
    progress: Option<&mut (dyn CopyProgress + '_)>,
) -> Result<()> {
    let existing = destination.file_type().await?;
    if existing != FileType::Imaginary && existing != item.file_type {
        debug!(
            "copy: {} is {:?}, replacing with {:?}",
            destination.uri(),
            existing,
            item.file_type
        );
        destination.delete_all().await?;
    }

    match (item.file_type, mode) {
        (FileType::Folder, _) => destination.create_folder().await,
        (FileType::File, CopyMode::ServerSide) => copy_server_side(destination, item).await,
        (FileType::File, CopyMode::Streamed) => copy_streamed(destination, item, progress).await,
        (FileType::Imaginary, _) => Ok(()),
    }
}

async fn copy_server_side(destination: &mut GcsFile, item: &mut Discovered) -> Result<()> {
    let source = item.source.source_object().ok_or_else(|| {
        GcsVfsError::NotSupported(format!(
            "{} cannot be copied inside the backend",
            item.source.source_uri()
        ))
    })?;
    let target = destination.object_id();

    let fs = destination.file_system().clone();
    let meta = fs.store().copy(&source, &target, fs.cmk_id()).await?;
    debug!("copy: server-side {} -> {} ({} bytes)", source, target, meta.size);

    destination.set_attached(meta, FileType::File);
    destination.refresh_type().await;
    Ok(())
}

async fn copy_streamed(
    destination: &mut GcsFile,
    item: &mut Discovered,
    mut progress: Option<&mut (dyn CopyProgress + '_)>,
) -> Result<()> {
    let size = item.source.source_size().await?;
    let mut stream = item.source.open_source().await?;

    let mut writer = destination.open_write_as(false).await?;
    let mut total = 0u64;
    while let Some(chunk) = stream.try_next().await? {
        writer.write(&chunk).await?;
        total += chunk.len() as u64;
        if let Some(progress) = progress.as_mut() {
            progress.bytes_transferred(total, chunk.len(), size);
        }
    }
    drop(stream);
    writer.close().await?;
    debug!("copy: streamed {} bytes to {}", total, destination.uri());

    destination.detach();
    destination.attach_if_required().await;
    destination.refresh_type().await;
    Ok(())
}
