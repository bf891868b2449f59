//! Local files as copy sources

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::AsyncReadExt;

use super::copy::CopySource;
use super::FileType;
use crate::client::CredentialIdentity;
use crate::error::Result;
use crate::store::{ByteStream, ObjectId};

/// Read buffer for local sources (32 MiB)
pub const COPY_BUFFER_SIZE: usize = 32 * 1024 * 1024;

/// A file or directory on local disk.
///
/// Never shares credentials with a bucket, so copies from it are always streamed.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    buffer_size: usize,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer_size: COPY_BUFFER_SIZE,
        }
    }

    /// Read in chunks of at most `buffer_size` bytes
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CopySource for LocalFile {
    fn source_uri(&self) -> String {
        format!("file://{}", self.path.display())
    }

    fn source_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn source_identity(&self) -> Option<CredentialIdentity> {
        None
    }

    fn source_object(&self) -> Option<ObjectId> {
        None
    }

    fn reopen_source(&self) -> Box<dyn CopySource> {
        Box::new(self.clone())
    }

    async fn source_type(&mut self) -> Result<FileType> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) if meta.is_dir() => Ok(FileType::Folder),
            Ok(_) => Ok(FileType::File),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(FileType::Imaginary),
            Err(e) => Err(e.into()),
        }
    }

    async fn source_size(&mut self) -> Result<u64> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }

    async fn open_source(&mut self) -> Result<ByteStream> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let buffer_size = self.buffer_size;

        Ok(Box::pin(try_stream! {
            loop {
                let mut buffer = BytesMut::with_capacity(buffer_size);
                while buffer.len() < buffer_size {
                    if file.read_buf(&mut buffer).await? == 0 {
                        break;
                    }
                }
                if buffer.is_empty() {
                    break;
                }
                yield buffer.freeze();
            }
        }))
    }

    async fn source_children(&mut self) -> Result<Vec<Box<dyn CopySource>>> {
        let mut entries = tokio::fs::read_dir(&self.path).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            paths.push(entry.path());
        }
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| {
                Box::new(LocalFile::new(path).with_buffer_size(self.buffer_size))
                    as Box<dyn CopySource>
            })
            .collect())
    }
}
