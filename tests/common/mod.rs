//! Common test utilities and fixtures
//!
//! Every test runs against an in-process [`MemoryStore`]. File systems are
//! built directly so tests can choose which credentials each side is bound
//! to: equal principals allow server-side copies, different ones force
//! streaming.

#![allow(dead_code)]

use std::sync::Arc;

use gcs_vfs::client::{BoundClient, ClientType, CredentialIdentity};
use gcs_vfs::config::FileSystemOptions;
use gcs_vfs::name::ResourceName;
use gcs_vfs::store::memory::MemoryStore;
use gcs_vfs::vfs::{FileType, GcsFile, GcsFileSystem};

/// Bucket used by most tests
pub const BUCKET: &str = "npd-test";

/// Identity of a service-account principal
pub fn identity(principal: &str) -> CredentialIdentity {
    CredentialIdentity {
        kind: ClientType::StorageAccount,
        principal: principal.to_string(),
    }
}

/// A store holding the given buckets
pub fn store_with(buckets: &[&str]) -> MemoryStore {
    let store = MemoryStore::new();
    for bucket in buckets {
        store.create_bucket(bucket);
    }
    store
}

/// Bind a file system over `store`, optionally with a credential identity
pub fn file_system(
    store: &MemoryStore,
    bucket: &str,
    principal: Option<&str>,
) -> Arc<GcsFileSystem> {
    file_system_with_options(store, bucket, principal, FileSystemOptions::default())
}

pub fn file_system_with_options(
    store: &MemoryStore,
    bucket: &str,
    principal: Option<&str>,
    options: FileSystemOptions,
) -> Arc<GcsFileSystem> {
    GcsFileSystem::new(
        ResourceName::root("gcs", bucket).expect("valid bucket"),
        BoundClient::new(principal.map(identity), None, Arc::new(store.clone())),
        options,
    )
}

/// Resolve a node, panicking on malformed paths
pub fn node(fs: &Arc<GcsFileSystem>, path: &str) -> GcsFile {
    fs.resolve(path)
        .unwrap_or_else(|e| panic!("Failed to resolve {}: {}", path, e))
}

/// Assert the resolved type of `path`
pub async fn assert_type(fs: &Arc<GcsFileSystem>, path: &str, expected: FileType) {
    let actual = node(fs, path)
        .resolve_type()
        .await
        .unwrap_or_else(|e| panic!("Failed to resolve type of {}: {}", path, e));
    assert_eq!(
        actual, expected,
        "Type mismatch at {}: expected {:?}, got {:?}",
        path, expected, actual
    );
}

/// Assert the stored content of an object
pub fn assert_object_content(store: &MemoryStore, bucket: &str, key: &str, expected: &[u8]) {
    let actual = store
        .object_data(bucket, key)
        .unwrap_or_else(|| panic!("Expected object {}/{} to exist", bucket, key));
    assert_eq!(
        &actual[..],
        expected,
        "Content mismatch at {}/{}\nExpected {} bytes, got {} bytes",
        bucket,
        key,
        expected.len(),
        actual.len()
    );
}

/// Sorted children of a folder
pub async fn sorted_children(fs: &Arc<GcsFileSystem>, path: &str) -> Vec<String> {
    let mut children = node(fs, path)
        .list_children()
        .await
        .unwrap_or_else(|e| panic!("Failed to list {}: {}", path, e));
    children.sort();
    children
}
