//! Resource names: `<scheme>://<bucket>/<key...>`
//!
//! A [`ResourceName`] is the parsed, normalized form of a URI. The key is kept
//! without a leading separator; the bucket root is the single key `"/"`.
//! Names are immutable: every derived path (a child, a copy destination) is a
//! new value.

use std::fmt;

use crate::error::{GcsVfsError, Result};

/// Path separator used in object keys
pub const SEPARATOR: char = '/';

/// Key that names the bucket root
pub const ROOT_KEY: &str = "/";

/// The type a name carries from parsing, before any backend probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclaredType {
    File,
    Folder,
    Unknown,
}

/// A parsed and normalized storage path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceName {
    scheme: String,
    bucket: String,
    key: String,
    declared: DeclaredType,
}

impl ResourceName {
    /// Build a name from already separated parts.
    ///
    /// The key is normalized the same way a parsed URI is.
    pub fn new(
        scheme: impl Into<String>,
        bucket: impl Into<String>,
        key: &str,
        declared: DeclaredType,
    ) -> Result<Self> {
        let scheme = scheme.into();
        let bucket = bucket.into();
        validate_scheme(&scheme)?;
        validate_bucket(&bucket)?;

        let unified = key.replace('\\', "/");
        let (segments, trailing) = normalise_segments(&unified).map_err(|_| {
            GcsVfsError::MalformedPath(format!("{}: key escapes the bucket", unified))
        })?;
        let key = join_key(&segments);
        let declared = if key == ROOT_KEY || (trailing && declared == DeclaredType::Unknown) {
            DeclaredType::Folder
        } else {
            declared
        };

        Ok(Self {
            scheme,
            bucket,
            key,
            declared,
        })
    }

    /// The root name of a bucket
    pub fn root(scheme: impl Into<String>, bucket: impl Into<String>) -> Result<Self> {
        Self::new(scheme, bucket, ROOT_KEY, DeclaredType::Folder)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Normalized key; `"/"` for the root
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn declared_type(&self) -> DeclaredType {
        self.declared
    }

    pub fn is_root(&self) -> bool {
        self.key == ROOT_KEY
    }

    /// The key to send to the backend for exact-object calls.
    ///
    /// A single leading separator is stripped unless the key is the root.
    pub fn object_key(&self) -> &str {
        strip_leading_separator(&self.key)
    }

    /// The key with exactly one trailing separator: the prefix of this
    /// name's children, and the marker key of an emulated folder.
    ///
    /// The root keeps its `"/"` form; callers decide how to treat it.
    pub fn listing_prefix(&self) -> String {
        let mut prefix = self.key.clone();
        if !prefix.ends_with(SEPARATOR) {
            prefix.push(SEPARATOR);
        }
        prefix
    }

    /// Last path segment; empty for the root
    pub fn base_name(&self) -> &str {
        if self.is_root() {
            return "";
        }
        self.key.rsplit(SEPARATOR).next().unwrap_or(&self.key)
    }

    /// `<scheme>://<bucket>`, the identity of the file system this name lives in
    pub fn root_uri(&self) -> String {
        format!("{}://{}", self.scheme, self.bucket)
    }

    /// Full URI of this name
    pub fn uri(&self) -> String {
        if self.is_root() {
            format!("{}/", self.root_uri())
        } else {
            format!("{}/{}", self.root_uri(), self.key)
        }
    }

    /// Parent name, `None` for the root
    pub fn parent(&self) -> Option<ResourceName> {
        if self.is_root() {
            return None;
        }
        let parent_key = match self.key.rfind(SEPARATOR) {
            Some(idx) => &self.key[..idx],
            None => ROOT_KEY,
        };
        Some(Self {
            scheme: self.scheme.clone(),
            bucket: self.bucket.clone(),
            key: join_key(&parent_key.split(SEPARATOR).filter(|s| !s.is_empty()).collect::<Vec<_>>()),
            declared: DeclaredType::Folder,
        })
    }

    /// Whether `other` is this name or lives underneath it
    pub fn is_descendant_or_self(&self, other: &ResourceName) -> bool {
        if self.scheme != other.scheme || self.bucket != other.bucket {
            return false;
        }
        self.is_root() || other.key == self.key || other.key.starts_with(&self.listing_prefix())
    }

    /// Path of `descendant` relative to this name; empty when they are equal.
    ///
    /// Returns `None` if `descendant` is not underneath this name.
    pub fn relative_name(&self, descendant: &ResourceName) -> Option<String> {
        if !self.is_descendant_or_self(descendant) {
            return None;
        }
        if descendant.key == self.key {
            return Some(String::new());
        }
        if self.is_root() {
            return Some(descendant.key.clone());
        }
        descendant
            .key
            .strip_prefix(&self.listing_prefix())
            .map(|s| s.to_string())
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Parse a URI of the form `<scheme>://<bucket>/<key...>`.
///
/// Backslashes become separators, duplicate separators collapse, `.` and `..`
/// segments are resolved, and a trailing separator declares a folder.
pub fn parse(uri: &str) -> Result<ResourceName> {
    let (scheme, rest) = uri
        .split_once(':')
        .ok_or_else(|| GcsVfsError::MalformedPath(format!("{}: missing scheme", uri)))?;
    validate_scheme(scheme).map_err(|_| {
        GcsVfsError::MalformedPath(format!("{}: invalid scheme '{}'", uri, scheme))
    })?;

    let rest = rest.replace('\\', "/");
    let (segments, trailing) = normalise_segments(&rest)
        .map_err(|_| GcsVfsError::MalformedPath(format!("{}: path escapes the bucket", uri)))?;

    let (bucket, key_segments) = segments
        .split_first()
        .ok_or_else(|| GcsVfsError::MalformedPath(format!("{}: missing bucket", uri)))?;
    validate_bucket(bucket)
        .map_err(|_| GcsVfsError::MalformedPath(format!("{}: invalid bucket '{}'", uri, bucket)))?;

    let key = join_key(key_segments);
    let declared = if key == ROOT_KEY || trailing {
        DeclaredType::Folder
    } else {
        DeclaredType::Unknown
    };

    Ok(ResourceName {
        scheme: scheme.to_string(),
        bucket: bucket.to_string(),
        key,
        declared,
    })
}

/// Derive a name from `base` by resolving `relative` against it.
///
/// Scheme and bucket are kept. A relative path starting with a separator is
/// resolved from the bucket root; an empty one yields `base` itself.
pub fn derive(base: &ResourceName, relative: &str) -> Result<ResourceName> {
    if relative.is_empty() {
        return Ok(base.clone());
    }

    let relative = relative.replace('\\', "/");
    let joined = if relative.starts_with(SEPARATOR) || base.is_root() {
        relative
    } else {
        format!("{}/{}", base.key, relative)
    };

    let (segments, trailing) = normalise_segments(&joined).map_err(|_| {
        GcsVfsError::MalformedPath(format!("{}: '{}' escapes the bucket", base, joined))
    })?;
    let key = join_key(&segments);
    let declared = if key == ROOT_KEY || trailing {
        DeclaredType::Folder
    } else {
        DeclaredType::Unknown
    };

    Ok(ResourceName {
        scheme: base.scheme.clone(),
        bucket: base.bucket.clone(),
        key,
        declared,
    })
}

/// Strip one leading separator, leaving the root key alone
pub fn strip_leading_separator(key: &str) -> &str {
    if key != ROOT_KEY {
        key.strip_prefix(SEPARATOR).unwrap_or(key)
    } else {
        key
    }
}

/// Split a path into normalized segments and report whether it ended with a separator
fn normalise_segments(path: &str) -> std::result::Result<(Vec<&str>, bool), ()> {
    let trailing = path.len() > 1 && path.ends_with(SEPARATOR);
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split(SEPARATOR) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(());
                }
            }
            other => segments.push(other),
        }
    }

    Ok((segments, trailing))
}

fn join_key(segments: &[&str]) -> String {
    if segments.is_empty() {
        ROOT_KEY.to_string()
    } else {
        segments.join("/")
    }
}

fn validate_scheme(scheme: &str) -> Result<()> {
    let mut chars = scheme.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(GcsVfsError::MalformedPath(format!("invalid scheme '{}'", scheme)))
    }
}

fn validate_bucket(bucket: &str) -> Result<()> {
    if bucket.is_empty() || bucket.contains(SEPARATOR) || bucket == "." || bucket == ".." {
        Err(GcsVfsError::MalformedPath(format!("invalid bucket '{}'", bucket)))
    } else {
        Ok(())
    }
}
