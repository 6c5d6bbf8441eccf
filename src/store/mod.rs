//! Storage abstraction for Zarr blobs.
//!
//! A [`ObjectStore`] maps relative keys (`/`-separated) to byte blobs and is
//! implemented for the local filesystem, HTTP endpoints, and S3-compatible
//! object storage. A [`StoreHandle`] pairs a shared store with a key prefix
//! and is the unit the Zarr layer navigates with: resolving a child group or
//! array is a prefix extension, not a new connection.

mod fs;
mod http;
mod s3;
mod uri;

pub use fs::FilesystemStore;
pub use http::HttpStore;
pub use s3::{S3Options, S3Store};
pub use uri::parse_root_uri;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Read-only key/value access to a storage backend.
///
/// Keys are relative, `/`-separated paths; backends map them onto their
/// native addressing. A missing key yields `Ok(None)` — Zarr chunk files are
/// optional and absence means fill value, so only genuine I/O failures are
/// errors.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the blob stored under `key`, or `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, IoError>;

    /// A unique identifier for this store (for logging and cache keys).
    ///
    /// For S3 this is `s3://endpoint/bucket`; for HTTP the base URL; for the
    /// filesystem the root directory.
    fn identifier(&self) -> &str;
}

/// A shared store plus the key prefix of one node within it.
///
/// Handles are cheap to clone and compare/hash by their identity string, so
/// they can key the process-wide metadata and array caches.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl StoreHandle {
    /// Create a handle for `prefix` within `store`.
    ///
    /// The prefix is `/`-separated and carries no leading or trailing slash;
    /// an empty prefix addresses the store root.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_matches('/').to_string();
        Self { store, prefix }
    }

    /// Resolve a relative sub-path into a new handle.
    pub fn resolve(&self, subpath: &str) -> StoreHandle {
        let subpath = subpath.trim_matches('/');
        let prefix = if self.prefix.is_empty() {
            subpath.to_string()
        } else if subpath.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, subpath)
        };
        StoreHandle {
            store: self.store.clone(),
            prefix,
        }
    }

    /// The absolute key of `name` under this handle's prefix.
    pub fn key_for(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    /// Fetch the blob stored under `name` relative to this handle.
    pub async fn get(&self, name: &str) -> Result<Option<Bytes>, IoError> {
        self.store.get(&self.key_for(name)).await
    }

    /// The identity string of this handle (store identifier + prefix).
    pub fn identity(&self) -> String {
        if self.prefix.is_empty() {
            self.store.identifier().to_string()
        } else {
            format!("{}/{}", self.store.identifier(), self.prefix)
        }
    }

    /// The key prefix of this handle within its store.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl PartialEq for StoreHandle {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for StoreHandle {}

impl Hash for StoreHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("identity", &self.identity())
            .finish()
    }
}

impl fmt::Display for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity())
    }
}
