use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;

use super::ObjectStore;
use crate::error::IoError;

/// Local-filesystem store.
///
/// Keys are resolved against a root directory; path components are joined
/// with the platform separator. Missing or unreadable files report `None`
/// rather than an error, matching the Zarr convention that chunk files are
/// optional.
pub struct FilesystemStore {
    root: PathBuf,
    identifier: String,
}

impl FilesystemStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let identifier = root.to_string_lossy().into_owned();
        Self { root, identifier }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, IoError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) => match e.kind() {
                // An unreadable entry is handled like a missing chunk.
                ErrorKind::NotFound | ErrorKind::PermissionDenied => Ok(None),
                _ => Err(IoError::Io(e.to_string())),
            },
        }
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
