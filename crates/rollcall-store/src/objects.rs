//! Filesystem-backed photo store.
//!
//! Object paths are relative, `/`-separated keys such as
//! `students/Ana/photo_3.jpg`, resolved under a single root directory.

use rollcall_core::{ObjectEntry, PhotoStore, StoreError};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object key onto the root. Only plain relative segments are
    /// accepted; `..`, absolute paths and empty keys are rejected.
    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key.trim_end_matches('/'));
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !plain {
            return Err(StoreError::InvalidPath(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl PhotoStore for FsObjectStore {
    /// Files directly under `prefix`, sorted by name. A missing prefix lists empty.
    fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        let dir = self.resolve(prefix)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Storage(format!("list {prefix}: {e}"))),
        };

        let prefix = prefix.trim_end_matches('/');
        let mut objects = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Storage(format!("list {prefix}: {e}")))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // Uploads in flight.
            if !is_file || name.starts_with('.') {
                continue;
            }
            objects.push(ObjectEntry {
                path: format!("{prefix}/{name}"),
                name,
            });
        }
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }

    fn download(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(key)?;
        std::fs::read(&path).map_err(|e| StoreError::Storage(format!("download {key}: {e}")))
    }

    /// Write through a hidden, uniquely named temp file and rename, so readers
    /// never see a partial object and concurrent writers to one key don't collide.
    fn upload(&self, key: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let path = self.resolve(key)?;
        let Some(parent) = path.parent() else {
            return Err(StoreError::InvalidPath(key.to_string()));
        };
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::Storage(format!("create {}: {e}", parent.display())))?;

        let storage = |e: std::io::Error| StoreError::Storage(format!("upload {key}: {e}"));
        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(storage)?;
        tmp.write_all(bytes).map_err(storage)?;
        tmp.persist(&path).map_err(|e| storage(e.error))?;

        tracing::debug!(key, bytes = bytes.len(), "object stored");
        Ok(key.to_string())
    }
}
