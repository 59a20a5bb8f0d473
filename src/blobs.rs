//! Access to captured image and markup bytes.
//!
//! Capture and remote sync happen elsewhere; by the time a run starts, every
//! blob a snapshot refers to has been materialized under the blob directory.

use anyhow::{bail, Context, Result};
use std::path::{Component, Path, PathBuf};

/// Source of snapshot blobs, addressed by the opaque refs stored on snapshots.
pub trait BlobSource {
    fn fetch_image_bytes(&self, blob_ref: &str) -> Result<Vec<u8>>;

    fn fetch_markup_text(&self, blob_ref: &str) -> Result<String>;
}

/// Blobs stored as plain files below one directory; a ref is a relative path.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, blob_ref: &str) -> Result<PathBuf> {
        let relative = Path::new(blob_ref);
        let escapes = blob_ref.is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            bail!("Blob ref is not a path inside the blob directory: {:?}", blob_ref);
        }
        Ok(self.root.join(relative))
    }

    /// Store bytes under `blob_ref`, creating subdirectories as needed.
    pub fn put(&self, blob_ref: &str, bytes: &[u8]) -> Result<String> {
        let path = self.resolve(blob_ref)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write blob {}", path.display()))?;
        Ok(blob_ref.to_string())
    }
}

impl BlobSource for FsBlobStore {
    fn fetch_image_bytes(&self, blob_ref: &str) -> Result<Vec<u8>> {
        let path = self.resolve(blob_ref)?;
        std::fs::read(&path).with_context(|| format!("Failed to read image {}", path.display()))
    }

    fn fetch_markup_text(&self, blob_ref: &str) -> Result<String> {
        let path = self.resolve(blob_ref)?;
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read markup {}", path.display()))?;
        // Captured pages are not always valid UTF-8
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use super::BlobSource;
    use anyhow::{anyhow, Result};
    use std::collections::HashMap;

    /// In-memory blob source for tests.
    #[derive(Default)]
    pub struct MemoryBlobStore {
        blobs: HashMap<String, Vec<u8>>,
    }

    impl MemoryBlobStore {
        pub fn insert(&mut self, blob_ref: &str, bytes: impl Into<Vec<u8>>) {
            self.blobs.insert(blob_ref.to_string(), bytes.into());
        }
    }

    impl BlobSource for MemoryBlobStore {
        fn fetch_image_bytes(&self, blob_ref: &str) -> Result<Vec<u8>> {
            self.blobs
                .get(blob_ref)
                .cloned()
                .ok_or_else(|| anyhow!("No such blob: {}", blob_ref))
        }

        fn fetch_markup_text(&self, blob_ref: &str) -> Result<String> {
            let bytes = self.fetch_image_bytes(blob_ref)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}
