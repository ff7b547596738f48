//! Blob store rooted in a local directory.
//!
//! Objects live at `<root>/<bucket>/<name>`; their upload metadata sits next
//! to them in `<name>.meta.json`.

use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;

use super::{BlobError, BlobStore, PutOptions, is_safe_relative};

const LOG_TARGET: &str = "buildfarm::backend::directory";

#[derive(Debug, Clone)]
pub struct DirectoryBlobStore {
    root: PathBuf,
}

#[derive(Serialize)]
struct ObjectMetadata<'a> {
    mime: &'a str,
    cache_control: &'a str,
}

impl DirectoryBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, name: &str) -> Result<PathBuf, BlobError> {
        if !is_safe_relative(bucket) || bucket.contains('/') {
            return Err(BlobError::InvalidName {
                name: bucket.to_string(),
            });
        }
        if !is_safe_relative(name) {
            return Err(BlobError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(self.root.join(bucket).join(name))
    }
}

impl BlobStore for DirectoryBlobStore {
    async fn exists(&self, bucket: &str, name: &str) -> Result<bool, BlobError> {
        let path = self.object_path(bucket, name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn put(
        &self,
        bucket: &str,
        name: &str,
        contents: &[u8],
        options: PutOptions,
    ) -> Result<(), BlobError> {
        let path = self.object_path(bucket, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so readers never observe a partial object.
        let staging = path.with_file_name(format!(
            ".{}.{}.partial",
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("object"),
            ulid::Ulid::new()
        ));
        tokio::fs::write(&staging, contents).await?;
        tokio::fs::rename(&staging, &path).await?;

        let metadata = serde_json::to_vec(&ObjectMetadata {
            mime: options.mime,
            cache_control: options.cache_control,
        })
        .map_err(|e| BlobError::Unavailable(e.to_string()))?;
        let mut meta_path = path.into_os_string();
        meta_path.push(".meta.json");
        tokio::fs::write(&meta_path, metadata).await?;

        debug!(target: LOG_TARGET, "Stored {}/{} ({} bytes)", bucket, name, contents.len());
        Ok(())
    }
}
