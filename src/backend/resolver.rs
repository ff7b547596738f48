//! Source resolver reading packages from a local source root.

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::debug;

use super::{ResolveError, SourceResolver, is_safe_relative};
use crate::connection::MessageSender;
use crate::protocol::{Message, SourceTree};

const LOG_TARGET: &str = "buildfarm::backend::resolver";

/// File suffixes that belong to a package's source.
pub const VALID_EXTENSIONS: &[&str] = &[".go", ".jsgo.html", ".inc.js", ".md"];

/// Resolves `path` to `<root>/<path>` and collects its source files.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

pub(crate) fn is_source_file(name: &str) -> bool {
    VALID_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) && !name.ends_with("_test.go")
}

impl SourceResolver for DirectoryResolver {
    async fn resolve(&self, path: &str, progress: &MessageSender) -> Result<SourceTree, ResolveError> {
        if !is_safe_relative(path) {
            return Err(ResolveError::InvalidPath {
                path: path.to_string(),
            });
        }
        progress
            .send(Message::download_message(path))
            .await
            .map_err(|_| ResolveError::Cancelled)?;

        let dir = self.root.join(path);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ResolveError::NotFound {
                    path: path.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut files = BTreeMap::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_source_file(&name) || !entry.file_type().await?.is_file() {
                continue;
            }
            let contents = tokio::fs::read_to_string(entry.path()).await?;
            files.insert(name, contents);
        }

        if files.is_empty() {
            return Err(ResolveError::NoSourceFiles {
                path: path.to_string(),
            });
        }
        debug!(target: LOG_TARGET, "Resolved {} ({} files)", path, files.len());

        let mut tree = SourceTree::new();
        tree.insert(path.to_string(), files);
        Ok(tree)
    }
}
