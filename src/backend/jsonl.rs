//! Record store appending JSON lines to a file.

use std::path::{Path, PathBuf};

use log::warn;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{CompileRecord, Record, RecordError, RecordStore};

const LOG_TARGET: &str = "buildfarm::backend::jsonl";

/// Append-only JSON-lines record log.
#[derive(Debug)]
pub struct JsonlRecordStore {
    path: PathBuf,
    // Serializes appends so lines never interleave.
    write_lock: Mutex<()>,
}

impl JsonlRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for JsonlRecordStore {
    async fn save(&self, record: Record) -> Result<(), RecordError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn lookup(&self, path: &str) -> Result<Option<CompileRecord>, RecordError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        for line in contents.lines().rev().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<Record>(line) {
                Ok(Record::Compile(record)) if record.path == path => return Ok(Some(record)),
                Ok(_) => {}
                Err(e) => {
                    warn!(target: LOG_TARGET, "Skipping unreadable record: {}", e);
                }
            }
        }
        Ok(None)
    }
}
