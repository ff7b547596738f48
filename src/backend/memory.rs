//! In-memory blob and record stores.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use super::{BlobError, BlobStore, CompileRecord, PutOptions, Record, RecordError, RecordStore};

/// An object held by [`MemoryBlobStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub contents: Vec<u8>,
    pub mime: &'static str,
    pub cache_control: &'static str,
}

/// Blob store backed by a concurrent map. Counts writes so tests can assert
/// on idempotence.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: DashMap<(String, String), StoredObject>,
    puts: AtomicUsize,
    failure: Mutex<Option<String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket: &str, name: &str) -> Option<StoredObject> {
        self.objects
            .get(&(bucket.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Number of successful writes since creation.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Names stored in `bucket`, sorted.
    pub fn names(&self, bucket: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == bucket)
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();
        names
    }

    /// Make every subsequent call fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
    }

    fn check(&self) -> Result<(), BlobError> {
        match &*self.failure.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(message) => Err(BlobError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }
}

impl BlobStore for MemoryBlobStore {
    async fn exists(&self, bucket: &str, name: &str) -> Result<bool, BlobError> {
        self.check()?;
        Ok(self
            .objects
            .contains_key(&(bucket.to_string(), name.to_string())))
    }

    async fn put(
        &self,
        bucket: &str,
        name: &str,
        contents: &[u8],
        options: PutOptions,
    ) -> Result<(), BlobError> {
        self.check()?;
        self.objects.insert(
            (bucket.to_string(), name.to_string()),
            StoredObject {
                contents: contents.to_vec(),
                mime: options.mime,
                cache_control: options.cache_control,
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Record store backed by a vector.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<Record>>,
    failure: Mutex<Option<String>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything saved so far, in order.
    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
    }
}

impl RecordStore for MemoryRecordStore {
    async fn save(&self, record: Record) -> Result<(), RecordError> {
        if let Some(message) = &*self.failure.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(RecordError::Unavailable(message.clone()));
        }
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }

    async fn lookup(&self, path: &str) -> Result<Option<CompileRecord>, RecordError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.iter().rev().find_map(|record| match record {
            Record::Compile(compile) if compile.path == path => Some(compile.clone()),
            _ => None,
        }))
    }
}
