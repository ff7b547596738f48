//! Concurrent, deduplicating publisher for content-addressed artifacts.
//!
//! Items are handed to a fixed pool of workers. Each item is checked
//! against its declared hash, skipped if an identical immutable object is
//! already stored (or was already claimed earlier in the same batch), and
//! otherwise written with its MIME type and cache policy. The first failure
//! is kept and returned from [`Uploader::wait`]; items still queued after
//! it are skipped.

mod hash;
mod item;

pub use hash::ArtifactHash;
pub use item::{CACHE_IMMUTABLE, CACHE_MUTABLE, UploadItem, mime};

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backend::{BlobStore, PutOptions};
use crate::connection::MessageSender;
use crate::error::{JobError, JobResult};
use crate::protocol::Message;

const LOG_TARGET: &str = "buildfarm::upload";

/// Counts over the items marked `count`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Written to the store.
    pub finished: usize,
    /// Already present, not rewritten.
    pub unchanged: usize,
    /// Added but not yet processed.
    pub remain: usize,
}

struct Shared<B> {
    store: Arc<B>,
    progress: Option<MessageSender>,
    claimed: DashMap<(String, String), ()>,
    counts: Mutex<UploadSummary>,
    first_error: Mutex<Option<JobError>>,
}

impl<B: BlobStore> Shared<B> {
    fn has_failed(&self) -> bool {
        self.first_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn fail(&self, error: JobError) {
        let mut slot = self.first_error.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            warn!(target: LOG_TARGET, "Upload failed: {}", error);
            *slot = Some(error);
        }
    }

    async fn process(&self, item: UploadItem) -> JobResult<()> {
        if let Some(declared) = &item.declared_hash {
            let calculated = ArtifactHash::of(&item.contents);
            if calculated.as_str() != declared {
                return Err(JobError::HashMismatch {
                    name: item.label.clone(),
                    declared: declared.clone(),
                    calculated: calculated.to_string(),
                });
            }
        }

        let key = (item.bucket.clone(), item.name.clone());
        let duplicate = self.claimed.insert(key, ()).is_some();

        let unchanged = if duplicate {
            true
        } else if item.immutable {
            self.store
                .exists(&item.bucket, &item.name)
                .await
                .map_err(|source| JobError::Upload {
                    name: item.name.clone(),
                    source,
                })?
        } else {
            false
        };

        if !unchanged {
            let options = PutOptions {
                mime: item.mime,
                cache_control: item.cache_control(),
            };
            self.store
                .put(&item.bucket, &item.name, &item.contents, options)
                .await
                .map_err(|source| JobError::Upload {
                    name: item.name.clone(),
                    source,
                })?;
        }
        debug!(
            target: LOG_TARGET,
            "{} {}/{}",
            if unchanged { "Unchanged" } else { "Stored" },
            item.bucket,
            item.label
        );

        self.record(&item, unchanged).await;
        Ok(())
    }

    async fn record(&self, item: &UploadItem, unchanged: bool) {
        if !item.count {
            return;
        }
        let counts = {
            let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
            if unchanged {
                counts.unchanged += 1;
            } else {
                counts.finished += 1;
            }
            counts.remain = counts.remain.saturating_sub(1);
            *counts
        };
        if item.notify {
            if let Some(progress) = &self.progress {
                let _ = progress
                    .send(Message::store_progress(
                        counts.finished,
                        counts.unchanged,
                        counts.remain,
                    ))
                    .await;
            }
        }
    }
}

/// A batch of uploads processed by `concurrency` workers.
pub struct Uploader<B> {
    tx: mpsc::Sender<UploadItem>,
    workers: JoinSet<()>,
    shared: Arc<Shared<B>>,
    token: CancellationToken,
}

impl<B: BlobStore> Uploader<B> {
    /// Start the worker pool. Store progress goes to `progress` when given.
    pub fn new(
        store: Arc<B>,
        concurrency: usize,
        token: CancellationToken,
        progress: Option<MessageSender>,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let (tx, rx) = mpsc::channel::<UploadItem>(concurrency);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(Shared {
            store,
            progress,
            claimed: DashMap::new(),
            counts: Mutex::new(UploadSummary::default()),
            first_error: Mutex::new(None),
        });

        let mut workers = JoinSet::new();
        for _ in 0..concurrency {
            let rx = Arc::clone(&rx);
            let shared = Arc::clone(&shared);
            let token = token.clone();
            workers.spawn(async move {
                loop {
                    let next = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => None,
                            item = rx.recv() => item,
                        }
                    };
                    let Some(item) = next else {
                        break;
                    };
                    if shared.has_failed() {
                        continue;
                    }
                    let result = tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(JobError::Cancelled),
                        result = shared.process(item) => result,
                    };
                    if let Err(e) = result {
                        shared.fail(e);
                    }
                }
            });
        }

        Self {
            tx,
            workers,
            shared,
            token,
        }
    }

    /// Queue an item, waiting for a free worker if the pool is busy.
    pub async fn add(&self, item: UploadItem) -> JobResult<()> {
        if self.token.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        if item.count {
            self.shared
                .counts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remain += 1;
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(JobError::Cancelled),
            sent = self.tx.send(item) => sent.map_err(|_| JobError::Cancelled),
        }
    }

    /// Close the batch, wait for every worker, and return the first error.
    pub async fn wait(self) -> JobResult<UploadSummary> {
        let Uploader {
            tx,
            mut workers,
            shared,
            token,
        } = self;
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    shared.fail(JobError::PanicRecovered(panic_message(e.into_panic())));
                }
            }
        }

        if let Some(error) = shared
            .first_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            return Err(error);
        }
        if token.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let summary = *shared.counts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(summary)
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
