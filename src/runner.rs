//! Job runner: drives one job from admission to its terminal message.
//!
//! # Phases
//!
//! ```text
//! Queued -> Downloading -> Compiling -> Storing -> Complete
//!    \___________\_____________\___________\_____> Failed
//! ```
//!
//! Each connection runs exactly one job. Every job ends with exactly one
//! terminal message (Complete, GetComplete, ShareComplete, DeployDone, or
//! Error) unless the client is already gone. Failures are recorded in the
//! record store according to [`JobError::is_recorded`].

mod compile;
mod phase;
mod playground;
mod record;

pub use phase::{IllegalTransition, Phase, PhaseTracker};
pub use record::JobSummary;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, RecordStore};
use crate::connection::{self, ConnectionSettings, JobIo, MessageSender, Transport};
use crate::error::{JobError, JobResult};
use crate::protocol::{
    Complete, DeployDone, GetComplete, Message, ShareComplete, SourceTree,
};
use crate::queue::AdmissionQueue;
use crate::upload::{ArtifactHash, panic_message};

const LOG_TARGET: &str = "buildfarm::runner";

/// Which flow a connection runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobVariant {
    /// Resolve, compile, and publish a package path.
    Standard,
    /// Wait for one playground instruction from the client.
    Playground,
}

/// A job as requested by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Normalized package path.
    pub path: String,
    pub variant: JobVariant,
    /// Client address as reported by the fronting proxy.
    pub origin: Option<String>,
}

impl JobRequest {
    pub fn new(path: impl Into<String>, variant: JobVariant) -> Self {
        Self {
            path: path.into(),
            variant,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }
}

/// Bucket names artifacts are published to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buckets {
    /// Shared playground sources.
    pub src: String,
    /// Compiled scripts, package archives, loaders, and wasm binaries.
    pub pkg: String,
    /// Index pages and manifests.
    pub index: String,
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            src: "src".into(),
            pkg: "pkg".into(),
            index: "index".into(),
        }
    }
}

/// Runner tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    /// How long a playground connection waits for its instruction.
    pub instruction_timeout: Duration,
    /// Workers per upload batch.
    pub concurrent_uploads: usize,
    pub buckets: Buckets,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            instruction_timeout: Duration::from_secs(5),
            concurrent_uploads: 10,
            buckets: Buckets::default(),
        }
    }
}

/// How a job succeeded.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Completion {
    Compiled(Complete),
    Fetched(SourceTree),
    Shared(ArtifactHash),
    Deployed,
}

impl Completion {
    fn into_message(self) -> Message {
        match self {
            Completion::Compiled(complete) => Message::Complete(complete),
            Completion::Fetched(source) => Message::GetComplete(GetComplete { source }),
            Completion::Shared(hash) => Message::ShareComplete(ShareComplete {
                hash: hash.to_string(),
            }),
            Completion::Deployed => Message::DeployDone(DeployDone {}),
        }
    }
}

/// Per-job context handed to the phase handlers.
pub(crate) struct JobContext<'a> {
    pub request: &'a JobRequest,
    pub sender: &'a MessageSender,
    pub token: &'a CancellationToken,
    pub phase: PhaseTracker,
}

impl JobContext<'_> {
    pub(crate) fn advance(&mut self, next: Phase) -> JobResult<()> {
        self.phase
            .advance(next)
            .map_err(|e| JobError::internal(e.to_string()))
    }

    pub(crate) async fn send(&self, message: Message) -> JobResult<()> {
        self.sender.send(message).await.map_err(JobError::from)
    }

    /// Run `future` unless the job is cancelled first.
    pub(crate) async fn cancellable<F: Future>(&self, future: F) -> JobResult<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(JobError::Cancelled),
            output = future => Ok(output),
        }
    }
}

/// Long-lived service shared by every connection.
pub struct JobService<B: Backend> {
    backend: B,
    queue: AdmissionQueue,
    settings: RunnerSettings,
    connection: ConnectionSettings,
    shutdown: CancellationToken,
    recent: DashMap<String, JobSummary>,
}

impl<B: Backend> JobService<B> {
    pub fn new(
        backend: B,
        queue: AdmissionQueue,
        settings: RunnerSettings,
        connection: ConnectionSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            backend,
            queue,
            settings,
            connection,
            shutdown,
            recent: DashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Latest outcome seen for `path` since startup.
    pub fn recent(&self, path: &str) -> Option<JobSummary> {
        self.recent.get(path).map(|entry| entry.value().clone())
    }

    /// Run one job over `transport` and tear the connection down.
    ///
    /// A panic anywhere in the job is caught and reported to the client as
    /// "panic recovered: ..."; the admission slot is returned either way.
    pub async fn run_connection<T: Transport>(self: Arc<Self>, transport: T, request: JobRequest) {
        let (connection, io) = connection::open(transport, &self.connection, &self.shutdown);
        info!(
            target: LOG_TARGET,
            "Connection {} started job for {} ({:?})",
            connection.id(),
            request.path,
            request.variant
        );
        let sender = io.sender.clone();

        let job = tokio::spawn({
            let service = Arc::clone(&self);
            let request = request.clone();
            async move { service.run_job(&request, io).await }
        });

        match job.await {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(target: LOG_TARGET, "Job for {} panicked: {}", request.path, message);
                self.fail(&request, &sender, JobError::PanicRecovered(message))
                    .await;
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "Job for {} aborted: {}", request.path, e);
            }
        }
        drop(sender);

        let report = connection.close().await;
        if let Some(failure) = report.failure() {
            self.record_error(&request, &failure).await;
        }
    }

    async fn run_job(&self, request: &JobRequest, io: JobIo) {
        let JobIo {
            sender,
            mut inbound,
            token,
        } = io;
        let mut job = JobContext {
            request,
            sender: &sender,
            token: &token,
            phase: PhaseTracker::new(),
        };

        match self.drive(&mut job, &mut inbound).await {
            Ok(completion) => {
                debug!(
                    target: LOG_TARGET,
                    "Job for {} finished in phase {}",
                    request.path,
                    job.phase.current()
                );
                if let Completion::Compiled(complete) = &completion {
                    self.recent
                        .insert(request.path.clone(), JobSummary::success(complete));
                }
                if sender.send(completion.into_message()).await.is_err() {
                    debug!(target: LOG_TARGET, "Client left before completion of {}", request.path);
                }
            }
            Err(error) => {
                let _ = job.phase.advance(Phase::Failed);
                self.fail(request, &sender, error).await;
            }
        }
    }

    async fn drive(
        &self,
        job: &mut JobContext<'_>,
        inbound: &mut mpsc::Receiver<Message>,
    ) -> JobResult<Completion> {
        let position_sender = job.sender.clone();
        let slot = self.queue.slot(move |position| {
            // Position updates are advisory; never block the queue on them.
            let _ = position_sender.try_send(Message::queue_position(position));
        })?;
        let _end = slot
            .start(job.token)
            .await
            .map_err(|_| JobError::Cancelled)?;
        job.send(Message::queue_done()).await?;

        match job.request.variant {
            JobVariant::Standard => self.compile_package(job).await,
            JobVariant::Playground => self.playground(job, inbound).await,
        }
    }

    /// Report and record a failure according to its policy.
    async fn fail(&self, request: &JobRequest, sender: &MessageSender, error: JobError) {
        let error = match error {
            JobError::Cancelled if self.shutdown.is_cancelled() => JobError::ShutDown,
            other => other,
        };
        if !error.is_reported() {
            debug!(target: LOG_TARGET, "Job for {} cancelled", request.path);
            return;
        }
        warn!(target: LOG_TARGET, "Job for {} failed: {}", request.path, error);

        self.recent
            .insert(request.path.clone(), JobSummary::failure(&error));
        let _ = sender
            .send(Message::error(request.path.clone(), error.to_string()))
            .await;
        if error.is_recorded() {
            self.record_error(request, &error.to_string()).await;
        }
    }

    pub(crate) async fn record_error(&self, request: &JobRequest, message: &str) {
        let record = record::error_record(request, message);
        if let Err(e) = self.backend.records().save(record).await {
            warn!(target: LOG_TARGET, "Failed to record error for {}: {}", request.path, e);
        }
    }
}
