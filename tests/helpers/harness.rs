//! Job service harness over in-memory collaborators and connections.

use std::sync::Arc;

use buildfarm::backend::{Collaborators, MemoryBlobStore, MemoryRecordStore, Record};
use buildfarm::connection::ConnectionSettings;
use buildfarm::connection::memory::{MemoryPeer, memory_transport};
use buildfarm::runner::RunnerSettings;
use buildfarm::{AdmissionQueue, JobRequest, JobService, Message};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::fakes::{ScriptedCompiler, StaticResolver};

pub type TestBackend =
    Collaborators<StaticResolver, ScriptedCompiler, MemoryBlobStore, MemoryRecordStore>;

/// A job service over in-memory collaborators.
pub struct Harness {
    pub service: Arc<JobService<TestBackend>>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new(resolver: StaticResolver, compiler: ScriptedCompiler, queue: AdmissionQueue) -> Self {
        Self::with_settings(
            resolver,
            compiler,
            queue,
            RunnerSettings::default(),
            test_connection_settings(),
        )
    }

    pub fn with_settings(
        resolver: StaticResolver,
        compiler: ScriptedCompiler,
        queue: AdmissionQueue,
        runner: RunnerSettings,
        connection: ConnectionSettings,
    ) -> Self {
        let backend = Collaborators {
            resolver,
            compiler,
            blobs: Arc::new(MemoryBlobStore::new()),
            records: MemoryRecordStore::new(),
        };
        let shutdown = CancellationToken::new();
        let service = Arc::new(JobService::new(
            backend,
            queue,
            runner,
            connection,
            shutdown.clone(),
        ));
        Self { service, shutdown }
    }

    /// Open an in-memory connection running `request`.
    pub fn connect(&self, request: JobRequest) -> (MemoryPeer, JoinHandle<()>) {
        let (transport, peer) = memory_transport(64);
        let handle = tokio::spawn(Arc::clone(&self.service).run_connection(transport, request));
        (peer, handle)
    }

    pub fn blobs(&self) -> &MemoryBlobStore {
        &self.service.backend().blobs
    }

    pub fn records(&self) -> Vec<Record> {
        self.service.backend().records.records()
    }

    pub fn compiler(&self) -> &ScriptedCompiler {
        &self.service.backend().compiler
    }
}

pub fn test_connection_settings() -> ConnectionSettings {
    ConnectionSettings {
        drain_delay: std::time::Duration::from_millis(50),
        ..ConnectionSettings::default()
    }
}

/// Read messages until one matches `pred`, returning everything read.
/// Panics if the connection closes first.
pub async fn read_until(peer: &mut MemoryPeer, pred: impl Fn(&Message) -> bool) -> Vec<Message> {
    let mut seen = Vec::new();
    loop {
        match peer.next_message().await {
            Some(message) => {
                let matched = pred(&message);
                seen.push(message);
                if matched {
                    return seen;
                }
            }
            None => panic!("connection closed before expected message; saw {seen:?}"),
        }
    }
}

pub fn is_compile_starting(message: &Message) -> bool {
    matches!(message, Message::Compile(progress) if progress.starting)
}

pub fn is_store(message: &Message) -> bool {
    matches!(message, Message::Store(_))
}

pub fn terminal_count(messages: &[Message]) -> usize {
    messages.iter().filter(|m| m.is_terminal()).count()
}
