//! Collaborator seams: source resolution, compilation, blob storage, and the
//! record store.
//!
//! The job runner only ever talks to these traits. Production wiring uses
//! the directory/command/JSONL adapters; tests use the in-memory ones.

mod command;
mod directory;
mod jsonl;
pub mod memory;
mod record;
mod resolver;

pub use command::CommandCompiler;
pub use directory::DirectoryBlobStore;
pub use jsonl::JsonlRecordStore;
pub use memory::{MemoryBlobStore, MemoryRecordStore, StoredObject};
pub use record::{
    CompileRecord, CompiledContents, DeployRecord, ErrorRecord, PackageRecord, Record,
    ShareRecord,
};
pub use resolver::{DirectoryResolver, VALID_EXTENSIONS};

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::connection::MessageSender;
use crate::protocol::SourceTree;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("package {path} not found")]
    NotFound { path: String },

    #[error("no source files found in {path}")]
    NoSourceFiles { path: String },

    #[error("invalid package path {path:?}")]
    InvalidPath { path: String },

    #[error("reading source: {0}")]
    Io(#[from] std::io::Error),

    #[error("resolve cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compiler exited with {status}: {output}")]
    Failed { status: String, output: String },

    #[error("no compiler command configured")]
    NotConfigured,

    #[error("starting compiler {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("compiler I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid source file name {name:?}")]
    InvalidSource { name: String },

    #[error("compile cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid object name {name:?}")]
    InvalidName { name: String },

    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// One compiled flavor (minified or full) of a program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledProgram {
    /// The main script.
    pub main: Vec<u8>,
    /// Per-package archives, published alongside the main script.
    pub packages: Vec<CompiledPackage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPackage {
    pub path: String,
    pub contents: Vec<u8>,
    /// Part of the standard library rather than user code.
    pub standard: bool,
}

/// Both flavors of a compiled program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutput {
    pub min: CompiledProgram,
    pub max: CompiledProgram,
}

/// Upload options for a single object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    pub mime: &'static str,
    pub cache_control: &'static str,
}

/// Fetches the source tree for a package path.
pub trait SourceResolver: Send + Sync + 'static {
    /// Resolve `path`. Progress lines may be sent as Download messages.
    fn resolve(
        &self,
        path: &str,
        progress: &MessageSender,
    ) -> impl Future<Output = Result<SourceTree, ResolveError>> + Send;
}

/// Compiles a source tree into minified and full variants.
pub trait Compiler: Send + Sync + 'static {
    /// Compile `path` from `source`. Diagnostics may be sent as Compile
    /// messages.
    fn compile(
        &self,
        path: &str,
        source: &SourceTree,
        progress: &MessageSender,
    ) -> impl Future<Output = Result<CompileOutput, CompileError>> + Send;
}

/// Bucketed object storage.
pub trait BlobStore: Send + Sync + 'static {
    fn exists(
        &self,
        bucket: &str,
        name: &str,
    ) -> impl Future<Output = Result<bool, BlobError>> + Send;

    fn put(
        &self,
        bucket: &str,
        name: &str,
        contents: &[u8],
        options: PutOptions,
    ) -> impl Future<Output = Result<(), BlobError>> + Send;
}

/// Append-only store of job outcomes.
pub trait RecordStore: Send + Sync + 'static {
    fn save(&self, record: Record) -> impl Future<Output = Result<(), RecordError>> + Send;

    /// Most recent successful compile of `path`, if any.
    fn lookup(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<CompileRecord>, RecordError>> + Send;
}

/// Bundle of collaborators a job service runs against.
pub trait Backend: Send + Sync + 'static {
    type Resolver: SourceResolver;
    type Compiler: Compiler;
    type Blobs: BlobStore;
    type Records: RecordStore;

    fn resolver(&self) -> &Self::Resolver;
    fn compiler(&self) -> &Self::Compiler;
    fn blobs(&self) -> &Arc<Self::Blobs>;
    fn records(&self) -> &Self::Records;
}

/// Plain struct implementation of [`Backend`].
pub struct Collaborators<R, C, B, S> {
    pub resolver: R,
    pub compiler: C,
    pub blobs: Arc<B>,
    pub records: S,
}

impl<R, C, B, S> Backend for Collaborators<R, C, B, S>
where
    R: SourceResolver,
    C: Compiler,
    B: BlobStore,
    S: RecordStore,
{
    type Resolver = R;
    type Compiler = C;
    type Blobs = B;
    type Records = S;

    fn resolver(&self) -> &R {
        &self.resolver
    }

    fn compiler(&self) -> &C {
        &self.compiler
    }

    fn blobs(&self) -> &Arc<B> {
        &self.blobs
    }

    fn records(&self) -> &S {
        &self.records
    }
}

/// Validate a slash-separated relative name: no empty, `.`, or `..`
/// components and no absolute prefix.
pub(crate) fn is_safe_relative(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.contains('\\')
        && name
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("github.com/a/b.0123.js", true)]
    #[case("fmt", true)]
    #[case("", false)]
    #[case("/etc/passwd", false)]
    #[case("a/../b", false)]
    #[case("a//b", false)]
    #[case("a\\b", false)]
    #[case("./a", false)]
    fn safe_relative_names(#[case] name: &str, #[case] safe: bool) {
        assert_eq!(is_safe_relative(name), safe, "{name:?}");
    }
}
