//! Build-farm front end.
//!
//! A client opens a duplex connection naming a package path; the service
//! admits the job under a concurrency budget, drives the external resolver and
//! compiler, streams phase progress back over the connection, and publishes
//! the resulting artifacts to a content-addressed blob store.
//!
//! The load-bearing pieces are:
//! - [`queue`]: bounded-concurrency, bounded-backlog FIFO admission
//! - [`connection`]: per-connection outbound/inbound pumps, keepalive and
//!   cancellation
//! - [`runner`]: the per-job phase state machine
//! - [`upload`]: the concurrent, deduplicating content-addressed uploader
//!
//! Everything else ([`backend`], [`server`], [`config`]) is composition and
//! collaborator plumbing.

pub mod backend;
pub mod config;
pub mod connection;
pub mod error;
pub mod path;
pub mod protocol;
pub mod queue;
pub mod runner;
pub mod server;
pub mod upload;

pub use error::{JobError, JobResult};
pub use protocol::Message;
pub use queue::AdmissionQueue;
pub use runner::{JobRequest, JobService, JobVariant};
pub use upload::Uploader;
