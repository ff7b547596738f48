//! Error taxonomy for job processing.
//!
//! Every failure that can end a job is a [`JobError`]. The variants decide
//! two policies: whether the failure is reported to the client, and whether
//! it is persisted to the record store.

use thiserror::Error;

use crate::backend::{BlobError, CompileError, RecordError, ResolveError};
use crate::queue::QueueFull;

/// Errors that terminate a single job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Admission rejected: every slot is busy and the backlog is full.
    #[error("too many items queued")]
    QueueFull,

    /// Fetching the package source failed.
    #[error("{0}")]
    Resolve(ResolveError),

    /// The compiler failed.
    #[error("{0}")]
    Compile(CompileError),

    /// Recomputed content hash disagrees with the declared one.
    #[error("hash not consistent for {name}: declared {declared}, calculated {calculated}")]
    HashMismatch {
        name: String,
        declared: String,
        calculated: String,
    },

    /// The blob store rejected an existence check or an upload.
    #[error("storing {name}: {source}")]
    Upload {
        name: String,
        #[source]
        source: BlobError,
    },

    /// A bounded wait ran out.
    #[error("timed out waiting for {what}")]
    PhaseTimeout { what: &'static str },

    /// A panic was caught while processing the connection.
    #[error("panic recovered: {0}")]
    PanicRecovered(String),

    /// Writing to the record store failed.
    #[error("saving record: {0}")]
    Record(#[from] RecordError),

    /// The client sent something the current phase cannot handle.
    #[error("{0}")]
    Protocol(String),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),

    /// The server is shutting down.
    #[error("server shut down")]
    ShutDown,

    /// The connection went away; nobody is listening any more.
    #[error("connection cancelled")]
    Cancelled,
}

/// Result type for job operations
pub type JobResult<T> = Result<T, JobError>;

impl JobError {
    /// Whether the failure should be sent to the client as an Error message.
    pub fn is_reported(&self) -> bool {
        !matches!(self, JobError::Cancelled)
    }

    /// Whether the failure should be persisted to the record store.
    ///
    /// QueueFull is skipped so an overload cannot flood the store, and a
    /// record-store failure is never recorded again.
    pub fn is_recorded(&self) -> bool {
        !matches!(
            self,
            JobError::QueueFull | JobError::Record(_) | JobError::Cancelled
        )
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        JobError::Protocol(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        JobError::Internal(message.into())
    }
}

impl From<QueueFull> for JobError {
    fn from(_: QueueFull) -> Self {
        JobError::QueueFull
    }
}

impl From<ResolveError> for JobError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::Cancelled => JobError::Cancelled,
            other => JobError::Resolve(other),
        }
    }
}

impl From<CompileError> for JobError {
    fn from(error: CompileError) -> Self {
        match error {
            CompileError::Cancelled => JobError::Cancelled,
            other => JobError::Compile(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_full_is_reported_but_not_recorded() {
        let error = JobError::QueueFull;
        assert!(error.is_reported());
        assert!(!error.is_recorded());
        assert_eq!(error.to_string(), "too many items queued");
    }

    #[test]
    fn record_failure_is_not_recorded_again() {
        let error = JobError::Record(RecordError::Unavailable("datastore down".into()));
        assert!(error.is_reported());
        assert!(!error.is_recorded());
    }

    #[test]
    fn cancelled_is_silent() {
        assert!(!JobError::Cancelled.is_reported());
        assert!(!JobError::Cancelled.is_recorded());
    }

    #[test]
    fn phase_failures_are_reported_and_recorded() {
        let errors = [
            JobError::Compile(CompileError::Failed {
                status: "exit status: 1".into(),
                output: "syntax error".into(),
            }),
            JobError::PhaseTimeout {
                what: "instruction from client",
            },
            JobError::PanicRecovered("boom".into()),
            JobError::ShutDown,
        ];
        for error in errors {
            assert!(error.is_reported(), "{error} should be reported");
            assert!(error.is_recorded(), "{error} should be recorded");
        }
    }

    #[test]
    fn cancelled_collaborator_errors_collapse_to_cancelled() {
        assert!(matches!(
            JobError::from(ResolveError::Cancelled),
            JobError::Cancelled
        ));
        assert!(matches!(
            JobError::from(CompileError::Cancelled),
            JobError::Cancelled
        ));
    }

    #[test]
    fn timeout_message_names_what_was_awaited() {
        let error = JobError::PhaseTimeout {
            what: "instruction from client",
        };
        assert_eq!(
            error.to_string(),
            "timed out waiting for instruction from client"
        );
    }
}
