//! Record construction and the in-process outcome summary.

use chrono::{DateTime, Utc};

use super::JobRequest;
use crate::backend::{
    CompileRecord, CompiledContents, DeployRecord, ErrorRecord, Record, ShareRecord,
};
use crate::error::JobError;
use crate::protocol::{Complete, DeployFile};

/// Latest outcome for a path, kept in memory for the page route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub time: DateTime<Utc>,
    /// Minified main hash on success.
    pub hash_min: Option<String>,
    /// Error text on failure.
    pub error: Option<String>,
}

impl JobSummary {
    pub(crate) fn success(complete: &Complete) -> Self {
        Self {
            time: Utc::now(),
            hash_min: Some(complete.hash_min.clone()),
            error: None,
        }
    }

    pub(crate) fn failure(error: &JobError) -> Self {
        Self {
            time: Utc::now(),
            hash_min: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub(crate) fn error_record(request: &JobRequest, message: &str) -> Record {
    Record::Error(ErrorRecord {
        path: request.path.clone(),
        time: Utc::now(),
        origin: request.origin.clone(),
        error: message.to_string(),
    })
}

pub(crate) fn compile_record(
    request: &JobRequest,
    min: CompiledContents,
    max: CompiledContents,
) -> Record {
    Record::Compile(CompileRecord {
        path: request.path.clone(),
        time: Utc::now(),
        origin: request.origin.clone(),
        min,
        max,
    })
}

pub(crate) fn share_record(request: &JobRequest, files: usize, hash: &str) -> Record {
    Record::Share(ShareRecord {
        time: Utc::now(),
        origin: request.origin.clone(),
        files,
        hash: hash.to_string(),
    })
}

pub(crate) fn deploy_record(request: &JobRequest, files: Vec<DeployFile>) -> Record {
    Record::Deploy(DeployRecord {
        time: Utc::now(),
        origin: request.origin.clone(),
        files,
    })
}
