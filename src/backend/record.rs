//! Persisted job outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::DeployFile;

/// One entry in the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Record {
    Compile(CompileRecord),
    Error(ErrorRecord),
    Share(ShareRecord),
    Deploy(DeployRecord),
}

/// A successful standard compile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileRecord {
    pub path: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub min: CompiledContents,
    pub max: CompiledContents,
}

/// Hashes of everything published for one compiled flavor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledContents {
    pub main: String,
    #[serde(default)]
    pub packages: Vec<PackageRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub path: String,
    pub hash: String,
    pub standard: bool,
}

/// A failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub path: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub files: usize,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub files: Vec<DeployFile>,
}

impl Record {
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Compile(_) => "Compile",
            Record::Error(_) => "Error",
            Record::Share(_) => "Share",
            Record::Deploy(_) => "Deploy",
        }
    }
}
