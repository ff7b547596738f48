//! Message catalogue.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Source files keyed by package path, then by file name.
pub type SourceTree = BTreeMap<String, BTreeMap<String, String>>;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Binary contents travel as standard base64 text.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A single protocol envelope.
///
/// Serialized with an adjacent tag so that each frame reads
/// `{"type": "Queue", "message": {"position": 2}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum Message {
    // Server to client
    Queue(QueueProgress),
    Download(PhaseProgress),
    Compile(PhaseProgress),
    Store(StoreProgress),
    Complete(Complete),
    Error(ErrorReport),
    GetComplete(GetComplete),
    ShareComplete(ShareComplete),
    DeployQueryResponse(DeployQueryResponse),
    DeployDone(DeployDone),

    // Client to server
    PlaygroundCompile(PlaygroundCompile),
    Get(Get),
    Share(Share),
    DeployQuery(DeployQuery),
    DeployPayload(DeployPayload),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueProgress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub done: bool,
}

/// Progress of the Download and Compile phases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProgress {
    #[serde(default, skip_serializing_if = "is_false")]
    pub starting: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreProgress {
    #[serde(default, skip_serializing_if = "is_false")]
    pub starting: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unchanged: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remain: Option<usize>,
}

/// Terminal success of a standard compile job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complete {
    pub path: String,
    pub short: String,
    #[serde(rename = "hashmin")]
    pub hash_min: String,
    #[serde(rename = "hashmax")]
    pub hash_max: String,
}

/// Terminal failure, the only message a client sees after something went wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetComplete {
    pub source: SourceTree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareComplete {
    pub hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployQueryResponse {
    pub required: Vec<DeployFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployDone {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaygroundCompile {
    pub source: SourceTree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Get {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub source: SourceTree,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployQuery {
    pub files: Vec<DeployFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployPayload {
    pub files: Vec<DeployPayloadFile>,
}

/// Role of a file in a WebAssembly deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployFileType {
    Index,
    Loader,
    Wasm,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeployFile {
    #[serde(rename = "type")]
    pub file_type: DeployFileType,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployPayloadFile {
    #[serde(rename = "type")]
    pub file_type: DeployFileType,
    pub hash: String,
    #[serde(with = "base64_bytes")]
    pub contents: Vec<u8>,
}

impl Message {
    pub fn queue_position(position: usize) -> Self {
        Message::Queue(QueueProgress {
            position: Some(position),
            done: false,
        })
    }

    pub fn queue_done() -> Self {
        Message::Queue(QueueProgress {
            position: None,
            done: true,
        })
    }

    pub fn download_starting() -> Self {
        Message::Download(PhaseProgress {
            starting: true,
            ..Default::default()
        })
    }

    pub fn download_message(message: impl Into<String>) -> Self {
        Message::Download(PhaseProgress {
            message: Some(message.into()),
            ..Default::default()
        })
    }

    pub fn download_done() -> Self {
        Message::Download(PhaseProgress {
            done: true,
            ..Default::default()
        })
    }

    pub fn compile_starting() -> Self {
        Message::Compile(PhaseProgress {
            starting: true,
            ..Default::default()
        })
    }

    pub fn compile_message(message: impl Into<String>) -> Self {
        Message::Compile(PhaseProgress {
            message: Some(message.into()),
            ..Default::default()
        })
    }

    pub fn compile_done() -> Self {
        Message::Compile(PhaseProgress {
            done: true,
            ..Default::default()
        })
    }

    pub fn store_starting() -> Self {
        Message::Store(StoreProgress {
            starting: true,
            ..Default::default()
        })
    }

    pub fn store_progress(finished: usize, unchanged: usize, remain: usize) -> Self {
        Message::Store(StoreProgress {
            finished: Some(finished),
            unchanged: Some(unchanged),
            remain: Some(remain),
            ..Default::default()
        })
    }

    pub fn store_done() -> Self {
        Message::Store(StoreProgress {
            done: true,
            ..Default::default()
        })
    }

    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Message::Error(ErrorReport {
            path: path.into(),
            message: message.into(),
        })
    }

    /// The envelope tag, as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Queue(_) => "Queue",
            Message::Download(_) => "Download",
            Message::Compile(_) => "Compile",
            Message::Store(_) => "Store",
            Message::Complete(_) => "Complete",
            Message::Error(_) => "Error",
            Message::GetComplete(_) => "GetComplete",
            Message::ShareComplete(_) => "ShareComplete",
            Message::DeployQueryResponse(_) => "DeployQueryResponse",
            Message::DeployDone(_) => "DeployDone",
            Message::PlaygroundCompile(_) => "PlaygroundCompile",
            Message::Get(_) => "Get",
            Message::Share(_) => "Share",
            Message::DeployQuery(_) => "DeployQuery",
            Message::DeployPayload(_) => "DeployPayload",
        }
    }

    /// Whether this is a progress message carrying `done`.
    pub fn is_done(&self) -> bool {
        match self {
            Message::Queue(progress) => progress.done,
            Message::Download(progress) | Message::Compile(progress) => progress.done,
            Message::Store(progress) => progress.done,
            _ => false,
        }
    }

    /// Whether this message ends the job from the client's point of view.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Message::Complete(_)
                | Message::Error(_)
                | Message::GetComplete(_)
                | Message::ShareComplete(_)
                | Message::DeployDone(_)
        )
    }
}
