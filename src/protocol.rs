//! Wire protocol between the service and its clients.
//!
//! Every frame on the connection is a JSON envelope
//! `{"type": "<Tag>", "message": {...}}`. Progress messages carry a
//! `starting` and a `done` flag; once a client has seen `done` for a type it
//! ignores later messages of that type (see [`DoneTracker`]).

mod message;

pub use message::{
    Complete, DeployDone, DeployFile, DeployFileType, DeployPayload, DeployPayloadFile,
    DeployQuery, DeployQueryResponse, ErrorReport, Get, GetComplete, Message, PhaseProgress,
    PlaygroundCompile, QueueProgress, Share, ShareComplete, SourceTree, StoreProgress,
};

use std::collections::HashSet;

/// Decode a single text frame into a [`Message`].
pub fn decode(text: &str) -> Result<Message, serde_json::Error> {
    serde_json::from_str(text)
}

/// Encode a [`Message`] into a single text frame.
pub fn encode(message: &Message) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Client-side view of the "done is final" rule.
///
/// Messages may arrive out of order relative to the phases that produced
/// them. A progress message for a type whose `done` was already observed is
/// stale and must be ignored.
#[derive(Debug, Default)]
pub struct DoneTracker {
    done: HashSet<&'static str>,
}

impl DoneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the message should be applied, `false` when it is
    /// stale.
    pub fn accept(&mut self, message: &Message) -> bool {
        let kind = message.kind();
        if self.done.contains(kind) {
            return false;
        }
        if message.is_done() {
            self.done.insert(kind);
        }
        true
    }

    pub fn is_done(&self, kind: &str) -> bool {
        self.done.contains(kind)
    }
}
