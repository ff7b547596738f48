//! A single upload unit.

/// MIME types of published artifacts.
pub mod mime {
    pub const HTML: &str = "text/html";
    pub const JS: &str = "application/javascript";
    pub const JSON: &str = "application/json";
    pub const WASM: &str = "application/wasm";
}

/// Cache policy for immutable, content-addressed objects.
pub const CACHE_IMMUTABLE: &str = "public, max-age=31536000, immutable";
/// Cache policy for objects that are overwritten in place.
pub const CACHE_MUTABLE: &str = "no-cache";

/// One object to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    /// Human-readable label used in logs.
    pub label: String,
    pub bucket: String,
    pub name: String,
    pub contents: Vec<u8>,
    pub mime: &'static str,
    /// Hash the client claims for `contents`; verified before upload.
    pub declared_hash: Option<String>,
    /// Counts toward finished/unchanged/remain.
    pub count: bool,
    /// Content-addressed: never rewritten once it exists.
    pub immutable: bool,
    /// Emit a Store progress message when this item finishes.
    pub notify: bool,
}

impl UploadItem {
    /// A counted, immutable object with progress notification.
    pub fn immutable(
        bucket: impl Into<String>,
        name: impl Into<String>,
        contents: Vec<u8>,
        mime: &'static str,
    ) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            bucket: bucket.into(),
            name,
            contents,
            mime,
            declared_hash: None,
            count: true,
            immutable: true,
            notify: true,
        }
    }

    /// A counted object that replaces any previous version.
    pub fn mutable(
        bucket: impl Into<String>,
        name: impl Into<String>,
        contents: Vec<u8>,
        mime: &'static str,
    ) -> Self {
        Self {
            immutable: false,
            ..Self::immutable(bucket, name, contents, mime)
        }
    }

    pub fn with_declared_hash(mut self, hash: impl Into<String>) -> Self {
        self.declared_hash = Some(hash.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn cache_control(&self) -> &'static str {
        if self.immutable {
            CACHE_IMMUTABLE
        } else {
            CACHE_MUTABLE
        }
    }
}
