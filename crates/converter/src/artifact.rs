use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const HANDLE_PREFIX: &str = "blob:swk/";

/// Dereferenceable, revocable reference to artifact bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactHandle(String);

impl ArtifactHandle {
    fn fresh() -> Self {
        Self(format!("{}{}", HANDLE_PREFIX, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Converted output bytes with the MIME type they were actually encoded as
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Bytes,
    pub mime: String,
}

impl Artifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Shared registry of live artifacts, in the manner of an object-URL table.
///
/// Every handle keeps its bytes alive until it is revoked, so each `create`
/// must be paired with exactly one `revoke`. Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    entries: Arc<Mutex<HashMap<ArtifactHandle, Artifact>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register bytes and hand back a new handle for them
    pub fn create(&self, bytes: impl Into<Bytes>, mime: impl Into<String>) -> ArtifactHandle {
        let handle = ArtifactHandle::fresh();
        let artifact = Artifact {
            bytes: bytes.into(),
            mime: mime.into(),
        };
        debug!("Created artifact {} ({} bytes, {})", handle, artifact.len(), artifact.mime);
        self.entries.lock().insert(handle.clone(), artifact);
        handle
    }

    /// Look up a live handle. Revoked handles resolve to `None`.
    pub fn resolve(&self, handle: &ArtifactHandle) -> Option<Artifact> {
        self.entries.lock().get(handle).cloned()
    }

    /// Release the bytes behind a handle. Returns false if it was already released.
    pub fn revoke(&self, handle: &ArtifactHandle) -> bool {
        let released = self.entries.lock().remove(handle).is_some();
        if released {
            debug!("Revoked artifact {}", handle);
        }
        released
    }

    /// Number of handles not yet revoked
    pub fn live(&self) -> usize {
        self.entries.lock().len()
    }
}
