//! Built artifact as registered in the artifact store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipgate_state::ContentDigest;

/// Immutable, content-addressed build output.
///
/// `version` is the SHA-256 of the bytes, so two builds producing identical
/// output share one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub version: ContentDigest,
    /// Backend-specific address returned by the store.
    pub location: String,
    pub size: u64,
    pub published_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(version: ContentDigest, location: impl Into<String>, size: u64) -> Self {
        Self {
            version,
            location: location.into(),
            size,
            published_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes)", self.version.short(), self.size)
    }
}
