//! Storage trait definitions for Shipgate
//!
//! These traits define the two storage abstractions the orchestrator needs:
//! - `ArtifactStore`: content-addressed artifact storage (put/get by digest)
//! - `RunLedger`: append-only audit trail of pipeline runs
//!
//! All traits are async and backend-agnostic.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ArtifactStore: content-addressed storage
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private so the string is always lowercase hex produced
/// by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.0
    }
}

impl FromStr for ContentDigest {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ContentDigest::try_from(s.to_string())
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content-addressed artifact store.
///
/// Guarantees:
/// - `put(data)` always returns the SHA-256 digest of `data`.
/// - `get(digest)` returns the exact bytes previously stored.
/// - A `get`/`contains` issued after a successful `put` by the same caller
///   observes the write (read-after-write).
/// - Objects are never overwritten or deleted by the pipeline.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store bytes and return their content digest.
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest>;

    /// Retrieve bytes by digest. Returns `StorageError::NotFound` if absent.
    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>>;

    /// Check whether a digest exists in the store.
    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool>;

    /// Backend-specific address of the object (URI or path).
    fn locate(&self, digest: &ContentDigest) -> String;
}

// ---------------------------------------------------------------------------
// RunLedger: pipeline run audit trail
// ---------------------------------------------------------------------------

/// Unique identifier for a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(RunId(Uuid::parse_str(s)?))
    }
}

/// Metadata attached to a run when it is first recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Human-readable source reference (e.g. "main@3f2a9c1" or "manual:ops")
    pub source: String,
    /// Arbitrary key-value tags
    pub tags: serde_json::Value,
}

/// A single audit event for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Monotonic sequence number within the run
    pub seq: u64,
    /// Event kind (e.g. "transition", "member_outcome", "artifact_published")
    pub kind: String,
    /// Event payload
    pub payload: serde_json::Value,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    pub fn new(seq: u64, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            seq,
            kind: kind.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Ledger entry for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub metadata: RunMetadata,
    pub event_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only run ledger.
///
/// Guarantees:
/// - A run is recorded exactly once.
/// - Events are returned ordered by `seq`.
/// - Events are never rewritten; terminal runs may still receive events
///   (a rollback is recorded against the failed run it recovers).
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Record a new run. Fails with `DuplicateRun` if the id is known.
    async fn create_run(&self, run_id: &RunId, metadata: RunMetadata) -> StorageResult<()>;

    /// Append an event to a run.
    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()>;

    /// Retrieve a run record by ID.
    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// Retrieve all events for a run, ordered by seq.
    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>>;

    /// List all recorded runs, oldest first.
    async fn list_runs(&self) -> StorageResult<Vec<RunRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_lowercase_hex() {
        let d = ContentDigest::from_bytes(b"artifact");
        assert_eq!(d.as_str().len(), 64);
        assert!(d.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(d.short().len(), 12);
    }

    #[test]
    fn digest_try_from_normalizes_case() {
        let upper = ContentDigest::from_bytes(b"x").as_str().to_ascii_uppercase();
        let parsed = ContentDigest::try_from(upper).unwrap();
        assert_eq!(parsed, ContentDigest::from_bytes(b"x"));
    }

    #[test]
    fn digest_rejects_wrong_length() {
        assert!(matches!(
            "abcd".parse::<ContentDigest>(),
            Err(StorageError::InvalidDigest { .. })
        ));
    }

    #[test]
    fn digest_serde_validates() {
        let bad = serde_json::from_str::<ContentDigest>("\"zz\"");
        assert!(bad.is_err());

        let d = ContentDigest::from_bytes(b"v7");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", d.as_str()));
    }

    #[test]
    fn run_id_parses_from_display() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
