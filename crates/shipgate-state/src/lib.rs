//! Shipgate-State: storage seams for the Shipgate pipeline
//!
//! This crate owns everything the orchestrator persists or reads back:
//!
//! - `ArtifactStore`: content-addressed, append-only artifact storage
//! - `RunLedger`: append-only audit trail of pipeline run events
//!
//! Backends are pluggable through async traits. In-memory fakes live in
//! [`fakes`]; a filesystem artifact store lives in [`fs_store`].

mod error;
pub mod fakes;
pub mod fs_store;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_store::FsArtifactStore;
pub use storage_traits::{
    ArtifactStore, ContentDigest, RunEvent, RunId, RunLedger, RunMetadata, RunRecord,
    StorageResult,
};
