//! In-memory fakes for storage traits
//!
//! Provides `MemoryArtifactStore` and `MemoryRunLedger` that satisfy the
//! trait contracts without any external dependencies. The artifact store has
//! fault-injection switches so publish failures can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryArtifactStore
// ---------------------------------------------------------------------------

/// In-memory artifact store backed by a `HashMap<digest, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    store: Mutex<HashMap<String, Vec<u8>>>,
    reject_writes: AtomicBool,
    drop_writes: AtomicBool,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail with `StorageError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.reject_writes.store(unavailable, Ordering::SeqCst);
    }

    /// Acknowledge subsequent writes without persisting them.
    pub fn set_dropping_writes(&self, dropping: bool) {
        self.drop_writes.store(dropping, Ordering::SeqCst);
    }

    /// Number of distinct objects held.
    pub fn len(&self) -> usize {
        self.store.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "memory store rejecting writes".to_string(),
            ));
        }
        let digest = ContentDigest::from_bytes(data);
        if !self.drop_writes.load(Ordering::SeqCst) {
            let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            store
                .entry(digest.as_str().to_string())
                .or_insert_with(|| data.to_vec());
        }
        Ok(digest)
    }

    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        store
            .get(digest.as_str())
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                digest: digest.as_str().to_string(),
            })
    }

    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool> {
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(store.contains_key(digest.as_str()))
    }

    fn locate(&self, digest: &ContentDigest) -> String {
        format!("mem://artifacts/{}", digest)
    }
}

// ---------------------------------------------------------------------------
// MemoryRunLedger
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LedgerEntry {
    record: RunRecord,
    events: Vec<RunEvent>,
}

/// In-memory run ledger backed by a `HashMap<RunId, LedgerEntry>`.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    runs: Mutex<HashMap<RunId, LedgerEntry>>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
    async fn create_run(&self, run_id: &RunId, metadata: RunMetadata) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if runs.contains_key(run_id) {
            return Err(StorageError::DuplicateRun {
                run_id: run_id.to_string(),
            });
        }
        let now = Utc::now();
        runs.insert(
            *run_id,
            LedgerEntry {
                record: RunRecord {
                    run_id: *run_id,
                    metadata,
                    event_count: 0,
                    created_at: now,
                    updated_at: now,
                },
                events: Vec::new(),
            },
        );
        Ok(())
    }

    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = runs
            .get_mut(run_id)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        entry.record.event_count += 1;
        entry.record.updated_at = event.timestamp;
        entry.events.push(event);
        Ok(())
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        runs.get(run_id)
            .map(|e| e.record.clone())
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = runs.get(run_id).ok_or_else(|| StorageError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        let mut events = entry.events.clone();
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    async fn list_runs(&self) -> StorageResult<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<RunRecord> = runs.values().map(|e| e.record.clone()).collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}
