//! Fleet membership, health, and the request meter that feeds scaling.
//!
//! The fleet is shared by the orchestrator (snapshots for deployment), the
//! traffic gate (picking a member to forward to) and the autoscaler
//! (adding and removing members). All three go through short, synchronous
//! critical sections on one `RwLock`; no lock is held across an `.await`.

pub mod autoscaler;
pub mod scaling;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use shipgate_state::ContentDigest;
use tokio::time::Instant;

use crate::domain::{Artifact, MemberId};
use scaling::FleetMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: Health,
    /// Percent, when the member reports it.
    pub cpu_utilization: Option<f64>,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            status: Health::Healthy,
            cpu_utilization: None,
        }
    }

    pub fn unhealthy() -> Self {
        Self {
            status: Health::Unhealthy,
            cpu_utilization: None,
        }
    }

    pub fn with_cpu(mut self, cpu: f64) -> Self {
        self.cpu_utilization = Some(cpu);
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == Health::Healthy
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MemberError {
    #[error("member rejected artifact: {0}")]
    Rejected(String),

    #[error("member unreachable: {0}")]
    Unreachable(String),
}

/// One compute instance that can receive artifacts.
#[async_trait]
pub trait FleetMember: Send + Sync {
    fn id(&self) -> &MemberId;

    fn zone(&self) -> Option<&str> {
        None
    }

    /// Base URL the gate forwards to, if the member serves HTTP.
    fn endpoint(&self) -> Option<String> {
        None
    }

    async fn apply_artifact(&self, artifact: &Artifact, bytes: &[u8]) -> Result<(), MemberError>;

    async fn health_check(&self) -> HealthReport;
}

struct Slot {
    member: Arc<dyn FleetMember>,
    serving: bool,
    healthy: bool,
    active_artifact: Option<ContentDigest>,
    cpu: Option<f64>,
    joined: u64,
}

/// Operator view of one member.
#[derive(Debug, Clone, Serialize)]
pub struct MemberStatus {
    pub id: MemberId,
    pub zone: Option<String>,
    pub endpoint: Option<String>,
    pub serving: bool,
    pub healthy: bool,
    pub active_artifact: Option<ContentDigest>,
}

/// Sliding one-minute count of forwarded requests, kept as one counter per
/// second in a fixed ring so memory does not grow with traffic.
#[derive(Debug)]
pub struct RequestMeter {
    origin: Instant,
    buckets: Mutex<Vec<Bucket>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    second: u64,
    hits: u64,
}

impl Default for RequestMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl RequestMeter {
    /// The window is rounded down to whole seconds, with a floor of one.
    pub fn new(window: Duration) -> Self {
        let slots = window.as_secs().max(1) as usize;
        Self {
            origin: Instant::now(),
            buckets: Mutex::new(vec![Bucket::default(); slots]),
        }
    }

    fn now_second(&self) -> u64 {
        self.origin.elapsed().as_secs()
    }

    pub fn record(&self) {
        let second = self.now_second();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let slots = buckets.len() as u64;
        let bucket = &mut buckets[(second % slots) as usize];
        if bucket.second != second {
            *bucket = Bucket { second, hits: 0 };
        }
        bucket.hits += 1;
    }

    pub fn count(&self) -> u64 {
        let second = self.now_second();
        let buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let slots = buckets.len() as u64;
        buckets
            .iter()
            .filter(|b| second - b.second < slots)
            .map(|b| b.hits)
            .sum()
    }
}

/// Dynamically-sized pool of members.
#[derive(Default)]
pub struct Fleet {
    slots: RwLock<BTreeMap<MemberId, Slot>>,
    cursor: AtomicUsize,
    joins: AtomicU64,
    meter: RequestMeter,
}

impl std::fmt::Debug for Fleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fleet").field("members", &self.len()).finish()
    }
}

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<MemberId, Slot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<MemberId, Slot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a member as serving and healthy. Returns `false` if the id
    /// is already present.
    pub fn add(&self, member: Arc<dyn FleetMember>) -> bool {
        let id = member.id().clone();
        let mut slots = self.write();
        if slots.contains_key(&id) {
            return false;
        }
        let joined = self.joins.fetch_add(1, Ordering::Relaxed);
        slots.insert(
            id,
            Slot {
                member,
                serving: true,
                healthy: true,
                active_artifact: None,
                cpu: None,
                joined,
            },
        );
        true
    }

    pub fn remove(&self, id: &MemberId) -> Option<Arc<dyn FleetMember>> {
        self.write().remove(id).map(|slot| slot.member)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &MemberId) -> Option<Arc<dyn FleetMember>> {
        self.read().get(id).map(|slot| slot.member.clone())
    }

    /// Current membership, ordered by id. Later joins do not affect it.
    pub fn snapshot(&self) -> Vec<Arc<dyn FleetMember>> {
        self.read().values().map(|slot| slot.member.clone()).collect()
    }

    pub fn status(&self) -> Vec<MemberStatus> {
        self.read()
            .iter()
            .map(|(id, slot)| MemberStatus {
                id: id.clone(),
                zone: slot.member.zone().map(str::to_string),
                endpoint: slot.member.endpoint(),
                serving: slot.serving,
                healthy: slot.healthy,
                active_artifact: slot.active_artifact.clone(),
            })
            .collect()
    }

    pub fn set_serving(&self, id: &MemberId, serving: bool) {
        if let Some(slot) = self.write().get_mut(id) {
            slot.serving = serving;
        }
    }

    pub fn set_healthy(&self, id: &MemberId, healthy: bool) {
        if let Some(slot) = self.write().get_mut(id) {
            slot.healthy = healthy;
        }
    }

    pub fn record_activation(&self, id: &MemberId, version: ContentDigest) {
        if let Some(slot) = self.write().get_mut(id) {
            slot.active_artifact = Some(version);
            slot.healthy = true;
        }
    }

    pub fn active_artifact(&self, id: &MemberId) -> Option<ContentDigest> {
        self.read().get(id).and_then(|slot| slot.active_artifact.clone())
    }

    /// Members whose active artifact is not `current`.
    pub fn stale_members(&self, current: &ContentDigest) -> Vec<Arc<dyn FleetMember>> {
        self.read()
            .values()
            .filter(|slot| slot.active_artifact.as_ref() != Some(current))
            .map(|slot| slot.member.clone())
            .collect()
    }

    /// Round-robin over members that are both serving and healthy.
    pub fn pick_serving(&self) -> Option<Arc<dyn FleetMember>> {
        let slots = self.read();
        let eligible: Vec<&Slot> = slots
            .values()
            .filter(|slot| slot.serving && slot.healthy)
            .collect();
        if eligible.is_empty() {
            return None;
        }
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(eligible[n % eligible.len()].member.clone())
    }

    /// Poll every member once and store health and CPU.
    pub async fn refresh_health(&self) {
        for member in self.snapshot() {
            let report = member.health_check().await;
            if let Some(slot) = self.write().get_mut(member.id()) {
                slot.healthy = report.is_healthy();
                slot.cpu = report.cpu_utilization;
            }
        }
    }

    pub fn record_request(&self) {
        self.meter.record();
    }

    pub fn metrics(&self) -> FleetMetrics {
        let slots = self.read();
        let samples: Vec<f64> = slots.values().filter_map(|slot| slot.cpu).collect();
        let avg_cpu_utilization = if samples.is_empty() {
            None
        } else {
            Some(samples.iter().sum::<f64>() / samples.len() as f64)
        };
        FleetMetrics {
            requests_per_minute: Some(self.meter.count()),
            avg_cpu_utilization,
        }
    }

    /// Member count per zone, including zones with no members.
    pub fn zone_counts(&self, zones: &[String]) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> =
            zones.iter().map(|z| (z.clone(), 0)).collect();
        for slot in self.read().values() {
            if let Some(zone) = slot.member.zone() {
                *counts.entry(zone.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// The `n` most recently joined members, newest first.
    pub fn newest(&self, n: usize) -> Vec<MemberId> {
        let slots = self.read();
        let mut by_join: Vec<(&MemberId, u64)> =
            slots.iter().map(|(id, slot)| (id, slot.joined)).collect();
        by_join.sort_by(|a, b| b.1.cmp(&a.1));
        by_join.into_iter().take(n).map(|(id, _)| id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMember;

    fn fleet_of(ids: &[&str]) -> Fleet {
        let fleet = Fleet::new();
        for id in ids {
            assert!(fleet.add(Arc::new(FakeMember::new(*id))));
        }
        fleet
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let fleet = fleet_of(&["i-1"]);
        assert!(!fleet.add(Arc::new(FakeMember::new("i-1"))));
        assert_eq!(fleet.len(), 1);
    }

    #[test]
    fn pick_serving_round_robins_and_skips_drained() {
        let fleet = fleet_of(&["i-1", "i-2", "i-3"]);
        fleet.set_serving(&MemberId::new("i-2"), false);

        let picks: Vec<String> = (0..4)
            .map(|_| fleet.pick_serving().unwrap().id().to_string())
            .collect();
        assert_eq!(picks, vec!["i-1", "i-3", "i-1", "i-3"]);

        fleet.set_healthy(&MemberId::new("i-1"), false);
        fleet.set_healthy(&MemberId::new("i-3"), false);
        assert!(fleet.pick_serving().is_none());
    }

    #[test]
    fn stale_members_compare_active_artifact() {
        let fleet = fleet_of(&["i-1", "i-2"]);
        let v7 = ContentDigest::from_bytes(b"v7");
        fleet.record_activation(&MemberId::new("i-1"), v7.clone());

        let stale: Vec<_> = fleet
            .stale_members(&v7)
            .iter()
            .map(|m| m.id().clone())
            .collect();
        assert_eq!(stale, vec![MemberId::new("i-2")]);
    }

    #[test]
    fn newest_orders_by_join() {
        let fleet = fleet_of(&["i-b", "i-a", "i-c"]);
        assert_eq!(
            fleet.newest(2),
            vec![MemberId::new("i-c"), MemberId::new("i-a")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn request_meter_slides() {
        let meter = RequestMeter::default();
        meter.record();
        meter.record();
        tokio::time::advance(Duration::from_secs(30)).await;
        meter.record();
        assert_eq!(meter.count(), 3);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(meter.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_meter_reuses_buckets() {
        let meter = RequestMeter::default();
        for _ in 0..1000 {
            meter.record();
        }
        assert_eq!(meter.buckets.lock().unwrap().len(), 60);
        tokio::time::advance(Duration::from_secs(60)).await;
        meter.record();
        assert_eq!(meter.count(), 1);
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(meter.count(), 0);
    }

    #[tokio::test]
    async fn refresh_health_records_cpu() {
        let fleet = Fleet::new();
        let a = Arc::new(FakeMember::new("i-1"));
        a.set_cpu(Some(40.0));
        let b = Arc::new(FakeMember::new("i-2"));
        b.set_cpu(Some(80.0));
        fleet.add(a);
        fleet.add(b);

        fleet.refresh_health().await;
        let metrics = fleet.metrics();
        assert_eq!(metrics.avg_cpu_utilization, Some(60.0));
        assert_eq!(metrics.requests_per_minute, Some(0));
    }
}
