//! Provisioner backed by a fixed pool of standby members.
//!
//! "Launching" hands out an idle standby; "terminating" returns the member
//! to the pool. Members registered at startup are known to the pool too, so
//! scale-in can retire them and a later scale-out can bring them back.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use shipgate_core::config::MemberConfig;
use shipgate_core::{FleetMember, FleetProvisioner, MemberId, ProvisionError};

use crate::member::HttpFleetMember;

struct Pool {
    known: BTreeMap<MemberId, MemberConfig>,
    /// Idle ids in the order they became available.
    idle: Vec<MemberId>,
}

pub struct SparePool {
    pool: Mutex<Pool>,
    client: reqwest::Client,
}

impl SparePool {
    pub fn new(active: &[MemberConfig], spares: &[MemberConfig], client: reqwest::Client) -> Self {
        let mut known = BTreeMap::new();
        for config in active.iter().chain(spares) {
            known.insert(MemberId::new(config.id.clone()), config.clone());
        }
        let idle = spares.iter().map(|c| MemberId::new(c.id.clone())).collect();
        Self {
            pool: Mutex::new(Pool { known, idle }),
            client,
        }
    }

    fn pool(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn idle(&self) -> Vec<MemberId> {
        self.pool().idle.clone()
    }
}

#[async_trait]
impl FleetProvisioner for SparePool {
    /// Prefers a standby in `zone`, falling back to any standby.
    async fn launch(&self, zone: Option<&str>) -> Result<Arc<dyn FleetMember>, ProvisionError> {
        let mut pool = self.pool();
        let in_zone = zone.and_then(|zone| {
            pool.idle
                .iter()
                .position(|id| pool.known.get(id).and_then(|c| c.zone.as_deref()) == Some(zone))
        });
        let index = match in_zone {
            Some(index) => index,
            None if !pool.idle.is_empty() => 0,
            None => return Err(ProvisionError::Exhausted),
        };
        let id = pool.idle.remove(index);
        let config = pool
            .known
            .get(&id)
            .ok_or_else(|| ProvisionError::Failed(format!("unknown standby {id}")))?;
        Ok(Arc::new(HttpFleetMember::new(config, self.client.clone())))
    }

    async fn terminate(&self, member: &MemberId) -> Result<(), ProvisionError> {
        let mut pool = self.pool();
        if !pool.known.contains_key(member) {
            return Err(ProvisionError::Failed(format!("unknown member {member}")));
        }
        if !pool.idle.contains(member) {
            pool.idle.push(member.clone());
        }
        Ok(())
    }
}
