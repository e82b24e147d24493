//! Scaling policies and their max-wins composition.
//!
//! Each policy turns one fleet metric into a recommended fleet size. The
//! planner takes the largest recommendation and clamps it to `[min, max]`.
//! A policy cooling down from its previous action keeps voting the size it
//! drove the fleet to, so a quieter policy cannot undo that action before
//! the cooldown ends. A policy whose metric has no sample does not vote.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMetric {
    /// Requests per minute per instance, measured at the fleet.
    RequestsPerMinute,
    /// Average CPU utilization across members, in percent.
    CpuUtilization,
}

impl std::fmt::Display for ScalingMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalingMetric::RequestsPerMinute => f.write_str("requests_per_minute"),
            ScalingMetric::CpuUtilization => f.write_str("cpu_utilization"),
        }
    }
}

/// Target-tracking policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub name: String,
    pub metric: ScalingMetric,
    pub target: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_cooldown() -> u64 {
    300
}

impl ScalingPolicy {
    pub fn requests_per_minute(target: f64) -> Self {
        Self {
            name: "requests-per-minute".to_string(),
            metric: ScalingMetric::RequestsPerMinute,
            target,
            cooldown_secs: default_cooldown(),
        }
    }

    pub fn cpu_utilization(target: f64) -> Self {
        Self {
            name: "cpu-utilization".to_string(),
            metric: ScalingMetric::CpuUtilization,
            target,
            cooldown_secs: default_cooldown(),
        }
    }

    /// Recommended size for `current` members, or `None` without a sample.
    pub fn recommend(&self, current: usize, metrics: &FleetMetrics) -> Option<usize> {
        if self.target <= 0.0 {
            return None;
        }
        let wanted = match self.metric {
            ScalingMetric::RequestsPerMinute => {
                let total = metrics.requests_per_minute? as f64;
                (total / self.target).ceil()
            }
            ScalingMetric::CpuUtilization => {
                let avg = metrics.avg_cpu_utilization?;
                (current as f64 * avg / self.target).ceil()
            }
        };
        Some(wanted.max(0.0) as usize)
    }
}

/// Inputs measured at the fleet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetMetrics {
    /// Requests forwarded to the fleet over the last minute.
    pub requests_per_minute: Option<u64>,
    /// Mean of the members' last reported CPU, in percent.
    pub avg_cpu_utilization: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub policy: String,
    pub desired: usize,
    /// Held over from the policy's last action while it cools down.
    #[serde(default)]
    pub held: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub current: usize,
    pub desired: usize,
    /// Policy whose recommendation won, if any policy was active.
    pub driven_by: Option<String>,
    pub recommendations: Vec<Recommendation>,
}

impl ScalingDecision {
    pub fn delta(&self) -> i64 {
        self.desired as i64 - self.current as i64
    }
}

/// Composes policies and tracks their cooldowns.
#[derive(Debug, Clone)]
pub struct ScalingPlanner {
    min: usize,
    max: usize,
    policies: Vec<ScalingPolicy>,
    last_acted: HashMap<String, LastAction>,
}

#[derive(Debug, Clone, Copy)]
struct LastAction {
    at: DateTime<Utc>,
    size: usize,
}

impl ScalingPlanner {
    pub fn new(min: usize, max: usize, policies: Vec<ScalingPolicy>) -> Self {
        Self {
            min,
            max: max.max(min),
            policies,
            last_acted: HashMap::new(),
        }
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.min, self.max)
    }

    pub fn policies(&self) -> &[ScalingPolicy] {
        &self.policies
    }

    /// The size a policy is still holding, if its cooldown has not ended.
    fn held_size(&self, policy: &ScalingPolicy, now: DateTime<Utc>) -> Option<usize> {
        self.last_acted
            .get(&policy.name)
            .filter(|last| {
                now.signed_duration_since(last.at) < Duration::seconds(policy.cooldown_secs as i64)
            })
            .map(|last| last.size)
    }

    /// Compute the desired size without recording anything.
    pub fn plan(&self, current: usize, metrics: &FleetMetrics, now: DateTime<Utc>) -> ScalingDecision {
        let recommendations: Vec<Recommendation> = self
            .policies
            .iter()
            .filter_map(|p| match self.held_size(p, now) {
                Some(size) => Some(Recommendation {
                    policy: p.name.clone(),
                    desired: size,
                    held: true,
                }),
                None => p.recommend(current, metrics).map(|desired| Recommendation {
                    policy: p.name.clone(),
                    desired,
                    held: false,
                }),
            })
            .collect();

        // Ties go to a fresh recommendation so its cooldown starts.
        let winner = recommendations
            .iter()
            .max_by_key(|r| (r.desired, !r.held));
        let (desired, driven_by) = match winner {
            Some(r) => (r.desired.clamp(self.min, self.max), Some(r.policy.clone())),
            None => (current.clamp(self.min, self.max), None),
        };

        ScalingDecision {
            current,
            desired,
            driven_by,
            recommendations,
        }
    }

    /// Start the cooldown of the policy that drove an applied decision. A
    /// held recommendation does not restart its own cooldown.
    pub fn record_action(&mut self, decision: &ScalingDecision, now: DateTime<Utc>) {
        let Some(policy) = &decision.driven_by else {
            return;
        };
        let fresh = decision
            .recommendations
            .iter()
            .any(|r| &r.policy == policy && !r.held);
        if fresh {
            self.last_acted.insert(
                policy.clone(),
                LastAction {
                    at: now,
                    size: decision.desired,
                },
            );
        }
    }
}
