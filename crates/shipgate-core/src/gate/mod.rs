//! Traffic gate: edge tier in front of load-balancer listeners.
//!
//! Every request is evaluated against one immutable [`GatePolicy`]
//! snapshot. Replacing the policy swaps the `Arc` under a write lock, so a
//! request sees either the old policy or the new one, never a mix.

pub mod edge;
pub mod policy;
pub mod request;
pub mod rules;

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::domain::MemberId;
use crate::fleet::{Fleet, FleetMember};
use crate::metrics::METRICS;
use crate::obs;
use edge::{ContentEncoding, EdgeDecision};
pub use policy::GatePolicy;
pub use request::{GateRequest, GateResponse, Protocol};

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("secret header value must not be empty while edge gating is enabled")]
    EmptySecret,

    #[error("{protocol} listener has two rules at priority {priority}")]
    DuplicatePriority { protocol: Protocol, priority: u32 },
}

/// Where a request entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Edge,
    Origin,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Edge => f.write_str("edge"),
            Tier::Origin => f.write_str("origin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Forwarded {
        member: MemberId,
        endpoint: Option<String>,
        /// Request as it should reach the member.
        request: GateRequest,
        compression: Option<ContentEncoding>,
    },
    Redirected(GateResponse),
    AccessDenied(GateResponse),
    Fixed(GateResponse),
    /// No serving, healthy member. Not retried.
    OriginUnavailable(GateResponse),
}

impl GateOutcome {
    pub fn status(&self) -> u16 {
        match self {
            GateOutcome::Forwarded { .. } => 200,
            GateOutcome::Redirected(r)
            | GateOutcome::AccessDenied(r)
            | GateOutcome::Fixed(r)
            | GateOutcome::OriginUnavailable(r) => r.status,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GateOutcome::Forwarded { .. } => "forwarded",
            GateOutcome::Redirected(_) => "redirected",
            GateOutcome::AccessDenied(_) => "access_denied",
            GateOutcome::Fixed(_) => "fixed",
            GateOutcome::OriginUnavailable(_) => "origin_unavailable",
        }
    }

    /// Direct response, for every outcome except `Forwarded`.
    pub fn response(&self) -> Option<&GateResponse> {
        match self {
            GateOutcome::Forwarded { .. } => None,
            GateOutcome::Redirected(r)
            | GateOutcome::AccessDenied(r)
            | GateOutcome::Fixed(r)
            | GateOutcome::OriginUnavailable(r) => Some(r),
        }
    }
}

pub struct TrafficGate {
    policy: RwLock<Arc<GatePolicy>>,
    fleet: Arc<Fleet>,
}

impl TrafficGate {
    pub fn new(policy: GatePolicy, fleet: Arc<Fleet>) -> Self {
        Self {
            policy: RwLock::new(Arc::new(policy)),
            fleet,
        }
    }

    /// Current policy snapshot.
    pub fn policy(&self) -> Arc<GatePolicy> {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace_policy(&self, policy: GatePolicy) {
        obs::emit_policy_replaced(policy.header_name(), policy.features().edge_gating);
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(policy);
    }

    /// Swap in a new secret for both tiers at once.
    pub fn rotate_secret(&self, value: impl Into<String>) -> Result<(), GateError> {
        let next = self.policy().with_secret(value)?;
        self.replace_policy(next);
        Ok(())
    }

    pub fn route(&self, tier: Tier, req: &GateRequest) -> GateOutcome {
        let policy = self.policy();
        let outcome = match tier {
            Tier::Edge => match policy.edge.handle(req) {
                EdgeDecision::Redirect(resp) => GateOutcome::Redirected(resp),
                EdgeDecision::Forward {
                    request,
                    compression,
                } => self.at_origin(&policy, request, compression),
            },
            Tier::Origin => self.at_origin(&policy, req.clone(), None),
        };

        match &outcome {
            GateOutcome::Forwarded { .. } => METRICS.inc_requests_forwarded(),
            GateOutcome::Redirected(_) => METRICS.inc_requests_redirected(),
            GateOutcome::AccessDenied(_) | GateOutcome::Fixed(_) => METRICS.inc_requests_denied(),
            GateOutcome::OriginUnavailable(_) => METRICS.inc_requests_unavailable(),
        }
        obs::emit_gate_decision(
            &tier.to_string(),
            &req.protocol.to_string(),
            &req.path,
            outcome.label(),
            outcome.status(),
        );
        outcome
    }

    fn at_origin(
        &self,
        policy: &GatePolicy,
        request: GateRequest,
        compression: Option<ContentEncoding>,
    ) -> GateOutcome {
        let evaluation = policy.listener(request.protocol).evaluate(&request);
        match evaluation.action.respond(&request) {
            None => self.forward(request, compression),
            Some(resp) if resp.location.is_some() => GateOutcome::Redirected(resp),
            Some(resp) if resp.status == 403 => GateOutcome::AccessDenied(resp),
            Some(resp) => GateOutcome::Fixed(resp),
        }
    }

    fn forward(&self, request: GateRequest, compression: Option<ContentEncoding>) -> GateOutcome {
        match self.fleet.pick_serving() {
            Some(member) => {
                self.fleet.record_request();
                GateOutcome::Forwarded {
                    member: member.id().clone(),
                    endpoint: member.endpoint(),
                    request,
                    compression,
                }
            }
            None => GateOutcome::OriginUnavailable(GateResponse::fixed(
                503,
                "text/plain",
                "Service Unavailable",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Features, GateConfig};
    use crate::testing::FakeMember;

    fn gate(features: Features) -> (Arc<Fleet>, TrafficGate) {
        let fleet = Arc::new(Fleet::new());
        fleet.add(Arc::new(
            FakeMember::new("i-1").with_endpoint("http://10.0.0.11:9000"),
        ));
        let config = GateConfig {
            header_value: "s3cr3t".into(),
            ..GateConfig::default()
        };
        let policy = GatePolicy::from_config(&config, &features).unwrap();
        (fleet.clone(), TrafficGate::new(policy, fleet))
    }

    #[test]
    fn origin_without_header_is_denied() {
        let (_, gate) = gate(Features::default());
        let req = GateRequest::new(Protocol::Https, "origin.example.com", "/");
        match gate.route(Tier::Origin, &req) {
            GateOutcome::AccessDenied(resp) => {
                assert_eq!(resp.status, 403);
                assert_eq!(resp.content_type.as_deref(), Some("text/plain"));
                assert_eq!(resp.body, "Access Denied");
            }
            other => panic!("expected 403, got {other:?}"),
        }
    }

    #[test]
    fn edge_injects_header_and_forwards() {
        let (fleet, gate) = gate(Features::default());
        let req = GateRequest::new(Protocol::Https, "cdn.example.com", "/")
            .with_header("Accept-Encoding", "gzip");
        match gate.route(Tier::Edge, &req) {
            GateOutcome::Forwarded {
                member,
                endpoint,
                request,
                compression,
            } => {
                assert_eq!(member, MemberId::new("i-1"));
                assert_eq!(endpoint.as_deref(), Some("http://10.0.0.11:9000"));
                assert_eq!(request.header("x-secret"), Some("s3cr3t"));
                assert_eq!(compression, Some(ContentEncoding::Gzip));
            }
            other => panic!("expected forward, got {other:?}"),
        }
        assert_eq!(fleet.metrics().requests_per_minute, Some(1));
    }

    #[test]
    fn http_origin_redirects_before_header_check() {
        let (_, gate) = gate(Features::default());
        let req = GateRequest::new(Protocol::Http, "origin.example.com", "/x")
            .with_header("X-Secret", "s3cr3t");
        let outcome = gate.route(Tier::Origin, &req);
        assert_eq!(outcome.status(), 301);
        assert_eq!(
            outcome.response().and_then(|r| r.location.as_deref()),
            Some("https://origin.example.com/x")
        );
    }

    #[test]
    fn no_healthy_member_is_unavailable() {
        let (fleet, gate) = gate(Features::default());
        fleet.set_healthy(&MemberId::new("i-1"), false);
        let req = GateRequest::new(Protocol::Https, "origin", "/").with_header("X-Secret", "s3cr3t");
        assert_eq!(gate.route(Tier::Origin, &req).status(), 503);
    }

    #[test]
    fn rotation_swaps_whole_policy() {
        let (_, gate) = gate(Features::default());
        let before = gate.policy();
        gate.rotate_secret("n3w").unwrap();

        let old = GateRequest::new(Protocol::Https, "origin", "/").with_header("X-Secret", "s3cr3t");
        assert_eq!(gate.route(Tier::Origin, &old).status(), 403);
        let new = GateRequest::new(Protocol::Https, "origin", "/").with_header("X-Secret", "n3w");
        assert_eq!(gate.route(Tier::Origin, &new).status(), 200);

        // snapshots taken earlier are untouched
        assert_eq!(before.edge.secret.as_ref().unwrap().value, "s3cr3t");
    }
}
