//! Step-by-step trace of how the gate policy treats one request.

use serde::Serialize;
use shipgate_core::gate::edge::EdgeDecision;
use shipgate_core::gate::rules::Action;
use shipgate_core::{GatePolicy, GateRequest, Protocol, Tier};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Step {
    EdgeRedirect {
        location: String,
        status: u16,
    },
    EdgeForward {
        injected_header: Option<String>,
        compression: Option<&'static str>,
    },
    Listener {
        protocol: Protocol,
        /// `None` when the default action applied.
        matched_priority: Option<u32>,
        action: Action,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub tier: Tier,
    pub steps: Vec<Step>,
    pub verdict: String,
}

pub fn explain(policy: &GatePolicy, tier: Tier, req: GateRequest) -> Explanation {
    let mut steps = Vec::new();
    let req = match tier {
        Tier::Origin => req,
        Tier::Edge => match policy.edge.handle(&req) {
            EdgeDecision::Redirect(resp) => {
                let location = resp.location.clone().unwrap_or_default();
                steps.push(Step::EdgeRedirect {
                    location: location.clone(),
                    status: resp.status,
                });
                return Explanation {
                    tier,
                    steps,
                    verdict: format!("{} redirect to {}", resp.status, location),
                };
            }
            EdgeDecision::Forward {
                request,
                compression,
            } => {
                steps.push(Step::EdgeForward {
                    injected_header: policy.edge.secret.as_ref().map(|s| s.name.clone()),
                    compression: compression.map(|c| c.as_str()),
                });
                request
            }
        },
    };

    let evaluation = policy.listener(req.protocol).evaluate(&req);
    steps.push(Step::Listener {
        protocol: req.protocol,
        matched_priority: evaluation.priority,
        action: evaluation.action.clone(),
    });
    let verdict = match evaluation.action.respond(&req) {
        None => "forward to fleet".to_string(),
        Some(resp) => match resp.location {
            Some(location) => format!("{} redirect to {}", resp.status, location),
            None => format!("{} {}", resp.status, resp.body),
        },
    };
    Explanation {
        tier,
        steps,
        verdict,
    }
}

pub fn render_text(explanation: &Explanation) -> String {
    let mut out = format!("tier: {}\n", explanation.tier);
    for step in &explanation.steps {
        let line = match step {
            Step::EdgeRedirect { location, status } => {
                format!("  edge: viewer on HTTP, {status} to {location}")
            }
            Step::EdgeForward {
                injected_header,
                compression,
            } => format!(
                "  edge: forward over HTTPS (header: {}, compression: {})",
                injected_header.as_deref().unwrap_or("none"),
                compression.unwrap_or("none")
            ),
            Step::Listener {
                protocol,
                matched_priority,
                action,
            } => {
                let rule = matched_priority
                    .map(|p| format!("rule {p}"))
                    .unwrap_or_else(|| "default action".to_string());
                format!("  {protocol} listener: {rule} -> {}", action_label(action))
            }
        };
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str(&format!("verdict: {}", explanation.verdict));
    out
}

fn action_label(action: &Action) -> String {
    match action {
        Action::Forward => "forward".to_string(),
        Action::Redirect {
            protocol, status, ..
        } => format!("redirect {status} to {protocol}"),
        Action::FixedResponse { status, body, .. } => format!("fixed {status} {body:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipgate_core::config::GateConfig;
    use shipgate_core::Features;

    fn policy(features: Features) -> GatePolicy {
        let config = GateConfig {
            header_value: "s3cr3t".to_string(),
            ..GateConfig::default()
        };
        GatePolicy::from_config(&config, &features).unwrap()
    }

    fn req(protocol: Protocol) -> GateRequest {
        GateRequest::new(protocol, "app.example.com", "/")
    }

    #[test]
    fn origin_without_header_hits_default() {
        let e = explain(&policy(Features::default()), Tier::Origin, req(Protocol::Https));
        assert_eq!(e.steps.len(), 1);
        assert!(matches!(
            e.steps[0],
            Step::Listener {
                matched_priority: None,
                ..
            }
        ));
        assert_eq!(e.verdict, "403 Access Denied");
    }

    #[test]
    fn edge_request_matches_header_rule() {
        let e = explain(&policy(Features::default()), Tier::Edge, req(Protocol::Https));
        assert_eq!(e.steps.len(), 2);
        assert_eq!(
            e.steps[0],
            Step::EdgeForward {
                injected_header: Some("X-Secret".to_string()),
                compression: None,
            }
        );
        assert!(matches!(
            e.steps[1],
            Step::Listener {
                matched_priority: Some(1),
                ..
            }
        ));
        assert_eq!(e.verdict, "forward to fleet");
        assert!(render_text(&e).contains("rule 1 -> forward"));
    }

    #[test]
    fn http_viewer_is_redirected_at_edge() {
        let e = explain(&policy(Features::default()), Tier::Edge, req(Protocol::Http));
        assert_eq!(e.steps.len(), 1);
        assert_eq!(e.verdict, "301 redirect to https://app.example.com/");
    }

    #[test]
    fn gating_off_forwards_at_origin() {
        let features = Features {
            edge_gating: false,
            ..Features::default()
        };
        let e = explain(&policy(features), Tier::Origin, req(Protocol::Https));
        assert_eq!(e.verdict, "forward to fleet");
    }
}
