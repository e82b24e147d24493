//! Traffic gate behaviour across both tiers.

use std::sync::Arc;

use shipgate_core::config::{Features, GateConfig};
use shipgate_core::gate::edge::ContentEncoding;
use shipgate_core::testing::FakeMember;
use shipgate_core::{Fleet, GateOutcome, GatePolicy, GateRequest, MemberId, Protocol, Tier, TrafficGate};

const SECRET: &str = "b7d1c0ffee";

fn gate_with(features: Features, members: &[&str]) -> (Arc<Fleet>, TrafficGate) {
    let fleet = Arc::new(Fleet::new());
    for id in members {
        fleet.add(Arc::new(
            FakeMember::new(*id).with_endpoint(format!("http://{id}.internal:9000")),
        ));
    }
    let config = GateConfig {
        header_value: SECRET.to_string(),
        ..GateConfig::default()
    };
    let policy = GatePolicy::from_config(&config, &features).unwrap();
    (fleet.clone(), TrafficGate::new(policy, fleet))
}

fn https(path: &str) -> GateRequest {
    GateRequest::new(Protocol::Https, "origin.example.com", path)
}

#[test]
fn request_without_header_gets_access_denied() {
    let (_, gate) = gate_with(Features::default(), &["i-1"]);
    for path in ["/", "/api", "/health", "/static/app.js"] {
        match gate.route(Tier::Origin, &https(path)) {
            GateOutcome::AccessDenied(resp) => {
                assert_eq!(resp.status, 403);
                assert_eq!(resp.content_type.as_deref(), Some("text/plain"));
                assert_eq!(resp.body, "Access Denied");
            }
            other => panic!("{path}: expected 403, got {other:?}"),
        }
    }
}

#[test]
fn wrong_header_value_is_denied() {
    let (_, gate) = gate_with(Features::default(), &["i-1"]);
    let req = https("/").with_header("X-Secret", "guessed");
    assert_eq!(gate.route(Tier::Origin, &req).status(), 403);
}

#[test]
fn same_request_through_edge_is_forwarded() {
    let (_, gate) = gate_with(Features::default(), &["i-1"]);
    let req = GateRequest::new(Protocol::Https, "www.example.com", "/")
        .with_header("Accept-Encoding", "br, gzip");
    match gate.route(Tier::Edge, &req) {
        GateOutcome::Forwarded {
            member,
            request,
            compression,
            ..
        } => {
            assert_eq!(member, MemberId::new("i-1"));
            assert_eq!(request.header("X-Secret"), Some(SECRET));
            assert_eq!(request.protocol, Protocol::Https);
            assert_eq!(compression, Some(ContentEncoding::Br));
        }
        other => panic!("expected forward, got {other:?}"),
    }
}

#[test]
fn http_always_redirects_first() {
    let (_, gate) = gate_with(Features::default(), &["i-1"]);
    let with_secret = GateRequest::new(Protocol::Http, "origin.example.com", "/pay")
        .with_header("X-Secret", SECRET);
    let without = GateRequest::new(Protocol::Http, "origin.example.com", "/pay");

    for tier in [Tier::Origin, Tier::Edge] {
        for req in [&with_secret, &without] {
            match gate.route(tier, req) {
                GateOutcome::Redirected(resp) => {
                    assert_eq!(resp.status, 301);
                    assert_eq!(
                        resp.location.as_deref(),
                        Some("https://origin.example.com/pay")
                    );
                }
                other => panic!("{tier}: expected redirect, got {other:?}"),
            }
        }
    }
}

#[test]
fn evaluation_is_deterministic() {
    let (_, gate) = gate_with(Features::default(), &["i-1"]);
    let req = https("/").with_header("x-secret", SECRET);
    let statuses: Vec<u16> = (0..20).map(|_| gate.route(Tier::Origin, &req).status()).collect();
    assert!(statuses.iter().all(|s| *s == 200));
}

#[test]
fn forwards_round_robin_across_serving_members() {
    let (fleet, gate) = gate_with(Features::default(), &["i-1", "i-2"]);
    let req = https("/").with_header("X-Secret", SECRET);
    let mut seen = Vec::new();
    for _ in 0..4 {
        if let GateOutcome::Forwarded { member, .. } = gate.route(Tier::Origin, &req) {
            seen.push(member.to_string());
        }
    }
    assert_eq!(seen, vec!["i-1", "i-2", "i-1", "i-2"]);
    assert_eq!(fleet.metrics().requests_per_minute, Some(4));
}

#[test]
fn empty_fleet_is_origin_unavailable() {
    let (_, gate) = gate_with(Features::default(), &[]);
    let req = https("/").with_header("X-Secret", SECRET);
    let outcome = gate.route(Tier::Origin, &req);
    assert!(matches!(outcome, GateOutcome::OriginUnavailable(_)));
    assert_eq!(outcome.status(), 503);
}

#[test]
fn gating_disabled_forwards_without_header() {
    let features = Features {
        edge_gating: false,
        ..Features::default()
    };
    let (_, gate) = gate_with(features, &["i-1"]);
    assert_eq!(gate.route(Tier::Origin, &https("/")).status(), 200);
}

#[test]
fn redirect_disabled_applies_header_rules_on_http() {
    let features = Features {
        https_redirect: false,
        ..Features::default()
    };
    let (_, gate) = gate_with(features, &["i-1"]);
    let plain = GateRequest::new(Protocol::Http, "origin.example.com", "/");
    assert_eq!(gate.route(Tier::Origin, &plain).status(), 403);
    let with = plain.clone().with_header("X-Secret", SECRET);
    assert_eq!(gate.route(Tier::Origin, &with).status(), 200);
    // no viewer redirect at the edge either
    assert_eq!(gate.route(Tier::Edge, &plain).status(), 200);
}
