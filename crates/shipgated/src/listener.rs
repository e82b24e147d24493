//! Gate listeners: every request is evaluated by the [`TrafficGate`] and
//! either answered directly or proxied to the chosen fleet member.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use shipgate_core::{GateOutcome, GateRequest, GateResponse, Protocol, Tier, TrafficGate};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

/// Largest request body the gate will buffer before forwarding.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Set by a TLS terminator in front of the listener.
const FORWARDED_PROTO: &str = "x-forwarded-proto";

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Clone)]
pub struct ListenerState {
    pub tier: Tier,
    /// Protocol of the port this listener is bound to.
    pub protocol: Protocol,
    /// Honour `x-forwarded-proto` from an upstream TLS terminator. Off means
    /// the bound protocol alone picks the rule set.
    pub trust_forwarded_proto: bool,
    pub gate: Arc<TrafficGate>,
    pub client: reqwest::Client,
}

/// Router answering every path through the gate.
///
/// The edge tier compresses responses; which encoding (if any) is decided by
/// the edge policy, the layer only does the work.
pub fn gate_router(state: ListenerState) -> Router {
    let edge = state.tier == Tier::Edge;
    let router = Router::new()
        .fallback(handle)
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if edge {
        router.layer(CompressionLayer::new())
    } else {
        router
    }
}

async fn handle(State(state): State<ListenerState>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response();
        }
    };

    let protocol = request_protocol(state.protocol, state.trust_forwarded_proto, &parts.headers);
    let gate_req = to_gate_request(protocol, &parts.method, &parts.uri, &parts.headers);
    let outcome = state.gate.route(state.tier, &gate_req);

    let mut response = match outcome {
        GateOutcome::Forwarded {
            member,
            endpoint: Some(endpoint),
            request,
            compression,
        } => match proxy(&state.client, &endpoint, &request, body).await {
            Ok(mut response) => {
                if state.tier == Tier::Edge && compression.is_none() {
                    // An explicit encoding makes the compression layer pass
                    // the body through untouched.
                    response
                        .headers_mut()
                        .entry(header::CONTENT_ENCODING)
                        .or_insert(HeaderValue::from_static("identity"));
                }
                response
            }
            Err(e) => {
                tracing::warn!(member = %member, error = %e, "proxy to member failed");
                (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
            }
        },
        GateOutcome::Forwarded { member, .. } => {
            tracing::warn!(member = %member, "member has no HTTP endpoint");
            (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
        }
        GateOutcome::Redirected(resp)
        | GateOutcome::AccessDenied(resp)
        | GateOutcome::Fixed(resp)
        | GateOutcome::OriginUnavailable(resp) => direct_response(&resp),
    };

    if state.tier == Tier::Edge {
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }
    response
}

/// The protocol the gate evaluates a request under.
pub fn request_protocol(listener: Protocol, trust_forwarded: bool, headers: &HeaderMap) -> Protocol {
    if !trust_forwarded {
        return listener;
    }
    match headers.get(FORWARDED_PROTO).and_then(|v| v.to_str().ok()) {
        Some(p) if p.eq_ignore_ascii_case("https") => Protocol::Https,
        Some(p) if p.eq_ignore_ascii_case("http") => Protocol::Http,
        _ => listener,
    }
}

/// Translate an incoming HTTP request into the gate's view of it.
pub fn to_gate_request(
    protocol: Protocol,
    method: &axum::http::Method,
    uri: &axum::http::Uri,
    headers: &HeaderMap,
) -> GateRequest {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_default();
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut req = GateRequest::new(protocol, host, path).with_method(method.as_str());
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            req = req.with_header(name.as_str(), value);
        }
    }
    req
}

fn direct_response(resp: &GateResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, resp.body.clone()).into_response();
    let headers = response.headers_mut();
    if let Some(content_type) = resp
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    if let Some(location) = resp
        .location
        .as_deref()
        .and_then(|l| HeaderValue::from_str(l).ok())
    {
        headers.insert(header::LOCATION, location);
    }
    response
}

async fn proxy(
    client: &reqwest::Client,
    endpoint: &str,
    request: &GateRequest,
    body: Bytes,
) -> Result<Response, reqwest::Error> {
    let url = format!("{}{}", endpoint.trim_end_matches('/'), request.path);
    let method =
        reqwest::Method::from_bytes(request.method.as_bytes()).unwrap_or(reqwest::Method::GET);

    let mut outbound = client.request(method, url);
    for (name, value) in request.headers() {
        if !is_hop_by_hop(name) {
            outbound = outbound.header(name.as_str(), value.as_str());
        }
    }
    let upstream = outbound.body(body).send().await?;

    let status = upstream.status();
    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    let bytes = upstream.bytes().await?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Uri};

    #[test]
    fn gate_request_carries_host_path_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("app.example.com"));
        let uri: Uri = "/orders?page=2".parse().unwrap();

        let req = to_gate_request(Protocol::Https, &Method::POST, &uri, &headers);
        assert_eq!(req.protocol, Protocol::Https);
        assert_eq!(req.method, "POST");
        assert_eq!(req.host, "app.example.com");
        assert_eq!(req.path, "/orders?page=2");
        assert_eq!(req.header("host"), Some("app.example.com"));
    }

    #[test]
    fn forwarded_proto_ignored_unless_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_PROTO, HeaderValue::from_static("https"));
        assert_eq!(request_protocol(Protocol::Http, false, &headers), Protocol::Http);
        assert_eq!(request_protocol(Protocol::Http, true, &headers), Protocol::Https);

        headers.insert(FORWARDED_PROTO, HeaderValue::from_static("HTTP"));
        assert_eq!(request_protocol(Protocol::Https, true, &headers), Protocol::Http);
        assert_eq!(
            request_protocol(Protocol::Https, true, &HeaderMap::new()),
            Protocol::Https
        );
    }

    #[test]
    fn hop_by_hop_headers_are_not_forwarded() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("host"));
        assert!(!is_hop_by_hop("x-secret"));
        assert!(!is_hop_by_hop("accept-encoding"));
    }

    #[test]
    fn direct_response_carries_location() {
        let resp = direct_response(&GateResponse::redirect(301, "https://app.example.com/"));
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "https://app.example.com/"
        );
    }
}
