//! Load-balancer listeners: ordered priority rules plus a default action.

use serde::Serialize;

use super::request::{GateRequest, GateResponse, Protocol};
use super::GateError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "field", rename_all = "kebab-case")]
pub enum Condition {
    /// Header present with one of `values` (exact match).
    HttpHeader { name: String, values: Vec<String> },
    Protocol { protocol: Protocol },
    PathPrefix { prefix: String },
}

impl Condition {
    pub fn matches(&self, req: &GateRequest) -> bool {
        match self {
            Condition::HttpHeader { name, values } => req
                .header_values(name)
                .any(|v| values.iter().any(|expected| expected == v)),
            Condition::Protocol { protocol } => req.protocol == *protocol,
            Condition::PathPrefix { prefix } => req.path.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    /// Forward to the fleet target group.
    Forward,
    Redirect {
        protocol: Protocol,
        port: u16,
        status: u16,
    },
    FixedResponse {
        status: u16,
        content_type: String,
        body: String,
    },
}

impl Action {
    pub fn access_denied() -> Self {
        Action::FixedResponse {
            status: 403,
            content_type: "text/plain".to_string(),
            body: "Access Denied".to_string(),
        }
    }

    pub fn redirect_to_https(status: u16) -> Self {
        Action::Redirect {
            protocol: Protocol::Https,
            port: 443,
            status,
        }
    }

    /// Concrete response for non-forward actions.
    pub fn respond(&self, req: &GateRequest) -> Option<GateResponse> {
        match self {
            Action::Forward => None,
            Action::Redirect {
                protocol,
                port,
                status,
            } => Some(GateResponse::redirect(
                *status,
                redirect_location(req, *protocol, *port),
            )),
            Action::FixedResponse {
                status,
                content_type,
                body,
            } => Some(GateResponse::fixed(*status, content_type.clone(), body.clone())),
        }
    }
}

/// `{scheme}://{host}[:{port}]{path}`, omitting the scheme's default port.
pub fn redirect_location(req: &GateRequest, protocol: Protocol, port: u16) -> String {
    if port == protocol.default_port() {
        format!("{}://{}{}", protocol.scheme(), req.hostname(), req.path)
    } else {
        format!("{}://{}:{}{}", protocol.scheme(), req.hostname(), port, req.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerRule {
    /// Lower is evaluated first.
    pub priority: u32,
    /// All must match. Empty matches every request.
    pub conditions: Vec<Condition>,
    pub action: Action,
}

impl ListenerRule {
    pub fn matches(&self, req: &GateRequest) -> bool {
        self.conditions.iter().all(|c| c.matches(req))
    }
}

/// Which rule decided a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation<'a> {
    /// `None` when the default action applied.
    pub priority: Option<u32>,
    pub action: &'a Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listener {
    pub protocol: Protocol,
    pub port: u16,
    rules: Vec<ListenerRule>,
    default_action: Action,
}

impl Listener {
    /// Build a listener; rules are sorted by priority and priorities must be
    /// unique.
    pub fn new(
        protocol: Protocol,
        port: u16,
        mut rules: Vec<ListenerRule>,
        default_action: Action,
    ) -> Result<Self, GateError> {
        rules.sort_by_key(|r| r.priority);
        if let Some(pair) = rules.windows(2).find(|w| w[0].priority == w[1].priority) {
            return Err(GateError::DuplicatePriority {
                protocol,
                priority: pair[0].priority,
            });
        }
        Ok(Self {
            protocol,
            port,
            rules,
            default_action,
        })
    }

    pub fn rules(&self) -> &[ListenerRule] {
        &self.rules
    }

    pub fn default_action(&self) -> &Action {
        &self.default_action
    }

    /// First matching rule in ascending priority, else the default.
    pub fn evaluate(&self, req: &GateRequest) -> Evaluation<'_> {
        self.rules
            .iter()
            .find(|rule| rule.matches(req))
            .map(|rule| Evaluation {
                priority: Some(rule.priority),
                action: &rule.action,
            })
            .unwrap_or(Evaluation {
                priority: None,
                action: &self.default_action,
            })
    }
}
