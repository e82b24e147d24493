//! Edge tier: viewer protocol policy, secret header injection and
//! compression negotiation. The edge holds no cache.

use serde::Serialize;

use super::request::{GateRequest, GateResponse, Protocol};
use super::rules::redirect_location;

/// Pre-shared header the edge injects and the origin requires.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretHeader {
    pub name: String,
    pub value: String,
}

impl SecretHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Debug for SecretHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretHeader")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewerProtocolPolicy {
    AllowAll,
    RedirectToHttps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    Gzip,
    Br,
}

impl ContentEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Br => "br",
        }
    }
}

/// Pick a response encoding from an `Accept-Encoding` value.
///
/// Brotli wins over gzip when both are acceptable; `q=0` excludes a coding.
pub fn negotiate_encoding(accept_encoding: Option<&str>) -> Option<ContentEncoding> {
    let header = accept_encoding?;
    let mut br = false;
    let mut gzip = false;
    for part in header.split(',') {
        let mut pieces = part.trim().split(';');
        let coding = pieces.next().unwrap_or("").trim().to_ascii_lowercase();
        let refused = pieces.any(|p| {
            p.trim()
                .strip_prefix("q=")
                .and_then(|q| q.trim().parse::<f32>().ok())
                .is_some_and(|q| q <= 0.0)
        });
        if refused {
            continue;
        }
        match coding.as_str() {
            "br" => br = true,
            "gzip" | "x-gzip" => gzip = true,
            "*" => {
                br = true;
                gzip = true;
            }
            _ => {}
        }
    }
    if br {
        Some(ContentEncoding::Br)
    } else if gzip {
        Some(ContentEncoding::Gzip)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EdgeDecision {
    /// Plain-HTTP viewer sent back to HTTPS.
    Redirect(GateResponse),
    /// Request to send on to the origin over HTTPS.
    Forward {
        request: GateRequest,
        compression: Option<ContentEncoding>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgePolicy {
    /// `None` when edge gating is disabled.
    pub secret: Option<SecretHeader>,
    pub viewer_policy: ViewerProtocolPolicy,
    pub compress: bool,
    pub redirect_status: u16,
}

impl EdgePolicy {
    pub fn handle(&self, req: &GateRequest) -> EdgeDecision {
        if req.protocol == Protocol::Http
            && self.viewer_policy == ViewerProtocolPolicy::RedirectToHttps
        {
            return EdgeDecision::Redirect(GateResponse::redirect(
                self.redirect_status,
                redirect_location(req, Protocol::Https, Protocol::Https.default_port()),
            ));
        }

        let mut forwarded = req.clone();
        forwarded.protocol = Protocol::Https;
        if let Some(secret) = &self.secret {
            forwarded.set_header(&secret.name, secret.value.clone());
        }
        let compression = if self.compress {
            negotiate_encoding(req.header("accept-encoding"))
        } else {
            None
        };
        EdgeDecision::Forward {
            request: forwarded,
            compression,
        }
    }
}
