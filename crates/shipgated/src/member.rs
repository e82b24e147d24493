//! Fleet members reached over HTTP.
//!
//! A member exposes two endpoints:
//! - `PUT {url}/_shipgate/artifact`: body is the artifact bytes, the version
//!   travels in the `x-shipgate-version` header
//! - `GET {url}/health`: any 2xx is healthy; an optional JSON body
//!   `{"cpu_utilization": 42.0}` feeds the CPU scaling policy

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use shipgate_core::config::MemberConfig;
use shipgate_core::{Artifact, FleetMember, HealthReport, MemberError, MemberId};

pub const ARTIFACT_PATH: &str = "/_shipgate/artifact";
pub const HEALTH_PATH: &str = "/health";
pub const VERSION_HEADER: &str = "x-shipgate-version";

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Deserialize)]
struct HealthBody {
    cpu_utilization: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct HttpFleetMember {
    id: MemberId,
    zone: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl HttpFleetMember {
    pub fn new(config: &MemberConfig, client: reqwest::Client) -> Self {
        Self {
            id: MemberId::new(config.id.clone()),
            zone: config.zone.clone(),
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl FleetMember for HttpFleetMember {
    fn id(&self) -> &MemberId {
        &self.id
    }

    fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.base_url.clone())
    }

    async fn apply_artifact(&self, artifact: &Artifact, bytes: &[u8]) -> Result<(), MemberError> {
        let response = self
            .client
            .put(format!("{}{}", self.base_url, ARTIFACT_PATH))
            .header(VERSION_HEADER, artifact.version.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| MemberError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response
            .text()
            .await
            .unwrap_or_else(|_| "no response body".to_string());
        Err(MemberError::Rejected(format!("{}: {}", status, detail.trim())))
    }

    async fn health_check(&self) -> HealthReport {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, HEALTH_PATH))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                let body = response.json::<HealthBody>().await.unwrap_or_default();
                match body.cpu_utilization {
                    Some(cpu) => HealthReport::healthy().with_cpu(cpu),
                    None => HealthReport::healthy(),
                }
            }
            Ok(response) => {
                tracing::debug!(member = %self.id, status = %response.status(), "health check failed");
                HealthReport::unhealthy()
            }
            Err(e) => {
                tracing::debug!(member = %self.id, error = %e, "health check unreachable");
                HealthReport::unhealthy()
            }
        }
    }
}
