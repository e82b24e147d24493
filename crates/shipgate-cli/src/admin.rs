//! Thin client for the daemon's admin API.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct AdminClient {
    base_url: String,
    client: Client,
}

impl AdminClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;
        Self::handle_response(response).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> Result<Value> {
        let mut request = self.client.post(self.url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;
        Self::handle_response(response).await
    }

    /// Decode a JSON body, turning non-2xx statuses into errors carrying the
    /// API's message. Empty bodies decode to `null`.
    async fn handle_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let text = response
            .text()
            .await
            .context("failed to read response body")?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string))
                .unwrap_or(text);
            bail!("admin API error (status {}): {}", status.as_u16(), message);
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).context("failed to parse JSON response")
    }
}
