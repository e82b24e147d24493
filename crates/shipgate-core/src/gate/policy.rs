//! Builds the complete two-tier gate policy from configuration.

use super::edge::{EdgePolicy, SecretHeader, ViewerProtocolPolicy};
use super::request::Protocol;
use super::rules::{Action, Condition, Listener, ListenerRule};
use super::GateError;
use crate::config::{Features, GateConfig};

/// Immutable policy snapshot for both tiers.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub edge: EdgePolicy,
    pub http: Listener,
    pub https: Listener,
    config: GateConfig,
    features: Features,
}

impl GatePolicy {
    /// With gating on, HTTPS forwards only on the secret header (priority 1)
    /// and answers everything else with 403. With redirect on, HTTP has a
    /// single unconditional redirect; otherwise it mirrors HTTPS.
    pub fn from_config(config: &GateConfig, features: &Features) -> Result<Self, GateError> {
        if features.edge_gating && config.header_value.is_empty() {
            return Err(GateError::EmptySecret);
        }

        let secret = features
            .edge_gating
            .then(|| SecretHeader::new(config.header_name.clone(), config.header_value.clone()));

        let (rules, default_action) = match &secret {
            Some(secret) => (
                vec![ListenerRule {
                    priority: 1,
                    conditions: vec![Condition::HttpHeader {
                        name: secret.name.clone(),
                        values: vec![secret.value.clone()],
                    }],
                    action: Action::Forward,
                }],
                Action::access_denied(),
            ),
            None => (Vec::new(), Action::Forward),
        };

        let https = Listener::new(Protocol::Https, 443, rules.clone(), default_action.clone())?;
        let http = if features.https_redirect {
            Listener::new(
                Protocol::Http,
                80,
                Vec::new(),
                Action::redirect_to_https(config.redirect_status),
            )?
        } else {
            Listener::new(Protocol::Http, 80, rules, default_action)?
        };

        let edge = EdgePolicy {
            secret,
            viewer_policy: if features.https_redirect {
                ViewerProtocolPolicy::RedirectToHttps
            } else {
                ViewerProtocolPolicy::AllowAll
            },
            compress: config.compress,
            redirect_status: config.redirect_status,
        };

        Ok(Self {
            edge,
            http,
            https,
            config: config.clone(),
            features: *features,
        })
    }

    pub fn listener(&self, protocol: Protocol) -> &Listener {
        match protocol {
            Protocol::Http => &self.http,
            Protocol::Https => &self.https,
        }
    }

    pub fn header_name(&self) -> &str {
        &self.config.header_name
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    /// Same policy with a new secret value on both tiers.
    pub fn with_secret(&self, value: impl Into<String>) -> Result<Self, GateError> {
        let mut config = self.config.clone();
        config.header_value = value.into();
        Self::from_config(&config, &self.features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::request::GateRequest;

    fn config() -> GateConfig {
        GateConfig {
            header_value: "s3cr3t".into(),
            ..GateConfig::default()
        }
    }

    #[test]
    fn default_rule_set() {
        let policy = GatePolicy::from_config(&config(), &Features::default()).unwrap();
        assert_eq!(policy.https.rules().len(), 1);
        assert_eq!(policy.https.rules()[0].priority, 1);
        assert_eq!(policy.https.default_action(), &Action::access_denied());
        assert!(policy.http.rules().is_empty());
        assert_eq!(policy.http.default_action(), &Action::redirect_to_https(301));
        assert_eq!(policy.header_name(), "X-Secret");
    }

    #[test]
    fn gating_off_forwards_everything() {
        let features = Features {
            edge_gating: false,
            ..Features::default()
        };
        let policy = GatePolicy::from_config(&GateConfig::default(), &features).unwrap();
        assert!(policy.edge.secret.is_none());
        let req = GateRequest::new(Protocol::Https, "origin", "/");
        assert_eq!(policy.https.evaluate(&req).action, &Action::Forward);
    }

    #[test]
    fn redirect_off_mirrors_https_rules() {
        let features = Features {
            https_redirect: false,
            ..Features::default()
        };
        let policy = GatePolicy::from_config(&config(), &features).unwrap();
        assert_eq!(policy.http.rules(), policy.https.rules());
        let req = GateRequest::new(Protocol::Http, "origin", "/");
        assert_eq!(policy.http.evaluate(&req).action, &Action::access_denied());
    }

    #[test]
    fn empty_secret_is_rejected_when_gating() {
        let err = GatePolicy::from_config(&GateConfig::default(), &Features::default()).unwrap_err();
        assert!(matches!(err, GateError::EmptySecret));
    }

    #[test]
    fn with_secret_updates_both_tiers() {
        let policy = GatePolicy::from_config(&config(), &Features::default()).unwrap();
        let rotated = policy.with_secret("n3w").unwrap();
        assert_eq!(rotated.edge.secret.as_ref().unwrap().value, "n3w");
        match &rotated.https.rules()[0].conditions[0] {
            Condition::HttpHeader { values, .. } => assert_eq!(values, &vec!["n3w".to_string()]),
            other => panic!("unexpected condition {other:?}"),
        }
    }
}
