//! Metrics service client.
//!
//! The metrics service owns the canonical list of metric descriptors; the
//! catalog sync mirrors that list into a workspace database so metric ids
//! can be referenced from task pages. Only the descriptor listing is
//! consumed here.

use serde::Deserialize;
use std::time::Duration;

use crate::config::MetricApiConfig;

const USER_AGENT: &str = concat!("hawser/", env!("CARGO_PKG_VERSION"));

/// Errors from metrics service operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricApiError {
    #[error("metrics service token is invalid or expired (401 Unauthorized)")]
    Unauthorized,

    #[error("metrics service returned HTTP {0}: {1}")]
    Http(u16, String),

    #[error("metrics service request failed: {0}")]
    Transport(String),

    #[error("failed to parse metrics service response: {0}")]
    Parse(String),
}

/// One metric as the metrics service describes it.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricDescriptor {
    /// Stable machine id, e.g. `deploy_freq`.
    pub id: String,
    /// Human-readable name shown in the catalog.
    pub name: String,
}

/// HTTP client for the metrics service.
pub struct Client {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl Client {
    pub fn new(config: &MetricApiConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Client {
            agent,
            base_url: config.base_url.clone(),
            token: config.token.clone(),
        }
    }

    /// List all metric descriptors the service currently publishes.
    pub fn available_metrics(&self) -> Result<Vec<MetricDescriptor>, MetricApiError> {
        let url = format!("{}/metrics", self.base_url);
        let result = self
            .agent
            .get(&url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("User-Agent", USER_AGENT)
            .call();
        match result {
            Ok(response) => response
                .into_json()
                .map_err(|e| MetricApiError::Parse(e.to_string())),
            Err(ureq::Error::Status(401, _)) => Err(MetricApiError::Unauthorized),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(MetricApiError::Http(code, body))
            }
            Err(e) => Err(MetricApiError::Transport(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_descriptor_deserializes() {
        let metrics: Vec<MetricDescriptor> = serde_json::from_str(
            r#"[
                {"id": "deploy_freq", "name": "Deploy frequency"},
                {"id": "lead_time", "name": "Lead time for changes"}
            ]"#,
        )
        .unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].id, "deploy_freq");
        assert_eq!(metrics[1].name, "Lead time for changes");
    }
}
