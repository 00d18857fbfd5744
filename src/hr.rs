//! Leave-tracking HR service client.
//!
//! One endpoint: the per-employee leave report. The service authenticates
//! with an OAuth-style token header derived from the client secret; the
//! client id rides along in configuration for credential rotation but is
//! not sent on this endpoint.

use crate::config::HrConfig;
use serde_json::Value;
use std::time::Duration;

/// Path of the leave report endpoint under the HR base URL.
const LEAVE_REPORT_PATH: &str = "/api/v2/leavetracker/reports/user";

const USER_AGENT: &str = concat!("hawser/", env!("CARGO_PKG_VERSION"));

/// Errors from HR API operations.
#[derive(Debug, thiserror::Error)]
pub enum HrError {
    #[error("HR token is invalid or expired (401 Unauthorized)")]
    Unauthorized,

    #[error("HR service returned HTTP {0}: {1}")]
    Http(u16, String),

    #[error("HR request failed: {0}")]
    Transport(String),

    #[error("failed to parse HR response: {0}")]
    Parse(String),
}

/// HTTP client for the HR service.
pub struct Client {
    agent: ureq::Agent,
    base_url: String,
    secret: String,
}

impl Client {
    pub fn new(config: &HrConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Client {
            agent,
            base_url: config.base_url.clone(),
            secret: config.client_secret.clone(),
        }
    }

    /// Fetch the leave report for one employee code.
    pub fn leave_report(&self, employee: &str) -> Result<Value, HrError> {
        let url = format!("{}{}", self.base_url, LEAVE_REPORT_PATH);
        let result = self
            .agent
            .get(&url)
            .set("Authorization", &auth_header(&self.secret))
            .set("User-Agent", USER_AGENT)
            .query("employee", employee)
            .call();
        match result {
            Ok(response) => response
                .into_json()
                .map_err(|e| HrError::Parse(e.to_string())),
            Err(ureq::Error::Status(401, _)) => Err(HrError::Unauthorized),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(HrError::Http(code, body))
            }
            Err(e) => Err(HrError::Transport(e.to_string())),
        }
    }
}

fn auth_header(secret: &str) -> String {
    format!("Zoho-oauthtoken {secret}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_header() {
        assert_eq!(auth_header("abc123"), "Zoho-oauthtoken abc123");
    }
}
