use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// =============================================================================
// Configuration
// =============================================================================

const DEFAULT_AUTH_BASE_URL: &str = "https://auth.atlassian.com";
const DEFAULT_API_BASE_URL: &str = "https://api.atlassian.com";
const DEFAULT_SCOPES: &str = "read:jira-work write:jira-work offline_access";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_base_url: String,
    pub api_base_url: String,
    pub audience: String,
    pub scopes: String,
    /// Issue type every synced test case is filed as
    pub issue_type: String,
    /// How long an issued correlation token waits for its callback
    pub callback_timeout_secs: u64,
    /// Token lifetime used when the token endpoint omits `expires_in`
    pub default_token_ttl_secs: u64,
    /// Cap on every HTTP call to the tracker
    pub request_timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            auth_base_url: DEFAULT_AUTH_BASE_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            audience: "api.atlassian.com".to_string(),
            scopes: DEFAULT_SCOPES.to_string(),
            issue_type: "Task".to_string(),
            callback_timeout_secs: 600,
            default_token_ttl_secs: 3600,
            request_timeout_secs: 30,
        }
    }
}

impl TrackerConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            ..Default::default()
        }
    }

    /// Point both the OAuth and REST endpoints at one host (test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.auth_base_url = base_url.clone();
        self.api_base_url = base_url;
        self
    }

    pub fn with_callback_timeout(mut self, secs: u64) -> Self {
        self.callback_timeout_secs = secs;
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_issue_type(mut self, issue_type: impl Into<String>) -> Self {
        self.issue_type = issue_type.into();
        self
    }

    /// Overlay OAuth client credentials from `ATLASSIAN_*` variables.
    pub fn apply_env(mut self) -> Self {
        if let Ok(value) = std::env::var("ATLASSIAN_CLIENT_ID") {
            self.client_id = value;
        }
        if let Ok(value) = std::env::var("ATLASSIAN_CLIENT_SECRET") {
            self.client_secret = value;
        }
        if let Ok(value) = std::env::var("ATLASSIAN_REDIRECT_URI") {
            self.redirect_uri = value;
        }
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty() && !self.redirect_uri.is_empty()
    }
}

// =============================================================================
// OAuth
// =============================================================================

/// Where to send the browser to start authorization.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthorizationRedirect {
    pub url: String,
    pub correlation_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccessibleResource {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

/// A completed handshake: held in memory only, for the lifetime of the
/// process or until logout/expiry.
#[derive(Debug, Clone)]
pub struct TrackerAuthorization {
    pub correlation_token: String,
    pub access_token: String,
    pub cloud_id: String,
    pub expires_at: DateTime<Utc>,
}

impl TrackerAuthorization {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

// =============================================================================
// Projects & Issues
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrackerProject {
    pub id: String,
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IssueTestCase {
    pub summary: String,
    pub description: String,
}

/// Issue-creation payload for one artifact format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueBatch {
    pub project_key: String,
    pub test_cases: Vec<IssueTestCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatedIssue {
    pub id: String,
    pub key: String,
    #[serde(rename = "self", default)]
    pub self_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_batch_uses_camel_case() {
        let batch = IssueBatch {
            project_key: "QA".to_string(),
            test_cases: vec![IssueTestCase {
                summary: "Lockout".to_string(),
                description: "Lock after 5 attempts".to_string(),
            }],
        };

        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["projectKey"], "QA");
        assert_eq!(json["testCases"][0]["summary"], "Lockout");
    }

    #[test]
    fn test_config_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.issue_type, "Task");
        assert!(config.scopes.contains("write:jira-work"));
        assert!(!config.is_configured());

        let config = TrackerConfig::new("id", "secret", "http://localhost/cb");
        assert!(config.is_configured());
    }

    #[test]
    fn test_config_from_partial_toml_like_json() {
        let config: TrackerConfig =
            serde_json::from_str(r#"{"client_id":"abc","issue_type":"Test"}"#).unwrap();
        assert_eq!(config.client_id, "abc");
        assert_eq!(config.issue_type, "Test");
        assert_eq!(config.callback_timeout_secs, 600);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_created_issue_reads_self_link() {
        let issue: CreatedIssue = serde_json::from_str(
            r#"{"id":"10001","key":"QA-7","self":"https://example/rest/api/2/issue/10001"}"#,
        )
        .unwrap();
        assert_eq!(issue.key, "QA-7");
        assert!(issue.self_url.ends_with("10001"));
    }
}
