use async_trait::async_trait;
use tracing::{info, warn};

use crate::auth::Authorizer;
use crate::client::JiraClient;
use crate::error::{Result, TrackerError};
use crate::types::{
    AuthorizationRedirect, CreatedIssue, IssueBatch, TrackerAuthorization, TrackerConfig,
    TrackerProject,
};

/// Issue sink the lifecycle pushes finalized test cases into.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Fails with `Unauthorized` unless a valid access token is held.
    fn ensure_authorized(&self) -> Result<()>;

    /// Create one issue per test case, in order. Stops at the first failure;
    /// when issues were already filed the error is `PartialBatch` carrying them.
    async fn create_issues(&self, batch: &IssueBatch) -> Result<Vec<CreatedIssue>>;
}

/// OAuth handshake plus issue creation against the hosted tracker.
pub struct JiraIntegration {
    authorizer: Authorizer,
}

impl JiraIntegration {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            authorizer: Authorizer::new(JiraClient::new(config)),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        self.authorizer.client().config()
    }

    pub fn authorize(&self) -> Result<AuthorizationRedirect> {
        self.authorizer.authorize()
    }

    pub async fn callback(&self, code: &str, state: &str) -> Result<TrackerAuthorization> {
        self.authorizer.complete(code, state).await
    }

    pub fn is_authorized(&self) -> bool {
        self.authorizer.is_authorized()
    }

    /// Site the held token is bound to, if authorized.
    pub fn cloud_id(&self) -> Option<String> {
        self.authorizer.current().ok().map(|auth| auth.cloud_id)
    }

    pub async fn list_projects(&self) -> Result<Vec<TrackerProject>> {
        let auth = self.authorizer.current()?;
        let result = self
            .authorizer
            .client()
            .list_projects(&auth.access_token, &auth.cloud_id)
            .await;
        self.drop_rejected_token(result)
    }

    pub fn logout(&self) -> bool {
        let was_authorized = self.authorizer.logout();
        if was_authorized {
            info!("Tracker authorization discarded");
        }
        was_authorized
    }

    /// A 401 from the tracker means the held token is no longer usable.
    fn drop_rejected_token<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_unauthorized() {
                warn!("Tracker rejected the held access token, discarding it");
                self.authorizer.logout();
            }
        }
        result
    }
}

#[async_trait]
impl IssueTracker for JiraIntegration {
    fn ensure_authorized(&self) -> Result<()> {
        self.authorizer.current().map(|_| ())
    }

    async fn create_issues(&self, batch: &IssueBatch) -> Result<Vec<CreatedIssue>> {
        let auth = self.authorizer.current()?;
        let client = self.authorizer.client();

        let mut created = Vec::with_capacity(batch.test_cases.len());
        for test_case in &batch.test_cases {
            let result = client
                .create_issue(&auth.access_token, &auth.cloud_id, &batch.project_key, test_case)
                .await;
            match self.drop_rejected_token(result) {
                Ok(issue) => created.push(issue),
                Err(e) if created.is_empty() => return Err(e),
                Err(e) => {
                    warn!(
                        project = %batch.project_key,
                        created = created.len(),
                        remaining = batch.test_cases.len() - created.len(),
                        error = %e,
                        "Issue batch stopped part way"
                    );
                    return Err(TrackerError::PartialBatch {
                        created,
                        cause: Box::new(e),
                    });
                }
            }
        }

        info!(
            project = %batch.project_key,
            count = created.len(),
            "Synced test cases to tracker"
        );
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IssueTestCase;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn authorized(server: &MockServer) -> JiraIntegration {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "token-1",
                "expires_in": 3600
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oauth/token/accessible-resources"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "cloud-1", "name": "acme", "url": "https://acme.atlassian.net"}
            ])))
            .mount(server)
            .await;

        let integration = JiraIntegration::new(
            TrackerConfig::new("client", "secret", "http://localhost/cb").with_base_url(server.uri()),
        );
        let redirect = integration.authorize().unwrap();
        integration
            .callback("code", &redirect.correlation_token)
            .await
            .unwrap();
        integration
    }

    fn batch(count: usize) -> IssueBatch {
        IssueBatch {
            project_key: "QA".to_string(),
            test_cases: (1..=count)
                .map(|i| IssueTestCase {
                    summary: format!("TC-{:03}", i),
                    description: format!("case {}", i),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_create_issues_before_authorization() {
        let integration = JiraIntegration::new(TrackerConfig::new("c", "s", "r"));

        assert!(integration.ensure_authorized().unwrap_err().is_unauthorized());
        let err = integration.create_issues(&batch(1)).await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_create_issues_one_per_test_case() {
        let server = MockServer::start().await;
        let integration = authorized(&server).await;

        Mock::given(method("POST"))
            .and(path("/ex/jira/cloud-1/rest/api/2/issue"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "1", "key": "QA-1", "self": "https://example/1"
            })))
            .expect(3)
            .mount(&server)
            .await;

        let created = integration.create_issues(&batch(3)).await.unwrap();
        assert_eq!(created.len(), 3);
    }

    #[tokio::test]
    async fn test_rejected_token_is_discarded() {
        let server = MockServer::start().await;
        let integration = authorized(&server).await;
        assert!(integration.is_authorized());

        Mock::given(method("POST"))
            .and(path("/ex/jira/cloud-1/rest/api/2/issue"))
            .respond_with(ResponseTemplate::new(401).set_body_string("revoked"))
            .mount(&server)
            .await;

        let err = integration.create_issues(&batch(2)).await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(!integration.is_authorized());
    }

    #[tokio::test]
    async fn test_api_failure_keeps_token() {
        let server = MockServer::start().await;
        let integration = authorized(&server).await;

        Mock::given(method("POST"))
            .and(path("/ex/jira/cloud-1/rest/api/2/issue"))
            .respond_with(ResponseTemplate::new(400).set_body_string("project does not exist"))
            .mount(&server)
            .await;

        let err = integration.create_issues(&batch(1)).await.unwrap_err();
        assert!(matches!(err, TrackerError::Api { status: 400, .. }));
        assert!(integration.is_authorized());
    }

    #[tokio::test]
    async fn test_failure_mid_batch_returns_created_issues() {
        let server = MockServer::start().await;
        let integration = authorized(&server).await;

        Mock::given(method("POST"))
            .and(path("/ex/jira/cloud-1/rest/api/2/issue"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "1", "key": "QA-1", "self": "https://example/1"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ex/jira/cloud-1/rest/api/2/issue"))
            .respond_with(ResponseTemplate::new(500).set_body_string("try again"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let err = integration.create_issues(&batch(3)).await.unwrap_err();
        let (created, cause) = err.into_partial();
        assert_eq!(
            created.iter().map(|i| i.key.as_str()).collect::<Vec<_>>(),
            vec!["QA-1"]
        );
        assert!(matches!(cause, TrackerError::Api { status: 500, .. }));

        // The third test case was never attempted
        let posts = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path() == "/ex/jira/cloud-1/rest/api/2/issue")
            .count();
        assert_eq!(posts, 2);
    }

    #[tokio::test]
    async fn test_list_projects_and_logout() {
        let server = MockServer::start().await;
        let integration = authorized(&server).await;

        Mock::given(method("GET"))
            .and(path("/ex/jira/cloud-1/rest/api/3/project"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "100", "key": "QA", "name": "Quality"}
            ])))
            .mount(&server)
            .await;

        let projects = integration.list_projects().await.unwrap();
        assert_eq!(projects[0].key, "QA");

        assert!(integration.logout());
        assert!(!integration.logout());
        assert!(integration.list_projects().await.unwrap_err().is_unauthorized());
    }
}
