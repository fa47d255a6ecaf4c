use std::time::Duration;

use reqwest::{Client, Response, StatusCode, Url};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{Result, TrackerError};
use crate::types::{
    AccessibleResource, CreatedIssue, IssueTestCase, TokenResponse, TrackerConfig, TrackerProject,
};

/// Thin REST client for the tracker's OAuth and issue endpoints.
#[derive(Clone)]
pub struct JiraClient {
    client: Client,
    config: TrackerConfig,
}

impl JiraClient {
    pub fn new(config: TrackerConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to an http client without a timeout");
                Client::new()
            });
        Self { client, config }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn site_url(&self, cloud_id: &str, path: &str) -> String {
        format!(
            "{}/ex/jira/{}/rest/api/{}",
            self.config.api_base_url.trim_end_matches('/'),
            cloud_id,
            path
        )
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            return Err(TrackerError::Unauthorized(format!(
                "tracker rejected the access token: {}",
                body
            )));
        }

        Err(TrackerError::Api {
            status: status.as_u16(),
            message: body,
        })
    }
}

impl JiraClient {
    /// Consent URL carrying `correlation_token` as the OAuth `state`.
    pub fn authorize_url(&self, correlation_token: &str) -> Result<String> {
        let base = format!("{}/authorize", self.config.auth_base_url.trim_end_matches('/'));
        let url = Url::parse_with_params(
            &base,
            &[
                ("audience", self.config.audience.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("scope", self.config.scopes.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("state", correlation_token),
                ("response_type", "code"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| TrackerError::Config(format!("invalid auth base url {}: {}", base, e)))?;

        Ok(url.to_string())
    }

    /// Trade an authorization code for an access token.
    pub async fn exchange_code(&self, code: &str) -> Result<(String, Option<u64>)> {
        let url = format!("{}/oauth/token", self.config.auth_base_url.trim_end_matches('/'));
        debug!("Exchanging authorization code at {}", url);

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "grant_type": "authorization_code",
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret,
                "code": code,
                "redirect_uri": self.config.redirect_uri,
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let token: TokenResponse = serde_json::from_str(&body).map_err(|_| {
            TrackerError::Authorization(format!("token endpoint returned {}: {}", status, body))
        })?;

        match token.access_token {
            Some(access_token) if !access_token.is_empty() => Ok((access_token, token.expires_in)),
            _ => Err(TrackerError::Authorization(format!(
                "failed to get access token: {}",
                body
            ))),
        }
    }

    pub async fn accessible_resources(
        &self,
        access_token: &str,
    ) -> Result<Vec<AccessibleResource>> {
        let url = format!(
            "{}/oauth/token/accessible-resources",
            self.config.api_base_url.trim_end_matches('/')
        );

        let response = self.client.get(&url).bearer_auth(access_token).send().await?;
        let resources = Self::check(response).await?.json().await?;
        Ok(resources)
    }

    pub async fn list_projects(
        &self,
        access_token: &str,
        cloud_id: &str,
    ) -> Result<Vec<TrackerProject>> {
        debug!(cloud_id = %cloud_id, "Listing tracker projects");

        let response = self
            .client
            .get(self.site_url(cloud_id, "3/project"))
            .bearer_auth(access_token)
            .send()
            .await?;

        let projects = Self::check(response).await?.json().await?;
        Ok(projects)
    }

    pub async fn create_issue(
        &self,
        access_token: &str,
        cloud_id: &str,
        project_key: &str,
        test_case: &IssueTestCase,
    ) -> Result<CreatedIssue> {
        let payload = json!({
            "fields": {
                "project": { "key": project_key },
                "summary": test_case.summary,
                "description": test_case.description,
                "issuetype": { "name": self.config.issue_type },
            }
        });

        let response = self
            .client
            .post(self.site_url(cloud_id, "2/issue"))
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await?;

        let issue: CreatedIssue = Self::check(response).await?.json().await?;
        info!(key = %issue.key, project = %project_key, "Created tracker issue");
        Ok(issue)
    }
}
