//! Correlation-token handshake around the tracker's OAuth redirect.
//!
//! `authorize` hands out a fresh token and remembers it; the browser leaves,
//! and at some later point (or never) the callback presents the token back
//! together with an authorization code. Only a token that was issued here and
//! has not outlived the callback timeout is accepted.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::JiraClient;
use crate::error::{Result, TrackerError};
use crate::types::{AuthorizationRedirect, TrackerAuthorization};

pub struct Authorizer {
    client: JiraClient,
    pending: Mutex<HashMap<String, DateTime<Utc>>>,
    current: RwLock<Option<TrackerAuthorization>>,
}

impl Authorizer {
    pub fn new(client: JiraClient) -> Self {
        Self {
            client,
            pending: Mutex::new(HashMap::new()),
            current: RwLock::new(None),
        }
    }

    pub fn client(&self) -> &JiraClient {
        &self.client
    }

    fn callback_timeout(&self) -> Duration {
        Duration::seconds(self.client.config().callback_timeout_secs as i64)
    }

    /// Issue a correlation token and build the consent redirect for it.
    pub fn authorize(&self) -> Result<AuthorizationRedirect> {
        if !self.client.config().is_configured() {
            return Err(TrackerError::Config(
                "tracker OAuth client id, secret and redirect uri must be set".to_string(),
            ));
        }

        let correlation_token = Uuid::new_v4().simple().to_string();
        let url = self.client.authorize_url(&correlation_token)?;
        let now = Utc::now();
        let expires_at = now + self.callback_timeout();

        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        pending.retain(|_, issued_at| *issued_at + self.callback_timeout() > now);
        pending.insert(correlation_token.clone(), now);

        debug!(pending = pending.len(), "Issued tracker correlation token");

        Ok(AuthorizationRedirect {
            url,
            correlation_token,
            expires_at,
        })
    }

    /// Complete the handshake: validate `correlation_token`, exchange `code`
    /// and resolve the tracker site the token grants access to.
    pub async fn complete(&self, code: &str, correlation_token: &str) -> Result<TrackerAuthorization> {
        let issued_at = self
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(correlation_token);

        let Some(issued_at) = issued_at else {
            warn!("Tracker callback with unknown correlation token");
            return Err(TrackerError::Unauthorized(
                "unknown correlation token".to_string(),
            ));
        };

        if Utc::now() >= issued_at + self.callback_timeout() {
            warn!("Tracker callback arrived after the correlation token expired");
            return Err(TrackerError::Unauthorized(
                "correlation token expired".to_string(),
            ));
        }

        let (access_token, expires_in) = self.client.exchange_code(code).await?;

        let resources = self.client.accessible_resources(&access_token).await?;
        let Some(site) = resources.into_iter().next() else {
            return Err(TrackerError::Authorization(
                "no tracker sites are accessible with this account".to_string(),
            ));
        };

        let ttl = expires_in.unwrap_or(self.client.config().default_token_ttl_secs);
        let authorization = TrackerAuthorization {
            correlation_token: correlation_token.to_string(),
            access_token,
            cloud_id: site.id,
            expires_at: Utc::now() + Duration::seconds(ttl as i64),
        };

        info!(
            cloud_id = %authorization.cloud_id,
            site = %site.name,
            expires_at = %authorization.expires_at,
            "Tracker authorized"
        );

        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(authorization.clone());
        Ok(authorization)
    }

    /// The held authorization, if it is still valid. An expired one is
    /// dropped on the way out.
    pub fn current(&self) -> Result<TrackerAuthorization> {
        let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());

        match current.as_ref() {
            Some(auth) if !auth.is_expired() => Ok(auth.clone()),
            Some(_) => {
                info!("Tracker access token expired");
                *current = None;
                Err(TrackerError::Unauthorized("access token expired".to_string()))
            }
            None => Err(TrackerError::Unauthorized(
                "tracker is not authorized".to_string(),
            )),
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.current().is_ok()
    }

    /// Returns whether an authorization was held.
    pub fn logout(&self) -> bool {
        self.current
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .is_some()
    }

    #[cfg(test)]
    pub(crate) fn install(&self, authorization: TrackerAuthorization) {
        *self.current.write().unwrap_or_else(|p| p.into_inner()) = Some(authorization);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrackerConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_tracker() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "token-1",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oauth/token/accessible-resources"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "cloud-1", "name": "acme", "url": "https://acme.atlassian.net"}
            ])))
            .mount(&server)
            .await;
        server
    }

    fn authorizer(server: &MockServer, callback_timeout: u64) -> Authorizer {
        let config = TrackerConfig::new("client", "secret", "http://localhost/cb")
            .with_base_url(server.uri())
            .with_callback_timeout(callback_timeout);
        Authorizer::new(JiraClient::new(config))
    }

    #[tokio::test]
    async fn test_handshake_round_trip() {
        let server = mock_tracker().await;
        let authorizer = authorizer(&server, 600);

        let redirect = authorizer.authorize().unwrap();
        assert!(redirect.url.contains(&redirect.correlation_token));
        assert!(!authorizer.is_authorized());

        let auth = authorizer
            .complete("code-1", &redirect.correlation_token)
            .await
            .unwrap();

        assert_eq!(auth.access_token, "token-1");
        assert_eq!(auth.cloud_id, "cloud-1");
        assert!(authorizer.is_authorized());
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthorized() {
        let server = mock_tracker().await;
        let authorizer = authorizer(&server, 600);
        authorizer.authorize().unwrap();

        let err = authorizer.complete("code-1", "forged").await.unwrap_err();
        assert!(err.is_unauthorized());
        assert!(!authorizer.is_authorized());
    }

    #[tokio::test]
    async fn test_token_is_single_use() {
        let server = mock_tracker().await;
        let authorizer = authorizer(&server, 600);
        let redirect = authorizer.authorize().unwrap();

        authorizer
            .complete("code-1", &redirect.correlation_token)
            .await
            .unwrap();
        let err = authorizer
            .complete("code-1", &redirect.correlation_token)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_expired_correlation_token_is_rejected() {
        let server = mock_tracker().await;
        let authorizer = authorizer(&server, 0);
        let redirect = authorizer.authorize().unwrap();

        let err = authorizer
            .complete("code-1", &redirect.correlation_token)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Unauthorized(msg) if msg.contains("expired")));
    }

    #[tokio::test]
    async fn test_no_accessible_sites() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "t"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oauth/token/accessible-resources"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let authorizer = authorizer(&server, 600);
        let redirect = authorizer.authorize().unwrap();
        let err = authorizer
            .complete("code", &redirect.correlation_token)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Authorization(_)));
    }

    #[test]
    fn test_expired_access_token_is_dropped() {
        let authorizer = Authorizer::new(JiraClient::new(TrackerConfig::new("c", "s", "r")));
        authorizer.install(TrackerAuthorization {
            correlation_token: "t".to_string(),
            access_token: "a".to_string(),
            cloud_id: "cloud".to_string(),
            expires_at: Utc::now() - Duration::seconds(1),
        });

        assert!(authorizer.current().unwrap_err().is_unauthorized());
        assert!(!authorizer.logout());
    }

    #[test]
    fn test_authorize_requires_configuration() {
        let authorizer = Authorizer::new(JiraClient::new(TrackerConfig::default()));
        assert!(matches!(authorizer.authorize(), Err(TrackerError::Config(_))));
    }

    #[test]
    fn test_logout() {
        let authorizer = Authorizer::new(JiraClient::new(TrackerConfig::new("c", "s", "r")));
        authorizer.install(TrackerAuthorization {
            correlation_token: "t".to_string(),
            access_token: "a".to_string(),
            cloud_id: "cloud".to_string(),
            expires_at: Utc::now() + Duration::seconds(60),
        });

        assert!(authorizer.is_authorized());
        assert!(authorizer.logout());
        assert!(!authorizer.is_authorized());
    }
}
