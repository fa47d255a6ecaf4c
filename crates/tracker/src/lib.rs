pub mod auth;
pub mod client;
pub mod error;
pub mod integration;
pub mod types;

pub use auth::Authorizer;
pub use client::JiraClient;
pub use error::{Result, TrackerError};
pub use integration::{IssueTracker, JiraIntegration};
pub use types::{
    AccessibleResource, AuthorizationRedirect, CreatedIssue, IssueBatch, IssueTestCase,
    TokenResponse, TrackerAuthorization, TrackerConfig, TrackerProject,
};
