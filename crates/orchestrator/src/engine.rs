//! Boundary to whatever turns specification text into test-case artifacts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use casegen_core::{Artifact, ComplianceTag, DocumentRef, OutputFormat, TestCase};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};

const SUMMARY_MAX_CHARS: usize = 80;

/// Everything one generation call gets to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationInput {
    pub specification_text: String,
    pub compliance_tags: BTreeSet<ComplianceTag>,
    pub attached_document: Option<DocumentRef>,
    pub formats: Vec<OutputFormat>,
    /// 0 for the first generation, then the feedback round being applied
    pub feedback_round: u32,
}

#[async_trait]
pub trait GenerationEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Produce one artifact per format. An error is surfaced to the caller
    /// verbatim; the engine is never retried by the lifecycle.
    async fn generate(&self, input: &GenerationInput)
        -> Result<BTreeMap<OutputFormat, Artifact>>;
}

// =============================================================================
// Template engine
// =============================================================================

fn sentence_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[^.!?\n]+[.!?]?").ok())
        .as_ref()
}

fn bullet_prefix() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(?:[-*]\s*)?(?:Round\s+\d+:\s*)?").ok())
        .as_ref()
}

/// Split free text into requirement sentences. Section headers (lines
/// ending in a colon) are skipped and feedback bullets lose their prefix.
pub fn requirement_sentences(text: &str) -> Vec<String> {
    let Some(pattern) = sentence_pattern() else {
        return vec![text.trim().to_string()];
    };

    let sentences: Vec<String> = pattern
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty() && !s.ends_with(':'))
        .map(|s| match bullet_prefix() {
            Some(prefix) => prefix.replace(s, "").trim().to_string(),
            None => s.to_string(),
        })
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .collect();

    if sentences.is_empty() && !text.trim().is_empty() {
        return vec![text.trim().to_string()];
    }
    sentences
}

fn summarize(sentence: &str) -> String {
    let trimmed = sentence.trim_end_matches(&['.', '!', '?'][..]);
    if trimmed.chars().count() <= SUMMARY_MAX_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(SUMMARY_MAX_CHARS - 3).collect();
    format!("{}...", cut.trim_end())
}

fn escape_markup(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Local deterministic engine: one test case per requirement sentence,
/// rendered into each requested format.
#[derive(Debug, Clone, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn test_cases(&self, input: &GenerationInput) -> Vec<TestCase> {
        let tags: Vec<ComplianceTag> = input.compliance_tags.iter().copied().collect();

        requirement_sentences(&input.specification_text)
            .into_iter()
            .enumerate()
            .map(|(i, sentence)| {
                let mut description = format!("Verify that the system satisfies: {}", sentence);
                if let Some(ref document) = input.attached_document {
                    description.push_str(&format!(" (source: {})", document));
                }

                TestCase {
                    id: format!("TC-{:03}", i + 1),
                    summary: summarize(&sentence),
                    description,
                    steps: vec![
                        "Prepare the system in its documented initial state".to_string(),
                        format!("Exercise the behaviour described by: {}", sentence),
                        "Record the observed behaviour".to_string(),
                    ],
                    expected_result: sentence.clone(),
                    compliance_tags: tags.clone(),
                }
            })
            .collect()
    }

    pub fn render(format: OutputFormat, test_cases: &[TestCase]) -> String {
        match format {
            OutputFormat::Html => Self::render_html(test_cases),
            OutputFormat::Xml => Self::render_xml(test_cases),
            OutputFormat::Pdf | OutputFormat::Word => Self::render_document(test_cases),
        }
    }

    fn render_document(test_cases: &[TestCase]) -> String {
        let mut out = String::from("Test Cases\n==========\n");
        for case in test_cases {
            out.push_str(&format!("\n{} {}\n", case.id, case.summary));
            out.push_str(&format!("  {}\n", case.description));
            for (n, step) in case.steps.iter().enumerate() {
                out.push_str(&format!("  {}. {}\n", n + 1, step));
            }
            out.push_str(&format!("  Expected: {}\n", case.expected_result));
            if !case.compliance_tags.is_empty() {
                let tags: Vec<&str> = case.compliance_tags.iter().map(|t| t.as_str()).collect();
                out.push_str(&format!("  Compliance: {}\n", tags.join(", ")));
            }
        }
        out
    }

    fn render_html(test_cases: &[TestCase]) -> String {
        let mut out = String::from(
            "<table>\n<tr><th>ID</th><th>Summary</th><th>Steps</th><th>Expected</th></tr>\n",
        );
        for case in test_cases {
            let steps: Vec<String> = case.steps.iter().map(|s| escape_markup(s)).collect();
            out.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape_markup(&case.id),
                escape_markup(&case.summary),
                steps.join("<br/>"),
                escape_markup(&case.expected_result)
            ));
        }
        out.push_str("</table>\n");
        out
    }

    fn render_xml(test_cases: &[TestCase]) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<testSuite>\n");
        for case in test_cases {
            out.push_str(&format!("  <testCase id=\"{}\">\n", escape_markup(&case.id)));
            out.push_str(&format!("    <summary>{}</summary>\n", escape_markup(&case.summary)));
            out.push_str(&format!(
                "    <description>{}</description>\n",
                escape_markup(&case.description)
            ));
            for step in &case.steps {
                out.push_str(&format!("    <step>{}</step>\n", escape_markup(step)));
            }
            out.push_str(&format!(
                "    <expectedResult>{}</expectedResult>\n",
                escape_markup(&case.expected_result)
            ));
            for tag in &case.compliance_tags {
                out.push_str(&format!("    <compliance>{}</compliance>\n", tag));
            }
            out.push_str("  </testCase>\n");
        }
        out.push_str("</testSuite>\n");
        out
    }
}

#[async_trait]
impl GenerationEngine for TemplateEngine {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate(
        &self,
        input: &GenerationInput,
    ) -> Result<BTreeMap<OutputFormat, Artifact>> {
        let test_cases = self.test_cases(input);
        if test_cases.is_empty() {
            return Err(OrchestratorError::Generation(
                "no requirements found in specification".to_string(),
            ));
        }

        debug!(
            test_cases = test_cases.len(),
            formats = input.formats.len(),
            "Rendering template artifacts"
        );

        Ok(input
            .formats
            .iter()
            .map(|format| {
                let content = Self::render(*format, &test_cases);
                (*format, Artifact::new(*format, content, test_cases.clone()))
            })
            .collect())
    }
}

// =============================================================================
// HTTP engine
// =============================================================================

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

/// Forwards generation to a remote service at `POST {base_url}/generate`.
#[derive(Clone)]
pub struct HttpEngine {
    client: Client,
    base_url: String,
}

impl HttpEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Transport-level cap; the lifecycle applies its own deadline as well.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrchestratorError::Generation(format!("invalid http client: {}", e)))?;
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl GenerationEngine for HttpEngine {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(
        &self,
        input: &GenerationInput,
    ) -> Result<BTreeMap<OutputFormat, Artifact>> {
        let url = format!("{}/generate", self.base_url.trim_end_matches('/'));
        info!(url = %url, round = input.feedback_round, "Calling remote generation engine");

        let response = self
            .client
            .post(&url)
            .json(input)
            .send()
            .await
            .map_err(|e| OrchestratorError::Generation(format!("engine unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Generation engine returned an error");
            return Err(OrchestratorError::Generation(format!(
                "engine returned {}: {}",
                status, body
            )));
        }

        let decoded: GenerateResponse = response.json().await.map_err(|e| {
            OrchestratorError::Generation(format!("invalid engine response: {}", e))
        })?;

        let artifacts: BTreeMap<OutputFormat, Artifact> = decoded
            .artifacts
            .into_iter()
            .map(|artifact| (artifact.format, artifact))
            .collect();

        if artifacts.is_empty() {
            return Err(OrchestratorError::Generation(
                "engine returned no artifacts".to_string(),
            ));
        }
        Ok(artifacts)
    }
}
