use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::compliance::ComplianceTag;
use crate::error::CoreError;

const PREVIEW_LINES: usize = 6;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, ToSchema,
)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Pdf,
    Word,
    Html,
    Xml,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [Self::Pdf, Self::Word, Self::Html, Self::Xml];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Word => "word",
            Self::Html => "html",
            Self::Xml => "xml",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "word" | "docx" => Some(Self::Word),
            "html" | "markup" => Some(Self::Html),
            "xml" => Some(Self::Xml),
            _ => None,
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Pdf => "test-cases.pdf",
            Self::Word => "test-cases.docx",
            Self::Html => "test-cases.html",
            Self::Xml => "test-cases.xml",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Word => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Html => "text/html",
            Self::Xml => "application/xml",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::UnknownFormat(s.to_string()))
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct TestCase {
    /// Stable identifier within one generation, e.g. "TC-003"
    pub id: String,
    pub summary: String,
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub expected_result: String,
    #[serde(default)]
    pub compliance_tags: Vec<ComplianceTag>,
}

/// One rendered output of a generation call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Artifact {
    pub format: OutputFormat,
    pub file_name: String,
    pub content: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl Artifact {
    pub fn new(format: OutputFormat, content: impl Into<String>, test_cases: Vec<TestCase>) -> Self {
        Self {
            format,
            file_name: format.file_name().to_string(),
            content: content.into(),
            test_cases,
        }
    }

    /// First lines of the rendered content, with a trailing ellipsis line
    /// when anything was cut.
    pub fn preview(&self) -> String {
        let lines: Vec<&str> = self.content.lines().collect();
        let head = lines
            .iter()
            .take(PREVIEW_LINES)
            .copied()
            .collect::<Vec<_>>()
            .join("\n");

        if lines.len() > PREVIEW_LINES {
            format!("{}\n...", head)
        } else {
            head
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse_aliases() {
        assert_eq!(OutputFormat::parse("PDF"), Some(OutputFormat::Pdf));
        assert_eq!(OutputFormat::parse("docx"), Some(OutputFormat::Word));
        assert_eq!(OutputFormat::parse("markup"), Some(OutputFormat::Html));
        assert_eq!(OutputFormat::parse("csv"), None);
    }

    #[test]
    fn test_format_file_names() {
        assert_eq!(OutputFormat::Word.file_name(), "test-cases.docx");
        assert_eq!(OutputFormat::Xml.mime_type(), "application/xml");
    }

    #[test]
    fn test_preview_truncates_long_content() {
        let content = (1..=10).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let artifact = Artifact::new(OutputFormat::Html, content, vec![]);

        let preview = artifact.preview();
        assert!(preview.starts_with("line 1\n"));
        assert!(preview.contains("line 6"));
        assert!(!preview.contains("line 7"));
        assert!(preview.ends_with("\n..."));
    }

    #[test]
    fn test_preview_keeps_short_content() {
        let artifact = Artifact::new(OutputFormat::Pdf, "one\ntwo", vec![]);
        assert_eq!(artifact.preview(), "one\ntwo");
    }

    #[test]
    fn test_format_as_map_key_serializes() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(OutputFormat::Pdf, 1);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"pdf":1}"#);
    }
}
