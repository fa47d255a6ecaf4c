use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::CoreError;

/// Regulatory standards a generated test suite can be traced against.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, ToSchema,
)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub enum ComplianceTag {
    #[serde(rename = "FDA")]
    Fda,
    #[serde(rename = "IEC-62304")]
    Iec62304,
    #[serde(rename = "ISO-9001")]
    Iso9001,
    #[serde(rename = "ISO-13485")]
    Iso13485,
    #[serde(rename = "ISO-27001")]
    Iso27001,
}

impl ComplianceTag {
    pub const ALL: [ComplianceTag; 5] = [
        Self::Fda,
        Self::Iec62304,
        Self::Iso9001,
        Self::Iso13485,
        Self::Iso27001,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fda => "FDA",
            Self::Iec62304 => "IEC-62304",
            Self::Iso9001 => "ISO-9001",
            Self::Iso13485 => "ISO-13485",
            Self::Iso27001 => "ISO-27001",
        }
    }

    /// Parses a tag, ignoring case and the separator between body and number
    /// ("ISO 27001", "iso_27001" and "ISO-27001" are the same tag).
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        match normalized.as_str() {
            "FDA" => Some(Self::Fda),
            "IEC62304" => Some(Self::Iec62304),
            "ISO9001" => Some(Self::Iso9001),
            "ISO13485" => Some(Self::Iso13485),
            "ISO27001" => Some(Self::Iso27001),
            _ => None,
        }
    }
}

impl std::str::FromStr for ComplianceTag {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::UnknownComplianceTag(s.trim().to_string()))
    }
}

impl std::fmt::Display for ComplianceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
