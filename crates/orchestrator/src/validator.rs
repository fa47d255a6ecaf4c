//! Submission preconditions checked before a request may leave `Draft`.

use std::collections::BTreeSet;

use casegen_core::ComplianceTag;

use crate::error::{OrchestratorError, Result};

/// Checks rules 1-3 against the full tag vocabulary.
///
/// 1. the trimmed specification must be non-empty
/// 2. without an attachment at least one compliance tag is required
/// 3. with an attachment the tags may be empty
pub fn validate(
    specification_text: &str,
    compliance_tags: &BTreeSet<ComplianceTag>,
    has_attachment: bool,
) -> Result<()> {
    if specification_text.trim().is_empty() {
        return Err(OrchestratorError::Validation(
            "empty specification".to_string(),
        ));
    }

    if !has_attachment && compliance_tags.is_empty() {
        return Err(OrchestratorError::Validation(
            "missing compliance selection".to_string(),
        ));
    }

    Ok(())
}

/// Validator bound to a configured tag vocabulary.
#[derive(Debug, Clone)]
pub struct Validator {
    vocabulary: BTreeSet<ComplianceTag>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ComplianceTag::ALL)
    }
}

impl Validator {
    pub fn new(vocabulary: impl IntoIterator<Item = ComplianceTag>) -> Self {
        Self {
            vocabulary: vocabulary.into_iter().collect(),
        }
    }

    pub fn vocabulary(&self) -> &BTreeSet<ComplianceTag> {
        &self.vocabulary
    }

    pub fn validate(
        &self,
        specification_text: &str,
        compliance_tags: &BTreeSet<ComplianceTag>,
        has_attachment: bool,
    ) -> Result<()> {
        validate(specification_text, compliance_tags, has_attachment)?;

        if let Some(tag) = compliance_tags
            .iter()
            .find(|tag| !self.vocabulary.contains(tag))
        {
            return Err(OrchestratorError::Validation(format!(
                "unsupported compliance tag: {}",
                tag
            )));
        }

        Ok(())
    }

    /// Parse raw tag strings from an inbound request. Blank entries are
    /// skipped; anything else must name a known tag.
    pub fn parse_tags<S: AsRef<str>>(&self, raw: &[S]) -> Result<BTreeSet<ComplianceTag>> {
        raw.iter()
            .map(AsRef::as_ref)
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                ComplianceTag::parse(s).ok_or_else(|| {
                    OrchestratorError::Validation(format!(
                        "unknown compliance tag: {}",
                        s.trim()
                    ))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[ComplianceTag]) -> BTreeSet<ComplianceTag> {
        list.iter().copied().collect()
    }

    fn reason(result: Result<()>) -> String {
        match result {
            Err(OrchestratorError::Validation(reason)) => reason,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_specification_always_rejected() {
        for text in ["", "   ", "\n\t"] {
            for attachment in [false, true] {
                for set in [tags(&[]), tags(&[ComplianceTag::Fda])] {
                    assert_eq!(reason(validate(text, &set, attachment)), "empty specification");
                }
            }
        }
    }

    #[test]
    fn test_tags_required_without_attachment() {
        assert_eq!(
            reason(validate("Login must lock", &tags(&[]), false)),
            "missing compliance selection"
        );
        assert!(validate("Login must lock", &tags(&[ComplianceTag::Iso27001]), false).is_ok());
    }

    #[test]
    fn test_tags_optional_with_attachment() {
        assert!(validate("See attached SRS", &tags(&[]), true).is_ok());
        assert!(validate("See attached SRS", &tags(&[ComplianceTag::Fda]), true).is_ok());
    }

    #[test]
    fn test_vocabulary_restricts_tags() {
        let validator = Validator::new([ComplianceTag::Fda, ComplianceTag::Iec62304]);

        assert!(validator
            .validate("spec", &tags(&[ComplianceTag::Fda]), false)
            .is_ok());
        assert_eq!(
            reason(validator.validate("spec", &tags(&[ComplianceTag::Iso9001]), false)),
            "unsupported compliance tag: ISO-9001"
        );
        // Base rules still run first
        assert_eq!(
            reason(validator.validate("", &tags(&[ComplianceTag::Iso9001]), false)),
            "empty specification"
        );
    }

    #[test]
    fn test_parse_tags() {
        let validator = Validator::default();

        let parsed = validator
            .parse_tags(&["ISO-27001", "iso 13485", "", "ISO-27001"])
            .unwrap();
        assert_eq!(parsed, tags(&[ComplianceTag::Iso13485, ComplianceTag::Iso27001]));

        let err = validator.parse_tags(&["FDA", "SOC2"]).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(msg) if msg == "unknown compliance tag: SOC2"));
    }
}
