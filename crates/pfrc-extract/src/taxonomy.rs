//! Keyword-driven detection of which trading program a document concerns.

use std::path::Path;

use serde::Deserialize;

use crate::ExtractError;

const BUILTIN_TAXONOMY: &str = include_str!("../config/taxonomy.yaml");

#[derive(Debug, Clone, Deserialize)]
struct TaxonomyFile {
    #[allow(dead_code)]
    version: u32,
    programs: Vec<ProgramSpec>,
    #[serde(default)]
    evaluation_terms: Vec<String>,
    #[serde(default)]
    funded_terms: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProgramSpec {
    id: String,
    keywords: Vec<String>,
}

/// Ordered program table loaded from versioned YAML configuration.
#[derive(Debug, Clone)]
pub struct ProgramTaxonomy {
    programs: Vec<ProgramSpec>,
    evaluation_terms: Vec<String>,
    funded_terms: Vec<String>,
}

impl ProgramTaxonomy {
    pub fn builtin() -> Result<Self, ExtractError> {
        Self::from_yaml(BUILTIN_TAXONOMY)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ExtractError> {
        let file: TaxonomyFile = serde_yaml::from_str(text)?;
        Ok(Self {
            programs: file.programs,
            evaluation_terms: file.evaluation_terms,
            funded_terms: file.funded_terms,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ExtractError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ExtractError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Detect every program the combined title + URL + body mentions.
    ///
    /// Always returns at least one identifier: documents with generic
    /// challenge/evaluation vocabulary but no specific program fall back to
    /// `general`, funded-account vocabulary falls back to `funded`, and
    /// anything else is `general`.
    pub fn detect_programs(&self, text: &str, title: &str, url: &str) -> Vec<String> {
        let haystack = format!("{text} {title} {url}").to_lowercase();

        let mut detected: Vec<String> = self
            .programs
            .iter()
            .filter(|program| program.keywords.iter().any(|kw| haystack.contains(kw.as_str())))
            .map(|program| program.id.clone())
            .collect();

        if detected.is_empty() {
            if self.evaluation_terms.iter().any(|t| haystack.contains(t.as_str())) {
                detected.push("general".to_string());
            } else if self.funded_terms.iter().any(|t| haystack.contains(t.as_str())) {
                detected.push("funded".to_string());
            }
        }

        if detected.is_empty() {
            detected.push("general".to_string());
        }
        detected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> ProgramTaxonomy {
        ProgramTaxonomy::builtin().expect("builtin taxonomy parses")
    }

    #[test]
    fn detects_specific_programs_from_titles() {
        let cases = [
            ("Stellar 1 Step Challenge Rules", "stellar_1_step"),
            ("Stellar 2-Step Phase 1 Requirements", "stellar_2_step"),
            ("Stellar Lite Account Information", "stellar_lite"),
            ("Stellar Instant Funding", "stellar_instant"),
            ("Evaluation Challenge", "evaluation"),
        ];
        for (title, expected) in cases {
            let detected = taxonomy().detect_programs("", title, "");
            assert!(
                detected.contains(&expected.to_string()),
                "{title}: got {detected:?}, expected {expected}"
            );
        }
    }

    #[test]
    fn challenge_vocabulary_without_program_falls_back_to_general() {
        let detected = taxonomy().detect_programs("complete the challenge in time", "Rules", "");
        assert_eq!(detected, vec!["general"]);
    }

    #[test]
    fn funded_vocabulary_falls_back_to_funded() {
        let detected = taxonomy().detect_programs("once you are funded, payouts begin", "Payouts", "");
        assert_eq!(detected, vec!["funded"]);
    }

    #[test]
    fn always_returns_at_least_one_identifier() {
        let detected = taxonomy().detect_programs("nothing relevant here", "Contact Us", "");
        assert_eq!(detected, vec!["general"]);
    }

    #[test]
    fn url_participates_in_detection() {
        let detected = taxonomy().detect_programs(
            "",
            "Rules",
            "https://help.example.com/en/articles/evaluation-rules",
        );
        assert!(detected.contains(&"evaluation".to_string()));
    }
}
