//! Soft (behavioral) rule detection: deterministic indicator patterns plus
//! an optional LLM classification stage over pre-filtered paragraphs.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use pfrc_core::{
    split_paragraphs, ExtractionMethod, RuleCategory, RuleDraft, SoftCategory,
    DEFAULT_MIN_PARAGRAPH_LEN,
};

use crate::classifier::SoftRuleClassifier;
use crate::hard::compile_pattern;
use crate::span::{char_prefix, context_window};
use crate::ExtractError;

const BUILTIN_SOFT_RULES: &str = include_str!("../config/soft_rules.yaml");

/// Confidence tiers: deterministic indicator matches sit above classifier
/// verdicts.
pub const PATTERN_CONFIDENCE: f64 = 0.85;
pub const LLM_CONFIDENCE: f64 = 0.7;

/// At most this many qualifying paragraphs per document reach the classifier.
const MAX_CLASSIFIED_PARAGRAPHS: usize = 20;

/// Classifier rules keep this much of the source paragraph as context.
const LLM_CONTEXT_CHARS: usize = 300;

#[derive(Debug, Clone, Deserialize)]
struct SoftRulesFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default = "default_context_chars")]
    context_chars: usize,
    indicators: Vec<IndicatorSpec>,
    candidate_cues: Vec<String>,
    hard_cues: Vec<String>,
}

fn default_context_chars() -> usize {
    150
}

#[derive(Debug, Clone, Deserialize)]
struct IndicatorSpec {
    category: SoftCategory,
    description: String,
    patterns: Vec<String>,
}

#[derive(Debug)]
struct CompiledIndicator {
    category: SoftCategory,
    description: String,
    patterns: Vec<Regex>,
}

/// Heuristic + LLM soft rule detection over one document's text.
pub struct SoftRuleDetector {
    indicators: Vec<CompiledIndicator>,
    candidate_cues: Vec<String>,
    hard_cues: Vec<String>,
    context_chars: usize,
    classifier: Option<Box<dyn SoftRuleClassifier>>,
}

impl SoftRuleDetector {
    /// Detector with the built-in indicator table. `classifier` is `None`
    /// when the external service is unavailable or disabled; the detector
    /// then degrades to the pattern stage alone.
    pub fn new(classifier: Option<Box<dyn SoftRuleClassifier>>) -> Result<Self, ExtractError> {
        Self::from_yaml(BUILTIN_SOFT_RULES, classifier)
    }

    pub fn from_yaml(
        text: &str,
        classifier: Option<Box<dyn SoftRuleClassifier>>,
    ) -> Result<Self, ExtractError> {
        let file: SoftRulesFile = serde_yaml::from_str(text)?;
        let mut indicators = Vec::with_capacity(file.indicators.len());
        for spec in file.indicators {
            let patterns = spec
                .patterns
                .iter()
                .map(|pattern| compile_pattern(pattern))
                .collect::<Result<Vec<_>, _>>()?;
            indicators.push(CompiledIndicator {
                category: spec.category,
                description: spec.description,
                patterns,
            });
        }
        Ok(Self {
            indicators,
            candidate_cues: file.candidate_cues,
            hard_cues: file.hard_cues,
            context_chars: file.context_chars,
            classifier,
        })
    }

    pub fn from_path(
        path: impl AsRef<Path>,
        classifier: Option<Box<dyn SoftRuleClassifier>>,
    ) -> Result<Self, ExtractError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ExtractError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text, classifier)
    }

    pub fn llm_enabled(&self) -> bool {
        self.classifier.is_some()
    }

    /// Pattern stage always runs; the LLM stage only when a classifier is
    /// wired in. Never fails: classifier misbehavior costs individual rules,
    /// not the run.
    pub async fn extract_soft_rules(&self, text: &str) -> Vec<RuleDraft> {
        let mut rules = self.detect_with_patterns(text);
        if let Some(classifier) = &self.classifier {
            for paragraph in self.candidate_paragraphs(text) {
                let Some(classification) = classifier.classify(paragraph).await else {
                    continue;
                };
                rules.push(RuleDraft {
                    kind: classification.category.as_kind(),
                    category: RuleCategory::Behavioral,
                    program_id: None,
                    value: classification.category.display_name().to_string(),
                    description: classification.description,
                    raw_context: char_prefix(paragraph, LLM_CONTEXT_CHARS),
                    method: ExtractionMethod::Llm,
                    confidence: LLM_CONFIDENCE,
                });
            }
        }
        rules
    }

    fn detect_with_patterns(&self, text: &str) -> Vec<RuleDraft> {
        let mut rules = Vec::new();
        for indicator in &self.indicators {
            for pattern in &indicator.patterns {
                for found in pattern.find_iter(text) {
                    let context =
                        context_window(text, found.start(), found.end(), self.context_chars);
                    rules.push(RuleDraft {
                        kind: indicator.category.as_kind(),
                        category: RuleCategory::Behavioral,
                        program_id: None,
                        value: indicator.category.display_name().to_string(),
                        description: self.describe(indicator, &context),
                        raw_context: context,
                        method: ExtractionMethod::Pattern,
                        confidence: PATTERN_CONFIDENCE,
                    });
                }
            }
        }
        rules
    }

    fn describe(&self, indicator: &CompiledIndicator, context: &str) -> String {
        let lower = context.to_lowercase();
        if lower.contains("margin") && context.contains("70") {
            return "Avoid using more than 70% margin (gambling indicator)".to_string();
        }
        if lower.contains("trades") || lower.contains("orders") {
            return format!("{} - limit number of trades per day", indicator.description);
        }
        indicator.description.clone()
    }

    /// Paragraphs worth classifying: soft-rule vocabulary present, hard-rule
    /// vocabulary absent, capped at the first twenty.
    fn candidate_paragraphs<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let paragraphs = split_paragraphs(text, DEFAULT_MIN_PARAGRAPH_LEN);
        let mut candidates = Vec::new();
        for paragraph in &paragraphs {
            let lower = paragraph.to_lowercase();
            if !self.candidate_cues.iter().any(|cue| lower.contains(cue.as_str())) {
                continue;
            }
            if self.hard_cues.iter().any(|cue| lower.contains(cue.as_str())) {
                continue;
            }
            if candidates.len() == MAX_CLASSIFIED_PARAGRAPHS {
                debug!("paragraph classification cap reached");
                break;
            }
            // Re-find the slice inside the original text to keep lifetimes
            // tied to the document, not the temporary split.
            if let Some(position) = text.find(paragraph.as_str()) {
                candidates.push(&text[position..position + paragraph.len()]);
            }
        }
        candidates
    }
}

/// Collapse same-kind soft rules: singleton groups pass through, larger
/// groups prefer an LLM-sourced member, else the first seen.
pub fn merge_similar(rules: Vec<RuleDraft>) -> Vec<RuleDraft> {
    let mut groups: Vec<(pfrc_core::RuleKind, Vec<RuleDraft>)> = Vec::new();
    for rule in rules {
        match groups.iter_mut().find(|(kind, _)| *kind == rule.kind) {
            Some((_, members)) => members.push(rule),
            None => groups.push((rule.kind, vec![rule])),
        }
    }
    groups
        .into_iter()
        .map(|(_, mut members)| {
            if members.len() == 1 {
                members.remove(0)
            } else if let Some(position) = members
                .iter()
                .position(|r| r.method == ExtractionMethod::Llm)
            {
                members.swap_remove(position)
            } else {
                members.remove(0)
            }
        })
        .collect()
}
