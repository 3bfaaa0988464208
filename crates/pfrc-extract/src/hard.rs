//! Hard rule extraction: a data-driven regex table applied per kind, with
//! category-specific value normalization and permission classification.

use std::collections::HashSet;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::debug;

use pfrc_core::{ExtractionMethod, Permission, RuleCategory, RuleDraft, RuleKind};

use crate::span::{char_prefix, context_window};
use crate::ExtractError;

const BUILTIN_HARD_RULES: &str = include_str!("../config/hard_rules.yaml");

/// Context captured around a pattern match, in bytes each side.
const DEFAULT_CONTEXT_CHARS: usize = 100;

/// Context prefix length used in the deduplication key.
const DEDUP_CONTEXT_PREFIX: usize = 50;

const PROHIBITED_WORDS: &[&str] = &[
    "prohibited",
    "forbidden",
    "not allowed",
    "cannot",
    "must not",
    "strictly forbidden",
];
const RESTRICTED_WORDS: &[&str] = &[
    "restricted", "limited", "only", "except", "must be", "should be",
];
const ALLOWED_WORDS: &[&str] = &["allowed", "permitted", "can", "may", "yes"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum NormalizeMode {
    Percent,
    Currency,
    Leverage,
    Permission,
    Raw,
}

#[derive(Debug, Clone, Deserialize)]
struct HardRulesFile {
    #[allow(dead_code)]
    version: u32,
    rules: Vec<RuleSpec>,
    prohibited_strategies: ProhibitedSpec,
}

#[derive(Debug, Clone, Deserialize)]
struct RuleSpec {
    kind: RuleKind,
    category: RuleCategory,
    normalize: NormalizeMode,
    description: String,
    #[serde(default)]
    context_chars: Option<usize>,
    patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProhibitedSpec {
    keywords: Vec<String>,
    markers: Vec<String>,
}

#[derive(Debug)]
struct CompiledRule {
    kind: RuleKind,
    category: RuleCategory,
    normalize: NormalizeMode,
    description: String,
    context_chars: usize,
    patterns: Vec<Regex>,
}

/// Applies the versioned pattern table to document text and packages matches
/// into [`RuleDraft`] candidates.
#[derive(Debug)]
pub struct HardRuleExtractor {
    rules: Vec<CompiledRule>,
    prohibited: ProhibitedSpec,
}

impl HardRuleExtractor {
    pub fn builtin() -> Result<Self, ExtractError> {
        Self::from_yaml(BUILTIN_HARD_RULES)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ExtractError> {
        let file: HardRulesFile = serde_yaml::from_str(text)?;
        let mut rules = Vec::with_capacity(file.rules.len());
        for spec in file.rules {
            let patterns = spec
                .patterns
                .iter()
                .map(|pattern| compile_pattern(pattern))
                .collect::<Result<Vec<_>, _>>()?;
            rules.push(CompiledRule {
                kind: spec.kind,
                category: spec.category,
                normalize: spec.normalize,
                description: spec.description,
                context_chars: spec.context_chars.unwrap_or(DEFAULT_CONTEXT_CHARS),
                patterns,
            });
        }
        Ok(Self {
            rules,
            prohibited: file.prohibited_strategies,
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

    /// Run every pattern of every kind over the text. A candidate that fails
    /// value normalization is dropped without affecting its category.
    pub fn extract_all(&self, text: &str) -> Vec<RuleDraft> {
        let mut drafts = Vec::new();
        for rule in &self.rules {
            for pattern in &rule.patterns {
                for captures in pattern.captures_iter(text) {
                    let Some(full) = captures.get(0) else { continue };
                    let raw = captures
                        .get(1)
                        .map(|group| group.as_str())
                        .unwrap_or(full.as_str());
                    let context =
                        context_window(text, full.start(), full.end(), rule.context_chars);
                    match draft_for_match(rule, raw, &context) {
                        Some(draft) => drafts.push(draft),
                        None => {
                            debug!(
                                kind = rule.kind.as_str(),
                                raw, "dropping unnormalizable match"
                            );
                        }
                    }
                }
            }
        }
        drafts.extend(self.extract_prohibited_strategies(text));
        drafts
    }

    /// Keyword-presence scan for prohibited strategies. A mention only
    /// becomes a rule when its context carries an explicit prohibition
    /// marker.
    fn extract_prohibited_strategies(&self, text: &str) -> Vec<RuleDraft> {
        let lower = text.to_lowercase();
        let mut drafts = Vec::new();
        for keyword in &self.prohibited.keywords {
            let needle = keyword.to_lowercase();
            let Some(position) = lower.find(&needle) else {
                continue;
            };
            let context =
                context_window(text, position, position + needle.len(), DEFAULT_CONTEXT_CHARS);
            let context_lower = context.to_lowercase();
            if !self
                .prohibited
                .markers
                .iter()
                .any(|marker| context_lower.contains(marker.as_str()))
            {
                continue;
            }
            drafts.push(RuleDraft {
                kind: RuleKind::ProhibitedStrategy,
                category: RuleCategory::ProhibitedStrategies,
                program_id: None,
                value: keyword.clone(),
                description: format!("{} is prohibited", capitalize_words(keyword)),
                raw_context: context,
                method: ExtractionMethod::Pattern,
                confidence: 1.0,
            });
        }
        drafts
    }
}

pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex, ExtractError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ExtractError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

fn draft_for_match(rule: &CompiledRule, raw: &str, context: &str) -> Option<RuleDraft> {
    let (value, category, description) = match rule.normalize {
        NormalizeMode::Percent => {
            let value = format!("{raw}%");
            let description = rule.description.replace("{value}", &value);
            (value, rule.category, description)
        }
        NormalizeMode::Currency => {
            let value = normalize_currency(raw)?;
            let description = rule.description.replace("{value}", &value);
            (value, rule.category, description)
        }
        NormalizeMode::Leverage => {
            let value = format!("1:{raw}");
            let description = rule.description.replace("{value}", &value);
            (value, rule.category, description)
        }
        NormalizeMode::Raw => {
            let description = rule.description.replace("{value}", raw);
            (raw.to_string(), rule.category, description)
        }
        NormalizeMode::Permission => {
            let context_lower = context.to_lowercase();
            if rule.kind == RuleKind::Hedging
                && context_lower.contains("cross")
                && context_lower.contains("account")
            {
                (
                    Permission::Prohibited.as_str().to_string(),
                    RuleCategory::ProhibitedStrategies,
                    "Cross-account hedging is prohibited".to_string(),
                )
            } else {
                let permission = classify_permission(context);
                let value = permission.as_str().to_string();
                let description = rule.description.replace("{value}", &value);
                (value, rule.category, description)
            }
        }
    };
    Some(RuleDraft {
        kind: rule.kind,
        category,
        program_id: None,
        value,
        description,
        raw_context: context.to_string(),
        method: ExtractionMethod::Pattern,
        confidence: 1.0,
    })
}

/// `$` values: strip thousands separators and expand a `k` suffix to the
/// full integer. Returns `None` for tokens that fail to parse as numbers.
fn normalize_currency(raw: &str) -> Option<String> {
    let stripped = raw.replace(',', "");
    let lower = stripped.to_lowercase();
    if let Some(prefix) = lower.strip_suffix('k') {
        let thousands: f64 = prefix.parse().ok()?;
        return Some(format!("${}", (thousands * 1000.0) as i64));
    }
    if stripped.is_empty() || !stripped.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    Some(format!("${stripped}"))
}

/// Classify rule context into allowed/prohibited/restricted, with
/// prohibition keywords outranking restriction keywords outranking
/// permission keywords.
pub fn classify_permission(context: &str) -> Permission {
    let lower = context.to_lowercase();
    if PROHIBITED_WORDS.iter().any(|w| lower.contains(w)) {
        return Permission::Prohibited;
    }
    if RESTRICTED_WORDS.iter().any(|w| lower.contains(w)) {
        return Permission::Restricted;
    }
    if ALLOWED_WORDS.iter().any(|w| lower.contains(w)) {
        return Permission::Allowed;
    }
    Permission::Unclear
}

/// Deduplicate by (kind, value, context prefix); first occurrence wins.
pub fn deduplicate(rules: Vec<RuleDraft>) -> Vec<RuleDraft> {
    let mut seen = HashSet::new();
    rules
        .into_iter()
        .filter(|rule| {
            seen.insert((
                rule.kind,
                rule.value.clone(),
                char_prefix(&rule.raw_context, DEDUP_CONTEXT_PREFIX),
            ))
        })
        .collect()
}

fn capitalize_words(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
