//! Capability seam around the external soft-rule classification service.
//!
//! The pipeline probes availability once per run and simply runs without the
//! LLM stage when the service is down; per-call failures of any shape mean
//! "no rule" for that paragraph.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use pfrc_core::SoftCategory;

use crate::span::char_prefix;
use crate::ExtractError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "qwen2.5-coder:14b";

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Paragraphs are truncated to this many characters before classification.
const PROMPT_PARAGRAPH_CHARS: usize = 500;

/// A normalized classifier verdict for one paragraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: SoftCategory,
    pub description: String,
}

#[async_trait]
pub trait SoftRuleClassifier: Send + Sync {
    /// Classify one paragraph. `None` means "no soft rule here", which also
    /// covers timeouts, transport errors, and unparseable replies.
    async fn classify(&self, paragraph: &str) -> Option<Classification>;
}

/// Classifier that never produces a rule; used in tests and `--no-llm` runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopClassifier;

#[async_trait]
impl SoftRuleClassifier for NoopClassifier {
    async fn classify(&self, _paragraph: &str) -> Option<Classification> {
        None
    }
}

/// Ollama-backed classifier speaking the `/api/generate` contract.
#[derive(Debug, Clone)]
pub struct OllamaClassifier {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClassifier {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    /// Lightweight health probe: the service answers `/api/tags` and lists
    /// the configured model.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        let response = match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(status = %response.status(), "classifier health probe rejected");
                return false;
            }
            Err(err) => {
                debug!(%err, "classifier unreachable");
                return false;
            }
        };
        let Ok(body) = response.json::<serde_json::Value>().await else {
            return false;
        };
        body.get("models")
            .and_then(|models| models.as_array())
            .map(|models| {
                models.iter().any(|model| {
                    model
                        .get("name")
                        .and_then(|name| name.as_str())
                        .is_some_and(|name| name.contains(&self.model))
                })
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl SoftRuleClassifier for OllamaClassifier {
    async fn classify(&self, paragraph: &str) -> Option<Classification> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": classification_prompt(paragraph),
            "stream": false,
            "options": {"temperature": 0.1},
        });
        let response = match self
            .client
            .post(&url)
            .timeout(CLASSIFY_TIMEOUT)
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "classification call rejected");
                return None;
            }
            Err(err) => {
                warn!(%err, "classification call failed");
                return None;
            }
        };
        let value: serde_json::Value = response.json().await.ok()?;
        let text = value.get("response")?.as_str()?;
        parse_classification(text)
    }
}

fn classification_prompt(paragraph: &str) -> String {
    let snippet = char_prefix(paragraph, PROMPT_PARAGRAPH_CHARS);
    format!(
        "You are a trading rule classifier. Analyze the following text and determine if it contains a soft rule or guideline.\n\n\
SOFT RULE CATEGORIES:\n\
1. gambling - Warnings about excessive risk, over-leveraging, or gambling-like behavior\n\
2. hyperactivity - Guidelines about excessive trading or overtrading\n\
3. cross_account_hedging - Rules about hedging across multiple accounts\n\
4. consistency - Guidelines about maintaining consistent trading patterns\n\
5. risk_management - General risk management recommendations\n\
6. trading_style - Recommendations about trading approach or discipline\n\
7. other - Other behavioral guidelines\n\n\
TEXT TO ANALYZE:\n{snippet}\n\n\
TASK:\n\
If this text contains a soft rule or guideline:\n\
1. Identify the category (from list above)\n\
2. Extract the key guidance\n\
3. Respond with JSON only:\n\n\
{{\"category\": \"risk_management\", \"description\": \"Brief description of the guideline\", \"is_soft_rule\": true}}\n\n\
If NO soft rule is present, respond with:\n\
{{\"is_soft_rule\": false}}\n\n\
JSON RESPONSE:"
    )
}

#[derive(Debug, Deserialize)]
struct ClassifierReply {
    #[serde(default)]
    is_soft_rule: bool,
    #[serde(default)]
    category: Option<SoftCategory>,
    #[serde(default)]
    description: Option<String>,
}

/// Pull the first JSON object out of the raw model output and normalize it.
/// Anything that fails to parse is treated as "no rule".
pub(crate) fn parse_classification(text: &str) -> Option<Classification> {
    static JSON_OBJECT: OnceLock<Regex> = OnceLock::new();
    let matcher =
        JSON_OBJECT.get_or_init(|| Regex::new(r"\{[^{}]+\}").expect("json matcher is valid"));
    let candidate = matcher.find(text)?;
    let reply: ClassifierReply = serde_json::from_str(candidate.as_str()).ok()?;
    if !reply.is_soft_rule {
        return None;
    }
    Some(Classification {
        category: reply.category.unwrap_or(SoftCategory::Other),
        description: reply
            .description
            .unwrap_or_else(|| "Behavioral guideline".to_string()),
    })
}
