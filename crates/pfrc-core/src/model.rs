//! Closed-set domain types for documents and extracted trading rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classified shape of a scraped help-center page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Article,
    Collection,
    Homepage,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Article => "article",
            DocType::Collection => "collection",
            DocType::Homepage => "homepage",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "article" => Some(DocType::Article),
            "collection" => Some(DocType::Collection),
            "homepage" => Some(DocType::Homepage),
            _ => None,
        }
    }
}

/// Behavioral soft-rule categories understood by the detector and the
/// external classifier. Unknown classifier output folds into `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftCategory {
    Gambling,
    Hyperactivity,
    CrossAccountHedging,
    Consistency,
    RiskManagement,
    TradingStyle,
    #[serde(other)]
    Other,
}

impl SoftCategory {
    pub fn as_kind(&self) -> RuleKind {
        match self {
            SoftCategory::Gambling => RuleKind::SoftGambling,
            SoftCategory::Hyperactivity => RuleKind::SoftHyperactivity,
            SoftCategory::CrossAccountHedging => RuleKind::SoftCrossAccountHedging,
            SoftCategory::Consistency => RuleKind::SoftConsistency,
            SoftCategory::RiskManagement => RuleKind::SoftRiskManagement,
            SoftCategory::TradingStyle => RuleKind::SoftTradingStyle,
            SoftCategory::Other => RuleKind::SoftOther,
        }
    }

    /// Human-readable label used as the rule value, e.g. "Risk Management".
    pub fn display_name(&self) -> &'static str {
        match self {
            SoftCategory::Gambling => "Gambling",
            SoftCategory::Hyperactivity => "Hyperactivity",
            SoftCategory::CrossAccountHedging => "Cross Account Hedging",
            SoftCategory::Consistency => "Consistency",
            SoftCategory::RiskManagement => "Risk Management",
            SoftCategory::TradingStyle => "Trading Style",
            SoftCategory::Other => "Other",
        }
    }
}

/// Every rule kind the extractors can produce. `Soft*` kinds come from the
/// behavioral detector; the rest from the hard pattern tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    ProfitTarget,
    DailyLossLimit,
    MaxDrawdown,
    TrailingDrawdown,
    ProfitSplit,
    MinTradingDays,
    MaxTradingDays,
    Leverage,
    AccountSize,
    EaPermission,
    CopyTrading,
    Hedging,
    WeekendHolding,
    NewsTrading,
    ConsistencyRule,
    LotSizeLimit,
    MarginLimit,
    MinPayout,
    PayoutFrequency,
    ProhibitedStrategy,
    SoftGambling,
    SoftHyperactivity,
    SoftCrossAccountHedging,
    SoftConsistency,
    SoftRiskManagement,
    SoftTradingStyle,
    SoftOther,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::ProfitTarget => "profit_target",
            RuleKind::DailyLossLimit => "daily_loss_limit",
            RuleKind::MaxDrawdown => "max_drawdown",
            RuleKind::TrailingDrawdown => "trailing_drawdown",
            RuleKind::ProfitSplit => "profit_split",
            RuleKind::MinTradingDays => "min_trading_days",
            RuleKind::MaxTradingDays => "max_trading_days",
            RuleKind::Leverage => "leverage",
            RuleKind::AccountSize => "account_size",
            RuleKind::EaPermission => "ea_permission",
            RuleKind::CopyTrading => "copy_trading",
            RuleKind::Hedging => "hedging",
            RuleKind::WeekendHolding => "weekend_holding",
            RuleKind::NewsTrading => "news_trading",
            RuleKind::ConsistencyRule => "consistency_rule",
            RuleKind::LotSizeLimit => "lot_size_limit",
            RuleKind::MarginLimit => "margin_limit",
            RuleKind::MinPayout => "min_payout",
            RuleKind::PayoutFrequency => "payout_frequency",
            RuleKind::ProhibitedStrategy => "prohibited_strategy",
            RuleKind::SoftGambling => "soft_gambling",
            RuleKind::SoftHyperactivity => "soft_hyperactivity",
            RuleKind::SoftCrossAccountHedging => "soft_cross_account_hedging",
            RuleKind::SoftConsistency => "soft_consistency",
            RuleKind::SoftRiskManagement => "soft_risk_management",
            RuleKind::SoftTradingStyle => "soft_trading_style",
            RuleKind::SoftOther => "soft_other",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        let kind = match label {
            "profit_target" => RuleKind::ProfitTarget,
            "daily_loss_limit" => RuleKind::DailyLossLimit,
            "max_drawdown" => RuleKind::MaxDrawdown,
            "trailing_drawdown" => RuleKind::TrailingDrawdown,
            "profit_split" => RuleKind::ProfitSplit,
            "min_trading_days" => RuleKind::MinTradingDays,
            "max_trading_days" => RuleKind::MaxTradingDays,
            "leverage" => RuleKind::Leverage,
            "account_size" => RuleKind::AccountSize,
            "ea_permission" => RuleKind::EaPermission,
            "copy_trading" => RuleKind::CopyTrading,
            "hedging" => RuleKind::Hedging,
            "weekend_holding" => RuleKind::WeekendHolding,
            "news_trading" => RuleKind::NewsTrading,
            "consistency_rule" => RuleKind::ConsistencyRule,
            "lot_size_limit" => RuleKind::LotSizeLimit,
            "margin_limit" => RuleKind::MarginLimit,
            "min_payout" => RuleKind::MinPayout,
            "payout_frequency" => RuleKind::PayoutFrequency,
            "prohibited_strategy" => RuleKind::ProhibitedStrategy,
            "soft_gambling" => RuleKind::SoftGambling,
            "soft_hyperactivity" => RuleKind::SoftHyperactivity,
            "soft_cross_account_hedging" => RuleKind::SoftCrossAccountHedging,
            "soft_consistency" => RuleKind::SoftConsistency,
            "soft_risk_management" => RuleKind::SoftRiskManagement,
            "soft_trading_style" => RuleKind::SoftTradingStyle,
            "soft_other" => RuleKind::SoftOther,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            RuleKind::SoftGambling
                | RuleKind::SoftHyperactivity
                | RuleKind::SoftCrossAccountHedging
                | RuleKind::SoftConsistency
                | RuleKind::SoftRiskManagement
                | RuleKind::SoftTradingStyle
                | RuleKind::SoftOther
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Performance,
    Risk,
    Payout,
    Requirements,
    TradingConditions,
    AccountOptions,
    TradingPermissions,
    TradingRestrictions,
    ProhibitedStrategies,
    Behavioral,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Performance => "performance",
            RuleCategory::Risk => "risk",
            RuleCategory::Payout => "payout",
            RuleCategory::Requirements => "requirements",
            RuleCategory::TradingConditions => "trading_conditions",
            RuleCategory::AccountOptions => "account_options",
            RuleCategory::TradingPermissions => "trading_permissions",
            RuleCategory::TradingRestrictions => "trading_restrictions",
            RuleCategory::ProhibitedStrategies => "prohibited_strategies",
            RuleCategory::Behavioral => "behavioral",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        let category = match label {
            "performance" => RuleCategory::Performance,
            "risk" => RuleCategory::Risk,
            "payout" => RuleCategory::Payout,
            "requirements" => RuleCategory::Requirements,
            "trading_conditions" => RuleCategory::TradingConditions,
            "account_options" => RuleCategory::AccountOptions,
            "trading_permissions" => RuleCategory::TradingPermissions,
            "trading_restrictions" => RuleCategory::TradingRestrictions,
            "prohibited_strategies" => RuleCategory::ProhibitedStrategies,
            "behavioral" => RuleCategory::Behavioral,
            _ => return None,
        };
        Some(category)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Important,
    Optional,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Optional => "optional",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "critical" => Some(Severity::Critical),
            "important" => Some(Severity::Important),
            "optional" => Some(Severity::Optional),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Pattern,
    Llm,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Pattern => "pattern",
            ExtractionMethod::Llm => "llm",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pattern" => Some(ExtractionMethod::Pattern),
            "llm" => Some(ExtractionMethod::Llm),
            _ => None,
        }
    }
}

/// Outcome of classifying permission-style rule context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Allowed,
    Prohibited,
    Restricted,
    Unclear,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Allowed => "allowed",
            Permission::Prohibited => "prohibited",
            Permission::Restricted => "restricted",
            Permission::Unclear => "unclear",
        }
    }
}

/// One scraped page as delivered by the crawler. The text source may arrive
/// under either a `body` or an `html` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
}

impl PageRecord {
    pub fn body_text(&self) -> &str {
        self.body
            .as_deref()
            .filter(|b| !b.is_empty())
            .or(self.html.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firm {
    pub id: i64,
    pub name: String,
    pub domain: String,
    pub website_url: Option<String>,
    pub help_center_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One stored version of one logical help-center page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub firm_id: i64,
    pub url: String,
    pub canonical_url: String,
    pub title: String,
    pub doc_type: DocType,
    pub body_text: String,
    pub content_hash: String,
    pub version: i64,
    pub is_current: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub document_id: i64,
    pub paragraph_index: i64,
    pub paragraph_text: String,
    pub paragraph_hash: String,
}

/// Raw extraction candidate before severity classification and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDraft {
    pub kind: RuleKind,
    pub category: RuleCategory,
    pub program_id: Option<String>,
    pub value: String,
    pub description: String,
    pub raw_context: String,
    pub method: ExtractionMethod,
    pub confidence: f64,
}

/// A classified rule ready for insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    #[serde(rename = "rule_type")]
    pub kind: RuleKind,
    #[serde(rename = "rule_category")]
    pub category: RuleCategory,
    pub program_id: String,
    pub value: String,
    pub description: String,
    pub raw_context: String,
    pub severity: Severity,
    #[serde(rename = "extraction_method")]
    pub method: ExtractionMethod,
    pub confidence: f64,
}

/// A persisted rule row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub firm_id: i64,
    pub source_document_id: Option<i64>,
    #[serde(rename = "rule_type")]
    pub kind: RuleKind,
    #[serde(rename = "rule_category")]
    pub category: RuleCategory,
    pub program_id: String,
    pub value: String,
    pub description: String,
    pub raw_context: String,
    pub severity: Severity,
    #[serde(rename = "extraction_method")]
    pub method: ExtractionMethod,
    pub confidence: f64,
    pub extracted_at: DateTime<Utc>,
}
