//! Severity classification and program assignment: the step that turns
//! extraction drafts into storable rules.

use pfrc_core::{NewRule, RuleCategory, RuleDraft, RuleKind, Severity};

/// Rule kinds that can breach an account outright.
const CRITICAL_KINDS: &[RuleKind] = &[
    RuleKind::DailyLossLimit,
    RuleKind::MaxDrawdown,
    RuleKind::TrailingDrawdown,
    RuleKind::ProhibitedStrategy,
    RuleKind::CopyTrading,
];

/// Requirements and permissions that gate passing a challenge.
const IMPORTANT_KINDS: &[RuleKind] = &[
    RuleKind::ProfitTarget,
    RuleKind::MinTradingDays,
    RuleKind::Leverage,
    RuleKind::EaPermission,
    RuleKind::Hedging,
    RuleKind::NewsTrading,
];

/// Total severity lookup: kind tables first, soft default next, category
/// fallback last. Every (kind, category) pair lands in exactly one tier.
pub fn severity_of(kind: RuleKind, category: RuleCategory) -> Severity {
    if CRITICAL_KINDS.contains(&kind) {
        return Severity::Critical;
    }
    if IMPORTANT_KINDS.contains(&kind) {
        return Severity::Important;
    }
    if kind.is_soft() {
        return Severity::Optional;
    }
    match category {
        RuleCategory::Risk | RuleCategory::ProhibitedStrategies => Severity::Critical,
        RuleCategory::Requirements | RuleCategory::TradingPermissions => Severity::Important,
        _ => Severity::Optional,
    }
}

/// Tag rules with the document's program: a single specific program overrides
/// every rule; otherwise each rule keeps its own program or gets `general`.
pub fn assign_program(rules: &mut [RuleDraft], programs: &[String]) {
    let override_program = match programs {
        [only] if only != "general" => Some(only.clone()),
        _ => None,
    };
    for rule in rules {
        match &override_program {
            Some(program) => rule.program_id = Some(program.clone()),
            None => {
                if rule.program_id.is_none() {
                    rule.program_id = Some("general".to_string());
                }
            }
        }
    }
}

/// Attach a severity tier and materialize the program id.
pub fn finalize(draft: RuleDraft) -> NewRule {
    let severity = severity_of(draft.kind, draft.category);
    NewRule {
        kind: draft.kind,
        category: draft.category,
        program_id: draft.program_id.unwrap_or_else(|| "general".to_string()),
        value: draft.value,
        description: draft.description,
        raw_context: draft.raw_context,
        severity,
        method: draft.method,
        confidence: draft.confidence,
    }
}
