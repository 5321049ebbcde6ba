//! Rule evaluators
//!
//! One evaluator per rule kind. Evaluators are pure: the same rule and
//! context always produce the same decision.

mod approval;
mod rollout;
mod time_window;

pub use rollout::rollout_admission_time;

use crate::context::EvaluationContext;
use crate::decision::PolicyDecision;
use crate::error::Result;
use engine_types::{PolicyRule, RuleKind};

/// Evaluates one rule kind against a context
pub trait RuleEvaluator {
    fn evaluate(&self, ctx: &EvaluationContext) -> Result<PolicyDecision>;
}

/// Evaluate a rule; a rule that cannot be computed denies
pub fn evaluate_rule(rule: &PolicyRule, ctx: &EvaluationContext) -> PolicyDecision {
    let result = match &rule.kind {
        RuleKind::EnvironmentVersionRollout(r) => r.evaluate(ctx),
        RuleKind::TimeWindow(r) => r.evaluate(ctx),
        RuleKind::AnyApproval(r) => r.evaluate(ctx),
    };
    result.unwrap_or_else(|err| {
        tracing::warn!(
            rule_id = %rule.id,
            rule_type = rule.kind.name(),
            error = %err,
            "Rule evaluation failed, denying"
        );
        PolicyDecision::deny(format!("{} {}: {err}", rule.kind.name(), rule.id))
    })
}
