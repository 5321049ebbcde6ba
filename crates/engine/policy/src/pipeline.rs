//! The policy pipeline
//!
//! Combines every rule of every applicable policy into one decision:
//!
//! 1. an applicable bypass whose window covers `now` admits immediately;
//! 2. a rule matched by an applicable skip is `Skipped` instead of evaluated;
//! 3. any `Denied` denies (the first denial's reason is reported);
//! 4. otherwise any `Deferred` defers to the latest requested instant;
//! 5. otherwise the reason of the last `Allowed` rule is reported;
//! 6. rules that were all skipped yield `Skipped`, which admits.

use crate::context::EvaluationContext;
use crate::decision::{EvaluationReport, PolicyDecision, RuleOutcome};
use crate::rules::evaluate_rule;
use engine_types::Policy;
use tracing::{debug, instrument};

/// Evaluate the union of `policies` for one candidate
#[instrument(
    skip_all,
    fields(
        release_target = %ctx.release_target,
        version_id = %ctx.version.id,
        policies = policies.len()
    )
)]
pub fn evaluate(policies: &[Policy], ctx: &EvaluationContext) -> EvaluationReport {
    if let Some(bypass) = ctx
        .bypasses
        .iter()
        .find(|b| b.applies(&ctx.release_target, ctx.now))
    {
        debug!(bypass_id = %bypass.id, "Bypass window open, admitting");
        return EvaluationReport {
            decision: PolicyDecision::allow(format!("bypass:{}", bypass.id)),
            outcomes: Vec::new(),
        };
    }

    let mut outcomes = Vec::new();
    for policy in policies {
        for rule in &policy.rules {
            let skip = ctx.skips.iter().find(|s| {
                s.applies(&ctx.release_target, &ctx.version.id, &rule.id, ctx.now)
            });
            let decision = match skip {
                Some(skip) => PolicyDecision::skip(format!("skip:{}", skip.id)),
                None => evaluate_rule(rule, ctx),
            };
            debug!(
                policy_id = %policy.id,
                rule_id = %rule.id,
                decision = %decision,
                "Rule evaluated"
            );
            outcomes.push(RuleOutcome {
                policy_id: policy.id.clone(),
                rule_id: rule.id.clone(),
                decision,
            });
        }
    }

    EvaluationReport {
        decision: combine(&outcomes),
        outcomes,
    }
}

fn combine(outcomes: &[RuleOutcome]) -> PolicyDecision {
    if let Some(denied) = outcomes.iter().find(|o| o.decision.is_denied()) {
        return denied.decision.clone();
    }
    if let Some(until) = outcomes
        .iter()
        .filter_map(|o| o.decision.deferred_until())
        .max()
    {
        return PolicyDecision::defer(until);
    }
    if let Some(allowed) = outcomes.iter().rev().find(|o| o.decision.is_allowed()) {
        return allowed.decision.clone();
    }
    if outcomes.is_empty() {
        PolicyDecision::allow("no applicable rules")
    } else {
        PolicyDecision::skip("all rules skipped")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use engine_types::{
        ApprovalRule, DeploymentVersion, OverrideScope, PolicyBypass, PolicyRule, PolicySkip,
        ReleaseTarget, RolloutRule, RolloutType, RuleKind, TimeWindow, TimeWindowRule,
    };

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn ctx(offset_secs: i64) -> EvaluationContext {
        EvaluationContext::new(
            ReleaseTarget::new("d1", "e1", "r1"),
            DeploymentVersion::new("v1", "d1", t0()),
            t0() + Duration::seconds(offset_secs),
        )
        .with_rollout_position(2)
    }

    fn rollout(id: &str) -> PolicyRule {
        PolicyRule::new(
            id,
            RuleKind::EnvironmentVersionRollout(RolloutRule {
                rollout_type: RolloutType::Linear,
                position_growth_factor: 1.0,
                time_scale_interval: 60,
            }),
        )
    }

    fn approval(id: &str) -> PolicyRule {
        PolicyRule::new(id, RuleKind::AnyApproval(ApprovalRule { min_approvals: 1 }))
    }

    #[test]
    fn test_no_policies_allows() {
        let report = evaluate(&[], &ctx(0));
        assert!(report.admits());
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn test_deny_wins_regardless_of_order() {
        let allow = Policy::new("p-allow").with_rule(rollout("late"));
        let deny = Policy::new("p-deny").with_rule(approval("needs-approval"));

        let a = evaluate(&[allow.clone(), deny.clone()], &ctx(500));
        let b = evaluate(&[deny, allow], &ctx(500));
        assert!(a.decision.is_denied());
        assert_eq!(a.decision, b.decision);
    }

    #[test]
    fn test_last_allowed_reason_is_reported() {
        let mut approved = ctx(500);
        approved.approvers.insert("alice".into());
        let policy = Policy::new("p").with_rule(rollout("first")).with_rule(approval("second"));

        let report = evaluate(&[policy], &approved);
        assert_eq!(report.decision, report.outcomes[1].decision);
    }

    #[test]
    fn test_deferred_when_nothing_denies() {
        let policy = Policy::new("p").with_rule(rollout("r"));
        let report = evaluate(&[policy], &ctx(30));
        assert_eq!(report.decision, PolicyDecision::defer(t0() + Duration::seconds(120)));
    }

    #[test]
    fn test_zoned_time_window_denies() {
        let window = PolicyRule::new(
            "w",
            RuleKind::TimeWindow(TimeWindowRule {
                rrule: "DTSTART;TZID=America/New_York:20240101T090000\nRRULE:FREQ=DAILY".into(),
                duration_secs: 3600,
            }),
        );
        let report = evaluate(&[Policy::new("p").with_rule(window)], &ctx(0));
        assert!(report.decision.is_denied());
        assert!(!report.admits());
    }

    #[test]
    fn test_bypass_short_circuits() {
        let policy = Policy::new("p").with_rule(rollout("r"));
        let bypass = PolicyBypass {
            id: "b1".into(),
            scope: OverrideScope::default(),
            window: TimeWindow { start: t0(), end: None },
            reason: "hotfix".into(),
        };
        let report = evaluate(&[policy], &ctx(30).with_bypasses(vec![bypass]));
        assert_eq!(report.decision, PolicyDecision::allow("bypass:b1"));
    }

    #[test]
    fn test_skips_exempt_matching_rules() {
        let policy = Policy::new("p").with_rule(approval("a"));
        let skip = PolicySkip {
            id: "s1".into(),
            scope: OverrideScope::default(),
            rule_id: Some("a".into()),
            version_id: None,
            expires_at: None,
            reason: String::new(),
        };
        let report = evaluate(&[policy], &ctx(0).with_skips(vec![skip]));
        assert!(report.decision.is_skipped());
        assert!(report.admits());
    }
}
