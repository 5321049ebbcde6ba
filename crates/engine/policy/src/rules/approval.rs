use super::RuleEvaluator;
use crate::context::EvaluationContext;
use crate::decision::PolicyDecision;
use crate::error::Result;
use engine_types::ApprovalRule;

impl RuleEvaluator for ApprovalRule {
    fn evaluate(&self, ctx: &EvaluationContext) -> Result<PolicyDecision> {
        let approvals = ctx.approvers.len();
        let required = self.min_approvals as usize;
        if approvals >= required {
            Ok(PolicyDecision::allow(format!(
                "approved by {approvals} of {required} required"
            )))
        } else {
            Ok(PolicyDecision::deny(format!(
                "awaiting approval: {approvals} of {required} required"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use engine_types::{DeploymentVersion, ReleaseTarget};
    use std::collections::BTreeSet;

    #[test]
    fn test_counts_distinct_approvers() {
        let ctx = EvaluationContext::new(
            ReleaseTarget::new("d1", "e1", "r1"),
            DeploymentVersion::new("v1", "d1", DateTime::<Utc>::default()),
            DateTime::<Utc>::default(),
        );
        let rule = ApprovalRule { min_approvals: 2 };
        assert!(rule.evaluate(&ctx).unwrap().is_denied());

        let approved = ctx.with_approvers(BTreeSet::from(["alice".to_string(), "bob".to_string()]));
        assert!(rule.evaluate(&approved).unwrap().is_allowed());
    }
}
