use super::RuleEvaluator;
use crate::context::EvaluationContext;
use crate::decision::PolicyDecision;
use crate::error::Result;
use crate::recurrence::{Recurrence, WindowState};
use chrono::Duration;
use engine_types::TimeWindowRule;

impl RuleEvaluator for TimeWindowRule {
    fn evaluate(&self, ctx: &EvaluationContext) -> Result<PolicyDecision> {
        let recurrence: Recurrence = self.rrule.parse()?;
        let duration = Duration::seconds(self.duration_secs.max(0));

        Ok(match recurrence.window_at(ctx.now, duration)? {
            WindowState::Open { closes } => PolicyDecision::allow(format!(
                "inside deployment window until {}",
                closes.to_rfc3339()
            )),
            WindowState::Upcoming { opens } => PolicyDecision::defer(opens),
            WindowState::Exhausted => PolicyDecision::deny("no further deployment windows"),
        })
    }
}
