use super::RuleEvaluator;
use crate::context::EvaluationContext;
use crate::decision::PolicyDecision;
use crate::error::{PolicyError, Result};
use chrono::{DateTime, Duration, Utc};
use engine_types::{RolloutRule, RolloutType};

/// Longest offset a rollout may impose, in seconds (~100 years)
const MAX_OFFSET_SECS: f64 = 3_155_760_000.0;

/// Instant at which `position` is admitted for a version created at `created_at`
///
/// Linear: `created_at + k * interval`.
/// Exponential: `created_at + interval * growth^k`.
pub fn rollout_admission_time(
    rule: &RolloutRule,
    created_at: DateTime<Utc>,
    position: u32,
) -> Result<DateTime<Utc>> {
    let interval = rule.time_scale_interval as f64;
    let k = f64::from(position);
    let offset = match rule.rollout_type {
        RolloutType::Linear => k * interval,
        RolloutType::Exponential => interval * rule.position_growth_factor.powf(k),
    };
    if !offset.is_finite() || offset < 0.0 || offset > MAX_OFFSET_SECS {
        return Err(PolicyError::EvaluationFailed {
            reason: format!("rollout offset for position {position} is out of range"),
        });
    }
    Ok(created_at + Duration::milliseconds((offset * 1000.0).round() as i64))
}

impl RuleEvaluator for RolloutRule {
    fn evaluate(&self, ctx: &EvaluationContext) -> Result<PolicyDecision> {
        let position = ctx.rollout_position.ok_or_else(|| PolicyError::MissingData {
            what: format!(
                "rollout position of environment {}",
                ctx.release_target.environment_id
            ),
        })?;
        let admitted_at = rollout_admission_time(self, ctx.version.created_at, position)?;

        if ctx.now < admitted_at {
            return Ok(PolicyDecision::defer(admitted_at));
        }
        Ok(PolicyDecision::allow(format!(
            "rollout position {position} admitted at {}",
            admitted_at.to_rfc3339()
        )))
    }
}
