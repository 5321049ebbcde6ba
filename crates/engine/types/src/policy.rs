//! Policy types
//!
//! A policy applies to every release target matched by at least one of its
//! targets, and gates candidate versions through its rules in declared order.
//! Bypasses and skips are operator overrides scoped to a set of targets.

use crate::ids::{
    BypassId, DeploymentId, EnvironmentId, PolicyId, PolicyTargetId, ResourceId, RuleId, SkipId,
    VersionId,
};
use crate::release::ReleaseTarget;
use crate::selector::Selector;
use crate::TypesError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A policy: targets plus an ordered list of rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: PolicyId,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub targets: Vec<PolicyTarget>,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

fn default_enabled() -> bool {
    true
}

impl Policy {
    pub fn new(id: impl Into<PolicyId>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            enabled: true,
            targets: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: PolicyTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn validate(&self) -> Result<(), TypesError> {
        for target in &self.targets {
            for selector in target.selectors().into_iter().flatten() {
                selector.validate()?;
            }
        }
        for rule in &self.rules {
            rule.validate()?;
        }
        Ok(())
    }
}

/// Triple selector picking the release targets a policy applies to
///
/// An absent selector matches every entity of its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTarget {
    pub id: PolicyTargetId,
    #[serde(default)]
    pub deployment_selector: Option<Selector>,
    #[serde(default)]
    pub environment_selector: Option<Selector>,
    #[serde(default)]
    pub resource_selector: Option<Selector>,
}

impl PolicyTarget {
    pub fn new(id: impl Into<PolicyTargetId>) -> Self {
        Self {
            id: id.into(),
            deployment_selector: None,
            environment_selector: None,
            resource_selector: None,
        }
    }

    pub fn with_deployments(mut self, selector: Selector) -> Self {
        self.deployment_selector = Some(selector);
        self
    }

    pub fn with_environments(mut self, selector: Selector) -> Self {
        self.environment_selector = Some(selector);
        self
    }

    pub fn with_resources(mut self, selector: Selector) -> Self {
        self.resource_selector = Some(selector);
        self
    }

    fn selectors(&self) -> [Option<&Selector>; 3] {
        [
            self.deployment_selector.as_ref(),
            self.environment_selector.as_ref(),
            self.resource_selector.as_ref(),
        ]
    }
}

/// A single admission rule inside a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: RuleId,
    #[serde(flatten)]
    pub kind: RuleKind,
}

impl PolicyRule {
    pub fn new(id: impl Into<RuleId>, kind: RuleKind) -> Self {
        Self { id: id.into(), kind }
    }

    pub fn validate(&self) -> Result<(), TypesError> {
        match &self.kind {
            RuleKind::EnvironmentVersionRollout(rule) => rule.validate(&self.id),
            RuleKind::TimeWindow(rule) => {
                if rule.rrule.trim().is_empty() {
                    return Err(TypesError::Validation(format!(
                        "rule {}: recurrence rule must not be empty",
                        self.id
                    )));
                }
                if rule.duration_secs <= 0 {
                    return Err(TypesError::Validation(format!(
                        "rule {}: window duration must be positive",
                        self.id
                    )));
                }
                Ok(())
            }
            RuleKind::AnyApproval(rule) => {
                if rule.min_approvals == 0 {
                    return Err(TypesError::Validation(format!(
                        "rule {}: minApprovals must be at least 1",
                        self.id
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Rule variants, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleKind {
    EnvironmentVersionRollout(RolloutRule),
    TimeWindow(TimeWindowRule),
    AnyApproval(ApprovalRule),
}

impl RuleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::EnvironmentVersionRollout(_) => "environmentVersionRollout",
            RuleKind::TimeWindow(_) => "timeWindow",
            RuleKind::AnyApproval(_) => "anyApproval",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RolloutType {
    Linear,
    Exponential,
}

/// Staggers a version across environments over time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutRule {
    pub rollout_type: RolloutType,
    #[serde(default = "default_growth")]
    pub position_growth_factor: f64,
    /// Seconds
    pub time_scale_interval: i64,
}

fn default_growth() -> f64 {
    1.0
}

impl RolloutRule {
    fn validate(&self, id: &RuleId) -> Result<(), TypesError> {
        if !(self.position_growth_factor >= 1.0) {
            return Err(TypesError::Validation(format!(
                "rule {id}: positionGrowthFactor must be >= 1"
            )));
        }
        if self.time_scale_interval <= 0 {
            return Err(TypesError::Validation(format!(
                "rule {id}: timeScaleInterval must be > 0"
            )));
        }
        Ok(())
    }
}

/// Admits only inside recurring windows, e.g. weekday business hours
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindowRule {
    /// iCalendar recurrence, e.g. `DTSTART:20240101T090000Z\nRRULE:FREQ=DAILY`
    pub rrule: String,
    pub duration_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRule {
    pub min_approvals: u32,
}

/// Half-open window `[start, end)`; no end means open-ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && self.end.map_or(true, |end| at < end)
    }
}

/// Which release targets an override covers
///
/// Every absent id is a wildcard; all-absent covers the whole workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideScope {
    #[serde(default)]
    pub deployment_id: Option<DeploymentId>,
    #[serde(default)]
    pub environment_id: Option<EnvironmentId>,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
}

impl OverrideScope {
    pub fn target(target: &ReleaseTarget) -> Self {
        Self {
            deployment_id: Some(target.deployment_id.clone()),
            environment_id: Some(target.environment_id.clone()),
            resource_id: Some(target.resource_id.clone()),
        }
    }

    pub fn covers(&self, target: &ReleaseTarget) -> bool {
        self.deployment_id.as_ref().map_or(true, |d| *d == target.deployment_id)
            && self.environment_id.as_ref().map_or(true, |e| *e == target.environment_id)
            && self.resource_id.as_ref().map_or(true, |r| *r == target.resource_id)
    }
}

/// Admits everything in scope while the window is open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyBypass {
    pub id: BypassId,
    #[serde(default)]
    pub scope: OverrideScope,
    pub window: TimeWindow,
    #[serde(default)]
    pub reason: String,
}

impl PolicyBypass {
    pub fn applies(&self, target: &ReleaseTarget, now: DateTime<Utc>) -> bool {
        self.scope.covers(target) && self.window.contains(now)
    }
}

/// Exempts targets in scope from one rule (or all of them)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySkip {
    pub id: SkipId,
    #[serde(default)]
    pub scope: OverrideScope,
    #[serde(default)]
    pub rule_id: Option<RuleId>,
    #[serde(default)]
    pub version_id: Option<VersionId>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: String,
}

impl PolicySkip {
    pub fn applies(
        &self,
        target: &ReleaseTarget,
        version_id: &VersionId,
        rule_id: &RuleId,
        now: DateTime<Utc>,
    ) -> bool {
        self.scope.covers(target)
            && self.version_id.as_ref().map_or(true, |v| v == version_id)
            && self.rule_id.as_ref().map_or(true, |r| r == rule_id)
            && self.expires_at.map_or(true, |exp| now < exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn target() -> ReleaseTarget {
        ReleaseTarget::new("d1", "e1", "r1")
    }

    #[test]
    fn test_rule_is_flattened_with_type_tag() {
        let raw = json!({
            "id": "rule-1",
            "type": "environmentVersionRollout",
            "rolloutType": "linear",
            "positionGrowthFactor": 1.0,
            "timeScaleInterval": 60
        });
        let rule: PolicyRule = serde_json::from_value(raw).unwrap();
        assert_eq!(rule.kind.name(), "environmentVersionRollout");
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_rollout_validation() {
        let rule = PolicyRule::new(
            "r",
            RuleKind::EnvironmentVersionRollout(RolloutRule {
                rollout_type: RolloutType::Exponential,
                position_growth_factor: 0.5,
                time_scale_interval: 60,
            }),
        );
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_scope_wildcards() {
        let everything = OverrideScope::default();
        assert!(everything.covers(&target()));

        let env_only = OverrideScope {
            environment_id: Some("e2".into()),
            ..Default::default()
        };
        assert!(!env_only.covers(&target()));
        assert!(OverrideScope::target(&target()).covers(&target()));
    }

    #[test]
    fn test_bypass_window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bypass = PolicyBypass {
            id: "b1".into(),
            scope: OverrideScope::default(),
            window: TimeWindow {
                start,
                end: Some(start + chrono::Duration::hours(1)),
            },
            reason: String::new(),
        };
        assert!(bypass.applies(&target(), start));
        assert!(!bypass.applies(&target(), start + chrono::Duration::hours(1)));
    }

    #[test]
    fn test_skip_narrowing() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let skip = PolicySkip {
            id: "s1".into(),
            scope: OverrideScope::default(),
            rule_id: Some("rule-a".into()),
            version_id: None,
            expires_at: Some(now + chrono::Duration::minutes(5)),
            reason: String::new(),
        };
        let v = VersionId::new("v1");
        assert!(skip.applies(&target(), &v, &"rule-a".into(), now));
        assert!(!skip.applies(&target(), &v, &"rule-b".into(), now));
        assert!(!skip.applies(&target(), &v, &"rule-a".into(), now + chrono::Duration::minutes(5)));
    }
}
