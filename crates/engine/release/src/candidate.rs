//! Candidate selection
//!
//! Walks the target's deployment versions newest first and returns the first
//! one the policy pipeline admits. The walk stops at the deployed version
//! (older versions would be rollbacks); a redeploy lets the deployed version
//! itself re-enter the pipeline.

use chrono::{DateTime, Utc};
use engine_policy::{evaluate, EvaluationContext, EvaluationReport};
use engine_store::EntityStore;
use engine_types::{DeploymentVersion, ReleaseTarget, VersionId};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Admitted by every applicable rule
    Chosen {
        version: DeploymentVersion,
        report: EvaluationReport,
    },

    /// Nothing admitted yet; the earliest deferral
    Deferred { until: DateTime<Utc> },

    /// Every candidate was denied; the first denial
    Denied { reason: String },

    /// The deployed version is the newest eligible one
    UpToDate,

    /// The deployment has no versions
    NoVersions,
}

/// Position of the target's environment in the deployment's rollout order
///
/// Environments that currently hold a release target for the same
/// deployment, ordered by id; the first is position 0.
pub fn rollout_position(store: &EntityStore, target: &ReleaseTarget) -> Option<u32> {
    let environments: BTreeSet<_> = store
        .release_targets_for_deployment(&target.deployment_id)
        .into_iter()
        .map(|t| t.environment_id)
        .collect();
    environments
        .iter()
        .position(|e| *e == target.environment_id)
        .map(|p| p as u32)
}

/// Gather everything the pipeline needs to judge `version` for `target`
pub fn evaluation_context(
    store: &EntityStore,
    target: &ReleaseTarget,
    version: &DeploymentVersion,
    now: DateTime<Utc>,
) -> EvaluationContext {
    let mut ctx = EvaluationContext::new(target.clone(), version.clone(), now)
        .with_approvers(store.approvers(&version.id, &target.environment_id))
        .with_bypasses(store.bypasses_for(target))
        .with_skips(store.skips_for(target));
    if let Some(position) = rollout_position(store, target) {
        ctx = ctx.with_rollout_position(position);
    }
    ctx
}

pub fn select_candidate(
    store: &EntityStore,
    target: &ReleaseTarget,
    deployed: Option<&VersionId>,
    redeploy: bool,
    now: DateTime<Utc>,
) -> Selection {
    let candidates = store.candidate_versions(&target.deployment_id);
    if candidates.is_empty() {
        return Selection::NoVersions;
    }
    let policies = store.applicable_policies(target);

    let mut earliest_deferral: Option<DateTime<Utc>> = None;
    let mut first_denial: Option<String> = None;

    for version in candidates {
        let is_deployed = deployed == Some(&version.id);
        if is_deployed && !redeploy {
            break;
        }

        let ctx = evaluation_context(store, target, &version, now);
        let report = evaluate(&policies, &ctx);
        debug!(
            release_target = %target,
            version_id = %version.id,
            decision = %report.decision,
            "Candidate evaluated"
        );

        if report.admits() {
            return Selection::Chosen { version, report };
        }
        if let Some(until) = report.decision.deferred_until() {
            earliest_deferral = Some(earliest_deferral.map_or(until, |e| e.min(until)));
        } else if first_denial.is_none() {
            first_denial = Some(format!("{}: {}", version.id, report.decision));
        }

        if is_deployed {
            break;
        }
    }

    match (earliest_deferral, first_denial) {
        (Some(until), _) => Selection::Deferred { until },
        (None, Some(reason)) => Selection::Denied { reason },
        (None, None) => Selection::UpToDate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use engine_store::ChangeSet;
    use engine_types::{
        ApprovalRecord, ApprovalRule, Condition, Deployment, Environment, Policy, PolicyRule,
        PolicyTarget, Resource, RuleKind, Selector,
    };

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn store() -> EntityStore {
        let store = EntityStore::default();
        let mut cs = ChangeSet::new(t0());
        store.upsert_resource(&mut cs, Resource::new("r1", "service")).unwrap();
        store
            .upsert_deployment(
                &mut cs,
                Deployment::new("d1", "s1").with_selector(Selector::json(Condition::eq("kind", "service"))),
            )
            .unwrap();
        for env in ["e0", "e1", "e2"] {
            store
                .upsert_environment(&mut cs, Environment::new(env, "s1").with_selector(Selector::All))
                .unwrap();
        }
        store
            .upsert_deployment_version(&mut cs, DeploymentVersion::new("v1", "d1", t0()))
            .unwrap();
        store
            .upsert_deployment_version(
                &mut cs,
                DeploymentVersion::new("v2", "d1", t0() + Duration::seconds(10)),
            )
            .unwrap();
        store
    }

    fn target() -> ReleaseTarget {
        ReleaseTarget::new("d1", "e2", "r1")
    }

    #[test]
    fn test_rollout_position_is_lexicographic() {
        let store = store();
        assert_eq!(rollout_position(&store, &ReleaseTarget::new("d1", "e0", "r1")), Some(0));
        assert_eq!(rollout_position(&store, &target()), Some(2));
        assert_eq!(rollout_position(&store, &ReleaseTarget::new("d1", "e9", "r1")), None);
    }

    #[test]
    fn test_newest_version_chosen_without_policies() {
        let store = store();
        match select_candidate(&store, &target(), None, false, t0()) {
            Selection::Chosen { version, .. } => assert_eq!(version.id, VersionId::new("v2")),
            other => panic!("unexpected selection {other:?}"),
        }
    }

    #[test]
    fn test_walk_stops_at_deployed_version() {
        let store = store();
        let deployed = VersionId::new("v2");
        assert_eq!(
            select_candidate(&store, &target(), Some(&deployed), false, t0()),
            Selection::UpToDate
        );
        match select_candidate(&store, &target(), Some(&deployed), true, t0()) {
            Selection::Chosen { version, .. } => assert_eq!(version.id, deployed),
            other => panic!("unexpected selection {other:?}"),
        }
    }

    #[test]
    fn test_denied_newest_falls_back_to_older_candidate() {
        let store = store();
        let mut cs = ChangeSet::new(t0());
        store
            .upsert_policy(
                &mut cs,
                Policy::new("p1")
                    .with_target(PolicyTarget::new("t1"))
                    .with_rule(PolicyRule::new("approve", RuleKind::AnyApproval(ApprovalRule { min_approvals: 1 }))),
            )
            .unwrap();
        store
            .upsert_approval(
                &mut cs,
                ApprovalRecord {
                    id: "a1".into(),
                    version_id: VersionId::new("v1"),
                    environment_id: "e2".into(),
                    approver: "alice".into(),
                    created_at: t0(),
                },
            )
            .unwrap();

        match select_candidate(&store, &target(), None, false, t0()) {
            Selection::Chosen { version, .. } => assert_eq!(version.id, VersionId::new("v1")),
            other => panic!("unexpected selection {other:?}"),
        }
        assert!(matches!(
            select_candidate(&store, &ReleaseTarget::new("d1", "e0", "r1"), None, false, t0()),
            Selection::Denied { .. }
        ));
    }

    #[test]
    fn test_no_versions() {
        let store = store();
        assert_eq!(
            select_candidate(&store, &ReleaseTarget::new("d9", "e0", "r1"), None, false, t0()),
            Selection::NoVersions
        );
    }
}
