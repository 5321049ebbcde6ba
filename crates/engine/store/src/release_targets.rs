//! Release-target derivation
//!
//! `RT = { (d, e, r) : d.system = e.system, r ∈ match(d), r ∈ match(e) }`
//!
//! The set is maintained per resource: whenever a resource, or a selector or
//! system assignment that could affect it, changes, that resource's targets
//! are recomputed from the selector index and diffed against what was held.
//!
//! Each target also carries a [`TargetGeneration`]. It is advanced only by
//! events (a revival or a redeploy command), never by reconciliation timing,
//! so a replay derives the same job ids as the original run.

use crate::index::SelectorIndex;
use engine_types::{
    Deployment, DeploymentId, Environment, EnvironmentId, ReleaseTarget, Resource, ResourceId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Event-driven counters of one release target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGeneration {
    /// Times the target was created again after being destroyed
    pub incarnation: u64,
    /// Feeds job ids; bumped by every revival and every redeploy
    pub generation: u64,
}

/// Targets created and destroyed by one recompute
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetDiff {
    pub created: Vec<ReleaseTarget>,
    pub destroyed: Vec<ReleaseTarget>,
}

impl TargetDiff {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.destroyed.is_empty()
    }

    pub fn extend(&mut self, other: TargetDiff) {
        self.created.extend(other.created);
        self.destroyed.extend(other.destroyed);
    }
}

/// The derived release-target set, grouped by resource
#[derive(Debug, Default)]
pub struct ReleaseTargetSet {
    by_resource: BTreeMap<ResourceId, BTreeSet<ReleaseTarget>>,
    /// Outlives destruction so a revived target moves on to a new generation
    generations: BTreeMap<ReleaseTarget, TargetGeneration>,
}

impl ReleaseTargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the targets held for `resource_id`, returning the delta
    pub fn replace_for_resource(
        &mut self,
        resource_id: &ResourceId,
        next: BTreeSet<ReleaseTarget>,
    ) -> TargetDiff {
        let previous = if next.is_empty() {
            self.by_resource.remove(resource_id).unwrap_or_default()
        } else {
            self.by_resource
                .insert(resource_id.clone(), next.clone())
                .unwrap_or_default()
        };
        let diff = TargetDiff {
            created: next.difference(&previous).cloned().collect(),
            destroyed: previous.difference(&next).cloned().collect(),
        };
        for target in &diff.created {
            self.generations
                .entry(target.clone())
                .and_modify(|g| {
                    g.incarnation += 1;
                    g.generation += 1;
                })
                .or_default();
        }
        diff
    }

    /// Counters of a live target
    pub fn generation(&self, target: &ReleaseTarget) -> Option<TargetGeneration> {
        if !self.contains(target) {
            return None;
        }
        self.generations.get(target).copied()
    }

    /// Advance a live target's generation for a redeploy command
    pub fn bump_generation(&mut self, target: &ReleaseTarget) -> Option<u64> {
        if !self.contains(target) {
            return None;
        }
        let g = self.generations.entry(target.clone()).or_default();
        g.generation += 1;
        Some(g.generation)
    }

    pub fn contains(&self, target: &ReleaseTarget) -> bool {
        self.by_resource
            .get(&target.resource_id)
            .is_some_and(|set| set.contains(target))
    }

    pub fn all(&self) -> BTreeSet<ReleaseTarget> {
        self.by_resource.values().flatten().cloned().collect()
    }

    pub fn for_deployment(&self, deployment_id: &DeploymentId) -> Vec<ReleaseTarget> {
        self.by_resource
            .values()
            .flatten()
            .filter(|t| t.deployment_id == *deployment_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_resource.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_resource.is_empty()
    }
}

/// Targets of one resource, read from the index links
pub fn derive_for_resource(
    resource_id: &ResourceId,
    index: &SelectorIndex,
    deployments: &BTreeMap<DeploymentId, Deployment>,
    environments: &BTreeMap<EnvironmentId, Environment>,
) -> BTreeSet<ReleaseTarget> {
    let claimed_by_environments = index.environment_resources.owners_of(resource_id);
    let mut targets = BTreeSet::new();

    for deployment_id in index.deployment_resources.owners_of(resource_id) {
        let Some(deployment) = deployments.get(&deployment_id) else {
            continue;
        };
        for environment_id in &claimed_by_environments {
            let Some(environment) = environments.get(environment_id) else {
                continue;
            };
            if deployment.system_id == environment.system_id {
                targets.insert(ReleaseTarget::new(
                    deployment_id.clone(),
                    environment_id.clone(),
                    resource_id.clone(),
                ));
            }
        }
    }
    targets
}

/// Brute-force derivation straight from the definition
pub fn derive_all(
    resources: &BTreeMap<ResourceId, Resource>,
    deployments: &BTreeMap<DeploymentId, Deployment>,
    environments: &BTreeMap<EnvironmentId, Environment>,
) -> BTreeSet<ReleaseTarget> {
    let mut targets = BTreeSet::new();
    for resource in resources.values() {
        for deployment in deployments.values() {
            if !claims(deployment.resource_selector.as_ref(), resource) {
                continue;
            }
            for environment in environments.values() {
                if deployment.system_id == environment.system_id
                    && claims(environment.resource_selector.as_ref(), resource)
                {
                    targets.insert(ReleaseTarget::new(
                        deployment.id.clone(),
                        environment.id.clone(),
                        resource.id.clone(),
                    ));
                }
            }
        }
    }
    targets
}

fn claims(selector: Option<&engine_types::Selector>, resource: &Resource) -> bool {
    selector.is_some_and(|s| s.evaluate(resource).unwrap_or(false))
}
