//! Selector index
//!
//! Keeps the many-to-many links between selector owners (deployments,
//! environments, policy targets) and the entities their selectors match, in
//! both directions, so neither "which resources does this deployment claim"
//! nor "which deployments claim this resource" needs a scan.
//!
//! Updates are incremental: an entity change re-evaluates every registered
//! selector against that one entity; a selector change re-evaluates that one
//! selector against every entity of the matched kind.

use engine_types::{
    DeploymentId, EnvironmentId, PolicyId, PolicyTargetId, ResourceId, Selectable, Selector,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Membership delta produced by an index update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDiff<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
}

impl<T> LinkDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl<T> Default for LinkDiff<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// Links for one `(owner kind, entity kind)` pair
#[derive(Debug)]
pub struct SelectorTable<O, E> {
    name: &'static str,
    /// Whether an owner without a selector matches everything or nothing
    absent_matches_all: bool,
    selectors: BTreeMap<O, Option<Selector>>,
    forward: BTreeMap<O, BTreeSet<E>>,
    reverse: BTreeMap<E, BTreeSet<O>>,
}

impl<O, E> SelectorTable<O, E>
where
    O: Ord + Clone + fmt::Display,
    E: Ord + Clone + fmt::Display,
{
    pub fn new(name: &'static str, absent_matches_all: bool) -> Self {
        Self {
            name,
            absent_matches_all,
            selectors: BTreeMap::new(),
            forward: BTreeMap::new(),
            reverse: BTreeMap::new(),
        }
    }

    fn evaluate(&self, owner: &O, selector: Option<&Selector>, id: &E, entity: &dyn Selectable) -> bool {
        let Some(selector) = selector else {
            return self.absent_matches_all;
        };
        match selector.evaluate(entity) {
            Ok(matched) => matched,
            Err(err) => {
                tracing::warn!(
                    table = self.name,
                    owner = %owner,
                    entity = %id,
                    error = %err,
                    "Selector evaluation failed, treating as no match"
                );
                false
            }
        }
    }

    /// Register or replace an owner's selector and re-evaluate it against
    /// every entity
    pub fn upsert_selector<'a, S>(
        &mut self,
        owner: O,
        selector: Option<Selector>,
        entities: impl IntoIterator<Item = (&'a E, &'a S)>,
    ) -> LinkDiff<E>
    where
        E: 'a,
        S: Selectable + 'a,
    {
        let next: BTreeSet<E> = entities
            .into_iter()
            .filter(|(id, entity)| self.evaluate(&owner, selector.as_ref(), id, *entity))
            .map(|(id, _)| id.clone())
            .collect();
        let previous = self.forward.remove(&owner).unwrap_or_default();

        let diff = LinkDiff {
            added: next.difference(&previous).cloned().collect(),
            removed: previous.difference(&next).cloned().collect(),
        };
        for id in &diff.removed {
            self.unlink_reverse(id, &owner);
        }
        for id in &diff.added {
            self.reverse.entry(id.clone()).or_default().insert(owner.clone());
        }

        self.forward.insert(owner.clone(), next);
        self.selectors.insert(owner, selector);
        diff
    }

    /// Drop an owner and all its links; returns the entities it matched
    pub fn remove_selector(&mut self, owner: &O) -> Vec<E> {
        self.selectors.remove(owner);
        let matched = self.forward.remove(owner).unwrap_or_default();
        for id in &matched {
            self.unlink_reverse(id, owner);
        }
        matched.into_iter().collect()
    }

    /// Re-evaluate every registered selector against one entity
    pub fn upsert_entity(&mut self, id: &E, entity: &dyn Selectable) -> LinkDiff<O> {
        let mut diff = LinkDiff::default();
        for (owner, selector) in &self.selectors {
            let matched = self.evaluate(owner, selector.as_ref(), id, entity);
            let linked = self.forward.get(owner).is_some_and(|set| set.contains(id));
            match (matched, linked) {
                (true, false) => diff.added.push(owner.clone()),
                (false, true) => diff.removed.push(owner.clone()),
                _ => {}
            }
        }

        for owner in &diff.added {
            self.forward.entry(owner.clone()).or_default().insert(id.clone());
            self.reverse.entry(id.clone()).or_default().insert(owner.clone());
        }
        for owner in &diff.removed {
            if let Some(set) = self.forward.get_mut(owner) {
                set.remove(id);
            }
            self.unlink_reverse(id, owner);
        }
        diff
    }

    /// Drop an entity and all its links; returns the owners that matched it
    pub fn remove_entity(&mut self, id: &E) -> Vec<O> {
        let owners = self.reverse.remove(id).unwrap_or_default();
        for owner in &owners {
            if let Some(set) = self.forward.get_mut(owner) {
                set.remove(id);
            }
        }
        owners.into_iter().collect()
    }

    fn unlink_reverse(&mut self, id: &E, owner: &O) {
        if let Some(owners) = self.reverse.get_mut(id) {
            owners.remove(owner);
            if owners.is_empty() {
                self.reverse.remove(id);
            }
        }
    }

    pub fn matches_of(&self, owner: &O) -> BTreeSet<E> {
        self.forward.get(owner).cloned().unwrap_or_default()
    }

    pub fn owners_of(&self, id: &E) -> BTreeSet<O> {
        self.reverse.get(id).cloned().unwrap_or_default()
    }

    pub fn is_linked(&self, owner: &O, id: &E) -> bool {
        self.forward.get(owner).is_some_and(|set| set.contains(id))
    }

    pub fn owner_count(&self) -> usize {
        self.selectors.len()
    }

    /// Check forward and reverse maps mirror each other
    pub fn is_consistent(&self) -> bool {
        let forward_links: usize = self.forward.values().map(BTreeSet::len).sum();
        let reverse_links: usize = self.reverse.values().map(BTreeSet::len).sum();
        forward_links == reverse_links
            && self.forward.iter().all(|(owner, ids)| {
                ids.iter()
                    .all(|id| self.reverse.get(id).is_some_and(|o| o.contains(owner)))
            })
    }
}

/// Identity of one target inside one policy
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetKey {
    pub policy_id: PolicyId,
    pub target_id: PolicyTargetId,
}

impl fmt::Display for PolicyTargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.policy_id, self.target_id)
    }
}

/// All selector tables of a workspace
#[derive(Debug)]
pub struct SelectorIndex {
    pub deployment_resources: SelectorTable<DeploymentId, ResourceId>,
    pub environment_resources: SelectorTable<EnvironmentId, ResourceId>,
    pub policy_resources: SelectorTable<PolicyTargetKey, ResourceId>,
    pub policy_deployments: SelectorTable<PolicyTargetKey, DeploymentId>,
    pub policy_environments: SelectorTable<PolicyTargetKey, EnvironmentId>,
}

impl Default for SelectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectorIndex {
    pub fn new() -> Self {
        Self {
            // A deployment or environment without a selector claims nothing
            deployment_resources: SelectorTable::new("deployment-resource", false),
            environment_resources: SelectorTable::new("environment-resource", false),
            // A policy target without a selector places no constraint
            policy_resources: SelectorTable::new("policy-resource", true),
            policy_deployments: SelectorTable::new("policy-deployment", true),
            policy_environments: SelectorTable::new("policy-environment", true),
        }
    }

    /// Policies with at least one target whose three selectors all match
    pub fn applicable_policies(
        &self,
        deployment_id: &DeploymentId,
        environment_id: &EnvironmentId,
        resource_id: &ResourceId,
    ) -> BTreeSet<PolicyId> {
        let by_deployment = self.policy_deployments.owners_of(deployment_id);
        let by_environment = self.policy_environments.owners_of(environment_id);
        self.policy_resources
            .owners_of(resource_id)
            .into_iter()
            .filter(|key| by_deployment.contains(key) && by_environment.contains(key))
            .map(|key| key.policy_id)
            .collect()
    }

    pub fn is_consistent(&self) -> bool {
        self.deployment_resources.is_consistent()
            && self.environment_resources.is_consistent()
            && self.policy_resources.is_consistent()
            && self.policy_deployments.is_consistent()
            && self.policy_environments.is_consistent()
    }
}
