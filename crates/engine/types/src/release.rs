//! Release targets

use crate::ids::{DeploymentId, EnvironmentId, ResourceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(deployment, environment, resource)` triple eligible for jobs
///
/// Ordering is by deployment, then environment, then resource, which keeps
/// derived sets and snapshots stable across replays.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseTarget {
    pub deployment_id: DeploymentId,
    pub environment_id: EnvironmentId,
    pub resource_id: ResourceId,
}

impl ReleaseTarget {
    pub fn new(
        deployment_id: impl Into<DeploymentId>,
        environment_id: impl Into<EnvironmentId>,
        resource_id: impl Into<ResourceId>,
    ) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            environment_id: environment_id.into(),
            resource_id: resource_id.into(),
        }
    }

    /// Stable textual key, `deployment:environment:resource`
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ReleaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.deployment_id, self.environment_id, self.resource_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_and_key() {
        let a = ReleaseTarget::new("d1", "e1", "r2");
        let b = ReleaseTarget::new("d1", "e2", "r1");
        assert!(a < b);
        assert_eq!(a.key(), "d1:e1:r2");
    }
}
