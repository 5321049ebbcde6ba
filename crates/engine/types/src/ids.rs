//! Strongly-typed identifiers for workspace entities
//!
//! Entity ids are opaque strings chosen by the upstream producer, wrapped in
//! newtypes so a deployment id can never be passed where a resource id is
//! expected. Workspace and job ids are UUIDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a resource (a concrete deploy destination)
    ResourceId
);
string_id!(
    /// Identifier of a deployment
    DeploymentId
);
string_id!(
    /// Identifier of an environment
    EnvironmentId
);
string_id!(
    /// Identifier of a system grouping deployments and environments
    SystemId
);
string_id!(
    /// Identifier of a deployment version
    VersionId
);
string_id!(PolicyId);
string_id!(PolicyTargetId);
string_id!(RuleId);
string_id!(BypassId);
string_id!(SkipId);
string_id!(ApprovalId);
string_id!(
    /// Identifier of a job agent
    JobAgentId
);
string_id!(WorkflowTemplateId);
string_id!(WorkflowId);

/// Unique identifier for a workspace (tenant)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(Uuid);

impl WorkspaceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Stable partition assignment: all events of one workspace land on the
    /// same partition so they are applied in order.
    pub fn partition(&self, partitions: u32) -> u32 {
        if partitions == 0 {
            return 0;
        }
        (self.0.as_u128() % u128::from(partitions)) as u32
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkspaceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Namespace for deterministic job ids
const JOB_NAMESPACE: Uuid = Uuid::from_u128(0x6a0b_9c1e_3f4d_4e2a_8b5c_1d7e_9f20_a3b4);

/// Unique identifier for a job
///
/// Job ids are derived (UUID v5) from the work they describe, so replaying
/// the same log yields the same ids and downstream agents can deduplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Derive a job id from the parts that identify a unit of work
    pub fn derive(parts: &[&str]) -> Self {
        let name = parts.join("|");
        Self(Uuid::new_v5(&JOB_NAMESPACE, name.as_bytes()))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
