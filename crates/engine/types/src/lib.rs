//! Engine Types - Core types for the workspace orchestration engine
//!
//! A workspace is a tenant-scoped, in-memory materialised view of everything
//! that decides *what should be deployed where*. This crate holds the shared
//! vocabulary used by every other engine crate.
//!
//! ## Key Concepts
//!
//! - **Resource / Deployment / Environment**: the three sides of a release target
//! - **Selector**: predicate tree deciding which resources a deployment or
//!   environment claims
//! - **ReleaseTarget**: derived `(deployment, environment, resource)` triple
//! - **Policy**: targets plus an ordered list of admission rules
//! - **Job**: a rendered unit of work handed to a job agent
//! - **RawEvent**: the inbound event envelope read from the log

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod clock;
pub mod entity;
pub mod error;
pub mod events;
pub mod ids;
pub mod job;
pub mod policy;
pub mod release;
pub mod selector;
pub mod shutdown;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{
    ApprovalRecord, Capabilities, Deployment, DeploymentVersion, EntityKind, EntityRef,
    Environment, GithubEntity, JobAgent, Resource, System, Workflow, WorkflowInput,
    WorkflowTemplate,
};
pub use error::{Result, TypesError};
pub use events::{EventKind, JobUpdate, RawEvent};
pub use ids::{
    ApprovalId, BypassId, DeploymentId, EnvironmentId, JobAgentId, JobId, PolicyId,
    PolicyTargetId, ResourceId, RuleId, SkipId, SystemId, VersionId, WorkflowId,
    WorkflowTemplateId, WorkspaceId,
};
pub use job::{Job, JobStatus, JobSubject};
pub use policy::{
    ApprovalRule, OverrideScope, Policy, PolicyBypass, PolicyRule, PolicySkip, PolicyTarget,
    RolloutRule, RolloutType, RuleKind, TimeWindow, TimeWindowRule,
};
pub use release::ReleaseTarget;
pub use selector::{Comparator, Condition, Operator, Selectable, Selector, SelectorError};
pub use shutdown::{Shutdown, ShutdownTrigger};
