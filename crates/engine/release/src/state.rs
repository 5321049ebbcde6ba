//! Per release-target state
//!
//! ```text
//! Idle ──(candidate or trigger)──▶ Evaluating
//! Evaluating ──(admitted)──▶ Dispatching
//! Evaluating ──(denied / deferred)──▶ Waiting
//! Dispatching ──(accepted)──▶ InFlight
//! Dispatching ──(transient error)──▶ Waiting (backoff)
//! InFlight ──(job result)──▶ Idle
//! any ──(target destroyed)──▶ Terminal
//! ```

use chrono::{DateTime, Utc};
use engine_policy::PolicyDecision;
use engine_store::TargetGeneration;
use engine_types::{JobId, VersionId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a target is waiting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "camelCase")]
pub enum Wait {
    /// A rule denied every candidate; retried on the next trigger
    Denied { reason: String },

    /// A rule asked to be asked again later
    Deferred { until: DateTime<Utc> },

    /// Dispatch failed transiently; retried no earlier than `until`
    #[serde(rename_all = "camelCase")]
    Backoff { until: DateTime<Utc>, job_id: JobId },

    /// No agent can take the job
    Blocked { reason: String },
}

impl Wait {
    /// Instant at which the target should be looked at again, if any
    pub fn wake_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Wait::Deferred { until } | Wait::Backoff { until, .. } => Some(*until),
            Wait::Denied { .. } | Wait::Blocked { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Evaluating,
    #[serde(rename_all = "camelCase")]
    Dispatching { job_id: JobId },
    #[serde(rename_all = "camelCase")]
    InFlight { job_id: JobId },
    Waiting { wait: Wait },
    Terminal,
}

impl Phase {
    pub fn is_busy(&self) -> bool {
        matches!(self, Phase::Dispatching { .. } | Phase::InFlight { .. })
    }

    pub fn active_job(&self) -> Option<JobId> {
        match self {
            Phase::Dispatching { job_id } | Phase::InFlight { job_id } => Some(*job_id),
            _ => None,
        }
    }

    /// The job this phase is tied to, including one waiting out a backoff
    pub fn job(&self) -> Option<JobId> {
        match self {
            Phase::Waiting {
                wait: Wait::Backoff { job_id, .. },
            } => Some(*job_id),
            other => other.active_job(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Evaluating => write!(f, "evaluating"),
            Phase::Dispatching { job_id } => write!(f, "dispatching({job_id})"),
            Phase::InFlight { job_id } => write!(f, "in-flight({job_id})"),
            Phase::Waiting { wait } => match wait {
                Wait::Denied { reason } => write!(f, "waiting(denied: {reason})"),
                Wait::Deferred { until } => write!(f, "waiting(until {})", until.to_rfc3339()),
                Wait::Backoff { until, .. } => write!(f, "waiting(backoff until {})", until.to_rfc3339()),
                Wait::Blocked { reason } => write!(f, "waiting(blocked: {reason})"),
            },
            Phase::Terminal => write!(f, "terminal"),
        }
    }
}

/// Reconciliation state of one release target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetState {
    pub phase: Phase,

    /// Version of the last successful job
    pub deployed: Option<VersionId>,

    /// Copied from the store, which bumps it for every redeploy command and
    /// every revival after destruction
    pub generation: u64,

    /// Store incarnation this state belongs to
    #[serde(default)]
    pub incarnation: u64,

    /// A redeploy was requested and not yet turned into a job
    pub redeploy: bool,

    /// A trigger arrived while busy; reconcile once the job settles
    pub pending: bool,

    /// Consecutive transient dispatch failures
    pub failures: u32,

    pub last_decision: Option<PolicyDecision>,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            deployed: None,
            generation: 0,
            incarnation: 0,
            redeploy: false,
            pending: false,
            failures: 0,
            last_decision: None,
        }
    }
}

impl TargetState {
    /// Idle state for a target the store just created
    pub fn fresh(current: TargetGeneration) -> Self {
        Self {
            generation: current.generation,
            incarnation: current.incarnation,
            ..Self::default()
        }
    }

    pub fn wake_at(&self) -> Option<DateTime<Utc>> {
        match &self.phase {
            Phase::Waiting { wait } => wait.wake_at(),
            _ => None,
        }
    }
}
