//! Policy decisions

use chrono::{DateTime, Utc};
use engine_types::{PolicyId, RuleId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of evaluating a rule, or of the whole pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum PolicyDecision {
    /// Admitted
    Allowed { reason: String },

    /// Rejected; retried when the evaluation context changes
    Denied { reason: String },

    /// Exempted by an operator skip; admits
    Skipped { reason: String },

    /// Not yet; re-evaluate at `until`
    Deferred { until: DateTime<Utc> },
}

impl PolicyDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self::Allowed {
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn defer(until: DateTime<Utc>) -> Self {
        Self::Deferred { until }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }

    /// Whether a candidate with this decision may be dispatched
    pub fn admits(&self) -> bool {
        self.is_allowed() || self.is_skipped()
    }

    pub fn deferred_until(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Deferred { until } => Some(*until),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed { reason } => write!(f, "allowed ({reason})"),
            Self::Denied { reason } => write!(f, "denied ({reason})"),
            Self::Skipped { reason } => write!(f, "skipped ({reason})"),
            Self::Deferred { until } => write!(f, "deferred until {}", until.to_rfc3339()),
        }
    }
}

/// Decision of one rule within the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleOutcome {
    pub policy_id: PolicyId,
    pub rule_id: RuleId,
    pub decision: PolicyDecision,
}

/// Combined decision plus the per-rule trail that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub decision: PolicyDecision,
    pub outcomes: Vec<RuleOutcome>,
}

impl EvaluationReport {
    pub fn admits(&self) -> bool {
        self.decision.admits()
    }
}
