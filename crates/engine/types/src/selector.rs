//! Selector expressions
//!
//! A selector is a predicate over an entity's attributes. Deployments and
//! environments use one to claim resources; policy targets use three to pick
//! the release targets a policy applies to.
//!
//! Selectors are a closed set of tagged variants evaluated by a single
//! [`Selector::evaluate`] function. The JSON selector is a tree of
//! `and` / `or` / `not` nodes over comparators:
//!
//! ```json
//! { "json": { "and": [
//!     { "comparator": { "field": "kind", "op": "=", "value": "service" } },
//!     { "comparator": { "field": "metadata.env", "op": "in", "value": ["prod", "staging"] } }
//! ] } }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

/// Anything a selector can be evaluated against
pub trait Selectable {
    /// Resolve an attribute path such as `kind` or `metadata.env`
    fn field(&self, path: &str) -> Option<Cow<'_, str>>;
}

/// Selector evaluation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("Operator {op} expects {expected}, got {actual}")]
    InvalidValue {
        op: String,
        expected: &'static str,
        actual: String,
    },

    #[error("Empty field path in comparator")]
    EmptyField,

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// A selector over entity attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Selector {
    /// Matches every entity
    All,
    /// JSON condition tree
    Json(Condition),
}

impl Selector {
    pub fn json(condition: Condition) -> Self {
        Self::Json(condition)
    }

    /// Evaluate the selector against an entity
    pub fn evaluate(&self, entity: &dyn Selectable) -> Result<bool, SelectorError> {
        match self {
            Self::All => Ok(true),
            Self::Json(condition) => condition.evaluate(entity),
        }
    }

    /// Check the selector is well-formed without evaluating it
    pub fn validate(&self) -> Result<(), SelectorError> {
        match self {
            Self::All => Ok(()),
            Self::Json(condition) => condition.validate(),
        }
    }
}

/// A node of the JSON selector tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Comparator(Comparator),
}

impl Condition {
    /// Shorthand for a comparator leaf
    pub fn compare(field: impl Into<String>, op: Operator, value: serde_json::Value) -> Self {
        Self::Comparator(Comparator {
            field: field.into(),
            op,
            value,
        })
    }

    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::compare(field, Operator::Eq, serde_json::Value::String(value.into()))
    }

    pub fn evaluate(&self, entity: &dyn Selectable) -> Result<bool, SelectorError> {
        match self {
            Self::And(children) => {
                for child in children {
                    if !child.evaluate(entity)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(children) => {
                for child in children {
                    if child.evaluate(entity)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(inner) => Ok(!inner.evaluate(entity)?),
            Self::Comparator(cmp) => cmp.evaluate(entity),
        }
    }

    pub fn validate(&self) -> Result<(), SelectorError> {
        match self {
            Self::And(children) | Self::Or(children) => {
                children.iter().try_for_each(Condition::validate)
            }
            Self::Not(inner) => inner.validate(),
            Self::Comparator(cmp) => cmp.validate(),
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    In,
    NotIn,
    Prefix,
    Suffix,
    Contains,
    Exists,
    Before,
    After,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::In => "in",
            Operator::NotIn => "not-in",
            Operator::Prefix => "prefix",
            Operator::Suffix => "suffix",
            Operator::Contains => "contains",
            Operator::Exists => "exists",
            Operator::Before => "before",
            Operator::After => "after",
        };
        f.write_str(s)
    }
}

/// Leaf comparison `field op value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparator {
    pub field: String,
    pub op: Operator,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Comparator {
    pub fn evaluate(&self, entity: &dyn Selectable) -> Result<bool, SelectorError> {
        let actual = entity.field(&self.field);

        match self.op {
            Operator::Exists => Ok(actual.is_some()),
            Operator::Eq => Ok(actual.as_deref() == Some(&*self.scalar()?)),
            // A missing attribute is "not equal"
            Operator::Ne => Ok(actual.as_deref() != Some(&*self.scalar()?)),
            Operator::In => {
                let list = self.list()?;
                Ok(actual.is_some_and(|a| list.iter().any(|v| *v == &*a)))
            }
            Operator::NotIn => {
                let list = self.list()?;
                Ok(!actual.is_some_and(|a| list.iter().any(|v| *v == &*a)))
            }
            Operator::Prefix => {
                let needle = self.scalar()?;
                Ok(actual.is_some_and(|a| a.starts_with(&*needle)))
            }
            Operator::Suffix => {
                let needle = self.scalar()?;
                Ok(actual.is_some_and(|a| a.ends_with(&*needle)))
            }
            Operator::Contains => {
                let needle = self.scalar()?;
                Ok(actual.is_some_and(|a| a.contains(&*needle)))
            }
            Operator::Before | Operator::After => {
                let bound = parse_time(&self.scalar()?)?;
                let Some(actual) = actual else {
                    return Ok(false);
                };
                let Ok(at) = parse_time(&actual) else {
                    return Ok(false);
                };
                Ok(if self.op == Operator::Before {
                    at < bound
                } else {
                    at > bound
                })
            }
        }
    }

    pub fn validate(&self) -> Result<(), SelectorError> {
        if self.field.is_empty() {
            return Err(SelectorError::EmptyField);
        }
        match self.op {
            Operator::Exists => Ok(()),
            Operator::In | Operator::NotIn => self.list().map(|_| ()),
            Operator::Before | Operator::After => {
                parse_time(&self.scalar()?).map(|_| ())
            }
            _ => self.scalar().map(|_| ()),
        }
    }

    /// Scalar comparand; numbers and booleans compare by their JSON text
    fn scalar(&self) -> Result<Cow<'_, str>, SelectorError> {
        match &self.value {
            serde_json::Value::String(s) => Ok(Cow::Borrowed(s)),
            serde_json::Value::Number(n) => Ok(Cow::Owned(n.to_string())),
            serde_json::Value::Bool(b) => Ok(Cow::Owned(b.to_string())),
            other => Err(self.invalid("a string", other)),
        }
    }

    fn list(&self) -> Result<Vec<&str>, SelectorError> {
        match &self.value {
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().ok_or_else(|| self.invalid("a list of strings", item)))
                .collect(),
            other => Err(self.invalid("a list of strings", other)),
        }
    }

    fn invalid(&self, expected: &'static str, actual: &serde_json::Value) -> SelectorError {
        SelectorError::InvalidValue {
            op: self.op.to_string(),
            expected,
            actual: actual.to_string(),
        }
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, SelectorError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| SelectorError::InvalidTimestamp(s.to_string()))
}
