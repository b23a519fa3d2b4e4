//! The load-rule engine: a small boolean predicate language evaluated against
//! a dispatch's payload to decide per-processor (and per-collector)
//! eligibility.
//!
//! Settings carry a shared table of named rules plus one rule assignment per
//! processor or collector id. A rule is a tree of `all` / `any` / `not`
//! combinators over leaf conditions and references into the shared table.
//! Evaluation failures reject the dispatch they occurred on and never abort
//! the rest of a batch.

pub mod operators;

use std::collections::HashMap;
use std::sync::RwLock;

use dispatch_core::Dispatch;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("no rule named {0:?}")]
    UnknownRule(String),
    #[error("unknown operator {0:?}")]
    UnknownOperator(String),
    #[error("no value present at {0:?}")]
    MissingValue(String),
    #[error("operator {0} requires a filter argument")]
    MissingFilter(String),
    #[error("operator {operator} cannot be applied to {shape} values")]
    UnsupportedShape {
        operator: String,
        shape: &'static str,
    },
    #[error("operator {operator} requires a numeric operand, got {value:?}")]
    NotANumber { operator: String, value: String },
    #[error("invalid regular expression {pattern:?}")]
    BadRegex {
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },
}

/// A leaf predicate: a payload field reference, an operator id, and an
/// optional filter argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub variable: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// A boolean rule tree. Serializes to/from the payload document model:
/// `{"all": [...]}`, `{"any": [...]}`, `{"not": ...}`, a condition object, or
/// a bare string referencing a rule in the shared table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rule {
    All { all: Vec<Rule> },
    Any { any: Vec<Rule> },
    Not { not: Box<Rule> },
    Leaf(Condition),
    Reference(String),
}

#[derive(Default)]
struct RuleSet {
    table: HashMap<String, Rule>,
    assignments: HashMap<String, Rule>,
}

/// Evaluates load rules for processors and collectors. The rule set is
/// rebuilt wholesale on every settings update; evaluation works off the
/// snapshot current at call time.
#[derive(Default)]
pub struct LoadRuleEngine {
    inner: RwLock<RuleSet>,
}

impl LoadRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the shared rule table and the per-id assignments.
    pub fn rebuild(&self, table: HashMap<String, Rule>, assignments: HashMap<String, Rule>) {
        let mut inner = self.inner.write().expect("rule set lock poisoned");
        *inner = RuleSet { table, assignments };
    }

    /// Splits a batch into (accepted, rejected) for the given processor or
    /// collector id. No assigned rule means everything is accepted. A
    /// per-dispatch evaluation failure rejects that dispatch with a warning
    /// and moves on.
    pub fn evaluate(&self, id: &str, dispatches: Vec<Dispatch>) -> (Vec<Dispatch>, Vec<Dispatch>) {
        let inner = self.inner.read().expect("rule set lock poisoned");
        let Some(rule) = inner.assignments.get(id) else {
            return (dispatches, Vec::new());
        };

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for dispatch in dispatches {
            match evaluate_rule(rule, &inner.table, dispatch.payload()) {
                Ok(true) => accepted.push(dispatch),
                Ok(false) => rejected.push(dispatch),
                Err(e) => {
                    warn!(
                        target_id = id,
                        dispatch = %dispatch.log_description(),
                        error = %e,
                        "load rule evaluation failed, rejecting dispatch"
                    );
                    rejected.push(dispatch);
                }
            }
        }
        (accepted, rejected)
    }

    /// Whether a single dispatch passes the rule assigned to `id`. Evaluation
    /// failures count as "not allowed".
    pub fn allows(&self, id: &str, dispatch: &Dispatch) -> bool {
        let inner = self.inner.read().expect("rule set lock poisoned");
        let Some(rule) = inner.assignments.get(id) else {
            return true;
        };
        match evaluate_rule(rule, &inner.table, dispatch.payload()) {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(
                    target_id = id,
                    dispatch = %dispatch.log_description(),
                    error = %e,
                    "load rule evaluation failed"
                );
                false
            }
        }
    }
}

fn evaluate_rule(
    rule: &Rule,
    table: &HashMap<String, Rule>,
    payload: &Value,
) -> Result<bool, RuleError> {
    match rule {
        Rule::All { all } => {
            for child in all {
                if !evaluate_rule(child, table, payload)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Rule::Any { any } => {
            for child in any {
                if evaluate_rule(child, table, payload)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Rule::Not { not } => Ok(!evaluate_rule(not, table, payload)?),
        Rule::Leaf(condition) => operators::apply(condition, payload),
        Rule::Reference(id) => {
            let referenced = table
                .get(id)
                .ok_or_else(|| RuleError::UnknownRule(id.clone()))?;
            evaluate_rule(referenced, table, payload)
        }
    }
}
