//! Metric relabel rules applied before samples are shipped to the sink.
//!
//! Rules follow Prometheus `write_relabel_configs` semantics restricted to
//! the metric name: every regex is fully anchored, rules run in order, and a
//! sample dropped by one rule is never seen by the next.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What a rule does with a sample whose name matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelabelAction {
    /// Drop every sample that does NOT match.
    Keep,
    /// Drop every sample that matches.
    Drop,
}

impl fmt::Display for RelabelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => write!(f, "keep"),
            Self::Drop => write!(f, "drop"),
        }
    }
}

impl std::str::FromStr for RelabelAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "drop" => Ok(Self::Drop),
            _ => Err(Error::InvalidSpec(format!(
                "unknown relabel action: {s}. Supported: keep, drop"
            ))),
        }
    }
}

/// A single relabel rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelabelRule {
    /// Regex matched against the metric name.
    pub label_match: String,
    pub action: RelabelAction,
}

impl RelabelRule {
    pub fn keep(label_match: impl Into<String>) -> Self {
        Self {
            label_match: label_match.into(),
            action: RelabelAction::Keep,
        }
    }

    pub fn drop(label_match: impl Into<String>) -> Self {
        Self {
            label_match: label_match.into(),
            action: RelabelAction::Drop,
        }
    }

    /// Compile the anchored form of the regex, as Prometheus does.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] if the expression does not compile.
    pub fn compile(&self) -> Result<Regex> {
        Regex::new(&format!("^(?:{})$", self.label_match)).map_err(|e| {
            Error::InvalidSpec(format!("invalid relabel regex '{}': {e}", self.label_match))
        })
    }
}

/// Outcome of running the rule chain over one metric name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Kept,
    /// Dropped by the rule at this index.
    Dropped { rule: usize },
}

impl Verdict {
    #[must_use]
    pub fn is_kept(&self) -> bool {
        matches!(self, Self::Kept)
    }
}

/// Compiled rule chain.
#[derive(Debug)]
pub struct RelabelChain {
    rules: Vec<(RelabelAction, Regex)>,
}

impl RelabelChain {
    /// Compile an ordered list of rules.
    ///
    /// # Errors
    ///
    /// Returns an error if any regex fails to compile.
    pub fn new(rules: &[RelabelRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| Ok((rule.action, rule.compile()?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Run the chain over a metric name.
    #[must_use]
    pub fn evaluate(&self, metric_name: &str) -> Verdict {
        for (index, (action, regex)) in self.rules.iter().enumerate() {
            let matched = regex.is_match(metric_name);
            let dropped = match action {
                RelabelAction::Keep => !matched,
                RelabelAction::Drop => matched,
            };
            if dropped {
                return Verdict::Dropped { rule: index };
            }
        }
        Verdict::Kept
    }
}
