//! Serialisable failure diagnostics.

use serde::{Deserialize, Serialize};

use super::{Classifier, Severity};
use crate::failure::Failure;

/// Snapshot of a failure, its classification and everything merged into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Type name of the outermost error.
    pub kind: String,
    /// Rendered message of the outermost error.
    pub message: String,
    pub severity: Severity,
    /// Matcher that decided the severity, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    /// Messages of the source chain beneath the outermost error.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
    /// Failures discarded in favour of this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed: Vec<FailureReport>,
}

impl FailureReport {
    pub fn new(classifier: &Classifier, failure: &Failure) -> Self {
        let classification = classifier.explain(failure);
        Self {
            kind: failure.kind().name().to_string(),
            message: failure.to_string(),
            severity: classification.severity,
            decided_by: classification.decided_by,
            chain: failure.chain().skip(1).map(|link| link.to_string()).collect(),
            suppressed: failure
                .suppressed()
                .iter()
                .map(|inner| FailureReport::new(classifier, inner))
                .collect(),
        }
    }

    /// Total number of failures in this report, itself included.
    pub fn failure_count(&self) -> usize {
        1 + self
            .suppressed
            .iter()
            .map(FailureReport::failure_count)
            .sum::<usize>()
    }

    /// Renders the report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
