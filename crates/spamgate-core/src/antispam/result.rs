//! Spam test results

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of a spam test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpamTestOutcome {
    Pass,
    Fail,
}

impl std::fmt::Display for SpamTestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpamTestOutcome::Pass => write!(f, "pass"),
            SpamTestOutcome::Fail => write!(f, "fail"),
        }
    }
}

/// A single verdict from a spam test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpamTestResult {
    test_name: String,
    outcome: SpamTestOutcome,
    score: i32,
    reason: String,
}

impl SpamTestResult {
    pub fn new(
        test_name: impl Into<String>,
        outcome: SpamTestOutcome,
        score: i32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            outcome,
            score,
            reason: reason.into(),
        }
    }

    /// Name of the test that produced this result
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn outcome(&self) -> SpamTestOutcome {
        self.outcome
    }

    pub fn score(&self) -> i32 {
        self.score
    }

    /// Human-readable reason
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Results of one or more spam tests.
///
/// Entries are distinct by identity: two results with equal fields are both
/// kept unless they are the same allocation.
#[derive(Debug, Clone, Default)]
pub struct SpamTestResultSet {
    results: Vec<Arc<SpamTestResult>>,
}

impl SpamTestResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a result. Returns false if this exact result is already present.
    pub fn insert(&mut self, result: Arc<SpamTestResult>) -> bool {
        if self.results.iter().any(|r| Arc::ptr_eq(r, &result)) {
            return false;
        }
        self.results.push(result);
        true
    }

    /// Merge another set into this one
    pub fn extend(&mut self, other: SpamTestResultSet) {
        for result in other {
            self.insert(result);
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SpamTestResult>> {
        self.results.iter()
    }

    /// Sum of all result scores
    pub fn total_score(&self) -> i64 {
        self.results.iter().map(|r| i64::from(r.score())).sum()
    }
}

impl IntoIterator for SpamTestResultSet {
    type Item = Arc<SpamTestResult>;
    type IntoIter = std::vec::IntoIter<Arc<SpamTestResult>>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}
