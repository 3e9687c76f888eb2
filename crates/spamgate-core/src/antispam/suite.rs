//! Runs the enabled spam tests and merges their results

use super::{SpamTest, SpamTestData, SpamTestResultSet};
use std::sync::Arc;
use tracing::debug;

/// Ordered collection of spam tests
#[derive(Default, Clone)]
pub struct SpamTestSuite {
    tests: Vec<Arc<dyn SpamTest>>,
}

impl SpamTestSuite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a test to the end of the suite
    pub fn add_test(&mut self, test: Arc<dyn SpamTest>) {
        self.tests.push(test);
    }

    /// Builder form of [`add_test`](Self::add_test)
    pub fn with_test(mut self, test: Arc<dyn SpamTest>) -> Self {
        self.add_test(test);
        self
    }

    /// Names of all tests in order
    pub fn test_names(&self) -> Vec<String> {
        self.tests.iter().map(|t| t.name().to_string()).collect()
    }

    /// Run every test that is enabled at call time
    pub async fn run(&self, data: &SpamTestData) -> SpamTestResultSet {
        let mut results = SpamTestResultSet::new();

        for test in &self.tests {
            if !test.is_enabled() {
                debug!(test = %test.name(), "Spam test disabled, skipping");
                continue;
            }

            let test_results = test.run(data).await;
            debug!(
                test = %test.name(),
                results = test_results.len(),
                "Spam test finished"
            );
            results.extend(test_results);
        }

        results
    }
}
