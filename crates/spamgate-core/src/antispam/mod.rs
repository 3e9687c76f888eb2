//! Anti-spam tests
//!
//! Every back end implements [`SpamTest`]. The [`SpamTestSuite`] runs the
//! enabled tests against a message and merges their results. Tests never
//! fail the pipeline: a back end that cannot test a message reports the
//! problem through an [`ErrorReporter`] and returns no results.

pub mod reporter;
pub mod result;
pub mod spamassassin;
pub mod suite;
pub mod test_connect;
pub mod verdict;

pub use reporter::{ErrorReporter, TracingReporter};
pub use result::{SpamTestOutcome, SpamTestResult, SpamTestResultSet};
pub use spamassassin::{SharedSpamAssassinConfig, SpamTestSpamAssassin};
pub use suite::SpamTestSuite;
pub use test_connect::{ConnectionTestError, ConnectionTestReport, SpamAssassinTestConnect};
pub use verdict::{is_spam_status, parse_spamassassin_score, SPAM_STATUS_HEADER};

use async_trait::async_trait;
use spamgate_common::Result;
use spamgate_storage::{MessageData, StoredMessage};
use tokio::sync::RwLock;

/// A pluggable anti-spam test
#[async_trait]
pub trait SpamTest: Send + Sync {
    /// Stable name used in results
    fn name(&self) -> &str;

    /// Whether the test is enabled right now
    fn is_enabled(&self) -> bool;

    /// Test a message. Failures are reported out of band and yield an
    /// empty set.
    async fn run(&self, data: &SpamTestData) -> SpamTestResultSet;
}

/// The message under test
#[derive(Debug)]
pub struct SpamTestData {
    message: StoredMessage,
    message_data: RwLock<MessageData>,
}

impl SpamTestData {
    /// Load the header view of `message`
    pub async fn new(message: StoredMessage) -> Result<Self> {
        let message_data = MessageData::load(message.clone()).await?;
        Ok(Self {
            message,
            message_data: RwLock::new(message_data),
        })
    }

    /// The stored message
    pub fn message(&self) -> &StoredMessage {
        &self.message
    }

    /// Re-read the header view after the stored message changed
    pub async fn refresh_from_message(&self) -> Result<()> {
        self.message_data.write().await.refresh().await
    }

    /// Current value of a header, by exact name
    pub async fn field_value(&self, name: &str) -> Option<String> {
        self.message_data
            .read()
            .await
            .field_value(name)
            .map(str::to_string)
    }
}
