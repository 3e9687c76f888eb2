//! SpamAssassin test
//!
//! Sends the message to spamd, which rewrites it with an `X-Spam-Status`
//! header. Once the exchange has completed the header view is refreshed and
//! the verdict is read from that header.

use super::reporter::{ErrorReporter, TracingReporter};
use super::result::{SpamTestOutcome, SpamTestResult, SpamTestResultSet};
use super::verdict::{is_spam_status, parse_spamassassin_score, SPAM_STATUS_HEADER};
use super::{SpamTest, SpamTestData};
use crate::net::{AddressResolver, ConfiguredTransport, DnsResolver, Transport};
use crate::spamd::ScanSession;
use async_trait::async_trait;
use spamgate_common::config::SpamAssassinConfig;
use spamgate_common::Severity;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Test name reported in results
pub const TEST_NAME: &str = "SpamTestSpamAssassin";

/// Reason attached to spam results
pub const SPAM_REASON: &str = "Tagged as Spam by SpamAssassin";

/// Origin used in operational error reports
pub const ERROR_ORIGIN: &str = "SpamAssassinTestConnect::TestConnect";

/// Error code: spamd host could not be resolved
pub const ERROR_UNRESOLVED: u32 = 5507;

/// Error code: the scan did not complete
pub const ERROR_NOT_COMPLETED: u32 = 5508;

const NOT_COMPLETED_MESSAGE: &str = "The SpamAssassin tests did not complete. Please confirm that the configuration (host name and port) is valid and that SpamAssassin is running.";

/// SpamAssassin settings shared with whoever may change them at runtime
pub type SharedSpamAssassinConfig = Arc<RwLock<SpamAssassinConfig>>;

/// Read a consistent copy of the shared settings
pub(crate) fn snapshot(config: &SharedSpamAssassinConfig) -> SpamAssassinConfig {
    match config.read() {
        Ok(config) => config.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Anti-spam test backed by spamd
pub struct SpamTestSpamAssassin {
    config: SharedSpamAssassinConfig,
    resolver: Arc<dyn AddressResolver>,
    transport: Arc<dyn Transport>,
    reporter: Arc<dyn ErrorReporter>,
}

impl SpamTestSpamAssassin {
    pub fn new(
        config: SharedSpamAssassinConfig,
        resolver: Arc<dyn AddressResolver>,
        transport: Arc<dyn Transport>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            config,
            resolver,
            transport,
            reporter,
        }
    }

    /// Build the test with system DNS resolution, a transport that follows
    /// the shared settings and tracing error reports. Fails if the current
    /// TLS settings are unusable.
    pub fn from_config(config: SharedSpamAssassinConfig) -> anyhow::Result<Self> {
        let transport = ConfiguredTransport::new(config.clone())?;
        Ok(Self::new(
            config,
            Arc::new(DnsResolver::system()),
            Arc::new(transport),
            Arc::new(TracingReporter),
        ))
    }

    /// Send operational error reports somewhere else
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    fn report_not_completed(&self, detail: Option<&str>) {
        let message = match detail {
            Some(detail) => format!("{} ({})", NOT_COMPLETED_MESSAGE, detail),
            None => NOT_COMPLETED_MESSAGE.to_string(),
        };
        self.reporter
            .report(Severity::High, ERROR_NOT_COMPLETED, ERROR_ORIGIN, &message);
    }
}

#[async_trait]
impl SpamTest for SpamTestSpamAssassin {
    fn name(&self) -> &str {
        TEST_NAME
    }

    fn is_enabled(&self) -> bool {
        snapshot(&self.config).enabled
    }

    async fn run(&self, data: &SpamTestData) -> SpamTestResultSet {
        let mut results = SpamTestResultSet::new();
        let config = snapshot(&self.config);

        if let Ok(size) = data.message().size().await {
            if size > config.max_message_size as u64 {
                debug!(
                    path = %data.message().path(),
                    size,
                    max = config.max_message_size,
                    "Message too large for SpamAssassin, skipping"
                );
                return results;
            }
        }

        let address = match self.resolver.resolve(&config.host).await.first() {
            Some(address) => *address,
            None => {
                self.reporter.report(
                    Severity::High,
                    ERROR_UNRESOLVED,
                    ERROR_ORIGIN,
                    "The IP address for SpamAssassin could not be resolved. Aborting tests.",
                );
                return results;
            }
        };

        let (session, signal) = ScanSession::new(data.message().clone(), config.user.clone());

        // From here on the transport owns the session
        if let Err(e) = self.transport.connect(session, address, config.port) {
            warn!(address = %address, port = config.port, error = %e, "Could not connect to spamd");
            self.report_not_completed(Some(&e.to_string()));
            return results;
        }

        // A scan given up on never writes back to the message
        let completed = match config.wait_timeout_secs {
            Some(secs) => match signal.wait_or_abandon(Duration::from_secs(secs)).await {
                Some(completed) => completed,
                None => {
                    warn!(address = %address, timeout_secs = secs, "Timed out waiting for spamd");
                    false
                }
            },
            None => signal.wait().await,
        };

        if !completed {
            self.report_not_completed(None);
            return results;
        }

        if let Err(e) = data.refresh_from_message().await {
            self.report_not_completed(Some(&format!("failed to re-read message: {}", e)));
            return results;
        }

        let status = data.field_value(SPAM_STATUS_HEADER).await.unwrap_or_default();
        if is_spam_status(&status) {
            let score = if config.merge_score {
                parse_spamassassin_score(&status)
            } else {
                config.score
            };

            info!(path = %data.message().path(), score, "Message tagged as spam by SpamAssassin");
            results.insert(Arc::new(SpamTestResult::new(
                TEST_NAME,
                SpamTestOutcome::Fail,
                score,
                SPAM_REASON,
            )));
        } else {
            debug!(path = %data.message().path(), "Message not tagged as spam by SpamAssassin");
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ConnectError, TransportError};
    use spamgate_storage::{LocalStorage, MessageStorage};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    const MESSAGE: &[u8] = b"Subject: offer\r\n\r\nbuy now\r\n";

    struct FixedResolver(Vec<IpAddr>);

    #[async_trait]
    impl AddressResolver for FixedResolver {
        async fn resolve(&self, _host: &str) -> Vec<IpAddr> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        reports: Mutex<Vec<(Severity, u32, String)>>,
    }

    impl RecordingReporter {
        fn codes(&self) -> Vec<u32> {
            self.reports.lock().unwrap().iter().map(|r| r.1).collect()
        }
    }

    impl ErrorReporter for RecordingReporter {
        fn report(&self, severity: Severity, code: u32, origin: &str, message: &str) {
            assert_eq!(origin, ERROR_ORIGIN);
            self.reports
                .lock()
                .unwrap()
                .push((severity, code, message.to_string()));
        }
    }

    /// Answers every session in memory with a canned spamd response
    enum FakeTransport {
        Respond(Vec<u8>),
        Refuse,
    }

    impl FakeTransport {
        fn processed(status: &str) -> Self {
            let body = format!(
                "X-Spam-Status: {}\r\nSubject: offer\r\n\r\nbuy now\r\n",
                status
            );
            let mut response = format!(
                "SPAMD/1.1 0 EX_OK\r\nContent-length: {}\r\n\r\n",
                body.len()
            )
            .into_bytes();
            response.extend_from_slice(body.as_bytes());
            FakeTransport::Respond(response)
        }
    }

    impl Transport for FakeTransport {
        fn connect(
            &self,
            session: ScanSession,
            _address: IpAddr,
            port: u16,
        ) -> std::result::Result<(), ConnectError> {
            let response = match self {
                FakeTransport::Respond(response) => response.clone(),
                FakeTransport::Refuse => {
                    return Err(ConnectError::new(session, TransportError::InvalidPort(port)))
                }
            };

            let (client, mut server) = duplex(64 * 1024);
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let mut request = Vec::new();
                while !request.ends_with(MESSAGE) {
                    let n = server.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                server.write_all(&response).await.unwrap();
                server.shutdown().await.unwrap();
            });
            tokio::spawn(session.run(client));
            Ok(())
        }
    }

    fn localhost() -> Vec<IpAddr> {
        vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
    }

    fn config(merge_score: bool) -> SharedSpamAssassinConfig {
        Arc::new(RwLock::new(SpamAssassinConfig {
            enabled: true,
            merge_score,
            score: 5,
            ..Default::default()
        }))
    }

    async fn test_data(dir: &TempDir) -> SpamTestData {
        let storage = MessageStorage::new(Arc::new(LocalStorage::from_path(dir.path()).unwrap()));
        let stored = storage
            .store_message(&uuid::Uuid::new_v4(), MESSAGE)
            .await
            .unwrap();
        SpamTestData::new(stored).await.unwrap()
    }

    fn spam_test(
        config: SharedSpamAssassinConfig,
        resolver: Vec<IpAddr>,
        transport: FakeTransport,
    ) -> (SpamTestSpamAssassin, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::default());
        let test = SpamTestSpamAssassin::new(
            config,
            Arc::new(FixedResolver(resolver)),
            Arc::new(transport),
            reporter.clone(),
        );
        (test, reporter)
    }

    #[tokio::test]
    async fn test_spam_with_fixed_score() {
        let dir = TempDir::new().unwrap();
        let data = test_data(&dir).await;
        let (test, reporter) = spam_test(
            config(false),
            localhost(),
            FakeTransport::processed("Yes, score=8.3 required=5.0"),
        );

        let results = test.run(&data).await;
        assert_eq!(results.len(), 1);

        let result = results.iter().next().unwrap();
        assert_eq!(result.test_name(), TEST_NAME);
        assert_eq!(result.outcome(), SpamTestOutcome::Fail);
        assert_eq!(result.score(), 5);
        assert_eq!(result.reason(), SPAM_REASON);
        assert!(reporter.codes().is_empty());
    }

    #[tokio::test]
    async fn test_spam_with_merged_score() {
        let dir = TempDir::new().unwrap();
        let data = test_data(&dir).await;
        let (test, _) = spam_test(
            config(true),
            localhost(),
            FakeTransport::processed("Yes, score=8.3 required=5.0"),
        );

        let results = test.run(&data).await;
        assert_eq!(results.total_score(), 8);
    }

    #[tokio::test]
    async fn test_processed_message_replaces_stored_copy() {
        let dir = TempDir::new().unwrap();
        let data = test_data(&dir).await;
        let (test, _) = spam_test(
            config(false),
            localhost(),
            FakeTransport::processed("No, score=0.2 required=5.0"),
        );

        let results = test.run(&data).await;
        assert!(results.is_empty());

        let stored = data.message().read().await.unwrap();
        assert!(stored.starts_with(b"X-Spam-Status: No"));
        assert_eq!(
            data.field_value(SPAM_STATUS_HEADER).await.as_deref(),
            Some("No, score=0.2 required=5.0")
        );
    }

    #[tokio::test]
    async fn test_unresolved_host_reports_and_aborts() {
        let dir = TempDir::new().unwrap();
        let data = test_data(&dir).await;
        let (test, reporter) = spam_test(
            config(false),
            Vec::new(),
            FakeTransport::processed("Yes, score=8.3 required=5.0"),
        );

        assert!(test.run(&data).await.is_empty());
        assert_eq!(reporter.codes(), vec![ERROR_UNRESOLVED]);

        // Message untouched
        assert_eq!(data.message().read().await.unwrap(), MESSAGE.to_vec());
    }

    #[tokio::test]
    async fn test_connect_failure_reports_not_completed() {
        let dir = TempDir::new().unwrap();
        let data = test_data(&dir).await;
        let (test, reporter) = spam_test(config(false), localhost(), FakeTransport::Refuse);

        assert!(test.run(&data).await.is_empty());
        assert_eq!(reporter.codes(), vec![ERROR_NOT_COMPLETED]);
    }

    #[tokio::test]
    async fn test_engine_error_reports_not_completed() {
        let dir = TempDir::new().unwrap();
        let data = test_data(&dir).await;
        let (test, reporter) = spam_test(
            config(false),
            localhost(),
            FakeTransport::Respond(b"SPAMD/1.0 74 EX_NOHOST\r\n".to_vec()),
        );

        assert!(test.run(&data).await.is_empty());
        let reports = reporter.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, Severity::High);
        assert_eq!(reports[0].1, ERROR_NOT_COMPLETED);
        assert!(reports[0].2.starts_with("The SpamAssassin tests did not complete."));
    }

    #[tokio::test]
    async fn test_oversized_message_skipped() {
        let dir = TempDir::new().unwrap();
        let data = test_data(&dir).await;
        let config = config(false);
        config.write().unwrap().max_message_size = 4;
        let (test, reporter) = spam_test(
            config,
            Vec::new(),
            FakeTransport::processed("Yes, score=8.3 required=5.0"),
        );

        assert!(test.run(&data).await.is_empty());
        assert!(reporter.codes().is_empty());
    }

    #[test]
    fn test_enabled_follows_shared_config() {
        let config = config(false);
        let (test, _) = spam_test(config.clone(), localhost(), FakeTransport::Refuse);

        assert_eq!(test.name(), TEST_NAME);
        assert!(test.is_enabled());
        config.write().unwrap().enabled = false;
        assert!(!test.is_enabled());
    }
}
