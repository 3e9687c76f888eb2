//! SpamAssassin connectivity check
//!
//! Sends the GTUBE test message through the same session and transport the
//! real test uses and reports what spamd said about it.

use super::spamassassin::{snapshot, SharedSpamAssassinConfig};
use super::verdict::{is_spam_status, parse_spamassassin_score, SPAM_STATUS_HEADER};
use crate::net::{AddressResolver, Transport, TransportError};
use crate::spamd::{MemoryMessage, ScanSession};
use serde::Serialize;
use spamgate_storage::parse_headers;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Generic test for unsolicited bulk email. Any SpamAssassin install scores
/// it as spam.
pub const GTUBE_MESSAGE: &str = "Subject: Test spam mail (GTUBE)\r\n\
Message-ID: <GTUBE1.1010101@example.net>\r\n\
Date: Wed, 23 Jul 2003 23:30:00 +0200\r\n\
From: Sender <sender@example.net>\r\n\
To: Recipient <recipient@example.net>\r\n\
Precedence: junk\r\n\
MIME-Version: 1.0\r\n\
Content-Type: text/plain; charset=us-ascii\r\n\
Content-Transfer-Encoding: 7bit\r\n\
\r\n\
This is the GTUBE, the\r\n\
\tGeneric\r\n\
\tTest for\r\n\
\tUnsolicited\r\n\
\tBulk\r\n\
\tEmail\r\n\
\r\n\
If your spam filter supports it, the GTUBE provides a test by which you\r\n\
can verify that the filter is installed correctly and is detecting incoming\r\n\
spam. You can send yourself a test mail containing the following string of\r\n\
characters (in upper case and with no white spaces and line breaks):\r\n\
\r\n\
XJS*C4JDBQADN1.NSBN3*2IDNEN*GTUBE-STANDARD-ANTI-UBE-TEST-EMAIL*C.34X\r\n\
\r\n\
You should send this test mail from an account outside of your network.\r\n";

#[derive(Debug, Error)]
pub enum ConnectionTestError {
    #[error("Could not resolve SpamAssassin host {0}")]
    Unresolved(String),

    #[error("Could not connect to SpamAssassin: {0}")]
    Connect(TransportError),

    #[error("SpamAssassin did not complete the test")]
    NotCompleted,

    #[error("Timed out after {0:?} waiting for SpamAssassin")]
    TimedOut(Duration),
}

/// Outcome of a connectivity check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionTestReport {
    pub resolved_address: IpAddr,
    pub completed: bool,
    pub is_spam: bool,
    pub score: i32,
    pub spam_status: Option<String>,
}

/// Runs a GTUBE scan against the configured spamd
pub struct SpamAssassinTestConnect;

impl SpamAssassinTestConnect {
    /// Resolve the configured host, scan the GTUBE message and report the
    /// verdict. The score is the engine's own score regardless of
    /// `merge_score`.
    pub async fn test_connect(
        config: &SharedSpamAssassinConfig,
        resolver: &dyn AddressResolver,
        transport: &dyn Transport,
    ) -> Result<ConnectionTestReport, ConnectionTestError> {
        let config = snapshot(config);

        let resolved_address = resolver
            .resolve(&config.host)
            .await
            .first()
            .copied()
            .ok_or_else(|| ConnectionTestError::Unresolved(config.host.clone()))?;

        info!(
            host = %config.host,
            address = %resolved_address,
            port = config.port,
            "Testing SpamAssassin connection"
        );

        let message = MemoryMessage::new(GTUBE_MESSAGE);
        let (session, signal) = ScanSession::new(message.clone(), config.user.clone());

        if let Err(e) = transport.connect(session, resolved_address, config.port) {
            let (_session, reason) = e.into_parts();
            return Err(ConnectionTestError::Connect(reason));
        }

        let completed = match config.wait_timeout_secs {
            Some(secs) => {
                let timeout = Duration::from_secs(secs);
                signal
                    .wait_or_abandon(timeout)
                    .await
                    .ok_or(ConnectionTestError::TimedOut(timeout))?
            }
            None => signal.wait().await,
        };

        if !completed {
            warn!(address = %resolved_address, port = config.port, "SpamAssassin connection test did not complete");
            return Err(ConnectionTestError::NotCompleted);
        }

        let headers = parse_headers(&message.contents());
        let spam_status = headers
            .into_iter()
            .find(|(name, _)| name == SPAM_STATUS_HEADER)
            .map(|(_, value)| value);

        let (is_spam, score) = match spam_status {
            Some(ref status) => (is_spam_status(status), parse_spamassassin_score(status)),
            None => (false, 0),
        };

        Ok(ConnectionTestReport {
            resolved_address,
            completed,
            is_spam,
            score,
            spam_status,
        })
    }
}
