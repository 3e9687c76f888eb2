//! One spamd scan exchange
//!
//! A [`ScanSession`] is created by the test, handed to a
//! [`Transport`](crate::net::Transport) and from then on owned by the
//! transport alone. The test keeps only the [`CompletionSignal`].

use super::protocol::{build_request, parse_response, ProtocolError};
use crate::net::signal::{completion_channel, Completer, CompletionSignal};
use async_trait::async_trait;
use spamgate_common::Result;
use spamgate_storage::StoredMessage;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Response bytes allowed on top of twice the message size
const RESPONSE_OVERHEAD: usize = 1024 * 1024;

/// Message a session scans and writes the processed copy back to
#[async_trait]
pub trait ScanTarget: Send + Sync + 'static {
    /// Short description used in logs
    fn describe(&self) -> String;

    /// Read the message to scan
    async fn load(&self) -> Result<Vec<u8>>;

    /// Replace the message with the copy processed by spamd
    async fn store_scanned(&self, data: &[u8]) -> Result<()>;
}

#[async_trait]
impl ScanTarget for StoredMessage {
    fn describe(&self) -> String {
        self.path().to_string()
    }

    async fn load(&self) -> Result<Vec<u8>> {
        self.read().await
    }

    async fn store_scanned(&self, data: &[u8]) -> Result<()> {
        self.replace(data).await
    }
}

/// In-memory message; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct MemoryMessage {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemoryMessage {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data.into())),
        }
    }

    /// Current contents
    pub fn contents(&self) -> Vec<u8> {
        match self.data.lock() {
            Ok(data) => data.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_contents(&self, contents: &[u8]) {
        let mut data = match self.data.lock() {
            Ok(data) => data,
            Err(poisoned) => poisoned.into_inner(),
        };
        *data = contents.to_vec();
    }
}

#[async_trait]
impl ScanTarget for MemoryMessage {
    fn describe(&self) -> String {
        "<memory>".to_string()
    }

    async fn load(&self) -> Result<Vec<u8>> {
        Ok(self.contents())
    }

    async fn store_scanned(&self, data: &[u8]) -> Result<()> {
        self.set_contents(data);
        Ok(())
    }
}

/// A single in-flight spamd exchange
pub struct ScanSession {
    target: Box<dyn ScanTarget>,
    user: Option<String>,
    completer: Completer,
}

impl ScanSession {
    /// Create a session and the signal that reports its outcome
    pub fn new(target: impl ScanTarget, user: Option<String>) -> (Self, CompletionSignal) {
        let (completer, signal) = completion_channel();
        let session = Self {
            target: Box::new(target),
            user,
            completer,
        };
        (session, signal)
    }

    /// Drive the exchange on a connected stream and fire the completion
    /// signal. Consumes the session.
    pub async fn run<S>(self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Self {
            target,
            user,
            completer,
        } = self;

        if completer.is_abandoned() {
            debug!(message = %target.describe(), "Scan abandoned before the exchange started");
            completer.complete(false);
            return;
        }

        match exchange(target.as_ref(), user.as_deref(), &completer, stream).await {
            Ok(()) => {
                debug!(message = %target.describe(), "spamd exchange completed");
                completer.complete(true);
            }
            Err(e) => {
                warn!(message = %target.describe(), error = %e, "spamd exchange failed");
                completer.complete(false);
            }
        }
    }
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("target", &self.target.describe())
            .field("user", &self.user)
            .finish()
    }
}

async fn exchange<S>(
    target: &dyn ScanTarget,
    user: Option<&str>,
    completer: &Completer,
    mut stream: S,
) -> std::result::Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let message = target.load().await?;
    let request = build_request(&message, user);

    debug!(bytes = request.len(), "Sending PROCESS request to spamd");
    stream.write_all(&request).await?;
    stream.flush().await?;
    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "Failed to half-close spamd connection");
    }

    let limit = message
        .len()
        .saturating_mul(2)
        .saturating_add(RESPONSE_OVERHEAD);
    // One byte past the limit tells a full-size response from a cut-off one
    let mut raw = Vec::new();
    (&mut stream)
        .take(limit as u64 + 1)
        .read_to_end(&mut raw)
        .await?;
    if raw.len() > limit {
        return Err(ProtocolError::ResponseTooLarge { limit });
    }
    debug!(bytes = raw.len(), "Received spamd response");

    let response = parse_response(&raw)?;
    if !completer.claim() {
        return Err(ProtocolError::Abandoned);
    }
    target.store_scanned(response.body()).await?;

    Ok(())
}
