//! Connection transport
//!
//! `connect` either starts an asynchronous connect and takes ownership of the
//! session, or fails right away and hands the session back.

use super::tls::{create_tls_connector, server_name};
use crate::antispam::spamassassin::{snapshot, SharedSpamAssassinConfig};
use crate::spamd::ScanSession;
use rustls::pki_types::ServerName;
use spamgate_common::config::{SpamAssassinConfig, SpamdTlsConfig};
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Reasons a connect could not be started
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid port: {0}")]
    InvalidPort(u16),

    #[error("Cannot connect to unspecified address {0}")]
    UnspecifiedAddress(IpAddr),

    #[error("No async runtime available to drive the connection")]
    NoRuntime,

    #[error("Transport setup failed: {0}")]
    Setup(String),
}

/// Synchronous connect failure. The caller gets the session back.
pub struct ConnectError {
    session: ScanSession,
    reason: TransportError,
}

impl ConnectError {
    pub fn new(session: ScanSession, reason: TransportError) -> Self {
        Self { session, reason }
    }

    /// Why the connect could not start
    pub fn reason(&self) -> &TransportError {
        &self.reason
    }

    /// Take back ownership of the session
    pub fn into_session(self) -> ScanSession {
        self.session
    }

    /// Split into the session and the failure reason
    pub fn into_parts(self) -> (ScanSession, TransportError) {
        (self.session, self.reason)
    }
}

impl std::fmt::Debug for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectError")
            .field("reason", &self.reason)
            .finish()
    }
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connect failed: {}", self.reason)
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason)
    }
}

/// Something that can connect a scan session to spamd and drive it
pub trait Transport: Send + Sync {
    /// Start connecting `session` to `address:port`.
    ///
    /// On `Ok` the transport owns the session and will fire its completion
    /// signal once the exchange ends, however it ends.
    fn connect(
        &self,
        session: ScanSession,
        address: IpAddr,
        port: u16,
    ) -> std::result::Result<(), ConnectError>;
}

#[derive(Clone)]
struct TlsSettings {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

/// Transport driving sessions on the tokio runtime
#[derive(Clone)]
pub struct TokioTransport {
    connect_timeout: Duration,
    tls: Option<TlsSettings>,
}

impl TokioTransport {
    /// Create a plain TCP transport
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            tls: None,
        }
    }

    /// Upgrade connections with TLS
    pub fn with_tls(mut self, connector: TlsConnector, server_name: ServerName<'static>) -> Self {
        self.tls = Some(TlsSettings {
            connector,
            server_name,
        });
        self
    }

    /// Create a transport from the SpamAssassin settings
    pub fn from_config(config: &SpamAssassinConfig) -> anyhow::Result<Self> {
        let transport = Self::new(Duration::from_secs(config.connect_timeout_secs));
        match config.tls {
            Some(ref tls_config) => {
                let connector = create_tls_connector(tls_config)?;
                let name = server_name(tls_config, &config.host)?;
                Ok(transport.with_tls(connector, name))
            }
            None => Ok(transport),
        }
    }

    /// Whether connections are upgraded with TLS
    pub fn uses_tls(&self) -> bool {
        self.tls.is_some()
    }
}

impl Transport for TokioTransport {
    fn connect(
        &self,
        session: ScanSession,
        address: IpAddr,
        port: u16,
    ) -> std::result::Result<(), ConnectError> {
        if port == 0 {
            return Err(ConnectError::new(session, TransportError::InvalidPort(port)));
        }
        if address.is_unspecified() {
            return Err(ConnectError::new(
                session,
                TransportError::UnspecifiedAddress(address),
            ));
        }
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return Err(ConnectError::new(session, TransportError::NoRuntime)),
        };

        let addr = SocketAddr::new(address, port);
        let connect_timeout = self.connect_timeout;
        let tls = self.tls.clone();

        debug!(address = %addr, tls = tls.is_some(), "Starting spamd connection");
        handle.spawn(drive(session, addr, connect_timeout, tls));

        Ok(())
    }
}

/// Settings a [`TokioTransport`] is built from
#[derive(Debug, Clone, PartialEq)]
struct ConnectionSettings {
    host: String,
    connect_timeout_secs: u64,
    tls: Option<SpamdTlsConfig>,
}

impl ConnectionSettings {
    fn of(config: &SpamAssassinConfig) -> Self {
        Self {
            host: config.host.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
            tls: config.tls.clone(),
        }
    }
}

struct BuiltTransport {
    settings: ConnectionSettings,
    transport: TokioTransport,
}

/// Tokio transport that follows the shared SpamAssassin settings.
///
/// Each connect reads the current settings; the TLS connector is rebuilt
/// only when the host, connect timeout or TLS settings changed.
pub struct ConfiguredTransport {
    config: SharedSpamAssassinConfig,
    built: Mutex<BuiltTransport>,
}

impl ConfiguredTransport {
    /// Fails if the current settings cannot produce a transport
    pub fn new(config: SharedSpamAssassinConfig) -> anyhow::Result<Self> {
        let current = snapshot(&config);
        let built = BuiltTransport {
            settings: ConnectionSettings::of(&current),
            transport: TokioTransport::from_config(&current)?,
        };
        Ok(Self {
            config,
            built: Mutex::new(built),
        })
    }

    /// Transport for the settings in effect right now. A failed rebuild
    /// keeps the previous transport cached and is retried next time.
    fn current(&self) -> Result<TokioTransport, TransportError> {
        let config = snapshot(&self.config);
        let settings = ConnectionSettings::of(&config);

        let mut built = match self.built.lock() {
            Ok(built) => built,
            Err(poisoned) => poisoned.into_inner(),
        };
        if built.settings != settings {
            let transport = TokioTransport::from_config(&config)
                .map_err(|e| TransportError::Setup(format!("{:#}", e)))?;
            debug!(
                host = %settings.host,
                tls = transport.uses_tls(),
                "spamd settings changed, rebuilt transport"
            );
            *built = BuiltTransport {
                settings,
                transport,
            };
        }
        Ok(built.transport.clone())
    }

    /// Whether connections made now would use TLS
    pub fn uses_tls(&self) -> Result<bool, TransportError> {
        self.current().map(|transport| transport.uses_tls())
    }
}

impl Transport for ConfiguredTransport {
    fn connect(
        &self,
        session: ScanSession,
        address: IpAddr,
        port: u16,
    ) -> std::result::Result<(), ConnectError> {
        match self.current() {
            Ok(transport) => transport.connect(session, address, port),
            Err(reason) => Err(ConnectError::new(session, reason)),
        }
    }
}

/// Connect and run the session. Returning early drops the session, which
/// fires its signal as not completed.
async fn drive(
    session: ScanSession,
    addr: SocketAddr,
    connect_timeout: Duration,
    tls: Option<TlsSettings>,
) {
    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(address = %addr, error = %e, "Failed to connect to spamd");
            return;
        }
        Err(_) => {
            warn!(address = %addr, "Timed out connecting to spamd");
            return;
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    match tls {
        Some(tls) => {
            let handshake = tls.connector.connect(tls.server_name, stream);
            match tokio::time::timeout(connect_timeout, handshake).await {
                Ok(Ok(tls_stream)) => session.run(tls_stream).await,
                Ok(Err(e)) => {
                    warn!(address = %addr, error = %e, "TLS handshake with spamd failed");
                }
                Err(_) => {
                    warn!(address = %addr, "Timed out during TLS handshake with spamd");
                }
            }
        }
        None => session.run(stream).await,
    }
}
