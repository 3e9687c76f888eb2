//! Spamgate Core - anti-spam test engine
//!
//! This crate provides the pluggable anti-spam test contract, the SpamAssassin
//! test that scans messages through spamd, and the networking underneath it:
//! address resolution, the connection transport and the completion signal.

pub mod antispam;
pub mod net;
pub mod spamd;

pub use antispam::{
    ConnectionTestError, ConnectionTestReport, ErrorReporter, SharedSpamAssassinConfig,
    SpamAssassinTestConnect, SpamTest, SpamTestData, SpamTestOutcome, SpamTestResult,
    SpamTestResultSet, SpamTestSpamAssassin, SpamTestSuite, TracingReporter,
};
pub use net::{
    AddressResolver, CompletionSignal, ConfiguredTransport, DnsResolver, TokioTransport, Transport,
};
pub use spamd::{MemoryMessage, ScanSession, ScanTarget};
