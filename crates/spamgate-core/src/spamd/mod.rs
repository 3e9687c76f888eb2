//! spamd (SpamAssassin daemon) client

pub mod protocol;
pub mod session;

pub use protocol::{build_request, parse_response, ProtocolError, SpamdResponse};
pub use session::{MemoryMessage, ScanSession, ScanTarget};
