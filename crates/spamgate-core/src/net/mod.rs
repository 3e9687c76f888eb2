//! Networking for scanning engines: resolution, transport and completion

pub mod resolver;
pub mod signal;
pub mod tls;
pub mod transport;

pub use resolver::{AddressResolver, DnsResolver};
pub use signal::{completion_channel, Completer, CompletionSignal};
pub use transport::{
    ConfiguredTransport, ConnectError, TokioTransport, Transport, TransportError,
};
