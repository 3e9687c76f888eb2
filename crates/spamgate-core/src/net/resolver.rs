//! Host name resolution for the spamd connection

use async_trait::async_trait;
use std::net::IpAddr;
use tracing::{debug, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Resolves a host name to its addresses
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// All addresses for `host`, in resolver order. Empty when the host
    /// cannot be resolved.
    async fn resolve(&self, host: &str) -> Vec<IpAddr>;
}

/// DNS-backed resolver
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    /// Create a resolver that queries the built-in public upstreams. Most
    /// callers want [`system`](Self::system) instead, which honours the
    /// host's resolver and hosts file.
    pub fn new() -> Self {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self { resolver }
    }

    /// Create a resolver from the system configuration (`/etc/resolv.conf`)
    pub fn from_system_conf() -> anyhow::Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
        Ok(Self { resolver })
    }

    /// Resolver from the system configuration, or the built-in upstreams if
    /// that cannot be read
    pub fn system() -> Self {
        match Self::from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                warn!(error = %e, "Cannot read system resolver configuration, using defaults");
                Self::new()
            }
        }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::system()
    }
}

#[async_trait]
impl AddressResolver for DnsResolver {
    async fn resolve(&self, host: &str) -> Vec<IpAddr> {
        let host = host.trim();
        if host.is_empty() {
            return Vec::new();
        }

        // Literal addresses need no lookup
        if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
            return vec![ip];
        }

        match self.resolver.lookup_ip(host).await {
            Ok(lookup) => {
                let addresses: Vec<IpAddr> = lookup.iter().collect();
                debug!(host = %host, count = addresses.len(), "Resolved host");
                addresses
            }
            Err(e) => {
                warn!(host = %host, error = %e, "Failed to resolve host");
                Vec::new()
            }
        }
    }
}
