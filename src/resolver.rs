//! Async hostname resolution.
//!
//! The resolver is a seam: production uses [`DnsResolver`] over the system
//! resolver, tests inject scripted implementations. Failures are reported
//! per address and never abort a batch; callers log and skip.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;

/// Hostname to address resolution contract.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve a single address for `host:port`.
    async fn resolve_one(&self, host: &str, port: u16) -> io::Result<SocketAddr>;

    /// Resolve every address `host:port` currently maps to. Used by
    /// DNS-driven Sentinel discovery.
    async fn resolve_all(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// System resolver backed by `tokio::net::lookup_host`.
pub struct DnsResolver;

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve_one(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}"))
            })
    }

    async fn resolve_all(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}
