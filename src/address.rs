//! Redis node addresses.
//!
//! A [`RedisUri`] is the `{scheme, host, port}` triple every topology
//! structure is keyed by. IPv6 hosts are normalized to the canonical
//! compressed form at construction so that equality is byte-exact across
//! the different spellings of the same address.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{Error, Result};

/// Classification of the host part of a [`RedisUri`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Ipv4,
    Ipv6,
    Hostname,
}

/// A `scheme://host:port` node address.
///
/// Equality and hashing compare the normalized scheme/host/port bytes, so
/// `[2001:db8::1]:6379` and `[2001:0db8:0000::1]:6379` are the same URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RedisUri {
    scheme: String,
    host: String,
    port: u16,
}

impl RedisUri {
    /// Build a URI from parts. IPv6 hosts (bracketed or not) are rewritten
    /// to their canonical compressed form.
    pub fn new(scheme: &str, host: &str, port: u16) -> Self {
        Self {
            scheme: scheme.to_string(),
            host: normalize_host(host),
            port,
        }
    }

    /// Parse a `scheme://host:port` string. IPv6 hosts must be bracketed.
    pub fn parse(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::InvalidUri(s.to_string()))?;
        if scheme.is_empty() || rest.is_empty() {
            return Err(Error::InvalidUri(s.to_string()));
        }

        let (host, port_str) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| Error::InvalidUri(s.to_string()))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| Error::InvalidUri(s.to_string()))?;
            (host, port)
        } else {
            rest.rsplit_once(':')
                .ok_or_else(|| Error::InvalidUri(s.to_string()))?
        };

        if host.is_empty() {
            return Err(Error::InvalidUri(s.to_string()));
        }
        let port: u16 = port_str
            .parse()
            .map_err(|_| Error::InvalidUri(s.to_string()))?;

        Ok(Self::new(scheme, host, port))
    }

    /// Build a URI from a resolved socket address.
    pub fn from_addr(scheme: &str, addr: SocketAddr) -> Self {
        Self::new(scheme, &addr.ip().to_string(), addr.port())
    }

    #[inline]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Classify the host as a literal IPv4/IPv6 address or a hostname.
    pub fn host_kind(&self) -> HostKind {
        if self.host.parse::<Ipv4Addr>().is_ok() {
            HostKind::Ipv4
        } else if self.host.parse::<Ipv6Addr>().is_ok() {
            HostKind::Ipv6
        } else {
            HostKind::Hostname
        }
    }

    /// Whether the host is a literal IP address.
    #[inline]
    pub fn is_ip(&self) -> bool {
        self.host_kind() != HostKind::Hostname
    }

    /// The literal IP of the host, if it is one.
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// Socket address for a literal-IP URI.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.ip().map(|ip| SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for RedisUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host_kind() == HostKind::Ipv6 {
            write!(f, "{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

/// IPv6 literals round-trip through `Ipv6Addr` so every spelling collapses
/// to the RFC 5952 compressed form. Everything else is kept verbatim.
fn normalize_host(host: &str) -> String {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(v6) = host.parse::<Ipv6Addr>() {
        return v6.to_string();
    }
    host.to_string()
}

/// User-supplied URI rewrite applied at every address boundary, for
/// deployments behind NAT or port forwarding. Identity by default.
pub trait NatMapper: Send + Sync {
    fn map(&self, uri: &RedisUri) -> RedisUri;
}

/// The default no-op mapping.
pub struct IdentityNatMapper;

impl NatMapper for IdentityNatMapper {
    fn map(&self, uri: &RedisUri) -> RedisUri {
        uri.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        let uri = RedisUri::parse("redis://10.0.0.1:6379").unwrap();
        assert_eq!(uri.scheme(), "redis");
        assert_eq!(uri.host(), "10.0.0.1");
        assert_eq!(uri.port(), 6379);
        assert_eq!(uri.host_kind(), HostKind::Ipv4);
        assert!(uri.is_ip());
    }

    #[test]
    fn test_parse_hostname() {
        let uri = RedisUri::parse("rediss://replica.example.com:6380").unwrap();
        assert_eq!(uri.host_kind(), HostKind::Hostname);
        assert!(!uri.is_ip());
        assert_eq!(uri.to_string(), "rediss://replica.example.com:6380");
    }

    #[test]
    fn test_parse_ipv6_normalizes() {
        let a = RedisUri::parse("redis://[2001:db8::1]:6379").unwrap();
        let b = RedisUri::parse("redis://[2001:0db8:0000::1]:6379").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.host(), "2001:db8::1");
        assert_eq!(a.host_kind(), HostKind::Ipv6);
        assert_eq!(a.to_string(), "redis://[2001:db8::1]:6379");
    }

    #[test]
    fn test_display_parse_round_trip() {
        for s in [
            "redis://127.0.0.1:6379",
            "redis://master.example.com:6379",
            "rediss://[2001:db8::1]:26379",
        ] {
            let uri = RedisUri::parse(s).unwrap();
            let reparsed = RedisUri::parse(&uri.to_string()).unwrap();
            assert_eq!(uri, reparsed);
            let mapped = IdentityNatMapper.map(&reparsed);
            assert_eq!(uri, mapped);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RedisUri::parse("no-scheme:6379").is_err());
        assert!(RedisUri::parse("redis://").is_err());
        assert!(RedisUri::parse("redis://host").is_err());
        assert!(RedisUri::parse("redis://host:notaport").is_err());
        assert!(RedisUri::parse("redis://[2001:db8::1:6379").is_err());
        assert!(RedisUri::parse("redis://:6379").is_err());
    }

    #[test]
    fn test_from_addr() {
        let addr: SocketAddr = "10.0.0.2:6379".parse().unwrap();
        let uri = RedisUri::from_addr("redis", addr);
        assert_eq!(uri.to_string(), "redis://10.0.0.2:6379");
        assert_eq!(uri.socket_addr(), Some(addr));
    }

    #[test]
    fn test_nat_mapper() {
        struct PortShift;
        impl NatMapper for PortShift {
            fn map(&self, uri: &RedisUri) -> RedisUri {
                RedisUri::new(uri.scheme(), "203.0.113.10", uri.port() + 1000)
            }
        }

        let uri = RedisUri::parse("redis://10.0.0.1:6379").unwrap();
        let mapped = PortShift.map(&uri);
        assert_eq!(mapped.to_string(), "redis://203.0.113.10:7379");
        // original retained as declared key
        assert_eq!(uri.host(), "10.0.0.1");
    }
}
