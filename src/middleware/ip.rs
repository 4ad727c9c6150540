//! Client identity resolution for rate limiting.
//!
//! # Trust Model
//!
//! `X-Forwarded-For` is attacker-controlled unless it was written by a proxy
//! we operate. The resolver therefore only reads it when the **direct peer**
//! is a configured trusted proxy:
//!
//! ```text
//! peer untrusted ──────────────────────────────► peer address (header ignored)
//! peer trusted ──► scan XFF right-to-left ──► first entry that is not a trusted proxy
//!                                         └─► every entry trusted / empty ──► peer address
//! ```
//!
//! Scanning from the right skips our own proxy chain and stops at the first
//! hop we did not add, so a client cannot pick its key by prepending entries.
//!
//! With no `TRUSTED_PROXIES` configured, forwarded headers are never read.
//!
//! # Key Semantics
//!
//! The result is an opaque rate-limiting key. It is not validated as an IP:
//! a malformed peer address without a port is used verbatim, and requests
//! with no connection info at all share [`UNKNOWN_IP`].

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::{debug, warn};

/// Key used when the connection carries no peer address.
pub const UNKNOWN_IP: &str = "unknown";

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Resolved client key, attached to the request as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    /// Network address
    network: IpAddr,
    /// Prefix length (e.g., 24 for /24)
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// A bare address is treated as a single-host range. Returns `None` if
    /// the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let (addr, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr, None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            // IPv4 and IPv6 don't match
            _ => false,
        }
    }
}

/// The set of reverse proxies whose forwarded headers are believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Build from IP / CIDR strings. Invalid entries are logged and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges configured");
        }

        Self { ranges }
    }

    /// Whether any trusted proxy is configured.
    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Whether `ip_str` is a trusted proxy. Unparseable input and an empty
    /// configuration are never trusted.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`, as reported by a
    /// dual-stack listener) match IPv4 ranges.
    pub fn is_trusted(&self, ip_str: &str) -> bool {
        match ip_str.trim().parse::<IpAddr>() {
            Ok(ip) => {
                let ip = ip.to_canonical();
                self.ranges.iter().any(|range| range.contains(&ip))
            }
            Err(_) => false,
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Strip the port from a peer address; anything unparseable is kept verbatim.
fn peer_ip(remote_addr: &str) -> &str {
    match remote_addr.parse::<SocketAddr>() {
        Ok(_) => match remote_addr.rsplit_once(':') {
            // "[::1]:8080" -> "::1", "1.2.3.4:80" -> "1.2.3.4"
            Some((host, _)) => host.trim_start_matches('[').trim_end_matches(']'),
            None => remote_addr,
        },
        Err(_) => remote_addr,
    }
}

/// Resolve the rate-limiting key for one request.
///
/// * `remote_addr` - direct peer, usually `ip:port`
/// * `trusted` - configured trusted proxies
/// * `forwarded_for` - raw `X-Forwarded-For` value(s), comma-separated
pub fn resolve_client_ip(
    remote_addr: &str,
    trusted: &TrustedProxyConfig,
    forwarded_for: Option<&str>,
) -> String {
    let peer = peer_ip(remote_addr);

    if !trusted.is_trusted(peer) {
        return peer.to_string();
    }

    forwarded_for
        .into_iter()
        .flat_map(|value| value.rsplit(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .find(|entry| !trusted.is_trusted(entry))
        .unwrap_or(peer)
        .to_string()
}

/// Resolve the client key for a request using its `ConnectInfo` and headers.
pub fn client_ip_from_request<B>(req: &Request<B>, trusted: &TrustedProxyConfig) -> String {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());

    // Multiple header lines are one logical comma-separated list.
    let forwarded: Vec<&str> = req
        .headers()
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let forwarded = (!forwarded.is_empty()).then(|| forwarded.join(","));

    resolve_client_ip(
        remote.as_deref().unwrap_or(UNKNOWN_IP),
        trusted,
        forwarded.as_deref(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn trusted(ranges: &[&str]) -> TrustedProxyConfig {
        TrustedProxyConfig::new(&ranges.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_untrusted_peer_ignores_forwarded_header() {
        let config = trusted(&["172.16.0.0/12"]);
        assert_eq!(
            resolve_client_ip("203.0.113.5:40000", &config, Some("10.0.0.1")),
            "203.0.113.5"
        );
    }

    #[test]
    fn test_trusted_peer_uses_first_untrusted_from_right() {
        let config = trusted(&["172.16.0.1"]);
        assert_eq!(
            resolve_client_ip("172.16.0.1:443", &config, Some("203.0.113.50, 172.16.0.1")),
            "203.0.113.50"
        );
    }

    #[test]
    fn test_spoofed_leftmost_entry_is_not_used() {
        let config = trusted(&["10.0.0.0/8"]);
        // Client prepended 1.1.1.1; the proxy appended the real address.
        assert_eq!(
            resolve_client_ip("10.0.0.2:80", &config, Some("1.1.1.1, 198.51.100.7, 10.0.0.3")),
            "198.51.100.7"
        );
    }

    #[test]
    fn test_all_trusted_falls_back_to_peer() {
        let config = trusted(&["10.0.0.0/8"]);
        assert_eq!(
            resolve_client_ip("10.0.0.2:80", &config, Some("10.0.0.9, 10.0.0.3")),
            "10.0.0.2"
        );
        assert_eq!(resolve_client_ip("10.0.0.2:80", &config, Some("")), "10.0.0.2");
        assert_eq!(resolve_client_ip("10.0.0.2:80", &config, None), "10.0.0.2");
    }

    #[test]
    fn test_empty_config_trusts_nobody() {
        let config = TrustedProxyConfig::new(&[]);
        assert!(!config.is_enabled());
        assert!(!config.is_trusted("127.0.0.1"));
        assert_eq!(
            resolve_client_ip("127.0.0.1:9000", &config, Some("203.0.113.9")),
            "127.0.0.1"
        );
    }

    #[test]
    fn test_peer_without_port_used_verbatim() {
        let config = TrustedProxyConfig::default();
        assert_eq!(resolve_client_ip("203.0.113.5", &config, None), "203.0.113.5");
        assert_eq!(resolve_client_ip("not-an-addr", &config, None), "not-an-addr");
    }

    #[test]
    fn test_ipv6_peer_port_stripped() {
        let config = TrustedProxyConfig::default();
        assert_eq!(resolve_client_ip("[2001:db8::1]:8080", &config, None), "2001:db8::1");
    }

    #[test]
    fn test_ipv4_mapped_peer_matches_ipv4_range() {
        let config = trusted(&["172.16.0.0/12"]);
        assert!(config.is_trusted("::ffff:172.16.0.1"));
        assert_eq!(
            resolve_client_ip("[::ffff:172.16.0.1]:443", &config, Some("203.0.113.50")),
            "203.0.113.50"
        );
        assert_eq!(
            resolve_client_ip(
                "[::ffff:172.16.0.1]:443",
                &config,
                Some("198.51.100.7, ::ffff:172.16.0.2")
            ),
            "198.51.100.7"
        );
    }

    #[test]
    fn test_request_without_connect_info_is_unknown() {
        let req = Request::builder()
            .header(X_FORWARDED_FOR, "203.0.113.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            client_ip_from_request(&req, &TrustedProxyConfig::default()),
            UNKNOWN_IP
        );
    }

    #[test]
    fn test_request_with_connect_info() {
        let mut req = Request::builder()
            .header(X_FORWARDED_FOR, "203.0.113.50")
            .header(X_FORWARDED_FOR, "172.16.0.9")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([172, 16, 0, 1], 443))));

        let config = trusted(&["172.16.0.0/12"]);
        assert_eq!(client_ip_from_request(&req, &config), "203.0.113.50");
    }

    // ==========================================================================
    // CIDR Range Tests
    // ==========================================================================

    #[test]
    fn test_cidr_parse() {
        assert_eq!(CidrRange::parse("10.0.0.0/8").unwrap().prefix_len, 8);
        assert_eq!(CidrRange::parse("::1/128").unwrap().prefix_len, 128);
        assert_eq!(CidrRange::parse("192.168.1.1").unwrap().prefix_len, 32);
        assert!(CidrRange::parse("not-an-ip").is_none());
        assert!(CidrRange::parse("10.0.0.0/33").is_none());
        assert!(CidrRange::parse("10.0.0.0/").is_none());
    }

    #[test]
    fn test_cidr_contains() {
        let cidr = CidrRange::parse("10.0.0.0/8").unwrap();
        assert!(cidr.contains(&"10.255.255.255".parse().unwrap()));
        assert!(!cidr.contains(&"11.0.0.1".parse().unwrap()));
        assert!(!cidr.contains(&"::1".parse().unwrap()));

        let everything = CidrRange::parse("0.0.0.0/0").unwrap();
        assert!(everything.contains(&"8.8.8.8".parse().unwrap()));
    }
}
