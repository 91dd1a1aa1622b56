//! SSRF guard: URL validation against allow/block lists and private ranges.
//!
//! Check order per request:
//! 1. host literally present in the block list -> reject
//! 2. host resolves to an address inside a blocked CIDR -> reject
//! 3. allow list non-empty and host does not match it -> reject
//! 4. no allow list: reject hosts resolving to RFC1918, loopback,
//!    link-local (including the cloud metadata endpoint), or the IPv6
//!    equivalents (`::1/128`, `fe80::/10`)
//!
//! Host patterns support exact match and a single leading `*.` wildcard.

use std::net::IpAddr;

use maestro_types::error::EngineError;
use url::Url;

// ---------------------------------------------------------------------------
// CIDR
// ---------------------------------------------------------------------------

/// A parsed CIDR block from the block list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Parse `"10.0.0.0/8"` / `"fe80::/10"` notation.
    pub fn parse(s: &str) -> Option<Self> {
        let (addr, prefix) = s.split_once('/')?;
        let network: IpAddr = addr.parse().ok()?;
        let prefix: u8 = prefix.parse().ok()?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        (prefix <= max).then_some(Self { network, prefix })
    }

    /// Whether `ip` falls inside this block. Mixed address families never
    /// match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix)
                };
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix)
                };
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// UrlGuard
// ---------------------------------------------------------------------------

/// Validates outbound URLs before the HTTP executor touches the network.
#[derive(Debug, Clone, Default)]
pub struct UrlGuard {
    allowed: Vec<String>,
    blocked_hosts: Vec<String>,
    blocked_cidrs: Vec<Cidr>,
}

impl UrlGuard {
    /// Build a guard from configured allow and block lists. Block-list
    /// entries containing `/` are parsed as CIDRs; the rest are literal
    /// hosts. Unparseable CIDR entries are logged and ignored.
    pub fn new(allowed_hosts: &[String], blocked_hosts: &[String]) -> Self {
        let mut literal = Vec::new();
        let mut cidrs = Vec::new();
        for entry in blocked_hosts {
            if entry.contains('/') {
                match Cidr::parse(entry) {
                    Some(cidr) => cidrs.push(cidr),
                    None => tracing::warn!(entry, "ignoring unparseable blocked-host CIDR"),
                }
            } else {
                literal.push(entry.to_ascii_lowercase());
            }
        }
        Self {
            allowed: allowed_hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
            blocked_hosts: literal,
            blocked_cidrs: cidrs,
        }
    }

    /// Validate a URL. Returns an `ssrf` error naming the offending host on
    /// rejection.
    pub async fn check(&self, url: &Url) -> Result<(), EngineError> {
        let host = url
            .host_str()
            .ok_or_else(|| EngineError::validation(format!("URL '{url}' has no host")))?
            .to_ascii_lowercase();

        if self.blocked_hosts.iter().any(|b| *b == host) {
            return Err(EngineError::ssrf(format!("host '{host}' is blocked")));
        }

        if !self.blocked_cidrs.is_empty() {
            for ip in resolve_host(&host).await? {
                if let Some(cidr) = self.blocked_cidrs.iter().find(|c| c.contains(ip)) {
                    return Err(EngineError::ssrf(format!(
                        "host '{host}' resolves to {ip}, inside blocked range {}/{}",
                        cidr.network, cidr.prefix
                    )));
                }
            }
        }

        if !self.allowed.is_empty() {
            if !self.allowed.iter().any(|p| host_matches(p, &host)) {
                return Err(EngineError::ssrf(format!(
                    "host '{host}' is not in the allow list"
                )));
            }
            return Ok(());
        }

        for ip in resolve_host(&host).await? {
            if is_disallowed_ip(ip) {
                return Err(EngineError::ssrf(format!(
                    "host '{host}' resolves to {ip}, a private or reserved address"
                )));
            }
        }

        Ok(())
    }
}

/// Match a host against a pattern: exact, or a single leading `*.` wildcard
/// matching any subdomain (not the apex).
pub fn host_matches(pattern: &str, host: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        host.len() > suffix.len() + 1 && host.ends_with(suffix)
            && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
    } else {
        pattern == host
    }
}

/// Whether an address belongs to a range the default policy refuses:
/// RFC1918, loopback, link-local, or the IPv6 equivalents.
pub fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_disallowed_ip(IpAddr::V4(mapped));
            }
            v6.is_loopback() || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Resolve a host to addresses. IP literals short-circuit without DNS.
async fn resolve_host(host: &str) -> Result<Vec<IpAddr>, EngineError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    let addrs = tokio::net::lookup_host((host, 443))
        .await
        .map_err(|e| EngineError::connection(format!("failed to resolve host '{host}': {e}")))?;
    Ok(addrs.map(|a| a.ip()).collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_types::config::default_blocked_hosts;
    use maestro_types::error::ErrorKind;

    fn default_guard() -> UrlGuard {
        UrlGuard::new(&[], &default_blocked_hosts())
    }

    // -------------------------------------------------------------------
    // Cidr
    // -------------------------------------------------------------------

    #[test]
    fn test_cidr_parse_and_contains_v4() {
        let cidr = Cidr::parse("10.0.0.0/8").unwrap();
        assert!(cidr.contains("10.1.2.3".parse().unwrap()));
        assert!(!cidr.contains("11.0.0.1".parse().unwrap()));

        let cidr = Cidr::parse("172.16.0.0/12").unwrap();
        assert!(cidr.contains("172.31.255.255".parse().unwrap()));
        assert!(!cidr.contains("172.32.0.0".parse().unwrap()));
    }

    #[test]
    fn test_cidr_parse_and_contains_v6() {
        let cidr = Cidr::parse("fe80::/10").unwrap();
        assert!(cidr.contains("fe80::1".parse().unwrap()));
        assert!(!cidr.contains("2001:db8::1".parse().unwrap()));

        let loopback = Cidr::parse("::1/128").unwrap();
        assert!(loopback.contains("::1".parse().unwrap()));
        assert!(!loopback.contains("::2".parse().unwrap()));
    }

    #[test]
    fn test_cidr_rejects_garbage() {
        assert!(Cidr::parse("not-a-cidr").is_none());
        assert!(Cidr::parse("10.0.0.0/33").is_none());
        assert!(Cidr::parse("10.0.0.0").is_none());
    }

    #[test]
    fn test_cidr_mixed_families_never_match() {
        let cidr = Cidr::parse("10.0.0.0/8").unwrap();
        assert!(!cidr.contains("::1".parse().unwrap()));
    }

    // -------------------------------------------------------------------
    // Host patterns
    // -------------------------------------------------------------------

    #[test]
    fn test_host_matches_exact_and_wildcard() {
        assert!(host_matches("api.github.com", "api.github.com"));
        assert!(!host_matches("api.github.com", "github.com"));
        assert!(host_matches("*.github.com", "api.github.com"));
        assert!(host_matches("*.github.com", "a.b.github.com"));
        assert!(!host_matches("*.github.com", "github.com"));
        assert!(!host_matches("*.github.com", "evilgithub.com"));
    }

    // -------------------------------------------------------------------
    // IP classification
    // -------------------------------------------------------------------

    #[test]
    fn test_disallowed_ranges() {
        for ip in [
            "10.1.2.3",
            "172.16.9.9",
            "192.168.1.1",
            "127.0.0.1",
            "169.254.169.254",
            "::1",
            "fe80::1234",
        ] {
            assert!(is_disallowed_ip(ip.parse().unwrap()), "{ip}");
        }
        for ip in ["8.8.8.8", "140.82.112.3", "2606:4700::1"] {
            assert!(!is_disallowed_ip(ip.parse().unwrap()), "{ip}");
        }
    }

    #[test]
    fn test_v4_mapped_v6_classified_as_v4() {
        assert!(is_disallowed_ip("::ffff:192.168.0.1".parse().unwrap()));
        assert!(!is_disallowed_ip("::ffff:8.8.8.8".parse().unwrap()));
    }

    // -------------------------------------------------------------------
    // Guard
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_metadata_endpoint_blocked() {
        let guard = default_guard();
        let url = Url::parse("http://169.254.169.254/latest/meta-data").unwrap();
        let err = guard.check(&url).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Ssrf);
        assert!(err.message.contains("169.254.169.254"));
    }

    #[tokio::test]
    async fn test_loopback_ip_blocked_by_default() {
        let guard = default_guard();
        let url = Url::parse("http://127.0.0.1:8080/admin").unwrap();
        let err = guard.check(&url).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Ssrf);
    }

    #[tokio::test]
    async fn test_private_range_blocked_without_any_lists() {
        // Even with an empty block list, private resolution is refused.
        let guard = UrlGuard::new(&[], &[]);
        let url = Url::parse("http://192.168.0.10/").unwrap();
        let err = guard.check(&url).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Ssrf);
        assert!(err.message.contains("192.168.0.10"));
    }

    #[tokio::test]
    async fn test_allow_list_restricts_hosts() {
        let guard = UrlGuard::new(
            &["api.github.com".to_string(), "*.example.com".to_string()],
            &[],
        );
        let ok = Url::parse("https://api.github.com/repos").unwrap();
        assert!(guard.check(&ok).await.is_ok());
        let ok = Url::parse("https://sub.example.com/x").unwrap();
        assert!(guard.check(&ok).await.is_ok());

        let bad = Url::parse("https://api.gitlab.com/repos").unwrap();
        let err = guard.check(&bad).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Ssrf);
        assert!(err.message.contains("allow list"));
    }

    #[tokio::test]
    async fn test_literal_block_beats_allow_list() {
        let guard = UrlGuard::new(
            &["internal.evil".to_string()],
            &["internal.evil".to_string()],
        );
        let url = Url::parse("http://internal.evil/").unwrap();
        let err = guard.check(&url).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Ssrf);
        assert!(err.message.contains("blocked"));
    }

    #[tokio::test]
    async fn test_public_ip_allowed_by_default() {
        let guard = default_guard();
        let url = Url::parse("https://8.8.8.8/resolve").unwrap();
        assert!(guard.check(&url).await.is_ok());
    }
}
