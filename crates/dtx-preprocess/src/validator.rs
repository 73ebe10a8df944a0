//! URL admission
//!
//! Rejects anything that could make the downloader reach an internal
//! service: non-http(s) schemes, embedded credentials, metadata host names,
//! numeric hosts, and any host that resolves to a private, loopback,
//! link-local or otherwise non-public address. Resolution happens here and
//! the resolved addresses travel with the [`ValidatedUrl`] so the download
//! connects to exactly what was checked.

use crate::error::ValidationError;
use async_trait::async_trait;
use dtx_core::ValidatorConfig;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use url::{Host, Url};

/// Host names rejected without resolution
const BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "metadata",
    "metadata.google.internal",
    "metadata.goog",
    "instance-data",
];

/// DNS seam
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `host` to socket addresses on `port`
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by the system (`getaddrinfo` via tokio)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

/// A URL that passed admission, with the addresses it was checked against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUrl {
    pub url: Url,
    /// Host as it appears in the URL (lowercase)
    pub host: String,
    /// Resolved addresses; the download must connect to one of these
    pub addrs: Vec<SocketAddr>,
    /// Whether the host is an IP literal
    pub literal: bool,
}

/// SSRF-resistant URL validator
#[derive(Clone)]
pub struct ImageValidator {
    config: ValidatorConfig,
    resolver: Arc<dyn Resolver>,
}

impl std::fmt::Debug for ImageValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageValidator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ImageValidator {
    /// Create validator using the system resolver
    #[must_use]
    pub fn new(config: ValidatorConfig) -> Self {
        Self::with_resolver(config, Arc::new(SystemResolver))
    }

    /// Create validator with a custom resolver
    #[must_use]
    pub fn with_resolver(config: ValidatorConfig, resolver: Arc<dyn Resolver>) -> Self {
        Self { config, resolver }
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate a URL string
    ///
    /// # Errors
    /// Returns the first [`ValidationError`] that applies.
    pub async fn validate(&self, raw: &str) -> Result<ValidatedUrl, ValidationError> {
        let raw = raw.trim();
        if raw.len() > self.config.max_url_length {
            return Err(ValidationError::TooLong {
                max: self.config.max_url_length,
            });
        }
        let url = Url::parse(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        self.validate_url(url).await
    }

    /// Validate an already-parsed URL (used for redirect targets)
    ///
    /// # Errors
    /// Returns the first [`ValidationError`] that applies.
    pub async fn validate_url(&self, url: Url) -> Result<ValidatedUrl, ValidationError> {
        let scheme = url.scheme().to_ascii_lowercase();
        if !self
            .config
            .allowed_schemes
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&scheme))
        {
            return Err(ValidationError::UnsupportedScheme(scheme));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(ValidationError::Credentials);
        }
        let port = url
            .port_or_known_default()
            .ok_or(ValidationError::MissingHost)?;

        let (host, addrs, literal) = match url.host() {
            None => return Err(ValidationError::MissingHost),
            Some(Host::Ipv4(ip)) => (ip.to_string(), vec![SocketAddr::new(ip.into(), port)], true),
            Some(Host::Ipv6(ip)) => (ip.to_string(), vec![SocketAddr::new(ip.into(), port)], true),
            Some(Host::Domain(domain)) => {
                let domain = domain.trim_end_matches('.').to_ascii_lowercase();
                self.check_domain_name(&domain)?;
                let addrs = self.resolve(&domain, port).await?;
                (domain, addrs, false)
            }
        };

        if !self.config.is_allowed_host(&host) {
            if let Some(addr) = addrs.iter().find(|addr| is_forbidden_ip(addr.ip())) {
                tracing::warn!(host = %host, addr = %addr.ip(), "rejected forbidden address");
                return Err(ValidationError::ForbiddenAddress {
                    host,
                    addr: addr.ip(),
                });
            }
        }

        Ok(ValidatedUrl {
            url,
            host,
            addrs,
            literal,
        })
    }

    fn check_domain_name(&self, domain: &str) -> Result<(), ValidationError> {
        if self.config.is_allowed_host(domain) {
            return Ok(());
        }
        if domain.is_empty() {
            return Err(ValidationError::MissingHost);
        }
        if BLOCKED_HOSTS.contains(&domain) || domain.ends_with(".localhost") {
            return Err(ValidationError::BlockedHost(domain.to_string()));
        }
        // Digits, dots and hex markers only: an address in disguise
        let numeric = domain
            .split('.')
            .all(|label| !label.is_empty() && is_numeric_label(label));
        if numeric {
            return Err(ValidationError::NumericHost(domain.to_string()));
        }
        Ok(())
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, ValidationError> {
        let addrs = self
            .resolver
            .resolve(host, port)
            .await
            .map_err(|e| ValidationError::Unresolvable {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        if addrs.is_empty() {
            return Err(ValidationError::Unresolvable {
                host: host.to_string(),
                reason: "no addresses".into(),
            });
        }
        Ok(addrs)
    }
}

fn is_numeric_label(label: &str) -> bool {
    let digits = label
        .strip_prefix("0x")
        .or_else(|| label.strip_prefix("0X"))
        .map_or((label, false), |rest| (rest, true));
    match digits {
        (rest, true) => rest.chars().all(|c| c.is_ascii_hexdigit()),
        (rest, false) => rest.chars().all(|c| c.is_ascii_digit()),
    }
}

/// Whether an address is outside the public unicast space
#[must_use]
pub fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_forbidden_v4(v4),
        IpAddr::V6(v6) => is_forbidden_v6(v6),
    }
}

fn is_forbidden_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.is_documentation()
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (64..128).contains(&b))
        // 192.0.0.0/24 protocol assignments
        || (a == 192 && b == 0 && c == 0)
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b == 18 || b == 19))
        // 240.0.0.0/4 reserved
        || a >= 240
}

fn is_forbidden_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = embedded_v4(ip) {
        return is_forbidden_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local, fec0::/10 site local
        || (first & 0xffc0) == 0xfe80
        || (first & 0xffc0) == 0xfec0
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8)
}

/// IPv4 address carried inside an IPv6 one (mapped, compatible or NAT64)
fn embedded_v4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return Some(mapped);
    }
    let seg = ip.segments();
    let tail = || {
        let [a, b] = seg[6].to_be_bytes();
        let [c, d] = seg[7].to_be_bytes();
        Ipv4Addr::new(a, b, c, d)
    };
    if seg[..6].iter().all(|&s| s == 0) && !ip.is_loopback() && !ip.is_unspecified() {
        return Some(tail());
    }
    // 64:ff9b::/96
    if seg[0] == 0x0064 && seg[1] == 0xff9b && seg[2..6].iter().all(|&s| s == 0) {
        return Some(tail());
    }
    None
}
