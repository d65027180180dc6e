//! Server-side request forgery defense
//!
//! [`SsrfValidator`] screens user-supplied or configured outbound targets.
//! A URL must use an allowed scheme, name an allowed host (when an allow-list
//! is configured) and every address the host resolves to must be a public
//! unicast address. Validation at parse time alone leaves a window for DNS
//! rebinding, so [`SsrfValidator::create_secure_client`] installs a resolver
//! that repeats the address checks on every connection, and [`SecureDialer`]
//! does the same for raw TCP dials.

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, warn};
use url::{Host, Url};

/// Environment variable extending the host allow-list (comma separated)
pub const ENV_SSRF_ALLOWED_HOSTS: &str = "AIXGO_SSRF_ALLOWED_HOSTS";

/// Well-known cloud metadata addresses
const METADATA_V4: [Ipv4Addr; 4] = [
    Ipv4Addr::new(169, 254, 169, 254),
    Ipv4Addr::new(169, 254, 170, 2),
    Ipv4Addr::new(169, 254, 169, 123),
    Ipv4Addr::new(100, 100, 100, 200),
];

const METADATA_V6: [Ipv6Addr; 1] = [Ipv6Addr::new(0xfd00, 0x0ec2, 0, 0, 0, 0, 0, 0x0254)];

/// Metadata service hostnames rejected before resolution
const METADATA_HOSTS: [&str; 3] = [
    "metadata.google.internal",
    "metadata.azure.com",
    "metadata",
];

/// Why an address was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Loopback,
    Private,
    LinkLocal,
    Multicast,
    Metadata,
    SharedAddressSpace,
    Unspecified,
    Broadcast,
    Documentation,
    Benchmarking,
    Reserved,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loopback => "loopback",
            Self::Private => "private network",
            Self::LinkLocal => "link-local",
            Self::Multicast => "multicast",
            Self::Metadata => "cloud metadata endpoint",
            Self::SharedAddressSpace => "shared address space",
            Self::Unspecified => "unspecified",
            Self::Broadcast => "broadcast",
            Self::Documentation => "documentation range",
            Self::Benchmarking => "benchmarking range",
            Self::Reserved => "reserved",
        };
        f.write_str(name)
    }
}

/// SSRF errors
#[derive(Debug, Clone, Error)]
pub enum SsrfError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Scheme not allowed: {0}")]
    SchemeNotAllowed(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("Host not allowed: {0}")]
    HostNotAllowed(String),

    #[error("Wildcard entries are not supported in the host allow-list: {0}")]
    WildcardHost(String),

    #[error("Address {ip} is blocked ({reason})")]
    BlockedAddress { ip: IpAddr, reason: BlockReason },

    #[error("Failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error("Host {0} resolved to no addresses")]
    NoAddresses(String),

    #[error("Too many redirects (limit {0})")]
    TooManyRedirects(usize),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// SSRF validation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsrfConfig {
    /// Allowed URL schemes
    pub allowed_schemes: Vec<String>,

    /// Exact host allow-list; empty means any public host
    pub allowed_hosts: Vec<String>,

    /// Permit loopback addresses and `localhost`
    pub allow_localhost: bool,

    /// Hosts that may pass when DNS resolution fails
    pub resolution_exempt_hosts: Vec<String>,

    /// DNS resolution timeout in milliseconds
    pub resolve_timeout_ms: u64,

    /// Maximum redirects followed by the secure client
    pub max_redirects: usize,
}

impl Default for SsrfConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["http".to_string(), "https".to_string()],
            allowed_hosts: Vec::new(),
            allow_localhost: false,
            resolution_exempt_hosts: vec![
                "localhost".to_string(),
                "host.docker.internal".to_string(),
                "ollama".to_string(),
            ],
            resolve_timeout_ms: 5_000,
            max_redirects: 5,
        }
    }
}

impl SsrfConfig {
    /// Default configuration extended from the process environment
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `AIXGO_SSRF_ALLOWED_HOSTS` from an arbitrary lookup
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(hosts) = lookup(ENV_SSRF_ALLOWED_HOSTS) {
            for host in hosts.split(',').map(str::trim).filter(|h| !h.is_empty()) {
                let host = host.to_ascii_lowercase();
                if !self.allowed_hosts.contains(&host) {
                    self.allowed_hosts.push(host);
                }
            }
        }
        self
    }

    /// Builder: permit loopback targets
    pub fn with_localhost(mut self, allow: bool) -> Self {
        self.allow_localhost = allow;
        self
    }

    /// Builder: add an allowed host
    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.push(host.into());
        self
    }
}

struct Inner {
    config: SsrfConfig,
    allowed_hosts: HashSet<String>,
    exempt_hosts: HashSet<String>,
}

/// URL, host and IP validator
#[derive(Clone)]
pub struct SsrfValidator {
    inner: Arc<Inner>,
}

impl fmt::Debug for SsrfValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsrfValidator")
            .field("config", &self.inner.config)
            .finish()
    }
}

impl SsrfValidator {
    /// Create a validator, rejecting wildcard allow-list entries
    pub fn new(config: SsrfConfig) -> Result<Self, SsrfError> {
        let mut allowed_hosts = HashSet::new();
        for host in &config.allowed_hosts {
            if host.contains('*') {
                return Err(SsrfError::WildcardHost(host.clone()));
            }
            allowed_hosts.insert(normalize_host(host));
        }

        let exempt_hosts = config
            .resolution_exempt_hosts
            .iter()
            .map(|h| normalize_host(h))
            .collect();

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                allowed_hosts,
                exempt_hosts,
            }),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &SsrfConfig {
        &self.inner.config
    }

    /// Validate a URL: scheme, host allow-list and every resolved address
    pub async fn validate_url(&self, raw: &str) -> Result<Url, SsrfError> {
        let url = Url::parse(raw).map_err(|e| SsrfError::InvalidUrl(e.to_string()))?;
        self.check_scheme(&url)?;

        match url.host() {
            None => return Err(SsrfError::MissingHost),
            Some(Host::Ipv4(ip)) => self.check_literal(IpAddr::V4(ip))?,
            Some(Host::Ipv6(ip)) => self.check_literal(IpAddr::V6(ip))?,
            Some(Host::Domain(domain)) => {
                self.validate_host(domain).await?;
            }
        }

        Ok(url)
    }

    /// Validate a host name and return the addresses it resolved to.
    ///
    /// Exempt hosts that fail to resolve yield an empty list instead of an
    /// error; any address that does resolve is still range-checked.
    pub async fn validate_host(&self, host: &str) -> Result<Vec<IpAddr>, SsrfError> {
        let host = normalize_host(host);
        if host.is_empty() {
            return Err(SsrfError::MissingHost);
        }

        if let Ok(ip) = host.parse::<IpAddr>() {
            self.check_literal(ip)?;
            return Ok(vec![ip]);
        }

        self.check_host_name(&host)?;

        match self.resolve(&host).await {
            Ok(addrs) => {
                for ip in &addrs {
                    self.validate_ip(*ip)?;
                }
                Ok(addrs)
            }
            Err(e) if self.inner.exempt_hosts.contains(&host) => {
                debug!(host = %host, error = %e, "Resolution failed for exempt host");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Validate a single address against the blocked ranges
    pub fn validate_ip(&self, ip: IpAddr) -> Result<(), SsrfError> {
        match classify_ip(ip) {
            None => Ok(()),
            Some(BlockReason::Loopback) if self.inner.config.allow_localhost => Ok(()),
            Some(reason) => {
                warn!(ip = %ip, reason = %reason, "Blocked outbound address");
                Err(SsrfError::BlockedAddress { ip, reason })
            }
        }
    }

    /// Resolve `host` and validate every address, requiring at least one
    pub async fn resolve_validated(&self, host: &str) -> Result<Vec<IpAddr>, SsrfError> {
        let addrs = self.validate_host(host).await?;
        if addrs.is_empty() {
            return Err(SsrfError::NoAddresses(host.to_string()));
        }
        Ok(addrs)
    }

    /// Build an HTTP client that re-validates every dial target.
    ///
    /// Host names are resolved through the validator on each connection and
    /// redirects are screened before they are followed. Requests to IP
    /// literals bypass DNS, so request URLs must pass [`Self::validate_url`].
    pub fn create_secure_client(&self) -> Result<reqwest::Client, SsrfError> {
        self.secure_client_builder()
            .build()
            .map_err(|e| SsrfError::Client(e.to_string()))
    }

    /// Client builder with the validating resolver and redirect policy installed
    pub fn secure_client_builder(&self) -> reqwest::ClientBuilder {
        let resolver = Arc::new(ValidatingResolver {
            validator: self.clone(),
        });

        let redirect_validator = self.clone();
        let max_redirects = self.inner.config.max_redirects;
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= max_redirects {
                return attempt.error(SsrfError::TooManyRedirects(max_redirects));
            }
            match redirect_validator.check_url_static(attempt.url()) {
                Ok(()) => attempt.follow(),
                Err(e) => attempt.error(e),
            }
        });

        reqwest::Client::builder()
            .dns_resolver(resolver)
            .redirect(policy)
            .connect_timeout(Duration::from_secs(10))
    }

    /// Checks that need no DNS: scheme, allow-list and IP literals
    fn check_url_static(&self, url: &Url) -> Result<(), SsrfError> {
        self.check_scheme(url)?;
        match url.host() {
            None => Err(SsrfError::MissingHost),
            Some(Host::Ipv4(ip)) => self.check_literal(IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => self.check_literal(IpAddr::V6(ip)),
            Some(Host::Domain(domain)) => self.check_host_name(&normalize_host(domain)),
        }
    }

    fn check_scheme(&self, url: &Url) -> Result<(), SsrfError> {
        let scheme = url.scheme();
        if self
            .inner
            .config
            .allowed_schemes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(scheme))
        {
            Ok(())
        } else {
            Err(SsrfError::SchemeNotAllowed(scheme.to_string()))
        }
    }

    fn check_host_name(&self, host: &str) -> Result<(), SsrfError> {
        if METADATA_HOSTS.contains(&host) {
            return Err(SsrfError::HostNotAllowed(host.to_string()));
        }
        if !self.inner.allowed_hosts.is_empty() && !self.inner.allowed_hosts.contains(host) {
            return Err(SsrfError::HostNotAllowed(host.to_string()));
        }
        Ok(())
    }

    fn check_literal(&self, ip: IpAddr) -> Result<(), SsrfError> {
        self.check_host_name(&ip.to_string())?;
        self.validate_ip(ip)
    }

    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, SsrfError> {
        let timeout = Duration::from_millis(self.inner.config.resolve_timeout_ms);
        let lookup = tokio::net::lookup_host((host, 0));

        let addrs = tokio::time::timeout(timeout, lookup)
            .await
            .map_err(|_| SsrfError::Resolution {
                host: host.to_string(),
                reason: "timed out".to_string(),
            })?
            .map_err(|e| SsrfError::Resolution {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        let mut ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
        ips.dedup();
        Ok(ips)
    }
}

/// Classify an address, returning why it is blocked (if it is)
pub fn classify_ip(ip: IpAddr) -> Option<BlockReason> {
    match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => classify_v4(v4),
            None => classify_v6(v6),
        },
    }
}

fn classify_v4(ip: Ipv4Addr) -> Option<BlockReason> {
    let [a, b, c, _] = ip.octets();

    if METADATA_V4.contains(&ip) {
        return Some(BlockReason::Metadata);
    }
    if ip.is_loopback() {
        return Some(BlockReason::Loopback);
    }
    if ip.is_unspecified() || a == 0 {
        return Some(BlockReason::Unspecified);
    }
    if ip.is_private() {
        return Some(BlockReason::Private);
    }
    if ip.is_link_local() {
        return Some(BlockReason::LinkLocal);
    }
    if a == 100 && (64..=127).contains(&b) {
        return Some(BlockReason::SharedAddressSpace);
    }
    if ip.is_multicast() {
        return Some(BlockReason::Multicast);
    }
    if ip.is_broadcast() {
        return Some(BlockReason::Broadcast);
    }
    if ip.is_documentation() {
        return Some(BlockReason::Documentation);
    }
    if a == 198 && (b == 18 || b == 19) {
        return Some(BlockReason::Benchmarking);
    }
    if a >= 240 || (a == 192 && b == 0 && c == 0) {
        return Some(BlockReason::Reserved);
    }
    None
}

fn classify_v6(ip: Ipv6Addr) -> Option<BlockReason> {
    let segments = ip.segments();

    if METADATA_V6.contains(&ip) {
        return Some(BlockReason::Metadata);
    }
    if ip.is_loopback() {
        return Some(BlockReason::Loopback);
    }
    if ip.is_unspecified() {
        return Some(BlockReason::Unspecified);
    }
    if segments[0] & 0xfe00 == 0xfc00 {
        return Some(BlockReason::Private);
    }
    if segments[0] & 0xffc0 == 0xfe80 || segments[0] & 0xffc0 == 0xfec0 {
        return Some(BlockReason::LinkLocal);
    }
    if ip.is_multicast() {
        return Some(BlockReason::Multicast);
    }
    if segments[0] == 0x2001 && segments[1] == 0x0db8 {
        return Some(BlockReason::Documentation);
    }
    // NAT64 well-known prefix embeds an IPv4 destination
    if segments[..6] == [0x0064, 0xff9b, 0, 0, 0, 0] {
        let embedded = Ipv4Addr::new(
            (segments[6] >> 8) as u8,
            segments[6] as u8,
            (segments[7] >> 8) as u8,
            segments[7] as u8,
        );
        return classify_v4(embedded);
    }
    // IPv4-compatible (deprecated) and discard-only prefixes
    if segments[..6] == [0, 0, 0, 0, 0, 0] || segments[..4] == [0x0100, 0, 0, 0] {
        return Some(BlockReason::Reserved);
    }
    None
}

fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

/// DNS resolver that refuses to hand blocked addresses to the connector
struct ValidatingResolver {
    validator: SsrfValidator,
}

impl Resolve for ValidatingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let validator = self.validator.clone();
        let host = name.as_str().to_string();

        Box::pin(async move {
            let ips = validator
                .resolve_validated(&host)
                .await
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?;
            let addrs: Addrs = Box::new(ips.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(addrs)
        })
    }
}

/// Raw TCP dialer that validates each socket address immediately before connecting
#[derive(Debug, Clone)]
pub struct SecureDialer {
    validator: SsrfValidator,
    connect_timeout: Duration,
}

impl SecureDialer {
    /// Create a dialer backed by `validator`
    pub fn new(validator: SsrfValidator) -> Self {
        Self {
            validator,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Builder: set the per-address connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Resolve, validate and connect to `host:port`
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, SsrfError> {
        let ips = self.validator.resolve_validated(host).await?;
        let mut last_error = None;

        for ip in ips {
            let addr = SocketAddr::new(ip, port);
            self.validator.validate_ip(addr.ip())?;

            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    let peer = stream.peer_addr().map_err(|e| SsrfError::Connect(e.to_string()))?;
                    self.validator.validate_ip(peer.ip())?;
                    return Ok(stream);
                }
                Ok(Err(e)) => last_error = Some(e.to_string()),
                Err(_) => last_error = Some(format!("timed out connecting to {addr}")),
            }
        }

        Err(SsrfError::Connect(
            last_error.unwrap_or_else(|| format!("no reachable address for {host}")),
        ))
    }
}

#[cfg(test)]
#[path = "ssrf_tests.rs"]
mod ssrf_tests;
