//! Asset classification
//!
//! A class is derived from an asset's name and DNS, never stored. Rules are
//! evaluated in order against each candidate string in turn; the first rule
//! that matches any candidate wins.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::net::IpAddr;

/// Semantic tag for an asset
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetClass {
    /// Registrable domain (`example.com`)
    Tld,
    Cidr,
    /// GitHub organization URL
    Github,
    /// GitLab group URL
    Gitlab,
    /// Repository on a code host
    Repository,
    Amazon,
    Azure,
    Gcp,
    Ns1,
    Cloudflare,
    Crowdstrike,
    Domain,
    /// Any other URL, tagged by its scheme (`https`, `ssh`)
    Scheme(String),
    Private,
    Ipv4,
    Ipv6,
    /// 32 hex character endpoint id
    Endpoint,
    /// UUIDv4 agent id
    Agent,
    Unknown,
}

impl AssetClass {
    pub fn as_str(&self) -> &str {
        match self {
            AssetClass::Tld => "tld",
            AssetClass::Cidr => "cidr",
            AssetClass::Github => "github",
            AssetClass::Gitlab => "gitlab",
            AssetClass::Repository => "repository",
            AssetClass::Amazon => "amazon",
            AssetClass::Azure => "azure",
            AssetClass::Gcp => "gcp",
            AssetClass::Ns1 => "ns1",
            AssetClass::Cloudflare => "cloudflare",
            AssetClass::Crowdstrike => "crowdstrike",
            AssetClass::Domain => "domain",
            AssetClass::Scheme(scheme) => scheme,
            AssetClass::Private => "private",
            AssetClass::Ipv4 => "ipv4",
            AssetClass::Ipv6 => "ipv6",
            AssetClass::Endpoint => "endpoint",
            AssetClass::Agent => "agent",
            AssetClass::Unknown => "",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Rule = fn(&str) -> Option<AssetClass>;

static RULES: &[Rule] = &[
    tld, cidr, github, gitlab, repository, provider, domain, scheme, ip, endpoint, agent,
];

static HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z0-9_-]+\.)+[a-zA-Z][a-zA-Z0-9-]*$").expect("valid regex")
});
static GITHUB_ORG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(https://)?github\.com/([^/]+)/?$").expect("valid regex"));
static GITLAB_ORG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(https://)?gitlab\.com/([^/]+)/?$").expect("valid regex"));
static REPOSITORY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(https://)?(github\.com|gitlab\.com)/([^/]+)/(([^/]+/)*[^/]+)$")
        .expect("valid regex")
});
static DOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(https?://)?((xn--[a-zA-Z0-9-]+|[a-zA-Z0-9-]+)\.)+([a-zA-Z]{2,})$")
        .expect("valid regex")
});
static ENDPOINT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-fA-F0-9]{32}$").expect("valid regex"));
static AGENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-fA-F0-9]{8}-[a-fA-F0-9]{4}-4[a-fA-F0-9]{3}-[89aAbB][a-fA-F0-9]{3}-[a-fA-F0-9]{12}$")
        .expect("valid regex")
});

/// Classify against the candidates in order, first match wins
pub fn classify(candidates: &[&str]) -> AssetClass {
    candidates
        .iter()
        .filter(|candidate| !candidate.is_empty())
        .find_map(|candidate| RULES.iter().find_map(|rule| rule(candidate)))
        .unwrap_or(AssetClass::Unknown)
}

/// Registrable domain of a hostname under public suffix rules
pub fn registrable_domain(host: &str) -> Option<&str> {
    psl::domain_str(host)
}

fn tld(s: &str) -> Option<AssetClass> {
    (HOSTNAME.is_match(s) && registrable_domain(s) == Some(s)).then_some(AssetClass::Tld)
}

fn cidr(s: &str) -> Option<AssetClass> {
    let (addr, prefix) = s.split_once('/')?;
    let addr: IpAddr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some(AssetClass::Cidr)
}

fn github(s: &str) -> Option<AssetClass> {
    GITHUB_ORG.is_match(s).then_some(AssetClass::Github)
}

fn gitlab(s: &str) -> Option<AssetClass> {
    GITLAB_ORG.is_match(s).then_some(AssetClass::Gitlab)
}

fn repository(s: &str) -> Option<AssetClass> {
    REPOSITORY.is_match(s).then_some(AssetClass::Repository)
}

fn provider(s: &str) -> Option<AssetClass> {
    match s {
        "amazon" => Some(AssetClass::Amazon),
        "azure" => Some(AssetClass::Azure),
        "gcp" => Some(AssetClass::Gcp),
        "ns1" => Some(AssetClass::Ns1),
        "cloudflare" => Some(AssetClass::Cloudflare),
        "crowdstrike" => Some(AssetClass::Crowdstrike),
        _ => None,
    }
}

fn domain(s: &str) -> Option<AssetClass> {
    DOMAIN.is_match(s).then_some(AssetClass::Domain)
}

fn scheme(s: &str) -> Option<AssetClass> {
    let parsed = url::Url::parse(s).ok()?;
    (!parsed.scheme().is_empty()).then(|| AssetClass::Scheme(parsed.scheme().to_string()))
}

fn ip(s: &str) -> Option<AssetClass> {
    let addr: IpAddr = s.parse().ok()?;
    if is_private(&addr) {
        return Some(AssetClass::Private);
    }
    match addr {
        IpAddr::V4(_) => Some(AssetClass::Ipv4),
        IpAddr::V6(v6) if v6.to_ipv4_mapped().is_some() => Some(AssetClass::Ipv4),
        IpAddr::V6(_) => Some(AssetClass::Ipv6),
    }
}

fn endpoint(s: &str) -> Option<AssetClass> {
    ENDPOINT.is_match(s).then_some(AssetClass::Endpoint)
}

fn agent(s: &str) -> Option<AssetClass> {
    AGENT.is_match(s).then_some(AssetClass::Agent)
}

/// RFC 1918 and RFC 4193 ranges
pub fn is_private(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.is_private(),
            None => (v6.segments()[0] & 0xfe00) == 0xfc00,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cidr_wins_over_dns() {
        assert_eq!(classify(&["8.8.8.0/24", "example.com"]), AssetClass::Cidr);
        assert_eq!(classify(&["8.8.8.0/24", "8.8.8.0/24"]), AssetClass::Cidr);
    }

    #[test]
    fn test_tld() {
        assert_eq!(classify(&["example.com", "example.com"]), AssetClass::Tld);
        assert_eq!(classify(&["example.co.uk"]), AssetClass::Tld);
        assert_eq!(classify(&["www.example.com"]), AssetClass::Domain);
    }

    #[test]
    fn test_code_hosts() {
        assert_eq!(classify(&["https://github.com/acme"]), AssetClass::Github);
        assert_eq!(classify(&["gitlab.com/acme/"]), AssetClass::Gitlab);
        assert_eq!(
            classify(&["https://github.com/acme/widgets"]),
            AssetClass::Repository
        );
        assert_eq!(
            classify(&["https://gitlab.com/acme/group/widgets"]),
            AssetClass::Repository
        );
    }

    #[test]
    fn test_providers_and_urls() {
        assert_eq!(classify(&["amazon", "123456789012"]), AssetClass::Amazon);
        assert_eq!(
            classify(&["https://api.example.com:8443"]),
            AssetClass::Scheme("https".into())
        );
        assert_eq!(classify(&["ssh://1.2.3.4:22"]).as_str(), "ssh");
    }

    #[test]
    fn test_addresses() {
        assert_eq!(classify(&["10.0.0.1"]), AssetClass::Private);
        assert!(is_private(&"fd00::1".parse().unwrap()));
        assert_eq!(classify(&["93.184.216.34"]), AssetClass::Ipv4);
        assert_eq!(classify(&["2001:db8::1"]), AssetClass::Ipv6);
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(
            classify(&["0123456789abcdef0123456789abcdef"]),
            AssetClass::Endpoint
        );
        assert_eq!(
            classify(&["3f2504e0-4f89-41d3-9a0c-0305e82c3301"]),
            AssetClass::Agent
        );
        assert_eq!(classify(&["", "not a thing"]), AssetClass::Unknown);
    }
}
