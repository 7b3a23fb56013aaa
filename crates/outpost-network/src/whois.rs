//! WHOIS registration data
//!
//! Starts at IANA and follows referrals until a server answers for itself.
//! A registration expiring within 30 days becomes a risk. Contact emails
//! under the target domain are fed to Whoxy reverse WHOIS and any related
//! registration younger than ten years comes back as a frozen-low asset.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use outpost_core::{Asset, AssetStatus, Capability, Error, Job, Result, Risk};
use outpost_exec::HttpClient;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const IANA: &str = "whois.iana.org";
const WHOIS_PORT: u16 = 43;
const MAX_REFERRALS: usize = 5;
const IO_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RESPONSE: u64 = 1024 * 1024;
const WHOXY: &str = "https://api.whoxy.com/";

/// Fields pulled out of a raw WHOIS response
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WhoisRecord {
    pub domain: String,
    /// Server this record refers to, if any
    pub whois_server: String,
    pub created: String,
    pub updated: String,
    pub expiration: String,
    pub registrar: String,
    pub country: String,
    pub province: String,
    pub city: String,
    /// Registrant, admin, billing and tech contact emails
    pub emails: Vec<String>,
}

impl WhoisRecord {
    /// Parse `key: value` lines. Errors when nothing recognisable is present.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut record = WhoisRecord::default();
        let mut recognised = false;

        for line in raw.lines() {
            let line = line.trim();
            if line.starts_with('%') || line.starts_with('#') || line.starts_with(">>>") {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            let slot = match key.trim().to_ascii_lowercase().as_str() {
                "domain name" | "domain" => &mut record.domain,
                "registrar whois server" | "whois server" | "whois" | "refer" => {
                    &mut record.whois_server
                }
                "creation date" | "created" | "created date" | "registered on"
                | "registration time" => &mut record.created,
                "updated date" | "last updated" | "changed" | "last modified" => {
                    &mut record.updated
                }
                "registry expiry date"
                | "registrar registration expiration date"
                | "expiration date"
                | "expiry date"
                | "expires"
                | "expires on"
                | "paid-till" => &mut record.expiration,
                "registrar" | "registrar name" | "sponsoring registrar" => &mut record.registrar,
                "registrant country" => &mut record.country,
                "registrant state/province" => &mut record.province,
                "registrant city" => &mut record.city,
                "registrant email" | "admin email" | "billing email" | "tech email" => {
                    recognised = true;
                    if !record.emails.iter().any(|email| email == value) {
                        record.emails.push(value.to_string());
                    }
                    continue;
                }
                _ => continue,
            };
            recognised = true;
            if slot.is_empty() {
                *slot = value.to_string();
            }
        }

        if recognised {
            Ok(record)
        } else {
            Err(Error::Parse("no WHOIS fields found".into()))
        }
    }

    pub fn expiration_time(&self) -> Option<DateTime<Utc>> {
        parse_date(&self.expiration)
    }
}

/// Parse the date formats registries commonly use
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y.%m.%d %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }
    let date_part = value.split_whitespace().next().unwrap_or(value);
    for format in ["%Y-%m-%d", "%d-%b-%Y", "%Y.%m.%d", "%Y/%m/%d", "%d.%m.%Y"] {
        if let Ok(parsed) = NaiveDate::parse_from_str(date_part, format) {
            return parsed.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

/// True when `expiration` is less than 30 days away (or already past)
pub fn expiring(expiration: Option<DateTime<Utc>>) -> bool {
    expiration
        .map(|at| at - Utc::now() <= ChronoDuration::days(30))
        .unwrap_or(false)
}

/// Address part of a contact, only if it is under `@domain`
fn matching_email(email: &str, domain: &str) -> Option<String> {
    let address = match (email.find('<'), email.rfind('>')) {
        (Some(start), Some(end)) if start < end => &email[start + 1..end],
        _ => email,
    };
    let address = address.trim().to_ascii_lowercase();
    let suffix = format!("@{}", domain.to_ascii_lowercase());
    (address.ends_with(&suffix) && address.len() > suffix.len() && !address.contains(' '))
        .then_some(address)
}

/// Send one query to `server` (`host` or `host:port`)
pub async fn query(server: &str, domain: &str) -> Result<String> {
    let addr = if server.contains(':') {
        server.to_string()
    } else {
        format!("{}:{}", server, WHOIS_PORT)
    };
    debug!(server = %addr, domain, "whois query");

    let mut stream = timeout(IO_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::Upstream(format!("connect to {} timed out", addr)))??;
    timeout(IO_TIMEOUT, stream.write_all(format!("{}\r\n", domain).as_bytes()))
        .await
        .map_err(|_| Error::Upstream(format!("write to {} timed out", addr)))??;

    let mut raw = Vec::new();
    timeout(IO_TIMEOUT, (&mut stream).take(MAX_RESPONSE).read_to_end(&mut raw))
        .await
        .map_err(|_| Error::Upstream(format!("read from {} timed out", addr)))??;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

#[derive(Debug, Deserialize)]
struct WhoxyResponse {
    #[serde(default)]
    total_pages: u32,
    #[serde(default)]
    search_result: Vec<WhoxyResult>,
}

#[derive(Debug, Deserialize)]
struct WhoxyResult {
    #[serde(rename = "domain_name", default)]
    domain: String,
    #[serde(default)]
    query_time: String,
}

impl WhoxyResult {
    /// Unparseable query times count as old
    fn is_old(&self) -> bool {
        match NaiveDateTime::parse_from_str(&self.query_time, "%Y-%m-%d %H:%M:%S") {
            Ok(at) => at.and_utc() < Utc::now() - ChronoDuration::days(3650),
            Err(_) => true,
        }
    }
}

pub struct Whois {
    job: Job,
    asset: Asset,
    whoxy: String,
}

impl Whois {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
            whoxy: WHOXY.to_string(),
        })
    }

    /// First server to ask; overridable through `whois_server` in the job config
    fn root_server(&self) -> String {
        self.job
            .config
            .get("whois_server")
            .cloned()
            .unwrap_or_else(|| IANA.to_string())
    }

    /// Follow referrals until a server stops pointing somewhere new
    async fn lookup(&self) -> Result<(String, WhoisRecord)> {
        let mut server = self.root_server();
        let mut visited = Vec::new();
        for _ in 0..MAX_REFERRALS {
            let raw = query(&server, &self.asset.dns).await?;
            let record = WhoisRecord::parse(&raw)?;
            visited.push(server.to_ascii_lowercase());

            let next = record.whois_server.trim().to_ascii_lowercase();
            if next.is_empty() || visited.contains(&next) {
                return Ok((raw, record));
            }
            debug!(from = %server, to = %next, "whois referral");
            server = next;
        }
        Err(Error::Upstream(format!(
            "{}: more than {} WHOIS referrals",
            self.asset.dns, MAX_REFERRALS
        )))
    }

    async fn send(&self, name: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }
        self.job.emit(self.asset.attribute(name, value)).await
    }

    async fn reverse_lookup(&self, http: &HttpClient, email: &str) -> Result<Vec<String>> {
        let key = self
            .job
            .config
            .get("secret")
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::MissingConfig {
                key: "whoxy API token".into(),
            })?;

        let mut domains = Vec::new();
        let mut page = 1;
        let mut total = 1;
        loop {
            let page_number = page.to_string();
            let query = [
                ("key", key.as_str()),
                ("reverse", "whois"),
                ("email", email),
                ("mode", "micro"),
                ("page", page_number.as_str()),
            ];
            let response: WhoxyResponse = http.get_json_query(&self.whoxy, &query).await?;
            domains.extend(
                response
                    .search_result
                    .into_iter()
                    .filter(|result| !result.is_old())
                    .map(|result| result.domain),
            );
            if page == 1 {
                total = response.total_pages;
            }
            page += 1;
            if page > total {
                break;
            }
        }
        Ok(domains)
    }
}

#[async_trait]
impl Capability for Whois {
    fn name(&self) -> &'static str {
        "whois"
    }

    fn matches(&self) -> bool {
        self.asset.is("tld")
    }

    fn secret(&self) -> Option<&'static str> {
        Some("whoxy")
    }

    async fn invoke(&self) -> Result<()> {
        let (raw, record) = self.lookup().await?;

        if expiring(record.expiration_time()) {
            let risk = Risk::new(&self.asset, "domain-expiration");
            self.job.emit(risk.clone()).await?;
            self.job.emit(risk.proof(raw.as_bytes())).await?;
        }
        self.send("purchased", &record.created).await?;
        self.send("updated", &record.updated).await?;
        self.send("expiration", &record.expiration).await?;
        self.send("country", &record.country).await?;
        self.send("province", &record.province).await?;
        self.send("city", &record.city).await?;
        self.send("registrar", &record.registrar).await?;

        let emails: BTreeSet<String> = record
            .emails
            .iter()
            .filter_map(|email| matching_email(email, &self.asset.dns))
            .collect();
        if emails.is_empty() {
            return Ok(());
        }

        let http = HttpClient::new()?;
        let mut related = BTreeSet::new();
        for email in &emails {
            match self.reverse_lookup(&http, email).await {
                Ok(domains) => related.extend(domains),
                Err(err) => warn!(email = %email, error = %err, "reverse whois failed"),
            }
        }

        for domain in related {
            if domain != self.asset.dns && !domain.is_empty() {
                let asset = Asset::new(domain.as_str(), domain.as_str())
                    .with_status(AssetStatus::FrozenLow);
                self.job.emit(asset).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const IANA_COM: &str = "% IANA WHOIS server\n\
        refer:        whois.verisign-grs.com\n\n\
        domain:       COM\n\
        whois:        whois.verisign-grs.com\n";

    const REGISTRY: &str = "   Domain Name: EXAMPLE.COM\n\
        Registrar WHOIS Server: whois.iana.org\n\
        Updated Date: 2024-08-14T07:01:34Z\n\
        Creation Date: 1995-08-14T04:00:00Z\n\
        Registry Expiry Date: 2025-08-13T04:00:00Z\n\
        Registrar: RESERVED-Internet Assigned Numbers Authority\n\
        Registrant Country: US\n\
        Registrant Email: hostmaster@example.com\n\
        Admin Email: Admin <admin@example.com>\n\
        Tech Email: noc@elsewhere.net\n\
        >>> Last update of whois database: 2024-09-01T00:00:00Z <<<\n";

    #[test]
    fn test_parse_iana_referral() {
        let record = WhoisRecord::parse(IANA_COM).unwrap();
        assert_eq!(record.whois_server, "whois.verisign-grs.com");
        assert_eq!(record.domain, "COM");
    }

    #[test]
    fn test_parse_registry_record() {
        let record = WhoisRecord::parse(REGISTRY).unwrap();
        assert_eq!(record.domain, "EXAMPLE.COM");
        assert_eq!(record.created, "1995-08-14T04:00:00Z");
        assert_eq!(record.expiration, "2025-08-13T04:00:00Z");
        assert_eq!(record.registrar, "RESERVED-Internet Assigned Numbers Authority");
        assert_eq!(record.country, "US");
        assert_eq!(record.emails.len(), 3);
        assert!(record.expiration_time().is_some());
    }

    #[test]
    fn test_parse_garbage() {
        assert!(WhoisRecord::parse("No match for \"NOPE.COM\".\n").is_err());
    }

    #[test]
    fn test_dates() {
        assert!(parse_date("2025-08-13T04:00:00Z").is_some());
        assert!(parse_date("2025-08-13T04:00:00.0Z").is_some());
        assert!(parse_date("2025-08-13 04:00:00").is_some());
        assert!(parse_date("2025-08-13").is_some());
        assert!(parse_date("13-aug-2025").is_some());
        assert!(parse_date("soon").is_none());
    }

    #[test]
    fn test_expiring() {
        assert!(expiring(Some(Utc::now() + ChronoDuration::days(10))));
        assert!(expiring(Some(Utc::now() - ChronoDuration::days(1))));
        assert!(!expiring(Some(Utc::now() + ChronoDuration::days(90))));
        assert!(!expiring(None));
    }

    #[test]
    fn test_matching_email() {
        assert_eq!(
            matching_email("Admin <Admin@Example.com>", "example.com").as_deref(),
            Some("admin@example.com")
        );
        assert_eq!(matching_email("noc@elsewhere.net", "example.com"), None);
        assert_eq!(matching_email("noc@sub-example.com", "example.com"), None);
        assert_eq!(matching_email("@example.com", "example.com"), None);
    }

    #[test]
    fn test_old_registrations() {
        let old = WhoxyResult {
            domain: "old.com".into(),
            query_time: "2001-01-01 00:00:00".into(),
        };
        let fresh = WhoxyResult {
            domain: "new.com".into(),
            query_time: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        let broken = WhoxyResult {
            domain: "x.com".into(),
            query_time: "yesterday".into(),
        };
        assert!(old.is_old());
        assert!(!fresh.is_old());
        assert!(broken.is_old());
    }

    #[tokio::test]
    async fn test_reverse_lookup_pages_with_encoded_query() {
        let server = MockServer::start().await;
        let fresh = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        for (page, body) in [
            (
                "1",
                format!(
                    r#"{{"total_pages": 2, "search_result": [
                        {{"domain_name": "sister.com", "query_time": "{}"}},
                        {{"domain_name": "lapsed.com", "query_time": "2001-01-01 00:00:00"}}]}}"#,
                    fresh
                ),
            ),
            (
                "2",
                format!(
                    r#"{{"total_pages": 2, "search_result": [{{"domain_name": "cousin.org", "query_time": "{}"}}]}}"#,
                    fresh
                ),
            ),
        ] {
            Mock::given(method("GET"))
                .and(path("/"))
                .and(query_param("key", "k3y&x"))
                .and(query_param("reverse", "whois"))
                .and(query_param("email", "dns+ops@example.com"))
                .and(query_param("page", page))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .expect(1)
                .mount(&server)
                .await;
        }

        let mut config = outpost_core::Config::new();
        config.insert("secret".into(), "k3y&x".into());
        let job = Job::new("whois", Asset::new("example.com", "example.com")).with_config(config);
        let whois = Whois {
            asset: job.target.clone(),
            job,
            whoxy: format!("{}/", server.uri()),
        };
        let domains = whois
            .reverse_lookup(&HttpClient::new().unwrap(), "dns+ops@example.com")
            .await
            .unwrap();
        assert_eq!(domains, vec!["sister.com", "cousin.org"]);
    }

    #[tokio::test]
    async fn test_reverse_lookup_needs_key() {
        let job = Job::new("whois", Asset::new("example.com", "example.com"));
        let whois = Whois {
            asset: job.target.clone(),
            job,
            whoxy: WHOXY.to_string(),
        };
        let err = whois
            .reverse_lookup(&HttpClient::new().unwrap(), "dns@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingConfig { .. }));
    }
}
