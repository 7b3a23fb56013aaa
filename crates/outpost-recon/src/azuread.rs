//! Domains federated with the seed's Azure AD tenant
//!
//! Exchange autodiscover lists every domain in the tenant. Each is checked
//! against the user realm endpoint and federated ones other than the seed
//! are reported.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use outpost_core::{Asset, AssetStatus, Capability, Job, Result};
use outpost_exec::HttpClient;
use regex::Regex;
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};

pub const AUTODISCOVER: &str = "https://autodiscover-s.outlook.com";
pub const LOGIN: &str = "https://login.microsoftonline.com";

const FEDERATION_ACTION: &str =
    "http://schemas.microsoft.com/exchange/2010/Autodiscover/Autodiscover/GetFederationInformation";

static DOMAIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<Domain>(.*?)</Domain>").expect("valid regex"));

#[derive(Debug, Deserialize)]
struct Realm {
    #[serde(rename = "DomainName", default)]
    domain: String,
    #[serde(rename = "NameSpaceType", default)]
    kind: String,
}

fn federation_request(domain: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:exm="http://schemas.microsoft.com/exchange/services/2006/messages" xmlns:ext="http://schemas.microsoft.com/exchange/services/2006/types" xmlns:a="http://www.w3.org/2005/08/addressing" xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema">
  <soap:Header>
    <a:Action soap:mustUnderstand="1">{action}</a:Action>
    <a:To soap:mustUnderstand="1">https://autodiscover-s.outlook.com/autodiscover/autodiscover.svc</a:To>
    <a:ReplyTo>
      <a:Address>http://www.w3.org/2005/08/addressing/anonymous</a:Address>
    </a:ReplyTo>
  </soap:Header>
  <soap:Body>
    <GetFederationInformationRequestMessage xmlns="http://schemas.microsoft.com/exchange/2010/Autodiscover">
      <Request>
        <Domain>{domain}</Domain>
      </Request>
    </GetFederationInformationRequestMessage>
  </soap:Body>
</soap:Envelope>"#,
        action = FEDERATION_ACTION,
        domain = domain
    )
}

fn parse_domains(response: &str) -> Vec<String> {
    DOMAIN
        .captures_iter(response)
        .map(|caps| caps[1].to_string())
        .collect()
}

pub struct AzureAd {
    job: Job,
    asset: Asset,
    autodiscover: String,
    login: String,
}

impl AzureAd {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
            autodiscover: AUTODISCOVER.to_string(),
            login: LOGIN.to_string(),
        })
    }

    /// Tenant domains, empty when autodiscover does not answer
    async fn domains(&self, client: &HttpClient) -> Vec<String> {
        let url = format!("{}/autodiscover/autodiscover.svc", self.autodiscover);
        let response = client
            .send(
                Method::POST,
                &url,
                Some(federation_request(&self.asset.dns).into_bytes()),
                &[
                    ("Content-Type", "text/xml"),
                    ("SOAPAction", FEDERATION_ACTION),
                    ("User-Agent", "AutodiscoverClient"),
                ],
            )
            .await;
        match response {
            Ok(response) => parse_domains(&response.text()),
            Err(err) => {
                warn!(domain = %self.asset.dns, error = %err, "autodiscover failed");
                Vec::new()
            }
        }
    }

    async fn realm(&self, client: &HttpClient, domain: &str) -> Result<Realm> {
        let url = format!("{}/GetUserRealm.srf?login=nn@{}", self.login, domain);
        client.get_json(&url, &[]).await
    }
}

#[async_trait]
impl Capability for AzureAd {
    fn name(&self) -> &'static str {
        "azuread-discovery"
    }

    fn matches(&self) -> bool {
        crate::seed(&self.asset)
    }

    async fn invoke(&self) -> Result<()> {
        let client = HttpClient::new()?;
        for domain in self.domains(&client).await {
            let realm = match self.realm(&client, &domain).await {
                Ok(realm) => realm,
                Err(err) => {
                    debug!(domain = %domain, error = %err, "realm lookup failed");
                    continue;
                }
            };
            if realm.domain.eq_ignore_ascii_case(&self.asset.dns) || realm.kind != "Federated" {
                continue;
            }
            let asset = Asset::new(realm.domain.as_str(), realm.domain.as_str())
                .with_status(AssetStatus::FrozenLow);
            self.job.emit(asset).await?;
        }
        Ok(())
    }
}
