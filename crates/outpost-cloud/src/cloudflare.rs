//! Cloudflare zones and DNS records

use async_trait::async_trait;
use outpost_core::{Asset, Capability, Error, Job, Result};
use outpost_exec::{normalize, HttpClient};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

pub const API: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    result: Vec<T>,
    #[serde(default)]
    result_info: PageInfo,
}

#[derive(Debug, Default, Deserialize)]
struct PageInfo {
    #[serde(default)]
    count: u64,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Record {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    content: String,
}

impl Record {
    fn asset(&self) -> Option<Asset> {
        match self.kind.as_str() {
            "A" | "AAAA" => Some(Asset::new(self.name.as_str(), self.content.as_str())),
            "CNAME" => Some(Asset::new(
                normalize(&self.name, &self.name),
                normalize(&self.content, &self.content),
            )),
            _ => None,
        }
    }
}

pub struct Cloudflare {
    job: Job,
    asset: Asset,
    api: String,
}

impl Cloudflare {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
            api: API.to_string(),
        })
    }

    /// Every page of `path`, stopping at the first page with no results
    async fn pages<T: DeserializeOwned>(&self, client: &HttpClient, path: &str) -> Result<Vec<T>> {
        let token = self
            .asset
            .config
            .get("token")
            .ok_or_else(|| Error::MissingConfig { key: "token".into() })?;
        let authorization = format!("Bearer {}", token);

        let mut all = Vec::new();
        for page in 1.. {
            let url = format!("{}{}?page={}", self.api, path, page);
            let response: Page<T> = client
                .send(Method::GET, &url, None, &[("Authorization", authorization.as_str())])
                .await?
                .ensure_success()?
                .json()?;
            debug!(url = %url, results = response.result.len(), "cloudflare page");
            all.extend(response.result);
            if response.result_info.count == 0 {
                break;
            }
        }
        Ok(all)
    }
}

#[async_trait]
impl Capability for Cloudflare {
    fn name(&self) -> &'static str {
        "cloudflare"
    }

    fn matches(&self) -> bool {
        self.asset.is("cloudflare") && self.asset.config.contains_key("token")
    }

    async fn invoke(&self) -> Result<()> {
        let client = HttpClient::new()?;
        let zones: Vec<Zone> = self.pages(&client, "/zones").await?;
        for zone in zones {
            let records: Vec<Record> = self
                .pages(&client, &format!("/zones/{}/dns_records", zone.id))
                .await?;
            for asset in records.iter().filter_map(Record::asset) {
                self.job.emit(asset).await?;
            }
        }
        Ok(())
    }
}
