//! NS1 managed DNS

use async_trait::async_trait;
use outpost_core::{Asset, Capability, Error, Job, Result};
use outpost_exec::{next_link, normalize, HttpClient};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::error;

pub const API: &str = "https://api.nsone.net/v1";
const API_KEY_HEADER: &str = "X-NSONE-Key";

#[derive(Debug, Deserialize)]
struct ZoneSummary {
    zone: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    #[serde(default)]
    records: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct Record {
    domain: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    short_answers: Vec<String>,
}

impl Record {
    fn assets(&self) -> Vec<Asset> {
        match self.kind.as_str() {
            "A" | "AAAA" => self
                .short_answers
                .iter()
                .map(|ip| Asset::new(self.domain.as_str(), ip.as_str()))
                .collect(),
            "CNAME" => self
                .short_answers
                .first()
                .map(|target| Asset::new(self.domain.as_str(), normalize(target, target)))
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }
}

pub struct Ns1 {
    job: Job,
    asset: Asset,
    api: String,
}

impl Ns1 {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
            api: API.to_string(),
        })
    }

    fn key(&self) -> Result<&str> {
        self.asset
            .config
            .get("ns1_api_key")
            .map(String::as_str)
            .ok_or_else(|| Error::MissingConfig { key: "ns1_api_key".into() })
    }

    /// GET following `Link` pagination, concatenating array pages
    async fn list<T: DeserializeOwned>(&self, client: &HttpClient, url: String) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let response = client
                .send(Method::GET, &url, None, &[(API_KEY_HEADER, self.key()?)])
                .await?
                .ensure_success()?;
            all.extend(response.json::<Vec<T>>()?);
            next = response.header("link").and_then(next_link);
        }
        Ok(all)
    }

    async fn get<T: DeserializeOwned>(&self, client: &HttpClient, url: &str) -> Result<T> {
        client
            .send(Method::GET, url, None, &[(API_KEY_HEADER, self.key()?)])
            .await?
            .ensure_success()?
            .json()
    }
}

#[async_trait]
impl Capability for Ns1 {
    fn name(&self) -> &'static str {
        "ns1"
    }

    fn matches(&self) -> bool {
        self.asset.config.contains_key("ns1_api_key")
    }

    async fn invoke(&self) -> Result<()> {
        let client = HttpClient::builder().timeout(Duration::from_secs(3)).build()?;
        let zones: Vec<ZoneSummary> = self.list(&client, format!("{}/zones", self.api)).await?;

        for summary in zones {
            let zone: Zone = match self.get(&client, &format!("{}/zones/{}", self.api, summary.zone)).await {
                Ok(zone) => zone,
                Err(err) => {
                    error!(zone = %summary.zone, error = %err, "failed to get zone details");
                    return Err(err);
                }
            };
            for asset in zone.records.iter().flat_map(Record::assets) {
                self.job.emit(asset).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::{Config, Entity, Stream};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_record_assets() {
        let zone: Zone = serde_json::from_str(
            r#"{"zone": "example.com", "records": [
                {"domain": "www.example.com", "type": "A", "short_answers": ["1.2.3.4", "5.6.7.8"]},
                {"domain": "app.example.com", "type": "CNAME", "short_answers": ["lb.example.net."]},
                {"domain": "empty.example.com", "type": "CNAME", "short_answers": []},
                {"domain": "example.com", "type": "MX", "short_answers": ["10 mail.example.com"]}
            ]}"#,
        )
        .unwrap();
        let keys: Vec<String> = zone.records.iter().flat_map(Record::assets).map(|a| a.key).collect();
        assert_eq!(
            keys,
            vec![
                "#asset#www.example.com#1.2.3.4",
                "#asset#www.example.com#5.6.7.8",
                "#asset#app.example.com#lb.example.net",
            ]
        );
    }

    #[tokio::test]
    async fn test_invoke() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones"))
            .and(header("X-NSONE-Key", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"zone": "example.com"}]"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zones/example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"zone": "example.com", "records": [{"domain": "www.example.com", "type": "AAAA", "short_answers": ["2001:db8::1"]}]}"#,
            ))
            .mount(&server)
            .await;
        let api = server.uri();

        let mut config = Config::new();
        config.insert("ns1_api_key".into(), "key".into());
        let (stream, mut receiver) = Stream::channel();
        let mut job = Job::new("ns1", Asset::new("ns1", "ns1").with_config(config));
        job.stream = Some(stream);
        let ns1 = Ns1 {
            asset: job.target.clone(),
            job,
            api,
        };
        assert!(ns1.matches());

        let task = tokio::spawn(async move { ns1.invoke().await });
        let mut keys = Vec::new();
        while let Some(Entity::Asset(asset)) = receiver.recv().await {
            keys.push(asset.key);
        }
        task.await.unwrap().unwrap();
        assert_eq!(keys, vec!["#asset#www.example.com#2001:db8::1"]);
    }
}
