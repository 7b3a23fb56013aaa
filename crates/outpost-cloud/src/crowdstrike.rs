//! CrowdStrike Falcon
//!
//! The asset name is the API base URL. Managed devices become assets;
//! sensor-visibility exclusions over world-writable paths and disabled
//! prevention controls become risks.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use outpost_common::sha256_hex;
use outpost_core::{Asset, Capability, Error, Job, Result, Risk};
use outpost_exec::HttpClient;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Path prefixes any local user can write to
const WRITABLE_PATHS: [&str; 7] = [
    "/tmp/",
    "/var/tmp/",
    "/private/tmp/",
    "C:\\Windows\\Temp\\",
    "C:\\Temp\\",
    "C:\\Users\\Public\\",
    "C:\\ProgramData\\",
];

/// Policy excluded from control checks
const INITIAL_DEPLOYMENT_POLICY: &str = "Phase 1 - initial deployment";

/// Platform, prevention category, and the risk raised when one of its controls is off
const PREVENTION_RULES: [(&str, &str, &str); 2] = [
    ("Windows", "Ransomware", "windows-ransomware-control-disabled"),
    ("Linux", "Enhanced Visibility", "linux-prevention-control-disabled"),
];

#[derive(Debug, Deserialize)]
struct Resources<T> {
    #[serde(default = "Vec::new")]
    resources: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Token {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Device {
    device_id: String,
    #[serde(default)]
    hostname: String,
}

#[derive(Debug, Deserialize)]
struct Exclusion {
    id: String,
    #[serde(rename = "value", default)]
    path: String,
}

impl Exclusion {
    fn is_dangerous(&self) -> bool {
        let path = self.path.to_lowercase();
        WRITABLE_PATHS
            .iter()
            .any(|writable| path.starts_with(&writable.to_lowercase()))
    }
}

#[derive(Debug, Deserialize)]
struct Policy {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "platform_name", default)]
    platform: String,
    #[serde(rename = "prevention_settings", default)]
    settings: Vec<PreventionCategory>,
}

#[derive(Debug, Deserialize)]
struct PreventionCategory {
    name: String,
    #[serde(rename = "settings", default)]
    controls: Vec<PreventionControl>,
}

#[derive(Debug, Deserialize)]
struct PreventionControl {
    name: String,
    #[serde(rename = "value", default)]
    options: HashMap<String, serde_json::Value>,
}

impl PreventionControl {
    /// Controls without an `enabled` flag are not toggles and count as on
    fn is_enabled(&self) -> bool {
        self.options
            .get("enabled")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true)
    }
}

impl Policy {
    /// `(risk name, control)` for every disabled control the rules cover
    fn disabled_controls(&self) -> Vec<(&'static str, &PreventionControl)> {
        if self.name == INITIAL_DEPLOYMENT_POLICY {
            return Vec::new();
        }
        let mut found = Vec::new();
        for category in &self.settings {
            for (platform, setting, risk) in PREVENTION_RULES {
                if self.platform != platform || category.name != setting {
                    continue;
                }
                found.extend(
                    category
                        .controls
                        .iter()
                        .filter(|control| !control.is_enabled())
                        .map(|control| (risk, control)),
                );
            }
        }
        found
    }
}

/// Authenticated Falcon API session
struct Falcon {
    client: HttpClient,
    base: String,
    authorization: String,
}

impl Falcon {
    async fn connect(base: &str, client_id: &str, secret: &str) -> Result<Self> {
        let client = HttpClient::new()?;
        let basic = format!("Basic {}", STANDARD.encode(format!("{}:{}", client_id, secret)));
        let token: Token = client
            .send(
                Method::POST,
                &format!("{}/oauth2/token", base),
                Some(b"grant_type=client_credentials".to_vec()),
                &[
                    ("Authorization", basic.as_str()),
                    ("Content-Type", "application/x-www-form-urlencoded"),
                ],
            )
            .await?
            .ensure_success()?
            .json()?;
        if token.access_token.is_empty() {
            return Err(Error::Authentication("empty access token".into()));
        }
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            authorization: format!("Bearer {}", token.access_token),
        })
    }

    async fn request<T: DeserializeOwned>(&self, url: &str, body: Option<Vec<u8>>) -> Result<T> {
        self.client
            .send(
                Method::GET,
                url,
                body,
                &[
                    ("Authorization", self.authorization.as_str()),
                    ("Content-Type", "application/json"),
                ],
            )
            .await?
            .ensure_success()?
            .json()
    }

    async fn devices(&self) -> Result<Vec<Device>> {
        let ids: Resources<String> = self
            .request(&format!("{}/devices/queries/devices/v1", self.base), None)
            .await?;
        if ids.resources.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::to_vec(&serde_json::json!({ "ids": ids.resources }))?;
        let devices: Resources<Device> = self
            .request(&format!("{}/devices/entities/devices/v1", self.base), Some(body))
            .await?;
        Ok(devices.resources)
    }

    /// Query ids for a policy kind, then fetch the entities
    async fn entities<T: DeserializeOwned>(&self, kind: &str) -> Result<Vec<T>> {
        let ids: Resources<String> = self
            .request(&format!("{}/policy/queries/{}/v1?limit=500", self.base, kind), None)
            .await?;
        if ids.resources.is_empty() {
            return Ok(Vec::new());
        }
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(ids.resources.iter().map(|id| ("ids", id.as_str())))
            .finish();
        let entities: Resources<T> = self
            .request(&format!("{}/policy/entities/{}/v1?{}", self.base, kind, query), None)
            .await?;
        Ok(entities.resources)
    }
}

pub struct Crowdstrike {
    job: Job,
    asset: Asset,
}

impl Crowdstrike {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
        })
    }

    fn setting(&self, key: &str) -> Result<&str> {
        self.asset
            .config
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::MissingConfig { key: key.to_string() })
    }

    /// Risk against the asset with its DNS replaced by `dns`
    fn risk(&self, dns: &str, name: &str) -> Risk {
        let mut anchor = self.asset.clone();
        anchor.dns = dns.to_string();
        Risk::new(&anchor, name)
    }
}

#[async_trait]
impl Capability for Crowdstrike {
    fn name(&self) -> &'static str {
        "crowdstrike"
    }

    fn matches(&self) -> bool {
        self.asset.config.contains_key("clientID") && self.asset.config.contains_key("secret")
    }

    async fn invoke(&self) -> Result<()> {
        let falcon = Falcon::connect(&self.asset.name, self.setting("clientID")?, self.setting("secret")?)
            .await
            .map_err(|e| Error::Authentication(format!("failed to create connection: {}", e)))?;

        let devices = falcon.devices().await?;
        info!(base = %falcon.base, devices = devices.len(), "falcon devices");
        for device in devices {
            self.job.emit(Asset::new(device.hostname, device.device_id)).await?;
        }

        let exclusions: Vec<Exclusion> = falcon.entities("sv-exclusions").await?;
        for exclusion in exclusions.iter().filter(|e| e.is_dangerous()) {
            debug!(exclusion = %exclusion.id, path = %exclusion.path, "dangerous exclusion");
            self.job
                .emit(self.risk(&exclusion.id, "dangerous-exclusion-rule"))
                .await?;
        }

        let policies: Vec<Policy> = falcon.entities("prevention").await?;
        for policy in &policies {
            for (risk, control) in policy.disabled_controls() {
                let anchor = sha256_hex(format!("{}:{}", policy.id, control.name).as_bytes());
                self.job.emit(self.risk(&anchor, risk)).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::{Config, Entity, Stream};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const POLICIES: &str = r#"{"resources": [
        {"id": "p1", "name": "Workstations", "platform_name": "Windows", "prevention_settings": [
            {"name": "Ransomware", "settings": [
                {"name": "Backup Deletion", "value": {"enabled": false}},
                {"name": "Cryptowall", "value": {"enabled": true}}
            ]},
            {"name": "Exploit Mitigation", "settings": [
                {"name": "Heap Spray", "value": {"enabled": false}}
            ]}
        ]},
        {"id": "p2", "name": "Phase 1 - initial deployment", "platform_name": "Windows", "prevention_settings": [
            {"name": "Ransomware", "settings": [{"name": "Backup Deletion", "value": {"enabled": false}}]}
        ]},
        {"id": "p3", "name": "Servers", "platform_name": "Linux", "prevention_settings": [
            {"name": "Enhanced Visibility", "settings": [
                {"name": "Script Visibility", "value": {"enabled": false}},
                {"name": "Level", "value": {"detection": "moderate"}}
            ]}
        ]}
    ]}"#;

    #[test]
    fn test_dangerous_exclusions() {
        let exclusion = |path: &str| Exclusion {
            id: "e".into(),
            path: path.into(),
        };
        assert!(exclusion("/tmp/build/**").is_dangerous());
        assert!(exclusion("c:\\windows\\temp\\*").is_dangerous());
        assert!(exclusion("C:\\ProgramData\\Vendor\\*").is_dangerous());
        assert!(!exclusion("/opt/app/**").is_dangerous());
        assert!(!exclusion("C:\\Program Files\\App\\*").is_dangerous());
    }

    #[test]
    fn test_disabled_controls() {
        let policies: Resources<Policy> = serde_json::from_str(POLICIES).unwrap();
        let found: Vec<(String, &str, &str)> = policies
            .resources
            .iter()
            .flat_map(|policy| {
                policy
                    .disabled_controls()
                    .into_iter()
                    .map(move |(risk, control)| (policy.id.clone(), risk, control.name.as_str()))
            })
            .collect();
        assert_eq!(
            found,
            vec![
                ("p1".to_string(), "windows-ransomware-control-disabled", "Backup Deletion"),
                ("p3".to_string(), "linux-prevention-control-disabled", "Script Visibility"),
            ]
        );
    }

    #[tokio::test]
    async fn test_invoke() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"access_token": "t0k3n", "expires_in": 1799}"#),
            )
            .mount(&server)
            .await;
        let bearer = |route: &'static str| {
            Mock::given(method("GET"))
                .and(path(route))
                .and(header("Authorization", "Bearer t0k3n"))
        };
        bearer("/devices/queries/devices/v1")
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"resources": ["d1"]}"#))
            .mount(&server)
            .await;
        bearer("/devices/entities/devices/v1")
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"resources": [{"device_id": "d1", "hostname": "ws-01", "platform_name": "Windows"}]}"#,
            ))
            .mount(&server)
            .await;
        bearer("/policy/queries/sv-exclusions/v1")
            .and(query_param("limit", "500"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"resources": ["e1", "e2"]}"#))
            .mount(&server)
            .await;
        bearer("/policy/entities/sv-exclusions/v1")
            .and(query_param("ids", "e2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"resources": [{"id": "e1", "value": "/tmp/**"}, {"id": "e2", "value": "/opt/**"}]}"#,
            ))
            .mount(&server)
            .await;
        bearer("/policy/queries/prevention/v1")
            .and(query_param("limit", "500"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"resources": ["p1", "p2", "p3"]}"#))
            .mount(&server)
            .await;
        bearer("/policy/entities/prevention/v1")
            .and(query_param("ids", "p3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(POLICIES))
            .mount(&server)
            .await;
        let base = server.uri();

        let config: Config = [("clientID", "id"), ("secret", "s3cret")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let (stream, mut receiver) = Stream::channel();
        let mut job = Job::new("crowdstrike", Asset::new("crowdstrike", base.as_str()).with_config(config));
        job.stream = Some(stream);
        let capability = Crowdstrike::new(job);
        assert!(capability.matches());

        let task = tokio::spawn(async move { capability.invoke().await });
        let mut entities = Vec::new();
        while let Some(entity) = receiver.recv().await {
            entities.push(entity);
        }
        task.await.unwrap().unwrap();

        assert_eq!(entities.len(), 4);
        assert!(matches!(&entities[0], Entity::Asset(a) if a.key == "#asset#ws-01#d1"));
        assert!(matches!(&entities[1], Entity::Risk(r) if r.key == "#risk#e1#dangerous-exclusion-rule"));
        let backup = sha256_hex(b"p1:Backup Deletion");
        assert!(
            matches!(&entities[2], Entity::Risk(r) if r.key == format!("#risk#{}#windows-ransomware-control-disabled", backup))
        );
        assert!(matches!(&entities[3], Entity::Risk(r) if r.name == "linux-prevention-control-disabled"));
    }
}
