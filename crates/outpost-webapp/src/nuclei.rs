//! Template scanning with nuclei

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use outpost_common::tenant_tag;
use outpost_core::{Asset, Capability, Job, Result, Risk, RiskStatus, Severity};
use outpost_exec::{is_valid_website, process};
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Environment variable naming the templates directory
pub const TEMPLATES_ENV: &str = "NUCLEI_TEMPLATES";
/// Job config key that overrides [`TEMPLATES_ENV`]
pub const TEMPLATES_KEY: &str = "nuclei_templates";

#[derive(Debug, Default, Deserialize)]
struct Finding {
    #[serde(rename = "template-id")]
    id: String,
    #[serde(rename = "template-path", default)]
    path: String,
    #[serde(default)]
    info: Info,
    #[serde(default)]
    ip: String,
    #[serde(rename = "matched-at", default)]
    matched: String,
}

#[derive(Debug, Default, Deserialize)]
struct Info {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default, alias = "praetorian")]
    outpost: Annotations,
}

/// Template metadata: detection-only templates report attributes, not risks
#[derive(Debug, Default, Deserialize)]
struct Annotations {
    #[serde(default)]
    detection: bool,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

pub struct Nuclei {
    job: Job,
    asset: Asset,
    header: String,
}

impl Nuclei {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            header: tenant_tag(&job.username),
            asset: job.target.clone(),
            job,
        })
    }

    fn templates(&self) -> String {
        self.job
            .config
            .get(TEMPLATES_KEY)
            .cloned()
            .or_else(|| std::env::var(TEMPLATES_ENV).ok())
            .unwrap_or_default()
    }

    fn args(&self) -> Vec<String> {
        let templates = self.templates();
        let tags = format!("case-reviewed,{}", self.job.username);
        let tenant = format!("Outpost: {}", self.header);
        let agent = format!("User-Agent: outpost-{}", self.header);
        let mut args: Vec<String> = [
            "-u",
            self.asset.name.as_str(),
            "-es",
            "unknown",
            "-pt",
            "http,ssl,tcp",
            "-duc",
            "-silent",
            "-j",
            "-t",
            templates.as_str(),
            "-no-stdin",
            "-no-mhe",
            "-c",
            "100",
            "-tags",
            tags.as_str(),
            "-H",
            tenant.as_str(),
            "-H",
            agent.as_str(),
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();

        match self.job.config.get("test") {
            Some(template) => args.extend(["-id".to_string(), template.clone()]),
            None => args.extend(
                ["-dialer-keep-alive", "5", "-timeout", "1", "-retries", "0"]
                    .iter()
                    .map(|arg| arg.to_string()),
            ),
        }
        args
    }

    async fn handle(&self, line: &str) -> Result<()> {
        let finding: Finding = match serde_json::from_str(line) {
            Ok(finding) => finding,
            Err(err) => {
                error!(error = %err, line = %line, "nuclei finding parse");
                return Ok(());
            }
        };

        let annotations = &finding.info.metadata.outpost;
        let host = Asset::new(self.asset.dns.as_str(), finding.ip.as_str());
        for (name, value) in &annotations.attributes {
            self.job.emit(host.attribute(name.as_str(), value.as_str())).await?;
        }
        if annotations.detection {
            return Ok(());
        }

        let risk = Risk::new(&self.asset, finding.id.as_str())
            .with_status(RiskStatus::triage(Severity::from_label(&finding.info.severity)));
        self.job.emit(risk.clone()).await?;

        let proof = proof(line, &encode_template(&finding.path).await)?;
        self.job.emit(risk.proof(proof)).await?;
        self.job.emit(risk.attribute("asset", finding.matched.as_str())).await?;
        info!(asset = %self.asset.key, risk = %finding.id, ip = %finding.ip, "nuclei detection");
        Ok(())
    }
}

/// Base64 of the template file, empty if it cannot be read
async fn encode_template(path: &str) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => STANDARD.encode(bytes),
        Err(_) => String::new(),
    }
}

/// The raw finding with the encoded template added under `template-encoded`
fn proof(line: &str, template: &str) -> Result<Vec<u8>> {
    let mut finding: serde_json::Map<String, serde_json::Value> = serde_json::from_str(line)?;
    finding.insert("template-encoded".to_string(), template.into());
    Ok(serde_json::to_vec(&finding)?)
}

#[async_trait]
impl Capability for Nuclei {
    fn name(&self) -> &'static str {
        "nuclei"
    }

    fn matches(&self) -> bool {
        !self.asset.is("AL") && self.asset.is("http")
    }

    async fn invoke(&self) -> Result<()> {
        if !is_valid_website(&self.asset.name).await {
            debug!(asset = %self.asset.key, "not a live website, skipping");
            return Ok(());
        }

        let mut cmd = Command::new("nuclei");
        cmd.args(self.args())
            .env("HOME", std::env::temp_dir())
            .env("GOMEMLIMIT", "1250MiB");

        let mut lines = process::stream(cmd)?;
        while let Some(line) = lines.next_line().await? {
            self.handle(&line).await?;
        }
        lines.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::{AssetStatus, Entity};

    const FINDING: &str = r#"{"template-id":"git-config","template-path":"/nonexistent/git-config.yaml","info":{"name":"Git Config","severity":"medium","metadata":{"outpost":{"attributes":{"server":"nginx"}}}},"ip":"93.184.216.34","port":"443","matched-at":"https://example.com/.git/config"}"#;

    fn target() -> Asset {
        Asset::new("example.com", "https://example.com")
    }

    #[test]
    fn test_args() {
        let job = Job::new("nuclei", target()).with_config(
            [(TEMPLATES_KEY.to_string(), "/opt/templates".to_string())]
                .into_iter()
                .collect(),
        );
        let nuclei = Nuclei {
            header: tenant_tag("user@example.com"),
            asset: job.target.clone(),
            job,
        };
        let args = nuclei.args();
        assert_eq!(args[..2], ["-u", "https://example.com"]);
        assert!(args.windows(2).any(|w| *w == ["-t", "/opt/templates"]));
        assert!(args.windows(2).any(|w| *w == ["-retries", "0"]));
        assert!(!args.contains(&"-id".to_string()));
    }

    #[test]
    fn test_args_rescan_single_template() {
        let job = Job::new("nuclei", target())
            .with_config([("test".to_string(), "git-config".to_string())].into_iter().collect());
        let nuclei = Nuclei {
            header: String::new(),
            asset: job.target.clone(),
            job,
        };
        let args = nuclei.args();
        assert!(args.windows(2).any(|w| *w == ["-id", "git-config"]));
        assert!(!args.contains(&"-retries".to_string()));
    }

    #[test]
    fn test_legacy_metadata_key() {
        let legacy = FINDING.replace(r#""outpost":"#, r#""praetorian":"#);
        let finding: Finding = serde_json::from_str(&legacy).unwrap();
        let annotations = &finding.info.metadata.outpost;
        assert_eq!(annotations.attributes.get("server").map(String::as_str), Some("nginx"));

        let detection: Finding = serde_json::from_str(
            r#"{"template-id":"tech","info":{"metadata":{"praetorian":{"detection":true}}}}"#,
        )
        .unwrap();
        assert!(detection.info.metadata.outpost.detection);
    }

    #[test]
    fn test_proof_adds_template() {
        let proof = proof(FINDING, "dGVtcGxhdGU=").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&proof).unwrap();
        assert_eq!(value["template-encoded"], "dGVtcGxhdGU=");
        assert_eq!(value["template-id"], "git-config");
    }

    #[tokio::test]
    async fn test_handle_finding() {
        let (stream, mut receiver) = outpost_core::Stream::channel();
        let mut job = Job::new("nuclei", target());
        job.stream = Some(stream);
        let nuclei = Nuclei {
            header: String::new(),
            asset: job.target.clone(),
            job,
        };

        let handle = tokio::spawn(async move {
            nuclei.handle(FINDING).await.unwrap();
            nuclei.handle("not json").await.unwrap();
        });
        let mut entities = Vec::new();
        while let Some(entity) = receiver.recv().await {
            entities.push(entity);
        }
        handle.await.unwrap();

        assert_eq!(entities.len(), 4);
        match &entities[0] {
            Entity::Attribute(attr) => {
                assert_eq!(attr.name, "server");
                assert_eq!(attr.value, "nginx");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &entities[1] {
            Entity::Risk(risk) => {
                assert_eq!(risk.name, "git-config");
                assert_eq!(risk.status.code(), "TM");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&entities[2], Entity::File(file) if file.name == "proofs/example.com/git-config"));
        match &entities[3] {
            Entity::Attribute(attr) => assert_eq!(attr.value, "https://example.com/.git/config"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_matches() {
        assert!(Nuclei::new(Job::new("nuclei", target())).matches());
        let low = target().with_status(AssetStatus::ActiveLow);
        assert!(!Nuclei::new(Job::new("nuclei", low)).matches());
        let host = Asset::new("example.com", "93.184.216.34");
        assert!(!Nuclei::new(Job::new("nuclei", host)).matches());
    }
}
