//! Azure tenants and subscriptions
//!
//! Logs in as a service principal into a throwaway config directory. A
//! provided asset names the tenant and yields its subscriptions; a system
//! asset names a subscription, which is enumerated through resource graph.

use async_trait::async_trait;
use outpost_core::{Asset, Capability, Config, Error, Job, Result};
use outpost_exec::{normalize, process};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{error, info};

use crate::{descend, publish, tolerate};

const PUBLIC_IPS: &str = "where type == \"microsoft.network/publicipaddresses\" and \
    (isnotempty(properties.dnsSettings.fqdn) or isnotempty(properties.ipAddress)) | \
    project dns=properties.dnsSettings.fqdn,name=properties.ipAddress,id=id";
const DNS_ZONES: &str =
    "where type == \"microsoft.network/dnszones\" | project name=name,dns=name,group=resourceGroup,id=id";
const WEB_SITES: &str = "where type == \"microsoft.web/sites\" | mv-expand dns=properties.enabledHostNames | \
    project name=name,dns=dns,id=id";

/// Record set type and the JMESPath projecting it into rows
const RECORD_QUERIES: [(&str, &str); 3] = [
    (
        "a",
        "{ \"data\": [].{ \"dns\": fqdn, \"id\": id, \"names\": ARecords[].ipv4Address }}",
    ),
    (
        "aaaa",
        "{ \"data\": [].{ \"dns\": fqdn, \"id\": id, \"names\": AAAARecords[].ipv6Address }}",
    ),
    (
        "cname",
        "{ \"data\": [].{ \"dns\": fqdn, \"id\": id, \"name\": CNAMERecord.cname }}",
    ),
];

#[derive(Debug, Clone, Default, Deserialize)]
struct Row {
    #[serde(default)]
    dns: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    names: Option<Vec<String>>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    id: String,
}

impl Row {
    /// One asset per non-empty name
    fn assets(&self) -> Vec<Asset> {
        let dns = self.dns.as_deref().unwrap_or_default();
        self.names
            .iter()
            .flatten()
            .chain(self.name.iter())
            .filter(|name| !name.is_empty())
            .map(|name| Asset::new(normalize(dns, name), name.as_str()))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    data: Vec<Row>,
}

fn parse_rows(output: &str) -> Result<Vec<Row>> {
    let response: Response = serde_json::from_str(output)
        .map_err(|e| Error::Parse(format!("azure response: {}", e)))?;
    Ok(response.data)
}

/// `az` bound to an isolated config directory
struct Cli {
    directory: TempDir,
    extensions: PathBuf,
}

impl Cli {
    fn new() -> Result<Self> {
        let directory = tempfile::Builder::new().prefix("azure.").tempdir()?;
        let home = std::env::var("HOME").unwrap_or_default();
        Ok(Self {
            directory,
            extensions: Path::new(&home).join(".azure").join("cliextensions"),
        })
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("az");
        cmd.args(args)
            .env("AZURE_CONFIG_DIR", self.directory.path())
            .env("AZURE_EXTENSION_DIR", &self.extensions);
        cmd
    }
}

pub struct Azure {
    job: Job,
    asset: Asset,
}

impl Azure {
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

    async fn login(&self, cli: &Cli) -> Result<()> {
        let tenant = self
            .asset
            .config
            .get("tenant")
            .map(String::as_str)
            .unwrap_or(&self.asset.name);
        process::run(cli.command(&[
            "login",
            "--service-principal",
            "--username",
            self.setting("name")?,
            "--password",
            self.setting("secret")?,
            "--tenant",
            tenant,
            "--allow-no-subscriptions",
        ]))
        .await
        .map_err(|e| Error::Authentication(format!("failed to authenticate as service principal: {}", e)))?;
        Ok(())
    }

    /// Emit the assets in `output`, each with `config`, and return the rows
    async fn emit_rows(&self, output: &str, config: Option<&Config>) -> Result<Vec<Row>> {
        let rows = parse_rows(output)?;
        for row in &rows {
            for asset in row.assets() {
                let asset = match config {
                    Some(config) => asset.with_config(config.clone()),
                    None => asset,
                };
                publish(&self.job, asset, &row.id).await?;
            }
        }
        Ok(rows)
    }

    async fn query(&self, cli: &Cli, query: &str) -> Result<Vec<Row>> {
        let output = process::run_stdout(cli.command(&[
            "graph",
            "query",
            "-q",
            query,
            "--subscriptions",
            &self.asset.name,
        ]))
        .await?;
        self.emit_rows(&output, None).await
    }

    async fn subscriptions(&self, cli: &Cli) -> Result<()> {
        let output = process::run_stdout(cli.command(&[
            "account",
            "list",
            "--only-show-errors",
            "--query",
            "{ data: [].{ name : id, dns: 'azure', id: id } }",
        ]))
        .await?;
        self.descend_rows(&output).await
    }

    /// Publish each subscription and queue it, carrying the tenant it was
    /// listed under
    async fn descend_rows(&self, output: &str) -> Result<()> {
        let config = self.subscription_config();
        for row in self.emit_rows(output, Some(&config)).await? {
            for asset in row.assets() {
                descend(&self.job, "azure", asset.with_config(config.clone())).await?;
            }
        }
        Ok(())
    }

    fn subscription_config(&self) -> Config {
        let mut config = self.asset.config.clone();
        config
            .entry("tenant".to_string())
            .or_insert_with(|| self.asset.name.clone());
        config
    }

    async fn zones(&self, cli: &Cli) -> Result<()> {
        for zone in self.query(cli, DNS_ZONES).await? {
            let (Some(dns), Some(group)) = (zone.dns.as_deref(), zone.group.as_deref()) else {
                continue;
            };
            for (kind, projection) in RECORD_QUERIES {
                let output = process::run_stdout(cli.command(&[
                    "network",
                    "dns",
                    "record-set",
                    kind,
                    "list",
                    "--zone-name",
                    dns,
                    "--resource-group",
                    group,
                    "--query",
                    projection,
                ]))
                .await;
                match output {
                    Ok(output) => {
                        self.emit_rows(&output, None).await?;
                    }
                    Err(err) => {
                        error!(zone = %dns, kind, error = %err, username = %self.job.username, "failed to list records");
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Capability for Azure {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn matches(&self) -> bool {
        let config = &self.asset.config;
        config.contains_key("name")
            && config.contains_key("secret")
            && (config.contains_key("tenant") || !self.asset.system())
    }

    fn timeout(&self) -> u64 {
        45
    }

    async fn invoke(&self) -> Result<()> {
        let cli = Cli::new()?;
        self.login(&cli).await?;

        if !self.asset.system() {
            return tolerate("azure", "subscriptions", self.subscriptions(&cli).await);
        }

        process::run(cli.command(&["account", "set", "--subscription", &self.asset.name]))
            .await
            .map_err(|e| Error::Upstream(format!("failed to set subscription {}: {}", self.asset.name, e)))?;
        info!(subscription = %self.asset.name, "enumerating azure subscription");

        tolerate("azure", "public-ips", self.query(&cli, PUBLIC_IPS).await.map(drop))?;
        tolerate("azure", "dns-zones", self.zones(&cli).await)?;
        tolerate("azure", "web-sites", self.query(&cli, WEB_SITES).await.map(drop))
    }
}
