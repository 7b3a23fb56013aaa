//! Google Cloud projects
//!
//! Activates the service account from config `keyfile` in a throwaway
//! `gcloud` config directory, then lists public compute addresses,
//! functions, forwarding rules and Cloud DNS records. Every listing is
//! formatted by gcloud as `dns<TAB>name<TAB>uri`.

use async_trait::async_trait;
use outpost_core::{Asset, Capability, Config, Error, Job, Result};
use outpost_exec::{normalize, process};
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::info;

use crate::{descend, publish, tolerate};

const COMPUTE_V4: [&str; 8] = [
    "compute",
    "instances",
    "list",
    "--flatten",
    "networkInterfaces, networkInterfaces.accessConfigs",
    "--filter",
    "networkInterfaces.accessConfigs.natIP:*",
    "--format=value(networkInterfaces.accessConfigs.publicPtrDomainName, networkInterfaces.accessConfigs.natIP, uri())",
];
const COMPUTE_V6: [&str; 8] = [
    "compute",
    "instances",
    "list",
    "--flatten",
    "networkInterfaces, networkInterfaces.ipv6AccessConfigs",
    "--filter",
    "networkInterfaces.ipv6AccessConfigs.externalIpv6:*",
    "--format=value(networkInterfaces.accessConfigs.publicPtrDomainName, networkInterfaces.ipv6AccessConfigs.externalIpv6, uri())",
];
const FORWARDING_RULES: [&str; 4] = [
    "compute",
    "forwarding-rules",
    "list",
    "--format=value(IPAddress, IPAddress, uri())",
];

/// One `dns<TAB>name<TAB>uri` line
#[derive(Debug, Clone, PartialEq)]
struct Resource {
    dns: String,
    name: String,
    uri: String,
}

impl Resource {
    fn parse(line: &str) -> Option<Self> {
        if line.trim().is_empty() || line == "\t\t" {
            return None;
        }
        let mut fields = line.splitn(3, '\t');
        let (dns, name, uri) = (fields.next()?, fields.next()?, fields.next()?);
        if name.is_empty() {
            return None;
        }
        Some(Self {
            dns: dns.to_string(),
            name: name.to_string(),
            uri: uri.to_string(),
        })
    }

    fn asset(&self) -> Asset {
        Asset::new(normalize(&self.dns, &self.name), self.name.as_str())
    }
}

/// `gcloud` bound to an isolated config directory and one project
struct Cli {
    directory: TempDir,
    project: String,
}

impl Cli {
    fn new(project: &str) -> Result<Self> {
        Ok(Self {
            directory: tempfile::Builder::new().prefix("gcp.").tempdir()?,
            project: project.to_string(),
        })
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("gcloud");
        cmd.args(args)
            .args(["--project", &self.project, "--quiet", "--verbosity=error"])
            .env("CLOUDSDK_CONFIG", self.directory.path());
        cmd
    }

    async fn write_keyfile(&self, contents: &str) -> Result<PathBuf> {
        let path = self.directory.path().join("keyfile.json");
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }
}

pub struct Gcp {
    job: Job,
    asset: Asset,
}

impl Gcp {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
        })
    }

    async fn activate(&self, cli: &Cli) -> Result<()> {
        let keyfile = self
            .asset
            .config
            .get("keyfile")
            .ok_or_else(|| Error::MissingConfig { key: "keyfile".into() })?;
        let path = cli.write_keyfile(keyfile).await?;
        let path = path.to_string_lossy();
        process::run(cli.command(&["auth", "activate-service-account", "--key-file", &path]))
            .await
            .map_err(|e| Error::Authentication(format!("failed to activate service account: {}", e)))?;
        Ok(())
    }

    /// Stream `cmd`, publishing every resource line; returns what was seen
    async fn list(&self, cmd: Command, config: Option<&Config>) -> Result<Vec<Resource>> {
        let mut seen = Vec::new();
        let mut lines = process::stream(cmd)?;
        while let Some(line) = lines.next_line().await? {
            let Some(resource) = Resource::parse(&line) else {
                continue;
            };
            let asset = match config {
                Some(config) => resource.asset().with_config(config.clone()),
                None => resource.asset(),
            };
            publish(&self.job, asset, &resource.uri).await?;
            seen.push(resource);
        }
        lines.finish().await?;
        Ok(seen)
    }

    async fn projects(&self, cli: &Cli) -> Result<()> {
        let cmd = cli.command(&[
            "projects",
            "list",
            "--format=value(format(\"gcp\t{}\t{}\", projectId, uri()))",
        ]);
        let projects = self.list(cmd, Some(&self.asset.config)).await?;
        self.descend_projects(&projects).await
    }

    /// Queue every listed project other than the one being enumerated
    async fn descend_projects(&self, projects: &[Resource]) -> Result<()> {
        for project in projects.iter().filter(|project| project.name != self.asset.name) {
            let asset = project.asset().with_config(self.asset.config.clone());
            descend(&self.job, "gcp", asset).await?;
        }
        Ok(())
    }

    async fn compute(&self, cli: &Cli) -> Result<()> {
        self.list(cli.command(&COMPUTE_V4), None).await?;
        self.list(cli.command(&COMPUTE_V6), None).await.map(drop)
    }

    async fn functions(&self, cli: &Cli) -> Result<()> {
        let format = format!(
            "--format=value(format(\"{{}}\t{{}}\tprojects/{}/functions/{{}}\",name,name,name))",
            self.asset.name
        );
        self.list(cli.command(&["functions", "list", &format]), None).await.map(drop)
    }

    async fn forwarding(&self, cli: &Cli) -> Result<()> {
        self.list(cli.command(&FORWARDING_RULES), None).await.map(drop)
    }

    async fn zones(&self, cli: &Cli) -> Result<()> {
        let zones = self
            .list(
                cli.command(&["dns", "managed-zones", "list", "--format=value(dnsName, name, uri())"]),
                None,
            )
            .await?;
        for zone in zones {
            let format = format!("--format=value(format(\"{{}}\t{{}}\t{}\", name, rrdatas))", zone.uri);
            let cmd = cli.command(&[
                "dns",
                "record-sets",
                "list",
                "--zone",
                &zone.name,
                "--flatten",
                "rrdatas",
                &format,
                "--filter",
                "type=A OR type=AAAA OR type=CNAME",
            ]);
            tolerate("gcp", "record-sets", self.list(cmd, None).await.map(drop))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Capability for Gcp {
    fn name(&self) -> &'static str {
        "gcp"
    }

    fn matches(&self) -> bool {
        self.asset.config.contains_key("keyfile")
    }

    fn timeout(&self) -> u64 {
        45
    }

    async fn invoke(&self) -> Result<()> {
        let cli = Cli::new(&self.asset.name)?;
        self.activate(&cli).await?;
        info!(project = %self.asset.name, "enumerating gcp project");

        if !self.asset.system() {
            tolerate("gcp", "projects", self.projects(&cli).await)?;
        }
        tolerate("gcp", "compute", self.compute(&cli).await)?;
        tolerate("gcp", "functions", self.functions(&cli).await)?;
        tolerate("gcp", "forwarding-rules", self.forwarding(&cli).await)?;
        tolerate("gcp", "dns", self.zones(&cli).await)
    }
}
