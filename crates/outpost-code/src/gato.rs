//! Self-hosted runner exposure in GitHub Actions
//!
//! A public repository that can be forked and whose workflows run on
//! self-hosted runners lets outside pull requests execute on those runners.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use outpost_core::{Asset, Capability, Job, Result, Risk};
use outpost_exec::{process, HttpClient};
use regex::Regex;
use reqwest::Method;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

static REPOSITORY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://github\.com/([^/]+)/([^/]+)$").expect("valid regex"));

#[derive(Debug, Default, Deserialize)]
struct Output {
    #[serde(default)]
    enumeration: Enumeration,
}

#[derive(Debug, Default, Deserialize)]
struct Enumeration {
    #[serde(default)]
    repositories: Vec<Repository>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    #[serde(default)]
    can_fork: bool,
    #[serde(default)]
    runner_workflows: Vec<String>,
}

impl Repository {
    fn exposed(&self) -> bool {
        self.can_fork && !self.runner_workflows.is_empty()
    }
}

/// `owner/name` of a github.com repository URL
fn slug(url: &str) -> Option<String> {
    let caps = REPOSITORY.captures(url)?;
    Some(format!("{}/{}", &caps[1], &caps[2]))
}

/// True if any enumerated repository is exposed
fn exposed(report: &[u8]) -> bool {
    serde_json::from_slice::<Output>(report)
        .map(|output| output.enumeration.repositories.iter().any(Repository::exposed))
        .unwrap_or(false)
}

pub struct Gato {
    job: Job,
    asset: Asset,
}

impl Gato {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
        })
    }

    /// Classic PATs on the asset win over the injected secret
    fn token(&self) -> &str {
        match self.asset.config.get("pat") {
            Some(pat) if pat.starts_with("ghp_") => pat.as_str(),
            _ => self.job.config.get("secret").map(String::as_str).unwrap_or_default(),
        }
    }

    fn command(&self, slug: &str, output: &str) -> Command {
        let mut cmd = Command::new("gato");
        cmd.args(["enum", "--repository", slug, "--output-json", output])
            .env("GH_TOKEN", self.token());
        cmd
    }
}

#[async_trait]
impl Capability for Gato {
    fn name(&self) -> &'static str {
        "gato"
    }

    fn matches(&self) -> bool {
        !self.asset.is("AL") && self.asset.is("repository") && self.asset.dns.contains("github.com")
    }

    fn secret(&self) -> Option<&'static str> {
        Some("/pats/gato")
    }

    fn timeout(&self) -> u64 {
        20
    }

    async fn invoke(&self) -> Result<()> {
        let response = HttpClient::new()?
            .send(Method::GET, &self.asset.dns, None, &[])
            .await?;
        if response.status != 200 {
            debug!(repository = %self.asset.dns, status = response.status, "repository not public");
            return Ok(());
        }
        let Some(slug) = slug(&self.asset.dns) else {
            return Ok(());
        };

        let directory = tempfile::Builder::new().prefix("gato.").tempdir()?;
        let output = directory.path().join("gato.json");
        process::run(self.command(&slug, &output.to_string_lossy())).await?;
        let report = tokio::fs::read(&output).await.unwrap_or_default();

        if exposed(&report) {
            info!(repository = %slug, "self-hosted runner exposed to forks");
            let risk = Risk::new(&self.asset, "public-repo-with-self-hosted-runner");
            let proof = risk.proof(report);
            self.job.emit(risk).await?;
            self.job.emit(proof).await?;
        }
        Ok(())
    }
}
