//! Secret scanning over a repository's full history
//!
//! The repository is cloned bare into a scratch directory. The PAT reaches
//! git through environment-only config, so it is never on the command line,
//! and the clone's `config` is removed before scanning.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use outpost_core::{Asset, Capability, File, Job, Result, Risk};
use outpost_exec::process;
use serde::Deserialize;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{info, warn};

/// Findings whose report line carries this marker are suppressed
const SUPPRESSION: &str = "no-nosey-parker";

#[derive(Debug, Deserialize)]
struct Finding {
    finding_id: String,
    #[serde(rename = "rule_text_id")]
    rule: String,
}

/// Turn one `noseyparker report -f jsonl` line into a risk and its proof
fn finding(target: &Asset, line: &str) -> Option<(Risk, File)> {
    if line.to_lowercase().contains(SUPPRESSION) {
        return None;
    }
    let finding: Finding = match serde_json::from_str(line) {
        Ok(finding) => finding,
        Err(err) => {
            warn!(error = %err, "unreadable noseyparker finding");
            return None;
        }
    };
    let short = finding.finding_id.get(..8)?;
    let rule = finding.rule.split('.').nth(1).unwrap_or(&finding.rule);

    let asset = Asset::new(format!("{}:{}", target.dns, short), target.name.as_str());
    let risk = Risk::new(&asset, format!("git-secrets-{}", rule));
    let proof = risk.proof(line.as_bytes());
    Some((risk, proof))
}

/// Scratch space for one scan
struct Workspace {
    directory: TempDir,
}

impl Workspace {
    fn new() -> Result<Self> {
        Ok(Self {
            directory: tempfile::Builder::new().prefix("secrets.").tempdir()?,
        })
    }

    fn repository(&self) -> PathBuf {
        self.directory.path().join("clone.git")
    }

    fn store(&self) -> PathBuf {
        self.directory.path().join("datastore")
    }
}

pub struct Secrets {
    job: Job,
    asset: Asset,
}

impl Secrets {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
        })
    }

    fn clone_command(&self, destination: &str) -> Command {
        let mut cmd = Command::new("git");
        cmd.args(["clone", "--bare", &self.asset.dns, destination])
            .env("GIT_TERMINAL_PROMPT", "0");
        if let Some(pat) = self.asset.config.get("pat").filter(|pat| !pat.is_empty()) {
            let credentials = STANDARD.encode(format!("user:{}", pat));
            cmd.env("GIT_CONFIG_COUNT", "1")
                .env("GIT_CONFIG_KEY_0", "http.extraHeader")
                .env("GIT_CONFIG_VALUE_0", format!("Authorization: Basic {}", credentials));
        }
        cmd
    }
}

#[async_trait]
impl Capability for Secrets {
    fn name(&self) -> &'static str {
        "secrets"
    }

    fn matches(&self) -> bool {
        !self.asset.is("AL") && self.asset.is("repository")
    }

    async fn invoke(&self) -> Result<()> {
        let workspace = Workspace::new()?;
        let clone = workspace.repository().to_string_lossy().into_owned();
        let store = workspace.store().to_string_lossy().into_owned();

        process::run(self.clone_command(&clone)).await?;
        let config = workspace.repository().join("config");
        if let Err(err) = tokio::fs::remove_file(&config).await {
            warn!(path = %config.display(), error = %err, "clone config not removed");
        }

        let mut scan = Command::new("noseyparker");
        scan.args(["scan", "--datastore", &store, &clone]);
        process::run(scan).await?;

        let mut report = Command::new("noseyparker");
        report.args(["report", "--datastore", &store, "-f", "jsonl"]);
        let mut lines = process::stream(report)?;
        let mut found = 0usize;
        while let Some(line) = lines.next_line().await? {
            if let Some((risk, proof)) = finding(&self.asset, &line) {
                self.job.emit(risk).await?;
                self.job.emit(proof).await?;
                found += 1;
            }
        }
        lines.finish().await?;
        info!(repository = %self.asset.dns, findings = found, "secret scan complete");
        Ok(())
    }
}
