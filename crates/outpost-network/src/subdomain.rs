//! Subdomain enumeration
//!
//! Resolves the root, then runs subfinder and assetfinder. Every candidate
//! that sits under the root is resolved in its own task.

use async_trait::async_trait;
use outpost_core::{Asset, Capability, Error, Job, Result};
use outpost_exec::{process, Resolver};
use regex::Regex;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub struct Subdomain {
    job: Job,
    asset: Asset,
}

impl Subdomain {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
        })
    }

    fn spawn_resolve(&self, resolver: &Resolver, tasks: &mut JoinSet<()>, domain: String) {
        let job = self.job.clone();
        let resolver = resolver.clone();
        tasks.spawn(async move {
            for ip in resolver.public_addresses(&domain).await {
                if job.emit(Asset::new(domain.as_str(), ip)).await.is_err() {
                    return;
                }
            }
        });
    }

    async fn enumerate(
        &self,
        cmd: Command,
        filter: &Regex,
        resolver: &Resolver,
        tasks: &mut JoinSet<()>,
    ) -> Result<()> {
        let mut lines = process::stream(cmd)?;
        while let Some(line) = lines.next_line().await? {
            let candidate = line.trim_end_matches('.').trim();
            if filter.is_match(candidate) {
                self.spawn_resolve(resolver, tasks, candidate.to_string());
            }
        }
        lines.finish().await
    }
}

/// Matches names strictly under `root`, case-insensitively
fn under(root: &str) -> Result<Regex> {
    Regex::new(&format!(r"(?i)^.*\.{}$", regex::escape(root)))
        .map_err(|e| Error::InvalidTarget(format!("{}: {}", root, e)))
}

#[async_trait]
impl Capability for Subdomain {
    fn name(&self) -> &'static str {
        "subdomain"
    }

    fn matches(&self) -> bool {
        self.asset.is("domain") || self.asset.is("tld")
    }

    async fn invoke(&self) -> Result<()> {
        let root = self.asset.dns.clone();
        let filter = under(&root)?;
        let resolver = Resolver::new()?;
        let mut tasks = JoinSet::new();
        self.spawn_resolve(&resolver, &mut tasks, root.clone());

        let mut subfinder = Command::new("subfinder");
        subfinder.args(["-d", &root, "-silent"]);
        let mut assetfinder = Command::new("assetfinder");
        assetfinder.args(["-subs-only", &root]);

        for cmd in [subfinder, assetfinder] {
            if let Err(err) = self.enumerate(cmd, &filter, &resolver, &mut tasks).await {
                warn!(domain = %root, error = %err, "enumerator failed");
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(domain = %root, error = %err, "resolver task failed");
            }
        }
        debug!(domain = %root, "subdomain enumeration complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::AssetStatus;

    #[test]
    fn test_under_root() {
        let filter = under("example.com").unwrap();
        assert!(filter.is_match("www.example.com"));
        assert!(filter.is_match("A.B.EXAMPLE.COM"));
        assert!(!filter.is_match("example.com"));
        assert!(!filter.is_match("wwwexample.com"));
        assert!(!filter.is_match("www.example.com.evil.net"));
        assert!(!filter.is_match("www.exampleXcom"));
    }

    #[test]
    fn test_matches() {
        let job = Job::new("subdomain", Asset::new("example.com", "example.com"));
        assert!(Subdomain::new(job).matches());
        let job = Job::new("subdomain", Asset::new("www.example.com", "www.example.com"));
        assert!(Subdomain::new(job).matches());
        let job = Job::new(
            "subdomain",
            Asset::new("1.2.3.4", "1.2.3.4").with_status(AssetStatus::Frozen),
        );
        assert!(!Subdomain::new(job).matches());
    }
}
