//! SSH banner checks

use async_trait::async_trait;
use outpost_core::{Asset, Capability, Job, Result, Risk, RiskStatus, Severity};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const IO_TIMEOUT: Duration = Duration::from_secs(2);

/// OpenSSH releases affected by CVE-2024-6387
const REGRESSHION_VERSIONS: &[&str] = &[
    "SSH-2.0-OpenSSH_8.5p1",
    "SSH-2.0-OpenSSH_8.6p1",
    "SSH-2.0-OpenSSH_8.7p1",
    "SSH-2.0-OpenSSH_8.8p1",
    "SSH-2.0-OpenSSH_8.9p1",
    "SSH-2.0-OpenSSH_9.0p1",
    "SSH-2.0-OpenSSH_9.1p1",
    "SSH-2.0-OpenSSH_9.2p1",
    "SSH-2.0-OpenSSH_9.3p1",
    "SSH-2.0-OpenSSH_9.4p1",
    "SSH-2.0-OpenSSH_9.5p1",
    "SSH-2.0-OpenSSH_9.6p1",
    "SSH-2.0-OpenSSH_9.7p1",
];

/// Distribution builds carrying the fix
const REGRESSHION_PATCHED: &[&str] = &[
    "SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.10",
    "SSH-2.0-OpenSSH_9.3p1 Ubuntu-3ubuntu3.6",
    "SSH-2.0-OpenSSH_9.6p1 Ubuntu-3ubuntu13.3",
    "SSH-2.0-OpenSSH_9.6p1 Ubuntu-3ubuntu13.4",
    "SSH-2.0-OpenSSH_9.3p1 Ubuntu-1ubuntu3.6",
    "SSH-2.0-OpenSSH_9.2p1 Debian-2+deb12u3",
    "SSH-2.0-OpenSSH_8.4p1 Debian-5+deb11u3",
    "SSH-2.0-OpenSSH_9.7p1 Debian-7",
    "SSH-2.0-OpenSSH_9.6 FreeBSD-20240701",
    "SSH-2.0-OpenSSH_9.7 FreeBSD-20240701",
];

/// Decides from a server banner whether the host is vulnerable
type BannerCheck = fn(&str) -> bool;

const CHECKS: &[(&str, BannerCheck)] = &[("CVE-2024-6387", regresshion)];

pub fn regresshion(banner: &str) -> bool {
    if REGRESSHION_PATCHED.iter().any(|patched| banner.contains(patched)) {
        return false;
    }
    REGRESSHION_VERSIONS.iter().any(|version| banner.contains(version))
}

/// Exchange identification strings and return what the server sent
pub async fn banner(host: &str, port: u16) -> Option<String> {
    let mut stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            debug!(host, port, error = %err, "ssh connect failed");
            return None;
        }
        Err(_) => {
            debug!(host, port, "ssh connect timed out");
            return None;
        }
    };

    timeout(IO_TIMEOUT, stream.write_all(b"SSH-2.0-OpenSSH\r\n"))
        .await
        .ok()?
        .ok()?;

    let mut buffer = [0u8; 1024];
    let n = timeout(IO_TIMEOUT, stream.read(&mut buffer)).await.ok()?.ok()?;
    if n == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&buffer[..n]).into_owned())
}

pub struct Ssh {
    job: Job,
    asset: Asset,
}

impl Ssh {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
        })
    }

    fn endpoint(&self) -> Option<(String, u16)> {
        let url = Url::parse(&self.asset.name).ok()?;
        let host = url.host_str()?.trim_matches(|c| c == '[' || c == ']').to_string();
        Some((host, url.port().unwrap_or(22)))
    }
}

#[async_trait]
impl Capability for Ssh {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn matches(&self) -> bool {
        self.asset.is("ssh")
    }

    async fn invoke(&self) -> Result<()> {
        let Some((host, port)) = self.endpoint() else {
            debug!(asset = %self.asset.name, "not an ssh url");
            return Ok(());
        };
        let Some(banner) = banner(&host, port).await else {
            return Ok(());
        };

        for (cve, vulnerable) in CHECKS {
            if !vulnerable(&banner) {
                continue;
            }
            let risk = Risk::new(&self.asset, *cve).with_status(RiskStatus::triage(Severity::High));
            self.job.emit(risk.clone()).await?;
            self.job.emit(risk.proof(banner.as_bytes())).await?;
            self.job.emit(risk.attribute("asset", self.asset.name.as_str())).await?;
        }
        Ok(())
    }
}
