//! Port scanning
//!
//! IPv6 hosts go through nmap, IPv4 hosts and ranges through masscan. IPv4
//! ranges wider than a /24 are split and re-queued as one job per /24; IPv6
//! ranges are scanned as given. Each
//! open port is fingerprinted with fingerprintx unless the host looks like a
//! honeypot.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use outpost_core::{Asset, AssetStatus, Capability, Error, Job, Result};
use outpost_exec::process;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Hosts with more open ports than this are tagged and not fingerprinted
pub const HONEYPOT: usize = 25;

static NMAP_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)/tcp\s+\w+\s+\w+").expect("valid regex"));
static MASSCAN_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)/tcp on ([0-9A-Fa-f:.]+)").expect("valid regex"));

/// Open ports per address, in discovery order
type Addresses = BTreeMap<String, Vec<String>>;

#[derive(Debug, Deserialize)]
struct Fingerprint {
    #[serde(default)]
    protocol: String,
}

/// How a target gets scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Nmap,
    Masscan { rate: &'static str },
    /// Re-queue as one job per /24
    Split,
}

fn plan(asset: &Asset) -> Result<Plan> {
    if asset.is("ipv6") {
        return Ok(Plan::Nmap);
    }
    if asset.is("ipv4") {
        return Ok(Plan::Masscan { rate: "5000" });
    }
    match parse_cidr(&asset.name) {
        Some((IpAddr::V4(_), prefix)) if prefix < 24 => Ok(Plan::Split),
        Some(_) => Ok(Plan::Masscan { rate: "50000" }),
        None => Err(Error::InvalidTarget(format!("unsupported target {}", asset.name))),
    }
}

pub struct PortScan {
    job: Job,
    asset: Asset,
}

impl PortScan {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
        })
    }

    async fn nmap(&self, addresses: &mut Addresses) -> Result<()> {
        let mut cmd = Command::new("nmap");
        cmd.args(["-Pn", "--host-timeout", "1m", "--max-retries", "0"])
            .arg(&self.asset.name)
            .arg("-6");

        let mut lines = process::stream(cmd)?;
        while let Some(line) = lines.next_line().await? {
            if let Some(port) = parse_nmap(&line) {
                addresses.entry(self.asset.name.clone()).or_default().push(port);
            }
        }
        lines.finish().await
    }

    async fn masscan(&self, addresses: &mut Addresses, rate: &str) -> Result<()> {
        let mut cmd = Command::new("masscan");
        cmd.arg("-p-")
            .arg(format!("--rate={}", rate))
            .arg(&self.asset.name);

        let mut lines = process::stream(cmd)?;
        while let Some(line) = lines.next_line().await? {
            if let Some((ip, port)) = parse_masscan(&line) {
                addresses.entry(ip).or_default().push(port);
            }
        }
        lines.finish().await
    }

    /// Queue one portscan job per /24 inside the range
    async fn fan_out(&self) -> Result<()> {
        for cidr in split(&self.asset.name) {
            let mut child = Asset::new(cidr.as_str(), cidr.as_str());
            child.key = self.asset.key.clone();
            self.job.emit(Job::new("portscan", child)).await?;
        }
        Ok(())
    }
}

async fn fingerprint(job: Job, asset: Asset, port: String) -> Result<()> {
    let mut cmd = Command::new("fingerprintx");
    cmd.args(["-t", &host_port(&asset.name, &port), "--json"]);

    let protocol = match process::run_stdout(cmd).await {
        Ok(output) => parse_fingerprint(&output),
        Err(err) => {
            debug!(host = %asset.name, port = %port, error = %err, "fingerprint failed");
            None
        }
    };

    job.emit(asset.attribute("port", port.as_str())).await?;
    if let Some(protocol) = protocol {
        job.emit(asset.attribute(protocol.as_str(), port.as_str())).await?;
        job.emit(asset.attribute("protocol", protocol)).await?;
    }
    Ok(())
}

fn host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn parse_nmap(line: &str) -> Option<String> {
    NMAP_PORT.captures(line).map(|caps| caps[1].to_string())
}

fn parse_masscan(line: &str) -> Option<(String, String)> {
    MASSCAN_PORT
        .captures(line)
        .map(|caps| (caps[2].to_string(), caps[1].to_string()))
}

/// Lower-cased protocol from the first JSON record that names one
fn parse_fingerprint(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| serde_json::from_str::<Fingerprint>(line.trim()).ok())
        .map(|fp| fp.protocol.to_lowercase())
        .find(|protocol| !protocol.is_empty())
}

fn parse_cidr(cidr: &str) -> Option<(IpAddr, u8)> {
    let (addr, prefix) = cidr.split_once('/')?;
    Some((addr.parse().ok()?, prefix.parse().ok()?))
}

/// Split an IPv4 range into /24s. Ranges already at /24 or narrower come back unchanged.
pub fn split(cidr: &str) -> Vec<String> {
    let (addr, prefix) = match parse_cidr(cidr) {
        Some((IpAddr::V4(addr), prefix)) if prefix <= 32 => (addr, prefix),
        _ => return Vec::new(),
    };
    if prefix >= 24 {
        return vec![cidr.to_string()];
    }

    let mask = u32::MAX << (32 - u32::from(prefix));
    let base = u32::from(addr) & mask;
    let count = 1u32 << (24 - u32::from(prefix));
    (0..count)
        .map(|i| format!("{}/24", Ipv4Addr::from(base + (i << 8))))
        .collect()
}

#[async_trait]
impl Capability for PortScan {
    fn name(&self) -> &'static str {
        "portscan"
    }

    fn matches(&self) -> bool {
        let low = self.asset.is(AssetStatus::ActiveLow.as_str());
        !low && (self.asset.is("ip") || self.asset.is("cidr"))
    }

    async fn invoke(&self) -> Result<()> {
        let mut addresses = Addresses::new();
        let range = self.asset.is("cidr");

        match plan(&self.asset)? {
            Plan::Nmap => self.nmap(&mut addresses).await?,
            Plan::Masscan { rate } => self.masscan(&mut addresses, rate).await?,
            Plan::Split => return self.fan_out().await,
        }

        let mut tasks = JoinSet::new();
        for (ip, ports) in addresses {
            let host = if range {
                let host = self.job.target.spawn(ip.as_str(), ip.as_str());
                self.job.emit(host.clone()).await?;
                host
            } else {
                self.job.target.clone()
            };

            if ports.len() > HONEYPOT {
                info!(host = %ip, ports = ports.len(), "skipping likely honeypot");
                self.job.emit(host.attribute("interesting", "honeypot")).await?;
                continue;
            }

            for port in ports {
                tasks.spawn(fingerprint(self.job.clone(), host.clone(), port));
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Err(err)) => warn!(error = %err, "fingerprint task failed"),
                Err(err) => warn!(error = %err, "fingerprint task panicked"),
                Ok(Ok(())) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_wide_range() {
        let subnets = split("10.0.0.0/22");
        assert_eq!(
            subnets,
            vec!["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24", "10.0.3.0/24"]
        );
        assert_eq!(split("10.0.0.0/16").len(), 256);
        assert_eq!(split("10.0.255.0/16").last().unwrap(), "10.0.255.0/24");
    }

    #[test]
    fn test_split_narrow_or_invalid() {
        assert_eq!(split("10.0.0.0/24"), vec!["10.0.0.0/24"]);
        assert_eq!(split("10.0.0.128/25"), vec!["10.0.0.128/25"]);
        assert!(split("not-a-range").is_empty());
        assert!(split("2001:db8::/32").is_empty());
    }

    #[test]
    fn test_parse_tool_output() {
        assert_eq!(
            parse_masscan("Discovered open port 443/tcp on 93.184.216.34"),
            Some(("93.184.216.34".to_string(), "443".to_string()))
        );
        assert_eq!(
            parse_masscan("Discovered open port 22/tcp on 2001:db8::1"),
            Some(("2001:db8::1".to_string(), "22".to_string()))
        );
        assert_eq!(parse_masscan("rate: 5.00-kpps"), None);
        assert_eq!(parse_nmap("22/tcp   open  ssh").as_deref(), Some("22"));
        assert_eq!(parse_nmap("Nmap done"), None);
    }

    #[test]
    fn test_parse_fingerprint() {
        let output = "noise\n{\"ip\":\"1.2.3.4\",\"port\":443,\"protocol\":\"HTTPS\"}\n";
        assert_eq!(parse_fingerprint(output).as_deref(), Some("https"));
        assert_eq!(parse_fingerprint("{\"port\":1}"), None);
        assert_eq!(parse_fingerprint(""), None);
    }

    #[test]
    fn test_plan() {
        let target = |name: &str| Asset::new(name, name);
        assert_eq!(plan(&target("2001:db8::1")).unwrap(), Plan::Nmap);
        assert_eq!(plan(&target("93.184.216.34")).unwrap(), Plan::Masscan { rate: "5000" });
        assert_eq!(plan(&target("8.8.8.0/24")).unwrap(), Plan::Masscan { rate: "50000" });
        assert_eq!(plan(&target("8.8.0.0/16")).unwrap(), Plan::Split);
        assert_eq!(plan(&target("2001:db8::/64")).unwrap(), Plan::Masscan { rate: "50000" });
        assert_eq!(plan(&target("2001:db8::/32")).unwrap(), Plan::Masscan { rate: "50000" });
        assert!(matches!(plan(&target("example.com")), Err(Error::InvalidTarget(_))));
    }

    #[test]
    fn test_host_port() {
        assert_eq!(host_port("1.2.3.4", "22"), "1.2.3.4:22");
        assert_eq!(host_port("2001:db8::1", "22"), "[2001:db8::1]:22");
    }

    #[test]
    fn test_matches() {
        let ip = Job::new("portscan", Asset::new("93.184.216.34", "93.184.216.34"));
        assert!(PortScan::new(ip).matches());

        let range = Job::new("portscan", Asset::new("8.8.8.0/24", "8.8.8.0/24"));
        assert!(PortScan::new(range).matches());

        let low = Job::new(
            "portscan",
            Asset::new("93.184.216.34", "93.184.216.34").with_status(AssetStatus::ActiveLow),
        );
        assert!(!PortScan::new(low).matches());

        let private = Job::new("portscan", Asset::new("10.0.0.1", "10.0.0.1"));
        assert!(!PortScan::new(private).matches());
    }
}
