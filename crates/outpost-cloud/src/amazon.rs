//! AWS accounts
//!
//! A provided asset names an account (or organization root). It gets one
//! system asset per region plus one per member account. A system asset
//! named `{account}:{region}` is enumerated directly: EC2, Lambda URLs,
//! API Gateway, and in the first region Route53.

use async_trait::async_trait;
use outpost_core::{Asset, Capability, Error, Job, Result};
use outpost_exec::{normalize, process};
use serde::Deserialize;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{descend, publish, tolerate};

pub const REGIONS: [&str; 17] = [
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "ap-south-1",
    "eu-north-1",
    "eu-west-3",
    "eu-west-2",
    "eu-west-1",
    "ap-northeast-3",
    "ap-northeast-2",
    "ap-northeast-1",
    "ca-central-1",
    "sa-east-1",
    "ap-southeast-1",
    "ap-southeast-2",
    "eu-central-1",
];

/// Role assumed in the target account unless config `role` names another
pub const DEFAULT_ROLE: &str = "Outpost";
const LAMBDA_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Default, Deserialize)]
struct Credentials {
    #[serde(rename = "AccessKeyId")]
    id: String,
    #[serde(rename = "SecretAccessKey")]
    key: String,
    #[serde(rename = "SessionToken")]
    token: String,
}

/// Assumed-role credentials scoped to one account and region
#[derive(Debug, Clone)]
struct Session {
    account: String,
    region: String,
    credentials: Credentials,
}

impl Session {
    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("aws");
        cmd.args(args)
            .env("AWS_ACCESS_KEY_ID", &self.credentials.id)
            .env("AWS_SECRET_ACCESS_KEY", &self.credentials.key)
            .env("AWS_SESSION_TOKEN", &self.credentials.token);
        cmd
    }
}

pub struct Amazon {
    job: Job,
    asset: Asset,
}

impl Amazon {
    pub fn new(job: Job) -> Box<dyn Capability> {
        Box::new(Self {
            asset: job.target.clone(),
            job,
        })
    }

    /// `(account, region)`; provided assets carry no region
    fn target(&self) -> Result<(String, Option<String>)> {
        if !self.asset.system() {
            return Ok((self.asset.name.clone(), None));
        }
        match self.asset.name.split_once(':') {
            Some((account, region)) if !account.is_empty() && !region.is_empty() => {
                Ok((account.to_string(), Some(region.to_string())))
            }
            _ => Err(Error::InvalidTarget(format!(
                "expected account:region, got {}",
                self.asset.name
            ))),
        }
    }

    async fn assume_role(&self, account: &str) -> Result<Credentials> {
        let role = self
            .asset
            .config
            .get("role")
            .map(String::as_str)
            .unwrap_or(DEFAULT_ROLE);
        let arn = format!("arn:aws:iam::{}:role/{}", account, role);

        let mut cmd = Command::new("aws");
        cmd.args([
            "sts",
            "assume-role",
            "--role-arn",
            &arn,
            "--role-session-name",
            "outpost",
            "--external-id",
            &self.job.username,
            "--query",
            "Credentials",
            "--region",
            REGIONS[0],
        ]);
        let output = process::run_stdout(cmd)
            .await
            .map_err(|e| Error::Authentication(format!("failed to assume role {}: {}", arn, e)))?;
        Ok(serde_json::from_str(&output)?)
    }

    /// One system asset per region, carrying the account's config, each
    /// queued for enumeration
    async fn send(&self, account: &str) -> Result<()> {
        for region in REGIONS {
            let asset = Asset::new("amazon", format!("{}:{}", account, region))
                .with_config(self.asset.config.clone());
            self.job.emit(asset.clone()).await?;
            descend(&self.job, "amazon", asset).await?;
        }
        Ok(())
    }

    async fn accounts(&self, session: &Session) -> Result<()> {
        let mut lines = process::stream(session.command(&[
            "organizations",
            "list-accounts",
            "--query",
            "Accounts[*].[Id]",
            "--output",
            "text",
        ]))?;
        while let Some(line) = lines.next_line().await? {
            let account = line.trim();
            if !account.is_empty() && account != session.account {
                self.send(account).await?;
            }
        }
        lines.finish().await
    }

    /// Public EC2 instances
    async fn network(&self, session: &Session) -> Result<()> {
        let mut lines = process::stream(session.command(&[
            "ec2",
            "describe-instances",
            "--region",
            &session.region,
            "--query",
            "Reservations[*].Instances[?PublicIpAddress != null && PublicDnsName != null].[PublicIpAddress, PublicDnsName, InstanceId]",
            "--output",
            "text",
        ]))?;
        while let Some(line) = lines.next_line().await? {
            if let Some((asset, arn)) = parse_instance(&line, session) {
                publish(&self.job, asset, &arn).await?;
            }
        }
        lines.finish().await
    }

    async fn gateway(&self, session: &Session) -> Result<()> {
        let mut lines = process::stream(session.command(&[
            "apigateway",
            "get-rest-apis",
            "--region",
            &session.region,
            "--query",
            "items[*].[id, name]",
            "--output",
            "text",
        ]))?;
        while let Some(line) = lines.next_line().await? {
            if let Some((asset, arn)) = parse_gateway(&line, &session.region) {
                publish(&self.job, asset, &arn).await?;
            }
        }
        lines.finish().await
    }

    /// Functions with a public URL, looked up with bounded concurrency
    async fn lambda(&self, session: &Session) -> Result<()> {
        let mut lines = process::stream(session.command(&[
            "lambda",
            "list-functions",
            "--region",
            &session.region,
            "--query",
            "Functions[*].[FunctionName]",
            "--output",
            "text",
        ]))?;

        let limit = Arc::new(Semaphore::new(LAMBDA_CONCURRENCY));
        let mut tasks = JoinSet::new();
        while let Some(line) = lines.next_line().await? {
            let function = line.trim().to_string();
            if function.is_empty() {
                continue;
            }
            let (job, session, limit) = (self.job.clone(), session.clone(), limit.clone());
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await.map_err(|e| Error::Other(e.to_string()))?;
                function_url(&job, &session, &function).await
            });
        }
        let listed = lines.finish().await;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => result?,
                Err(err) => warn!(error = %err, "function url task failed"),
            }
        }
        listed
    }

    async fn route53(&self, session: &Session) -> Result<()> {
        let zones = process::run_stdout(session.command(&[
            "route53",
            "list-hosted-zones",
            "--query",
            "HostedZones[].Id",
            "--output",
            "json",
        ]))
        .await?;
        let zones: Vec<String> = serde_json::from_str(&zones)?;

        for zone in zones {
            let id = zone.trim_start_matches("/hostedzone/");
            let records = process::run_stdout(session.command(&[
                "route53",
                "list-resource-record-sets",
                "--hosted-zone-id",
                id,
                "--query",
                "ResourceRecordSets[?Type == 'A' || Type == 'AAAA' || Type == 'CNAME']",
            ]))
            .await;
            let records = match records {
                Ok(records) => records,
                Err(err) => {
                    warn!(zone = %id, error = %err, "failed to list resource record sets");
                    continue;
                }
            };
            let arn = format!("arn:aws:route53::{}:hostedzone/{}", session.account, id);
            for asset in parse_records(&records)? {
                publish(&self.job, asset, &arn).await?;
            }
        }
        Ok(())
    }
}

async fn function_url(job: &Job, session: &Session, function: &str) -> Result<()> {
    let output = process::run_stdout(session.command(&[
        "lambda",
        "get-function-url-config",
        "--function-name",
        function,
        "--region",
        &session.region,
        "--query",
        "FunctionUrl",
        "--output",
        "text",
    ]))
    .await;
    let url = match output {
        Ok(url) => url,
        Err(err) => {
            debug!(function, error = %err, "no function url");
            return Ok(());
        }
    };
    let host = url.trim().trim_start_matches("https://").trim_matches('/');
    if host.is_empty() || host == "None" {
        return Ok(());
    }
    let arn = format!(
        "arn:aws:lambda:{}:{}:function:{}",
        session.region, session.account, function
    );
    publish(job, Asset::new(host, function), &arn).await
}

fn parse_instance(line: &str, session: &Session) -> Option<(Asset, String)> {
    let mut fields = line.split('\t');
    let (ip, dns, id) = (fields.next()?, fields.next()?, fields.next()?);
    let arn = format!(
        "arn:aws:ec2:{}:{}:instance/{}",
        session.region,
        session.account,
        id.trim()
    );
    Some((Asset::new(dns, ip), arn))
}

fn parse_gateway(line: &str, region: &str) -> Option<(Asset, String)> {
    let (id, stage) = line.split_once('\t')?;
    let dns = format!("{}.execute-api.{}.amazonaws.com/{}", id, region, stage.trim());
    let arn = format!("arn:aws:apigateway:{}::/restapis/{}", region, id);
    Some((Asset::new(dns, id), arn))
}

#[derive(Debug, Deserialize)]
struct RecordSet {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ResourceRecords", default)]
    records: Vec<ResourceRecord>,
}

#[derive(Debug, Deserialize)]
struct ResourceRecord {
    #[serde(rename = "Value")]
    value: String,
}

fn parse_records(output: &str) -> Result<Vec<Asset>> {
    let sets: Vec<RecordSet> = serde_json::from_str(output)?;
    Ok(sets
        .iter()
        .flat_map(|set| {
            set.records
                .iter()
                .map(move |record| Asset::new(normalize(&set.name, &set.name), normalize(&record.value, &record.value)))
        })
        .collect())
}

#[async_trait]
impl Capability for Amazon {
    fn name(&self) -> &'static str {
        "amazon"
    }

    fn matches(&self) -> bool {
        self.asset.is("amazon") && !self.asset.name.is_empty()
    }

    fn timeout(&self) -> u64 {
        45
    }

    async fn invoke(&self) -> Result<()> {
        let (account, region) = self.target()?;
        let credentials = self.assume_role(&account).await?;

        let Some(region) = region else {
            let session = Session {
                account: account.clone(),
                region: REGIONS[0].to_string(),
                credentials,
            };
            self.send(&account).await?;
            return tolerate("amazon", "accounts", self.accounts(&session).await);
        };

        let session = Session {
            account,
            region,
            credentials,
        };
        info!(account = %session.account, region = %session.region, "enumerating aws region");
        tolerate("amazon", "ec2", self.network(&session).await)?;
        tolerate("amazon", "lambda", self.lambda(&session).await)?;
        tolerate("amazon", "apigateway", self.gateway(&session).await)?;
        if session.region == REGIONS[0] {
            tolerate("amazon", "route53", self.route53(&session).await)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            account: "123456789012".into(),
            region: "us-west-2".into(),
            credentials: Credentials::default(),
        }
    }

    #[test]
    fn test_target() {
        let root = Asset::new("amazon", "123456789012").with_source(outpost_core::Origin::Provided);
        let amazon = Amazon {
            asset: root.clone(),
            job: Job::new("amazon", root),
        };
        assert_eq!(amazon.target().unwrap(), ("123456789012".to_string(), None));

        let region = Asset::new("amazon", "123456789012:eu-west-1");
        let amazon = Amazon {
            asset: region.clone(),
            job: Job::new("amazon", region),
        };
        assert_eq!(
            amazon.target().unwrap(),
            ("123456789012".to_string(), Some("eu-west-1".to_string()))
        );

        let bad = Asset::new("amazon", "123456789012");
        let amazon = Amazon {
            asset: bad.clone(),
            job: Job::new("amazon", bad),
        };
        assert!(matches!(amazon.target(), Err(Error::InvalidTarget(_))));
    }

    #[tokio::test]
    async fn test_send_queues_every_region() {
        let (stream, mut receiver) = outpost_core::Stream::channel();
        let root = Asset::new("amazon", "123456789012").with_source(outpost_core::Origin::Provided);
        let mut job = Job::new("amazon", root.clone());
        job.stream = Some(stream);
        let amazon = Amazon { asset: root, job };

        let task = tokio::spawn(async move { amazon.send("210987654321").await });
        let mut assets = 0;
        let mut jobs = Vec::new();
        while let Some(entity) = receiver.recv().await {
            match entity {
                outpost_core::Entity::Asset(_) => assets += 1,
                outpost_core::Entity::Job(child) => jobs.push(child),
                other => panic!("unexpected {:?}", other),
            }
        }
        task.await.unwrap().unwrap();

        assert_eq!(assets, REGIONS.len());
        assert_eq!(jobs.len(), REGIONS.len());
        assert!(jobs.iter().all(|job| job.source == "amazon"));
        assert_eq!(jobs[0].target.name, "210987654321:us-east-1");
        assert!(jobs[0].target.system());
    }

    #[test]
    fn test_credentials() {
        let credentials: Credentials = serde_json::from_str(
            r#"{"AccessKeyId":"ASIA","SecretAccessKey":"secret","SessionToken":"token","Expiration":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(credentials.id, "ASIA");
        assert_eq!(credentials.token, "token");
    }

    #[test]
    fn test_parse_instance() {
        let (asset, arn) =
            parse_instance("3.4.5.6\tec2-3-4-5-6.us-west-2.compute.amazonaws.com\ti-0abc", &session()).unwrap();
        assert_eq!(asset.dns, "ec2-3-4-5-6.us-west-2.compute.amazonaws.com");
        assert_eq!(asset.name, "3.4.5.6");
        assert_eq!(arn, "arn:aws:ec2:us-west-2:123456789012:instance/i-0abc");
        assert!(parse_instance("3.4.5.6", &session()).is_none());
    }

    #[test]
    fn test_parse_gateway() {
        let (asset, arn) = parse_gateway("a1b2c3\tprod", "us-west-2").unwrap();
        assert_eq!(asset.dns, "a1b2c3.execute-api.us-west-2.amazonaws.com/prod");
        assert_eq!(asset.name, "a1b2c3");
        assert_eq!(arn, "arn:aws:apigateway:us-west-2::/restapis/a1b2c3");
    }

    #[test]
    fn test_parse_records() {
        let output = r#"[
            {"Name": "www.example.com.", "Type": "A", "ResourceRecords": [{"Value": "1.2.3.4"}, {"Value": "5.6.7.8"}]},
            {"Name": "app.example.com.", "Type": "CNAME", "ResourceRecords": [{"Value": "lb.example.net."}]},
            {"Name": "alias.example.com.", "Type": "A", "AliasTarget": {}}
        ]"#;
        let assets = parse_records(output).unwrap();
        let keys: Vec<&str> = assets.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "#asset#www.example.com#1.2.3.4",
                "#asset#www.example.com#5.6.7.8",
                "#asset#app.example.com#lb.example.net",
            ]
        );
    }

    #[test]
    fn test_matches() {
        let amazon = Amazon::new(Job::new("amazon", Asset::new("amazon", "123456789012")));
        assert!(amazon.matches());
        assert_eq!(amazon.timeout(), 45);
        let other = Amazon::new(Job::new("amazon", Asset::new("example.com", "example.com")));
        assert!(!other.matches());
    }
}
