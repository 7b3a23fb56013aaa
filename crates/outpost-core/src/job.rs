//! Jobs: one capability run against one target asset

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::asset::{Asset, Config};
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::status::{future, now, JobStatus};
use crate::stream::Stream;

/// Hours a queued job may wait before it expires
pub const JOB_QUEUE_TTL_HOURS: i64 = 12;
/// Hours a job record is kept after a status update
pub const JOB_TTL_HOURS: i64 = 7 * 24;

static JOB_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#job#([^#]+)#([^#]+)#([^#]+)$").expect("valid regex"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub username: String,
    pub key: String,
    pub dns: String,
    /// Capability name
    pub source: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub target: Asset,
    /// Output channel, attached by the dispatcher for the duration of a run
    #[serde(skip)]
    pub stream: Option<Stream>,
}

impl Job {
    /// Queue capability `source` against `asset`
    pub fn new(source: impl Into<String>, asset: Asset) -> Self {
        let source = source.into();
        let stamp = now();
        Self {
            key: format!("#job#{}#{}#{}", asset.dns, asset.name, source),
            dns: asset.dns.clone(),
            source,
            target: asset,
            status: JobStatus::Queued,
            created: stamp.clone(),
            updated: stamp,
            ttl: future(JOB_QUEUE_TTL_HOURS),
            ..Default::default()
        }
    }

    /// Rebuild a queued job from `#job#{dns}#{name}#{source}`
    pub fn from_key(key: &str) -> Result<Self> {
        let caps = JOB_KEY
            .captures(key)
            .ok_or_else(|| Error::InvalidKey(format!("expected #job#dns#name#source, got {}", key)))?;
        Ok(Job::new(&caps[3], Asset::new(&caps[1], &caps[2])))
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn is(&self, prefix: &str) -> bool {
        self.status.as_str().starts_with(prefix)
    }

    pub fn update(&mut self, status: JobStatus) {
        self.status = status;
        self.updated = now();
        self.ttl = future(JOB_TTL_HOURS);
    }

    /// Send an entity to whoever drains this job. Completes once it has been received.
    pub async fn emit(&self, entity: impl Into<Entity>) -> Result<()> {
        match &self.stream {
            Some(stream) => stream.send(entity).await,
            None => Err(Error::StreamClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job() {
        let job = Job::new("whois", Asset::new("example.com", "example.com"));
        assert_eq!(job.key, "#job#example.com#example.com#whois");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.dns, "example.com");
        assert!(job.is("JQ"));
        assert!(job.stream.is_none());
    }

    #[test]
    fn test_from_key() {
        let job = Job::from_key("#job#example.com#1.2.3.4#portscan").unwrap();
        assert_eq!(job.source, "portscan");
        assert_eq!(job.target.dns, "example.com");
        assert_eq!(job.target.name, "1.2.3.4");
        assert_eq!(job.key, "#job#example.com#1.2.3.4#portscan");

        assert!(Job::from_key("#job#example.com").is_err());
    }

    #[test]
    fn test_update_extends_ttl() {
        let mut job = Job::new("ssh", Asset::new("a", "b"));
        let queued_ttl = job.ttl;
        job.update(JobStatus::Pass);
        assert_eq!(job.status, JobStatus::Pass);
        assert!(job.ttl > queued_ttl);
    }

    #[test]
    fn test_stream_is_not_serialized() {
        let (stream, _rx) = Stream::channel();
        let mut job = Job::new("ssh", Asset::new("a", "b"));
        job.stream = Some(stream);
        let json: serde_json::Value = serde_json::to_value(&job).unwrap();
        assert!(json.get("stream").is_none());
        assert!(json.get("name").is_none());
        assert_eq!(json["status"], "JQ");
    }

    #[tokio::test]
    async fn test_emit_without_stream_fails() {
        let job = Job::new("ssh", Asset::new("a", "b"));
        let err = job.emit(Asset::new("c", "d")).await.unwrap_err();
        assert!(matches!(err, Error::StreamClosed));
    }
}
