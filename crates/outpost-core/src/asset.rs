//! Assets: hosts, addresses, cloud accounts, repositories

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::attribute::Attribute;
use crate::class::{classify, AssetClass};
use crate::status::{future, now, AssetStatus, History, Origin};

/// Free-form string map carried from an asset or job to capabilities
pub type Config = BTreeMap<String, String>;

/// Hours an active asset stays alive without being visited
pub const ASSET_TTL_HOURS: i64 = 7 * 24;

static VALID_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#asset(#[^\s#]+){2}$").expect("valid regex"));

/// A discovered or provided attack-surface entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default)]
    pub username: String,
    pub key: String,
    #[serde(default)]
    pub source: Origin,
    pub dns: String,
    pub name: String,
    #[serde(default)]
    pub status: AssetStatus,
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default)]
    pub history: Vec<History>,
}

impl Asset {
    /// Create an active, discovered asset
    pub fn new(dns: impl Into<String>, name: impl Into<String>) -> Self {
        let dns = dns.into();
        let name = name.into();
        let stamp = now();
        Self {
            key: format!("#asset#{}#{}", dns, name),
            dns,
            name,
            status: AssetStatus::Active,
            source: Origin::Discovered,
            created: stamp.clone(),
            updated: stamp,
            ttl: future(ASSET_TTL_HOURS),
            ..Default::default()
        }
    }

    /// Set the initial status
    pub fn with_status(mut self, status: AssetStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the initial origin
    pub fn with_source(mut self, source: Origin) -> Self {
        self.source = source;
        self
    }

    /// Attach config at construction time
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Derived class, evaluated against the name and then the DNS
    pub fn class(&self) -> AssetClass {
        classify(&[&self.name, &self.dns])
    }

    /// True if the status code or the class starts with `value`
    pub fn is(&self, value: &str) -> bool {
        self.status.as_str().starts_with(value) || self.class().as_str().starts_with(value)
    }

    pub fn valid(&self) -> bool {
        VALID_KEY.is_match(&self.key)
    }

    /// Found by a capability rather than entered by a user
    pub fn system(&self) -> bool {
        self.source == Origin::Discovered
    }

    /// Apply an update, recording a history entry when the status changes
    pub fn merge(&mut self, update: &Asset) {
        if self.status != update.status {
            self.history.push(History {
                from: self.status.as_str().to_string(),
                to: update.status.as_str().to_string(),
                by: update.source.as_str().to_string(),
                comment: String::new(),
                updated: now(),
            });
            self.status = update.status;
        }
        if !update.created.is_empty() {
            self.created = update.created.clone();
        }
        if !self.status.is_active() {
            self.ttl = 0;
        }
    }

    /// Re-confirm the asset, refreshing its TTL while active
    pub fn visit(&mut self, config: Config) -> Asset {
        self.updated = now();
        if self.status.is_active() {
            self.ttl = future(ASSET_TTL_HOURS);
        }
        self.config = config;
        self.clone()
    }

    /// Attribute owned by this asset
    pub fn attribute(&self, name: impl Into<String>, value: impl Into<String>) -> Attribute {
        Attribute::new(name, value, &self.key)
    }

    /// New asset inheriting this asset's status
    pub fn spawn(&self, dns: impl Into<String>, name: impl Into<String>) -> Asset {
        Asset::new(dns, name).with_status(self.status)
    }
}
