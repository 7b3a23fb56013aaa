//! Risks: exposures tied to a DNS value

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::asset::Asset;
use crate::attribute::Attribute;
use crate::file::File;
use crate::status::{future, now, History, Origin, RiskState, RiskStatus, Severity};

/// Hours a triaged risk stays alive without being visited
pub const RISK_TTL_HOURS: i64 = 7 * 24;

static VALID_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#risk#(\S+)#(\S+)$").expect("valid regex"));

/// A discovered security exposure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    #[serde(default)]
    pub username: String,
    pub key: String,
    pub dns: String,
    pub name: String,
    #[serde(default)]
    pub source: Origin,
    pub status: RiskStatus,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub history: Vec<History>,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default)]
    pub comment: String,
}

impl Risk {
    /// Create a triage/info risk against the asset's DNS
    pub fn new(asset: &Asset, name: impl Into<String>) -> Self {
        let name = name.into();
        let stamp = now();
        Self {
            key: format!("#risk#{}#{}", asset.dns, name),
            dns: asset.dns.clone(),
            name,
            status: RiskStatus::triage(Severity::Info),
            source: Origin::Provided,
            created: stamp.clone(),
            updated: stamp,
            ttl: future(RISK_TTL_HOURS),
            ..Default::default()
        }
    }

    /// Set the initial status
    pub fn with_status(mut self, status: RiskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn severity(&self) -> Severity {
        self.status.severity
    }

    pub fn state(&self) -> RiskState {
        self.status.state
    }

    /// True if the legacy status code starts with `prefix`
    pub fn is(&self, prefix: &str) -> bool {
        self.status.code().starts_with(prefix)
    }

    pub fn valid(&self) -> bool {
        VALID_KEY.is_match(&self.key)
    }

    /// Apply an update, recording a history entry when the status changes
    pub fn merge(&mut self, update: &Risk) {
        if self.status != update.status {
            self.history.push(History {
                from: self.status.code(),
                to: update.status.code(),
                by: update.source.as_str().to_string(),
                comment: update.comment.clone(),
                updated: now(),
            });
            self.status = update.status;
        }
        if !update.created.is_empty() {
            self.created = update.created.clone();
        }
        if self.state() != RiskState::Triage {
            self.ttl = 0;
        }
    }

    /// Move to `state`, keeping the current severity
    pub fn set(&mut self, state: RiskState) {
        let mut update = self.clone();
        update.status = RiskStatus::new(state, self.severity());
        self.merge(&update);
    }

    /// Re-confirm the risk; a remediated risk seen again is reopened
    pub fn visit(&mut self) -> Risk {
        self.updated = now();
        if self.state() == RiskState::Triage {
            self.ttl = future(RISK_TTL_HOURS);
        }
        if self.state() == RiskState::Remediated {
            self.set(RiskState::Open);
        }
        self.clone()
    }

    /// Evidence file stored under `proofs/{dns}/{name}`
    pub fn proof(&self, bytes: impl Into<Vec<u8>>) -> File {
        File::new(format!("proofs/{}/{}", self.dns, self.name)).with_bytes(bytes)
    }

    /// Attribute owned by this risk
    pub fn attribute(&self, name: impl Into<String>, value: impl Into<String>) -> Attribute {
        Attribute::new(name, value, &self.key)
    }
}
