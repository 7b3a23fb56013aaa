//! Lifecycle codes for assets, risks and jobs
//!
//! Every code serializes to the compact legacy string the persistence layer
//! stores (`"AL"`, `"TH"`, `"JP"`), while the Rust side works with enums.

use chrono::{Duration, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Current UTC time in RFC 3339 with second precision
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Unix epoch seconds `hours` from now
pub fn future(hours: i64) -> i64 {
    (Utc::now() + Duration::hours(hours)).timestamp()
}

/// Asset lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetStatus {
    #[default]
    #[serde(rename = "A")]
    Active,
    /// Discovered but unverified
    #[serde(rename = "AL")]
    ActiveLow,
    /// Gets extra scrutiny such as crawling
    #[serde(rename = "AH")]
    ActiveHigh,
    #[serde(rename = "F")]
    Frozen,
    #[serde(rename = "FL")]
    FrozenLow,
    #[serde(rename = "FH")]
    FrozenHigh,
    #[serde(rename = "D")]
    Deleted,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Active => "A",
            AssetStatus::ActiveLow => "AL",
            AssetStatus::ActiveHigh => "AH",
            AssetStatus::Frozen => "F",
            AssetStatus::FrozenLow => "FL",
            AssetStatus::FrozenHigh => "FH",
            AssetStatus::Deleted => "D",
        }
    }

    /// True for `A`, `AL` and `AH`
    pub fn is_active(&self) -> bool {
        self.as_str().starts_with('A')
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "A" => Ok(AssetStatus::Active),
            "AL" => Ok(AssetStatus::ActiveLow),
            "AH" => Ok(AssetStatus::ActiveHigh),
            "F" => Ok(AssetStatus::Frozen),
            "FL" => Ok(AssetStatus::FrozenLow),
            "FH" => Ok(AssetStatus::FrozenHigh),
            "D" => Ok(AssetStatus::Deleted),
            other => Err(Error::Parse(format!("unknown asset status: {}", other))),
        }
    }
}

/// Workflow state of a risk, the prefix of its status code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RiskState {
    #[default]
    Triage,
    Open,
    Remediated,
    MachineOpen,
    MachineDeleted,
    Deleted,
}

impl RiskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskState::Triage => "T",
            RiskState::Open => "O",
            RiskState::Remediated => "R",
            RiskState::MachineOpen => "MO",
            RiskState::MachineDeleted => "MD",
            RiskState::Deleted => "D",
        }
    }
}

impl FromStr for RiskState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "T" => Ok(RiskState::Triage),
            "O" => Ok(RiskState::Open),
            "R" => Ok(RiskState::Remediated),
            "MO" => Ok(RiskState::MachineOpen),
            "MD" => Ok(RiskState::MachineDeleted),
            "D" => Ok(RiskState::Deleted),
            other => Err(Error::Parse(format!("unknown risk state: {}", other))),
        }
    }
}

/// Risk severity, the one-letter suffix of its status code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "I",
            Severity::Low => "L",
            Severity::Medium => "M",
            Severity::High => "H",
            Severity::Critical => "C",
        }
    }

    /// Map a tool's textual severity (`info`, `low`, ...) onto a severity.
    /// Unknown labels fall back to `Info`.
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Info,
        }
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "I" => Ok(Severity::Info),
            "L" => Ok(Severity::Low),
            "M" => Ok(Severity::Medium),
            "H" => Ok(Severity::High),
            "C" => Ok(Severity::Critical),
            other => Err(Error::Parse(format!("unknown severity: {}", other))),
        }
    }
}

/// Two-part risk status, serialized as `state + severity` (`"TH"`, `"MOC"`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RiskStatus {
    pub state: RiskState,
    pub severity: Severity,
}

impl RiskStatus {
    pub const fn new(state: RiskState, severity: Severity) -> Self {
        Self { state, severity }
    }

    pub const fn triage(severity: Severity) -> Self {
        Self::new(RiskState::Triage, severity)
    }

    pub fn code(&self) -> String {
        format!("{}{}", self.state.as_str(), self.severity.as_str())
    }
}

impl fmt::Display for RiskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.state.as_str(), self.severity.as_str())
    }
}

impl FromStr for RiskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() < 2 || !s.is_ascii() {
            return Err(Error::Parse(format!("invalid risk status: {}", s)));
        }
        let (state, severity) = s.split_at(s.len() - 1);
        Ok(Self {
            state: state.parse()?,
            severity: severity.parse()?,
        })
    }
}

impl Serialize for RiskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code())
    }
}

impl<'de> Deserialize<'de> for RiskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    #[default]
    #[serde(rename = "JQ")]
    Queued,
    #[serde(rename = "JR")]
    Running,
    #[serde(rename = "JP")]
    Pass,
    #[serde(rename = "JF")]
    Fail,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "JQ",
            JobStatus::Running => "JR",
            JobStatus::Pass => "JP",
            JobStatus::Fail => "JF",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an asset or risk came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Found by a capability
    #[default]
    Discovered,
    /// Entered by a user
    Provided,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Discovered => "discovered",
            Origin::Provided => "provided",
        }
    }
}

/// One status transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    pub from: String,
    pub to: String,
    pub by: String,
    #[serde(default)]
    pub comment: String,
    pub updated: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_status_codes() {
        let status: RiskStatus = "TH".parse().unwrap();
        assert_eq!(status.state, RiskState::Triage);
        assert_eq!(status.severity, Severity::High);

        let status: RiskStatus = "MOC".parse().unwrap();
        assert_eq!(status.state, RiskState::MachineOpen);
        assert_eq!(status.severity, Severity::Critical);
        assert_eq!(status.to_string(), "MOC");

        assert!("H".parse::<RiskStatus>().is_err());
        assert!("XH".parse::<RiskStatus>().is_err());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&RiskStatus::triage(Severity::Medium)).unwrap();
        assert_eq!(json, "\"TM\"");
        let json = serde_json::to_string(&AssetStatus::ActiveLow).unwrap();
        assert_eq!(json, "\"AL\"");
        let json = serde_json::to_string(&JobStatus::Pass).unwrap();
        assert_eq!(json, "\"JP\"");
        let status: AssetStatus = serde_json::from_str("\"FH\"").unwrap();
        assert_eq!(status, AssetStatus::FrozenHigh);
    }

    #[test]
    fn test_severity_labels() {
        assert_eq!(Severity::from_label("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::from_label("unknown"), Severity::Info);
        assert!(Severity::Critical > Severity::Low);
    }

    #[test]
    fn test_active_family() {
        assert!(AssetStatus::ActiveLow.is_active());
        assert!(!AssetStatus::FrozenHigh.is_active());
        assert!(!AssetStatus::Deleted.is_active());
    }
}
