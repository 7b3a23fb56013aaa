//! Attributes: key/value facts owned by an asset or risk

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::asset::{Asset, ASSET_TTL_HOURS};
use crate::status::{future, now, AssetStatus};

/// Longest key the store accepts
pub const MAX_KEY_LEN: usize = 1024;

static VALID_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#attribute(#[^\s#]+){2}#").expect("valid regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default)]
    pub username: String,
    pub key: String,
    /// Key of the owning asset or risk
    pub source: String,
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub ttl: i64,
}

impl Attribute {
    /// Create an attribute owned by the entity with key `owner`
    pub fn new(name: impl Into<String>, value: impl Into<String>, owner: &str) -> Self {
        let name = name.into();
        let value = value.into();
        let key = truncate(format!("#attribute#{}#{}{}", name, value, owner), MAX_KEY_LEN);
        let stamp = now();
        Self {
            key,
            source: owner.to_string(),
            name,
            value,
            created: stamp.clone(),
            updated: stamp,
            ttl: future(ASSET_TTL_HOURS),
            ..Default::default()
        }
    }

    pub fn valid(&self) -> bool {
        VALID_KEY.is_match(&self.key)
    }

    pub fn visit(&mut self) -> Attribute {
        self.updated = now();
        self.ttl = future(ASSET_TTL_HOURS);
        self.clone()
    }

    /// Capabilities a port-like attribute should trigger next
    pub fn tasks(&self) -> Vec<&'static str> {
        let mut tasks = Vec::new();
        if self.value.parse::<i64>().is_err() {
            return tasks;
        }
        if self.name.starts_with("http") {
            tasks.extend(["crawler", "nuclei"]);
        }
        if self.name == "ssh" {
            tasks.push("ssh");
        }
        tasks
    }

    /// Service URL asset (`{name}://{dns}:{value}`) keyed like this attribute.
    /// `None` when the owner key has no DNS segment.
    pub fn target(&self, status: AssetStatus) -> Option<Asset> {
        let dns = self.source.split('#').nth(2)?;
        let fqdn = format!("{}://{}:{}", self.name, dns, self.value);
        let mut asset = Asset::new(dns, fqdn).with_status(status);
        asset.key = self.key.clone();
        Some(asset)
    }
}

fn truncate(mut key: String, max: usize) -> String {
    if key.len() > max {
        let mut end = max;
        while !key.is_char_boundary(end) {
            end -= 1;
        }
        key.truncate(end);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, value: &str) -> Attribute {
        Asset::new("example.com", "1.2.3.4").attribute(name, value)
    }

    #[test]
    fn test_attribute_key() {
        let attr = port("https", "443");
        assert_eq!(attr.key, "#attribute#https#443#asset#example.com#1.2.3.4");
        assert_eq!(attr.source, "#asset#example.com#1.2.3.4");
        assert!(attr.valid());
    }

    #[test]
    fn test_tasks() {
        assert_eq!(port("https", "443").tasks(), vec!["crawler", "nuclei"]);
        assert_eq!(port("http", "8080").tasks(), vec!["crawler", "nuclei"]);
        assert_eq!(port("ssh", "22").tasks(), vec!["ssh"]);
        assert!(port("ssh", "not-a-number").tasks().is_empty());
        assert!(port("port", "22").tasks().is_empty());
    }

    #[test]
    fn test_target() {
        let asset = port("https", "443").target(AssetStatus::ActiveHigh).unwrap();
        assert_eq!(asset.dns, "example.com");
        assert_eq!(asset.name, "https://example.com:443");
        assert_eq!(asset.status, AssetStatus::ActiveHigh);
        assert_eq!(asset.key, "#attribute#https#443#asset#example.com#1.2.3.4");

        let orphan = Attribute::new("https", "443", "bogus");
        assert!(orphan.target(AssetStatus::Active).is_none());
    }

    #[test]
    fn test_long_keys_are_truncated() {
        let value = "é".repeat(700);
        let attr = Attribute::new("banner", value, "#asset#a#b");
        assert!(attr.key.len() <= MAX_KEY_LEN);
        assert!(attr.key.starts_with("#attribute#banner#"));
    }
}
