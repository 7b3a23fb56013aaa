//! Rebuilding entities from their keys, and key based filters

use crate::asset::Asset;
use crate::attribute::Attribute;
use crate::error::{Error, Result};
use crate::file::File;
use crate::risk::Risk;

/// `#asset#{dns}#{name}`, or `#asset#{dns}` where name equals dns
pub fn asset_from_key(key: &str) -> Result<Asset> {
    let parts: Vec<&str> = key.split('#').collect();
    match parts.as_slice() {
        [_, _, dns] => Ok(Asset::new(*dns, *dns)),
        [_, _, dns, name] => Ok(Asset::new(*dns, *name)),
        _ => Err(Error::InvalidKey(format!(
            "expected #asset#dns#name or #asset#dns, got {}",
            key
        ))),
    }
}

/// `#risk#{dns}#{name}`
pub fn risk_from_key(key: &str) -> Result<Risk> {
    let parts: Vec<&str> = key.split('#').collect();
    match parts.as_slice() {
        [_, _, dns, name] => Ok(Risk::new(&Asset::new(*dns, *dns), *name)),
        _ => Err(Error::InvalidKey(format!(
            "expected #risk#dns#name, got {}",
            key
        ))),
    }
}

/// `#attribute#{name}#{value}#{owner key...}`
pub fn attribute_from_key(key: &str) -> Result<Attribute> {
    let parts: Vec<&str> = key.split('#').collect();
    if parts.len() < 6 {
        return Err(Error::InvalidKey(format!(
            "expected #attribute#name#value#KEY, got {}",
            key
        )));
    }
    let owner = format!("#{}", parts[4..].join("#"));
    Ok(Attribute::new(parts[2], parts[3], &owner))
}

/// Case-insensitive substring match on asset keys
pub fn filter_assets_by_key(assets: &[Asset], filter: &str) -> Vec<Asset> {
    let filter = filter.to_lowercase();
    assets
        .iter()
        .filter(|asset| asset.key.to_lowercase().contains(&filter))
        .cloned()
        .collect()
}

/// Case-insensitive substring match on file names
pub fn filter_files_by_name(files: &[File], filter: &str) -> Vec<File> {
    let filter = filter.to_lowercase();
    files
        .iter()
        .filter(|file| file.name.to_lowercase().contains(&filter))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_key_round_trip() {
        let asset = asset_from_key("#asset#example.com#1.2.3.4").unwrap();
        assert_eq!(asset.dns, "example.com");
        assert_eq!(asset.name, "1.2.3.4");
        assert_eq!(asset.key, "#asset#example.com#1.2.3.4");

        let collapsed = asset_from_key("#asset#example.com").unwrap();
        assert_eq!(collapsed.name, "example.com");
        assert_eq!(collapsed.key, "#asset#example.com#example.com");
        assert_eq!(asset_from_key(&collapsed.key).unwrap().key, collapsed.key);

        assert!(asset_from_key("#asset").is_err());
        assert!(asset_from_key("#asset#a#b#c").is_err());
    }

    #[test]
    fn test_risk_key_round_trip() {
        let risk = risk_from_key("#risk#example.com#domain-expiration").unwrap();
        assert_eq!(risk.dns, "example.com");
        assert_eq!(risk.name, "domain-expiration");
        assert_eq!(risk.key, "#risk#example.com#domain-expiration");
        assert!(risk_from_key("#risk#example.com").is_err());
    }

    #[test]
    fn test_attribute_key_round_trip() {
        let key = "#attribute#https#443#asset#example.com#1.2.3.4";
        let attr = attribute_from_key(key).unwrap();
        assert_eq!(attr.name, "https");
        assert_eq!(attr.value, "443");
        assert_eq!(attr.source, "#asset#example.com#1.2.3.4");
        assert_eq!(attr.key, key);
        assert!(attribute_from_key("#attribute#https#443").is_err());
    }

    #[test]
    fn test_filters() {
        let assets = vec![Asset::new("Example.com", "a"), Asset::new("other.org", "b")];
        let filtered = filter_assets_by_key(&assets, "EXAMPLE");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].dns, "Example.com");

        let files = vec![File::new("proofs/a/b"), File::new("definitions/x")];
        assert_eq!(filter_files_by_name(&files, "Proofs").len(), 1);
    }
}
