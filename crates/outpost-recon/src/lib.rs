//! Outpost Recon - capabilities that widen a seed domain
//!
//! Each runs against a user-provided registrable domain and reports
//! related organizations or domains as low-confidence assets.
//!
//! - `discovery`: GitHub organizations that link back to a registrable domain
//! - `azuread`: domains federated with the same Azure AD tenant
//! - `edgar`: domains named in the company's SEC filings

pub mod azuread;
pub mod discovery;
pub mod edgar;

pub use azuread::AzureAd;
pub use discovery::GithubDiscovery;
pub use edgar::Edgar;

use outpost_core::Asset;

/// Seed label of a domain (`acme` for `acme.com`)
pub(crate) fn first_label(asset: &Asset) -> &str {
    asset.dns.split('.').next().unwrap_or_default()
}

/// User-provided registrable domain
pub(crate) fn seed(asset: &Asset) -> bool {
    asset.is("tld") && !asset.system()
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::Origin;

    #[test]
    fn test_seed() {
        let provided = Asset::new("acme.com", "acme.com").with_source(Origin::Provided);
        assert!(seed(&provided));
        assert_eq!(first_label(&provided), "acme");
        assert!(!seed(&Asset::new("acme.com", "acme.com")));
        let sub = Asset::new("www.acme.com", "www.acme.com").with_source(Origin::Provided);
        assert!(!seed(&sub));
    }
}
