//! Capability registry - name to constructor

use outpost_core::{Capability, Constructor, Error, Job, Result};
use std::collections::BTreeMap;

/// Constructors indexed by capability name
pub struct Registry {
    constructors: BTreeMap<String, Constructor>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Register a constructor, replacing any previous one under `name`
    pub fn register(&mut self, name: impl Into<String>, constructor: Constructor) -> &mut Self {
        self.constructors.insert(name.into(), constructor);
        self
    }

    /// Build the capability named by `name`, bound to `job`
    pub fn build(&self, name: &str, job: Job) -> Result<Box<dyn Capability>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| Error::UnknownCapability { name: name.to_string() })?;
        Ok(constructor(job))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry holding every built-in capability
pub fn default_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register("nuclei", outpost_webapp::Nuclei::new)
        .register("whois", outpost_network::Whois::new)
        .register("subdomain", outpost_network::Subdomain::new)
        .register("portscan", outpost_network::PortScan::new)
        .register("github", outpost_code::Github::new)
        .register("secrets", outpost_code::Secrets::new)
        .register("amazon", outpost_cloud::Amazon::new)
        .register("azure", outpost_cloud::Azure::new)
        .register("gcp", outpost_cloud::Gcp::new)
        .register("ns1", outpost_cloud::Ns1::new)
        .register("gato", outpost_code::Gato::new)
        .register("crowdstrike", outpost_cloud::Crowdstrike::new)
        .register("crawler", outpost_webapp::Crawler::new)
        .register("gitlab", outpost_code::Gitlab::new)
        .register("ssh", outpost_network::Ssh::new)
        .register("github-discovery", outpost_recon::GithubDiscovery::new)
        .register("azuread-discovery", outpost_recon::AzureAd::new)
        .register("edgar", outpost_recon::Edgar::new)
        .register("cloudflare", outpost_cloud::Cloudflare::new);
    registry
}
