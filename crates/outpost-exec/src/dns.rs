use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use outpost_core::{is_private, Error, Result};
use std::net::IpAddr;
use tracing::debug;

/// System-configured resolver, built once and shared by clone
#[derive(Clone)]
pub struct Resolver {
    inner: TokioResolver,
}

impl Resolver {
    pub fn new() -> Result<Self> {
        let inner = TokioResolver::builder(TokioConnectionProvider::default())
            .map_err(|e| Error::Configuration(format!("resolver: {}", e)))?
            .build();
        Ok(Self { inner })
    }

    /// Public addresses for `host`. Private and loopback results are dropped
    /// and a failed lookup yields nothing.
    pub async fn public_addresses(&self, host: &str) -> Vec<String> {
        let hits = match self.inner.lookup_ip(host).await {
            Ok(hits) => hits,
            Err(err) => {
                debug!(host, error = %err, "lookup failed");
                return Vec::new();
            }
        };

        let mut addresses: Vec<String> = Vec::new();
        for addr in hits.iter().filter(public) {
            let addr = addr.to_string();
            if !addresses.contains(&addr) {
                addresses.push(addr);
            }
        }
        addresses
    }
}

fn public(addr: &IpAddr) -> bool {
    !(is_private(addr) || addr.is_loopback())
}
