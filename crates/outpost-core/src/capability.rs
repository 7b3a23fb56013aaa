//! The contract every capability implements

use async_trait::async_trait;

use crate::error::Result;
use crate::job::Job;

/// Default advisory budget, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// A single-use unit of discovery bound to one job
///
/// Instances are built per job by a [`Constructor`] and dropped once
/// `invoke` returns. Results go out through [`Job::emit`].
#[async_trait]
pub trait Capability: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Whether the job's target is eligible. Must be pure and fast.
    fn matches(&self) -> bool;

    /// Do the work, emitting entities as they are found. Finding nothing is
    /// not an error.
    async fn invoke(&self) -> Result<()>;

    /// Credential path to resolve into `config["secret"]` before `invoke`
    fn secret(&self) -> Option<&'static str> {
        None
    }

    /// Suggested wall-clock budget in seconds
    fn timeout(&self) -> u64 {
        DEFAULT_TIMEOUT_SECS
    }
}

/// Builds a capability bound to a job
pub type Constructor = fn(Job) -> Box<dyn Capability>;

/// Resolves credential paths named by [`Capability::secret`]
pub trait SecretProvider: Send + Sync {
    fn resolve(&self, path: &str) -> Option<String>;
}

/// Provider that knows no secrets
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSecrets;

impl SecretProvider for NoSecrets {
    fn resolve(&self, _path: &str) -> Option<String> {
        None
    }
}
