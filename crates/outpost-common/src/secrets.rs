//! Secret resolution backed by configuration and the environment

use outpost_core::SecretProvider;
use std::collections::BTreeMap;

/// Resolves secret paths from `[secrets]`, with `OUTPOST_SECRET_<PATH>`
/// environment variables taking precedence
#[derive(Debug, Clone, Default)]
pub struct ConfigSecrets {
    secrets: BTreeMap<String, String>,
    use_env: bool,
}

impl ConfigSecrets {
    pub fn new(secrets: BTreeMap<String, String>) -> Self {
        Self {
            secrets,
            use_env: true,
        }
    }

    /// Ignore the environment, for tests
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// `"/pats/github"` becomes `OUTPOST_SECRET_PATS_GITHUB`
    pub fn env_name(path: &str) -> String {
        let mut name = String::from("OUTPOST_SECRET");
        for part in path
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|part| !part.is_empty())
        {
            name.push('_');
            name.push_str(&part.to_ascii_uppercase());
        }
        name
    }
}

impl SecretProvider for ConfigSecrets {
    fn resolve(&self, path: &str) -> Option<String> {
        if self.use_env {
            if let Ok(value) = std::env::var(Self::env_name(path)) {
                return Some(value);
            }
        }
        self.secrets.get(path).cloned()
    }
}
