//! Outpost Code - capabilities for source code hosts
//!
//! - `github`: organization and user repositories, public exposure risks
//! - `gitlab`: group projects
//! - `secrets`: secret scanning over a bare clone
//! - `gato`: self-hosted runner exposure in GitHub Actions

pub mod gato;
pub mod github;
pub mod gitlab;
pub mod secrets;

pub use gato::Gato;
pub use github::Github;
pub use gitlab::Gitlab;
pub use secrets::Secrets;

use once_cell::sync::Lazy;
use regex::Regex;

static GITHUB_OWNER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(https://)?github\.com/([^/]+)/?$").expect("valid regex"));
static GITLAB_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(https://)?gitlab\.com/([^/]+)/?$").expect("valid regex"));

/// Owner segment of a `github.com/{owner}` URL
pub(crate) fn github_owner(name: &str) -> Option<&str> {
    GITHUB_OWNER.captures(name).and_then(|c| c.get(2)).map(|m| m.as_str())
}

/// Group segment of a `gitlab.com/{group}` URL
pub(crate) fn gitlab_group(name: &str) -> Option<&str> {
    GITLAB_GROUP.captures(name).and_then(|c| c.get(2)).map(|m| m.as_str())
}
