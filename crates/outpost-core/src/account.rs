//! Accounts link two usernames or pin a configuration object

use serde::{Deserialize, Serialize};

use crate::asset::Config;
use crate::status::now;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub username: String,
    pub key: String,
    /// Owner
    pub name: String,
    pub member: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub ttl: i64,
}

impl Account {
    pub fn new(
        name: impl Into<String>,
        member: impl Into<String>,
        value: impl Into<String>,
        config: Config,
    ) -> Self {
        let name = name.into();
        let member = member.into();
        let value = value.into();
        Self {
            key: format!("#account#{}#{}#{}", name, member, value),
            name,
            member,
            value,
            config,
            updated: now(),
            ..Default::default()
        }
    }
}

/// A tenant and the accounts that link other tenants to it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "username")]
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub updated: String,
    #[serde(skip)]
    pub accounts: Vec<Account>,
}

impl User {
    pub fn new(name: impl Into<String>, accounts: Vec<Account>) -> Self {
        Self {
            name: name.into(),
            key: "#user".to_string(),
            updated: now(),
            accounts,
        }
    }

    /// True if `username` has granted this user membership
    pub fn linked(&self, username: &str) -> bool {
        self.accounts
            .iter()
            .any(|account| account.name == username && account.member == self.name)
    }

    /// Email domain of the username, empty when it is not an address
    pub fn domain(&self) -> &str {
        let mut parts = self.name.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(domain), None) => domain,
            _ => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_key() {
        let account = Account::new("owner@acme.com", "member@acme.com", "", Config::new());
        assert_eq!(account.key, "#account#owner@acme.com#member@acme.com#");
    }

    #[test]
    fn test_user_linked_and_domain() {
        let account = Account::new("owner@acme.com", "me@acme.com", "", Config::new());
        let user = User::new("me@acme.com", vec![account]);
        assert!(user.linked("owner@acme.com"));
        assert!(!user.linked("other@acme.com"));
        assert_eq!(user.domain(), "acme.com");
        assert_eq!(User::new("not-an-email", vec![]).domain(), "");
        assert_eq!(User::new("a@b@c", vec![]).domain(), "");
    }
}
