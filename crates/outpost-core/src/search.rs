use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::account::Account;
use crate::asset::Asset;
use crate::attribute::Attribute;
use crate::file::File;
use crate::job::Job;
use crate::risk::Risk;

/// One page of a store search across every entity kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    /// Continuation token, absent on the last page
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub offset: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<Asset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risks: Vec<Risk>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<Job>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accounts: Vec<Account>,
    #[serde(skip)]
    pub term: String,
}

impl SearchResult {
    pub fn has_more(&self) -> bool {
        !self.offset.is_empty()
    }

    /// Append another page, taking its offset
    pub fn extend(&mut self, page: SearchResult) {
        self.offset = page.offset;
        self.assets.extend(page.assets);
        self.attributes.extend(page.attributes);
        self.risks.extend(page.risks);
        self.files.extend(page.files);
        self.jobs.extend(page.jobs);
        self.accounts.extend(page.accounts);
    }
}
