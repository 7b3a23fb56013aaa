use serde::{Deserialize, Serialize};

use crate::status::now;

/// Opaque named blob. The payload travels with the value but is never serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    #[serde(default)]
    pub username: String,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub updated: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl File {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: format!("#file#{}", name),
            name,
            updated: now(),
            ..Default::default()
        }
    }

    pub fn with_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.bytes = bytes.into();
        self
    }
}
