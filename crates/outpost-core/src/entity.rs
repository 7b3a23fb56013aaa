use serde::Serialize;

use crate::asset::Asset;
use crate::attribute::Attribute;
use crate::file::File;
use crate::job::Job;
use crate::risk::Risk;

/// Anything a capability can put on a job's stream
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Entity {
    Asset(Asset),
    Risk(Risk),
    Attribute(Attribute),
    File(File),
    Job(Job),
}

impl Entity {
    pub fn key(&self) -> &str {
        match self {
            Entity::Asset(asset) => &asset.key,
            Entity::Risk(risk) => &risk.key,
            Entity::Attribute(attribute) => &attribute.key,
            Entity::File(file) => &file.key,
            Entity::Job(job) => &job.key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Entity::Asset(_) => "asset",
            Entity::Risk(_) => "risk",
            Entity::Attribute(_) => "attribute",
            Entity::File(_) => "file",
            Entity::Job(_) => "job",
        }
    }
}

macro_rules! entity_from {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Entity {
                fn from(value: $variant) -> Self {
                    Entity::$variant(value)
                }
            }
        )*
    };
}

entity_from!(Asset, Risk, Attribute, File, Job);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_serialization() {
        let entity: Entity = Asset::new("example.com", "example.com").into();
        let json: serde_json::Value = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["key"], "#asset#example.com#example.com");
        assert_eq!(entity.kind(), "asset");
    }

    #[test]
    fn test_file_bytes_stay_out_of_json() {
        let entity: Entity = File::new("proofs/a/b").with_bytes(b"secret".to_vec()).into();
        let json = serde_json::to_string(&entity).unwrap();
        assert!(!json.contains("secret"));
        assert_eq!(entity.key(), "#file#proofs/a/b");
    }
}
