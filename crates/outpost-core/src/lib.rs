//! Outpost Core - entity model and capability contract
//!
//! This crate provides the types shared by every part of the engine:
//! - `Asset`, `Risk`, `Attribute`, `File`, `Job`, `Account`: the entity model
//! - `AssetClass`: derived classification of assets
//! - `Entity` and `Stream`: what capabilities emit and how it reaches the dispatcher
//! - `Capability`: the trait every discovery unit implements

pub mod account;
pub mod asset;
pub mod attribute;
pub mod capability;
pub mod class;
pub mod entity;
pub mod error;
pub mod file;
pub mod job;
pub mod keys;
pub mod risk;
pub mod search;
pub mod status;
pub mod stream;

// Re-export commonly used types at crate root
pub use account::{Account, User};
pub use asset::{Asset, Config};
pub use attribute::Attribute;
pub use capability::{Capability, Constructor, NoSecrets, SecretProvider, DEFAULT_TIMEOUT_SECS};
pub use class::{classify, is_private, registrable_domain, AssetClass};
pub use entity::Entity;
pub use error::{Error, Result};
pub use file::File;
pub use job::Job;
pub use keys::{
    asset_from_key, attribute_from_key, filter_assets_by_key, filter_files_by_name, risk_from_key,
};
pub use risk::Risk;
pub use search::SearchResult;
pub use status::{
    future, now, AssetStatus, History, JobStatus, Origin, RiskState, RiskStatus, Severity,
};
pub use stream::{Stream, StreamReceiver};
