//! Outpost Common - Shared utilities: logging, configuration, hashing, secrets
//!
//! This crate provides common functionality used across all Outpost crates.

pub mod config;
pub mod crypto;
pub mod logging;
pub mod secrets;

pub use config::{Config, ConfigBuilder, DispatchConfig, LoggingConfig, ToolsConfig};
pub use crypto::{sha256, sha256_hex, tenant_tag};
pub use logging::{init_logging_with_config, LogConfig, LogFormat};
pub use secrets::ConfigSecrets;
