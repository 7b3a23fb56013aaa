//! Outpost - run one capability against one target
//!
//! Collected entities are printed to stdout, one JSON document per line.
//! Logs go to stderr.

use anyhow::{bail, Context, Result};
use clap::Parser;
use outpost_common::{init_logging_with_config, Config, ConfigSecrets, LogConfig, LogFormat};
use outpost_core::{Asset, Config as AssetConfig, Job, Origin};
use outpost_engine::{default_registry, Dispatcher};
use std::path::Path;
use tracing::{debug, info};

/// Outpost capability runner
#[derive(Parser, Debug)]
#[command(name = "outpost")]
#[command(version)]
#[command(about = "Attack surface discovery", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/outpost/outpost.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides config
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json, compact); overrides config
    #[arg(long)]
    log_format: Option<String>,

    /// Capability to run
    #[arg(long)]
    capability: String,

    /// Target asset name
    #[arg(long)]
    name: String,

    /// Target asset DNS; defaults to the name
    #[arg(long)]
    dns: Option<String>,

    /// Asset config entry, repeatable
    #[arg(long = "config-value", value_name = "KEY=VALUE", value_parser = parse_pair)]
    config_values: Vec<(String, String)>,
}

fn parse_pair(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", raw)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = if Path::new(&args.config).exists() {
        Config::from_file(&args.config).with_context(|| format!("loading {}", args.config))?
    } else {
        Config::default()
    };
    let config = config.merge_env();

    let level = args.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = args
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    init_logging_with_config(
        LogConfig::new()
            .level(level)
            .format(format.parse().unwrap_or(LogFormat::Pretty)),
    );
    debug!(config = %args.config, "configuration loaded");

    let registry = default_registry();
    if !registry.contains(&args.capability) {
        let known: Vec<&str> = registry.names().collect();
        bail!(
            "unknown capability {:?}; expected one of: {}",
            args.capability,
            known.join(", ")
        );
    }

    let asset_config: AssetConfig = args.config_values.into_iter().collect();
    let dns = args.dns.unwrap_or_else(|| args.name.clone());
    let target = Asset::new(dns, args.name)
        .with_source(Origin::Provided)
        .with_config(asset_config);

    let mut job_config = AssetConfig::new();
    if let Some(templates) = &config.tools.nuclei_templates {
        job_config.insert(outpost_webapp::nuclei::TEMPLATES_KEY.to_string(), templates.clone());
    }
    let job = Job::new(args.capability.as_str(), target).with_config(job_config);
    info!(job = %job.key, "dispatching");

    let dispatcher =
        Dispatcher::new(registry, config.dispatch).with_secrets(ConfigSecrets::new(config.secrets));
    let outcome = dispatcher.dispatch(job).await?;

    for line in &outcome.results {
        println!("{}", line);
    }
    if !outcome.passed() {
        bail!("{} failed", outcome.job.key);
    }
    Ok(())
}
