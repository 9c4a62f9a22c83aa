//! Router Configuration Module
//!
//! Loads the router configuration from a TOML file, an optional
//! environment-specific overlay next to it, and `SHARD_ROUTER_*` environment
//! variables, in that order of precedence (last wins).

use crate::chain::{check_unique_chain_ids, ChainConfig};
use crate::defaults;
use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use types::RouterError;

/// Prefix for environment overrides, e.g. `SHARD_ROUTER_LOG_LEVEL=debug`
pub const ENV_PREFIX: &str = "SHARD_ROUTER";

/// Default base configuration path
pub const DEFAULT_CONFIG_PATH: &str = "config/shard_router.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Engine-wide settings shared by every chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub event_channel_capacity: usize,
    pub sink_channel_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            event_channel_capacity: defaults::engine::EVENT_CHANNEL_CAPACITY,
            sink_channel_capacity: defaults::engine::SINK_CHANNEL_CAPACITY,
        }
    }
}

/// Main router configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub engine: EngineSettings,
    pub chains: Vec<ChainConfig>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            engine: EngineSettings::default(),
            chains: Vec::new(),
        }
    }
}

impl RouterConfig {
    /// Load configuration from files with environment overrides
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));

        let mut builder = Config::builder().add_source(File::from(base).required(true));

        // Add environment-specific overrides if specified
        if let Some(env) = environment {
            let env_file = overlay_path(base, env);

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables (SHARD_ROUTER_ prefix)
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut config: RouterConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.expand_env_vars()?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", base.display()))?;

        debug!("Loaded configuration for {} chain(s)", config.chains.len());
        Ok(config)
    }

    /// Expand `${VAR}` references in RPC endpoints
    pub fn expand_env_vars(&mut self) -> Result<()> {
        for chain in &mut self.chains {
            let expanded = shellexpand::env(&chain.rpc_endpoint)
                .with_context(|| format!("Failed to expand RPC URL for chain {}", chain.chain_id))?;
            chain.rpc_endpoint = expanded.to_string();
        }
        Ok(())
    }

    /// Validate every chain and reject duplicate chain ids
    pub fn validate(&self) -> Result<(), RouterError> {
        check_unique_chain_ids(&self.chains)?;
        for chain in &self.chains {
            chain.validate()?;
        }
        if self.engine.event_channel_capacity == 0 {
            return Err(RouterError::configuration(
                Some("engine.event_channel_capacity"),
                "must be at least 1",
            ));
        }
        if self.engine.sink_channel_capacity == 0 {
            return Err(RouterError::configuration(
                Some("engine.sink_channel_capacity"),
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Get settings for a specific chain
    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// Render back to TOML, e.g. for `--print-config`
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// `config/shard_router.toml` + `prod` -> `config/shard_router.prod.toml`
fn overlay_path(base: &Path, env: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "shard_router".to_string());
    base.with_file_name(format!("{}.{}.toml", stem, env))
}

/// Convenience function to load configuration with defaults
pub fn load_config(path: Option<&Path>, environment: Option<&str>) -> Result<RouterConfig> {
    RouterConfig::load(path, environment)
}
