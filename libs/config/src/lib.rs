//! # Shard Router Configuration
//!
//! Per-chain settings and router-wide settings, loaded from TOML with
//! environment overrides and validated before any chain is registered.
//!
//! ## Features
//!
//! - **Chain Settings**: RPC endpoint, factory, discovery cadence, liquidity
//!   floor, curve bound, breaker thresholds, routing and health tuning
//! - **Layered Loading**: base file, `<base>.<env>.toml` overlay, then
//!   `SHARD_ROUTER_*` variables (`__` separates nested keys)
//! - **Validation**: every failure is a `ConfigurationError` naming its field
//!
//! ## Usage
//!
//! ```rust,no_run
//! use router_config::RouterConfig;
//! use std::path::Path;
//!
//! let config = RouterConfig::load(Some(Path::new("config/shard_router.toml")), Some("prod"))?;
//! for chain in &config.chains {
//!     println!("{} -> {}", chain.chain_id, chain.rpc_endpoint);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod chain;
pub mod defaults;
pub mod router_config;

// Re-export commonly used types
pub use chain::{
    ChainConfig, CircuitBreakerSettings, FixedRoute, FixedRouteAddresses, HealthSettings,
    MissingProbePolicy, RoutingSettings,
};
pub use router_config::{load_config, EngineSettings, LogFormat, RouterConfig};
