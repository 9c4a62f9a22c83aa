//! Per-chain configuration
//!
//! One [`ChainConfig`] is an immutable snapshot for a chain registration.
//! Changing any value means removing the chain and adding it again.

use crate::defaults;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use types::{Address, ChainId, CurveScalar, RouterError};

/// What the health monitor does when a sub-service has no health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingProbePolicy {
    /// A service without a probe counts as healthy
    #[default]
    AssumeHealthy,
    /// A service without a probe is reported as an error
    TreatAsError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub error_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub timeout_threshold_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            error_threshold: defaults::circuit_breaker::ERROR_THRESHOLD,
            recovery_timeout_ms: defaults::circuit_breaker::RECOVERY_TIMEOUT_MS,
            timeout_threshold_ms: defaults::circuit_breaker::TIMEOUT_THRESHOLD_MS,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_threshold_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    pub cache_ttl_ms: u64,
    pub estimated_gas_per_hop: u64,
    pub default_slippage_bps: u32,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            cache_ttl_ms: defaults::routing::CACHE_TTL_MS,
            estimated_gas_per_hop: defaults::routing::ESTIMATED_GAS_PER_HOP,
            default_slippage_bps: defaults::routing::DEFAULT_SLIPPAGE_BPS,
        }
    }
}

impl RoutingSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub check_interval_ms: u64,
    pub block_height_stale_threshold_ms: u64,
    pub missing_probe_policy: MissingProbePolicy,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval_ms: defaults::health::CHECK_INTERVAL_MS,
            block_height_stale_threshold_ms: defaults::health::BLOCK_HEIGHT_STALE_THRESHOLD_MS,
            missing_probe_policy: MissingProbePolicy::default(),
        }
    }
}

impl HealthSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.block_height_stale_threshold_ms)
    }
}

/// A preconfigured two-hop route: `from → via → to`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedRoute {
    pub from: String,
    pub to: String,
    pub via: String,
}

/// Parsed form of [`FixedRoute`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedRouteAddresses {
    pub from: Address,
    pub to: Address,
    pub via: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub name: String,
    /// JSON-RPC URL; `${VAR}` references are expanded from the environment on load
    pub rpc_endpoint: String,
    pub factory_address: String,
    /// Router contract used for quotes and trade submission
    pub router_address: Option<String>,
    /// Account that signs submitted trades (must be unlocked on the node)
    pub trade_account: Option<String>,
    pub trade_confirmations: usize,

    pub refresh_interval_ms: u64,
    /// Floor on a shard's smaller reserve, in base units
    pub min_liquidity_threshold: u64,
    pub max_cache_age_ms: u64,
    pub batch_size: usize,
    pub default_curve_c: Decimal,

    pub circuit_breaker: CircuitBreakerSettings,
    pub routing: RoutingSettings,
    pub health: HealthSettings,

    /// Intermediate tokens tried in order for two-hop routes
    pub hubs: Vec<String>,
    pub fixed_routes: Vec<FixedRoute>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 0,
            name: String::new(),
            rpc_endpoint: String::new(),
            factory_address: String::new(),
            router_address: None,
            trade_account: None,
            trade_confirmations: defaults::engine::TRADE_CONFIRMATIONS,
            refresh_interval_ms: defaults::registry::REFRESH_INTERVAL_MS,
            min_liquidity_threshold: defaults::registry::MIN_LIQUIDITY_THRESHOLD,
            max_cache_age_ms: defaults::registry::MAX_CACHE_AGE_MS,
            batch_size: defaults::registry::BATCH_SIZE,
            default_curve_c: defaults::registry::DEFAULT_CURVE_C,
            circuit_breaker: CircuitBreakerSettings::default(),
            routing: RoutingSettings::default(),
            health: HealthSettings::default(),
            hubs: Vec::new(),
            fixed_routes: Vec::new(),
        }
    }
}

impl ChainConfig {
    /// Minimal config for `chain_id`; everything else at production defaults
    pub fn new(chain_id: ChainId, name: impl Into<String>) -> Self {
        Self {
            chain_id,
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn max_cache_age(&self) -> Duration {
        Duration::from_millis(self.max_cache_age_ms)
    }

    pub fn factory(&self) -> Result<Address, RouterError> {
        parse_address("factory_address", &self.factory_address)
    }

    pub fn router(&self) -> Result<Option<Address>, RouterError> {
        self.router_address
            .as_deref()
            .map(|addr| parse_address("router_address", addr))
            .transpose()
    }

    pub fn trader(&self) -> Result<Option<Address>, RouterError> {
        self.trade_account
            .as_deref()
            .map(|addr| parse_address("trade_account", addr))
            .transpose()
    }

    /// `default_curve_c` as a fixed-point scalar
    pub fn curve_c(&self) -> Result<CurveScalar, RouterError> {
        CurveScalar::from_decimal(self.default_curve_c).ok_or_else(|| {
            RouterError::configuration(
                Some("default_curve_c"),
                format!("{} is not representable", self.default_curve_c),
            )
        })
    }

    pub fn hub_addresses(&self) -> Result<Vec<Address>, RouterError> {
        self.hubs
            .iter()
            .map(|hub| parse_address("hubs", hub))
            .collect()
    }

    pub fn fixed_route_addresses(&self) -> Result<Vec<FixedRouteAddresses>, RouterError> {
        self.fixed_routes
            .iter()
            .map(|route| {
                Ok(FixedRouteAddresses {
                    from: parse_address("fixed_routes.from", &route.from)?,
                    to: parse_address("fixed_routes.to", &route.to)?,
                    via: parse_address("fixed_routes.via", &route.via)?,
                })
            })
            .collect()
    }

    /// Check every field, naming the first offending one
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.chain_id == 0 {
            return Err(RouterError::configuration(Some("chain_id"), "must be non-zero"));
        }
        if self.rpc_endpoint.trim().is_empty() {
            return Err(RouterError::configuration(Some("rpc_endpoint"), "must not be empty"));
        }
        self.factory()?;
        self.router()?;
        self.trader()?;

        if self.batch_size == 0 {
            return Err(RouterError::configuration(Some("batch_size"), "must be at least 1"));
        }

        let c = self.curve_c()?;
        if c.is_zero() || c > CurveScalar::ONE {
            return Err(RouterError::configuration(
                Some("default_curve_c"),
                format!("{} must lie in (0, 1]", self.default_curve_c),
            ));
        }

        for (field, value) in [
            ("refresh_interval_ms", self.refresh_interval_ms),
            ("max_cache_age_ms", self.max_cache_age_ms),
            ("circuit_breaker.recovery_timeout_ms", self.circuit_breaker.recovery_timeout_ms),
            ("circuit_breaker.timeout_threshold_ms", self.circuit_breaker.timeout_threshold_ms),
            ("routing.cache_ttl_ms", self.routing.cache_ttl_ms),
            ("health.check_interval_ms", self.health.check_interval_ms),
            (
                "health.block_height_stale_threshold_ms",
                self.health.block_height_stale_threshold_ms,
            ),
        ] {
            if value == 0 {
                return Err(RouterError::configuration(Some(field), "must be non-zero"));
            }
        }

        if self.circuit_breaker.error_threshold == 0 {
            return Err(RouterError::configuration(
                Some("circuit_breaker.error_threshold"),
                "must be at least 1",
            ));
        }
        if self.routing.default_slippage_bps > 10_000 {
            return Err(RouterError::configuration(
                Some("routing.default_slippage_bps"),
                "must not exceed 10000",
            ));
        }

        self.hub_addresses()?;
        for route in self.fixed_route_addresses()? {
            if route.from == route.to {
                return Err(RouterError::configuration(
                    Some("fixed_routes"),
                    format!("route from {} to itself", route.from.short()),
                ));
            }
            if route.via == route.from || route.via == route.to {
                return Err(RouterError::configuration(
                    Some("fixed_routes.via"),
                    format!("hub {} is an endpoint of its own route", route.via.short()),
                ));
            }
        }

        Ok(())
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address, RouterError> {
    Address::from_hex(value)
        .map_err(|_| RouterError::configuration(Some(field), format!("invalid address {:?}", value)))
}

/// Reject configs that register the same chain twice
pub(crate) fn check_unique_chain_ids(chains: &[ChainConfig]) -> Result<(), RouterError> {
    let mut seen = HashSet::new();
    for chain in chains {
        if !seen.insert(chain.chain_id) {
            return Err(RouterError::configuration(
                Some("chains"),
                format!("chain {} configured more than once", chain.chain_id),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const FACTORY: &str = "0x5757371414417b8c6caad45baef941abc7d3ab32";
    const USDC: &str = "0x2791bca1f2de4661ed88a30c99a7a9449aa84174";
    const USDT: &str = "0xc2132d05d31c914a87c6611c10748aeb04b58e8f";

    fn valid() -> ChainConfig {
        ChainConfig {
            rpc_endpoint: "http://localhost:8545".into(),
            factory_address: FACTORY.into(),
            ..ChainConfig::new(137, "polygon")
        }
    }

    fn field_of(err: RouterError) -> Option<String> {
        match err {
            RouterError::ConfigurationError { field, .. } => field,
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = valid();
        assert!(config.validate().is_ok());
        assert_eq!(config.curve_c().unwrap(), CurveScalar(10_400));
        assert_eq!(config.health.missing_probe_policy, MissingProbePolicy::AssumeHealthy);
    }

    #[test]
    fn test_validate_names_offending_field() {
        let mut config = valid();
        config.batch_size = 0;
        assert_eq!(field_of(config.validate().unwrap_err()).as_deref(), Some("batch_size"));

        let mut config = valid();
        config.default_curve_c = dec!(0);
        assert_eq!(field_of(config.validate().unwrap_err()).as_deref(), Some("default_curve_c"));

        let mut config = valid();
        config.default_curve_c = dec!(1.5);
        assert_eq!(field_of(config.validate().unwrap_err()).as_deref(), Some("default_curve_c"));

        let mut config = valid();
        config.factory_address = "not-an-address".into();
        assert_eq!(field_of(config.validate().unwrap_err()).as_deref(), Some("factory_address"));

        let mut config = valid();
        config.rpc_endpoint = "  ".into();
        assert_eq!(field_of(config.validate().unwrap_err()).as_deref(), Some("rpc_endpoint"));

        let mut config = valid();
        config.circuit_breaker.timeout_threshold_ms = 0;
        assert_eq!(
            field_of(config.validate().unwrap_err()).as_deref(),
            Some("circuit_breaker.timeout_threshold_ms")
        );
    }

    #[test]
    fn test_fixed_route_via_must_differ_from_endpoints() {
        let mut config = valid();
        config.fixed_routes.push(FixedRoute {
            from: USDC.into(),
            to: USDT.into(),
            via: USDC.into(),
        });
        assert_eq!(field_of(config.validate().unwrap_err()).as_deref(), Some("fixed_routes.via"));
    }

    #[test]
    fn test_duplicate_chain_ids_rejected() {
        let chains = vec![valid(), valid()];
        assert_eq!(field_of(check_unique_chain_ids(&chains).unwrap_err()).as_deref(), Some("chains"));
    }
}
