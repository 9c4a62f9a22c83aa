//! Production defaults
//!
//! Every configurable value falls back to one of these when the TOML file and
//! environment leave it unset.

/// Shard discovery and caching defaults
pub mod registry {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    /// Background refresh tick (milliseconds)
    pub const REFRESH_INTERVAL_MS: u64 = 30_000;

    /// Shards whose smaller reserve falls under this are ignored (base units)
    pub const MIN_LIQUIDITY_THRESHOLD: u64 = 1_000;

    /// Age at which a cached shard counts as stale (milliseconds)
    pub const MAX_CACHE_AGE_MS: u64 = 60_000;

    /// Concurrent pool reads per discovery batch
    pub const BATCH_SIZE: usize = 10;

    /// Curve bound applied when a pool exposes no curve parameters
    pub const DEFAULT_CURVE_C: Decimal = dec!(0.0104);
}

/// Circuit breaker defaults
pub mod circuit_breaker {
    /// Consecutive failures before opening
    pub const ERROR_THRESHOLD: u32 = 5;

    /// Time the breaker stays open before allowing a trial call (milliseconds)
    pub const RECOVERY_TIMEOUT_MS: u64 = 60_000;

    /// Per-call timeout for chain-bound operations (milliseconds)
    pub const TIMEOUT_THRESHOLD_MS: u64 = 30_000;
}

/// Routing coordinator defaults
pub mod routing {
    /// Lifetime of a cached routing result (milliseconds)
    pub const CACHE_TTL_MS: u64 = 10_000;

    pub const ESTIMATED_GAS_PER_HOP: u64 = 150_000;

    /// 0.5%
    pub const DEFAULT_SLIPPAGE_BPS: u32 = 50;
}

/// Health monitor defaults
pub mod health {
    pub const CHECK_INTERVAL_MS: u64 = 30_000;

    /// Block height must advance within this window (milliseconds)
    pub const BLOCK_HEIGHT_STALE_THRESHOLD_MS: u64 = 120_000;
}

/// Engine defaults
pub mod engine {
    /// Capacity of each component's event channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;

    /// Capacity of the forwarded sink channel
    pub const SINK_CHANNEL_CAPACITY: usize = 4_096;

    /// Transaction confirmations awaited after a trade submission
    pub const TRADE_CONFIRMATIONS: usize = 1;
}
