//! Shard Registry - per-chain shard discovery and caching
//!
//! Discovers pool addresses from the chain's factory, resolves each to a
//! [`ShardInfo`] with bounded concurrency and caches the result with an age
//! bound. Token metadata is cached separately, keyed by `(chain_id, address)`,
//! since it never changes.
//!
//! ## Cache discipline
//!
//! - An entry is stale once `now - fetched_at >= max_cache_age`
//! - [`ShardRegistry::get_fresh`] refreshes stale entries for a pair before answering
//! - [`ShardRegistry::refresh_stale`] refreshes everything stale, in bounded batches
//! - Refreshes of one pool are serialized by a per-pool lock, and a write only
//!   lands if its fetch started no earlier than the cached one
//! - A failed refresh keeps the stale entry; a refresh showing the pool under
//!   the liquidity floor evicts it

use crate::endpoint::PoolEndpoint;
use crate::logging::Marker;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use health_check::HealthProbe;
use isolation::FailureIsolation;
use parking_lot::Mutex;
use router_config::ChainConfig;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};
use types::{
    unix_millis, Address, ChainId, CurveParams, CurveScalar, EventEmitter, RouterError, RouterEvent,
    ShardInfo, ShardStatus, Token,
};

/// Registry settings for one chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub chain_id: ChainId,
    /// Floor on a shard's smaller reserve
    pub min_liquidity: u128,
    pub max_cache_age: Duration,
    /// Concurrent pool reads during discovery and refresh
    pub batch_size: usize,
    /// Curve bound for pools that expose no curve parameters
    pub default_c: CurveScalar,
}

impl RegistryConfig {
    pub fn from_chain(config: &ChainConfig) -> Result<Self, RouterError> {
        Ok(Self {
            chain_id: config.chain_id,
            min_liquidity: config.min_liquidity_threshold as u128,
            max_cache_age: config.max_cache_age(),
            batch_size: config.batch_size.max(1),
            default_c: config.curve_c()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub cached_shards: usize,
    pub active_shards: usize,
    pub cached_tokens: usize,
    pub discoveries: u64,
    pub refreshes: u64,
    pub pool_failures: u64,
    pub evictions: u64,
}

/// Outcome of one [`ShardRegistry::refresh_stale`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub attempted: usize,
    pub refreshed: usize,
    pub evicted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
struct CachedShard {
    info: ShardInfo,
    /// When the fetch that produced `info` started
    fetched_at: Instant,
}

enum Fetched {
    Live(ShardInfo),
    BelowFloor { min_reserve: u128 },
}

/// What applying a fetch did to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Inserted,
    Updated,
    Unchanged,
    Evicted,
    Excluded,
    /// A newer fetch had already landed
    Superseded,
    /// Another caller refreshed the entry while this one waited for the lock
    AlreadyFresh,
}

#[derive(Debug, Default)]
struct Counters {
    discoveries: AtomicU64,
    refreshes: AtomicU64,
    pool_failures: AtomicU64,
    evictions: AtomicU64,
}

pub struct ShardRegistry {
    config: RegistryConfig,
    endpoint: Arc<dyn PoolEndpoint>,
    shards: DashMap<Address, CachedShard>,
    tokens: DashMap<(ChainId, Address), Token>,
    refresh_locks: DashMap<Address, Arc<tokio::sync::Mutex<()>>>,
    events: EventEmitter,
    /// Failure of the most recent discovery pass, cleared by the next success
    discovery_error: Mutex<Option<RouterError>>,
    counters: Counters,
}

impl ShardRegistry {
    pub fn new(config: RegistryConfig, endpoint: Arc<dyn PoolEndpoint>, events: EventEmitter) -> Self {
        Self {
            config,
            endpoint,
            shards: DashMap::new(),
            tokens: DashMap::new(),
            refresh_locks: DashMap::new(),
            events,
            discovery_error: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Enumerate the factory and resolve every pool.
    ///
    /// Returns the shards resolved by this pass, sorted by address. A factory
    /// failure fails the call; a pool failure only drops that pool from the
    /// result (its cached entry, if any, is kept for the next pass).
    pub async fn discover_all(&self) -> Result<Vec<ShardInfo>, RouterError> {
        let chain_id = self.config.chain_id;
        let started = Instant::now();

        let pools = match self.endpoint.list_pools().await {
            Ok(pools) => pools,
            Err(e) => {
                crate::route_log!(error, Marker::Discovery, "Shard discovery failed on chain {}: {}", chain_id, e);
                *self.discovery_error.lock() = Some(e.clone());
                return Err(e);
            }
        };
        crate::route_log!(info, Marker::Discovery, "Discovering {} pools on chain {}", pools.len(), chain_id);

        let mut resolved = Vec::new();
        let mut excluded = 0usize;
        let mut failed = 0usize;

        let mut fetches = stream::iter(pools)
            .map(|pool| async move {
                let fetched_at = Instant::now();
                (pool, fetched_at, self.fetch_shard(pool).await)
            })
            .buffer_unordered(self.config.batch_size);

        while let Some((pool, fetched_at, outcome)) = fetches.next().await {
            match outcome {
                Ok(Fetched::Live(info)) => {
                    self.apply(pool, fetched_at, Fetched::Live(info.clone()));
                    resolved.push(info);
                }
                Ok(below) => {
                    excluded += 1;
                    self.apply(pool, fetched_at, below);
                }
                Err(e) => {
                    failed += 1;
                    self.counters.pool_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(chain_id, pool = %pool, "Pool read failed, excluded until next pass: {}", e);
                }
            }
        }

        resolved.sort_by_key(|s| s.pool_address);
        *self.discovery_error.lock() = None;
        self.counters.discoveries.fetch_add(1, Ordering::Relaxed);

        crate::route_log!(
            info,
            Marker::Discovery,
            "Chain {}: {} shards resolved, {} under liquidity floor, {} failed ({}ms)",
            chain_id,
            resolved.len(),
            excluded,
            failed,
            started.elapsed().as_millis()
        );
        Ok(resolved)
    }

    /// Cached active shards serving the pair, ascending by reserve of `token_in`.
    ///
    /// Never touches the endpoint.
    pub fn get(&self, token_in: &Address, token_out: &Address) -> Vec<ShardInfo> {
        let mut shards: Vec<ShardInfo> = self
            .shards
            .iter()
            .filter(|e| e.info.is_active() && e.info.serves(token_in, token_out))
            .map(|e| e.info.clone())
            .collect();
        shards.sort_by_key(|s| (s.reserve_of(token_in).unwrap_or(0), s.pool_address));
        shards
    }

    /// Like [`get`](Self::get), refreshing stale entries for the pair first.
    ///
    /// Runs a discovery pass if none has succeeded yet. Fails only when every
    /// refresh attempted failed on the chain itself.
    pub async fn get_fresh(&self, token_in: &Address, token_out: &Address) -> Result<Vec<ShardInfo>, RouterError> {
        if self.counters.discoveries.load(Ordering::Relaxed) == 0 {
            self.discover_all().await?;
        }

        let now = Instant::now();
        let stale: Vec<Address> = self
            .shards
            .iter()
            .filter(|e| e.info.serves(token_in, token_out) && self.is_stale(e.value(), now))
            .map(|e| *e.key())
            .collect();

        if !stale.is_empty() {
            let attempted = stale.len();
            let errors: Vec<RouterError> = stream::iter(stale)
                .map(|pool| self.refresh_one(pool, false))
                .buffer_unordered(self.config.batch_size)
                .filter_map(|r| async move { r.err() })
                .collect()
                .await;

            if errors.len() == attempted {
                if let Some(err) = errors.into_iter().find(RouterError::is_chain_failure) {
                    return Err(err);
                }
            }
        }

        Ok(self.get(token_in, token_out))
    }

    /// Token metadata observed during discovery
    pub fn cached_token(&self, address: &Address) -> Option<Token> {
        self.tokens
            .get(&(self.config.chain_id, *address))
            .map(|t| t.clone())
    }

    pub fn get_by_address(&self, pool: &Address) -> Option<ShardInfo> {
        self.shards.get(pool).map(|e| e.info.clone())
    }

    /// Every cached shard regardless of status, sorted by address
    pub fn all(&self) -> Vec<ShardInfo> {
        let mut shards: Vec<ShardInfo> = self.shards.iter().map(|e| e.info.clone()).collect();
        shards.sort_by_key(|s| s.pool_address);
        shards
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Refresh every stale entry in bounded batches.
    ///
    /// Fails only when every attempted refresh failed on the chain itself, so
    /// the caller's breaker sees a chain that has stopped answering.
    pub async fn refresh_stale(&self) -> Result<RefreshReport, RouterError> {
        let now = Instant::now();
        let stale: Vec<Address> = self
            .shards
            .iter()
            .filter(|e| self.is_stale(e.value(), now))
            .map(|e| *e.key())
            .collect();

        let mut report = RefreshReport {
            attempted: stale.len(),
            ..RefreshReport::default()
        };
        if stale.is_empty() {
            return Ok(report);
        }

        let mut last_error = None;
        let mut refreshes = stream::iter(stale)
            .map(|pool| self.refresh_one(pool, false))
            .buffer_unordered(self.config.batch_size);
        while let Some(outcome) = refreshes.next().await {
            match outcome {
                Ok(Applied::Evicted) | Ok(Applied::Excluded) => report.evicted += 1,
                Ok(_) => report.refreshed += 1,
                Err(e) => {
                    report.failed += 1;
                    last_error = Some(e);
                }
            }
        }

        debug!(
            chain_id = self.config.chain_id,
            attempted = report.attempted,
            refreshed = report.refreshed,
            evicted = report.evicted,
            failed = report.failed,
            "Stale refresh pass complete"
        );

        match last_error {
            Some(e) if report.failed == report.attempted && e.is_chain_failure() => Err(e),
            _ => Ok(report),
        }
    }

    /// Re-read one pool regardless of its age.
    ///
    /// `None` when the pool is gone from the cache afterwards (evicted or never
    /// above the floor).
    pub async fn refresh_pool(&self, pool: &Address) -> Result<Option<ShardInfo>, RouterError> {
        self.refresh_one(*pool, true).await?;
        Ok(self.get_by_address(pool))
    }

    /// Drop a pool from the cache
    pub fn evict(&self, pool: &Address, reason: &str) -> Option<ShardInfo> {
        let (_, cached) = self.shards.remove(pool)?;
        self.refresh_locks.remove(pool);
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        crate::route_log!(debug, Marker::Shard, "Evicted shard {} on chain {}: {}", pool.short(), self.config.chain_id, reason);
        self.events.emit(RouterEvent::ShardEvicted {
            chain_id: self.config.chain_id,
            pool_address: *pool,
            reason: reason.to_string(),
        });
        Some(cached.info)
    }

    pub fn clear(&self) {
        self.shards.clear();
        self.refresh_locks.clear();
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            cached_shards: self.shards.len(),
            active_shards: self.shards.iter().filter(|e| e.info.is_active()).count(),
            cached_tokens: self.tokens.len(),
            discoveries: self.counters.discoveries.load(Ordering::Relaxed),
            refreshes: self.counters.refreshes.load(Ordering::Relaxed),
            pool_failures: self.counters.pool_failures.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Background maintenance: refresh stale entries every `interval`, or
    /// retry discovery while the last pass failed. Runs under the chain's
    /// isolation guard.
    pub fn spawn_refresh_loop(
        self: &Arc<Self>,
        isolation: Arc<FailureIsolation>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let chain_id = registry.config.chain_id;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if registry.discovery_error.lock().is_some() {
                    if let Err(e) = isolation
                        .run_isolated(chain_id, "discover", registry.discover_all())
                        .await
                    {
                        warn!(chain_id, "Discovery retry failed: {}", e);
                    }
                    continue;
                }
                match isolation
                    .run_isolated(chain_id, "refresh_stale", registry.refresh_stale())
                    .await
                {
                    Ok(report) if report.failed > 0 => {
                        warn!(chain_id, failed = report.failed, attempted = report.attempted, "Some shard refreshes failed")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(chain_id, "Background refresh failed: {}", e),
                }
            }
        })
    }

    fn is_stale(&self, entry: &CachedShard, now: Instant) -> bool {
        now.saturating_duration_since(entry.fetched_at) >= self.config.max_cache_age
    }

    async fn token(&self, address: Address) -> Result<Token, RouterError> {
        let key = (self.config.chain_id, address);
        let cached = self.tokens.get(&key).map(|t| t.clone());
        if let Some(token) = cached {
            return Ok(token);
        }
        let metadata = self.endpoint.token_metadata(address).await?;
        let token = Token::new(self.config.chain_id, address, metadata.symbol, metadata.decimals);
        self.tokens.insert(key, token.clone());
        Ok(token)
    }

    async fn fetch_shard(&self, pool: Address) -> Result<Fetched, RouterError> {
        let chain_id = self.config.chain_id;
        let state = self.endpoint.pool_state(pool).await?;
        let (curve, token_a, token_b) = futures::try_join!(
            self.endpoint.curve_params(pool),
            self.token(state.token_a),
            self.token(state.token_b),
        )?;

        let info = ShardInfo {
            id: ShardInfo::make_id(chain_id, &pool),
            chain_id,
            pool_address: pool,
            token_a,
            token_b,
            reserve_a: state.reserve_a,
            reserve_b: state.reserve_b,
            total_supply: state.total_supply,
            curve_params: curve.unwrap_or_else(|| CurveParams::with_c(self.config.default_c)),
            fee_schedule: state.fee_schedule,
            status: if state.paused {
                ShardStatus::Paused
            } else {
                ShardStatus::Active
            },
            last_sync_ms: unix_millis(),
        };

        if info.min_reserve() < self.config.min_liquidity {
            return Ok(Fetched::BelowFloor {
                min_reserve: info.min_reserve(),
            });
        }
        Ok(Fetched::Live(info))
    }

    async fn refresh_one(&self, pool: Address, force: bool) -> Result<Applied, RouterError> {
        let lock = Arc::clone(self.refresh_locks.entry(pool).or_default().value());
        let _guard = lock.lock().await;

        if !force {
            let now = Instant::now();
            let still_stale = self
                .shards
                .get(&pool)
                .map(|e| self.is_stale(e.value(), now))
                .unwrap_or(true);
            if !still_stale {
                return Ok(Applied::AlreadyFresh);
            }
        }

        self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
        let fetched_at = Instant::now();
        match self.fetch_shard(pool).await {
            Ok(fetched) => Ok(self.apply(pool, fetched_at, fetched)),
            Err(e) => {
                self.counters.pool_failures.fetch_add(1, Ordering::Relaxed);
                warn!(chain_id = self.config.chain_id, pool = %pool, "Refresh failed, keeping stale entry: {}", e);
                Err(e)
            }
        }
    }

    fn apply(&self, pool: Address, fetched_at: Instant, fetched: Fetched) -> Applied {
        let chain_id = self.config.chain_id;
        match fetched {
            Fetched::Live(info) => {
                let (applied, event) = match self.shards.entry(pool) {
                    Entry::Occupied(mut entry) => {
                        if entry.get().fetched_at > fetched_at {
                            return Applied::Superseded;
                        }
                        let previous = &entry.get().info;
                        let changed = previous.reserve_a != info.reserve_a
                            || previous.reserve_b != info.reserve_b
                            || previous.total_supply != info.total_supply
                            || previous.status != info.status
                            || previous.curve_params != info.curve_params
                            || previous.fee_schedule != info.fee_schedule;
                        entry.insert(CachedShard {
                            info: info.clone(),
                            fetched_at,
                        });
                        if changed {
                            (Applied::Updated, Some(RouterEvent::ShardUpdated { chain_id, shard: info }))
                        } else {
                            (Applied::Unchanged, None)
                        }
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(CachedShard {
                            info: info.clone(),
                            fetched_at,
                        });
                        crate::route_log!(
                            debug,
                            Marker::Shard,
                            "Discovered shard {} ({}/{}) on chain {}",
                            pool.short(),
                            info.token_a.symbol,
                            info.token_b.symbol,
                            chain_id
                        );
                        (Applied::Inserted, Some(RouterEvent::ShardDiscovered { chain_id, shard: info }))
                    }
                };
                if let Some(event) = event {
                    self.events.emit(event);
                }
                applied
            }
            Fetched::BelowFloor { min_reserve } => {
                let removable = self
                    .shards
                    .get(&pool)
                    .map(|e| e.fetched_at <= fetched_at);
                match removable {
                    Some(true) => {
                        self.evict(&pool, &format!("reserve {} below liquidity floor", min_reserve));
                        Applied::Evicted
                    }
                    Some(false) => Applied::Superseded,
                    None => {
                        debug!(chain_id, pool = %pool, min_reserve, "Pool under liquidity floor, ignored");
                        Applied::Excluded
                    }
                }
            }
        }
    }
}

/// Reports the most recent discovery failure until a later pass succeeds
#[async_trait]
impl HealthProbe for ShardRegistry {
    async fn check_health(&self) -> Result<(), RouterError> {
        match self.discovery_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{MemoryPool, MemoryPoolEndpoint};

    const USDC: Address = Address([0x01; 20]);
    const USDT: Address = Address([0x02; 20]);
    const SMALL: Address = Address([0xa1; 20]);
    const LARGE: Address = Address([0xa2; 20]);

    fn endpoint() -> Arc<MemoryPoolEndpoint> {
        let endpoint = MemoryPoolEndpoint::new(137);
        endpoint.add_token(USDC, "USDC", 6);
        endpoint.add_token(USDT, "USDT", 6);
        endpoint.add_pool(SMALL, MemoryPool::new(USDC, 50_000, USDT, 50_000));
        endpoint.add_pool(LARGE, MemoryPool::new(USDC, 120_000, USDT, 120_000));
        Arc::new(endpoint)
    }

    fn registry(endpoint: Arc<MemoryPoolEndpoint>) -> (ShardRegistry, tokio::sync::mpsc::Receiver<RouterEvent>) {
        let (events, rx) = EventEmitter::channel(64);
        let config = RegistryConfig {
            chain_id: 137,
            min_liquidity: 1_000,
            max_cache_age: Duration::from_secs(60),
            batch_size: 4,
            default_c: CurveScalar(10_400),
        };
        (ShardRegistry::new(config, endpoint, events), rx)
    }

    #[tokio::test]
    async fn test_discovery_sorts_by_input_reserve_and_applies_default_c() {
        let (registry, mut rx) = registry(endpoint());
        let found = registry.discover_all().await.unwrap();
        assert_eq!(found.len(), 2);

        let shards = registry.get(&USDC, &USDT);
        assert_eq!(shards[0].pool_address, SMALL);
        assert_eq!(shards[1].pool_address, LARGE);
        assert_eq!(shards[0].curve_params.c, CurveScalar(10_400));

        assert_eq!(rx.recv().await.map(|e| e.name()), Some("shard-discovered"));
        assert_eq!(registry.stats().cached_tokens, 2);
    }

    #[tokio::test]
    async fn test_pool_failure_is_local_factory_failure_is_not() {
        let endpoint = endpoint();
        let (registry, _rx) = registry(Arc::clone(&endpoint));

        endpoint.fail_pool(SMALL);
        let found = registry.discover_all().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pool_address, LARGE);
        assert_eq!(registry.stats().pool_failures, 1);

        endpoint.set_outage(Some("down"));
        assert!(registry.discover_all().await.is_err());
        assert!(registry.check_health().await.is_err());

        endpoint.set_outage(None);
        registry.discover_all().await.unwrap();
        assert!(registry.check_health().await.is_ok());
    }

    #[tokio::test]
    async fn test_pools_under_floor_do_not_exist() {
        let endpoint = endpoint();
        endpoint.add_pool(Address([0xa3; 20]), MemoryPool::new(USDC, 999, USDT, 1_000_000));
        let (registry, _rx) = registry(endpoint);

        registry.discover_all().await.unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get_by_address(&Address([0xa3; 20])).is_none());
    }

    #[tokio::test]
    async fn test_paused_shards_are_cached_but_not_eligible() {
        let endpoint = endpoint();
        endpoint.add_pool(Address([0xa4; 20]), MemoryPool::new(USDC, 10_000, USDT, 10_000).paused());
        let (registry, _rx) = registry(endpoint);

        registry.discover_all().await.unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get(&USDC, &USDT).len(), 2);
        assert_eq!(registry.stats().active_shards, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_evicts_pool_that_fell_under_floor() {
        let endpoint = endpoint();
        let (registry, _rx) = registry(Arc::clone(&endpoint));
        registry.discover_all().await.unwrap();

        endpoint.set_reserves(&SMALL, 500, 500);
        tokio::time::advance(Duration::from_secs(60)).await;

        let report = registry.refresh_stale().await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.evicted, 1);
        assert!(registry.get_by_address(&SMALL).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_stale_entry() {
        let endpoint = endpoint();
        let (registry, _rx) = registry(Arc::clone(&endpoint));
        registry.discover_all().await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        endpoint.set_outage(Some("rpc down"));
        assert!(registry.refresh_stale().await.is_err());
        assert_eq!(registry.len(), 2);
        assert!(registry.get_by_address(&SMALL).is_some());

        // stale data still answers a cache-only read
        assert_eq!(registry.get(&USDC, &USDT).len(), 2);
    }
}
