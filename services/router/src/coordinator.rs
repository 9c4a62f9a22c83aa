//! Routing Coordinator - registry + selector + validator as one operation
//!
//! ## Purpose
//!
//! Answers "which shard should this trade go to" for one chain, and submits
//! the trade once the caller accepts the decision. Callers fix either side of
//! the trade with [`TradeSize`]; the engine routes exact-output trades and the
//! pathfinder resolves each of its hops here as well.
//!
//! ## Architecture Role
//!
//! ```text
//! find_route ──→ route cache hit? ──yes──→ cached RouteResult (from_cache)
//!                     │ no
//!                     ↓
//!            registry.get_fresh(pair) ──→ escalation_order (smallest first)
//!                                                 │
//!                     ┌───────────────────────────┘
//!                     ↓
//!            validate(shard) ──invalid──→ next larger shard ──exhausted──→ ExceedsThreshold
//!                     │ valid        (exact input: quote first, validate the quoted output)
//!                     ↓
//!            quote ──→ RoutingDecision ──→ cache + RoutingCompleted event
//! ```
//!
//! Decisions and routing outcomes (`NoShardsAvailable`, `ExceedsThreshold`)
//! are cached for `cache_ttl`; chain failures are not, so a recovering chain
//! is seen on the next request. A sweeper purges expired entries every half
//! TTL and publishes the running statistics.
//!
//! Every unordered pair carries a generation. An executed trade bumps it, and
//! a result computed under an older generation is returned to its caller but
//! never written to the cache.

use crate::endpoint::PoolEndpoint;
use crate::logging::Marker;
use crate::registry::ShardRegistry;
use crate::{selector, validator};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use router_config::ChainConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};
use types::{
    unix_millis, Address, ChainId, Decimal, EventEmitter, Quote, RouteOptions, RouteResult,
    RouterError, RouterEvent, RoutingDecision, RoutingStats, ShardInfo, TokenPair,
    TradeExecutionResult, TradeRequest,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub chain_id: ChainId,
    pub cache_ttl: Duration,
    pub gas_per_hop: u64,
    pub default_slippage_bps: u32,
}

impl From<&ChainConfig> for CoordinatorConfig {
    fn from(config: &ChainConfig) -> Self {
        Self {
            chain_id: config.chain_id,
            cache_ttl: config.routing.cache_ttl(),
            gas_per_hop: config.routing.estimated_gas_per_hop,
            default_slippage_bps: config.routing.default_slippage_bps,
        }
    }
}

/// Which side of a trade the caller fixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeSize {
    /// Receive exactly this much of the output token
    ExactOut(u128),
    /// Spend exactly this much of the input token
    ExactIn(u128),
}

impl TradeSize {
    pub fn amount(&self) -> u128 {
        match self {
            Self::ExactOut(amount) | Self::ExactIn(amount) => *amount,
        }
    }

    fn field(&self) -> &'static str {
        match self {
            Self::ExactOut(_) => "amount_out",
            Self::ExactIn(_) => "amount_in",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    chain_id: ChainId,
    token_in: Address,
    token_out: Address,
    size: TradeSize,
    tolerance_bps: u32,
    enforce_slippage: bool,
}

#[derive(Debug, Clone)]
struct CachedRoute {
    result: RouteResult,
    expires_at: Instant,
}

pub struct RoutingCoordinator {
    config: CoordinatorConfig,
    registry: Arc<ShardRegistry>,
    endpoint: Arc<dyn PoolEndpoint>,
    cache: DashMap<RouteKey, CachedRoute>,
    generations: DashMap<(Address, Address), u64>,
    stats: Mutex<RoutingStats>,
    rng: Mutex<StdRng>,
    events: EventEmitter,
}

impl RoutingCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        registry: Arc<ShardRegistry>,
        endpoint: Arc<dyn PoolEndpoint>,
        events: EventEmitter,
    ) -> Self {
        Self {
            config,
            registry,
            endpoint,
            cache: DashMap::new(),
            generations: DashMap::new(),
            stats: Mutex::new(RoutingStats::default()),
            rng: Mutex::new(StdRng::from_entropy()),
            events,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    /// Route an exact-output trade of `amount_out` of `pair.token_b`, paid in `pair.token_a`
    pub async fn find_route(&self, pair: &TokenPair, amount_out: u128, opts: &RouteOptions) -> RouteResult {
        let started = Instant::now();
        let result = self.resolve(pair, TradeSize::ExactOut(amount_out), opts).await;
        self.record_outcome(pair, &result, started);
        result
    }

    /// Cache lookup plus evaluation, without touching statistics or events
    pub async fn resolve(&self, pair: &TokenPair, size: TradeSize, opts: &RouteOptions) -> RouteResult {
        let key = RouteKey {
            chain_id: pair.chain_id,
            token_in: pair.token_a.address,
            token_out: pair.token_b.address,
            size,
            tolerance_bps: opts
                .slippage_tolerance_bps
                .unwrap_or(self.config.default_slippage_bps),
            enforce_slippage: opts.enforce_slippage,
        };

        if !opts.bypass_cache {
            if let Some(mut hit) = self.cached(&key) {
                hit.from_cache = true;
                return hit;
            }
        }

        let generation = self.generation(&key.token_in, &key.token_out);
        let result = self.evaluate(pair, &key).await;
        if is_cacheable(&result) {
            let current = self
                .generations
                .entry(pair_key(&key.token_in, &key.token_out))
                .or_insert(0);
            // held while inserting so an invalidation cannot slip in between
            if *current == generation {
                self.cache.insert(
                    key,
                    CachedRoute {
                        result: result.clone(),
                        expires_at: Instant::now() + self.config.cache_ttl,
                    },
                );
            } else {
                debug!(chain_id = self.config.chain_id, pair = %pair.label(), "Pair invalidated mid-flight, result not cached");
            }
        }
        result
    }

    async fn evaluate(&self, pair: &TokenPair, key: &RouteKey) -> RouteResult {
        let chain_id = self.config.chain_id;
        let (token_in, token_out) = (key.token_in, key.token_out);

        if pair.chain_id != chain_id {
            return RouteResult::failure(
                RouterError::configuration(
                    Some("chain_id"),
                    format!("pair is on chain {}, coordinator serves chain {}", pair.chain_id, chain_id),
                ),
                0,
            );
        }
        if token_in == token_out {
            return RouteResult::failure(
                RouterError::configuration(Some("pair"), "input and output token are the same"),
                0,
            );
        }
        if key.size.amount() == 0 {
            return RouteResult::failure(RouterError::configuration(Some(key.size.field()), "must be positive"), 0);
        }

        let shards = match self.registry.get_fresh(&token_in, &token_out).await {
            Ok(shards) => shards,
            Err(e) => return RouteResult::failure(e, 0),
        };

        let ordered = {
            let mut rng = self.rng.lock();
            selector::escalation_order(&shards, &token_in, &mut *rng)
        };
        let Some((selection, order)) = ordered else {
            return RouteResult::failure(
                RouterError::NoShardsAvailable {
                    chain_id,
                    pair: pair.label(),
                },
                0,
            );
        };

        let mut best_ratio: Option<Decimal> = None;
        let mut largest_out = 0u128;
        let mut evaluated = 0usize;

        for shard in &order {
            evaluated += 1;
            let (amount_out, input_quote) = match key.size {
                TradeSize::ExactOut(amount_out) => (amount_out, None),
                TradeSize::ExactIn(amount_in) => match self
                    .endpoint
                    .quote_exact_input(shard.pool_address, token_in, amount_in)
                    .await
                {
                    Ok(quote) => (quote.amount_out, Some(quote)),
                    Err(e) => return RouteResult::failure(e, evaluated),
                },
            };
            largest_out = largest_out.max(amount_out);

            let validation = validator::validate(shard, amount_out, &token_in);
            let slippage = validator::check_slippage(shard, amount_out, &token_in, key.tolerance_bps);
            if let Some(ratio) = validation.ratio {
                best_ratio = Some(best_ratio.map_or(ratio, |best| best.min(ratio)));
            }

            if !validation.is_valid {
                debug!(
                    chain_id,
                    pool = %shard.pool_address,
                    threshold = validation.threshold,
                    amount_out,
                    "Shard below c-threshold, escalating"
                );
                continue;
            }
            if key.enforce_slippage && !slippage.passed {
                debug!(
                    chain_id,
                    pool = %shard.pool_address,
                    impact_bps = slippage.price_impact_bps,
                    tolerance_bps = slippage.tolerance_bps,
                    "Shard over slippage tolerance, escalating"
                );
                continue;
            }

            let quote: Quote = match input_quote {
                Some(quote) => quote,
                None => match self
                    .endpoint
                    .quote_exact_output(shard.pool_address, token_in, amount_out)
                    .await
                {
                    Ok(quote) => quote,
                    Err(e) => return RouteResult::failure(e, evaluated),
                },
            };

            let decision = RoutingDecision {
                chain_id,
                shard_id: shard.id.clone(),
                pool_address: shard.pool_address,
                token_in,
                token_out,
                amount_out,
                expected_amount_in: quote.amount_in,
                estimated_fee: shard.fee_schedule.fee_on(quote.amount_in),
                is_smallest_shard: shard.reserve_of(&token_in) == Some(selection.min_reserve),
                confidence_score: amm::confidence_score(validation.ratio),
                estimated_gas: self.config.gas_per_hop,
                price_impact: amm::price_impact(amount_out, shard.counter_reserve(&token_in).unwrap_or(0)),
                threshold: validation.threshold,
                ratio: validation.ratio,
                slippage,
                created_at_ms: unix_millis(),
            };
            return RouteResult::success(decision, evaluated);
        }

        RouteResult::failure(
            RouterError::ExceedsThreshold {
                chain_id,
                pair: pair.label(),
                amount_out: largest_out,
                shards_checked: evaluated,
                best_ratio,
            },
            evaluated,
        )
    }

    /// Submit a routed trade.
    ///
    /// The shard is re-read first and the decision re-validated against its
    /// current reserves. A failed submission is reported, never retried.
    pub async fn execute(
        &self,
        decision: &RoutingDecision,
        max_amount_in: u128,
        recipient: Address,
    ) -> TradeExecutionResult {
        let chain_id = self.config.chain_id;
        let result = match self.admissible(decision).await {
            Err(e) => TradeExecutionResult::failed(e),
            Ok(shard) => {
                crate::route_log!(
                    info,
                    Marker::Trade,
                    "Submitting {} → {} on shard {} (chain {}, out {}, max in {})",
                    decision.token_in.short(),
                    decision.token_out.short(),
                    shard.pool_address.short(),
                    chain_id,
                    decision.amount_out,
                    max_amount_in
                );
                let request = TradeRequest {
                    pool: decision.pool_address,
                    token_in: decision.token_in,
                    token_out: decision.token_out,
                    amount_out: decision.amount_out,
                    max_amount_in,
                    recipient,
                };
                match self.endpoint.submit_trade(request).await {
                    Ok(receipt) => {
                        crate::route_log!(
                            info,
                            Marker::Trade,
                            "Trade settled on chain {}: {} (in {}, out {}, gas {})",
                            chain_id,
                            receipt.tx_hash,
                            receipt.amount_in,
                            receipt.amount_out,
                            receipt.gas_used
                        );
                        // reserves moved: re-read the shard, then drop cached decisions
                        if let Err(e) = self.registry.refresh_pool(&decision.pool_address).await {
                            warn!(chain_id, pool = %decision.pool_address, "Post-trade shard refresh failed: {}", e);
                        }
                        self.invalidate_pair(&decision.token_in, &decision.token_out);
                        TradeExecutionResult::from_receipt(&receipt)
                    }
                    Err(e) => {
                        crate::route_log!(error, Marker::Trade, "Trade failed on chain {}: {}", chain_id, e);
                        TradeExecutionResult::failed(e)
                    }
                }
            }
        };

        self.events.emit(RouterEvent::TradeExecuted {
            chain_id,
            result: result.clone(),
        });
        result
    }

    async fn admissible(&self, decision: &RoutingDecision) -> Result<ShardInfo, RouterError> {
        let chain_id = self.config.chain_id;
        if decision.chain_id != chain_id {
            return Err(RouterError::configuration(
                Some("chain_id"),
                format!("decision is for chain {}, coordinator serves chain {}", decision.chain_id, chain_id),
            ));
        }

        let pair_label = || format!("{}/{}", decision.token_in.short(), decision.token_out.short());
        let shard = self
            .registry
            .refresh_pool(&decision.pool_address)
            .await?
            .filter(ShardInfo::is_active)
            .ok_or_else(|| RouterError::NoShardsAvailable {
                chain_id,
                pair: pair_label(),
            })?;

        let validation = validator::validate(&shard, decision.amount_out, &decision.token_in);
        if !validation.is_valid {
            return Err(RouterError::ExceedsThreshold {
                chain_id,
                pair: pair_label(),
                amount_out: decision.amount_out,
                shards_checked: 1,
                best_ratio: validation.ratio,
            });
        }
        Ok(shard)
    }

    pub fn registry(&self) -> &Arc<ShardRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> RoutingStats {
        self.stats.lock().clone()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached result for the pair, in either direction, and refuse
    /// results still being computed against the old state
    pub fn invalidate_pair(&self, a: &Address, b: &Address) {
        *self.generations.entry(pair_key(a, b)).or_insert(0) += 1;
        self.cache.retain(|key, _| {
            !((key.token_in == *a && key.token_out == *b) || (key.token_in == *b && key.token_out == *a))
        });
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Remove expired cache entries, returning how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.cache.len();
        self.cache.retain(|_, cached| cached.expires_at > now);
        before.saturating_sub(self.cache.len())
    }

    /// Purge the route cache every half TTL and publish statistics
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let period = (coordinator.config.cache_ttl / 2).max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let swept = coordinator.sweep_expired();
                if swept > 0 {
                    debug!(chain_id = coordinator.config.chain_id, swept, "Route cache swept");
                }
                coordinator.events.emit(RouterEvent::MetricsUpdated {
                    chain_id: coordinator.config.chain_id,
                    stats: coordinator.stats(),
                });
            }
        })
    }

    fn cached(&self, key: &RouteKey) -> Option<RouteResult> {
        let now = Instant::now();
        let hit = self
            .cache
            .get(key)
            .filter(|cached| cached.expires_at > now)
            .map(|cached| cached.result.clone());
        if hit.is_none() {
            self.cache.remove_if(key, |_, cached| cached.expires_at <= now);
        }
        hit
    }

    fn generation(&self, a: &Address, b: &Address) -> u64 {
        self.generations.get(&pair_key(a, b)).map_or(0, |g| *g)
    }

    /// Fold a finished `find_route` into the statistics and publish it
    pub fn record_outcome(&self, pair: &TokenPair, result: &RouteResult, started: Instant) {
        let elapsed = started.elapsed();
        {
            let mut stats = self.stats.lock();
            stats.record(result.is_success(), elapsed.as_secs_f64() * 1000.0);
            if result.from_cache {
                stats.cache_hits += 1;
            }
        }

        let chain_id = self.config.chain_id;
        match (&result.decision, &result.path, &result.error) {
            (Some(decision), _, _) => {
                debug!(
                    chain_id,
                    pair = %pair.label(),
                    pool = %decision.pool_address,
                    smallest = decision.is_smallest_shard,
                    from_cache = result.from_cache,
                    "Route found"
                );
                self.events.emit(RouterEvent::RoutingCompleted {
                    chain_id,
                    decision: decision.clone(),
                    latency_ms: elapsed.as_millis() as u64,
                    from_cache: result.from_cache,
                });
            }
            (None, Some(path), _) => {
                debug!(
                    chain_id,
                    pair = %pair.label(),
                    path = %path.path.join(" → "),
                    from_cache = result.from_cache,
                    "Multi-hop route found"
                );
                self.events.emit(RouterEvent::PathCompleted {
                    chain_id,
                    path: path.clone(),
                    latency_ms: elapsed.as_millis() as u64,
                    from_cache: result.from_cache,
                });
            }
            (None, None, Some(error)) => {
                debug!(chain_id, pair = %pair.label(), "Routing failed: {}", error);
                self.events.emit(RouterEvent::Error {
                    chain_id,
                    operation: "find_route".to_string(),
                    error: error.clone(),
                });
            }
            (None, None, None) => {}
        }
    }
}

fn pair_key(a: &Address, b: &Address) -> (Address, Address) {
    if a <= b {
        (*a, *b)
    } else {
        (*b, *a)
    }
}

/// Decisions and routing outcomes are cached; chain faults and bad requests are not
fn is_cacheable(result: &RouteResult) -> bool {
    match &result.error {
        None => result.decision.is_some(),
        Some(error) => matches!(
            error,
            RouterError::NoShardsAvailable { .. } | RouterError::ExceedsThreshold { .. }
        ),
    }
}
