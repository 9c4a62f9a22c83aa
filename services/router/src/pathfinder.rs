//! Multi-Hop Pathfinder
//!
//! Routing over at most two hops. A pair with direct shards is routed
//! directly; otherwise a pair-specific fixed route is tried first, then each
//! configured hub in order. Every hop is resolved by the chain's
//! [`RoutingCoordinator`], so it gets the same smallest-shard selection,
//! c-threshold escalation and route cache as a single-shard trade.
//!
//! Exact-input paths feed hop 1's output into hop 2. Exact-output paths are
//! solved backwards: hop 2 is sized first and its required input becomes hop
//! 1's exact output.
//!
//! This is deliberately not a shortest-path search: every extra hop adds a
//! fee and a price impact, and the shard universe per chain is small.

use crate::coordinator::{RoutingCoordinator, TradeSize};
use crate::logging::Marker;
use crate::registry::ShardRegistry;
use isolation::ContextManager;
use router_config::{ChainConfig, FixedRouteAddresses};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use types::{Address, ChainId, PathResult, PathStep, RouteOptions, RouterError, Token, TokenPair};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathfinderConfig {
    pub chain_id: ChainId,
    /// Intermediate tokens, in preference order
    pub hubs: Vec<Address>,
    pub fixed_routes: Vec<FixedRouteAddresses>,
    /// Lifetime of a cached path in the chain context
    pub cache_ttl: Duration,
}

impl PathfinderConfig {
    pub fn from_chain(config: &ChainConfig) -> Result<Self, RouterError> {
        Ok(Self {
            chain_id: config.chain_id,
            hubs: config.hub_addresses()?,
            fixed_routes: config.fixed_route_addresses()?,
            cache_ttl: config.routing.cache_ttl(),
        })
    }
}

pub struct Pathfinder {
    config: PathfinderConfig,
    coordinator: Arc<RoutingCoordinator>,
    contexts: Arc<ContextManager>,
}

pub fn path_cache_key(token_in: &Address, token_out: &Address, amount_in: u128) -> String {
    format!("path:{}:{}:{}", token_in, token_out, amount_in)
}

impl Pathfinder {
    pub fn new(
        config: PathfinderConfig,
        coordinator: Arc<RoutingCoordinator>,
        contexts: Arc<ContextManager>,
    ) -> Self {
        Self {
            config,
            coordinator,
            contexts,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    fn registry(&self) -> &Arc<ShardRegistry> {
        self.coordinator.registry()
    }

    /// Route `amount_in` of `token_in` to `token_out` in one or two hops
    pub async fn find_path(
        &self,
        token_in: &Address,
        token_out: &Address,
        amount_in: u128,
    ) -> Result<PathResult, RouterError> {
        let chain_id = self.config.chain_id;
        check_request(token_in, token_out, amount_in, "amount_in")?;

        let cache_key = path_cache_key(token_in, token_out, amount_in);
        if let Some(cached) = self
            .contexts
            .cache_get(chain_id, &cache_key)
            .and_then(|value| serde_json::from_value::<PathResult>(value).ok())
        {
            debug!(chain_id, key = %cache_key, "Path served from context cache");
            return Ok(cached);
        }

        let size = TradeSize::ExactIn(amount_in);
        let opts = RouteOptions::default();
        let result = match self.hop(token_in, token_out, size, &opts).await {
            Ok(step) => assemble(vec![step], None),
            Err(RouterError::NoShardsAvailable { .. }) => self.via_hubs(token_in, token_out, size, &opts).await?,
            Err(e) => return Err(e),
        };

        match serde_json::to_value(&result) {
            Ok(value) => {
                if let Err(e) = self
                    .contexts
                    .cache_set(chain_id, &cache_key, value, self.config.cache_ttl)
                {
                    debug!(chain_id, "Path not cached: {}", e);
                }
            }
            Err(e) => debug!(chain_id, "Path not serializable: {}", e),
        }
        Ok(result)
    }

    /// Exact-output route through a hub, for pairs with no direct shard.
    ///
    /// Not kept in the context cache; each hop is cached by the coordinator.
    pub async fn find_route_via_hub(
        &self,
        token_in: &Address,
        token_out: &Address,
        amount_out: u128,
        opts: &RouteOptions,
    ) -> Result<PathResult, RouterError> {
        check_request(token_in, token_out, amount_out, "amount_out")?;
        self.via_hubs(token_in, token_out, TradeSize::ExactOut(amount_out), opts)
            .await
    }

    /// Paths currently held in the chain context, expired ones included
    pub fn cached_paths(&self) -> usize {
        self.contexts.cache_len(self.config.chain_id)
    }

    /// Purge expired paths from the chain context every half TTL
    pub fn spawn_cache_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let pathfinder = Arc::clone(self);
        let period = (pathfinder.config.cache_ttl / 2).max(Duration::from_millis(1));
        tokio::spawn(async move {
            let chain_id = pathfinder.config.chain_id;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = pathfinder.contexts.purge_expired(chain_id);
                if purged > 0 {
                    debug!(chain_id, purged, "Path cache swept");
                }
            }
        })
    }

    async fn via_hubs(
        &self,
        token_in: &Address,
        token_out: &Address,
        size: TradeSize,
        opts: &RouteOptions,
    ) -> Result<PathResult, RouterError> {
        let chain_id = self.config.chain_id;
        for via in self.candidate_hubs(token_in, token_out) {
            let (first, second) = match self.legs(token_in, &via, token_out, size, opts).await {
                Ok(legs) => legs,
                Err(e) if e.is_chain_failure() => return Err(e),
                Err(e) => {
                    debug!(chain_id, via = %via, "Hub rejected: {}", e);
                    continue;
                }
            };

            crate::route_log!(
                info,
                Marker::Path,
                "Chain {}: {} → {} → {} ({} in, {} out)",
                chain_id,
                first.token_in.symbol,
                first.token_out.symbol,
                second.token_out.symbol,
                first.amount_in,
                second.amount_out
            );
            return Ok(assemble(vec![first, second], Some(via)));
        }

        Err(RouterError::NoRoute {
            chain_id,
            token_in: self.label(token_in),
            token_out: self.label(token_out),
        })
    }

    /// Both hops through `via`, sized from whichever end the trade fixes
    async fn legs(
        &self,
        token_in: &Address,
        via: &Address,
        token_out: &Address,
        size: TradeSize,
        opts: &RouteOptions,
    ) -> Result<(PathStep, PathStep), RouterError> {
        match size {
            TradeSize::ExactIn(amount_in) => {
                let first = self.hop(token_in, via, TradeSize::ExactIn(amount_in), opts).await?;
                let second = self
                    .hop(via, token_out, TradeSize::ExactIn(first.amount_out), opts)
                    .await?;
                Ok((first, second))
            }
            TradeSize::ExactOut(amount_out) => {
                let second = self.hop(via, token_out, TradeSize::ExactOut(amount_out), opts).await?;
                let first = self
                    .hop(token_in, via, TradeSize::ExactOut(second.amount_in), opts)
                    .await?;
                Ok((first, second))
            }
        }
    }

    /// Fixed routes for the pair first, then hubs in configured order
    fn candidate_hubs(&self, token_in: &Address, token_out: &Address) -> Vec<Address> {
        let mut hubs: Vec<Address> = self
            .config
            .fixed_routes
            .iter()
            .filter(|r| r.from == *token_in && r.to == *token_out)
            .map(|r| r.via)
            .collect();
        for hub in &self.config.hubs {
            if hub != token_in && hub != token_out && !hubs.contains(hub) {
                hubs.push(*hub);
            }
        }
        hubs
    }

    /// One hop, resolved by the coordinator
    async fn hop(
        &self,
        token_in: &Address,
        token_out: &Address,
        size: TradeSize,
        opts: &RouteOptions,
    ) -> Result<PathStep, RouterError> {
        let pair = TokenPair::new(self.token(token_in), self.token(token_out));
        let decision = self.coordinator.resolve(&pair, size, opts).await.into_result()?;
        Ok(PathStep {
            shard_id: decision.shard_id,
            pool_address: decision.pool_address,
            token_in: pair.token_a,
            token_out: pair.token_b,
            amount_in: decision.expected_amount_in,
            amount_out: decision.amount_out,
            fee: decision.estimated_fee,
            is_smallest_shard: decision.is_smallest_shard,
        })
    }

    /// Metadata seen at discovery; a token no shard holds gets a placeholder
    fn token(&self, address: &Address) -> Token {
        self.registry()
            .cached_token(address)
            .unwrap_or_else(|| Token::new(self.config.chain_id, *address, address.short(), 0))
    }

    fn label(&self, token: &Address) -> String {
        self.registry()
            .cached_token(token)
            .map(|t| t.symbol)
            .unwrap_or_else(|| token.short())
    }
}

fn check_request(token_in: &Address, token_out: &Address, amount: u128, field: &str) -> Result<(), RouterError> {
    if token_in == token_out {
        return Err(RouterError::configuration(Some("token_out"), "input and output token are the same"));
    }
    if amount == 0 {
        return Err(RouterError::configuration(Some(field), "must be positive"));
    }
    Ok(())
}

fn assemble(steps: Vec<PathStep>, via: Option<Address>) -> PathResult {
    let path = steps
        .first()
        .map(|s| s.token_in.symbol.clone())
        .into_iter()
        .chain(steps.iter().map(|s| s.token_out.symbol.clone()))
        .collect();
    PathResult {
        path,
        amount_in: steps.first().map_or(0, |s| s.amount_in),
        amount_out: steps.last().map_or(0, |s| s.amount_out),
        total_fee: PathResult::fee_in_output_token(&steps),
        steps,
        via,
    }
}
