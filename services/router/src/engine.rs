//! # Shard Router Engine - Multi-Chain Composition
//!
//! ## Purpose
//!
//! Owns every chain's routing stack and is the single function-call surface
//! for the API layer. Each chain gets its own isolation context, circuit
//! breaker, shard registry, routing coordinator, pathfinder and background
//! tasks; nothing is shared between chains except the engine's bookkeeping.
//!
//! ## Integration Points
//!
//! - **Input**: `ChainConfig` + a [`PoolEndpoint`] per chain
//! - **Output**: routing results per call, [`RouterEvent`]s on one sink channel
//! - **Isolation**: every chain-scoped call runs through
//!   [`FailureIsolation::run_isolated`] and is counted in that chain's context
//!
//! ## Architecture Role
//!
//! ```text
//!                        ┌──────────── chain 137 ────────────┐
//!  find_route ──→ run_isolated ──→ RoutingCoordinator ──→ ShardRegistry ──→ PoolEndpoint
//!                        │              │ no direct shard                     │
//!                        │              ↓                                     │
//!                        │        Pathfinder (hubs, each hop via the coordinator)
//!                        │   events ↓            events ↓                     │
//!                        │        forwarder (select_all) ─────────────┐       │
//!                        └────────────────────────────────────────────│───────┘
//!  HealthMonitor ──→ events ──→ forwarder ────────────────────────────┤
//!                                                                     ↓
//!                                                            sink channel ──→ observability
//! ```
//!
//! Live service handles are kept in a [`ServiceRegistry`]; the chain's context
//! only records their ids.

use crate::coordinator::{CoordinatorConfig, RoutingCoordinator, TradeSize};
use crate::endpoint::{EndpointProbe, PoolEndpoint};
use crate::logging::Marker;
use crate::pathfinder::{Pathfinder, PathfinderConfig};
use crate::registry::{RegistryConfig, RegistryStats, ShardRegistry};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use health_check::{HealthMonitor, HealthProbe, HealthSummary, MonitorConfig, MonitoredService};
use isolation::{
    CircuitBreakerStats, ContextManager, ContextMetrics, FailureIsolation, IntegrityReport,
    IsolationCounters, IsolationPolicy, ServiceId, ServiceRegistry,
};
use parking_lot::Mutex;
use router_config::{ChainConfig, EngineSettings};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use types::{
    Address, ChainHealth, ChainId, EventEmitter, PathResult, RouteOptions, RouteResult,
    RouterError, RouterEvent, RoutingDecision, RoutingStats, ShardInfo, TokenPair,
    TradeExecutionResult,
};

/// Live service handle stored in the engine's [`ServiceRegistry`]
pub enum ChainService {
    Registry(Arc<ShardRegistry>),
    Coordinator(Arc<RoutingCoordinator>),
    Pathfinder(Arc<Pathfinder>),
}

impl ChainService {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Registry(_) => "registry",
            Self::Coordinator(_) => "coordinator",
            Self::Pathfinder(_) => "pathfinder",
        }
    }
}

/// Per-chain metrics snapshot for the API layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainMetrics {
    pub chain_id: ChainId,
    pub routing: RoutingStats,
    pub registry: RegistryStats,
    pub context: ContextMetrics,
    pub breaker: Option<CircuitBreakerStats>,
    pub isolation: Option<IsolationCounters>,
    pub route_cache_entries: usize,
}

struct ChainRuntime {
    registry_id: ServiceId,
    coordinator_id: ServiceId,
    pathfinder_id: ServiceId,
    tasks: Vec<JoinHandle<()>>,
}

impl ChainRuntime {
    fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct ShardRouterEngine {
    settings: EngineSettings,
    isolation: Arc<FailureIsolation>,
    contexts: Arc<ContextManager>,
    services: ServiceRegistry<ChainService>,
    health: HealthMonitor,
    chains: DashMap<ChainId, ChainRuntime>,
    sink: EventEmitter,
    sink_rx: Mutex<Option<mpsc::Receiver<RouterEvent>>>,
    health_forwarder: JoinHandle<()>,
}

impl ShardRouterEngine {
    /// Build an engine with no chains. Must be called inside a Tokio runtime.
    pub fn new(settings: EngineSettings) -> Self {
        let (sink, sink_rx) = EventEmitter::channel(settings.sink_channel_capacity);
        let (health_events, health_rx) = EventEmitter::channel(settings.event_channel_capacity);
        let isolation = Arc::new(FailureIsolation::new());
        let health = HealthMonitor::new(Arc::clone(&isolation), health_events);
        let health_forwarder = spawn_forwarder(None, vec![health_rx], sink.clone());

        Self {
            settings,
            isolation,
            contexts: Arc::new(ContextManager::new()),
            services: ServiceRegistry::new(),
            health,
            chains: DashMap::new(),
            sink,
            sink_rx: Mutex::new(Some(sink_rx)),
            health_forwarder,
        }
    }

    /// Receiving end of the event sink; only the first caller gets it
    pub fn take_event_receiver(&self) -> Option<mpsc::Receiver<RouterEvent>> {
        self.sink_rx.lock().take()
    }

    /// Events dropped because the sink was full or nobody was listening
    pub fn dropped_events(&self) -> u64 {
        self.sink.dropped()
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<ChainId> = self.chains.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn has_chain(&self, chain_id: ChainId) -> bool {
        self.chains.contains_key(&chain_id)
    }

    /// Register a chain and start its background tasks.
    ///
    /// Configuration is an immutable snapshot: changing it means removing the
    /// chain and adding it again. The initial discovery runs inline; if it
    /// fails the chain is still added and the refresh loop keeps retrying.
    pub async fn add_chain(&self, config: ChainConfig, endpoint: Arc<dyn PoolEndpoint>) -> Result<(), RouterError> {
        let chain_id = config.chain_id;
        config.validate()?;
        if endpoint.chain_id() != chain_id {
            return Err(RouterError::configuration(
                Some("chain_id"),
                format!("endpoint serves chain {}, config is for chain {}", endpoint.chain_id(), chain_id),
            ));
        }
        if self.chains.contains_key(&chain_id) {
            return Err(RouterError::configuration(
                Some("chain_id"),
                format!("chain {} is already registered", chain_id),
            ));
        }

        let registry_config = RegistryConfig::from_chain(&config)?;
        let pathfinder_config = PathfinderConfig::from_chain(&config)?;

        self.contexts.create(chain_id)?;
        self.isolation
            .register(chain_id, IsolationPolicy::from(&config.circuit_breaker));

        let (registry_events, registry_rx) = EventEmitter::channel(self.settings.event_channel_capacity);
        let (coordinator_events, coordinator_rx) = EventEmitter::channel(self.settings.event_channel_capacity);

        let registry = Arc::new(ShardRegistry::new(registry_config, Arc::clone(&endpoint), registry_events));
        let coordinator = Arc::new(RoutingCoordinator::new(
            CoordinatorConfig::from(&config),
            Arc::clone(&registry),
            Arc::clone(&endpoint),
            coordinator_events,
        ));
        let pathfinder = Arc::new(Pathfinder::new(
            pathfinder_config,
            Arc::clone(&coordinator),
            Arc::clone(&self.contexts),
        ));

        let registry_id = self.attach(chain_id, ChainService::Registry(Arc::clone(&registry)))?;
        let coordinator_id = self.attach(chain_id, ChainService::Coordinator(Arc::clone(&coordinator)))?;
        let pathfinder_id = self.attach(chain_id, ChainService::Pathfinder(Arc::clone(&pathfinder)))?;

        let tasks = vec![
            spawn_forwarder(Some(chain_id), vec![registry_rx, coordinator_rx], self.sink.clone()),
            registry.spawn_refresh_loop(Arc::clone(&self.isolation), config.refresh_interval()),
            coordinator.spawn_sweeper(),
            pathfinder.spawn_cache_sweeper(),
        ];

        self.health.start(
            chain_id,
            MonitorConfig::from(&config.health),
            Arc::new(EndpointProbe(endpoint)),
            vec![
                MonitoredService::with_probe("registry", Arc::clone(&registry) as Arc<dyn HealthProbe>),
                MonitoredService::without_probe("coordinator"),
                MonitoredService::without_probe("pathfinder"),
            ],
        );

        self.chains.insert(
            chain_id,
            ChainRuntime {
                registry_id,
                coordinator_id,
                pathfinder_id,
                tasks,
            },
        );
        crate::route_log!(info, Marker::Chain, "Chain {} ({}) registered", chain_id, config.name);

        match self
            .isolation
            .run_isolated(chain_id, "discover", registry.discover_all())
            .await
        {
            Ok(shards) => crate::route_log!(debug, Marker::Discovery, "Chain {}: {} shards discovered", chain_id, shards.len()),
            Err(e) => crate::route_log!(warn, Marker::Discovery, "Chain {}: initial discovery failed, will retry: {}", chain_id, e),
        }
        Ok(())
    }

    /// Tear down a chain: tasks, monitor, services, breaker and context.
    /// Other chains are untouched.
    pub fn remove_chain(&self, chain_id: ChainId) -> bool {
        let Some((_, runtime)) = self.chains.remove(&chain_id) else {
            return false;
        };
        runtime.abort();
        self.health.stop(chain_id);
        let removed = self.services.remove_chain(chain_id);
        for service in &removed {
            if let ChainService::Registry(registry) = service.as_ref() {
                registry.clear();
            }
        }
        self.isolation.unregister(chain_id);
        self.contexts.remove(chain_id);
        info!(chain_id, services = removed.len(), "Chain removed");
        true
    }

    /// Route an exact-output trade on one chain.
    ///
    /// A pair with no direct shard falls back to a two-hop route through the
    /// chain's hubs; the result then carries a path instead of a decision.
    pub async fn find_route(
        &self,
        chain_id: ChainId,
        pair: &TokenPair,
        amount_out: u128,
        opts: &RouteOptions,
    ) -> RouteResult {
        let services = self
            .coordinator(chain_id)
            .and_then(|coordinator| Ok((coordinator, self.pathfinder(chain_id)?)));
        let (coordinator, pathfinder) = match services {
            Ok(services) => services,
            Err(e) => return RouteResult::failure(e, 0),
        };
        let outcome = self
            .isolated(chain_id, "find_route", async {
                let started = Instant::now();
                let mut result = coordinator
                    .resolve(pair, TradeSize::ExactOut(amount_out), opts)
                    .await;
                if matches!(result.error, Some(RouterError::NoShardsAvailable { .. })) {
                    debug!(chain_id, pair = %pair.label(), "No direct shard, trying hubs");
                    result = match pathfinder
                        .find_route_via_hub(&pair.token_a.address, &pair.token_b.address, amount_out, opts)
                        .await
                    {
                        Ok(path) => {
                            let hops = path.steps.len();
                            RouteResult::multi_hop(path, hops)
                        }
                        Err(e) => RouteResult::failure(e, result.shards_evaluated),
                    };
                }
                coordinator.record_outcome(pair, &result, started);
                match result.error.clone() {
                    Some(e) if e.is_chain_failure() => Err(e),
                    _ => Ok(result),
                }
            })
            .await;

        match outcome {
            Ok(result) => {
                self.contexts.record_request(chain_id, result.is_success());
                result
            }
            Err(e) => RouteResult::failure(e, 0),
        }
    }

    /// Submit a trade for a previously returned decision
    pub async fn execute(
        &self,
        chain_id: ChainId,
        decision: &RoutingDecision,
        max_amount_in: u128,
        recipient: Address,
    ) -> TradeExecutionResult {
        let coordinator = match self.coordinator(chain_id) {
            Ok(coordinator) => coordinator,
            Err(e) => return TradeExecutionResult::failed(e),
        };
        let outcome = self
            .isolated(chain_id, "execute", async {
                let result = coordinator.execute(decision, max_amount_in, recipient).await;
                match result.error.clone() {
                    Some(e) if e.is_chain_failure() => Err(e),
                    _ => Ok(result),
                }
            })
            .await;

        match outcome {
            Ok(result) => {
                self.contexts.record_request(chain_id, result.success);
                result
            }
            Err(e) => TradeExecutionResult::failed(e),
        }
    }

    /// Exact-input path search, direct or through one hub. Every hop is
    /// resolved by the chain's coordinator.
    pub async fn find_path(
        &self,
        chain_id: ChainId,
        token_in: &Address,
        token_out: &Address,
        amount_in: u128,
    ) -> Result<PathResult, RouterError> {
        let pathfinder = self.pathfinder(chain_id)?;
        let result = self
            .isolated(chain_id, "find_path", pathfinder.find_path(token_in, token_out, amount_in))
            .await;
        self.report(chain_id, "find_path", &result);
        result
    }

    /// Shards for one pair (refreshed if stale), or every cached shard
    pub async fn get_shards(
        &self,
        chain_id: ChainId,
        pair: Option<(Address, Address)>,
    ) -> Result<Vec<ShardInfo>, RouterError> {
        let registry = self.registry(chain_id)?;
        let result = match pair {
            Some((token_in, token_out)) => {
                self.isolated(chain_id, "get_shards", registry.get_fresh(&token_in, &token_out))
                    .await
            }
            None => {
                self.isolated(chain_id, "get_shards", async { Ok(registry.all()) })
                    .await
            }
        };
        self.report(chain_id, "get_shards", &result);
        result
    }

    /// Re-run factory discovery for a chain
    pub async fn discover(&self, chain_id: ChainId) -> Result<Vec<ShardInfo>, RouterError> {
        let registry = self.registry(chain_id)?;
        let result = self
            .isolated(chain_id, "discover", registry.discover_all())
            .await;
        self.report(chain_id, "discover", &result);
        result
    }

    /// Latest health snapshot of a chain
    pub fn get_health(&self, chain_id: ChainId) -> Result<ChainHealth, RouterError> {
        self.ensure_chain(chain_id)?;
        self.health
            .get_health(chain_id)
            .ok_or_else(|| unknown_chain(chain_id))
    }

    /// Run a health check now instead of waiting for the interval
    pub async fn check_health(&self, chain_id: ChainId) -> Result<ChainHealth, RouterError> {
        self.ensure_chain(chain_id)?;
        self.health
            .check_now(chain_id)
            .await
            .ok_or_else(|| unknown_chain(chain_id))
    }

    pub fn health_summary(&self) -> HealthSummary {
        self.health.summary()
    }

    pub fn get_metrics(&self, chain_id: ChainId) -> Result<ChainMetrics, RouterError> {
        let coordinator = self.coordinator(chain_id)?;
        Ok(ChainMetrics {
            chain_id,
            routing: coordinator.stats(),
            registry: coordinator.registry().stats(),
            context: self.contexts.metrics(chain_id).unwrap_or_default(),
            breaker: self.isolation.stats(chain_id),
            isolation: self.isolation.counters(chain_id),
            route_cache_entries: coordinator.cache_len(),
        })
    }

    /// Chain-local scratch state, rejected for reserved keys
    pub fn set_chain_state(&self, chain_id: ChainId, key: &str, value: serde_json::Value) -> Result<(), RouterError> {
        self.contexts.set_state(chain_id, key, value)
    }

    pub fn get_chain_state(&self, chain_id: ChainId, key: &str) -> Option<serde_json::Value> {
        self.contexts.get_state(chain_id, key)
    }

    /// Drop the chain's scratch state and cached paths
    pub fn clear_chain_state(&self, chain_id: ChainId) -> Result<(), RouterError> {
        self.contexts.clear_state(chain_id)
    }

    pub fn verify_integrity(&self) -> IntegrityReport {
        let report = self.contexts.verify_integrity(&self.services);
        if !report.is_clean() {
            warn!(?report, "Chain isolation violated");
        }
        report
    }

    /// Stop every chain and the event forwarders
    pub fn shutdown(&self) {
        for chain_id in self.chain_ids() {
            self.remove_chain(chain_id);
        }
        self.health.stop_all();
        self.health_forwarder.abort();
        info!("Shard router engine stopped");
    }

    async fn isolated<T, F>(&self, chain_id: ChainId, operation: &str, fut: F) -> Result<T, RouterError>
    where
        F: Future<Output = Result<T, RouterError>>,
    {
        let result = self.isolation.run_isolated(chain_id, operation, fut).await;
        if let Err(e) = &result {
            if e.is_chain_failure() || matches!(e, RouterError::ServiceUnavailable { .. }) {
                self.contexts.record_request(chain_id, false);
                self.sink.emit(RouterEvent::Error {
                    chain_id,
                    operation: operation.to_string(),
                    error: e.clone(),
                });
            }
        }
        result
    }

    /// Count a completed call; chain failures were already counted by `isolated`
    fn report<T>(&self, chain_id: ChainId, operation: &str, result: &Result<T, RouterError>) {
        match result {
            Ok(_) => self.contexts.record_request(chain_id, true),
            Err(e) if e.is_chain_failure() || matches!(e, RouterError::ServiceUnavailable { .. }) => {}
            Err(e) => {
                debug!(chain_id, operation, "Request rejected: {}", e);
                self.contexts.record_request(chain_id, false);
            }
        }
    }

    fn attach(&self, chain_id: ChainId, service: ChainService) -> Result<ServiceId, RouterError> {
        let name = service.name();
        let id = self.services.register(chain_id, Arc::new(service));
        self.contexts.attach_service(chain_id, id)?;
        debug!(chain_id, service = name, id = id.0, "Service attached");
        Ok(id)
    }

    fn ensure_chain(&self, chain_id: ChainId) -> Result<(), RouterError> {
        if self.chains.contains_key(&chain_id) {
            Ok(())
        } else {
            Err(unknown_chain(chain_id))
        }
    }

    fn service(&self, chain_id: ChainId, pick: fn(&ChainRuntime) -> ServiceId) -> Result<Arc<ChainService>, RouterError> {
        let id = self
            .chains
            .get(&chain_id)
            .map(|runtime| pick(runtime.value()))
            .ok_or_else(|| unknown_chain(chain_id))?;
        self.services
            .get(chain_id, id)
            .ok_or_else(|| unknown_chain(chain_id))
    }

    fn registry(&self, chain_id: ChainId) -> Result<Arc<ShardRegistry>, RouterError> {
        match self.service(chain_id, |r| r.registry_id)?.as_ref() {
            ChainService::Registry(registry) => Ok(Arc::clone(registry)),
            other => Err(misregistered(chain_id, other)),
        }
    }

    fn coordinator(&self, chain_id: ChainId) -> Result<Arc<RoutingCoordinator>, RouterError> {
        match self.service(chain_id, |r| r.coordinator_id)?.as_ref() {
            ChainService::Coordinator(coordinator) => Ok(Arc::clone(coordinator)),
            other => Err(misregistered(chain_id, other)),
        }
    }

    fn pathfinder(&self, chain_id: ChainId) -> Result<Arc<Pathfinder>, RouterError> {
        match self.service(chain_id, |r| r.pathfinder_id)?.as_ref() {
            ChainService::Pathfinder(pathfinder) => Ok(Arc::clone(pathfinder)),
            other => Err(misregistered(chain_id, other)),
        }
    }
}

impl Drop for ShardRouterEngine {
    fn drop(&mut self) {
        for entry in self.chains.iter() {
            entry.value().abort();
        }
        self.health_forwarder.abort();
    }
}

fn unknown_chain(chain_id: ChainId) -> RouterError {
    RouterError::configuration(Some("chain_id"), format!("chain {} is not registered", chain_id))
}

fn misregistered(chain_id: ChainId, found: &ChainService) -> RouterError {
    RouterError::configuration(
        Some("chain_id"),
        format!("chain {} service slot holds a {}", chain_id, found.name()),
    )
}

/// Forward every component channel onto the sink until all senders are gone
fn spawn_forwarder(
    chain_id: Option<ChainId>,
    receivers: Vec<mpsc::Receiver<RouterEvent>>,
    sink: EventEmitter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut merged = stream::select_all(receivers.into_iter().map(|rx| {
            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) }).boxed()
        }));
        while let Some(event) = merged.next().await {
            sink.emit(event);
        }
        debug!(?chain_id, "Event forwarder finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{demo_tokens, MemoryPoolEndpoint};
    use types::{RoutingStats, Token};

    fn chain_config(chain_id: ChainId) -> ChainConfig {
        let mut config = ChainConfig::new(chain_id, format!("test-{}", chain_id));
        config.rpc_endpoint = "memory://".to_string();
        config.factory_address = format!("0x{}", "f".repeat(40));
        config
    }

    #[tokio::test]
    async fn test_add_chain_registers_every_service() {
        let engine = ShardRouterEngine::new(EngineSettings::default());
        engine
            .add_chain(chain_config(137), Arc::new(MemoryPoolEndpoint::demo(137)))
            .await
            .unwrap();

        assert_eq!(engine.chain_ids(), vec![137]);
        assert_eq!(engine.get_shards(137, None).await.unwrap().len(), 3);
        assert!(engine.verify_integrity().is_clean());
        assert_eq!(engine.contexts.service_ids(137).len(), 3);

        engine.shutdown();
        assert!(engine.chain_ids().is_empty());
        assert!(engine.services.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_and_mismatched_chains_rejected() {
        let engine = ShardRouterEngine::new(EngineSettings::default());
        engine
            .add_chain(chain_config(137), Arc::new(MemoryPoolEndpoint::demo(137)))
            .await
            .unwrap();

        let duplicate = engine
            .add_chain(chain_config(137), Arc::new(MemoryPoolEndpoint::demo(137)))
            .await;
        assert!(matches!(duplicate, Err(RouterError::ConfigurationError { .. })));

        let mismatched = engine
            .add_chain(chain_config(42161), Arc::new(MemoryPoolEndpoint::demo(1)))
            .await;
        assert!(matches!(mismatched, Err(RouterError::ConfigurationError { .. })));
        assert!(!engine.has_chain(42161));
    }

    #[tokio::test]
    async fn test_unknown_chain_is_a_configuration_error() {
        let engine = ShardRouterEngine::new(EngineSettings::default());
        let (usdc, usdt, _) = demo_tokens();
        let pair = TokenPair::new(Token::new(5, usdc, "USDC", 6), Token::new(5, usdt, "USDT", 6));

        let result = engine.find_route(5, &pair, 100, &RouteOptions::default()).await;
        assert!(matches!(result.error, Some(RouterError::ConfigurationError { .. })));
        assert!(engine.get_metrics(5).is_err());
        assert!(engine.get_health(5).is_err());
    }

    #[tokio::test]
    async fn test_events_reach_the_sink() {
        let engine = ShardRouterEngine::new(EngineSettings::default());
        let mut events = engine.take_event_receiver().unwrap();
        assert!(engine.take_event_receiver().is_none());

        engine
            .add_chain(chain_config(137), Arc::new(MemoryPoolEndpoint::demo(137)))
            .await
            .unwrap();

        // health updates may interleave with discovery
        let discovered = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            loop {
                match events.recv().await {
                    Some(event) if event.name() == "shard-discovered" => return Some(event),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(discovered.chain_id(), 137);
    }

    #[tokio::test]
    async fn test_forwarder_drains_every_receiver() {
        let (sink, mut sink_rx) = EventEmitter::channel(16);
        let (emitters, receivers): (Vec<_>, Vec<_>) = (0..3).map(|_| EventEmitter::channel(4)).unzip();
        let forwarder = spawn_forwarder(Some(1), receivers, sink);

        for (chain_id, emitter) in (0u64..).zip(&emitters) {
            emitter.emit(RouterEvent::MetricsUpdated {
                chain_id,
                stats: RoutingStats::default(),
            });
        }
        drop(emitters);
        forwarder.await.unwrap();

        let mut chains = Vec::new();
        while let Ok(event) = sink_rx.try_recv() {
            chains.push(event.chain_id());
        }
        chains.sort_unstable();
        assert_eq!(chains, vec![0, 1, 2]);
    }
}
