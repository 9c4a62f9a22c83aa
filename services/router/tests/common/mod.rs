//! Shared fixtures for router integration tests
#![allow(dead_code)]

use router_config::ChainConfig;
use shard_router::{MemoryPool, MemoryPoolEndpoint, ShardRouterEngine};
use std::sync::Arc;
use types::{Address, ChainId, CurveScalar, Token, TokenPair};

pub const USDC: Address = Address([0x01; 20]);
pub const USDT: Address = Address([0x02; 20]);
pub const DAI: Address = Address([0x03; 20]);

pub const SMALL_SHARD: Address = Address([0xa1; 20]);
pub const LARGE_SHARD: Address = Address([0xa2; 20]);
pub const HUB_SHARD: Address = Address([0xb1; 20]);

pub const C: CurveScalar = CurveScalar(10_400);

/// USDC/USDT shards holding 50,000 and 120,000 USDC, plus one USDT/DAI shard
pub fn scenario_endpoint(chain_id: ChainId) -> Arc<MemoryPoolEndpoint> {
    let endpoint = Arc::new(MemoryPoolEndpoint::new(chain_id));
    endpoint.add_token(USDC, "USDC", 6);
    endpoint.add_token(USDT, "USDT", 6);
    endpoint.add_token(DAI, "DAI", 6);
    endpoint.add_pool(SMALL_SHARD, MemoryPool::new(USDC, 50_000, USDT, 50_000).with_c(C));
    endpoint.add_pool(LARGE_SHARD, MemoryPool::new(USDC, 120_000, USDT, 120_000).with_c(C));
    endpoint.add_pool(HUB_SHARD, MemoryPool::new(USDT, 80_000, DAI, 80_000).with_c(C));
    endpoint
}

/// Tight timings so breaker and cache behaviour is observable in paused-time tests
pub fn chain_config(chain_id: ChainId) -> ChainConfig {
    let mut config = ChainConfig::new(chain_id, format!("chain-{}", chain_id));
    config.rpc_endpoint = "memory://".to_string();
    config.factory_address = format!("0x{}", "f".repeat(40));
    config.hubs = vec![USDT.to_hex()];
    config.circuit_breaker.error_threshold = 3;
    config.circuit_breaker.recovery_timeout_ms = 1_000;
    config.circuit_breaker.timeout_threshold_ms = 500;
    config.routing.cache_ttl_ms = 1_000;
    config
}

pub fn usdc_usdt(chain_id: ChainId) -> TokenPair {
    TokenPair::new(
        Token::new(chain_id, USDC, "USDC", 6),
        Token::new(chain_id, USDT, "USDT", 6),
    )
}

/// Engine with one scenario chain per id, background tasks given a chance to start
pub async fn engine_with(chain_ids: &[ChainId]) -> (ShardRouterEngine, Vec<Arc<MemoryPoolEndpoint>>) {
    let engine = ShardRouterEngine::new(Default::default());
    let mut endpoints = Vec::new();
    for &chain_id in chain_ids {
        let endpoint = scenario_endpoint(chain_id);
        engine
            .add_chain(chain_config(chain_id), endpoint.clone())
            .await
            .unwrap();
        endpoints.push(endpoint);
    }
    settle().await;
    (engine, endpoints)
}

/// Let spawned tasks run their immediate first iteration
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
