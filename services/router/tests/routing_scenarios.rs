//! End-to-end routing through the multi-chain engine against in-memory pools

mod common;

use common::*;
use serde_json::json;
use shard_router::{RegistryConfig, ShardRegistry, ShardRouterEngine};
use std::time::Duration;
use types::{
    CircuitState, ErrorKind, EventEmitter, RouteOptions, RouterError, Token, TokenPair,
};

#[tokio::test]
async fn smallest_shard_serves_a_trade_within_its_threshold() {
    let (engine, _) = engine_with(&[137]).await;

    let result = engine
        .find_route(137, &usdc_usdt(137), 400, &RouteOptions::default())
        .await;
    assert!(!result.from_cache);
    let decision = result.into_result().unwrap();

    assert_eq!(decision.pool_address, SMALL_SHARD);
    assert_eq!(decision.threshold, 520);
    assert!(decision.is_smallest_shard);
    assert!(decision.expected_amount_in > 400);
    assert_eq!(decision.estimated_gas, 150_000);
}

#[tokio::test]
async fn oversized_trade_escalates_to_the_next_shard() {
    let (engine, _) = engine_with(&[137]).await;

    let decision = engine
        .find_route(137, &usdc_usdt(137), 600, &RouteOptions::default())
        .await
        .into_result()
        .unwrap();

    assert_eq!(decision.pool_address, LARGE_SHARD);
    assert_eq!(decision.threshold, 1_248);
    assert!(!decision.is_smallest_shard);
}

#[tokio::test]
async fn trade_above_every_threshold_is_rejected() {
    let (engine, _) = engine_with(&[137]).await;

    let result = engine
        .find_route(137, &usdc_usdt(137), 1_300, &RouteOptions::default())
        .await;
    let error = result.error.unwrap();
    assert_eq!(error.kind(), ErrorKind::ExceedsThreshold);
    assert_eq!(error.status_hint().code, 400);
}

#[tokio::test]
async fn missing_pair_routes_through_the_hub() {
    let (engine, _) = engine_with(&[137]).await;

    let path = engine.find_path(137, &USDC, &DAI, 100).await.unwrap();

    assert_eq!(path.path, vec!["USDC", "USDT", "DAI"]);
    assert_eq!(path.steps.len(), 2);
    assert_eq!(path.steps[1].amount_in, path.steps[0].amount_out);
    assert_eq!(path.amount_out, path.steps[1].amount_out);
    assert_eq!(path.steps[0].pool_address, SMALL_SHARD);
    assert_eq!(path.steps[1].pool_address, HUB_SHARD);
}

#[tokio::test]
async fn pair_without_a_direct_shard_routes_through_the_hub() {
    let (engine, _) = engine_with(&[137]).await;
    let usdc_dai = TokenPair::new(
        Token::new(137, USDC, "USDC", 6),
        Token::new(137, DAI, "DAI", 6),
    );

    let result = engine
        .find_route(137, &usdc_dai, 300, &RouteOptions::default())
        .await;
    assert!(result.is_success(), "{:?}", result.error);
    assert!(result.decision.is_none());

    let path = result.into_path().unwrap();
    assert_eq!(path.path, vec!["USDC", "USDT", "DAI"]);
    assert_eq!(path.via, Some(USDT));
    assert_eq!(path.amount_out, 300);
    assert_eq!(path.steps[1].pool_address, HUB_SHARD);
    assert_eq!(path.steps[1].amount_out, 300);
    assert_eq!(path.steps[0].pool_address, SMALL_SHARD);
    assert_eq!(path.steps[0].amount_out, path.steps[1].amount_in);
    assert_eq!(path.amount_in, path.steps[0].amount_in);

    // 900 DAI breaches the only USDT/DAI shard's 832 threshold
    let result = engine
        .find_route(137, &usdc_dai, 900, &RouteOptions::default())
        .await;
    assert_eq!(result.error.unwrap().kind(), ErrorKind::NoRoute);

    let routing = engine.get_metrics(137).unwrap().routing;
    assert_eq!(routing.successful_routings, 1);
    assert_eq!(routing.failed_routings, 1);
}

#[tokio::test(start_paused = true)]
async fn registry_serves_cache_until_max_age() {
    let endpoint = scenario_endpoint(137);
    let registry = ShardRegistry::new(
        RegistryConfig::from_chain(&chain_config(137)).unwrap(),
        endpoint.clone(),
        EventEmitter::disconnected(),
    );
    let max_age = registry.config().max_cache_age;
    registry.discover_all().await.unwrap();
    let reads = endpoint.pool_state_reads();

    tokio::time::advance(max_age - Duration::from_millis(1)).await;
    assert_eq!(registry.get_fresh(&USDC, &USDT).await.unwrap().len(), 2);
    assert_eq!(endpoint.pool_state_reads(), reads);

    // exactly max_age old is stale: both USDC/USDT shards are re-read
    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(registry.get_fresh(&USDC, &USDT).await.unwrap().len(), 2);
    assert_eq!(endpoint.pool_state_reads(), reads + 2);

    // and fresh again afterwards
    registry.get_fresh(&USDC, &USDT).await.unwrap();
    assert_eq!(endpoint.pool_state_reads(), reads + 2);
}

#[tokio::test(start_paused = true)]
async fn remembered_discovery_failure_is_not_a_new_chain_failure() {
    let engine = ShardRouterEngine::new(Default::default());
    let endpoint = scenario_endpoint(137);
    let mut config = chain_config(137);
    config.circuit_breaker.error_threshold = 2;

    endpoint.set_outage(Some("connection refused"));
    engine.add_chain(config, endpoint.clone()).await.unwrap();
    endpoint.set_outage(None);
    settle().await;

    // the registry still reports the failed discovery
    let health = engine.check_health(137).await.unwrap();
    assert!(!health.is_healthy);
    assert!(health.errors.iter().any(|e| e.starts_with("registry: ")));

    endpoint.set_outage(Some("connection refused"));
    assert!(engine.discover(137).await.is_err());
    assert_eq!(
        engine.get_metrics(137).unwrap().breaker.unwrap().current_state,
        CircuitState::Closed
    );

    endpoint.set_outage(None);
    assert_eq!(engine.discover(137).await.unwrap().len(), 3);
    let health = engine.check_health(137).await.unwrap();
    assert!(health.is_healthy, "{:?}", health.errors);
}

#[tokio::test(start_paused = true)]
async fn route_cache_expires_after_ttl() {
    let (engine, _) = engine_with(&[137]).await;
    let pair = usdc_usdt(137);
    let opts = RouteOptions::default();

    assert!(!engine.find_route(137, &pair, 400, &opts).await.from_cache);
    assert!(engine.find_route(137, &pair, 400, &opts).await.from_cache);

    tokio::time::advance(Duration::from_millis(1_001)).await;
    assert!(!engine.find_route(137, &pair, 400, &opts).await.from_cache);

    let metrics = engine.get_metrics(137).unwrap();
    assert_eq!(metrics.routing.total_requests, 3);
    assert_eq!(metrics.routing.cache_hits, 1);
    assert_eq!(metrics.context.request_count, 3);
}

#[tokio::test(start_paused = true)]
async fn breaker_opens_rejects_and_recovers() {
    let (engine, endpoints) = engine_with(&[137, 1]).await;
    endpoints[0].set_outage(Some("connection refused"));

    for _ in 0..3 {
        let err = engine.discover(137).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChainConnectionError);
    }
    let breaker = engine.get_metrics(137).unwrap().breaker.unwrap();
    assert_eq!(breaker.current_state, CircuitState::Open);

    let reads_before = endpoints[0].pool_state_reads();
    match engine.discover(137).await {
        Err(RouterError::ServiceUnavailable { chain_id, .. }) => assert_eq!(chain_id, 137),
        other => panic!("expected ServiceUnavailable, got {:?}", other),
    }
    assert_eq!(endpoints[0].pool_state_reads(), reads_before);
    assert_eq!(engine.get_metrics(137).unwrap().isolation.unwrap().rejected, 1);

    // the sibling chain never notices
    assert_eq!(engine.discover(1).await.unwrap().len(), 3);
    assert_eq!(
        engine.get_metrics(1).unwrap().breaker.unwrap().current_state,
        CircuitState::Closed
    );

    tokio::time::advance(Duration::from_millis(1_001)).await;
    endpoints[0].set_outage(None);
    assert_eq!(engine.discover(137).await.unwrap().len(), 3);
    assert_eq!(
        engine.get_metrics(137).unwrap().breaker.unwrap().current_state,
        CircuitState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn slow_chain_times_out() {
    let (engine, endpoints) = engine_with(&[137]).await;
    endpoints[0].set_latency(Duration::from_secs(2));

    let err = engine.discover(137).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(engine.get_metrics(137).unwrap().isolation.unwrap().timeouts, 1);
}

#[tokio::test]
async fn chain_state_is_isolated_and_reserved_keys_rejected() {
    let (engine, _) = engine_with(&[137, 1]).await;

    for key in ["provider", "signer", "pools", "routes"] {
        let err = engine.set_chain_state(137, key, json!("x")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
        assert!(engine.get_chain_state(137, key).is_none());
    }

    engine.set_chain_state(137, "note", json!({"owner": 137})).unwrap();
    assert_eq!(engine.get_chain_state(137, "note"), Some(json!({"owner": 137})));
    assert!(engine.get_chain_state(1, "note").is_none());
    assert!(engine.verify_integrity().is_clean());

    engine.set_chain_state(1, "note", json!(1)).unwrap();
    engine.clear_chain_state(137).unwrap();
    assert!(engine.get_chain_state(137, "note").is_none());
    assert_eq!(engine.get_chain_state(1, "note"), Some(json!(1)));
}

#[tokio::test]
async fn executed_trade_moves_reserves_and_invalidates_cache() {
    let (engine, endpoints) = engine_with(&[137]).await;
    let pair = usdc_usdt(137);
    let opts = RouteOptions::default();

    let decision = engine
        .find_route(137, &pair, 400, &opts)
        .await
        .into_result()
        .unwrap();
    let recipient = types::Address([0x77; 20]);
    let result = engine
        .execute(137, &decision, decision.expected_amount_in + 5, recipient)
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.actual_amount_out, 400);
    let pool = endpoints[0].pool(&SMALL_SHARD).unwrap();
    assert_eq!(pool.state.reserve_b, 50_000 - 400);

    // the registry already holds the post-trade reserves
    let cached = engine
        .get_shards(137, None)
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.pool_address == SMALL_SHARD)
        .unwrap();
    assert_eq!(cached.reserve_of(&USDT), Some(50_000 - 400));

    assert!(!engine.find_route(137, &pair, 400, &opts).await.from_cache);
}

#[tokio::test]
async fn removed_chain_is_gone_and_readded_fresh() {
    let (engine, _) = engine_with(&[137, 1]).await;
    engine
        .find_route(137, &usdc_usdt(137), 400, &RouteOptions::default())
        .await;

    assert!(engine.remove_chain(137));
    assert!(!engine.remove_chain(137));
    let result = engine
        .find_route(137, &usdc_usdt(137), 400, &RouteOptions::default())
        .await;
    assert_eq!(result.error.unwrap().kind(), ErrorKind::ConfigurationError);
    assert!(engine.verify_integrity().is_clean());

    // chain 1 keeps serving
    assert!(engine
        .find_route(1, &usdc_usdt(1), 400, &RouteOptions::default())
        .await
        .is_success());

    engine
        .add_chain(chain_config(137), scenario_endpoint(137))
        .await
        .unwrap();
    let metrics = engine.get_metrics(137).unwrap();
    assert_eq!(metrics.context.request_count, 0);
    assert_eq!(metrics.routing.total_requests, 0);
    assert_eq!(engine.get_shards(137, None).await.unwrap().len(), 3);
    assert!(engine.verify_integrity().is_clean());
}

#[tokio::test]
async fn health_reflects_chain_outage() {
    let (engine, endpoints) = engine_with(&[137]).await;

    let health = engine.check_health(137).await.unwrap();
    assert!(health.is_healthy, "{:?}", health.errors);
    assert!(health.block_height.is_some());

    endpoints[0].set_outage(Some("node down"));
    let health = engine.check_health(137).await.unwrap();
    assert!(!health.is_healthy);
    assert!(health.errors.iter().any(|e| e.contains("block_number")));
}
