//! Shard router service
//!
//! Loads configuration, registers every configured chain with the engine and
//! logs forwarded events until Ctrl-C. With `--simulate` every chain is backed
//! by a seeded in-memory endpoint instead of JSON-RPC.

use anyhow::{Context, Result};
use clap::Parser;
use router_config::{ChainConfig, LogFormat, RouterConfig};
use shard_router::logging::{log_event, Marker};
use shard_router::{demo_tokens, route_log, MemoryPoolEndpoint, PoolEndpoint, ShardRouterEngine, Web3PoolEndpoint};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use types::{RouteOptions, RouterEvent, Token, TokenPair};

#[derive(Parser, Debug)]
#[command(name = "shard_router", about = "Smallest-shard router for sharded AMMs")]
struct Args {
    /// Base configuration file
    #[arg(short, long, default_value = "config/shard_router.toml")]
    config: PathBuf,

    /// Environment overlay, loads <config>.<env>.toml when present
    #[arg(short, long)]
    env: Option<String>,

    /// Back every chain with seeded in-memory pools
    #[arg(long)]
    simulate: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, fallback) = match RouterConfig::load(Some(args.config.as_path()), args.env.as_deref()) {
        Ok(config) => (config, None),
        Err(e) if args.simulate => (simulated_config(), Some(e)),
        Err(e) => return Err(e).context("Failed to load shard router configuration"),
    };

    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    init_tracing(&config);
    if let Some(e) = fallback {
        warn!("Configuration not loaded ({:#}), simulating a single demo chain", e);
    }

    info!("🚀 Starting Shard Router ({} chain(s))...", config.chains.len());

    let engine = Arc::new(ShardRouterEngine::new(config.engine.clone()));
    let events = engine
        .take_event_receiver()
        .context("Event receiver already taken")?;
    let event_logger = tokio::spawn(log_events(events));

    for chain in &config.chains {
        let chain = if args.simulate { simulated_chain(chain) } else { chain.clone() };
        let endpoint: Arc<dyn PoolEndpoint> = if args.simulate {
            Arc::new(MemoryPoolEndpoint::demo(chain.chain_id))
        } else {
            Arc::new(Web3PoolEndpoint::new(&chain)?)
        };

        let chain_id = chain.chain_id;
        if let Err(e) = engine.add_chain(chain, endpoint).await {
            route_log!(error, Marker::Chain, "Chain {} not registered: {}", chain_id, e);
        }
    }

    if engine.chain_ids().is_empty() {
        anyhow::bail!("No chain could be registered");
    }

    if args.simulate {
        for chain_id in engine.chain_ids() {
            demo_routes(&engine, chain_id).await;
        }
    }

    info!("✅ Shard Router running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down...");
    engine.shutdown();
    event_logger.abort();
    Ok(())
}

fn init_tracing(config: &RouterConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

fn simulated_config() -> RouterConfig {
    let mut chain = ChainConfig::new(137, "polygon-sim");
    chain.rpc_endpoint = "memory://polygon".to_string();
    chain.factory_address = format!("0x{}", "f".repeat(40));
    RouterConfig {
        chains: vec![chain],
        ..RouterConfig::default()
    }
}

/// Point a configured chain at the demo token universe
fn simulated_chain(chain: &ChainConfig) -> ChainConfig {
    let (_, usdt, _) = demo_tokens();
    let mut chain = chain.clone();
    chain.hubs = vec![usdt.to_hex()];
    chain.fixed_routes.clear();
    chain
}

/// Route the canonical requests against a simulated chain
async fn demo_routes(engine: &ShardRouterEngine, chain_id: u64) {
    let (usdc, usdt, dai) = demo_tokens();
    let usdc_token = Token::new(chain_id, usdc, "USDC", 6);
    let pair = TokenPair::new(usdc_token.clone(), Token::new(chain_id, usdt, "USDT", 6));

    for amount_out in [400_000_000u128, 600_000_000] {
        match engine
            .find_route(chain_id, &pair, amount_out, &RouteOptions::default())
            .await
            .into_result()
        {
            Ok(decision) => route_log!(
                info,
                Marker::Route,
                "Chain {}: {} USDT out → shard {} (in {}, smallest {}, confidence {})",
                chain_id,
                amount_out,
                decision.pool_address.short(),
                decision.expected_amount_in,
                decision.is_smallest_shard,
                decision.confidence_score
            ),
            Err(e) => route_log!(warn, Marker::Route, "Chain {}: route for {} failed: {}", chain_id, amount_out, e),
        }
    }

    // no USDC/DAI shard: exact output through the USDT hub
    let usdc_dai = TokenPair::new(usdc_token, Token::new(chain_id, dai, "DAI", 6));
    match engine
        .find_route(chain_id, &usdc_dai, 100_000_000, &RouteOptions::default())
        .await
        .into_path()
    {
        Ok(path) => info!(chain_id, path = ?path.path, amount_in = path.amount_in, "Hub route"),
        Err(e) => route_log!(warn, Marker::Path, "Chain {}: USDC → DAI route failed: {}", chain_id, e),
    }

    match engine.find_path(chain_id, &usdc, &dai, 100_000_000).await {
        Ok(path) => info!(chain_id, path = ?path.path, amount_out = path.amount_out, "Multi-hop path"),
        Err(e) => route_log!(warn, Marker::Path, "Chain {}: USDC → DAI path failed: {}", chain_id, e),
    }
}

async fn log_events(mut events: mpsc::Receiver<RouterEvent>) {
    while let Some(event) = events.recv().await {
        log_event(&event);
    }
}
