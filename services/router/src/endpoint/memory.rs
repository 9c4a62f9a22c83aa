//! In-memory pool endpoint
//!
//! Pools quote on the constant-product model from `amm` and trades move their
//! reserves. Outages, per-pool read failures, latency and trade reverts can be
//! injected at runtime, which is what the integration tests and the binary's
//! `--simulate` mode rely on.

use super::PoolEndpoint;
use amm::V2PoolState;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;
use types::{
    Address, ChainId, CurveParams, CurveScalar, FeeSchedule, PoolStateSnapshot, Quote,
    RouterError, TokenMetadata, TradeRequest, TxReceipt,
};

const SIMULATED_GAS_USED: u64 = 120_000;

/// One simulated pool
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryPool {
    pub state: PoolStateSnapshot,
    pub curve: Option<CurveParams>,
}

impl MemoryPool {
    pub fn new(token_a: Address, reserve_a: u128, token_b: Address, reserve_b: u128) -> Self {
        Self {
            state: PoolStateSnapshot {
                token_a,
                token_b,
                reserve_a,
                reserve_b,
                total_supply: reserve_a / 2 + reserve_b / 2,
                fee_schedule: FeeSchedule::default(),
                paused: false,
            },
            curve: None,
        }
    }

    pub fn with_curve(mut self, curve: CurveParams) -> Self {
        self.curve = Some(curve);
        self
    }

    pub fn with_c(self, c: CurveScalar) -> Self {
        self.with_curve(CurveParams::with_c(c))
    }

    pub fn with_fee(mut self, fee_schedule: FeeSchedule) -> Self {
        self.state.fee_schedule = fee_schedule;
        self
    }

    pub fn paused(mut self) -> Self {
        self.state.paused = true;
        self
    }

    fn oriented(&self, token_in: &Address) -> Option<V2PoolState> {
        let s = &self.state;
        let fee_bps = s.fee_schedule.total_bps();
        if s.token_a == *token_in {
            Some(V2PoolState {
                reserve_in: s.reserve_a,
                reserve_out: s.reserve_b,
                fee_bps,
            })
        } else if s.token_b == *token_in {
            Some(V2PoolState {
                reserve_in: s.reserve_b,
                reserve_out: s.reserve_a,
                fee_bps,
            })
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    outage: Option<String>,
    failing_pools: HashSet<Address>,
    latency: Duration,
    trade_revert: Option<String>,
}

pub struct MemoryPoolEndpoint {
    chain_id: ChainId,
    pools: RwLock<BTreeMap<Address, MemoryPool>>,
    tokens: RwLock<HashMap<Address, TokenMetadata>>,
    faults: Mutex<Faults>,
    block: AtomicU64,
    pool_state_reads: AtomicU64,
    trades: AtomicU64,
}

impl MemoryPoolEndpoint {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            pools: RwLock::new(BTreeMap::new()),
            tokens: RwLock::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
            block: AtomicU64::new(1),
            pool_state_reads: AtomicU64::new(0),
            trades: AtomicU64::new(0),
        }
    }

    /// A chain seeded with two USDC/USDT shards (50,000 and 120,000 USDC) and a
    /// USDT/DAI shard, so USDC→DAI only routes through the USDT hub
    pub fn demo(chain_id: ChainId) -> Self {
        let endpoint = Self::new(chain_id);
        let (usdc, usdt, dai) = demo_tokens();
        endpoint.add_token(usdc, "USDC", 6);
        endpoint.add_token(usdt, "USDT", 6);
        endpoint.add_token(dai, "DAI", 6);

        let c = CurveScalar(10_400);
        endpoint.add_pool(
            Address([0xa1; 20]),
            MemoryPool::new(usdc, 50_000_000_000, usdt, 50_000_000_000).with_c(c),
        );
        endpoint.add_pool(
            Address([0xa2; 20]),
            MemoryPool::new(usdc, 120_000_000_000, usdt, 120_000_000_000).with_c(c),
        );
        endpoint.add_pool(
            Address([0xb1; 20]),
            MemoryPool::new(usdt, 80_000_000_000, dai, 80_000_000_000).with_c(c),
        );
        endpoint
    }

    pub fn add_token(&self, address: Address, symbol: impl Into<String>, decimals: u8) {
        self.tokens.write().insert(
            address,
            TokenMetadata {
                symbol: symbol.into(),
                decimals,
            },
        );
    }

    pub fn add_pool(&self, address: Address, pool: MemoryPool) {
        self.pools.write().insert(address, pool);
    }

    pub fn remove_pool(&self, address: &Address) -> Option<MemoryPool> {
        self.pools.write().remove(address)
    }

    pub fn pool(&self, address: &Address) -> Option<MemoryPool> {
        self.pools.read().get(address).cloned()
    }

    /// Overwrite a pool's reserves; returns false for an unknown pool
    pub fn set_reserves(&self, address: &Address, reserve_a: u128, reserve_b: u128) -> bool {
        match self.pools.write().get_mut(address) {
            Some(pool) => {
                pool.state.reserve_a = reserve_a;
                pool.state.reserve_b = reserve_b;
                true
            }
            None => false,
        }
    }

    /// Fail every call with a connection error until cleared with `None`
    pub fn set_outage(&self, message: Option<&str>) {
        self.faults.lock().outage = message.map(str::to_string);
    }

    /// Fail reads of one pool's state
    pub fn fail_pool(&self, address: Address) {
        self.faults.lock().failing_pools.insert(address);
    }

    pub fn restore_pool(&self, address: &Address) {
        self.faults.lock().failing_pools.remove(address);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.faults.lock().latency = latency;
    }

    /// Revert every submitted trade with `reason` until cleared with `None`
    pub fn set_trade_revert(&self, reason: Option<&str>) {
        self.faults.lock().trade_revert = reason.map(str::to_string);
    }

    pub fn advance_blocks(&self, blocks: u64) {
        self.block.fetch_add(blocks, Ordering::Relaxed);
    }

    /// Number of `pool_state` reads served so far
    pub fn pool_state_reads(&self) -> u64 {
        self.pool_state_reads.load(Ordering::Relaxed)
    }

    async fn enter(&self, operation: &str) -> Result<(), RouterError> {
        let (latency, outage) = {
            let faults = self.faults.lock();
            (faults.latency, faults.outage.clone())
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match outage {
            Some(message) => Err(RouterError::connection(
                self.chain_id,
                format!("{}: {}", operation, message),
            )),
            None => Ok(()),
        }
    }

    fn oriented(
        &self,
        operation: &str,
        pool: &Address,
        token_in: &Address,
    ) -> Result<V2PoolState, RouterError> {
        let pools = self.pools.read();
        let entry = pools
            .get(pool)
            .ok_or_else(|| RouterError::rpc(self.chain_id, operation, format!("unknown pool {}", pool)))?;
        entry.oriented(token_in).ok_or_else(|| {
            RouterError::rpc(
                self.chain_id,
                operation,
                format!("pool {} does not hold token {}", pool, token_in),
            )
        })
    }

    fn next_tx_hash(&self) -> String {
        let n = self.trades.fetch_add(1, Ordering::Relaxed) + 1;
        format!("0x{:016x}{:048x}", self.chain_id, n)
    }
}

/// Token addresses used by [`MemoryPoolEndpoint::demo`], as (USDC, USDT, DAI)
pub fn demo_tokens() -> (Address, Address, Address) {
    (Address([0x01; 20]), Address([0x02; 20]), Address([0x03; 20]))
}

#[async_trait]
impl PoolEndpoint for MemoryPoolEndpoint {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn list_pools(&self) -> Result<Vec<Address>, RouterError> {
        self.enter("list_pools").await?;
        Ok(self.pools.read().keys().copied().collect())
    }

    async fn pool_state(&self, pool: Address) -> Result<PoolStateSnapshot, RouterError> {
        self.enter("pool_state").await?;
        if self.faults.lock().failing_pools.contains(&pool) {
            return Err(RouterError::rpc(self.chain_id, "pool_state", "execution reverted"));
        }
        self.pool_state_reads.fetch_add(1, Ordering::Relaxed);
        self.pools
            .read()
            .get(&pool)
            .map(|p| p.state.clone())
            .ok_or_else(|| RouterError::rpc(self.chain_id, "pool_state", format!("unknown pool {}", pool)))
    }

    async fn curve_params(&self, pool: Address) -> Result<Option<CurveParams>, RouterError> {
        self.enter("curve_params").await?;
        Ok(self.pools.read().get(&pool).and_then(|p| p.curve))
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, RouterError> {
        self.enter("token_metadata").await?;
        self.tokens.read().get(&token).cloned().ok_or_else(|| {
            RouterError::rpc(self.chain_id, "token_metadata", format!("{} is not a token", token))
        })
    }

    async fn quote_exact_output(
        &self,
        pool: Address,
        token_in: Address,
        amount_out: u128,
    ) -> Result<Quote, RouterError> {
        self.enter("quote_exact_output").await?;
        let state = self.oriented("quote_exact_output", &pool, &token_in)?;
        let amount_in = state
            .input_for(amount_out)
            .map_err(|e| RouterError::rpc(self.chain_id, "quote_exact_output", e.to_string()))?;
        Ok(Quote {
            amount_in,
            amount_out,
            fee: amm::V2Math::fee_amount(amount_in, state.fee_bps),
        })
    }

    async fn quote_exact_input(
        &self,
        pool: Address,
        token_in: Address,
        amount_in: u128,
    ) -> Result<Quote, RouterError> {
        self.enter("quote_exact_input").await?;
        let state = self.oriented("quote_exact_input", &pool, &token_in)?;
        let amount_out = state
            .output_for(amount_in)
            .map_err(|e| RouterError::rpc(self.chain_id, "quote_exact_input", e.to_string()))?;
        Ok(Quote {
            amount_in,
            amount_out,
            fee: amm::V2Math::fee_amount(amount_in, state.fee_bps),
        })
    }

    async fn submit_trade(&self, request: TradeRequest) -> Result<TxReceipt, RouterError> {
        self.enter("submit_trade").await?;
        let tx_hash = self.next_tx_hash();

        if let Some(reason) = self.faults.lock().trade_revert.clone() {
            return Err(RouterError::trade_failed(self.chain_id, reason, Some(tx_hash)));
        }

        let mut pools = self.pools.write();
        let pool = pools.get_mut(&request.pool).ok_or_else(|| {
            RouterError::trade_failed(
                self.chain_id,
                format!("unknown pool {}", request.pool),
                Some(tx_hash.clone()),
            )
        })?;
        if pool.state.paused {
            return Err(RouterError::trade_failed(self.chain_id, "pool paused", Some(tx_hash)));
        }

        let state = pool.oriented(&request.token_in).ok_or_else(|| {
            RouterError::trade_failed(self.chain_id, "token not in pool", Some(tx_hash.clone()))
        })?;
        let amount_in = state
            .input_for(request.amount_out)
            .map_err(|e| RouterError::trade_failed(self.chain_id, e.to_string(), Some(tx_hash.clone())))?;
        if amount_in > request.max_amount_in {
            return Err(RouterError::trade_failed(
                self.chain_id,
                format!(
                    "excessive input amount: required {}, max {}",
                    amount_in, request.max_amount_in
                ),
                Some(tx_hash),
            ));
        }

        let s = &mut pool.state;
        if s.token_a == request.token_in {
            s.reserve_a += amount_in;
            s.reserve_b -= request.amount_out;
        } else {
            s.reserve_b += amount_in;
            s.reserve_a -= request.amount_out;
        }

        let block_number = self.block.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(chain_id = self.chain_id, pool = %request.pool, amount_in, "Simulated trade settled");
        Ok(TxReceipt {
            tx_hash,
            success: true,
            block_number,
            gas_used: SIMULATED_GAS_USED,
            amount_in,
            amount_out: request.amount_out,
        })
    }

    async fn block_number(&self) -> Result<u64, RouterError> {
        self.enter("block_number").await?;
        Ok(self.block.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_quotes_follow_constant_product() {
        let endpoint = MemoryPoolEndpoint::demo(137);
        let (usdc, _, _) = demo_tokens();

        let quote = endpoint
            .quote_exact_output(Address([0xa1; 20]), usdc, 400_000_000)
            .await
            .unwrap();
        assert!(quote.amount_in > 400_000_000);
        assert_eq!(quote.fee, quote.amount_in * 30 / 10_000);

        let forward = endpoint
            .quote_exact_input(Address([0xa1; 20]), usdc, quote.amount_in)
            .await
            .unwrap();
        assert!(forward.amount_out >= 400_000_000);
    }

    #[tokio::test]
    async fn test_trade_moves_reserves_and_enforces_max_input() {
        let endpoint = MemoryPoolEndpoint::demo(137);
        let (usdc, usdt, _) = demo_tokens();
        let pool = Address([0xa1; 20]);

        let request = TradeRequest {
            pool,
            token_in: usdc,
            token_out: usdt,
            amount_out: 1_000_000,
            max_amount_in: 1,
            recipient: Address([0xee; 20]),
        };
        let err = endpoint.submit_trade(request.clone()).await.unwrap_err();
        assert!(matches!(err, RouterError::TradeExecutionFailed { tx_hash: Some(_), .. }));

        let receipt = endpoint
            .submit_trade(TradeRequest {
                max_amount_in: 2_000_000,
                ..request
            })
            .await
            .unwrap();
        assert!(receipt.success);
        let after = endpoint.pool(&pool).unwrap().state;
        assert_eq!(after.reserve_a, 50_000_000_000 + receipt.amount_in);
        assert_eq!(after.reserve_b, 50_000_000_000 - 1_000_000);
    }

    #[tokio::test]
    async fn test_outage_fails_every_call() {
        let endpoint = MemoryPoolEndpoint::demo(5);
        endpoint.set_outage(Some("connection refused"));
        let err = endpoint.list_pools().await.unwrap_err();
        assert!(matches!(err, RouterError::ChainConnectionError { chain_id: 5, .. }));

        endpoint.set_outage(None);
        assert_eq!(endpoint.list_pools().await.unwrap().len(), 3);
    }
}
