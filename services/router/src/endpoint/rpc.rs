//! JSON-RPC pool endpoint
//!
//! Reads the factory, pair, sharded-pool and ERC-20 contracts through `web3`.
//! Optional reads degrade to defaults: a pair without `fee()` is charged the
//! standard 30 bps, a pair without `paused()` is live, and a pool without
//! `curveParams()` reports `None` so the registry applies the chain default.

use super::PoolEndpoint;
use amm::V2PoolState;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use router_config::ChainConfig;
use std::time::Duration;
use tracing::{debug, warn};
use types::{
    Address, ChainId, CurveParams, CurveScalar, FeeSchedule, PoolStateSnapshot, Quote,
    RouterError, TokenMetadata, TradeRequest, TxReceipt,
};
use web3::contract::{Contract, Options};
use web3::transports::Http;
use web3::types::{H160, U256, U64};
use web3::Web3;

/// Factory enumeration
const FACTORY_ABI: &str = r#"[
    {"constant":true,"inputs":[],"name":"allPairsLength","outputs":[{"name":"","type":"uint256"}],"type":"function"},
    {"constant":true,"inputs":[{"name":"","type":"uint256"}],"name":"allPairs","outputs":[{"name":"","type":"address"}],"type":"function"}
]"#;

/// Pair state plus the optional `fee()`/`paused()` extensions of sharded pools
const PAIR_ABI: &str = r#"[
    {"constant":true,"inputs":[],"name":"token0","outputs":[{"name":"","type":"address"}],"type":"function"},
    {"constant":true,"inputs":[],"name":"token1","outputs":[{"name":"","type":"address"}],"type":"function"},
    {"constant":true,"inputs":[],"name":"getReserves","outputs":[{"name":"reserve0","type":"uint112"},{"name":"reserve1","type":"uint112"},{"name":"blockTimestampLast","type":"uint32"}],"type":"function"},
    {"constant":true,"inputs":[],"name":"totalSupply","outputs":[{"name":"","type":"uint256"}],"type":"function"},
    {"constant":true,"inputs":[],"name":"fee","outputs":[{"name":"","type":"uint256"}],"type":"function"},
    {"constant":true,"inputs":[],"name":"paused","outputs":[{"name":"","type":"bool"}],"type":"function"},
    {"constant":true,"inputs":[],"name":"curveParams","outputs":[{"name":"beta1","type":"uint256"},{"name":"rmin","type":"uint256"},{"name":"rmax","type":"uint256"},{"name":"c","type":"uint256"}],"type":"function"}
]"#;

const ERC20_ABI: &str = r#"[
    {"constant":true,"inputs":[],"name":"symbol","outputs":[{"name":"","type":"string"}],"type":"function"},
    {"constant":true,"inputs":[],"name":"decimals","outputs":[{"name":"","type":"uint8"}],"type":"function"}
]"#;

const ROUTER_ABI: &str = r#"[
    {"constant":true,"inputs":[{"name":"amountOut","type":"uint256"},{"name":"reserveIn","type":"uint256"},{"name":"reserveOut","type":"uint256"}],"name":"getAmountIn","outputs":[{"name":"amountIn","type":"uint256"}],"type":"function"},
    {"constant":true,"inputs":[{"name":"amountIn","type":"uint256"},{"name":"reserveIn","type":"uint256"},{"name":"reserveOut","type":"uint256"}],"name":"getAmountOut","outputs":[{"name":"amountOut","type":"uint256"}],"type":"function"},
    {"constant":false,"inputs":[{"name":"amountOut","type":"uint256"},{"name":"amountInMax","type":"uint256"},{"name":"path","type":"address[]"},{"name":"to","type":"address"},{"name":"deadline","type":"uint256"}],"name":"swapTokensForExactTokens","outputs":[{"name":"amounts","type":"uint256[]"}],"type":"function"}
]"#;

/// Concurrent `allPairs(i)` reads while enumerating the factory
const LIST_CONCURRENCY: usize = 16;

const SWAP_GAS_LIMIT: u64 = 350_000;

const TRADE_DEADLINE: Duration = Duration::from_secs(300);

pub struct Web3PoolEndpoint {
    chain_id: ChainId,
    web3: Web3<Http>,
    factory: H160,
    router: Option<H160>,
    trader: Option<H160>,
    confirmations: usize,
}

impl Web3PoolEndpoint {
    pub fn new(config: &ChainConfig) -> Result<Self, RouterError> {
        let transport = Http::new(&config.rpc_endpoint)
            .map_err(|e| RouterError::connection(config.chain_id, e.to_string()))?;

        Ok(Self {
            chain_id: config.chain_id,
            web3: Web3::new(transport),
            factory: to_h160(config.factory()?),
            router: config.router()?.map(to_h160),
            trader: config.trader()?.map(to_h160),
            confirmations: config.trade_confirmations,
        })
    }

    fn contract(&self, address: H160, abi: &str, operation: &str) -> Result<Contract<Http>, RouterError> {
        Contract::from_json(self.web3.eth(), address, abi.as_bytes())
            .map_err(|e| RouterError::rpc(self.chain_id, operation, e.to_string()))
    }

    fn rpc_error(&self, operation: &str, error: impl ToString) -> RouterError {
        RouterError::rpc(self.chain_id, operation, error.to_string())
    }

    fn oriented(&self, state: &PoolStateSnapshot, token_in: &Address, operation: &str) -> Result<V2PoolState, RouterError> {
        let fee_bps = state.fee_schedule.total_bps();
        if state.token_a == *token_in {
            Ok(V2PoolState {
                reserve_in: state.reserve_a,
                reserve_out: state.reserve_b,
                fee_bps,
            })
        } else if state.token_b == *token_in {
            Ok(V2PoolState {
                reserve_in: state.reserve_b,
                reserve_out: state.reserve_a,
                fee_bps,
            })
        } else {
            Err(self.rpc_error(operation, format!("pool does not hold token {}", token_in)))
        }
    }
}

fn to_h160(address: Address) -> H160 {
    H160::from(address.0)
}

fn from_h160(address: H160) -> Address {
    Address(address.0)
}

fn to_u128(value: U256) -> Option<u128> {
    (value.bits() <= 128).then(|| value.low_u128())
}

fn to_curve_scalar(value: U256) -> Option<CurveScalar> {
    (value.bits() <= 64).then(|| CurveScalar(value.low_u64()))
}

/// Whether a contract error means the node could not be reached, as opposed to
/// the contract not implementing the call
fn is_transport_failure(error: &web3::contract::Error) -> bool {
    matches!(
        error,
        web3::contract::Error::Api(web3::Error::Transport(_) | web3::Error::Unreachable)
    )
}

#[async_trait]
impl PoolEndpoint for Web3PoolEndpoint {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn list_pools(&self) -> Result<Vec<Address>, RouterError> {
        let factory = self.contract(self.factory, FACTORY_ABI, "list_pools")?;

        let count: U256 = factory
            .query("allPairsLength", (), None, Options::default(), None)
            .await
            .map_err(|e| self.rpc_error("list_pools", e))?;
        if count.bits() > 64 {
            return Err(self.rpc_error("list_pools", format!("implausible pair count {}", count)));
        }

        let factory = &factory;
        let pools: Vec<H160> = stream::iter(0..count.low_u64())
            .map(|i| async move {
                factory
                    .query::<H160, _, _, _>("allPairs", (U256::from(i),), None, Options::default(), None)
                    .await
            })
            .buffered(LIST_CONCURRENCY)
            .try_collect()
            .await
            .map_err(|e| self.rpc_error("list_pools", e))?;

        debug!(chain_id = self.chain_id, pools = pools.len(), "Factory enumerated");
        Ok(pools.into_iter().map(from_h160).collect())
    }

    async fn pool_state(&self, pool: Address) -> Result<PoolStateSnapshot, RouterError> {
        let pair = self.contract(to_h160(pool), PAIR_ABI, "pool_state")?;

        let (token0, token1, reserves, supply) = futures::try_join!(
            pair.query::<H160, _, _, _>("token0", (), None, Options::default(), None),
            pair.query::<H160, _, _, _>("token1", (), None, Options::default(), None),
            pair.query::<(U256, U256, U256), _, _, _>("getReserves", (), None, Options::default(), None),
            pair.query::<U256, _, _, _>("totalSupply", (), None, Options::default(), None),
        )
        .map_err(|e| self.rpc_error("pool_state", e))?;

        let (fee, paused) = futures::join!(
            pair.query::<U256, _, _, _>("fee", (), None, Options::default(), None),
            pair.query::<bool, _, _, _>("paused", (), None, Options::default(), None),
        );

        let swap_fee_bps = fee
            .ok()
            .filter(|f| f.bits() <= 32)
            .map(|f| f.low_u32())
            .unwrap_or_else(|| FeeSchedule::default().swap_fee_bps);

        let (reserve_a, reserve_b, _) = reserves;
        let amount = |v: U256| to_u128(v).ok_or_else(|| self.rpc_error("pool_state", format!("value {} out of range", v)));

        Ok(PoolStateSnapshot {
            token_a: from_h160(token0),
            token_b: from_h160(token1),
            reserve_a: amount(reserve_a)?,
            reserve_b: amount(reserve_b)?,
            total_supply: amount(supply)?,
            fee_schedule: FeeSchedule {
                swap_fee_bps,
                protocol_fee_bps: 0,
            },
            paused: paused.unwrap_or(false),
        })
    }

    async fn curve_params(&self, pool: Address) -> Result<Option<CurveParams>, RouterError> {
        let shard = self.contract(to_h160(pool), PAIR_ABI, "curve_params")?;

        match shard
            .query::<(U256, U256, U256, U256), _, _, _>("curveParams", (), None, Options::default(), None)
            .await
        {
            Ok((beta1, rmin, rmax, c)) => {
                let scalar = |v: U256| {
                    to_curve_scalar(v).ok_or_else(|| self.rpc_error("curve_params", format!("parameter {} out of range", v)))
                };
                Ok(Some(CurveParams {
                    beta1: scalar(beta1)?,
                    rmin: scalar(rmin)?,
                    rmax: scalar(rmax)?,
                    c: scalar(c)?,
                }))
            }
            Err(e) if is_transport_failure(&e) => Err(self.rpc_error("curve_params", e)),
            Err(e) => {
                debug!(chain_id = self.chain_id, pool = %pool, "No curve params exposed: {}", e);
                Ok(None)
            }
        }
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, RouterError> {
        let erc20 = self.contract(to_h160(token), ERC20_ABI, "token_metadata")?;

        let (symbol, decimals) = futures::join!(
            erc20.query::<String, _, _, _>("symbol", (), None, Options::default(), None),
            erc20.query::<u8, _, _, _>("decimals", (), None, Options::default(), None),
        );
        let decimals = decimals.map_err(|e| self.rpc_error("token_metadata", e))?;

        // bytes32 symbols (MKR and friends) fail string decoding
        let symbol = symbol.unwrap_or_else(|e| {
            warn!(chain_id = self.chain_id, token = %token, "Symbol unreadable: {}", e);
            token.short()
        });

        Ok(TokenMetadata { symbol, decimals })
    }

    async fn quote_exact_output(
        &self,
        pool: Address,
        token_in: Address,
        amount_out: u128,
    ) -> Result<Quote, RouterError> {
        let state = self.pool_state(pool).await?;
        let oriented = self.oriented(&state, &token_in, "quote_exact_output")?;

        let amount_in = match self.router {
            Some(router) => {
                let router = self.contract(router, ROUTER_ABI, "quote_exact_output")?;
                let quoted: U256 = router
                    .query(
                        "getAmountIn",
                        (U256::from(amount_out), U256::from(oriented.reserve_in), U256::from(oriented.reserve_out)),
                        None,
                        Options::default(),
                        None,
                    )
                    .await
                    .map_err(|e| self.rpc_error("quote_exact_output", e))?;
                to_u128(quoted).ok_or_else(|| self.rpc_error("quote_exact_output", "quote out of range"))?
            }
            None => oriented
                .input_for(amount_out)
                .map_err(|e| self.rpc_error("quote_exact_output", e))?,
        };

        Ok(Quote {
            amount_in,
            amount_out,
            fee: state.fee_schedule.fee_on(amount_in),
        })
    }

    async fn quote_exact_input(
        &self,
        pool: Address,
        token_in: Address,
        amount_in: u128,
    ) -> Result<Quote, RouterError> {
        let state = self.pool_state(pool).await?;
        let oriented = self.oriented(&state, &token_in, "quote_exact_input")?;

        let amount_out = match self.router {
            Some(router) => {
                let router = self.contract(router, ROUTER_ABI, "quote_exact_input")?;
                let quoted: U256 = router
                    .query(
                        "getAmountOut",
                        (U256::from(amount_in), U256::from(oriented.reserve_in), U256::from(oriented.reserve_out)),
                        None,
                        Options::default(),
                        None,
                    )
                    .await
                    .map_err(|e| self.rpc_error("quote_exact_input", e))?;
                to_u128(quoted).ok_or_else(|| self.rpc_error("quote_exact_input", "quote out of range"))?
            }
            None => oriented
                .output_for(amount_in)
                .map_err(|e| self.rpc_error("quote_exact_input", e))?,
        };

        Ok(Quote {
            amount_in,
            amount_out,
            fee: state.fee_schedule.fee_on(amount_in),
        })
    }

    async fn submit_trade(&self, request: TradeRequest) -> Result<TxReceipt, RouterError> {
        let router = self.router.ok_or_else(|| {
            RouterError::configuration(Some("router_address"), "trade submission needs a router contract")
        })?;
        let trader = self.trader.ok_or_else(|| {
            RouterError::configuration(Some("trade_account"), "trade submission needs a trading account")
        })?;

        // Receipts carry no amounts without log decoding; report the quote at submission
        let quoted = self
            .quote_exact_output(request.pool, request.token_in, request.amount_out)
            .await?;

        let router = self.contract(router, ROUTER_ABI, "submit_trade")?;
        let deadline = U256::from(types::unix_millis() / 1000 + TRADE_DEADLINE.as_secs());
        let params = (
            U256::from(request.amount_out),
            U256::from(request.max_amount_in),
            vec![to_h160(request.token_in), to_h160(request.token_out)],
            to_h160(request.recipient),
            deadline,
        );
        let options = Options::with(|opt| opt.gas = Some(U256::from(SWAP_GAS_LIMIT)));

        let receipt = router
            .call_with_confirmations("swapTokensForExactTokens", params, trader, options, self.confirmations)
            .await
            .map_err(|e| match e {
                web3::Error::Transport(_) | web3::Error::Unreachable => {
                    RouterError::connection(self.chain_id, e.to_string())
                }
                other => RouterError::trade_failed(self.chain_id, other.to_string(), None),
            })?;

        let tx_hash = format!("{:?}", receipt.transaction_hash);
        if receipt.status != Some(U64::from(1)) {
            return Err(RouterError::trade_failed(self.chain_id, "transaction reverted", Some(tx_hash)));
        }

        Ok(TxReceipt {
            tx_hash,
            success: true,
            block_number: receipt.block_number.map(|b| b.as_u64()).unwrap_or_default(),
            gas_used: receipt
                .gas_used
                .filter(|g| g.bits() <= 64)
                .map(|g| g.low_u64())
                .unwrap_or_default(),
            amount_in: quoted.amount_in,
            amount_out: request.amount_out,
        })
    }

    async fn block_number(&self) -> Result<u64, RouterError> {
        self.web3
            .eth()
            .block_number()
            .await
            .map(|b| b.as_u64())
            .map_err(|e| match e {
                web3::Error::Transport(_) | web3::Error::Unreachable => {
                    RouterError::connection(self.chain_id, e.to_string())
                }
                other => self.rpc_error("block_number", other),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u256_narrowing() {
        assert_eq!(to_u128(U256::from(42u64)), Some(42));
        assert_eq!(to_u128(U256::from(u128::MAX)), Some(u128::MAX));
        assert_eq!(to_u128(U256::from(u128::MAX) + U256::from(1u8)), None);
        assert_eq!(to_curve_scalar(U256::from(10_400u64)), Some(CurveScalar(10_400)));
    }

    #[test]
    fn test_address_conversion_round_trips() {
        let addr = Address([0x5a; 20]);
        assert_eq!(from_h160(to_h160(addr)), addr);
    }

    #[test]
    fn test_new_rejects_bad_factory() {
        let mut config = ChainConfig::new(137, "polygon");
        config.rpc_endpoint = "http://127.0.0.1:8545".into();
        config.factory_address = "0x1234".into();
        assert!(matches!(
            Web3PoolEndpoint::new(&config),
            Err(RouterError::ConfigurationError { .. })
        ));
    }
}
