//! Pool endpoint boundary
//!
//! Everything the router knows about a chain arrives through [`PoolEndpoint`]:
//! factory listing, pool state, curve parameters, token metadata, quotes and
//! trade submission. Every method is a suspension point and is treated as
//! possibly slow or failing; callers wrap them in the chain's isolation guard.
//!
//! Two implementations ship with the crate:
//! - [`Web3PoolEndpoint`]: JSON-RPC against the deployed factory/pair/router contracts
//! - [`MemoryPoolEndpoint`]: seeded in-memory pools for tests and simulation

mod memory;
mod rpc;

pub use memory::{demo_tokens, MemoryPool, MemoryPoolEndpoint};
pub use rpc::Web3PoolEndpoint;

use async_trait::async_trait;
use health_check::ChainProbe;
use std::sync::Arc;
use types::{
    Address, ChainId, CurveParams, PoolStateSnapshot, Quote, RouterError, TokenMetadata,
    TradeRequest, TxReceipt,
};

#[async_trait]
pub trait PoolEndpoint: Send + Sync {
    fn chain_id(&self) -> ChainId;

    /// Every pool address the factory knows about
    async fn list_pools(&self) -> Result<Vec<Address>, RouterError>;

    async fn pool_state(&self, pool: Address) -> Result<PoolStateSnapshot, RouterError>;

    /// Sharded-AMM curve parameters, `None` when the pool exposes none
    async fn curve_params(&self, pool: Address) -> Result<Option<CurveParams>, RouterError>;

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, RouterError>;

    /// Input needed to receive exactly `amount_out` of the other token
    async fn quote_exact_output(
        &self,
        pool: Address,
        token_in: Address,
        amount_out: u128,
    ) -> Result<Quote, RouterError>;

    /// Output received for exactly `amount_in` of `token_in`
    async fn quote_exact_input(
        &self,
        pool: Address,
        token_in: Address,
        amount_in: u128,
    ) -> Result<Quote, RouterError>;

    /// Submit an exact-output swap and wait for its receipt.
    ///
    /// A revert is reported as `TradeExecutionFailed` carrying the transaction hash.
    async fn submit_trade(&self, request: TradeRequest) -> Result<TxReceipt, RouterError>;

    async fn block_number(&self) -> Result<u64, RouterError>;
}

/// Adapts a pool endpoint to the health monitor's liveness probe
pub struct EndpointProbe(pub Arc<dyn PoolEndpoint>);

#[async_trait]
impl ChainProbe for EndpointProbe {
    async fn block_number(&self) -> Result<u64, RouterError> {
        self.0.block_number().await
    }
}
