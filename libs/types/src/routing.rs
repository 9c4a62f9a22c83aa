//! Routing requests, decisions and trade results

use crate::address::{Address, ChainId};
use crate::errors::RouterError;
use crate::token::Token;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-request routing options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOptions {
    /// Caller's slippage tolerance; falls back to the chain default when absent
    pub slippage_tolerance_bps: Option<u32>,
    /// Skip shards whose price impact exceeds the tolerance instead of only reporting it
    pub enforce_slippage: bool,
    /// Ignore (but still refresh) the routing result cache
    pub bypass_cache: bool,
}

/// Outcome of the slippage check, computed independently of the c-threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlippageCheck {
    pub tolerance_bps: u32,
    pub price_impact_bps: u32,
    pub passed: bool,
}

/// The shard chosen for one trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub chain_id: ChainId,
    pub shard_id: String,
    pub pool_address: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_out: u128,
    pub expected_amount_in: u128,
    pub estimated_fee: u128,
    pub is_smallest_shard: bool,
    /// 0..=1, headroom left under the c-threshold
    pub confidence_score: Decimal,
    pub estimated_gas: u64,
    /// `amount_out / reserve_out`
    pub price_impact: Decimal,
    pub threshold: u128,
    pub ratio: Option<Decimal>,
    pub slippage: SlippageCheck,
    pub created_at_ms: u64,
}

/// Result of `find_route`: a single-shard decision, a hub path when the pair
/// has no direct shard, or a typed error. Exactly one of the three is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    pub decision: Option<RoutingDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathResult>,
    pub shards_evaluated: usize,
    pub error: Option<RouterError>,
    pub from_cache: bool,
}

impl RouteResult {
    pub fn success(decision: RoutingDecision, shards_evaluated: usize) -> Self {
        Self {
            decision: Some(decision),
            path: None,
            shards_evaluated,
            error: None,
            from_cache: false,
        }
    }

    /// A route through a hub token
    pub fn multi_hop(path: PathResult, shards_evaluated: usize) -> Self {
        Self {
            decision: None,
            path: Some(path),
            shards_evaluated,
            error: None,
            from_cache: false,
        }
    }

    pub fn failure(error: RouterError, shards_evaluated: usize) -> Self {
        Self {
            decision: None,
            path: None,
            shards_evaluated,
            error: Some(error),
            from_cache: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.decision.is_some() || self.path.is_some()
    }

    pub fn is_multi_hop(&self) -> bool {
        self.path.is_some()
    }

    /// The single-shard decision; a hub path is reported as an error here
    pub fn into_result(self) -> Result<RoutingDecision, RouterError> {
        match (self.decision, self.path, self.error) {
            (Some(decision), _, _) => Ok(decision),
            (None, _, Some(error)) => Err(error),
            (None, Some(path), None) => Err(RouterError::configuration(
                None,
                format!("route needs {} hops, read it with into_path", path.steps.len()),
            )),
            (None, None, None) => Err(RouterError::configuration(
                None,
                "route result carried neither a decision nor an error",
            )),
        }
    }

    /// The hub path; a single-shard decision is reported as an error here
    pub fn into_path(self) -> Result<PathResult, RouterError> {
        match (self.path, self.error) {
            (Some(path), _) => Ok(path),
            (None, Some(error)) => Err(error),
            (None, None) => Err(RouterError::configuration(None, "route is a single-shard decision")),
        }
    }
}

/// Opaque pricing-curve quote from a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub amount_in: u128,
    pub amount_out: u128,
    pub fee: u128,
}

/// Trade submission parameters (exact output, bounded input)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub pool: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_out: u128,
    pub max_amount_in: u128,
    pub recipient: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub success: bool,
    pub block_number: u64,
    pub gas_used: u64,
    pub amount_in: u128,
    pub amount_out: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeExecutionResult {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub actual_amount_in: u128,
    pub actual_amount_out: u128,
    pub gas_used: u64,
    pub error: Option<RouterError>,
}

impl TradeExecutionResult {
    pub fn from_receipt(receipt: &TxReceipt) -> Self {
        Self {
            success: receipt.success,
            tx_hash: Some(receipt.tx_hash.clone()),
            actual_amount_in: receipt.amount_in,
            actual_amount_out: receipt.amount_out,
            gas_used: receipt.gas_used,
            error: None,
        }
    }

    pub fn failed(error: RouterError) -> Self {
        let tx_hash = match &error {
            RouterError::TradeExecutionFailed { tx_hash, .. } => tx_hash.clone(),
            _ => None,
        };
        Self {
            success: false,
            tx_hash,
            actual_amount_in: 0,
            actual_amount_out: 0,
            gas_used: 0,
            error: Some(error),
        }
    }
}

/// One hop of a multi-hop path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub shard_id: String,
    pub pool_address: Address,
    pub token_in: Token,
    pub token_out: Token,
    pub amount_in: u128,
    pub amount_out: u128,
    pub fee: u128,
    pub is_smallest_shard: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathResult {
    /// Token symbols from input to output
    pub path: Vec<String>,
    pub steps: Vec<PathStep>,
    pub amount_in: u128,
    pub amount_out: u128,
    /// Every hop's fee carried forward through the later hops' exchange
    /// rates, in units of the output token
    pub total_fee: u128,
    /// Intermediate hub, `None` for a direct route
    pub via: Option<Address>,
}

impl PathResult {
    /// Sum of the hop fees expressed in the output token.
    ///
    /// A fee paid on hop `i` is denominated in that hop's input token, so it is
    /// carried through hop `i` and every later hop at the hop's own
    /// `amount_out / amount_in` rate.
    pub fn fee_in_output_token(steps: &[PathStep]) -> u128 {
        steps.iter().fold(0u128, |carried, step| {
            if step.amount_in == 0 {
                return carried;
            }
            let owed = carried.saturating_add(step.fee);
            owed.checked_mul(step.amount_out)
                .map(|scaled| scaled / step.amount_in)
                .unwrap_or_else(|| owed / step.amount_in * step.amount_out)
        })
    }
}

/// Running routing statistics for one chain's coordinator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingStats {
    pub total_requests: u64,
    pub successful_routings: u64,
    pub failed_routings: u64,
    pub cache_hits: u64,
    /// Arithmetic running mean over all requests
    pub average_latency_ms: f64,
}

impl RoutingStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_routings as f64 / self.total_requests as f64
        }
    }

    /// Fold one request into the counters
    pub fn record(&mut self, success: bool, latency_ms: f64) {
        self.total_requests += 1;
        if success {
            self.successful_routings += 1;
        } else {
            self.failed_routings += 1;
        }
        let n = self.total_requests as f64;
        self.average_latency_ms += (latency_ms - self.average_latency_ms) / n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_average() {
        let mut stats = RoutingStats::default();
        stats.record(true, 10.0);
        stats.record(false, 20.0);
        stats.record(true, 30.0);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful_routings, 2);
        assert_eq!(stats.failed_routings, 1);
        assert!((stats.average_latency_ms - 20.0).abs() < 1e-9);
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_route_result_into_result() {
        let err = RouterError::NoShardsAvailable {
            chain_id: 1,
            pair: "A/B".into(),
        };
        let result = RouteResult::failure(err.clone(), 0);
        assert!(!result.is_success());
        assert_eq!(result.into_result(), Err(err));
    }

    fn step(amount_in: u128, amount_out: u128, fee: u128) -> PathStep {
        PathStep {
            shard_id: "s".into(),
            pool_address: Address([9; 20]),
            token_in: Token::new(1, Address([1; 20]), "A", 6),
            token_out: Token::new(1, Address([2; 20]), "B", 6),
            amount_in,
            amount_out,
            fee,
            is_smallest_shard: true,
        }
    }

    #[test]
    fn test_fee_carried_into_output_token() {
        // hop 1 pays 30 A at 2 B per A, hop 2 pays 12 B at 1/4 C per B
        let steps = [step(10_000, 20_000, 30), step(20_000, 5_000, 12)];
        assert_eq!(PathResult::fee_in_output_token(&steps), (30 * 2 + 12) / 4);
        assert_eq!(PathResult::fee_in_output_token(&steps[..1]), 60);
        assert_eq!(PathResult::fee_in_output_token(&[]), 0);
    }

    #[test]
    fn test_multi_hop_result_is_a_success_but_not_a_decision() {
        let path = PathResult {
            path: vec!["A".into(), "B".into(), "C".into()],
            steps: vec![step(100, 90, 1), step(90, 80, 1)],
            amount_in: 100,
            amount_out: 80,
            total_fee: 1,
            via: Some(Address([2; 20])),
        };
        let result = RouteResult::multi_hop(path.clone(), 3);
        assert!(result.is_success());
        assert!(result.is_multi_hop());
        assert!(result.clone().into_result().is_err());
        assert_eq!(result.into_path(), Ok(path));
    }
}
