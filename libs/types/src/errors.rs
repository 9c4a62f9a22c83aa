//! Router error taxonomy
//!
//! Every failure the engine surfaces is one of these kinds. Errors are `Clone`
//! so a cached route failure can be replayed verbatim, and they carry enough
//! context (chain, operation, computed ratio) for the API layer to produce a
//! useful response without re-deriving anything.

use crate::address::ChainId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RouterError {
    #[error("No shards available for {pair} on chain {chain_id}")]
    NoShardsAvailable { chain_id: ChainId, pair: String },

    #[error(
        "Amount {amount_out} exceeds the c-threshold of all {shards_checked} shards for {pair} on chain {chain_id} (best ratio {best_ratio:?})"
    )]
    ExceedsThreshold {
        chain_id: ChainId,
        pair: String,
        amount_out: u128,
        shards_checked: usize,
        best_ratio: Option<Decimal>,
    },

    #[error("No route from {token_in} to {token_out} on chain {chain_id}")]
    NoRoute {
        chain_id: ChainId,
        token_in: String,
        token_out: String,
    },

    #[error("Chain {chain_id} connection error: {message}")]
    ChainConnectionError { chain_id: ChainId, message: String },

    #[error("RPC error on chain {chain_id} during {operation}: {message}")]
    RpcError {
        chain_id: ChainId,
        operation: String,
        message: String,
    },

    #[error("Timeout: {operation} on chain {chain_id} exceeded {timeout_ms}ms")]
    Timeout {
        chain_id: ChainId,
        operation: String,
        timeout_ms: u64,
    },

    #[error("Chain {chain_id} unavailable: circuit breaker open, retry after {retry_after_ms}ms")]
    ServiceUnavailable {
        chain_id: ChainId,
        retry_after_ms: u64,
    },

    #[error("Configuration error{}: {message}", field_suffix(.field))]
    ConfigurationError {
        field: Option<String>,
        message: String,
    },

    #[error("Trade execution failed on chain {chain_id}: {reason}")]
    TradeExecutionFailed {
        chain_id: ChainId,
        reason: String,
        tx_hash: Option<String>,
    },
}

fn field_suffix(field: &Option<String>) -> String {
    field
        .as_ref()
        .map(|f| format!(" in '{}'", f))
        .unwrap_or_default()
}

/// Discriminant of [`RouterError`] without payload, for metrics and matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NoShardsAvailable,
    ExceedsThreshold,
    NoRoute,
    ChainConnectionError,
    RpcError,
    Timeout,
    ServiceUnavailable,
    ConfigurationError,
    TradeExecutionFailed,
}

/// Status mapping consumed by the API layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHint {
    /// HTTP-equivalent status code
    pub code: u16,
    /// Suggested client back-off, present for transient kinds
    pub retry_after_ms: Option<u64>,
}

impl RouterError {
    pub fn configuration(field: Option<&str>, message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            field: field.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn rpc(chain_id: ChainId, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RpcError {
            chain_id,
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn connection(chain_id: ChainId, message: impl Into<String>) -> Self {
        Self::ChainConnectionError {
            chain_id,
            message: message.into(),
        }
    }

    pub fn trade_failed(chain_id: ChainId, reason: impl Into<String>, tx_hash: Option<String>) -> Self {
        Self::TradeExecutionFailed {
            chain_id,
            reason: reason.into(),
            tx_hash,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoShardsAvailable { .. } => ErrorKind::NoShardsAvailable,
            Self::ExceedsThreshold { .. } => ErrorKind::ExceedsThreshold,
            Self::NoRoute { .. } => ErrorKind::NoRoute,
            Self::ChainConnectionError { .. } => ErrorKind::ChainConnectionError,
            Self::RpcError { .. } => ErrorKind::RpcError,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            Self::ConfigurationError { .. } => ErrorKind::ConfigurationError,
            Self::TradeExecutionFailed { .. } => ErrorKind::TradeExecutionFailed,
        }
    }

    /// Whether this outcome counts against the chain's circuit breaker.
    ///
    /// Routing outcomes such as an empty shard set mean the chain answered;
    /// only transport, timeout and on-chain execution failures are chain faults.
    pub fn is_chain_failure(&self) -> bool {
        matches!(
            self,
            Self::ChainConnectionError { .. }
                | Self::RpcError { .. }
                | Self::Timeout { .. }
                | Self::TradeExecutionFailed { .. }
        )
    }

    /// User-visible status for the API boundary
    pub fn status_hint(&self) -> StatusHint {
        match self {
            Self::NoShardsAvailable { .. } | Self::NoRoute { .. } => StatusHint {
                code: 404,
                retry_after_ms: None,
            },
            Self::ExceedsThreshold { .. } | Self::ConfigurationError { .. } => StatusHint {
                code: 400,
                retry_after_ms: None,
            },
            Self::ServiceUnavailable { retry_after_ms, .. } => StatusHint {
                code: 503,
                retry_after_ms: Some(*retry_after_ms),
            },
            Self::Timeout { timeout_ms, .. } => StatusHint {
                code: 503,
                retry_after_ms: Some(*timeout_ms),
            },
            Self::ChainConnectionError { .. } | Self::RpcError { .. } => StatusHint {
                code: 502,
                retry_after_ms: None,
            },
            Self::TradeExecutionFailed { .. } => StatusHint {
                code: 502,
                retry_after_ms: None,
            },
        }
    }

    /// Chain the error is attributed to, if any
    pub fn chain_id(&self) -> Option<ChainId> {
        match self {
            Self::NoShardsAvailable { chain_id, .. }
            | Self::ExceedsThreshold { chain_id, .. }
            | Self::NoRoute { chain_id, .. }
            | Self::ChainConnectionError { chain_id, .. }
            | Self::RpcError { chain_id, .. }
            | Self::Timeout { chain_id, .. }
            | Self::ServiceUnavailable { chain_id, .. }
            | Self::TradeExecutionFailed { chain_id, .. } => Some(*chain_id),
            Self::ConfigurationError { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_chain_failure_classification() {
        assert!(RouterError::rpc(1, "pool_state", "boom").is_chain_failure());
        assert!(RouterError::Timeout {
            chain_id: 1,
            operation: "list_pools".into(),
            timeout_ms: 100
        }
        .is_chain_failure());
        assert!(!RouterError::NoShardsAvailable {
            chain_id: 1,
            pair: "USDC/USDT".into()
        }
        .is_chain_failure());
        assert!(!RouterError::ServiceUnavailable {
            chain_id: 1,
            retry_after_ms: 10
        }
        .is_chain_failure());
    }

    #[test]
    fn test_status_mapping() {
        let exceeded = RouterError::ExceedsThreshold {
            chain_id: 137,
            pair: "USDC/USDT".into(),
            amount_out: 10_000,
            shards_checked: 2,
            best_ratio: Some(dec!(8.01)),
        };
        assert_eq!(exceeded.status_hint().code, 400);
        assert!(exceeded.to_string().contains("8.01"));

        let open = RouterError::ServiceUnavailable {
            chain_id: 137,
            retry_after_ms: 2500,
        };
        assert_eq!(
            open.status_hint(),
            StatusHint {
                code: 503,
                retry_after_ms: Some(2500)
            }
        );
    }

    #[test]
    fn test_configuration_message_names_field() {
        let err = RouterError::configuration(Some("batch_size"), "must be positive");
        assert_eq!(
            err.to_string(),
            "Configuration error in 'batch_size': must be positive"
        );
        assert_eq!(err.chain_id(), None);
    }
}
