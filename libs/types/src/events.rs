//! Outbound events for monitoring sinks
//!
//! Each component owns an [`EventEmitter`] writing into a bounded channel. The
//! engine forwards every component channel onto a single sink channel. Emission
//! never blocks and never fails the emitter: if the channel is full or the
//! consumer went away the event is dropped and counted.

use crate::address::{Address, ChainId};
use crate::errors::RouterError;
use crate::health::ChainHealth;
use crate::routing::{PathResult, RoutingDecision, RoutingStats, TradeExecutionResult};
use crate::shard::ShardInfo;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Default capacity of a component's outbound channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum RouterEvent {
    ShardDiscovered {
        chain_id: ChainId,
        shard: ShardInfo,
    },
    ShardUpdated {
        chain_id: ChainId,
        shard: ShardInfo,
    },
    ShardEvicted {
        chain_id: ChainId,
        pool_address: Address,
        reason: String,
    },
    RoutingCompleted {
        chain_id: ChainId,
        decision: RoutingDecision,
        latency_ms: u64,
        from_cache: bool,
    },
    /// A pair with no direct shard was routed through a hub
    PathCompleted {
        chain_id: ChainId,
        path: PathResult,
        latency_ms: u64,
        from_cache: bool,
    },
    TradeExecuted {
        chain_id: ChainId,
        result: TradeExecutionResult,
    },
    Error {
        chain_id: ChainId,
        operation: String,
        error: RouterError,
    },
    MetricsUpdated {
        chain_id: ChainId,
        stats: RoutingStats,
    },
    HealthUpdated {
        health: ChainHealth,
    },
}

impl RouterEvent {
    /// Sink-facing event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::ShardDiscovered { .. } => "shard-discovered",
            Self::ShardUpdated { .. } => "shard-updated",
            Self::ShardEvicted { .. } => "shard-evicted",
            Self::RoutingCompleted { .. } => "routing-completed",
            Self::PathCompleted { .. } => "path-completed",
            Self::TradeExecuted { .. } => "trade-executed",
            Self::Error { .. } => "error",
            Self::MetricsUpdated { .. } => "metrics-updated",
            Self::HealthUpdated { .. } => "health-updated",
        }
    }

    pub fn chain_id(&self) -> ChainId {
        match self {
            Self::ShardDiscovered { chain_id, .. }
            | Self::ShardUpdated { chain_id, .. }
            | Self::ShardEvicted { chain_id, .. }
            | Self::RoutingCompleted { chain_id, .. }
            | Self::PathCompleted { chain_id, .. }
            | Self::TradeExecuted { chain_id, .. }
            | Self::Error { chain_id, .. }
            | Self::MetricsUpdated { chain_id, .. } => *chain_id,
            Self::HealthUpdated { health } => health.chain_id,
        }
    }
}

/// Non-blocking sending half of a component's event channel
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<RouterEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventEmitter {
    /// Create an emitter and the receiver the engine will forward from
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RouterEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Emitter whose events go nowhere, for components used standalone
    pub fn disconnected() -> Self {
        let (emitter, _rx) = Self::channel(1);
        emitter
    }

    pub fn emit(&self, event: RouterEvent) {
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Event dropped: {}", e);
        }
    }

    /// Events that could not be delivered
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
