//! Router log markers
//!
//! Every routing log line starts with a marker for the stage that wrote it,
//! so one chain's discovery, routing and execution lines can be picked apart
//! in a mixed log. Sink events map onto the same markers through
//! [`Marker::of`], and [`log_event`] turns a forwarded event into one line at
//! a level matching its severity.

use types::RouterEvent;

/// Stage a log line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// Chain registration and removal
    Chain,
    /// Factory enumeration and discovery passes
    Discovery,
    /// Shard cache changes
    Shard,
    /// Single-shard routing decisions
    Route,
    /// Hub paths
    Path,
    /// Trade submission and settlement
    Trade,
    /// Running statistics
    Stats,
    /// Liveness reports
    Health,
    /// Errors surfaced to the sink
    Failure,
}

impl Marker {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Chain => "🌐",
            Self::Discovery => "🔍",
            Self::Shard => "🏊",
            Self::Route => "🧭",
            Self::Path => "🔀",
            Self::Trade => "⚡",
            Self::Stats => "📊",
            Self::Health => "🩺",
            Self::Failure => "❌",
        }
    }

    /// Marker for a sink event; failed trades count as failures
    pub fn of(event: &RouterEvent) -> Self {
        match event {
            RouterEvent::ShardDiscovered { .. }
            | RouterEvent::ShardUpdated { .. }
            | RouterEvent::ShardEvicted { .. } => Self::Shard,
            RouterEvent::RoutingCompleted { .. } => Self::Route,
            RouterEvent::PathCompleted { .. } => Self::Path,
            RouterEvent::TradeExecuted { result, .. } if !result.success => Self::Failure,
            RouterEvent::TradeExecuted { .. } => Self::Trade,
            RouterEvent::Error { .. } => Self::Failure,
            RouterEvent::MetricsUpdated { .. } => Self::Stats,
            RouterEvent::HealthUpdated { .. } => Self::Health,
        }
    }
}

/// `route_log!(level, marker, "format", args...)`, level being a `tracing` macro name
#[macro_export]
macro_rules! route_log {
    ($level:ident, $marker:expr, $($arg:tt)*) => {
        tracing::$level!(
            "{} {}",
            $crate::logging::Marker::symbol($marker),
            format_args!($($arg)*)
        )
    };
}

/// Log one forwarded sink event
pub fn log_event(event: &RouterEvent) {
    let marker = Marker::of(event);
    let chain_id = event.chain_id();
    match event {
        RouterEvent::ShardDiscovered { shard, .. } => {
            route_log!(debug, marker, "Chain {}: discovered {} ({})", chain_id, shard.id, shard.pool_address.short())
        }
        RouterEvent::ShardUpdated { shard, .. } => {
            route_log!(trace, marker, "Chain {}: {} now {}/{}", chain_id, shard.id, shard.reserve_a, shard.reserve_b)
        }
        RouterEvent::ShardEvicted { pool_address, reason, .. } => {
            route_log!(warn, marker, "Chain {}: evicted {} ({})", chain_id, pool_address.short(), reason)
        }
        RouterEvent::RoutingCompleted { decision, latency_ms, from_cache, .. } => route_log!(
            debug,
            marker,
            "Chain {}: {} out → shard {} ({}ms, cached {})",
            chain_id,
            decision.amount_out,
            decision.pool_address.short(),
            latency_ms,
            from_cache
        ),
        RouterEvent::PathCompleted { path, latency_ms, .. } => route_log!(
            info,
            marker,
            "Chain {}: {} ({} in, {} out, {}ms)",
            chain_id,
            path.path.join(" → "),
            path.amount_in,
            path.amount_out,
            latency_ms
        ),
        RouterEvent::TradeExecuted { result, .. } if result.success => route_log!(
            info,
            marker,
            "Chain {}: settled {} (in {}, out {})",
            chain_id,
            result.tx_hash.as_deref().unwrap_or("-"),
            result.actual_amount_in,
            result.actual_amount_out
        ),
        RouterEvent::TradeExecuted { result, .. } => {
            route_log!(error, marker, "Chain {}: trade failed {:?}", chain_id, result.error)
        }
        RouterEvent::Error { operation, error, .. } => {
            route_log!(error, marker, "Chain {}: {} failed: {}", chain_id, operation, error)
        }
        RouterEvent::MetricsUpdated { stats, .. } => route_log!(
            info,
            marker,
            "Chain {}: {} requests, {:.1}% routed, {} cache hits, {:.2}ms avg",
            chain_id,
            stats.total_requests,
            stats.success_rate() * 100.0,
            stats.cache_hits,
            stats.average_latency_ms
        ),
        RouterEvent::HealthUpdated { health } if health.is_healthy => {
            route_log!(debug, marker, "Chain {} healthy at block {:?}", chain_id, health.block_height)
        }
        RouterEvent::HealthUpdated { health } => {
            route_log!(warn, marker, "Chain {} unhealthy: {:?}", chain_id, health.errors.front())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use types::{RouterError, RoutingStats, TradeExecutionResult};

    #[test]
    fn test_failed_trades_and_errors_share_the_failure_marker() {
        let failed = RouterEvent::TradeExecuted {
            chain_id: 1,
            result: TradeExecutionResult::failed(RouterError::trade_failed(1, "EXPIRED", None)),
        };
        let error = RouterEvent::Error {
            chain_id: 1,
            operation: "discover".into(),
            error: RouterError::connection(1, "refused"),
        };
        assert_eq!(Marker::of(&failed), Marker::Failure);
        assert_eq!(Marker::of(&error), Marker::Failure);

        let stats = RouterEvent::MetricsUpdated {
            chain_id: 1,
            stats: RoutingStats::default(),
        };
        assert_eq!(Marker::of(&stats), Marker::Stats);
        log_event(&failed);
        log_event(&stats);
    }

    #[test]
    fn test_symbols_are_distinct() {
        let all = [
            Marker::Chain,
            Marker::Discovery,
            Marker::Shard,
            Marker::Route,
            Marker::Path,
            Marker::Trade,
            Marker::Stats,
            Marker::Health,
            Marker::Failure,
        ];
        let symbols: HashSet<&str> = all.iter().map(|m| m.symbol()).collect();
        assert_eq!(symbols.len(), all.len());
    }
}
