//! Per-chain health monitor
//!
//! Each chain gets its own interval task. Tasks are started and stopped
//! independently, and a monitor that stops or panics for one chain leaves the
//! others running. Nothing here sits on the request path.

use crate::probe::{ChainProbe, MonitoredService};
use dashmap::DashMap;
use isolation::FailureIsolation;
use parking_lot::Mutex;
use router_config::{HealthSettings, MissingProbePolicy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use types::{unix_millis, ChainHealth, ChainId, CircuitState, EventEmitter, RouterEvent};

/// Monitor tuning for one chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    pub stale_threshold: Duration,
    pub missing_probe_policy: MissingProbePolicy,
}

impl From<&HealthSettings> for MonitorConfig {
    fn from(settings: &HealthSettings) -> Self {
        Self {
            check_interval: settings.check_interval(),
            stale_threshold: settings.stale_threshold(),
            missing_probe_policy: settings.missing_probe_policy,
        }
    }
}

/// Service health status levels across all monitored chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Every chain is healthy
    Healthy,
    /// Some chains are unhealthy, the rest still serve traffic
    Degraded,
    /// No chain is healthy
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub chains: Vec<ChainHealth>,
}

#[derive(Debug)]
struct TrackerState {
    health: ChainHealth,
    /// Monotonic time the block height last advanced
    last_advance: Option<Instant>,
}

/// Health tracking for one chain
struct ChainMonitor {
    chain_id: ChainId,
    config: MonitorConfig,
    probe: Arc<dyn ChainProbe>,
    services: Vec<MonitoredService>,
    isolation: Arc<FailureIsolation>,
    events: EventEmitter,
    state: Mutex<TrackerState>,
}

impl ChainMonitor {
    /// One monitoring round: block height, latency, staleness, sub-service probes
    async fn check(&self) -> ChainHealth {
        let chain_id = self.chain_id;
        let mut errors: Vec<String> = Vec::new();

        let started = Instant::now();
        let block = self
            .isolation
            .run_isolated(chain_id, "block_number", self.probe.block_number())
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        for service in &self.services {
            match &service.probe {
                // Service checks report in-process state, so they never touch the breaker
                Some(probe) => {
                    match tokio::time::timeout(self.config.check_interval, probe.check_health())
                        .await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => errors.push(format!("{}: {}", service.name, e)),
                        Err(_) => errors.push(format!(
                            "{}: no answer within {}ms",
                            service.name,
                            self.config.check_interval.as_millis()
                        )),
                    }
                }
                None => {
                    if self.config.missing_probe_policy == MissingProbePolicy::TreatAsError {
                        errors.push(format!("{}: no health probe", service.name));
                    }
                }
            }
        }

        let breaker_state = self
            .isolation
            .state(chain_id)
            .unwrap_or(CircuitState::Closed);

        let snapshot = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let previous_height = state.health.block_height;
            let mut stale = false;

            match block {
                Ok(height) => {
                    state.health.rpc_latency_ms = Some(latency_ms);
                    if previous_height.map_or(true, |prev| height > prev) {
                        state.health.block_height = Some(height);
                        state.health.last_block_time_ms = Some(unix_millis());
                        state.last_advance = Some(now);
                    } else if let Some(advanced) = state.last_advance {
                        let idle = now.duration_since(advanced);
                        if idle > self.config.stale_threshold {
                            stale = true;
                            errors.push(format!(
                                "block height stuck at {} for {}ms",
                                height,
                                idle.as_millis()
                            ));
                        }
                    }
                }
                Err(e) => {
                    state.health.rpc_latency_ms = None;
                    errors.push(format!("block_number: {}", e));
                }
            }

            if breaker_state == CircuitState::Open {
                errors.push("circuit breaker open".to_string());
            }

            for error in &errors {
                state.health.push_error(error.clone());
            }
            let was_healthy = state.health.is_healthy;
            state.health.is_healthy = errors.is_empty() && !stale;
            state.health.breaker_state = breaker_state;
            state.health.last_checked_ms = unix_millis();

            if was_healthy != state.health.is_healthy {
                if state.health.is_healthy {
                    info!(chain_id, "Chain recovered");
                } else {
                    warn!(chain_id, errors = ?errors, "Chain unhealthy");
                }
            }
            state.health.clone()
        };

        debug!(chain_id, healthy = snapshot.is_healthy, latency_ms, "Health check complete");
        self.events.emit(RouterEvent::HealthUpdated {
            health: snapshot.clone(),
        });
        snapshot
    }

    fn snapshot(&self) -> ChainHealth {
        self.state.lock().health.clone()
    }
}

struct MonitorEntry {
    monitor: Arc<ChainMonitor>,
    handle: JoinHandle<()>,
}

/// Schedules and tracks health checks for every registered chain
pub struct HealthMonitor {
    isolation: Arc<FailureIsolation>,
    events: EventEmitter,
    chains: DashMap<ChainId, MonitorEntry>,
}

impl HealthMonitor {
    pub fn new(isolation: Arc<FailureIsolation>, events: EventEmitter) -> Self {
        Self {
            isolation,
            events,
            chains: DashMap::new(),
        }
    }

    /// Begin monitoring a chain on its own interval task, replacing any existing monitor
    pub fn start(
        &self,
        chain_id: ChainId,
        config: MonitorConfig,
        probe: Arc<dyn ChainProbe>,
        services: Vec<MonitoredService>,
    ) {
        let monitor = Arc::new(ChainMonitor {
            chain_id,
            config,
            probe,
            services,
            isolation: Arc::clone(&self.isolation),
            events: self.events.clone(),
            state: Mutex::new(TrackerState {
                health: ChainHealth::new(chain_id),
                last_advance: None,
            }),
        });

        let task_monitor = Arc::clone(&monitor);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(task_monitor.config.check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                task_monitor.check().await;
            }
        });

        info!(chain_id, "Health monitoring started");
        if let Some(previous) = self.chains.insert(chain_id, MonitorEntry { monitor, handle }) {
            previous.handle.abort();
        }
    }

    /// Stop monitoring one chain; other chains are unaffected
    pub fn stop(&self, chain_id: ChainId) -> bool {
        match self.chains.remove(&chain_id) {
            Some((_, entry)) => {
                entry.handle.abort();
                info!(chain_id, "Health monitoring stopped");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let chain_ids: Vec<ChainId> = self.chains.iter().map(|e| *e.key()).collect();
        for chain_id in chain_ids {
            self.stop(chain_id);
        }
    }

    /// Whether the chain's monitor task is still running
    pub fn is_running(&self, chain_id: ChainId) -> bool {
        self.chains
            .get(&chain_id)
            .map(|entry| !entry.handle.is_finished())
            .unwrap_or(false)
    }

    /// Run one check immediately, outside the interval
    pub async fn check_now(&self, chain_id: ChainId) -> Option<ChainHealth> {
        let monitor = self
            .chains
            .get(&chain_id)
            .map(|entry| Arc::clone(&entry.monitor))?;
        Some(monitor.check().await)
    }

    pub fn get_health(&self, chain_id: ChainId) -> Option<ChainHealth> {
        self.chains.get(&chain_id).map(|entry| entry.monitor.snapshot())
    }

    pub fn summary(&self) -> HealthSummary {
        let mut chains: Vec<ChainHealth> = self
            .chains
            .iter()
            .map(|entry| entry.monitor.snapshot())
            .collect();
        chains.sort_by_key(|h| h.chain_id);

        let healthy = chains.iter().filter(|h| h.is_healthy).count();
        let status = if healthy == chains.len() {
            HealthStatus::Healthy
        } else if healthy == 0 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        HealthSummary { status, chains }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        for entry in self.chains.iter() {
            entry.handle.abort();
        }
    }
}
