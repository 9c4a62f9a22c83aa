//! Health probe capabilities
//!
//! A chain is probed for liveness through [`ChainProbe`]. Routing sub-services
//! opt into health reporting by implementing [`HealthProbe`]; a service that
//! does not is registered with no probe, and the chain's
//! [`MissingProbePolicy`](router_config::MissingProbePolicy) decides what that means.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use types::RouterError;

/// Liveness reads against a chain's node
#[async_trait]
pub trait ChainProbe: Send + Sync {
    /// Latest block height
    async fn block_number(&self) -> Result<u64, RouterError>;
}

/// Health check a routing sub-service can expose
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check_health(&self) -> Result<(), RouterError>;
}

/// A sub-service as seen by the monitor
#[derive(Clone)]
pub struct MonitoredService {
    pub name: String,
    pub probe: Option<Arc<dyn HealthProbe>>,
}

impl MonitoredService {
    pub fn with_probe(name: impl Into<String>, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            name: name.into(),
            probe: Some(probe),
        }
    }

    /// A service that exposes no health check
    pub fn without_probe(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            probe: None,
        }
    }
}

impl fmt::Debug for MonitoredService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredService")
            .field("name", &self.name)
            .field("has_probe", &self.probe.is_some())
            .finish()
    }
}
