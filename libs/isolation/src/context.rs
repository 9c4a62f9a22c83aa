//! Chain Isolation Context
//!
//! Each registered chain gets exactly one [`ChainContext`]: a plain data
//! record holding chain-local state, a TTL cache and request metrics. Live
//! service handles never enter a context. They sit in a [`ServiceRegistry`]
//! and the context only lists their ids, so contexts stay acyclic and can be
//! checked with a flat scan.
//!
//! All access goes through [`ContextManager`] methods scoped by chain id; no
//! method hands out a reference that could reach another chain's context.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use types::{unix_millis, ChainId, RouterError};

/// Keys that belong to the engine and may never be written into chain-local state
pub const RESERVED_KEYS: &[&str] = &[
    "provider",
    "signer",
    "pools",
    "routes",
    "shards",
    "config",
    "services",
    "contracts",
    "factory",
    "router",
];

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Identifier of a live service handle in a [`ServiceRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(pub u64);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Wall-clock time of the last recorded request
    pub last_activity_ms: Option<u64>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
pub struct ChainContext {
    chain_id: ChainId,
    isolated_state: HashMap<String, Value>,
    isolated_cache: HashMap<String, CacheEntry>,
    metrics: ContextMetrics,
    services: Vec<ServiceId>,
    created_at_ms: u64,
}

impl ChainContext {
    fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            isolated_state: HashMap::new(),
            isolated_cache: HashMap::new(),
            metrics: ContextMetrics::default(),
            services: Vec::new(),
            created_at_ms: unix_millis(),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn services(&self) -> &[ServiceId] {
        &self.services
    }
}

/// Owner of every chain's context
#[derive(Debug, Default)]
pub struct ContextManager {
    contexts: DashMap<ChainId, ChainContext>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the context for a newly registered chain
    pub fn create(&self, chain_id: ChainId) -> Result<(), RouterError> {
        use dashmap::mapref::entry::Entry;
        match self.contexts.entry(chain_id) {
            Entry::Occupied(_) => Err(RouterError::configuration(
                Some("chain_id"),
                format!("chain {} already has an isolation context", chain_id),
            )),
            Entry::Vacant(slot) => {
                slot.insert(ChainContext::new(chain_id));
                info!(chain_id, "Created isolation context");
                Ok(())
            }
        }
    }

    /// Destroy a chain's context, returning it so the caller can release its services
    pub fn remove(&self, chain_id: ChainId) -> Option<ChainContext> {
        let removed = self.contexts.remove(&chain_id).map(|(_, ctx)| ctx);
        if removed.is_some() {
            info!(chain_id, "Destroyed isolation context");
        }
        removed
    }

    pub fn contains(&self, chain_id: ChainId) -> bool {
        self.contexts.contains_key(&chain_id)
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<_> = self.contexts.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Write chain-local state. Reserved keys are refused and leave state untouched.
    pub fn set_state(&self, chain_id: ChainId, key: &str, value: Value) -> Result<(), RouterError> {
        if is_reserved_key(key) {
            return Err(RouterError::configuration(
                Some(key),
                format!("'{}' is reserved and cannot be stored in chain {} state", key, chain_id),
            ));
        }
        let mut ctx = self.context_mut(chain_id)?;
        ctx.isolated_state.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get_state(&self, chain_id: ChainId, key: &str) -> Option<Value> {
        self.contexts
            .get(&chain_id)
            .and_then(|ctx| ctx.isolated_state.get(key).cloned())
    }

    /// Wipe a chain's state and cache. Metrics and service ids are kept.
    pub fn clear_state(&self, chain_id: ChainId) -> Result<(), RouterError> {
        let mut ctx = self.context_mut(chain_id)?;
        ctx.isolated_state.clear();
        ctx.isolated_cache.clear();
        debug!(chain_id, "Cleared isolated state");
        Ok(())
    }

    pub fn cache_set(
        &self,
        chain_id: ChainId,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), RouterError> {
        let mut ctx = self.context_mut(chain_id)?;
        ctx.isolated_cache.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    /// Read a cached value; expired entries are dropped on read
    pub fn cache_get(&self, chain_id: ChainId, key: &str) -> Option<Value> {
        let mut ctx = self.contexts.get_mut(&chain_id)?;
        let now = Instant::now();
        let expired = match ctx.isolated_cache.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            ctx.isolated_cache.remove(key);
        }
        None
    }

    /// Drop expired cache entries for one chain, returning how many were removed
    pub fn purge_expired(&self, chain_id: ChainId) -> usize {
        let Some(mut ctx) = self.contexts.get_mut(&chain_id) else {
            return 0;
        };
        let now = Instant::now();
        let before = ctx.isolated_cache.len();
        ctx.isolated_cache.retain(|_, entry| !entry.is_expired(now));
        before - ctx.isolated_cache.len()
    }

    /// Cached entries held for one chain, expired ones included until purged
    pub fn cache_len(&self, chain_id: ChainId) -> usize {
        self.contexts
            .get(&chain_id)
            .map_or(0, |ctx| ctx.isolated_cache.len())
    }

    pub fn record_request(&self, chain_id: ChainId, success: bool) {
        if let Some(mut ctx) = self.contexts.get_mut(&chain_id) {
            ctx.metrics.request_count += 1;
            if !success {
                ctx.metrics.error_count += 1;
            }
            ctx.metrics.last_activity_ms = Some(unix_millis());
        }
    }

    pub fn metrics(&self, chain_id: ChainId) -> Option<ContextMetrics> {
        self.contexts.get(&chain_id).map(|ctx| ctx.metrics.clone())
    }

    /// Index a live service (held in a [`ServiceRegistry`]) from this chain's context
    pub fn attach_service(&self, chain_id: ChainId, id: ServiceId) -> Result<(), RouterError> {
        let mut ctx = self.context_mut(chain_id)?;
        if !ctx.services.contains(&id) {
            ctx.services.push(id);
        }
        Ok(())
    }

    pub fn service_ids(&self, chain_id: ChainId) -> Vec<ServiceId> {
        self.contexts
            .get(&chain_id)
            .map(|ctx| ctx.services.clone())
            .unwrap_or_default()
    }

    /// Scan every context and the service registry for isolation violations
    pub fn verify_integrity<S>(&self, registry: &ServiceRegistry<S>) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        let now = Instant::now();

        for entry in self.contexts.iter() {
            let (key, ctx) = (*entry.key(), entry.value());
            report.chains_checked += 1;

            if ctx.chain_id != key {
                report.chain_mismatches.push((key, ctx.chain_id));
            }
            for state_key in ctx.isolated_state.keys() {
                if is_reserved_key(state_key) {
                    report.reserved_key_violations.push((key, state_key.clone()));
                }
            }
            for id in &ctx.services {
                match registry.owner_of(*id) {
                    Some(owner) if owner == key => {}
                    Some(owner) => report.foreign_handles.push((key, *id, owner)),
                    None => report.dangling_handles.push((key, *id)),
                }
            }
            report.expired_entries += ctx
                .isolated_cache
                .values()
                .filter(|e| e.is_expired(now))
                .count();
        }

        for (id, owner) in registry.owners() {
            if !self.contexts.contains_key(&owner) {
                report.orphaned_services.push((owner, id));
            }
        }

        if !report.is_clean() {
            debug!(?report, "Isolation integrity check found violations");
        }
        report
    }

    fn context_mut(
        &self,
        chain_id: ChainId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, ChainId, ChainContext>, RouterError> {
        self.contexts.get_mut(&chain_id).ok_or_else(|| {
            RouterError::configuration(
                Some("chain_id"),
                format!("chain {} has no isolation context", chain_id),
            )
        })
    }
}

/// Result of [`ContextManager::verify_integrity`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub chains_checked: usize,
    pub reserved_key_violations: Vec<(ChainId, String)>,
    /// Context lists a service id the registry does not know
    pub dangling_handles: Vec<(ChainId, ServiceId)>,
    /// Context lists a service registered to another chain: (context, id, owner)
    pub foreign_handles: Vec<(ChainId, ServiceId, ChainId)>,
    /// Registry holds a service whose chain has no context
    pub orphaned_services: Vec<(ChainId, ServiceId)>,
    /// Context stored under a different chain id than its own: (key, context)
    pub chain_mismatches: Vec<(ChainId, ChainId)>,
    /// Expired cache entries awaiting purge; informational only
    pub expired_entries: usize,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.reserved_key_violations.is_empty()
            && self.dangling_handles.is_empty()
            && self.foreign_handles.is_empty()
            && self.orphaned_services.is_empty()
            && self.chain_mismatches.is_empty()
    }
}

/// Per-chain registry of live service handles, indexed by [`ServiceId`]
#[derive(Debug)]
pub struct ServiceRegistry<S> {
    services: DashMap<ServiceId, (ChainId, Arc<S>)>,
    next_id: AtomicU64,
}

impl<S> Default for ServiceRegistry<S> {
    fn default() -> Self {
        Self {
            services: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<S> ServiceRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, chain_id: ChainId, service: Arc<S>) -> ServiceId {
        let id = ServiceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.services.insert(id, (chain_id, service));
        id
    }

    /// Look up a service, only if it belongs to `chain_id`
    pub fn get(&self, chain_id: ChainId, id: ServiceId) -> Option<Arc<S>> {
        self.services
            .get(&id)
            .filter(|entry| entry.0 == chain_id)
            .map(|entry| Arc::clone(&entry.1))
    }

    pub fn owner_of(&self, id: ServiceId) -> Option<ChainId> {
        self.services.get(&id).map(|entry| entry.0)
    }

    fn owners(&self) -> Vec<(ServiceId, ChainId)> {
        self.services.iter().map(|e| (*e.key(), e.value().0)).collect()
    }

    /// Remove every service belonging to `chain_id`
    pub fn remove_chain(&self, chain_id: ChainId) -> Vec<Arc<S>> {
        let ids: Vec<ServiceId> = self
            .services
            .iter()
            .filter(|e| e.value().0 == chain_id)
            .map(|e| *e.key())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.services.remove(&id).map(|(_, (_, s))| s))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reserved_key_rejected_and_state_unchanged() {
        let contexts = ContextManager::new();
        contexts.create(1).unwrap();
        contexts.set_state(1, "note", json!("kept")).unwrap();

        for key in RESERVED_KEYS {
            let err = contexts.set_state(1, key, json!(1)).unwrap_err();
            assert!(matches!(err, RouterError::ConfigurationError { .. }));
            assert_eq!(contexts.get_state(1, key), None);
        }
        assert_eq!(contexts.get_state(1, "note"), Some(json!("kept")));
    }

    #[test]
    fn test_contexts_do_not_share_state() {
        let contexts = ContextManager::new();
        contexts.create(1).unwrap();
        contexts.create(137).unwrap();

        contexts.set_state(1, "gas_price", json!(30)).unwrap();
        assert_eq!(contexts.get_state(137, "gas_price"), None);

        contexts.record_request(1, false);
        assert_eq!(contexts.metrics(1).unwrap().error_count, 1);
        assert_eq!(contexts.metrics(137).unwrap().request_count, 0);
    }

    #[test]
    fn test_create_twice_fails_and_readd_is_fresh() {
        let contexts = ContextManager::new();
        contexts.create(1).unwrap();
        assert!(contexts.create(1).is_err());

        contexts.set_state(1, "note", json!(true)).unwrap();
        assert!(contexts.remove(1).is_some());
        assert!(contexts.set_state(1, "note", json!(true)).is_err());

        contexts.create(1).unwrap();
        assert_eq!(contexts.get_state(1, "note"), None);
    }

    #[test]
    fn test_clear_state_keeps_metrics() {
        let contexts = ContextManager::new();
        contexts.create(1).unwrap();
        contexts.set_state(1, "note", json!(1)).unwrap();
        contexts.cache_set(1, "k", json!(2), Duration::from_secs(10)).unwrap();
        contexts.record_request(1, true);

        contexts.clear_state(1).unwrap();
        assert_eq!(contexts.get_state(1, "note"), None);
        assert_eq!(contexts.cache_get(1, "k"), None);
        assert_eq!(contexts.metrics(1).unwrap().request_count, 1);
        assert!(contexts.clear_state(2).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entries_expire() {
        let contexts = ContextManager::new();
        contexts.create(1).unwrap();
        contexts
            .cache_set(1, "path:a:b:1", json!([1, 2]), Duration::from_millis(100))
            .unwrap();

        tokio::time::advance(Duration::from_millis(99)).await;
        assert_eq!(contexts.cache_get(1, "path:a:b:1"), Some(json!([1, 2])));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(contexts.cache_get(1, "path:a:b:1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let contexts = ContextManager::new();
        contexts.create(1).unwrap();
        contexts.cache_set(1, "a", json!(1), Duration::from_millis(10)).unwrap();
        contexts.cache_set(1, "b", json!(2), Duration::from_secs(10)).unwrap();

        assert_eq!(contexts.cache_len(1), 2);

        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(contexts.purge_expired(1), 1);
        assert_eq!(contexts.cache_len(1), 1);
        assert_eq!(contexts.cache_get(1, "b"), Some(json!(2)));
    }

    #[test]
    fn test_integrity_detects_dangling_and_orphaned_services() {
        let contexts = ContextManager::new();
        let registry: ServiceRegistry<String> = ServiceRegistry::new();
        contexts.create(1).unwrap();
        contexts.create(2).unwrap();

        let own = registry.register(1, Arc::new("registry".to_string()));
        contexts.attach_service(1, own).unwrap();
        assert!(contexts.verify_integrity(&registry).is_clean());

        // Service of chain 1 indexed from chain 2
        contexts.attach_service(2, own).unwrap();
        // Unknown id
        contexts.attach_service(2, ServiceId(999)).unwrap();
        // Service for a chain without a context
        let orphan = registry.register(42, Arc::new("stray".to_string()));

        let report = contexts.verify_integrity(&registry);
        assert!(!report.is_clean());
        assert_eq!(report.chains_checked, 2);
        assert_eq!(report.foreign_handles, vec![(2, own, 1)]);
        assert_eq!(report.dangling_handles, vec![(2, ServiceId(999))]);
        assert_eq!(report.orphaned_services, vec![(42, orphan)]);
    }

    #[test]
    fn test_registry_scoped_by_chain() {
        let registry: ServiceRegistry<u32> = ServiceRegistry::new();
        let id = registry.register(1, Arc::new(7));
        assert_eq!(registry.get(1, id).as_deref(), Some(&7));
        assert!(registry.get(2, id).is_none());

        registry.register(1, Arc::new(8));
        registry.register(2, Arc::new(9));
        assert_eq!(registry.remove_chain(1).len(), 2);
        assert_eq!(registry.len(), 1);
    }
}
