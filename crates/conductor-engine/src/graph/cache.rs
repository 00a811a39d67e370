use super::model::OrchestrationGraph;
use async_trait::async_trait;
use conductor_core::config::GraphConfig;
use conductor_core::Result;
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Storage for generated graphs, keyed by plan execution id.
#[async_trait]
pub trait GraphCache: Send + Sync {
    async fn get(&self, plan_execution_id: &str) -> Result<Option<Arc<OrchestrationGraph>>>;

    /// Stores `graph`; it is evicted once untouched for `ttl`.
    async fn put(&self, graph: Arc<OrchestrationGraph>, ttl: Duration) -> Result<()>;
}

#[derive(Clone)]
struct CachedGraph {
    graph: Arc<OrchestrationGraph>,
    ttl: Duration,
}

/// Idle-based expiry: every write or read restarts the entry's clock.
struct IdleExpiry;

impl Expiry<String, CachedGraph> for IdleExpiry {
    fn expire_after_create(&self, _key: &String, value: &CachedGraph, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_read(
        &self,
        _key: &String,
        value: &CachedGraph,
        _read_at: Instant,
        _duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedGraph,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process [`GraphCache`] backed by `moka`.
pub struct MokaGraphCache {
    cache: Cache<String, CachedGraph>,
}

impl MokaGraphCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(capacity).expire_after(IdleExpiry).build(),
        }
    }

    pub fn from_config(config: &GraphConfig) -> Self {
        Self::new(config.cache_capacity)
    }

    pub async fn invalidate(&self, plan_execution_id: &str) {
        self.cache.invalidate(plan_execution_id).await;
    }
}

#[async_trait]
impl GraphCache for MokaGraphCache {
    async fn get(&self, plan_execution_id: &str) -> Result<Option<Arc<OrchestrationGraph>>> {
        Ok(self.cache.get(plan_execution_id).await.map(|cached| cached.graph))
    }

    async fn put(&self, graph: Arc<OrchestrationGraph>, ttl: Duration) -> Result<()> {
        let key = graph.plan_execution_id.clone();
        self.cache.insert(key, CachedGraph { graph, ttl }).await;
        Ok(())
    }
}
