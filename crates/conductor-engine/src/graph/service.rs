use super::cache::GraphCache;
use super::model::{build_graph, OrchestrationGraph};
use conductor_core::{EngineError, NodeExecutionStore, PlanExecutionStore, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Fire-and-forget background work that reports its own failure.
pub struct DetachedTask;

impl DetachedTask {
    pub fn spawn<F>(name: &'static str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = future.await {
                error!(task = name, error = %e, "Detached task failed");
            }
        })
    }
}

/// Builds execution graphs and serves them from cache while they are fresh.
pub struct GraphGenerationService {
    plans: Arc<dyn PlanExecutionStore>,
    nodes: Arc<dyn NodeExecutionStore>,
    cache: Arc<dyn GraphCache>,
    retention: Duration,
}

impl GraphGenerationService {
    pub fn new(
        plans: Arc<dyn PlanExecutionStore>,
        nodes: Arc<dyn NodeExecutionStore>,
        cache: Arc<dyn GraphCache>,
        retention: Duration,
    ) -> Self {
        Self {
            plans,
            nodes,
            cache,
            retention,
        }
    }

    /// Returns the graph of a plan execution, rebuilding it when any of its
    /// node executions changed since the cached copy was built.
    ///
    /// A rebuilt graph is written back in the background; the caller never
    /// waits for, or sees the outcome of, that write.
    pub async fn generate_graph(&self, plan_execution_id: &str) -> Result<Arc<OrchestrationGraph>> {
        let plan = self.plans.get_plan(plan_execution_id).await?;
        let nodes = self.nodes.fetch_plan_nodes(plan_execution_id, false).await?;
        let Some(watermark) = nodes.iter().map(|node| node.last_updated_at).max() else {
            return Err(EngineError::no_nodes_found(plan_execution_id));
        };

        match self.cache.get(plan_execution_id).await {
            Ok(Some(cached)) if cached.is_fresh(watermark) => {
                debug!(plan_execution_id, watermark, "Graph served from cache");
                return Ok(cached);
            }
            Ok(_) => {}
            Err(e) => debug!(plan_execution_id, error = %e, "Graph cache read failed, rebuilding"),
        }

        let graph = Arc::new(build_graph(&plan, &nodes, watermark)?);
        info!(
            plan_execution_id,
            watermark,
            vertices = graph.vertex_count(),
            "Graph generated"
        );

        let cache = self.cache.clone();
        let retention = self.retention;
        let to_store = graph.clone();
        DetachedTask::spawn("graph_cache_write", async move { cache.put(to_store, retention).await });

        Ok(graph)
    }

    /// The cached graph, without building one.
    pub async fn cached_graph(&self, plan_execution_id: &str) -> Result<Option<Arc<OrchestrationGraph>>> {
        self.cache.get(plan_execution_id).await
    }
}
