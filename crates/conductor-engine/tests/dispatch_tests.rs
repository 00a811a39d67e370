use anyhow::Result;
use async_trait::async_trait;
use conductor_core::{
    EngineError, InMemoryExecutionStore, NodeExecution, NodeExecutionStore, PlanExecution, PlanExecutionStore, Status,
};
use conductor_engine::test_support::init_tracing;
use conductor_engine::{
    GraphCache, GraphGenerationService, GraphUpdateDispatcher, GraphUpdateHandler, OrchestrationGraph,
};
use conductor_events::{BatchHandler, OrchestrationEventType, OrchestrationLogEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Graph dispatch tests
/// Covers per-plan deduplication within a batch and pool backpressure

/// Cache that never hits, counts lookups and holds each lookup until the
/// gate has a permit.
struct CountingCache {
    lookups: AtomicUsize,
    gate: Semaphore,
}

impl CountingCache {
    fn open() -> Self {
        Self {
            lookups: AtomicUsize::new(0),
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
        }
    }

    fn closed() -> Self {
        Self {
            lookups: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphCache for CountingCache {
    async fn get(&self, _plan_execution_id: &str) -> conductor_core::Result<Option<Arc<OrchestrationGraph>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| EngineError::internal(e.to_string()))?;
        Ok(None)
    }

    async fn put(&self, _graph: Arc<OrchestrationGraph>, _ttl: Duration) -> conductor_core::Result<()> {
        Ok(())
    }
}

async fn graphs(cache: Arc<CountingCache>, plans: &[&str]) -> Result<Arc<GraphGenerationService>> {
    init_tracing();
    let store = Arc::new(InMemoryExecutionStore::new());
    for plan in plans {
        store.insert_plan(PlanExecution::new(*plan, "build")).await?;
        store
            .insert_node(NodeExecution::new(format!("{plan}-root"), *plan).with_status(Status::Running))
            .await?;
    }
    Ok(Arc::new(GraphGenerationService::new(
        store.clone(),
        store,
        cache,
        Duration::from_secs(60),
    )))
}

fn event(plan_execution_id: &str) -> OrchestrationLogEvent {
    OrchestrationLogEvent::new(plan_execution_id, OrchestrationEventType::NodeExecutionStatusUpdate)
}

#[tokio::test]
async fn test_batch_dispatches_once_per_plan() -> Result<()> {
    let cache = Arc::new(CountingCache::open());
    let dispatcher = Arc::new(GraphUpdateDispatcher::new(
        graphs(cache.clone(), &["plan-a", "plan-b"]).await?,
        4,
        Duration::from_secs(1),
    ));
    let handler = GraphUpdateHandler::new(dispatcher.clone());

    handler
        .process(vec![
            event("plan-a"),
            event("plan-a"),
            event("plan-b"),
            event("plan-a"),
            event("plan-b"),
        ])
        .await?;

    tokio::time::timeout(Duration::from_secs(2), async {
        while cache.lookups() < 2 || dispatcher.available_permits() < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.lookups(), 2);
    Ok(())
}

#[tokio::test]
async fn test_saturated_pool_holds_back_submission() -> Result<()> {
    let cache = Arc::new(CountingCache::closed());
    let dispatcher = GraphUpdateDispatcher::new(graphs(cache.clone(), &["plan-a"]).await?, 1, Duration::from_secs(1));

    let first = dispatcher
        .dispatch("plan-a".to_string())
        .await
        .expect("pool is open");
    assert_eq!(dispatcher.available_permits(), 0);

    let second = dispatcher.dispatch("plan-a".to_string());
    tokio::pin!(second);
    assert!(tokio::time::timeout(Duration::from_millis(50), &mut second).await.is_err());

    cache.gate.add_permits(Semaphore::MAX_PERMITS);
    let second = tokio::time::timeout(Duration::from_secs(2), second)
        .await?
        .expect("pool is open");
    first.await?;
    second.await?;
    assert_eq!(cache.lookups(), 2);
    assert_eq!(dispatcher.available_permits(), 1);
    Ok(())
}

#[tokio::test]
async fn test_closed_pool_rejects_dispatch() -> Result<()> {
    let cache = Arc::new(CountingCache::open());
    let dispatcher = GraphUpdateDispatcher::new(graphs(cache, &["plan-a"]).await?, 1, Duration::from_secs(1));
    dispatcher.close();
    assert!(dispatcher.dispatch("plan-a".to_string()).await.is_none());
    Ok(())
}
