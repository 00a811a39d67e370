mod common;

use anyhow::Result;
use common::{engine, started, PLAN};
use conductor_core::{BusMessage, EngineError, EventCategory, PlanExecution, Status};
use conductor_engine::OrchestrationGraph;
use std::sync::Arc;
use std::time::Duration;

/// Graph update pipeline tests
/// Status changes flow through the orchestration topic into the graph cache

const ORCHESTRATION_TOPIC: &str = "pms:orchestration_event";

async fn wait_for_graph(engine: &conductor_engine::ExecutionEngine, watermark: i64) -> Arc<OrchestrationGraph> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(Some(graph)) = engine.graphs().cached_graph(PLAN).await {
                if graph.cache_context_order == watermark {
                    return graph;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("graph should be cached in time")
}

#[tokio::test]
async fn test_status_update_refreshes_cached_graph() -> Result<()> {
    let engine = started(&["step-1", "step-2"]).await;
    engine
        .nodes()
        .update_status("step-1", Status::Succeeded, &[Status::Running])
        .await?;
    assert!(engine.bus().topic_len(ORCHESTRATION_TOPIC).await >= 2);

    let consumer = engine.graph_consumer()?;
    assert_eq!(consumer.topic(), ORCHESTRATION_TOPIC);
    let outcome = consumer.poll_once().await?;
    assert!(outcome.received >= 2);
    assert_eq!(outcome.dropped, 0);

    let watermark = engine.nodes().max_last_updated(PLAN).await?.expect("nodes exist");
    let graph = wait_for_graph(&engine, watermark).await;
    assert_eq!(graph.plan_execution_id, PLAN);
    assert_eq!(graph.root_node_id, "pipeline");
    assert_eq!(graph.vertex_count(), 4);
    let step = graph.find_vertex("step-1").expect("step vertex");
    assert_eq!(step.status, Status::Succeeded);

    engine
        .nodes()
        .update_status("step-2", Status::Failed, &[Status::Running])
        .await?;
    consumer.poll_once().await?;
    let watermark = engine.nodes().max_last_updated(PLAN).await?.expect("nodes exist");
    let graph = wait_for_graph(&engine, watermark).await;
    assert_eq!(graph.find_vertex("step-2").expect("step vertex").status, Status::Failed);
    Ok(())
}

#[tokio::test]
async fn test_malformed_orchestration_event_is_dropped() -> Result<()> {
    let engine = started(&["step"]).await;
    engine
        .bus()
        .publish(
            ORCHESTRATION_TOPIC,
            1_000,
            BusMessage::new(EventCategory::Orchestration, "pms", b"not json".to_vec()),
        )
        .await?;

    let consumer = engine.graph_consumer()?;
    let outcome = consumer.poll_once().await?;
    assert_eq!(outcome.dropped, 1);
    assert!(outcome.received > outcome.dropped);

    let empty = consumer.poll_once();
    let outcome = tokio::time::timeout(Duration::from_secs(5), empty).await??;
    assert_eq!(outcome.received, 0);
    Ok(())
}

#[tokio::test]
async fn test_graph_for_plan_without_nodes() -> Result<()> {
    let engine = engine();
    engine.plans().insert(PlanExecution::new(PLAN, "empty")).await?;

    let err = engine.graphs().generate_graph(PLAN).await.unwrap_err();
    assert!(matches!(err, EngineError::NoNodesFound { .. }));
    assert_eq!(err.to_string(), format!("No nodes found for plan execution {PLAN}"));
    Ok(())
}

#[tokio::test]
async fn test_consumer_stops_on_engine_shutdown() -> Result<()> {
    let engine = started(&["step"]).await;
    let consumer = engine.graph_consumer()?;

    engine.shutdown();
    let stats = tokio::time::timeout(Duration::from_secs(5), consumer.run()).await?;
    assert_eq!(stats.batches, 0);
    Ok(())
}
