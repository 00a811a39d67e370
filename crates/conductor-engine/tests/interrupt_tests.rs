mod common;

use anyhow::Result;
use async_trait::async_trait;
use common::{plan_status, started, status_of, PLAN};
use conductor_core::{
    EngineConfig, EngineError, InMemoryExecutionStore, Interrupt, InterruptState, InterruptStore, InterruptType,
    IssuedBy, NodeExecution, NodeExecutionStore, NodeTransition, NodeUpdateOp, PlanExecution, PlanExecutionStore,
    PlanTransition, Status,
};
use conductor_engine::test_support::init_tracing;
use conductor_engine::{CompiledPlan, ExecutionEngine};
use std::time::Duration;

fn manual(interrupt_type: InterruptType) -> Interrupt {
    Interrupt::new(interrupt_type, PLAN, IssuedBy::manual("operator@example.com"))
}

#[tokio::test]
async fn test_retry_replaces_failed_node_and_completes_with_it() -> Result<()> {
    let engine = started(&["step"]).await;
    engine.nodes().update_status("step", Status::Failed, &[]).await?;

    let interrupt = engine
        .interrupt_manager()
        .issue(manual(InterruptType::Retry).for_node("step"))
        .await?;
    assert_eq!(interrupt.state, InterruptState::Processing);

    let old = engine.nodes().get("step").await?;
    assert!(old.old_retry);
    assert_eq!(old.status, Status::Failed);

    let current = engine.nodes().fetch_plan_nodes(PLAN).await?;
    assert!(current.iter().all(|node| node.id != "step"));
    let replacement = current
        .iter()
        .find(|node| node.retry_ids == vec!["step".to_string()])
        .expect("replacement execution");
    assert_eq!(replacement.status, Status::Queued);
    assert_eq!(replacement.parent_id.as_deref(), Some("stage"));
    assert_eq!(replacement.identifier, old.identifier);
    assert_eq!(replacement.interrupt_histories.len(), 1);
    assert_eq!(replacement.interrupt_histories[0].interrupt_id, interrupt.id);

    engine
        .nodes()
        .update_status(&replacement.id, Status::Running, &[Status::Queued])
        .await?;
    assert_eq!(
        engine.interrupts().get(&interrupt.id).await?.state,
        InterruptState::Processing
    );

    engine
        .nodes()
        .update_status(&replacement.id, Status::Succeeded, &[Status::Running])
        .await?;
    assert_eq!(
        engine.interrupts().get(&interrupt.id).await?.state,
        InterruptState::ProcessedSuccessfully
    );
    Ok(())
}

#[tokio::test]
async fn test_retry_of_successful_node_is_rejected() -> Result<()> {
    let engine = started(&["step"]).await;
    engine.nodes().update_status("step", Status::Succeeded, &[]).await?;

    let interrupt = engine
        .interrupt_manager()
        .issue(manual(InterruptType::Retry).for_node("step"))
        .await?;
    assert_eq!(interrupt.state, InterruptState::ProcessedUnsuccessfully);
    assert!(!engine.nodes().get("step").await?.old_retry);
    assert_eq!(engine.nodes().fetch_plan_nodes(PLAN).await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_retry_without_target_node_is_invalid() {
    let engine = started(&["step"]).await;
    let err = engine
        .interrupt_manager()
        .issue(manual(InterruptType::Retry))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest { .. }));
    assert!(engine.interrupts().fetch_for_plan(PLAN).await.expect("fetch").is_empty());
}

#[tokio::test]
async fn test_interrupt_for_unknown_node_is_rejected() {
    let engine = started(&["step"]).await;
    let err = engine
        .interrupt_manager()
        .issue(manual(InterruptType::Pause).for_node("ghost"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_plan_abort_aborts_every_active_node() -> Result<()> {
    let engine = started(&["step-1", "step-2"]).await;
    engine.nodes().update_status("step-1", Status::Succeeded, &[]).await?;

    let interrupt = engine.interrupt_manager().issue(manual(InterruptType::Abort)).await?;
    assert_eq!(interrupt.state, InterruptState::ProcessedSuccessfully);

    assert_eq!(status_of(&engine, "step-1").await, Status::Succeeded);
    for id in ["step-2", "stage", "pipeline"] {
        assert_eq!(status_of(&engine, id).await, Status::Aborted, "{id}");
    }
    let aborted = engine.nodes().get("step-2").await?;
    assert_eq!(aborted.interrupt_histories.len(), 1);
    assert_eq!(aborted.interrupt_histories[0].interrupt_type, InterruptType::Abort);
    assert_eq!(plan_status(&engine).await, Status::Aborted);
    Ok(())
}

#[tokio::test]
async fn test_node_abort_covers_its_subtree_only() -> Result<()> {
    let engine = started(&["step-1", "step-2"]).await;

    engine
        .interrupt_manager()
        .issue(manual(InterruptType::Abort).for_node("step-1"))
        .await?;
    assert_eq!(status_of(&engine, "step-1").await, Status::Aborted);
    assert_eq!(status_of(&engine, "step-2").await, Status::Running);
    assert_eq!(plan_status(&engine).await, Status::Running);
    Ok(())
}

#[tokio::test]
async fn test_pause_interrupt_records_effect_and_bubbles() -> Result<()> {
    let engine = started(&["step"]).await;

    let interrupt = engine
        .interrupt_manager()
        .issue(manual(InterruptType::Pause).for_node("step"))
        .await?;
    assert_eq!(interrupt.state, InterruptState::ProcessedSuccessfully);

    let step = engine.nodes().get("step").await?;
    assert_eq!(step.status, Status::Paused);
    assert_eq!(step.interrupt_histories[0].interrupt_id, interrupt.id);
    assert_eq!(plan_status(&engine).await, Status::Paused);

    let resume = engine
        .interrupt_manager()
        .issue(manual(InterruptType::Resume).for_node("step"))
        .await?;
    assert_eq!(resume.state, InterruptState::ProcessedSuccessfully);
    assert_eq!(status_of(&engine, "pipeline").await, Status::Running);
    assert_eq!(engine.nodes().get("step").await?.interrupt_histories.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_plan_pause_targets_leaves() -> Result<()> {
    let engine = started(&["step-1", "step-2"]).await;

    engine.interrupt_manager().issue(manual(InterruptType::Pause)).await?;
    for id in ["step-1", "step-2", "stage", "pipeline"] {
        assert_eq!(status_of(&engine, id).await, Status::Paused, "{id}");
    }
    assert!(engine.nodes().get("stage").await?.interrupt_histories.is_empty());
    assert_eq!(plan_status(&engine).await, Status::Paused);
    Ok(())
}

#[tokio::test]
async fn test_pause_of_finished_node_is_unsuccessful() -> Result<()> {
    let engine = started(&["step"]).await;
    engine.nodes().update_status("step", Status::Succeeded, &[]).await?;

    let interrupt = engine
        .interrupt_manager()
        .issue(manual(InterruptType::Pause).for_node("step"))
        .await?;
    assert_eq!(interrupt.state, InterruptState::ProcessedUnsuccessfully);
    Ok(())
}

#[tokio::test]
async fn test_custom_interrupt_leaves_executions_alone() -> Result<()> {
    let engine = started(&["step"]).await;

    let interrupt = engine
        .interrupt_manager()
        .issue(Interrupt::new(InterruptType::Custom, PLAN, IssuedBy::system("scheduler")))
        .await?;
    assert_eq!(interrupt.state, InterruptState::ProcessedSuccessfully);
    assert_eq!(status_of(&engine, "step").await, Status::Running);
    Ok(())
}

#[tokio::test]
async fn test_active_interrupts_exclude_processed_ones() -> Result<()> {
    let engine = started(&["step-1", "step-2"]).await;
    engine.nodes().update_status("step-1", Status::Failed, &[]).await?;

    let retry = engine
        .interrupt_manager()
        .issue(manual(InterruptType::Retry).for_node("step-1"))
        .await?;
    engine
        .interrupt_manager()
        .issue(manual(InterruptType::Custom))
        .await?;

    assert_eq!(engine.interrupts().fetch_for_plan(PLAN).await?.len(), 2);
    let active = engine.interrupts().fetch_active_for_plan(PLAN).await?;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, retry.id);
    Ok(())
}

#[tokio::test]
async fn test_processed_interrupt_is_never_reopened() -> Result<()> {
    let engine = started(&["step"]).await;
    let interrupt = engine
        .interrupt_manager()
        .issue(manual(InterruptType::Custom))
        .await?;

    assert!(engine
        .interrupts()
        .mark_processed(&interrupt.id, InterruptState::ProcessedUnsuccessfully)
        .await?
        .is_none());
    assert!(engine.interrupts().mark_processing(&interrupt.id).await?.is_none());
    assert!(engine
        .interrupts()
        .mark_processed(&interrupt.id, InterruptState::Registered)
        .await
        .is_err());
    Ok(())
}

/// Store whose node reads are slow, so concurrent handlers interleave
/// between reading a node and writing it.
#[derive(Default)]
struct SlowReadStore {
    inner: InMemoryExecutionStore,
}

#[async_trait]
impl NodeExecutionStore for SlowReadStore {
    async fn insert_node(&self, node: NodeExecution) -> conductor_core::Result<NodeExecution> {
        self.inner.insert_node(node).await
    }

    async fn get_node(&self, node_execution_id: &str) -> conductor_core::Result<NodeExecution> {
        let node = self.inner.get_node(node_execution_id).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        node
    }

    async fn update_node_status(
        &self,
        node_execution_id: &str,
        status: Status,
        ops: &[NodeUpdateOp],
        allowed: &[Status],
    ) -> conductor_core::Result<Option<NodeTransition>> {
        self.inner.update_node_status(node_execution_id, status, ops, allowed).await
    }

    async fn mark_retried_if(
        &self,
        node_execution_id: &str,
        allowed: &[Status],
    ) -> conductor_core::Result<Option<NodeExecution>> {
        self.inner.mark_retried_if(node_execution_id, allowed).await
    }

    async fn update_node(
        &self,
        node_execution_id: &str,
        ops: &[NodeUpdateOp],
    ) -> conductor_core::Result<Option<NodeExecution>> {
        self.inner.update_node(node_execution_id, ops).await
    }

    async fn fetch_children(&self, parent_id: &str) -> conductor_core::Result<Vec<NodeExecution>> {
        self.inner.fetch_children(parent_id).await
    }

    async fn fetch_plan_nodes(
        &self,
        plan_execution_id: &str,
        include_old_retries: bool,
    ) -> conductor_core::Result<Vec<NodeExecution>> {
        self.inner.fetch_plan_nodes(plan_execution_id, include_old_retries).await
    }
}

#[async_trait]
impl PlanExecutionStore for SlowReadStore {
    async fn insert_plan(&self, plan: PlanExecution) -> conductor_core::Result<PlanExecution> {
        self.inner.insert_plan(plan).await
    }

    async fn get_plan(&self, plan_execution_id: &str) -> conductor_core::Result<PlanExecution> {
        self.inner.get_plan(plan_execution_id).await
    }

    async fn update_plan_status(
        &self,
        plan_execution_id: &str,
        status: Status,
        allowed: &[Status],
    ) -> conductor_core::Result<Option<PlanTransition>> {
        self.inner.update_plan_status(plan_execution_id, status, allowed).await
    }
}

#[async_trait]
impl InterruptStore for SlowReadStore {
    async fn insert_interrupt(&self, interrupt: Interrupt) -> conductor_core::Result<Interrupt> {
        self.inner.insert_interrupt(interrupt).await
    }

    async fn get_interrupt(&self, interrupt_id: &str) -> conductor_core::Result<Interrupt> {
        self.inner.get_interrupt(interrupt_id).await
    }

    async fn update_interrupt_state(
        &self,
        interrupt_id: &str,
        state: InterruptState,
        allowed: &[InterruptState],
    ) -> conductor_core::Result<Option<Interrupt>> {
        self.inner.update_interrupt_state(interrupt_id, state, allowed).await
    }

    async fn fetch_interrupts(&self, plan_execution_id: &str) -> conductor_core::Result<Vec<Interrupt>> {
        self.inner.fetch_interrupts(plan_execution_id).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_retries_supersede_once() -> Result<()> {
    init_tracing();
    let engine = ExecutionEngine::builder(EngineConfig::default())
        .with_store(std::sync::Arc::new(SlowReadStore::default()))
        .build()?;
    engine
        .start_plan(CompiledPlan {
            plan: PlanExecution::new(PLAN, "single"),
            nodes: vec![NodeExecution::new("root", PLAN).with_status(Status::Running)],
        })
        .await?;
    engine.nodes().update_status("root", Status::Failed, &[]).await?;

    let manager = engine.interrupt_manager();
    let (first, second) = tokio::join!(
        manager.issue(manual(InterruptType::Retry).for_node("root")),
        manager.issue(manual(InterruptType::Retry).for_node("root")),
    );
    let states = [first?.state, second?.state];
    assert!(states.contains(&InterruptState::Processing), "{states:?}");
    assert!(states.contains(&InterruptState::ProcessedUnsuccessfully), "{states:?}");

    let roots = engine.nodes().fetch_roots(PLAN).await?;
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].retry_ids, vec!["root".to_string()]);
    let graph = engine.graphs().generate_graph(PLAN).await?;
    assert_eq!(graph.root_node_id, roots[0].id);
    Ok(())
}
