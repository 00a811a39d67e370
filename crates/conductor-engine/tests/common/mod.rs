#![allow(dead_code)]

use conductor_core::{EngineConfig, NodeExecution, PlanExecution, Status};
use conductor_engine::observers::BuiltinObserver;
use conductor_engine::test_support::init_tracing;
use conductor_engine::{CompiledPlan, ExecutionEngine};

pub const PLAN: &str = "plan-1";

pub fn engine() -> ExecutionEngine {
    engine_with_order(BuiltinObserver::DEFAULT_ORDER.to_vec())
}

pub fn engine_with_order(order: Vec<BuiltinObserver>) -> ExecutionEngine {
    init_tracing();
    ExecutionEngine::builder(EngineConfig::default())
        .with_observer_order(order)
        .build()
        .expect("engine should build from the default config")
}

pub fn node(id: &str, parent: Option<&str>) -> NodeExecution {
    let node = NodeExecution::new(id, PLAN).with_status(Status::Running);
    match parent {
        Some(parent) => node.with_parent(parent),
        None => node,
    }
}

/// pipeline -> stage -> the given steps, everything running.
pub fn pipeline_with_steps(steps: &[&str]) -> CompiledPlan {
    let mut nodes = vec![
        node("pipeline", None).with_step_type("PIPELINE"),
        node("stage", Some("pipeline")).with_step_type("STAGE"),
    ];
    nodes.extend(steps.iter().map(|step| node(step, Some("stage")).with_step_type("SHELL_SCRIPT")));
    CompiledPlan {
        plan: PlanExecution::new(PLAN, "build-and-deploy"),
        nodes,
    }
}

pub async fn started(steps: &[&str]) -> ExecutionEngine {
    let engine = engine();
    engine
        .start_plan(pipeline_with_steps(steps))
        .await
        .expect("plan should start");
    engine
}

pub async fn status_of(engine: &ExecutionEngine, node_execution_id: &str) -> Status {
    engine
        .nodes()
        .get_status(node_execution_id)
        .await
        .expect("node should exist")
}

pub async fn plan_status(engine: &ExecutionEngine) -> Status {
    engine.plans().get_status(PLAN).await.expect("plan should exist")
}
