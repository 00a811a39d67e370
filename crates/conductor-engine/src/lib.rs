//! Execution engine: node and plan services, status-update observers,
//! interrupts, execution graphs and the graph-update consumer.

pub mod dispatcher;
pub mod engine;
pub mod graph;
pub mod graph_consumer;
pub mod interrupts;
pub mod node_service;
pub mod observers;
pub mod plan_service;
pub mod test_support;

pub use dispatcher::GraphUpdateDispatcher;
pub use engine::{CompiledPlan, ExecutionEngine, ExecutionEngineBuilder, PlanCompiler};
pub use graph::{GraphCache, GraphGenerationService, GraphVertex, MokaGraphCache, OrchestrationGraph};
pub use graph_consumer::GraphUpdateHandler;
pub use interrupts::{InterruptManager, InterruptService};
pub use node_service::{NodeExecutionService, TransitionGuard};
pub use observers::{
    BuiltinObserver, NodeStatusUpdateObserver, NodeUpdateInfo, ObserverRegistry, PlanStatusUpdateObserver,
};
pub use plan_service::PlanExecutionService;
