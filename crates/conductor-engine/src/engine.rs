use crate::dispatcher::GraphUpdateDispatcher;
use crate::graph::{GraphCache, GraphGenerationService, MokaGraphCache};
use crate::graph_consumer::GraphUpdateHandler;
use crate::interrupts::{InterruptManager, InterruptService};
use crate::node_service::{NodeExecutionService, TransitionGuard};
use crate::observers::{
    ApprovalWaitObserver, BuiltinObserver, LicenseLimitObserver, NodeStatusUpdateObserver, OrchestrationLogPublisher,
    PauseObserver, ResumeObserver, TerminalCleanupObserver,
};
use crate::plan_service::PlanExecutionService;
use async_trait::async_trait;
use conductor_core::{
    EngineConfig, EngineError, InMemoryExecutionStore, InterruptStore, NodeExecution, NodeExecutionStore,
    PlanExecution, PlanExecutionStore, Result, Status,
};
use conductor_events::{
    producer_cache, BusProducerRegistry, EventBus, EventConsumer, EventRouter, EventSender, InMemoryBus,
    MaintenanceMode, ProducerRegistry,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A plan handed over by the plan compiler: the plan record plus its
/// initial node executions.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPlan {
    pub plan: PlanExecution,
    pub nodes: Vec<NodeExecution>,
}

/// Produces the initial execution tree of a plan.
#[async_trait]
pub trait PlanCompiler: Send + Sync {
    async fn compile(&self, plan_execution_id: &str) -> Result<CompiledPlan>;
}

pub struct ExecutionEngineBuilder {
    config: EngineConfig,
    node_store: Option<Arc<dyn NodeExecutionStore>>,
    plan_store: Option<Arc<dyn PlanExecutionStore>>,
    interrupt_store: Option<Arc<dyn InterruptStore>>,
    bus: Option<Arc<dyn EventBus>>,
    producer_registry: Option<Arc<dyn ProducerRegistry>>,
    graph_cache: Option<Arc<dyn GraphCache>>,
    guards: Vec<Arc<dyn TransitionGuard>>,
    observer_order: Vec<BuiltinObserver>,
    extra_observers: Vec<Arc<dyn NodeStatusUpdateObserver>>,
    shutdown: Option<CancellationToken>,
}

impl ExecutionEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            node_store: None,
            plan_store: None,
            interrupt_store: None,
            bus: None,
            producer_registry: None,
            graph_cache: None,
            guards: Vec::new(),
            observer_order: BuiltinObserver::DEFAULT_ORDER.to_vec(),
            extra_observers: Vec::new(),
            shutdown: None,
        }
    }

    /// Uses one backend for plans, nodes and interrupts.
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: NodeExecutionStore + PlanExecutionStore + InterruptStore + 'static,
    {
        self.node_store = Some(store.clone());
        self.plan_store = Some(store.clone());
        self.interrupt_store = Some(store);
        self
    }

    pub fn with_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_producer_registry(mut self, registry: Arc<dyn ProducerRegistry>) -> Self {
        self.producer_registry = Some(registry);
        self
    }

    pub fn with_graph_cache(mut self, cache: Arc<dyn GraphCache>) -> Self {
        self.graph_cache = Some(cache);
        self
    }

    pub fn with_guard(mut self, guard: Arc<dyn TransitionGuard>) -> Self {
        self.guards.push(guard);
        self
    }

    /// Registers the built-in observers in `order` instead of the default one.
    pub fn with_observer_order(mut self, order: Vec<BuiltinObserver>) -> Self {
        self.observer_order = order;
        self
    }

    /// Registers an additional observer after the built-in ones.
    pub fn with_observer(mut self, observer: Arc<dyn NodeStatusUpdateObserver>) -> Self {
        self.extra_observers.push(observer);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn build(self) -> Result<ExecutionEngine> {
        self.config.validate()?;

        let default_store = Arc::new(InMemoryExecutionStore::new());
        let node_store = self.node_store.unwrap_or_else(|| default_store.clone());
        let plan_store = self.plan_store.unwrap_or_else(|| default_store.clone());
        let interrupt_store = self.interrupt_store.unwrap_or_else(|| default_store.clone());

        let bus = self
            .bus
            .unwrap_or_else(|| Arc::new(InMemoryBus::new(self.config.bus.redelivery_timeout())));
        let registry = self
            .producer_registry
            .unwrap_or_else(|| Arc::new(BusProducerRegistry::new(bus.clone())));
        let router = EventRouter::from_config(&self.config.topics, &self.config.producer);
        let sender = Arc::new(EventSender::new(
            router,
            registry,
            producer_cache(&self.config.producer),
            &self.config.producer,
        ));

        let plans = Arc::new(PlanExecutionService::new(plan_store.clone(), node_store.clone()));
        let nodes = Arc::new(NodeExecutionService::new(node_store.clone(), self.guards));
        let interrupts = Arc::new(InterruptService::new(
            interrupt_store,
            plan_store.clone(),
            node_store.clone(),
        ));
        let interrupt_manager = Arc::new(InterruptManager::new(interrupts.clone(), nodes.clone(), plans.clone()));

        let publisher = Arc::new(OrchestrationLogPublisher::new(
            sender.clone(),
            self.config.app.orchestration_service.clone(),
        ));
        plans.observers().register(publisher.clone());
        for observer in &self.observer_order {
            let observer: Arc<dyn NodeStatusUpdateObserver> = match observer {
                BuiltinObserver::ApprovalWait => Arc::new(ApprovalWaitObserver::new(plans.clone())),
                BuiltinObserver::Pause => Arc::new(PauseObserver::new(Arc::downgrade(&nodes), plans.clone())),
                BuiltinObserver::Resume => Arc::new(ResumeObserver::new(Arc::downgrade(&nodes), plans.clone())),
                BuiltinObserver::LicenseLimit => Arc::new(LicenseLimitObserver::new(plans.clone())),
                BuiltinObserver::TerminalCleanup => Arc::new(TerminalCleanupObserver::new(interrupts.clone())),
                BuiltinObserver::OrchestrationLog => publisher.clone(),
            };
            nodes.observers().register(observer);
        }
        for observer in self.extra_observers {
            nodes.observers().register(observer);
        }

        let graph_cache = self
            .graph_cache
            .unwrap_or_else(|| Arc::new(MokaGraphCache::from_config(&self.config.graph)));
        let graphs = Arc::new(GraphGenerationService::new(
            plan_store,
            node_store,
            graph_cache,
            self.config.graph.retention(),
        ));
        let dispatcher = Arc::new(GraphUpdateDispatcher::from_config(graphs.clone(), &self.config.consumer));

        info!(
            observers = ?nodes.observers().names(),
            orchestration_service = %self.config.app.orchestration_service,
            "Execution engine built"
        );

        Ok(ExecutionEngine {
            config: self.config,
            bus,
            sender,
            plans,
            nodes,
            interrupts,
            interrupt_manager,
            graphs,
            dispatcher,
            shutdown: self.shutdown.unwrap_or_default(),
            maintenance: MaintenanceMode::new(),
        })
    }
}

/// Wires the Status Store, observers, interrupts, eventing and the graph
/// service together.
pub struct ExecutionEngine {
    config: EngineConfig,
    bus: Arc<dyn EventBus>,
    sender: Arc<EventSender>,
    plans: Arc<PlanExecutionService>,
    nodes: Arc<NodeExecutionService>,
    interrupts: Arc<InterruptService>,
    interrupt_manager: Arc<InterruptManager>,
    graphs: Arc<GraphGenerationService>,
    dispatcher: Arc<GraphUpdateDispatcher>,
    shutdown: CancellationToken,
    maintenance: MaintenanceMode,
}

impl ExecutionEngine {
    pub fn builder(config: EngineConfig) -> ExecutionEngineBuilder {
        ExecutionEngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn sender(&self) -> &Arc<EventSender> {
        &self.sender
    }

    pub fn plans(&self) -> &Arc<PlanExecutionService> {
        &self.plans
    }

    pub fn nodes(&self) -> &Arc<NodeExecutionService> {
        &self.nodes
    }

    pub fn interrupts(&self) -> &Arc<InterruptService> {
        &self.interrupts
    }

    pub fn interrupt_manager(&self) -> &Arc<InterruptManager> {
        &self.interrupt_manager
    }

    pub fn graphs(&self) -> &Arc<GraphGenerationService> {
        &self.graphs
    }

    pub fn maintenance(&self) -> &MaintenanceMode {
        &self.maintenance
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops consumers after their in-flight batch.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Stores a compiled plan and moves it to `Running`.
    pub async fn start_plan(&self, compiled: CompiledPlan) -> Result<PlanExecution> {
        let CompiledPlan { plan, nodes } = compiled;
        let plan_execution_id = plan.id.clone();

        if nodes.is_empty() {
            return Err(EngineError::no_nodes_found(plan_execution_id));
        }
        if let Some(stray) = nodes.iter().find(|node| node.plan_execution_id != plan_execution_id) {
            return Err(EngineError::invalid_request(format!(
                "node execution {} belongs to plan execution {}",
                stray.id, stray.plan_execution_id
            )));
        }
        if nodes.iter().filter(|node| node.is_root()).count() != 1 {
            return Err(EngineError::root_node_missing(plan_execution_id));
        }

        self.plans.insert(plan.with_status(Status::Queued)).await?;
        for node in nodes {
            self.nodes.insert(node).await?;
        }
        let started = self
            .plans
            .update_status(&plan_execution_id, Status::Running, &[Status::Queued])
            .await?;
        info!(plan_execution_id = %plan_execution_id, "Plan execution started");

        match started {
            Some(plan) => Ok(plan),
            None => self.plans.get(&plan_execution_id).await,
        }
    }

    pub async fn compile_and_start(&self, compiler: &dyn PlanCompiler, plan_execution_id: &str) -> Result<PlanExecution> {
        let compiled = compiler.compile(plan_execution_id).await?;
        self.start_plan(compiled).await
    }

    /// Consumer that keeps execution graphs up to date from orchestration events.
    pub fn graph_consumer(&self) -> Result<EventConsumer<GraphUpdateHandler>> {
        EventConsumer::from_config(
            self.bus.clone(),
            GraphUpdateHandler::new(self.dispatcher.clone()),
            &self.config.consumer,
            &self.config.topics,
            self.shutdown.clone(),
            self.maintenance.clone(),
        )
    }
}
