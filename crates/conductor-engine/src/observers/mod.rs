//! Status-update observers.
//!
//! Every committed node (or plan) transition fans out to the registered
//! observers in registration order. Observers are independent: a failing
//! observer is logged and the remaining ones still run.

use async_trait::async_trait;
use conductor_core::{NodeExecution, PlanExecution, Result, Status};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, RwLock};
use strum::{Display, EnumIter};
use tracing::warn;

pub mod approval;
pub mod license_limit;
pub mod orchestration_log;
pub mod pause;
pub mod resume;
pub mod terminal;

pub use approval::ApprovalWaitObserver;
pub use license_limit::LicenseLimitObserver;
pub use orchestration_log::OrchestrationLogPublisher;
pub use pause::PauseObserver;
pub use resume::ResumeObserver;
pub use terminal::TerminalCleanupObserver;

/// A committed node transition as seen by observers.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdateInfo {
    pub node: NodeExecution,
    pub previous_status: Status,
}

impl NodeUpdateInfo {
    pub fn new(node: NodeExecution, previous_status: Status) -> Self {
        Self { node, previous_status }
    }

    pub fn status(&self) -> Status {
        self.node.status
    }

    pub fn plan_execution_id(&self) -> &str {
        &self.node.plan_execution_id
    }
}

#[async_trait]
pub trait NodeStatusUpdateObserver: Send + Sync {
    fn name(&self) -> &str;

    async fn on_node_status_update(&self, info: &NodeUpdateInfo) -> Result<()>;
}

#[async_trait]
pub trait PlanStatusUpdateObserver: Send + Sync {
    fn name(&self) -> &str;

    async fn on_plan_status_update(&self, plan: &PlanExecution, previous_status: Status) -> Result<()>;
}

/// The observers the engine ships with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum BuiltinObserver {
    ApprovalWait,
    Pause,
    Resume,
    LicenseLimit,
    TerminalCleanup,
    OrchestrationLog,
}

impl BuiltinObserver {
    pub const DEFAULT_ORDER: [BuiltinObserver; 6] = [
        BuiltinObserver::ApprovalWait,
        BuiltinObserver::Pause,
        BuiltinObserver::Resume,
        BuiltinObserver::LicenseLimit,
        BuiltinObserver::TerminalCleanup,
        BuiltinObserver::OrchestrationLog,
    ];
}

type NodeObserverFn = dyn Fn(NodeUpdateInfo) -> BoxFuture<'static, Result<()>> + Send + Sync;

struct FnObserver {
    name: String,
    f: Box<NodeObserverFn>,
}

#[async_trait]
impl NodeStatusUpdateObserver for FnObserver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_node_status_update(&self, info: &NodeUpdateInfo) -> Result<()> {
        (self.f)(info.clone()).await
    }
}

/// Ordered list of node observers.
///
/// Registration may happen after the owning service is shared, since some
/// observers need a handle to that service.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn NodeStatusUpdateObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn NodeStatusUpdateObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observer);
    }

    /// Registers a closure as an observer.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(NodeUpdateInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(Arc::new(FnObserver {
            name: name.into(),
            f: Box::new(move |info| -> BoxFuture<'static, Result<()>> { Box::pin(f(info)) }),
        }));
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|o| o.name().to_string()).collect()
    }

    pub async fn notify(&self, info: &NodeUpdateInfo) {
        for observer in self.snapshot() {
            if let Err(e) = observer.on_node_status_update(info).await {
                warn!(
                    observer = observer.name(),
                    node_execution_id = %info.node.id,
                    status = %info.status(),
                    error = %e,
                    "Node status observer failed"
                );
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn NodeStatusUpdateObserver>> {
        self.observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[derive(Default)]
pub struct PlanObserverRegistry {
    observers: RwLock<Vec<Arc<dyn PlanStatusUpdateObserver>>>,
}

impl PlanObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn PlanStatusUpdateObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observer);
    }

    pub async fn notify(&self, plan: &PlanExecution, previous_status: Status) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for observer in observers {
            if let Err(e) = observer.on_plan_status_update(plan, previous_status).await {
                warn!(
                    observer = observer.name(),
                    plan_execution_id = %plan.id,
                    status = %plan.status,
                    error = %e,
                    "Plan status observer failed"
                );
            }
        }
    }
}
