//! Status Store: the single source of truth for execution state.
//!
//! Every mutation is a conditional update keyed on the record's current
//! status. A rejected precondition yields `Ok(None)` rather than an error.

use crate::error::Result;
use crate::model::{Interrupt, InterruptState, NodeExecution, NodeUpdateOp, PlanExecution};
use crate::status::Status;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};

pub mod memory;

pub use memory::InMemoryExecutionStore;

/// A committed node transition together with the status it replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTransition {
    pub previous_status: Status,
    pub node: NodeExecution,
}

/// A committed plan transition together with the status it replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanTransition {
    pub previous_status: Status,
    pub plan: PlanExecution,
}

#[async_trait]
pub trait NodeExecutionStore: Send + Sync {
    async fn insert_node(&self, node: NodeExecution) -> Result<NodeExecution>;

    async fn get_node(&self, node_execution_id: &str) -> Result<NodeExecution>;

    /// Moves a node to `status` if its current status is in `allowed`
    /// (empty means any) and the state machine permits the move.
    async fn update_node_status(
        &self,
        node_execution_id: &str,
        status: Status,
        ops: &[NodeUpdateOp],
        allowed: &[Status],
    ) -> Result<Option<NodeTransition>>;

    /// Flags a node as superseded by a retry, provided it is not superseded
    /// already and its status is in `allowed` (empty means any). `None` when
    /// the node is absent or the precondition fails.
    async fn mark_retried_if(&self, node_execution_id: &str, allowed: &[Status]) -> Result<Option<NodeExecution>>;

    /// Applies `ops` without touching the status.
    async fn update_node(&self, node_execution_id: &str, ops: &[NodeUpdateOp]) -> Result<Option<NodeExecution>>;

    /// Children of `parent_id`, superseded retries excluded.
    async fn fetch_children(&self, parent_id: &str) -> Result<Vec<NodeExecution>>;

    async fn fetch_plan_nodes(&self, plan_execution_id: &str, include_old_retries: bool)
        -> Result<Vec<NodeExecution>>;
}

#[async_trait]
pub trait PlanExecutionStore: Send + Sync {
    async fn insert_plan(&self, plan: PlanExecution) -> Result<PlanExecution>;

    async fn get_plan(&self, plan_execution_id: &str) -> Result<PlanExecution>;

    /// Same contract as [`NodeExecutionStore::update_node_status`]; a plan in a
    /// final status never changes.
    async fn update_plan_status(
        &self,
        plan_execution_id: &str,
        status: Status,
        allowed: &[Status],
    ) -> Result<Option<PlanTransition>>;
}

#[async_trait]
pub trait InterruptStore: Send + Sync {
    async fn insert_interrupt(&self, interrupt: Interrupt) -> Result<Interrupt>;

    async fn get_interrupt(&self, interrupt_id: &str) -> Result<Interrupt>;

    async fn update_interrupt_state(
        &self,
        interrupt_id: &str,
        state: InterruptState,
        allowed: &[InterruptState],
    ) -> Result<Option<Interrupt>>;

    async fn fetch_interrupts(&self, plan_execution_id: &str) -> Result<Vec<Interrupt>>;
}

/// Store-wide clock whose readings strictly increase, so that two updates
/// committed within the same millisecond still order correctly.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let next = now.max(current + 1);
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}
