use super::{
    InterruptStore, MonotonicClock, NodeExecutionStore, NodeTransition, PlanExecutionStore, PlanTransition,
};
use crate::error::{EngineError, EntityKind, Result};
use crate::model::{Interrupt, InterruptState, NodeExecution, NodeUpdateOp, PlanExecution};
use crate::status::Status;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// In-memory Status Store.
///
/// Each record map sits behind its own write lock; the precondition check and
/// the write happen under the same guard, which makes every update atomic.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    plans: RwLock<HashMap<String, PlanExecution>>,
    nodes: RwLock<HashMap<String, NodeExecution>>,
    interrupts: RwLock<HashMap<String, Interrupt>>,
    clock: MonotonicClock,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeExecutionStore for InMemoryExecutionStore {
    async fn insert_node(&self, mut node: NodeExecution) -> Result<NodeExecution> {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&node.id) {
            return Err(EngineError::invalid_request(format!(
                "node execution {} already exists",
                node.id
            )));
        }
        node.last_updated_at = self.clock.tick();
        nodes.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    async fn get_node(&self, node_execution_id: &str) -> Result<NodeExecution> {
        self.nodes
            .read()
            .await
            .get(node_execution_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(EntityKind::NodeExecution, node_execution_id))
    }

    async fn update_node_status(
        &self,
        node_execution_id: &str,
        status: Status,
        ops: &[NodeUpdateOp],
        allowed: &[Status],
    ) -> Result<Option<NodeTransition>> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(node_execution_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::NodeExecution, node_execution_id))?;

        let previous_status = node.status;
        if !allowed.is_empty() && !allowed.contains(&previous_status) {
            debug!(
                node_execution_id,
                current = %previous_status,
                target = %status,
                "Precondition not met, skipping node status update"
            );
            return Ok(None);
        }
        if !previous_status.can_transition_to(status) {
            debug!(
                node_execution_id,
                current = %previous_status,
                target = %status,
                "Transition not permitted, skipping node status update"
            );
            return Ok(None);
        }

        node.status = status;
        for op in ops {
            op.apply(node);
        }
        if status == Status::Running && node.start_ts.is_none() {
            node.start_ts = Some(Utc::now());
        }
        if status.is_final() && node.end_ts.is_none() {
            node.end_ts = Some(Utc::now());
        }
        node.version += 1;
        node.last_updated_at = self.clock.tick();
        trace!(node_execution_id, from = %previous_status, to = %status, "Node status committed");

        Ok(Some(NodeTransition {
            previous_status,
            node: node.clone(),
        }))
    }

    async fn mark_retried_if(&self, node_execution_id: &str, allowed: &[Status]) -> Result<Option<NodeExecution>> {
        let mut nodes = self.nodes.write().await;
        let Some(node) = nodes.get_mut(node_execution_id) else {
            return Ok(None);
        };
        if node.old_retry || (!allowed.is_empty() && !allowed.contains(&node.status)) {
            debug!(
                node_execution_id,
                status = %node.status,
                old_retry = node.old_retry,
                "Precondition not met, skipping retry mark"
            );
            return Ok(None);
        }
        NodeUpdateOp::MarkOldRetry.apply(node);
        node.version += 1;
        node.last_updated_at = self.clock.tick();
        Ok(Some(node.clone()))
    }

    async fn update_node(&self, node_execution_id: &str, ops: &[NodeUpdateOp]) -> Result<Option<NodeExecution>> {
        let mut nodes = self.nodes.write().await;
        let Some(node) = nodes.get_mut(node_execution_id) else {
            return Ok(None);
        };
        for op in ops {
            op.apply(node);
        }
        node.version += 1;
        node.last_updated_at = self.clock.tick();
        Ok(Some(node.clone()))
    }

    async fn fetch_children(&self, parent_id: &str) -> Result<Vec<NodeExecution>> {
        Ok(self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| !n.old_retry && n.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn fetch_plan_nodes(
        &self,
        plan_execution_id: &str,
        include_old_retries: bool,
    ) -> Result<Vec<NodeExecution>> {
        Ok(self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| n.plan_execution_id == plan_execution_id && (include_old_retries || !n.old_retry))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PlanExecutionStore for InMemoryExecutionStore {
    async fn insert_plan(&self, mut plan: PlanExecution) -> Result<PlanExecution> {
        let mut plans = self.plans.write().await;
        if plans.contains_key(&plan.id) {
            return Err(EngineError::invalid_request(format!(
                "plan execution {} already exists",
                plan.id
            )));
        }
        plan.last_updated_at = self.clock.tick();
        plans.insert(plan.id.clone(), plan.clone());
        Ok(plan)
    }

    async fn get_plan(&self, plan_execution_id: &str) -> Result<PlanExecution> {
        self.plans
            .read()
            .await
            .get(plan_execution_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(EntityKind::PlanExecution, plan_execution_id))
    }

    async fn update_plan_status(
        &self,
        plan_execution_id: &str,
        status: Status,
        allowed: &[Status],
    ) -> Result<Option<PlanTransition>> {
        let mut plans = self.plans.write().await;
        let plan = plans
            .get_mut(plan_execution_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::PlanExecution, plan_execution_id))?;

        let previous_status = plan.status;
        if (!allowed.is_empty() && !allowed.contains(&previous_status))
            || previous_status.is_final()
            || previous_status == status
        {
            debug!(
                plan_execution_id,
                current = %previous_status,
                target = %status,
                "Skipping plan status update"
            );
            return Ok(None);
        }

        plan.status = status;
        if status == Status::Running && plan.start_ts.is_none() {
            plan.start_ts = Some(Utc::now());
        }
        if status.is_final() && plan.end_ts.is_none() {
            plan.end_ts = Some(Utc::now());
        }
        plan.version += 1;
        plan.last_updated_at = self.clock.tick();

        Ok(Some(PlanTransition {
            previous_status,
            plan: plan.clone(),
        }))
    }
}

#[async_trait]
impl InterruptStore for InMemoryExecutionStore {
    async fn insert_interrupt(&self, interrupt: Interrupt) -> Result<Interrupt> {
        let mut interrupts = self.interrupts.write().await;
        if interrupts.contains_key(&interrupt.id) {
            return Err(EngineError::invalid_request(format!(
                "interrupt {} already exists",
                interrupt.id
            )));
        }
        interrupts.insert(interrupt.id.clone(), interrupt.clone());
        Ok(interrupt)
    }

    async fn get_interrupt(&self, interrupt_id: &str) -> Result<Interrupt> {
        self.interrupts
            .read()
            .await
            .get(interrupt_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(EntityKind::Interrupt, interrupt_id))
    }

    async fn update_interrupt_state(
        &self,
        interrupt_id: &str,
        state: InterruptState,
        allowed: &[InterruptState],
    ) -> Result<Option<Interrupt>> {
        let mut interrupts = self.interrupts.write().await;
        let interrupt = interrupts
            .get_mut(interrupt_id)
            .ok_or_else(|| EngineError::not_found(EntityKind::Interrupt, interrupt_id))?;

        if interrupt.state.is_processed()
            || interrupt.state == state
            || (!allowed.is_empty() && !allowed.contains(&interrupt.state))
        {
            return Ok(None);
        }
        interrupt.state = state;
        interrupt.last_updated_at = Utc::now();
        Ok(Some(interrupt.clone()))
    }

    async fn fetch_interrupts(&self, plan_execution_id: &str) -> Result<Vec<Interrupt>> {
        let mut interrupts: Vec<Interrupt> = self
            .interrupts
            .read()
            .await
            .values()
            .filter(|i| i.plan_execution_id == plan_execution_id)
            .cloned()
            .collect();
        interrupts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(interrupts)
    }
}
