//! Interrupt lifecycle and the handlers that apply interrupts to executions.

use crate::node_service::NodeExecutionService;
use crate::plan_service::PlanExecutionService;
use conductor_core::model::generate_id;
use conductor_core::status::{BROKEN_STATUSES, PAUSABLE_STATUSES, SUSPENDED_STATUSES};
use conductor_core::{
    EngineError, Interrupt, InterruptState, InterruptStore, InterruptType, NodeExecution, NodeExecutionStore,
    NodeUpdateOp, PlanExecutionStore, Result, Status,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

const OPEN_STATES: &[InterruptState] = &[InterruptState::Registered, InterruptState::Processing];

/// Stores interrupts and tracks their lifecycle, independent of node state.
pub struct InterruptService {
    interrupts: Arc<dyn InterruptStore>,
    plans: Arc<dyn PlanExecutionStore>,
    nodes: Arc<dyn NodeExecutionStore>,
}

impl InterruptService {
    pub fn new(
        interrupts: Arc<dyn InterruptStore>,
        plans: Arc<dyn PlanExecutionStore>,
        nodes: Arc<dyn NodeExecutionStore>,
    ) -> Self {
        Self {
            interrupts,
            plans,
            nodes,
        }
    }

    /// Validates the target and stores the interrupt as `Registered`.
    pub async fn register(&self, mut interrupt: Interrupt) -> Result<Interrupt> {
        self.plans.get_plan(&interrupt.plan_execution_id).await?;
        match &interrupt.node_execution_id {
            Some(node_execution_id) => {
                let node = self.nodes.get_node(node_execution_id).await?;
                if node.plan_execution_id != interrupt.plan_execution_id {
                    return Err(EngineError::invalid_request(format!(
                        "node execution {} does not belong to plan execution {}",
                        node_execution_id, interrupt.plan_execution_id
                    )));
                }
            }
            None if interrupt.interrupt_type == InterruptType::Retry => {
                return Err(EngineError::invalid_request("a RETRY interrupt needs a target node execution"));
            }
            None => {}
        }

        interrupt.state = InterruptState::Registered;
        let interrupt = self.interrupts.insert_interrupt(interrupt).await?;
        info!(
            interrupt_id = %interrupt.id,
            interrupt_type = %interrupt.interrupt_type,
            plan_execution_id = %interrupt.plan_execution_id,
            "Interrupt registered"
        );
        Ok(interrupt)
    }

    pub async fn get(&self, interrupt_id: &str) -> Result<Interrupt> {
        self.interrupts.get_interrupt(interrupt_id).await
    }

    pub async fn fetch_for_plan(&self, plan_execution_id: &str) -> Result<Vec<Interrupt>> {
        self.interrupts.fetch_interrupts(plan_execution_id).await
    }

    /// Interrupts not yet processed.
    pub async fn fetch_active_for_plan(&self, plan_execution_id: &str) -> Result<Vec<Interrupt>> {
        Ok(self
            .interrupts
            .fetch_interrupts(plan_execution_id)
            .await?
            .into_iter()
            .filter(|interrupt| !interrupt.state.is_processed())
            .collect())
    }

    pub async fn mark_processing(&self, interrupt_id: &str) -> Result<Option<Interrupt>> {
        self.interrupts
            .update_interrupt_state(interrupt_id, InterruptState::Processing, &[InterruptState::Registered])
            .await
    }

    /// Moves an open interrupt to a processed state. A processed interrupt is
    /// never changed again.
    pub async fn mark_processed(&self, interrupt_id: &str, state: InterruptState) -> Result<Option<Interrupt>> {
        if !state.is_processed() {
            return Err(EngineError::invalid_request(format!(
                "{state} is not a processed interrupt state"
            )));
        }
        let updated = self
            .interrupts
            .update_interrupt_state(interrupt_id, state, OPEN_STATES)
            .await?;
        if updated.is_some() {
            debug!(interrupt_id, state = %state, "Interrupt processed");
        }
        Ok(updated)
    }
}

/// Applies interrupts to plan and node executions.
pub struct InterruptManager {
    interrupts: Arc<InterruptService>,
    nodes: Arc<NodeExecutionService>,
    plans: Arc<PlanExecutionService>,
}

impl InterruptManager {
    pub fn new(
        interrupts: Arc<InterruptService>,
        nodes: Arc<NodeExecutionService>,
        plans: Arc<PlanExecutionService>,
    ) -> Self {
        Self {
            interrupts,
            nodes,
            plans,
        }
    }

    /// Registers `interrupt`, applies it and returns it in its resulting state.
    ///
    /// A RETRY is left `Processing`; it completes once the new execution
    /// reaches a final status.
    pub async fn issue(&self, interrupt: Interrupt) -> Result<Interrupt> {
        let interrupt = self.interrupts.register(interrupt).await?;
        self.interrupts.mark_processing(&interrupt.id).await?;

        let applied = match interrupt.interrupt_type {
            InterruptType::Pause => self.apply_pause(&interrupt).await,
            InterruptType::Resume => self.apply_resume(&interrupt).await,
            InterruptType::Abort => self.apply_abort(&interrupt).await,
            InterruptType::Retry => return self.apply_retry(&interrupt).await,
            InterruptType::Custom => Ok(true),
        };

        let state = match applied {
            Ok(true) => InterruptState::ProcessedSuccessfully,
            Ok(false) => InterruptState::ProcessedUnsuccessfully,
            Err(e) => {
                warn!(interrupt_id = %interrupt.id, error = %e, "Interrupt handling failed");
                self.interrupts
                    .mark_processed(&interrupt.id, InterruptState::ProcessedUnsuccessfully)
                    .await?;
                return Err(e);
            }
        };
        self.interrupts.mark_processed(&interrupt.id, state).await?;
        self.interrupts.get(&interrupt.id).await
    }

    async fn targets(&self, interrupt: &Interrupt, leaves_only: bool) -> Result<Vec<NodeExecution>> {
        if let Some(node_execution_id) = &interrupt.node_execution_id {
            return Ok(vec![self.nodes.get(node_execution_id).await?]);
        }
        let nodes = self.nodes.fetch_plan_nodes(&interrupt.plan_execution_id).await?;
        if !leaves_only {
            return Ok(nodes);
        }
        Ok(nodes
            .iter()
            .filter(|node| !nodes.iter().any(|other| other.parent_id.as_deref() == Some(node.id.as_str())))
            .cloned()
            .collect())
    }

    async fn apply_pause(&self, interrupt: &Interrupt) -> Result<bool> {
        let effect = NodeUpdateOp::AddInterruptEffect(interrupt.effect());
        let mut paused = false;
        for node in self.targets(interrupt, true).await? {
            let updated = self
                .nodes
                .update_status_with_ops(&node.id, Status::Paused, std::slice::from_ref(&effect), PAUSABLE_STATUSES)
                .await?;
            paused |= updated.is_some();
        }
        Ok(paused)
    }

    async fn apply_resume(&self, interrupt: &Interrupt) -> Result<bool> {
        let effect = NodeUpdateOp::AddInterruptEffect(interrupt.effect());
        let mut resumed = false;
        for node in self.targets(interrupt, true).await? {
            let updated = self
                .nodes
                .update_status_with_ops(&node.id, Status::Running, std::slice::from_ref(&effect), SUSPENDED_STATUSES)
                .await?;
            resumed |= updated.is_some();
        }
        Ok(resumed)
    }

    async fn apply_abort(&self, interrupt: &Interrupt) -> Result<bool> {
        let mut targets = self.targets(interrupt, false).await?;
        if let Some(node_execution_id) = &interrupt.node_execution_id {
            targets.extend(self.nodes.fetch_descendants(node_execution_id).await?);
        }
        targets.retain(|node| !node.status.is_final());

        let ids: Vec<String> = targets.iter().map(|node| node.id.clone()).collect();
        self.nodes.mark_discontinuing(&ids).await?;

        let effect = NodeUpdateOp::AddInterruptEffect(interrupt.effect());
        let mut aborted = 0;
        for id in &ids {
            if self
                .nodes
                .update_status_with_ops(id, Status::Aborted, std::slice::from_ref(&effect), &[Status::Discontinuing])
                .await?
                .is_some()
            {
                aborted += 1;
            }
        }
        info!(
            interrupt_id = %interrupt.id,
            plan_execution_id = %interrupt.plan_execution_id,
            aborted,
            "Abort applied"
        );

        self.plans.update_calculated_status(&interrupt.plan_execution_id).await?;
        Ok(aborted > 0 || interrupt.node_execution_id.is_none())
    }

    async fn apply_retry(&self, interrupt: &Interrupt) -> Result<Interrupt> {
        let node_execution_id = interrupt
            .node_execution_id
            .as_deref()
            .ok_or_else(|| EngineError::invalid_request("a RETRY interrupt needs a target node execution"))?;
        let current = self.nodes.get(node_execution_id).await?;

        let claimed = if current.status.is_broken() && !current.old_retry {
            self.nodes.mark_retried(&current.id, BROKEN_STATUSES).await?
        } else {
            None
        };
        // Only one RETRY may supersede a given execution.
        let Some(old) = claimed else {
            warn!(
                interrupt_id = %interrupt.id,
                node_execution_id,
                status = %current.status,
                "Node is not retryable"
            );
            self.interrupts
                .mark_processed(&interrupt.id, InterruptState::ProcessedUnsuccessfully)
                .await?;
            return self.interrupts.get(&interrupt.id).await;
        };

        let mut retry_ids = old.retry_ids.clone();
        retry_ids.push(old.id.clone());
        let mut replacement = NodeExecution::new(generate_id(), old.plan_execution_id.clone())
            .with_name(old.name.clone())
            .with_identifier(old.identifier.clone())
            .with_step_type(old.step_type.clone())
            .with_status(Status::Queued);
        replacement.parent_id = old.parent_id.clone();
        replacement.previous_id = old.previous_id.clone();
        replacement.retry_ids = retry_ids;
        replacement.interrupt_histories.push(interrupt.effect());
        let replacement = self.nodes.insert(replacement).await?;

        info!(
            interrupt_id = %interrupt.id,
            old_node_execution_id = %old.id,
            node_execution_id = %replacement.id,
            "Node execution retried"
        );
        self.plans.update_calculated_status(&interrupt.plan_execution_id).await?;
        self.interrupts.get(&interrupt.id).await
    }
}
