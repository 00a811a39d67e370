use crate::observers::{NodeUpdateInfo, ObserverRegistry};
use async_trait::async_trait;
use conductor_core::{NodeExecution, NodeExecutionStore, NodeUpdateOp, Result, Status};
use std::sync::Arc;
use tracing::{debug, info};

/// Authorization hook consulted before a node transition is committed.
#[async_trait]
pub trait TransitionGuard: Send + Sync {
    /// An error aborts the transition; nothing is written and no observer runs.
    async fn check(&self, node: &NodeExecution, target: Status) -> Result<()>;
}

/// Node-level operations on top of the Status Store.
///
/// All status changes go through [`update_status_with_ops`](Self::update_status_with_ops),
/// which fans committed transitions out to the registered observers.
pub struct NodeExecutionService {
    store: Arc<dyn NodeExecutionStore>,
    observers: ObserverRegistry,
    guards: Vec<Arc<dyn TransitionGuard>>,
}

impl NodeExecutionService {
    pub fn new(store: Arc<dyn NodeExecutionStore>, guards: Vec<Arc<dyn TransitionGuard>>) -> Self {
        Self {
            store,
            observers: ObserverRegistry::new(),
            guards,
        }
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    pub async fn insert(&self, node: NodeExecution) -> Result<NodeExecution> {
        self.store.insert_node(node).await
    }

    pub async fn get(&self, node_execution_id: &str) -> Result<NodeExecution> {
        self.store.get_node(node_execution_id).await
    }

    pub async fn get_status(&self, node_execution_id: &str) -> Result<Status> {
        Ok(self.store.get_node(node_execution_id).await?.status)
    }

    /// Transitions a node if its current status is in `allowed` (empty means
    /// any). Returns `None` when the precondition does not hold.
    pub async fn update_status_with_ops(
        &self,
        node_execution_id: &str,
        status: Status,
        ops: &[NodeUpdateOp],
        allowed: &[Status],
    ) -> Result<Option<NodeExecution>> {
        if !self.guards.is_empty() {
            let current = self.store.get_node(node_execution_id).await?;
            for guard in &self.guards {
                guard.check(&current, status).await?;
            }
        }

        let Some(transition) = self
            .store
            .update_node_status(node_execution_id, status, ops, allowed)
            .await?
        else {
            return Ok(None);
        };

        info!(
            plan_execution_id = %transition.node.plan_execution_id,
            node_execution_id,
            from = %transition.previous_status,
            to = %status,
            "Node status updated"
        );
        let info = NodeUpdateInfo::new(transition.node, transition.previous_status);
        self.observers.notify(&info).await;
        Ok(Some(info.node))
    }

    pub async fn update_status(
        &self,
        node_execution_id: &str,
        status: Status,
        allowed: &[Status],
    ) -> Result<Option<NodeExecution>> {
        self.update_status_with_ops(node_execution_id, status, &[], allowed).await
    }

    /// Applies `ops` without a status change; observers are not notified.
    pub async fn update(&self, node_execution_id: &str, ops: &[NodeUpdateOp]) -> Result<Option<NodeExecution>> {
        self.store.update_node(node_execution_id, ops).await
    }

    /// Flags a node as superseded by a retry while its status is in `allowed`.
    /// `None` if it does not exist, is already superseded or moved on.
    pub async fn mark_retried(&self, node_execution_id: &str, allowed: &[Status]) -> Result<Option<NodeExecution>> {
        self.store.mark_retried_if(node_execution_id, allowed).await
    }

    pub async fn fetch_children(&self, parent_id: &str) -> Result<Vec<NodeExecution>> {
        self.store.fetch_children(parent_id).await
    }

    pub async fn fetch_plan_nodes(&self, plan_execution_id: &str) -> Result<Vec<NodeExecution>> {
        self.store.fetch_plan_nodes(plan_execution_id, false).await
    }

    /// Top-level executions of a plan: every node without a parent, ordered
    /// by start time.
    pub async fn fetch_roots(&self, plan_execution_id: &str) -> Result<Vec<NodeExecution>> {
        let mut roots: Vec<NodeExecution> = self
            .store
            .fetch_plan_nodes(plan_execution_id, false)
            .await?
            .into_iter()
            .filter(|node| node.parent_id.is_none())
            .collect();
        roots.sort_by(|a, b| a.start_ts.cmp(&b.start_ts).then_with(|| a.id.cmp(&b.id)));
        Ok(roots)
    }

    pub async fn count_children_in(&self, parent_id: &str, statuses: &[Status]) -> Result<usize> {
        Ok(self
            .store
            .fetch_children(parent_id)
            .await?
            .iter()
            .filter(|child| statuses.contains(&child.status))
            .count())
    }

    /// All descendants of `node_execution_id`, superseded retries excluded.
    pub async fn fetch_descendants(&self, node_execution_id: &str) -> Result<Vec<NodeExecution>> {
        let mut descendants = Vec::new();
        let mut frontier = vec![node_execution_id.to_string()];
        while let Some(parent_id) = frontier.pop() {
            for child in self.store.fetch_children(&parent_id).await? {
                frontier.push(child.id.clone());
                descendants.push(child);
            }
        }
        Ok(descendants)
    }

    /// Moves every non-final node of a plan to `Errored`. Returns whether any node changed.
    pub async fn error_out_active_nodes(&self, plan_execution_id: &str) -> Result<bool> {
        let mut changed = false;
        for node in self.fetch_plan_nodes(plan_execution_id).await? {
            if node.status.is_final() {
                continue;
            }
            if self.update_status(&node.id, Status::Errored, &[]).await?.is_some() {
                changed = true;
            }
        }
        debug!(plan_execution_id, changed, "Errored out active nodes");
        Ok(changed)
    }

    /// Moves each given node to `Discontinuing` unless it already finished.
    /// Returns the number of nodes changed.
    pub async fn mark_discontinuing(&self, node_execution_ids: &[String]) -> Result<usize> {
        let mut changed = 0;
        for id in node_execution_ids {
            if self.update_status(id, Status::Discontinuing, &[]).await?.is_some() {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Max `last_updated_at` over a plan's current executions.
    pub async fn max_last_updated(&self, plan_execution_id: &str) -> Result<Option<i64>> {
        Ok(self
            .fetch_plan_nodes(plan_execution_id)
            .await?
            .iter()
            .map(|node| node.last_updated_at)
            .max())
    }
}
