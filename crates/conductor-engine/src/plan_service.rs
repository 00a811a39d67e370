use crate::observers::PlanObserverRegistry;
use conductor_core::{calculate_status, NodeExecutionStore, PlanExecution, PlanExecutionStore, Result, Status};
use std::sync::Arc;
use tracing::{debug, info};

/// Plan-level status operations, including the aggregate recomputation.
pub struct PlanExecutionService {
    plans: Arc<dyn PlanExecutionStore>,
    nodes: Arc<dyn NodeExecutionStore>,
    observers: PlanObserverRegistry,
}

impl PlanExecutionService {
    pub fn new(plans: Arc<dyn PlanExecutionStore>, nodes: Arc<dyn NodeExecutionStore>) -> Self {
        Self {
            plans,
            nodes,
            observers: PlanObserverRegistry::new(),
        }
    }

    pub fn observers(&self) -> &PlanObserverRegistry {
        &self.observers
    }

    pub async fn insert(&self, plan: PlanExecution) -> Result<PlanExecution> {
        self.plans.insert_plan(plan).await
    }

    pub async fn get(&self, plan_execution_id: &str) -> Result<PlanExecution> {
        self.plans.get_plan(plan_execution_id).await
    }

    pub async fn get_status(&self, plan_execution_id: &str) -> Result<Status> {
        Ok(self.plans.get_plan(plan_execution_id).await?.status)
    }

    /// Conditional plan transition; `None` when the precondition fails or the
    /// plan already finished.
    pub async fn update_status(
        &self,
        plan_execution_id: &str,
        status: Status,
        allowed: &[Status],
    ) -> Result<Option<PlanExecution>> {
        let Some(transition) = self.plans.update_plan_status(plan_execution_id, status, allowed).await? else {
            return Ok(None);
        };
        info!(
            plan_execution_id,
            from = %transition.previous_status,
            to = %status,
            "Plan status updated"
        );
        self.observers.notify(&transition.plan, transition.previous_status).await;
        Ok(Some(transition.plan))
    }

    /// Recomputes the aggregate status from the plan's top-level executions and
    /// persists it when it changed.
    pub async fn update_calculated_status(&self, plan_execution_id: &str) -> Result<Option<PlanExecution>> {
        let plan = self.plans.get_plan(plan_execution_id).await?;
        if plan.status.is_final() {
            return Ok(None);
        }

        let statuses: Vec<Status> = self
            .nodes
            .fetch_plan_nodes(plan_execution_id, false)
            .await?
            .iter()
            .filter(|node| node.parent_id.is_none())
            .map(|node| node.status)
            .collect();
        let calculated = calculate_status(&statuses);
        if calculated == plan.status {
            debug!(plan_execution_id, status = %calculated, "Plan status unchanged");
            return Ok(None);
        }
        self.update_status(plan_execution_id, calculated, &[plan.status]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::{InMemoryExecutionStore, NodeExecution};

    async fn setup(statuses: &[Status]) -> PlanExecutionService {
        let store = Arc::new(InMemoryExecutionStore::new());
        let service = PlanExecutionService::new(store.clone(), store.clone());
        service
            .insert(PlanExecution::new("p1", "build").with_status(Status::Running))
            .await
            .expect("insert plan");
        let mut previous: Option<String> = None;
        for (i, status) in statuses.iter().enumerate() {
            let id = format!("n{i}");
            let mut node = NodeExecution::new(id.clone(), "p1").with_status(*status);
            if let Some(previous) = previous.take() {
                node = node.with_previous(previous);
            }
            store.insert_node(node).await.expect("insert node");
            previous = Some(id);
        }
        service
    }

    #[tokio::test]
    async fn aggregate_follows_top_level_nodes() {
        let cases = [
            (vec![Status::Succeeded, Status::Succeeded], Status::Succeeded),
            (vec![Status::Succeeded, Status::Running], Status::Running),
            (vec![Status::Succeeded, Status::Failed], Status::Failed),
        ];
        for (statuses, expected) in cases {
            let service = setup(&statuses).await;
            service.update_calculated_status("p1").await.expect("recompute");
            assert_eq!(service.get_status("p1").await.expect("status"), expected, "{statuses:?}");
        }
    }

    #[tokio::test]
    async fn recomputation_never_moves_a_finished_plan() {
        let service = setup(&[Status::Failed]).await;
        service.update_calculated_status("p1").await.expect("recompute");
        assert_eq!(service.get_status("p1").await.expect("status"), Status::Failed);

        let again = service.update_calculated_status("p1").await.expect("recompute");
        assert!(again.is_none());
        let forced = service.update_status("p1", Status::Queued, &[]).await.expect("update");
        assert!(forced.is_none());
    }
}
