use chrono::{DateTime, Utc};
use conductor_core::Status;
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationEventType {
    NodeExecutionStatusUpdate,
    PlanExecutionStatusUpdate,
}

/// Payload of an `ORCHESTRATION` event: something about a plan changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationLogEvent {
    pub plan_execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_id: Option<String>,
    pub event_type: OrchestrationEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    pub created_at: DateTime<Utc>,
}

impl OrchestrationLogEvent {
    pub fn new(plan_execution_id: impl Into<String>, event_type: OrchestrationEventType) -> Self {
        Self {
            plan_execution_id: plan_execution_id.into(),
            node_execution_id: None,
            event_type,
            status: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_node(mut self, node_execution_id: impl Into<String>) -> Self {
        self.node_execution_id = Some(node_execution_id.into());
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }
}
