use crate::status::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

pub type PlanExecutionId = String;
pub type NodeExecutionId = String;
pub type InterruptId = String;

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One run of a compiled plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecution {
    pub id: PlanExecutionId,
    pub name: String,
    pub status: Status,
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    pub version: u64,
    pub last_updated_at: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PlanExecution {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: Status::Queued,
            start_ts: None,
            end_ts: None,
            version: 0,
            last_updated_at: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Runtime record of one node's execution attempt.
///
/// `parent_id` links a node to the group/stage that contains it and
/// `previous_id` to the sibling that ran before it. A node with neither is
/// the root of the execution tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: NodeExecutionId,
    pub plan_execution_id: PlanExecutionId,
    pub parent_id: Option<NodeExecutionId>,
    pub previous_id: Option<NodeExecutionId>,
    pub name: String,
    pub identifier: String,
    pub step_type: String,
    pub status: Status,
    #[serde(default)]
    pub interrupt_histories: Vec<InterruptEffect>,
    #[serde(default)]
    pub retry_ids: Vec<NodeExecutionId>,
    #[serde(default)]
    pub old_retry: bool,
    pub start_ts: Option<DateTime<Utc>>,
    pub end_ts: Option<DateTime<Utc>>,
    pub version: u64,
    pub last_updated_at: i64,
}

impl NodeExecution {
    pub fn new(id: impl Into<String>, plan_execution_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            identifier: id.clone(),
            id,
            plan_execution_id: plan_execution_id.into(),
            parent_id: None,
            previous_id: None,
            step_type: String::new(),
            status: Status::Queued,
            interrupt_histories: Vec::new(),
            retry_ids: Vec::new(),
            old_retry: false,
            start_ts: None,
            end_ts: None,
            version: 0,
            last_updated_at: 0,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_previous(mut self, previous_id: impl Into<String>) -> Self {
        self.previous_id = Some(previous_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_step_type(mut self, step_type: impl Into<String>) -> Self {
        self.step_type = step_type.into();
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none() && self.previous_id.is_none()
    }

    pub fn retry_interrupt_ids(&self) -> impl Iterator<Item = &str> {
        self.interrupt_histories
            .iter()
            .filter(|effect| effect.interrupt_type == InterruptType::Retry)
            .map(|effect| effect.interrupt_id.as_str())
    }
}

/// Extra mutations applied atomically together with a status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeUpdateOp {
    SetStartTs(DateTime<Utc>),
    SetEndTs(DateTime<Utc>),
    AddInterruptEffect(InterruptEffect),
    MarkOldRetry,
    AddRetryIds(Vec<NodeExecutionId>),
}

impl NodeUpdateOp {
    pub fn apply(&self, node: &mut NodeExecution) {
        match self {
            NodeUpdateOp::SetStartTs(ts) => node.start_ts = Some(*ts),
            NodeUpdateOp::SetEndTs(ts) => node.end_ts = Some(*ts),
            NodeUpdateOp::AddInterruptEffect(effect) => node.interrupt_histories.push(effect.clone()),
            NodeUpdateOp::MarkOldRetry => node.old_retry = true,
            NodeUpdateOp::AddRetryIds(ids) => node.retry_ids.extend(ids.iter().cloned()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptType {
    Retry,
    Abort,
    Pause,
    Resume,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptState {
    Registered,
    Processing,
    ProcessedSuccessfully,
    ProcessedUnsuccessfully,
}

impl InterruptState {
    pub fn is_processed(self) -> bool {
        matches!(
            self,
            InterruptState::ProcessedSuccessfully | InterruptState::ProcessedUnsuccessfully
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssuerKind {
    Manual,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedBy {
    pub kind: IssuerKind,
    pub identifier: String,
}

impl IssuedBy {
    pub fn manual(identifier: impl Into<String>) -> Self {
        Self {
            kind: IssuerKind::Manual,
            identifier: identifier.into(),
        }
    }

    pub fn system(identifier: impl Into<String>) -> Self {
        Self {
            kind: IssuerKind::System,
            identifier: identifier.into(),
        }
    }
}

/// A control action issued against a plan or one of its nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub id: InterruptId,
    pub interrupt_type: InterruptType,
    pub plan_execution_id: PlanExecutionId,
    pub node_execution_id: Option<NodeExecutionId>,
    pub issued_by: IssuedBy,
    pub state: InterruptState,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Interrupt {
    pub fn new(interrupt_type: InterruptType, plan_execution_id: impl Into<String>, issued_by: IssuedBy) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            interrupt_type,
            plan_execution_id: plan_execution_id.into(),
            node_execution_id: None,
            issued_by,
            state: InterruptState::Registered,
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn for_node(mut self, node_execution_id: impl Into<String>) -> Self {
        self.node_execution_id = Some(node_execution_id.into());
        self
    }

    pub fn effect(&self) -> InterruptEffect {
        InterruptEffect {
            interrupt_id: self.id.clone(),
            interrupt_type: self.interrupt_type,
            applied_at: Utc::now(),
        }
    }
}

/// Record of an interrupt applied to a node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptEffect {
    pub interrupt_id: InterruptId,
    pub interrupt_type: InterruptType,
    pub applied_at: DateTime<Utc>,
}
