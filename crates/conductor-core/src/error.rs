// Error taxonomy for the execution engine

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// Kinds of records that can be looked up by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum EntityKind {
    PlanExecution,
    NodeExecution,
    Interrupt,
    Graph,
}

/// Errors surfaced by the engine.
///
/// A rejected compare-and-swap is not an error: status-mutating operations
/// return `Ok(None)` for that case, so callers can tell "updated", "no-op"
/// and "failed" apart.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    #[error("No nodes found for plan execution {plan_execution_id}")]
    NoNodesFound { plan_execution_id: String },

    #[error("No root node found for plan execution {plan_execution_id}")]
    RootNodeMissing { plan_execution_id: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {field} - {message}")]
    Configuration { field: String, message: String },

    #[error("Transient failure during {operation} after {attempts} attempt(s): {message}")]
    Transient {
        operation: String,
        message: String,
        attempts: u32,
    },

    #[error("Authorization error: {operation} - {message}")]
    Authorization { operation: String, message: String },

    #[error("Serialization error: {context} - {message}")]
    Serialization { context: String, message: String },

    #[error("Bus error on topic {topic}: {message}")]
    Bus { topic: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn not_found(entity: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn no_nodes_found(plan_execution_id: impl Into<String>) -> Self {
        Self::NoNodesFound {
            plan_execution_id: plan_execution_id.into(),
        }
    }

    pub fn root_node_missing(plan_execution_id: impl Into<String>) -> Self {
        Self::RootNodeMissing {
            plan_execution_id: plan_execution_id.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn transient(operation: impl Into<String>, message: impl Into<String>, attempts: u32) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
            attempts,
        }
    }

    pub fn authorization(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authorization {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn serialization(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialization {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn bus(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Bus {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::Transient { .. } | EngineError::Bus { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::serialization("json", err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_missing_record() {
        let err = EngineError::not_found(EntityKind::PlanExecution, "plan-1");
        assert_eq!(err.to_string(), "PlanExecution not found: plan-1");
        assert!(err.is_not_found());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn only_infrastructure_failures_are_recoverable() {
        assert!(EngineError::transient("producer lookup", "registry down", 3).is_recoverable());
        assert!(EngineError::bus("orchestration", "closed").is_recoverable());
        assert!(!EngineError::configuration("topics", "missing").is_recoverable());
        assert!(!EngineError::no_nodes_found("p").is_recoverable());
    }
}
