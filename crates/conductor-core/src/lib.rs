//! Core types for the conductor execution engine: the status state machine,
//! the execution data model, configuration, errors and the Status Store.

pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod status;
pub mod store;

pub use config::{ConfigLoader, EngineConfig};
pub use error::{EngineError, EntityKind, Result};
pub use event::{BusMessage, EventCategory};
pub use model::{
    Interrupt, InterruptEffect, InterruptState, InterruptType, IssuedBy, NodeExecution, NodeUpdateOp,
    PlanExecution,
};
pub use status::{calculate_status, Status};
pub use store::{
    InMemoryExecutionStore, InterruptStore, NodeExecutionStore, NodeTransition, PlanExecutionStore,
    PlanTransition,
};
