use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumIter, EnumString};

/// Metadata keys attached to every published message.
pub mod metadata_keys {
    pub const SERVICE_NAME: &str = "serviceName";
    pub const EVENT_CATEGORY: &str = "eventCategory";
    pub const PLAN_EXECUTION_ID: &str = "planExecutionId";
    pub const NODE_EXECUTION_ID: &str = "nodeExecutionId";
    pub const MONITORED: &str = "monitored";
    pub const LOG_CONTEXT_PREFIX: &str = "log.";
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    Interrupt,
    Orchestration,
    Facilitator,
    NodeStart,
    Progress,
    NodeAdvise,
    NodeResume,
    CreatePartialPlan,
}

/// Wire shape of a message placed on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub category: EventCategory,
    pub service: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(category: EventCategory, service: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            category,
            service: service.into(),
            metadata: HashMap::new(),
            payload,
        }
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}
