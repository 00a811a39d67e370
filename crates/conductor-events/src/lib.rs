//! Eventing for the conductor engine: the bus abstraction, producers,
//! the Event Sender and the generic batch consumer loop.

pub mod bus;
pub mod consumer;
pub mod payload;
pub mod producer;
pub mod routing;
pub mod sender;

pub use bus::{EventBus, InMemoryBus, ReceivedMessage};
pub use consumer::{BatchHandler, BatchOutcome, ConsumerStats, EventConsumer, MaintenanceMode};
pub use payload::{OrchestrationEventType, OrchestrationLogEvent};
pub use producer::{BusProducer, BusProducerRegistry, Producer, ProducerRegistry};
pub use routing::{topic_name, EventRouter, Route};
pub use sender::{producer_cache, EventSender, ProducerCache, SendContext};
