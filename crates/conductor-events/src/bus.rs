use async_trait::async_trait;
use conductor_core::{BusMessage, EngineError, Result};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, trace};

/// A message handed to a consumer, identified by its bus-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub id: String,
    pub message: BusMessage,
    pub delivery_count: u32,
}

/// Topic-based publish/subscribe backend with consumer groups.
///
/// Delivery is at-least-once: a message read by a group stays pending until
/// acknowledged and is handed out again once the redelivery timeout passes.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Appends to `topic`, trimming the oldest entries beyond `max_len`.
    async fn publish(&self, topic: &str, max_len: usize, message: BusMessage) -> Result<String>;

    /// Reads at most `max_messages` for `group`, waiting up to `wait` when
    /// nothing is available.
    async fn read(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>>;

    async fn ack(&self, topic: &str, group: &str, message_ids: &[String]) -> Result<usize>;

    async fn topic_len(&self, topic: &str) -> usize;
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    id: String,
    message: BusMessage,
}

#[derive(Debug)]
struct PendingEntry {
    entry: Entry,
    consumer: String,
    delivered_at: Instant,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct GroupState {
    next_seq: u64,
    pending: BTreeMap<u64, PendingEntry>,
}

#[derive(Debug, Default)]
struct TopicState {
    entries: VecDeque<Entry>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

/// In-process [`EventBus`] used by tests and single-node deployments.
#[derive(Debug)]
pub struct InMemoryBus {
    topics: Mutex<HashMap<String, TopicState>>,
    notify: Notify,
    redelivery_timeout: Duration,
}

impl InMemoryBus {
    pub fn new(redelivery_timeout: Duration) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            redelivery_timeout,
        }
    }

    /// Number of delivered but unacknowledged messages for a group.
    pub async fn pending_count(&self, topic: &str, group: &str) -> usize {
        self.topics
            .lock()
            .await
            .get(topic)
            .and_then(|t| t.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    async fn take_batch(&self, topic: &str, group: &str, consumer: &str, max_messages: usize) -> Vec<ReceivedMessage> {
        let mut topics = self.topics.lock().await;
        let state = topics.entry(topic.to_string()).or_default();
        let group_state = state.groups.entry(group.to_string()).or_default();
        let now = Instant::now();
        let mut batch = Vec::new();

        for pending in group_state.pending.values_mut() {
            if batch.len() >= max_messages {
                break;
            }
            if now.duration_since(pending.delivered_at) >= self.redelivery_timeout {
                pending.delivered_at = now;
                pending.delivery_count += 1;
                pending.consumer = consumer.to_string();
                debug!(topic, group, message_id = %pending.entry.id, "Redelivering unacknowledged message");
                batch.push(ReceivedMessage {
                    id: pending.entry.id.clone(),
                    message: pending.entry.message.clone(),
                    delivery_count: pending.delivery_count,
                });
            }
        }

        let start = group_state.next_seq;
        for entry in state.entries.iter().filter(|e| e.seq >= start) {
            if batch.len() >= max_messages {
                break;
            }
            group_state.next_seq = entry.seq + 1;
            group_state.pending.insert(
                entry.seq,
                PendingEntry {
                    entry: entry.clone(),
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            batch.push(ReceivedMessage {
                id: entry.id.clone(),
                message: entry.message.clone(),
                delivery_count: 1,
            });
        }
        batch
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, topic: &str, max_len: usize, message: BusMessage) -> Result<String> {
        if max_len == 0 {
            return Err(EngineError::bus(topic, "topic max_len must be greater than 0"));
        }
        let id = {
            let mut topics = self.topics.lock().await;
            let state = topics.entry(topic.to_string()).or_default();
            let seq = state.next_seq;
            state.next_seq += 1;
            let id = format!("{}-{}", chrono::Utc::now().timestamp_millis(), seq);
            state.entries.push_back(Entry {
                seq,
                id: id.clone(),
                message,
            });
            while state.entries.len() > max_len {
                if let Some(trimmed) = state.entries.pop_front() {
                    trace!(topic, message_id = %trimmed.id, "Trimmed message beyond topic limit");
                }
            }
            id
        };
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn read(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.take_batch(topic, group, consumer, max_messages).await;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    async fn ack(&self, topic: &str, group: &str, message_ids: &[String]) -> Result<usize> {
        let mut topics = self.topics.lock().await;
        let Some(group_state) = topics.get_mut(topic).and_then(|t| t.groups.get_mut(group)) else {
            return Ok(0);
        };
        let before = group_state.pending.len();
        group_state
            .pending
            .retain(|_, pending| !message_ids.contains(&pending.entry.id));
        Ok(before - group_state.pending.len())
    }

    async fn topic_len(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .await
            .get(topic)
            .map(|t| t.entries.len())
            .unwrap_or(0)
    }
}
