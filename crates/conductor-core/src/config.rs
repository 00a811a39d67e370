use crate::error::{EngineError, Result};
use crate::event::EventCategory;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::IntoEnumIterator;

pub const CONFIG_PATH_ENV: &str = "CONDUCTOR_CONFIG_PATH";

/// Configuration for the whole engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub app: AppConfig,
    pub bus: BusConfig,
    pub topics: TopicsConfig,
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
    pub graph: GraphConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    /// Service that receives orchestration events produced by this engine.
    pub orchestration_service: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "conductor".to_string(),
            orchestration_service: "pms".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Unacknowledged messages are handed out again after this long.
    pub redelivery_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            redelivery_timeout_ms: 30_000,
        }
    }
}

impl BusConfig {
    pub fn redelivery_timeout(&self) -> Duration {
        Duration::from_millis(self.redelivery_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMapping {
    pub category: EventCategory,
    pub topic: String,
    pub max_len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    pub mappings: Vec<TopicMapping>,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        let mappings = EventCategory::iter()
            .map(|category| TopicMapping {
                category,
                topic: format!("{}_event", category.to_string().to_lowercase()),
                max_len: match category {
                    EventCategory::Orchestration => 10_000,
                    EventCategory::Progress => 5_000,
                    _ => 1_000,
                },
            })
            .collect();
        Self { mappings }
    }
}

impl TopicsConfig {
    pub fn mapping(&self, category: EventCategory) -> Option<&TopicMapping> {
        self.mappings.iter().find(|m| m.category == category)
    }
}

/// Re-targets events for a step type to a fixed service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub step_type: String,
    /// Empty means the rule applies to every category.
    #[serde(default)]
    pub categories: Vec<EventCategory>,
    pub target_service: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub cache_capacity: u64,
    pub cache_ttl_secs: u64,
    pub lookup_attempts: u32,
    pub lookup_backoff_ms: u64,
    pub routing_rules: Vec<RoutingRule>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 100,
            cache_ttl_secs: 3600,
            lookup_attempts: 3,
            lookup_backoff_ms: 50,
            routing_rules: vec![RoutingRule {
                step_type: "PIPELINE_ROLLBACK".to_string(),
                categories: Vec::new(),
                target_service: "pms".to_string(),
            }],
        }
    }
}

impl ProducerConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn lookup_backoff(&self) -> Duration {
        Duration::from_millis(self.lookup_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub category: EventCategory,
    pub service: String,
    pub group: String,
    pub consumer_name: String,
    pub batch_size: usize,
    pub poll_wait_ms: u64,
    pub idle_sleep_ms: u64,
    pub max_concurrent_dispatches: usize,
    pub scheduling_delay_warn_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            category: EventCategory::Orchestration,
            service: "pms".to_string(),
            group: "graph_update".to_string(),
            consumer_name: "conductor-graph-consumer".to_string(),
            batch_size: 50,
            poll_wait_ms: 1_000,
            idle_sleep_ms: 100,
            max_concurrent_dispatches: 10,
            scheduling_delay_warn_ms: 100,
        }
    }
}

impl ConsumerConfig {
    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.poll_wait_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn scheduling_delay_warn(&self) -> Duration {
        Duration::from_millis(self.scheduling_delay_warn_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub retention_secs: u64,
    pub cache_capacity: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            retention_secs: 10 * 24 * 60 * 60,
            cache_capacity: 10_000,
        }
    }
}

impl GraphConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.consumer.batch_size == 0 {
            return Err(EngineError::configuration("consumer.batch_size", "must be greater than 0"));
        }
        if self.consumer.max_concurrent_dispatches == 0 {
            return Err(EngineError::configuration(
                "consumer.max_concurrent_dispatches",
                "must be greater than 0",
            ));
        }
        if self.producer.lookup_attempts == 0 {
            return Err(EngineError::configuration("producer.lookup_attempts", "must be greater than 0"));
        }
        if self.producer.cache_capacity == 0 {
            return Err(EngineError::configuration("producer.cache_capacity", "must be greater than 0"));
        }
        if self.graph.retention_secs == 0 {
            return Err(EngineError::configuration("graph.retention_secs", "must be greater than 0"));
        }
        for category in EventCategory::iter() {
            match self.topics.mapping(category) {
                None => {
                    return Err(EngineError::configuration(
                        "topics.mappings",
                        format!("no topic mapped for {category}"),
                    ))
                }
                Some(mapping) if mapping.topic.is_empty() || mapping.max_len == 0 => {
                    return Err(EngineError::configuration(
                        "topics.mappings",
                        format!("topic for {category} needs a name and a max_len"),
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Loads [`EngineConfig`] from a TOML or JSON file with `CONDUCTOR_*` environment overrides.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: Option<&Path>) -> Result<EngineConfig> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => EngineConfig::default(),
        };

        Self::apply_overrides(&mut config, |key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<EngineConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::configuration(path.display().to_string(), e.to_string()))?;
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&content).map_err(|e| EngineError::configuration(path.display().to_string(), e.to_string()))
        } else {
            serde_json::from_str(&content)
                .map_err(|e| EngineError::configuration(path.display().to_string(), e.to_string()))
        }
    }

    pub fn apply_overrides<F>(config: &mut EngineConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("CONDUCTOR_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(service) = lookup("CONDUCTOR_ORCHESTRATION_SERVICE") {
            config.app.orchestration_service = service;
        }
        if let Some(value) = lookup("CONDUCTOR_CONSUMER_BATCH_SIZE") {
            config.consumer.batch_size = parse_override("CONDUCTOR_CONSUMER_BATCH_SIZE", &value)?;
        }
        if let Some(value) = lookup("CONDUCTOR_MAX_CONCURRENT_DISPATCHES") {
            config.consumer.max_concurrent_dispatches = parse_override("CONDUCTOR_MAX_CONCURRENT_DISPATCHES", &value)?;
        }
        if let Some(value) = lookup("CONDUCTOR_GRAPH_RETENTION_SECS") {
            config.graph.retention_secs = parse_override("CONDUCTOR_GRAPH_RETENTION_SECS", &value)?;
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| EngineError::configuration(key, format!("invalid value '{value}': {e}")))
}
