//! Category-to-topic mapping and step-type routing rules.

use conductor_core::config::{ProducerConfig, RoutingRule, TopicMapping, TopicsConfig};
use conductor_core::{EngineError, EventCategory, Result};

/// Fully qualified topic name for a service's copy of a category topic.
pub fn topic_name(service: &str, topic: &str) -> String {
    format!("{service}:{topic}")
}

/// A resolved destination for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub service: String,
    pub topic: String,
    pub max_len: usize,
}

#[derive(Debug, Clone)]
pub struct EventRouter {
    topics: TopicsConfig,
    rules: Vec<RoutingRule>,
}

impl EventRouter {
    pub fn new(topics: TopicsConfig, rules: Vec<RoutingRule>) -> Self {
        Self { topics, rules }
    }

    pub fn from_config(topics: &TopicsConfig, producer: &ProducerConfig) -> Self {
        Self::new(topics.clone(), producer.routing_rules.clone())
    }

    /// The service an event is delivered to. The first rule matching the
    /// step type (and category, when the rule lists any) wins over the
    /// caller's choice.
    pub fn target_service<'a>(
        &'a self,
        step_type: Option<&str>,
        category: EventCategory,
        requested: &'a str,
    ) -> &'a str {
        let Some(step_type) = step_type else {
            return requested;
        };
        self.rules
            .iter()
            .find(|rule| {
                rule.step_type == step_type && (rule.categories.is_empty() || rule.categories.contains(&category))
            })
            .map(|rule| rule.target_service.as_str())
            .unwrap_or(requested)
    }

    pub fn mapping(&self, category: EventCategory) -> Result<&TopicMapping> {
        self.topics.mapping(category).ok_or_else(|| {
            EngineError::configuration("topics.mappings", format!("no topic mapped for {category}"))
        })
    }

    pub fn route(&self, category: EventCategory, requested_service: &str, step_type: Option<&str>) -> Result<Route> {
        let mapping = self.mapping(category)?;
        let service = self.target_service(step_type, category, requested_service);
        Ok(Route {
            service: service.to_string(),
            topic: topic_name(service, &mapping.topic),
            max_len: mapping.max_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> EventRouter {
        let producer = ProducerConfig {
            routing_rules: vec![
                RoutingRule {
                    step_type: "PIPELINE_ROLLBACK".to_string(),
                    categories: Vec::new(),
                    target_service: "pms".to_string(),
                },
                RoutingRule {
                    step_type: "APPROVAL".to_string(),
                    categories: vec![EventCategory::NodeStart],
                    target_service: "approvals".to_string(),
                },
            ],
            ..ProducerConfig::default()
        };
        EventRouter::from_config(&TopicsConfig::default(), &producer)
    }

    #[test]
    fn rollback_steps_are_retargeted() {
        let route = router()
            .route(EventCategory::NodeStart, "ci", Some("PIPELINE_ROLLBACK"))
            .expect("route");
        assert_eq!(route.service, "pms");
        assert_eq!(route.topic, "pms:node_start_event");
    }

    #[test]
    fn category_scoped_rule_only_matches_its_categories() {
        let router = router();
        assert_eq!(
            router.target_service(Some("APPROVAL"), EventCategory::NodeStart, "ci"),
            "approvals"
        );
        assert_eq!(router.target_service(Some("APPROVAL"), EventCategory::Progress, "ci"), "ci");
        assert_eq!(router.target_service(None, EventCategory::Progress, "ci"), "ci");
    }

    #[test]
    fn unmapped_category_is_a_configuration_error() {
        let router = EventRouter::new(TopicsConfig { mappings: Vec::new() }, Vec::new());
        let err = router.route(EventCategory::Interrupt, "pms", None).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }
}
