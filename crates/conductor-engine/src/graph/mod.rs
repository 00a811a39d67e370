//! Execution graph: a cached tree projection of a plan's node executions.

pub mod cache;
pub mod model;
pub mod service;

pub use cache::{GraphCache, MokaGraphCache};
pub use model::{structure_hash, GraphVertex, OrchestrationGraph, GRAPH_ALGORITHM_ID};
pub use service::{DetachedTask, GraphGenerationService};
