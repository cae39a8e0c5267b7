pub mod analytics;
pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod graph;
pub mod model;
pub mod registry;
pub mod store;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use analytics::{AnalyticsEngine, HealthReport};
pub use config::Config;
pub use engine::RelationshipEngine;
pub use error::{RelgraphError, Result};
pub use graph::GraphQueryEngine;
pub use model::{Direction, EntityRef, Scope};
pub use registry::{EntityRegistry, InMemoryEntityRegistry, TypeRegistry};
pub use store::{EdgeFilter, EdgeStore};
pub use validation::{ValidationContext, ValidationEngine};
