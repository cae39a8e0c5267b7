pub mod health_cache;

pub use health_cache::HealthCache;
