use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub relgraph: RelgraphConfig,
    #[serde(default)]
    pub traversal: TraversalConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Storage and process settings
#[derive(Debug, Clone, Deserialize)]
pub struct RelgraphConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Bounds for graph traversal. Requested values above a limit are clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    pub default_max_depth: usize,
    pub max_depth_limit: usize,
    pub default_max_nodes: usize,
    pub max_nodes_limit: usize,
    /// Cap on paths returned by `find_all_paths`
    pub max_paths: usize,
    /// Cap on cycles returned by `detect_cycles`
    pub max_cycles: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            default_max_depth: 3,
            max_depth_limit: 10,
            default_max_nodes: 200,
            max_nodes_limit: 5000,
            max_paths: 1000,
            max_cycles: 1000,
        }
    }
}

impl TraversalConfig {
    /// Requested depth, or the default when unset, clamped to the limit
    pub fn clamp_depth(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_max_depth).min(self.max_depth_limit)
    }

    pub fn clamp_nodes(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_max_nodes).min(self.max_nodes_limit)
    }
}

/// Component weights of the health score
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub coverage_weight: f64,
    pub violation_weight: f64,
    pub orphan_weight: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            coverage_weight: 0.4,
            violation_weight: 0.4,
            orphan_weight: 0.2,
        }
    }
}

/// Health report cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 64,
            ttl_secs: 300,
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in RELGRAPH_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("RELGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml(&config_str)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    /// Parse and validate configuration text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration for an explicit database path with every other value defaulted
    pub fn for_db(db_path: impl Into<PathBuf>) -> Self {
        Self {
            relgraph: RelgraphConfig {
                db_path: db_path.into(),
                migrations_dir: default_migrations_dir(),
                log_level: default_log_level(),
            },
            traversal: TraversalConfig::default(),
            health: HealthConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let t = &self.traversal;
        for (name, value) in [
            ("default_max_depth", t.default_max_depth),
            ("max_depth_limit", t.max_depth_limit),
            ("default_max_nodes", t.default_max_nodes),
            ("max_nodes_limit", t.max_nodes_limit),
            ("max_paths", t.max_paths),
            ("max_cycles", t.max_cycles),
        ] {
            if value == 0 {
                anyhow::bail!("traversal.{} must be greater than 0", name);
            }
        }
        if t.default_max_depth > t.max_depth_limit {
            anyhow::bail!("traversal.default_max_depth must not exceed max_depth_limit");
        }
        if t.default_max_nodes > t.max_nodes_limit {
            anyhow::bail!("traversal.default_max_nodes must not exceed max_nodes_limit");
        }

        let h = &self.health;
        for (name, value) in [
            ("coverage_weight", h.coverage_weight),
            ("violation_weight", h.violation_weight),
            ("orphan_weight", h.orphan_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("health.{} must be between 0.0 and 1.0", name);
            }
        }
        let sum = h.coverage_weight + h.violation_weight + h.orphan_weight;
        if (sum - 1.0).abs() > 0.001 {
            anyhow::bail!("health weights must sum to 1.0 (got {:.3})", sum);
        }

        if self.cache.enabled && self.cache.capacity == 0 {
            anyhow::bail!("cache.capacity must be greater than 0 when the cache is enabled");
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.relgraph.db_path
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.relgraph.migrations_dir
    }
}
