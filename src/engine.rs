//! `RelationshipEngine`: every component wired around one database.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::analytics::AnalyticsEngine;
use crate::cache::HealthCache;
use crate::config::Config;
use crate::db::{migrate, Db};
use crate::error::Result;
use crate::graph::GraphQueryEngine;
use crate::registry::{EntityRegistry, TypeRegistry};
use crate::store::EdgeStore;
use crate::validation::ValidationEngine;

/// Outcome of a schema check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaStatus {
    pub applied_migrations: Vec<String>,
    /// Expected tables and indexes that do not exist
    pub missing: Vec<String>,
    pub journal_mode: String,
    pub foreign_keys: bool,
    pub integrity: String,
}

impl SchemaStatus {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty()
            && self.journal_mode.eq_ignore_ascii_case("wal")
            && self.foreign_keys
            && self.integrity == "ok"
    }
}

#[derive(Clone)]
pub struct RelationshipEngine {
    db: Db,
    config: Config,
    types: TypeRegistry,
    edges: EdgeStore,
    graph: GraphQueryEngine,
    validation: ValidationEngine,
    analytics: AnalyticsEngine,
}

impl std::fmt::Debug for RelationshipEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationshipEngine")
            .field("db", &self.db)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RelationshipEngine {
    /// Open the configured database, applying pending migrations.
    pub async fn open(config: Config) -> Result<Self> {
        let db = Db::new(config.db_path());
        let migrations_dir = config.migrations_dir().to_path_buf();
        let applied = db
            .with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await?;
        if applied > 0 {
            log::info!("Applied {} migration(s) to {}", applied, db.path().display());
        }
        Ok(Self::build(db, config, None))
    }

    fn build(db: Db, config: Config, entities: Option<Arc<dyn EntityRegistry>>) -> Self {
        let mut edges = EdgeStore::new(db.clone());
        let mut graph = GraphQueryEngine::new(db.clone(), config.traversal);
        let mut validation = ValidationEngine::new(db.clone());
        if let Some(registry) = &entities {
            edges = edges.with_entity_registry(registry.clone());
            graph = graph.with_entity_registry(registry.clone());
            validation = validation.with_entity_registry(registry.clone());
        }
        let cache = config.cache.enabled.then(|| {
            Arc::new(HealthCache::new(
                config.cache.capacity,
                Duration::from_secs(config.cache.ttl_secs),
            ))
        });
        if let Some(cache) = &cache {
            edges = edges.with_health_cache(cache.clone());
            validation = validation.with_health_cache(cache.clone());
        }

        let mut analytics = AnalyticsEngine::new(db.clone(), validation.clone(), config.health);
        if let Some(registry) = entities {
            analytics = analytics.with_entity_registry(registry);
        }
        if let Some(cache) = cache {
            analytics = analytics.with_shared_cache(cache);
        }

        Self {
            types: TypeRegistry::new(db.clone()),
            db,
            config,
            edges,
            graph,
            validation,
            analytics,
        }
    }

    /// Rebuild every component around an entity registry.
    pub fn with_entity_registry(self, registry: Arc<dyn EntityRegistry>) -> Self {
        Self::build(self.db, self.config, Some(registry))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn edges(&self) -> &EdgeStore {
        &self.edges
    }

    pub fn graph(&self) -> &GraphQueryEngine {
        &self.graph
    }

    pub fn validation(&self) -> &ValidationEngine {
        &self.validation
    }

    pub fn analytics(&self) -> &AnalyticsEngine {
        &self.analytics
    }

    /// Check migrations, expected schema objects and connection pragmas.
    pub async fn verify(&self) -> Result<SchemaStatus> {
        let status = self
            .db
            .with_connection(|conn| {
                let applied_migrations = migrate::get_applied_migrations(conn)?;
                let missing = migrate::verify_schema(conn)?;
                let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
                let foreign_keys: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
                let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
                Ok(SchemaStatus {
                    applied_migrations,
                    missing,
                    journal_mode,
                    foreign_keys: foreign_keys == 1,
                    integrity,
                })
            })
            .await?;

        for object in &status.missing {
            log::error!("Missing {}", object);
        }
        log::debug!(
            "{} migration(s) applied, journal mode {}",
            status.applied_migrations.len(),
            status.journal_mode
        );
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, EntityRef, NewEdge, NewRule, RelationshipType, Scope};
    use crate::registry::InMemoryEntityRegistry;
    use crate::RelgraphError;
    use std::path::Path;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn config(temp: &TempDir) -> Config {
        let mut config = Config::for_db(temp.path().join("engine.db"));
        config.relgraph.migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        config
    }

    #[tokio::test]
    async fn test_open_migrates_and_verifies() {
        let temp = TempDir::new().unwrap();
        let engine = RelationshipEngine::open(config(&temp)).await.unwrap();

        let status = engine.verify().await.unwrap();
        assert!(status.is_ok(), "{:?}", status);
        assert_eq!(status.applied_migrations.len(), 3);

        // reopening applies nothing new
        let again = RelationshipEngine::open(config(&temp)).await.unwrap();
        assert_eq!(again.verify().await.unwrap(), status);
    }

    #[tokio::test]
    async fn test_components_share_one_database() {
        let temp = TempDir::new().unwrap();
        let engine = RelationshipEngine::open(config(&temp)).await.unwrap();
        engine
            .types()
            .register(RelationshipType::new("USES", "Uses", "composition", ["detail"], ["material"]))
            .await
            .unwrap();

        let (d, m) = (EntityRef::new("detail", Uuid::new_v4()), EntityRef::new("material", Uuid::new_v4()));
        engine.edges().create_edge(NewEdge::new(d.clone(), "USES", m.clone())).await.unwrap();

        let related = engine.graph().get_related_entities(&d, None, Direction::Both, Some(1), Scope::all()).await.unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].entity, m);

        let density = engine.analytics().density(Scope::all()).await.unwrap();
        assert_eq!(density.edges, 1);
    }

    #[tokio::test]
    async fn test_writes_refresh_cached_health() {
        let temp = TempDir::new().unwrap();
        let engine = RelationshipEngine::open(config(&temp)).await.unwrap();
        assert!(engine.config().cache.enabled);
        engine
            .types()
            .register(RelationshipType::new("USES", "Uses", "composition", ["detail"], ["material"]))
            .await
            .unwrap();

        let empty = engine.analytics().health_score(Scope::all()).await.unwrap();
        assert_eq!(empty.entities, 0);

        let (d, m) = (EntityRef::new("detail", Uuid::new_v4()), EntityRef::new("material", Uuid::new_v4()));
        let edge = engine.edges().create_edge(NewEdge::new(d, "USES", m)).await.unwrap();
        let connected = engine.analytics().health_score(Scope::all()).await.unwrap();
        assert_eq!(connected.entities, 2);
        assert_eq!(connected.open_violations, 0);

        engine
            .validation()
            .create_rule(NewRule::cardinality("detail", "USES", "material", 2, None))
            .await
            .unwrap();
        let written = engine
            .validation()
            .validate_scope(Scope::all(), None, Default::default())
            .await
            .unwrap();
        assert_eq!(written.len(), 1);
        let flagged = engine.analytics().health_score(Scope::all()).await.unwrap();
        assert_eq!(flagged.open_violations, 1);
        assert!(flagged.score < connected.score);

        engine
            .validation()
            .resolve_violation(written[0].violation_id, None, None)
            .await
            .unwrap();
        let resolved = engine.analytics().health_score(Scope::all()).await.unwrap();
        assert_eq!(resolved.open_violations, 0);
        assert_eq!(resolved.score, connected.score);

        engine.edges().delete_edge(edge.edge_id, true).await.unwrap();
        let removed = engine.analytics().health_score(Scope::all()).await.unwrap();
        assert_eq!(removed.entities, 0);
    }

    #[tokio::test]
    async fn test_entity_registry_reaches_edge_store() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(InMemoryEntityRegistry::new());
        let engine = RelationshipEngine::open(config(&temp))
            .await
            .unwrap()
            .with_entity_registry(registry.clone());
        engine
            .types()
            .register(RelationshipType::new("USES", "Uses", "composition", ["detail"], ["material"]))
            .await
            .unwrap();

        let d = EntityRef::new("detail", Uuid::new_v4());
        let m = EntityRef::new("material", Uuid::new_v4());
        registry.insert(d.clone(), None);

        let err = engine
            .edges()
            .create_edge(NewEdge::new(d.clone(), "USES", m.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, RelgraphError::UnknownEntity(ref e) if *e == m));

        registry.insert(m.clone(), None);
        engine.edges().create_edge(NewEdge::new(d, "USES", m)).await.unwrap();
    }
}
