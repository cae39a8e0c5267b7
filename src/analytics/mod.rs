//! Graph analytics: density, coverage, missing relationships and health.

pub mod metrics;

pub use metrics::{DensityLevel, HealthComponents, HealthGrade};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::cache::HealthCache;
use crate::config::HealthConfig;
use crate::db::{codec, Db};
use crate::error::Result;
use crate::model::{EntityRef, Finding, RuleType, Scope};
use crate::registry::{EntityRegistry, TypeRegistry};
use crate::validation::{ValidationContext, ValidationEngine};

use metrics::HealthFacts;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Density {
    /// Entities touched by at least one active edge.
    pub nodes: usize,
    pub edges: usize,
    pub density: f64,
    pub level: DensityLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TypeCoverage {
    pub known: usize,
    pub connected: usize,
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coverage {
    /// Types with at least one known entity, by name.
    pub by_type: BTreeMap<String, TypeCoverage>,
    pub known: usize,
    pub connected: usize,
    /// 1.0 when no entities are known.
    pub overall: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Composite score in [0, 100].
    pub score: f64,
    pub grade: HealthGrade,
    pub components: HealthComponents,
    pub entities: usize,
    pub orphans: usize,
    pub open_violations: usize,
    pub recommendations: Vec<String>,
}

/// Known entities of a scope, grouped by type, and which of them have an active edge.
struct Census {
    known: BTreeMap<String, BTreeSet<EntityRef>>,
    connected: BTreeSet<EntityRef>,
}

impl Census {
    fn coverage(&self) -> Coverage {
        let mut by_type = BTreeMap::new();
        let (mut known, mut connected) = (0, 0);
        for (entity_type, entities) in &self.known {
            if entities.is_empty() {
                continue;
            }
            let linked = entities.iter().filter(|e| self.connected.contains(*e)).count();
            known += entities.len();
            connected += linked;
            by_type.insert(
                entity_type.clone(),
                TypeCoverage {
                    known: entities.len(),
                    connected: linked,
                    ratio: metrics::ratio(linked, entities.len()),
                },
            );
        }
        Coverage {
            by_type,
            known,
            connected,
            overall: metrics::ratio(connected, known),
        }
    }
}

/// Edge endpoints in scope, each with whether any of its edges is active.
fn endpoint_activity(conn: &Connection, scope: Scope) -> Result<Vec<(EntityRef, bool)>> {
    let mut stmt = conn.prepare(
        "SELECT entity_type, entity_id, MAX(is_active) FROM ( \
             SELECT source_entity_type AS entity_type, source_entity_id AS entity_id, is_active FROM edges \
             WHERE (?1 IS NULL OR project_id = ?1) \
             UNION ALL \
             SELECT target_entity_type, target_entity_id, is_active FROM edges \
             WHERE (?1 IS NULL OR project_id = ?1) \
         ) GROUP BY entity_type, entity_id",
    )?;
    let rows = stmt.query_map(params![scope.project_param()], |row| {
        let entity = EntityRef::new(row.get::<_, String>(0)?, codec::get_uuid(row, 1)?);
        Ok((entity, row.get::<_, bool>(2)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[derive(Clone)]
pub struct AnalyticsEngine {
    db: Db,
    types: TypeRegistry,
    validation: ValidationEngine,
    entities: Option<Arc<dyn EntityRegistry>>,
    weights: HealthConfig,
    cache: Option<Arc<HealthCache>>,
}

impl std::fmt::Debug for AnalyticsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsEngine")
            .field("db", &self.db)
            .field("weights", &self.weights)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl AnalyticsEngine {
    pub fn new(db: Db, validation: ValidationEngine, weights: HealthConfig) -> Self {
        Self {
            types: TypeRegistry::new(db.clone()),
            db,
            validation,
            entities: None,
            weights,
            cache: None,
        }
    }

    pub fn with_entity_registry(mut self, registry: Arc<dyn EntityRegistry>) -> Self {
        self.entities = Some(registry);
        self
    }

    /// Serve health reports from `cache` while they are fresh.
    pub fn with_cache(self, cache: HealthCache) -> Self {
        self.with_shared_cache(Arc::new(cache))
    }

    /// Like `with_cache`, for a cache that writers also hold and clear.
    pub fn with_shared_cache(mut self, cache: Arc<HealthCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Drop cached health reports for one scope, or all of them.
    pub fn invalidate_health(&self, scope: Option<Scope>) {
        if let Some(cache) = &self.cache {
            cache.invalidate(scope.as_ref());
        }
    }

    async fn census(&self, scope: Scope) -> Result<Census> {
        let registered_types = self.types.entity_types().await?;
        let activity = self
            .db
            .with_connection(move |conn| endpoint_activity(conn, scope))
            .await?;

        let mut known: BTreeMap<String, BTreeSet<EntityRef>> = BTreeMap::new();
        let mut connected = BTreeSet::new();
        for (entity, active) in activity {
            if active {
                connected.insert(entity.clone());
            }
            known.entry(entity.entity_type.clone()).or_default().insert(entity);
        }
        if let Some(registry) = &self.entities {
            for entity_type in registered_types {
                let found = registry.entities_of_type(&entity_type, scope);
                known.entry(entity_type).or_default().extend(found);
            }
        }
        Ok(Census { known, connected })
    }

    pub async fn density(&self, scope: Scope) -> Result<Density> {
        let (nodes, edges) = self
            .db
            .with_connection(move |conn| {
                let project = scope.project_param();
                let edges: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM edges WHERE is_active = 1 AND (?1 IS NULL OR project_id = ?1)",
                    params![project],
                    |row| row.get(0),
                )?;
                let nodes: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM ( \
                         SELECT source_entity_type, source_entity_id FROM edges \
                         WHERE is_active = 1 AND (?1 IS NULL OR project_id = ?1) \
                         UNION \
                         SELECT target_entity_type, target_entity_id FROM edges \
                         WHERE is_active = 1 AND (?1 IS NULL OR project_id = ?1))",
                    params![project],
                    |row| row.get(0),
                )?;
                Ok((nodes as usize, edges as usize))
            })
            .await?;
        let density = metrics::directed_density(nodes, edges);
        Ok(Density {
            nodes,
            edges,
            density,
            level: DensityLevel::from_density(density),
        })
    }

    /// Share of known entities with at least one active edge, per type and overall.
    pub async fn coverage(&self, scope: Scope) -> Result<Coverage> {
        Ok(self.census(scope).await?.coverage())
    }

    /// Required-rule findings for the scope; nothing is recorded.
    pub async fn missing_relationships(&self, scope: Scope, ctx: ValidationContext) -> Result<Vec<Finding>> {
        self.validation
            .evaluate(scope, Some(vec![RuleType::Required]), ctx)
            .await
    }

    /// Active edge count per relationship type, most used first.
    pub async fn relationship_distribution(&self, scope: Scope) -> Result<Vec<(String, usize)>> {
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT relationship_type, COUNT(*) AS n FROM edges \
                     WHERE is_active = 1 AND (?1 IS NULL OR project_id = ?1) \
                     GROUP BY relationship_type ORDER BY n DESC, relationship_type ASC",
                )?;
                let rows = stmt.query_map(params![scope.project_param()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
                })?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    /// Composite health of a scope.
    ///
    /// Violation-free is 1 - open violations / entities, orphan-free is
    /// 1 - orphans / entities. An empty scope is vacuously healthy.
    pub async fn health_score(&self, scope: Scope) -> Result<HealthReport> {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&scope)) {
            log::debug!("Health report cache hit for {:?}", scope);
            return Ok(cached);
        }

        let coverage = self.coverage(scope).await?;
        let open_violations = self.validation.count_open(scope).await?;
        let entities = coverage.known;
        let orphans = coverage.known - coverage.connected;

        let share = |n: usize| if entities == 0 { 0.0 } else { n as f64 / entities as f64 };
        let components = HealthComponents {
            coverage: coverage.overall,
            violation_free: 1.0 - share(open_violations),
            orphan_free: 1.0 - share(orphans),
        }
        .clamped();

        let weakest_type = coverage
            .by_type
            .iter()
            .min_by(|a, b| a.1.ratio.total_cmp(&b.1.ratio))
            .map(|(t, c)| (t.clone(), c.ratio));
        let facts = HealthFacts {
            entities,
            orphans,
            open_violations,
            weakest_type,
        };

        let score = if entities == 0 {
            100.0
        } else {
            metrics::weighted_score(components, &self.weights)
        };
        let report = HealthReport {
            score,
            grade: HealthGrade::from_score(score),
            components,
            entities,
            orphans,
            open_violations,
            recommendations: metrics::recommendations(components, &facts),
        };

        log::info!(
            "Health of {:?}: {:.1} ({}) over {} entities",
            scope,
            report.score,
            report.grade,
            entities
        );
        if let Some(cache) = &self.cache {
            cache.put(scope, report.clone());
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewEdge, NewRule};
    use crate::registry::InMemoryEntityRegistry;
    use crate::store::EdgeStore;
    use crate::test_support::{entity, seeded_db};
    use std::time::Duration;
    use uuid::Uuid;

    fn analytics(db: &Db) -> AnalyticsEngine {
        AnalyticsEngine::new(db.clone(), ValidationEngine::new(db.clone()), HealthConfig::default())
    }

    #[tokio::test]
    async fn test_density_and_distribution() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db.clone());
        let d = entity("detail");
        store
            .create_edges_batch(vec![
                NewEdge::new(d.clone(), "USES", entity("material")),
                NewEdge::new(d.clone(), "USES", entity("material")),
                NewEdge::new(d.clone(), "REFERENCES", entity("spec")),
            ])
            .await
            .unwrap();

        let engine = analytics(&db);
        let density = engine.density(Scope::all()).await.unwrap();
        assert_eq!(density.nodes, 4);
        assert_eq!(density.edges, 3);
        assert!((density.density - 0.25).abs() < 1e-9);
        assert_eq!(density.level, DensityLevel::Dense);

        let dist = engine.relationship_distribution(Scope::all()).await.unwrap();
        assert_eq!(dist, vec![("USES".to_string(), 2), ("REFERENCES".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_empty_scope_is_vacuously_healthy() {
        let (db, _temp) = seeded_db().await;
        let engine = analytics(&db);
        let density = engine.density(Scope::all()).await.unwrap();
        assert_eq!(density.density, 0.0);
        assert_eq!(density.level, DensityLevel::Sparse);

        let report = engine.health_score(Scope::project(Uuid::new_v4())).await.unwrap();
        assert_eq!(report.score, 100.0);
        assert_eq!(report.grade, HealthGrade::A);
        assert_eq!(report.recommendations.len(), 1);
    }

    #[tokio::test]
    async fn test_perfect_scope_scores_100() {
        let (db, _temp) = seeded_db().await;
        let project = Uuid::new_v4();
        EdgeStore::new(db.clone())
            .create_edge(NewEdge::new(entity("detail"), "USES", entity("material")).in_project(project))
            .await
            .unwrap();

        let report = analytics(&db).health_score(Scope::project(project)).await.unwrap();
        assert_eq!(report.entities, 2);
        assert_eq!(report.orphans, 0);
        assert!((report.score - 100.0).abs() < 1e-9);
        assert!(report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_coverage_and_health_with_orphans_and_violations() {
        let (db, _temp) = seeded_db().await;
        let project = Uuid::new_v4();
        let registry = Arc::new(InMemoryEntityRegistry::new());
        let linked = entity("detail");
        let lonely = entity("detail");
        registry.insert(linked.clone(), Some(project));
        registry.insert(lonely.clone(), Some(project));

        let store = EdgeStore::new(db.clone());
        store
            .create_edge(NewEdge::new(linked.clone(), "USES", entity("material")).in_project(project))
            .await
            .unwrap();
        let validation = ValidationEngine::new(db.clone()).with_entity_registry(registry.clone());
        validation
            .create_rule(NewRule::required("detail", "USES", Some("material")))
            .await
            .unwrap();
        validation
            .validate_project(project, None, ValidationContext::default())
            .await
            .unwrap();

        let engine = AnalyticsEngine::new(db.clone(), validation, HealthConfig::default())
            .with_entity_registry(registry);

        let coverage = engine.coverage(Scope::project(project)).await.unwrap();
        assert_eq!(coverage.known, 3);
        assert_eq!(coverage.connected, 2);
        assert_eq!(coverage.by_type["detail"].known, 2);
        assert_eq!(coverage.by_type["detail"].ratio, 0.5);
        assert_eq!(coverage.by_type["material"].ratio, 1.0);

        let missing = engine
            .missing_relationships(Scope::project(project), ValidationContext::default())
            .await
            .unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].entity, lonely);

        let report = engine.health_score(Scope::project(project)).await.unwrap();
        assert_eq!(report.open_violations, 1);
        assert_eq!(report.orphans, 1);
        // 0.4 * 2/3 + 0.4 * 2/3 + 0.2 * 2/3
        assert!((report.score - 200.0 / 3.0).abs() < 1e-6);
        assert_eq!(report.grade, HealthGrade::D);
        assert!((0.0..=100.0).contains(&report.score));
        assert!(!report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_health_cache_serves_until_invalidated() {
        let (db, _temp) = seeded_db().await;
        let engine = analytics(&db).with_cache(HealthCache::new(8, Duration::from_secs(60)));
        let first = engine.health_score(Scope::all()).await.unwrap();
        assert_eq!(first.entities, 0);

        EdgeStore::new(db.clone())
            .create_edge(NewEdge::new(entity("detail"), "USES", entity("material")))
            .await
            .unwrap();
        let cached = engine.health_score(Scope::all()).await.unwrap();
        assert_eq!(cached, first);

        engine.invalidate_health(Some(Scope::all()));
        let fresh = engine.health_score(Scope::all()).await.unwrap();
        assert_eq!(fresh.entities, 2);
    }
}
