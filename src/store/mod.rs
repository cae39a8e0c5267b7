//! Edge storage: CRUD, batch creation and filtered queries over the `edges` table.

mod batch;
mod query;
pub(crate) mod rows;

pub use query::EdgeFilter;

use std::sync::Arc;

use rusqlite::params;
use uuid::Uuid;

use crate::cache::HealthCache;
use crate::db::{codec, Db};
use crate::error::{RelgraphError, Result};
use crate::model::{Edge, EdgePatch, NewEdge, Scope};
use crate::registry::EntityRegistry;

use rows::{insert_edge, load_edge, prepare_edge};

#[derive(Clone)]
pub struct EdgeStore {
    db: Db,
    entities: Option<Arc<dyn EntityRegistry>>,
    health: Option<Arc<HealthCache>>,
}

impl std::fmt::Debug for EdgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeStore")
            .field("db", &self.db)
            .field("entity_registry", &self.entities.is_some())
            .field("health_cache", &self.health.is_some())
            .finish()
    }
}

impl EdgeStore {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            entities: None,
            health: None,
        }
    }

    /// Reject edges whose endpoints the registry does not know.
    pub fn with_entity_registry(mut self, registry: Arc<dyn EntityRegistry>) -> Self {
        self.entities = Some(registry);
        self
    }

    /// Clear `cache` after every successful write.
    pub fn with_health_cache(mut self, cache: Arc<HealthCache>) -> Self {
        self.health = Some(cache);
        self
    }

    pub(crate) fn edges_changed(&self) {
        if let Some(cache) = &self.health {
            cache.invalidate(None);
        }
    }

    fn check_entities(&self, new: &NewEdge) -> Result<()> {
        if let Some(registry) = &self.entities {
            for entity in [&new.source, &new.target] {
                if !registry.exists(entity) {
                    return Err(RelgraphError::UnknownEntity(entity.clone()));
                }
            }
        }
        Ok(())
    }

    /// Create one edge.
    ///
    /// `DuplicateEdge` means an equivalent active edge is already stored;
    /// reconciliation callers should treat it as success.
    pub async fn create_edge(&self, new: NewEdge) -> Result<Edge> {
        self.check_entities(&new)?;

        let edge = self
            .db
            .with_connection(move |conn| {
                let edge = prepare_edge(conn, new)?;
                insert_edge(conn, &edge)?;
                Ok(edge)
            })
            .await?;
        self.edges_changed();

        log::debug!(
            "Created edge {} {} -[{}]-> {}",
            edge.edge_id,
            edge.source,
            edge.relationship_type,
            edge.target
        );
        Ok(edge)
    }

    pub async fn get_edge(&self, edge_id: Uuid) -> Result<Edge> {
        self.db
            .with_connection(move |conn| {
                load_edge(conn, edge_id)?.ok_or_else(|| RelgraphError::not_found("edge", edge_id))
            })
            .await
    }

    /// Apply a patch to the mutable fields of an edge.
    pub async fn update_edge(&self, edge_id: Uuid, patch: EdgePatch) -> Result<Edge> {
        let edge = self
            .db
            .with_transaction(move |tx| {
                let mut edge =
                    load_edge(tx, edge_id)?.ok_or_else(|| RelgraphError::not_found("edge", edge_id))?;

                if patch.source.as_ref().is_some_and(|s| *s != edge.source) {
                    return Err(RelgraphError::ImmutableField("source".to_string()));
                }
                if patch.target.as_ref().is_some_and(|t| *t != edge.target) {
                    return Err(RelgraphError::ImmutableField("target".to_string()));
                }
                if patch
                    .relationship_type
                    .as_ref()
                    .is_some_and(|r| *r != edge.relationship_type)
                {
                    return Err(RelgraphError::ImmutableField("relationship_type".to_string()));
                }

                if let Some(strength) = patch.strength {
                    if !(0.0..=1.0).contains(&strength) {
                        return Err(RelgraphError::InvalidInput(format!(
                            "strength {} is outside [0, 1]",
                            strength
                        )));
                    }
                    edge.strength = strength;
                }
                if let Some(metadata) = patch.metadata {
                    edge.metadata = metadata;
                }
                match patch.valid_to {
                    None => {}
                    Some(None) => edge.valid_to = None,
                    Some(Some(valid_to)) => {
                        let valid_to = codec::truncate(valid_to);
                        if valid_to < edge.valid_from {
                            return Err(RelgraphError::InvalidInput(
                                "valid_to precedes valid_from".to_string(),
                            ));
                        }
                        edge.valid_to = Some(valid_to);
                    }
                }
                if let Some(status) = patch.status {
                    edge.status = status;
                }
                edge.updated_at = codec::now();

                tx.execute(
                    "UPDATE edges SET strength = ?1, metadata = ?2, valid_to = ?3, status = ?4, updated_at = ?5 \
                     WHERE edge_id = ?6",
                    params![
                        edge.strength,
                        serde_json::to_string(&edge.metadata)?,
                        edge.valid_to.as_ref().map(codec::ts),
                        edge.status.as_str(),
                        codec::ts(&edge.updated_at),
                        edge_id.to_string(),
                    ],
                )?;
                Ok(edge)
            })
            .await?;
        self.edges_changed();
        Ok(edge)
    }

    /// Soft delete flips `is_active`; hard delete removes the row for good.
    ///
    /// Hard delete is refused while open violations reference the edge.
    pub async fn delete_edge(&self, edge_id: Uuid, hard: bool) -> Result<()> {
        let id = edge_id.to_string();
        self.db
            .with_transaction(move |tx| {
                if hard {
                    let open: i64 = tx.query_row(
                        "SELECT COUNT(*) FROM violations WHERE edge_id = ?1 AND status = 'open'",
                        params![id],
                        |row| row.get(0),
                    )?;
                    if open > 0 {
                        return Err(RelgraphError::OpenViolations {
                            edge_id,
                            count: open as usize,
                        });
                    }
                    let removed = tx.execute("DELETE FROM edges WHERE edge_id = ?1", params![id])?;
                    if removed == 0 {
                        return Err(RelgraphError::not_found("edge", edge_id));
                    }
                } else {
                    let changed = tx.execute(
                        "UPDATE edges SET is_active = 0, updated_at = ?1 WHERE edge_id = ?2",
                        params![codec::ts(&codec::now()), id],
                    )?;
                    if changed == 0 {
                        return Err(RelgraphError::not_found("edge", edge_id));
                    }
                }
                Ok(())
            })
            .await?;
        self.edges_changed();

        log::debug!("Deleted edge {} (hard={})", edge_id, hard);
        Ok(())
    }

    pub async fn count_edges(&self, scope: Scope, active_only: bool) -> Result<usize> {
        let project = scope.project_param();
        self.db
            .with_connection(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM edges WHERE (?1 IS NULL OR project_id = ?1) AND (?2 = 0 OR is_active = 1)",
                    params![project, active_only],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EdgeStatus, EntityRef, SourceKind};
    use crate::registry::InMemoryEntityRegistry;
    use crate::test_support::{entity, seeded_db};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_then_get_round_trip() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        let project = Uuid::new_v4();
        let new = NewEdge::new(entity("detail"), "USES", entity("material"))
            .in_project(project)
            .with_strength(0.7)
            .with_metadata("quantity", json!(12))
            .created_by("alice")
            .with_source_kind(SourceKind::Ai, 0.85);

        let created = store.create_edge(new.clone()).await.unwrap();
        let loaded = store.get_edge(created.edge_id).await.unwrap();

        assert_eq!(loaded, created);
        assert_eq!(loaded.project_id, Some(project));
        assert_eq!(loaded.source, new.source);
        assert_eq!(loaded.target, new.target);
        assert_eq!(loaded.strength, 0.7);
        assert_eq!(loaded.metadata["quantity"], json!(12));
        assert_eq!(loaded.created_by.as_deref(), Some("alice"));
        assert_eq!(loaded.source_kind, SourceKind::Ai);
        assert_eq!(loaded.confidence, 0.85);
        assert!(loaded.is_active);
        assert_eq!(loaded.status, EdgeStatus::Active);
    }

    #[tokio::test]
    async fn test_defaults_come_from_type() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        // RELATED_TO is seeded bidirectional with strength 0.5
        let edge = store
            .create_edge(NewEdge::new(entity("detail"), "RELATED_TO", entity("detail")))
            .await
            .unwrap();
        assert!(edge.is_bidirectional);
        assert_eq!(edge.strength, 0.5);
    }

    #[tokio::test]
    async fn test_duplicate_edge_rejected_first_unaffected() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        let new = NewEdge::new(entity("detail"), "USES", entity("material"));

        let first = store.create_edge(new.clone()).await.unwrap();
        let err = store.create_edge(new).await.unwrap_err();
        assert!(matches!(err, RelgraphError::DuplicateEdge { .. }));
        assert!(err.is_benign());

        let still = store.get_edge(first.edge_id).await.unwrap();
        assert_eq!(still, first);
    }

    #[tokio::test]
    async fn test_duplicate_global_edges_rejected() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        let new = NewEdge::new(entity("detail"), "USES", entity("material"));
        store.create_edge(new.clone()).await.unwrap();
        assert!(store.create_edge(new.clone()).await.unwrap_err().is_benign());

        // Same key in a project is a different scope
        store.create_edge(new.in_project(Uuid::new_v4())).await.unwrap();
    }

    #[tokio::test]
    async fn test_recreate_after_soft_delete() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        let new = NewEdge::new(entity("detail"), "USES", entity("material"));
        let first = store.create_edge(new.clone()).await.unwrap();
        store.delete_edge(first.edge_id, false).await.unwrap();
        let second = store.create_edge(new).await.unwrap();
        assert_ne!(first.edge_id, second.edge_id);
    }

    #[tokio::test]
    async fn test_invalid_type_and_mismatch() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);

        let err = store
            .create_edge(NewEdge::new(entity("detail"), "BOGUS", entity("material")))
            .await
            .unwrap_err();
        assert!(matches!(err, RelgraphError::InvalidRelationshipType(_)));

        let err = store
            .create_edge(NewEdge::new(entity("material"), "USES", entity("detail")))
            .await
            .unwrap_err();
        assert!(matches!(err, RelgraphError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_inactive_type_rejects_new_edges() {
        let (db, _temp) = seeded_db().await;
        let registry = crate::registry::TypeRegistry::new(db.clone());
        let store = EdgeStore::new(db);
        let existing = store
            .create_edge(NewEdge::new(entity("detail"), "USES", entity("material")))
            .await
            .unwrap();

        registry.deactivate("USES").await.unwrap();
        let err = store
            .create_edge(NewEdge::new(entity("detail"), "USES", entity("material")))
            .await
            .unwrap_err();
        assert!(matches!(err, RelgraphError::InvalidRelationshipType(_)));
        assert!(store.get_edge(existing.edge_id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_out_of_range_values_rejected() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        let err = store
            .create_edge(NewEdge::new(entity("detail"), "USES", entity("material")).with_strength(1.2))
            .await
            .unwrap_err();
        assert!(matches!(err, RelgraphError::InvalidInput(_)));

        let err = store
            .create_edge(
                NewEdge::new(entity("detail"), "USES", entity("material"))
                    .with_source_kind(SourceKind::Auto, -0.1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelgraphError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_unknown_entity_hook() {
        let (db, _temp) = seeded_db().await;
        let known_detail = entity("detail");
        let registry = Arc::new(InMemoryEntityRegistry::new());
        registry.insert(known_detail.clone(), None);
        let store = EdgeStore::new(db).with_entity_registry(registry.clone());

        let missing = entity("material");
        let err = store
            .create_edge(NewEdge::new(known_detail.clone(), "USES", missing.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, RelgraphError::UnknownEntity(ref e) if *e == missing));

        registry.insert(missing.clone(), None);
        store
            .create_edge(NewEdge::new(known_detail, "USES", missing))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_edge() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        let err = store.get_edge(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RelgraphError::NotFound { kind: "edge", .. }));
    }

    #[tokio::test]
    async fn test_update_mutable_fields() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        let edge = store
            .create_edge(NewEdge::new(entity("detail"), "USES", entity("material")))
            .await
            .unwrap();

        let mut metadata = serde_json::Map::new();
        metadata.insert("note".into(), json!("checked"));
        let valid_to = edge.valid_from + chrono::Duration::days(30);
        let updated = store
            .update_edge(
                edge.edge_id,
                EdgePatch {
                    strength: Some(0.25),
                    metadata: Some(metadata),
                    valid_to: Some(Some(valid_to)),
                    status: Some(EdgeStatus::Superseded),
                    // same value is not a change
                    source: Some(edge.source.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.strength, 0.25);
        assert_eq!(updated.metadata["note"], json!("checked"));
        assert_eq!(updated.valid_to, Some(valid_to));
        assert_eq!(updated.status, EdgeStatus::Superseded);
        assert!(updated.updated_at >= edge.updated_at);
        assert_eq!(store.get_edge(edge.edge_id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_update_clears_valid_to() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        let mut new = NewEdge::new(entity("detail"), "USES", entity("material"));
        new.valid_to = Some(chrono::Utc::now() + chrono::Duration::days(7));
        let edge = store.create_edge(new).await.unwrap();
        assert!(edge.valid_to.is_some());

        // leaving the field out keeps the bound
        let kept = store
            .update_edge(edge.edge_id, EdgePatch { strength: Some(0.5), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(kept.valid_to, edge.valid_to);

        let cleared = store
            .update_edge(edge.edge_id, EdgePatch { valid_to: Some(None), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(cleared.valid_to, None);
        assert_eq!(store.get_edge(edge.edge_id).await.unwrap().valid_to, None);
    }

    #[tokio::test]
    async fn test_update_immutable_fields_rejected() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        let edge = store
            .create_edge(NewEdge::new(entity("detail"), "USES", entity("material")))
            .await
            .unwrap();

        let err = store
            .update_edge(
                edge.edge_id,
                EdgePatch {
                    target: Some(EntityRef::new("material", Uuid::new_v4())),
                    strength: Some(0.1),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelgraphError::ImmutableField(ref f) if f == "target"));

        let err = store
            .update_edge(
                edge.edge_id,
                EdgePatch {
                    relationship_type: Some("REFERENCES".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelgraphError::ImmutableField(_)));

        // Rejected patch left the edge untouched
        assert_eq!(store.get_edge(edge.edge_id).await.unwrap(), edge);
    }

    #[tokio::test]
    async fn test_soft_and_hard_delete() {
        let (db, _temp) = seeded_db().await;
        let store = EdgeStore::new(db);
        let edge = store
            .create_edge(NewEdge::new(entity("detail"), "USES", entity("material")))
            .await
            .unwrap();

        store.delete_edge(edge.edge_id, false).await.unwrap();
        assert!(!store.get_edge(edge.edge_id).await.unwrap().is_active);
        assert_eq!(store.count_edges(Scope::all(), true).await.unwrap(), 0);
        assert_eq!(store.count_edges(Scope::all(), false).await.unwrap(), 1);

        store.delete_edge(edge.edge_id, true).await.unwrap();
        assert!(store.get_edge(edge.edge_id).await.is_err());
        assert!(matches!(
            store.delete_edge(edge.edge_id, true).await.unwrap_err(),
            RelgraphError::NotFound { .. }
        ));
    }
}
