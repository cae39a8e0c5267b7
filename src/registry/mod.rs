//! Relationship type registry.
//!
//! Defines which relationship types exist and which entity-type pairs each
//! may connect. `EdgeStore` consults it on every create.

mod entities;

pub use entities::{EntityRegistry, InMemoryEntityRegistry};

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{codec, Db};
use crate::error::{EdgeSide, RelgraphError, Result};
use crate::model::RelationshipType;

const TYPE_COLUMNS: &str = "type_code, display_name, category, valid_source_types, valid_target_types, \
     default_strength, default_bidirectional, is_active, created_at";

#[derive(Debug, Clone)]
pub struct TypeRegistry {
    db: Db,
}

impl TypeRegistry {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Register a new relationship type.
    ///
    /// Type codes are immutable primary keys: registering an existing code fails.
    pub async fn register(&self, relationship_type: RelationshipType) -> Result<RelationshipType> {
        if relationship_type.type_code.trim().is_empty() {
            return Err(RelgraphError::InvalidInput("type_code must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&relationship_type.default_strength) {
            return Err(RelgraphError::InvalidInput(format!(
                "default_strength {} is outside [0, 1]",
                relationship_type.default_strength
            )));
        }

        let mut ty = relationship_type;
        ty.created_at = codec::truncate(ty.created_at);
        let sources = serde_json::to_string(&ty.valid_source_types)?;
        let targets = serde_json::to_string(&ty.valid_target_types)?;

        let ty = self.db.with_connection(move |conn| {
            if load_type(conn, &ty.type_code)?.is_some() {
                return Err(RelgraphError::InvalidInput(format!(
                    "relationship type '{}' is already registered",
                    ty.type_code
                )));
            }
            conn.execute(
                &format!("INSERT INTO relationship_types ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)", TYPE_COLUMNS),
                params![
                    ty.type_code,
                    ty.display_name,
                    ty.category,
                    sources,
                    targets,
                    ty.default_strength,
                    ty.default_bidirectional,
                    ty.is_active,
                    codec::ts(&ty.created_at),
                ],
            )?;
            Ok(ty)
        }).await?;

        log::info!("Registered relationship type {} ({})", ty.type_code, ty.category);
        Ok(ty)
    }

    pub async fn get(&self, type_code: &str) -> Result<RelationshipType> {
        let code = type_code.to_string();
        self.db
            .with_connection(move |conn| {
                load_type(conn, &code)?.ok_or_else(|| RelgraphError::not_found("relationship type", &code))
            })
            .await
    }

    /// All registered types ordered by type code.
    pub async fn list(&self, active_only: bool) -> Result<Vec<RelationshipType>> {
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM relationship_types WHERE (?1 = 0 OR is_active = 1) ORDER BY type_code",
                    TYPE_COLUMNS
                ))?;
                let rows = stmt.query_map(params![active_only], row_to_type)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    /// Soft-disable a type: existing edges stay valid, new edges are refused.
    pub async fn deactivate(&self, type_code: &str) -> Result<()> {
        self.set_active(type_code, false).await?;
        log::info!("Deactivated relationship type {}", type_code);
        Ok(())
    }

    pub async fn activate(&self, type_code: &str) -> Result<()> {
        self.set_active(type_code, true).await
    }

    async fn set_active(&self, type_code: &str, active: bool) -> Result<()> {
        let code = type_code.to_string();
        self.db
            .with_connection(move |conn| {
                let changed = conn.execute(
                    "UPDATE relationship_types SET is_active = ?1 WHERE type_code = ?2",
                    params![active, code],
                )?;
                if changed == 0 {
                    return Err(RelgraphError::not_found("relationship type", &code));
                }
                Ok(())
            })
            .await
    }

    /// The single predicate consulted before an edge is written.
    pub async fn validate(&self, source_type: &str, relationship_type: &str, target_type: &str) -> Result<bool> {
        let code = relationship_type.to_string();
        let ty = self.db.with_connection(move |conn| load_type(conn, &code)).await?;
        Ok(match ty {
            Some(ty) => check_edge_types(&ty, source_type, target_type).is_ok(),
            None => false,
        })
    }

    /// Every entity type named as a valid source or target by any registered type.
    pub async fn entity_types(&self) -> Result<BTreeSet<String>> {
        let types = self.list(false).await?;
        Ok(types
            .into_iter()
            .flat_map(|t| t.valid_source_types.into_iter().chain(t.valid_target_types))
            .collect())
    }
}

pub(crate) fn load_type(conn: &Connection, type_code: &str) -> Result<Option<RelationshipType>> {
    let ty = conn
        .query_row(
            &format!("SELECT {} FROM relationship_types WHERE type_code = ?1", TYPE_COLUMNS),
            params![type_code],
            row_to_type,
        )
        .optional()?;
    Ok(ty)
}

/// Check an (active) relationship type against the endpoint entity types.
pub(crate) fn check_edge_types(ty: &RelationshipType, source_type: &str, target_type: &str) -> Result<()> {
    if !ty.is_active {
        return Err(RelgraphError::InvalidRelationshipType(format!(
            "{} (inactive)",
            ty.type_code
        )));
    }
    if !ty.allows_source(source_type) {
        return Err(RelgraphError::TypeMismatch {
            relationship_type: ty.type_code.clone(),
            side: EdgeSide::Source,
            entity_type: source_type.to_string(),
        });
    }
    if !ty.allows_target(target_type) {
        return Err(RelgraphError::TypeMismatch {
            relationship_type: ty.type_code.clone(),
            side: EdgeSide::Target,
            entity_type: target_type.to_string(),
        });
    }
    Ok(())
}

fn row_to_type(row: &Row<'_>) -> rusqlite::Result<RelationshipType> {
    Ok(RelationshipType {
        type_code: row.get(0)?,
        display_name: row.get(1)?,
        category: row.get(2)?,
        valid_source_types: codec::get_json(row, 3)?,
        valid_target_types: codec::get_json(row, 4)?,
        default_strength: row.get(5)?,
        default_bidirectional: row.get(6)?,
        is_active: row.get(7)?,
        created_at: codec::get_ts(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_test_db;

    fn uses() -> RelationshipType {
        RelationshipType::new("USES", "Uses", "composition", ["detail"], ["material"])
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let (db, _temp) = setup_test_db().await;
        let registry = TypeRegistry::new(db);

        let registered = registry.register(uses().with_default_strength(0.8)).await.unwrap();
        let loaded = registry.get("USES").await.unwrap();
        assert_eq!(loaded, registered);
        assert_eq!(loaded.default_strength, 0.8);
        assert!(loaded.allows_source("detail"));
    }

    #[tokio::test]
    async fn test_register_duplicate_code_rejected() {
        let (db, _temp) = setup_test_db().await;
        let registry = TypeRegistry::new(db);
        registry.register(uses()).await.unwrap();
        let err = registry.register(uses()).await.unwrap_err();
        assert!(matches!(err, RelgraphError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_register_rejects_bad_strength() {
        let (db, _temp) = setup_test_db().await;
        let registry = TypeRegistry::new(db);
        let err = registry.register(uses().with_default_strength(1.5)).await.unwrap_err();
        assert!(matches!(err, RelgraphError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (db, _temp) = setup_test_db().await;
        let registry = TypeRegistry::new(db);
        let err = registry.get("NOPE").await.unwrap_err();
        assert!(matches!(err, RelgraphError::NotFound { kind: "relationship type", .. }));
    }

    #[tokio::test]
    async fn test_validate_predicate() {
        let (db, _temp) = setup_test_db().await;
        let registry = TypeRegistry::new(db);
        registry.register(uses()).await.unwrap();

        assert!(registry.validate("detail", "USES", "material").await.unwrap());
        assert!(!registry.validate("material", "USES", "detail").await.unwrap());
        assert!(!registry.validate("detail", "MISSING", "material").await.unwrap());

        registry.deactivate("USES").await.unwrap();
        assert!(!registry.validate("detail", "USES", "material").await.unwrap());

        registry.activate("USES").await.unwrap();
        assert!(registry.validate("detail", "USES", "material").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_active_only() {
        let (db, _temp) = setup_test_db().await;
        let registry = TypeRegistry::new(db);
        registry.register(uses()).await.unwrap();
        registry
            .register(RelationshipType::new("REFERENCES", "References", "documentation", ["detail"], ["spec"]))
            .await
            .unwrap();
        registry.deactivate("USES").await.unwrap();

        let all = registry.list(false).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].type_code, "REFERENCES");

        let active = registry.list(true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].type_code, "REFERENCES");
    }

    #[tokio::test]
    async fn test_deactivate_unknown_type() {
        let (db, _temp) = setup_test_db().await;
        let registry = TypeRegistry::new(db);
        assert!(registry.deactivate("GHOST").await.is_err());
    }

    #[tokio::test]
    async fn test_entity_types_union() {
        let (db, _temp) = setup_test_db().await;
        let registry = TypeRegistry::new(db);
        registry.register(uses()).await.unwrap();
        registry
            .register(RelationshipType::new("REFERENCES", "References", "documentation", ["detail"], ["spec"]))
            .await
            .unwrap();

        let types: Vec<_> = registry.entity_types().await.unwrap().into_iter().collect();
        assert_eq!(types, vec!["detail", "material", "spec"]);
    }
}
