//! Shared fixtures for unit tests.

use std::path::Path;

use tempfile::TempDir;
use uuid::Uuid;

use crate::db::{migrate, Db};
use crate::model::{EntityRef, RelationshipType};
use crate::registry::TypeRegistry;

/// Fresh migrated database in a temp dir. Keep the `TempDir` alive.
pub async fn setup_test_db() -> (Db, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Db::new(temp_dir.path().join("test.db"));
    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
        .await
        .unwrap();
    (db, temp_dir)
}

/// Migrated database with a small construction-domain type catalog.
///
/// - `USES`: detail -> material
/// - `REFERENCES`: detail -> spec | material
/// - `RELATED_TO`: detail -> detail, bidirectional, strength 0.5
/// - `DEPENDS_ON`: detail -> detail
pub async fn seeded_db() -> (Db, TempDir) {
    let (db, temp_dir) = setup_test_db().await;
    let registry = TypeRegistry::new(db.clone());
    for ty in [
        RelationshipType::new("USES", "Uses", "composition", ["detail"], ["material"]),
        RelationshipType::new("REFERENCES", "References", "documentation", ["detail"], ["spec", "material"]),
        RelationshipType::new("RELATED_TO", "Related to", "association", ["detail"], ["detail"])
            .with_default_strength(0.5)
            .bidirectional(),
        RelationshipType::new("DEPENDS_ON", "Depends on", "dependency", ["detail"], ["detail"]),
    ] {
        registry.register(ty).await.unwrap();
    }
    (db, temp_dir)
}

pub fn entity(entity_type: &str) -> EntityRef {
    EntityRef::new(entity_type, Uuid::new_v4())
}
