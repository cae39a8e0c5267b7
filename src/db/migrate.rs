use rusqlite::{Connection, params};
use std::fs;
use std::path::Path;
use crate::error::{Result, RelgraphError};

/// Tables the engine expects once every migration has been applied.
pub const EXPECTED_TABLES: &[&str] = &[
    "edges",
    "relationship_types",
    "schema_migrations",
    "validation_rules",
    "violations",
];

/// Indexes backing the storage contract (uniqueness + adjacency lookups).
pub const EXPECTED_INDEXES: &[&str] = &[
    "idx_edges_project",
    "idx_edges_source",
    "idx_edges_target",
    "idx_edges_unique_active",
];

/// A versioned SQL file, e.g. `002_edges.sql`
struct Migration {
    version: u32,
    name: String,
    sql: String,
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Names of applied migrations, in version order
pub fn get_applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM schema_migrations ORDER BY version")?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
        .map_err(RelgraphError::Database)?;
    Ok(names)
}

fn load_migrations(migrations_dir: &Path) -> Result<Vec<Migration>> {
    let mut files: Vec<_> = fs::read_dir(migrations_dir)
        .map_err(RelgraphError::Io)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();
    files.sort_by_key(|e| e.file_name());

    let mut migrations = Vec::with_capacity(files.len());
    for entry in files {
        let path = entry.path();
        let filename = path.file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RelgraphError::Config("Invalid migration filename".to_string()))?;

        let version_str = filename
            .split('_')
            .next()
            .ok_or_else(|| RelgraphError::Config(format!("Invalid migration filename: {}", filename)))?;
        let version: u32 = version_str.parse()
            .map_err(|_| RelgraphError::Config(format!("Invalid migration version: {}", version_str)))?;

        if migrations.iter().any(|m: &Migration| m.version == version) {
            return Err(RelgraphError::Config(format!(
                "Duplicate migration version {} ({})",
                version, filename
            )));
        }

        migrations.push(Migration {
            version,
            name: filename.trim_end_matches(".sql").to_string(),
            sql: fs::read_to_string(&path).map_err(RelgraphError::Io)?,
        });
    }

    migrations.sort_by_key(|m| m.version);
    Ok(migrations)
}

/// Run all pending migrations, each in its own transaction.
///
/// Returns the number of migrations applied by this call.
pub fn run_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<usize> {
    ensure_migrations_table(conn)?;

    let applied = get_applied_migrations(conn)?;
    let mut count = 0;

    for migration in load_migrations(migrations_dir)? {
        if applied.contains(&migration.name) {
            log::debug!("Migration {} already applied, skipping", migration.name);
            continue;
        }

        log::info!("Applying migration: {} (version {})", migration.name, migration.version);

        let tx = conn.transaction()?;
        tx.execute_batch(&migration.sql).map_err(|e| {
            RelgraphError::Config(format!("Failed to execute migration {}: {}", migration.name, e))
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
        count += 1;
    }

    log::debug!("Migrations up to date ({} applied now)", count);
    Ok(count)
}

/// Names of schema objects of `kind` (`table`, `index`, `trigger`)
pub fn schema_objects(conn: &Connection, kind: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")?;
    let names = stmt
        .query_map([kind], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(names)
}

/// Check that every table and index of the storage contract exists.
///
/// Returns the list of missing objects (empty when the schema is complete).
pub fn verify_schema(conn: &Connection) -> Result<Vec<String>> {
    let tables = schema_objects(conn, "table")?;
    let indexes = schema_objects(conn, "index")?;

    let mut missing = Vec::new();
    for table in EXPECTED_TABLES {
        if !tables.iter().any(|t| t == table) {
            missing.push(format!("table {}", table));
        }
    }
    for index in EXPECTED_INDEXES {
        if !indexes.iter().any(|i| i == index) {
            missing.push(format!("index {}", index));
        }
    }
    Ok(missing)
}
