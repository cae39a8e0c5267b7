use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use tokio::task;
use crate::error::{Result, RelgraphError};

pub mod codec;
pub mod migrate;

/// Pragmas applied to every connection.
const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode = WAL; \
     PRAGMA synchronous = NORMAL; \
     PRAGMA foreign_keys = ON; \
     PRAGMA busy_timeout = 5000; \
     PRAGMA temp_store = MEMORY; \
     PRAGMA cache_size = -65536;";

/// Database connection wrapper
///
/// Holds only the database path; every unit of work opens its own connection
/// on a blocking task, so there is no long-lived in-memory graph.
#[derive(Debug, Clone)]
pub struct Db {
    path: PathBuf,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new database connection with the engine pragmas applied
    pub fn open_connection(&self) -> Result<Connection> {
        open(&self.path)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = open(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| RelgraphError::Task(e.to_string()))?
    }

    /// Execute a closure inside a single transaction.
    ///
    /// Commits when the closure returns `Ok`; any error drops the transaction,
    /// which rolls back every write made by the closure.
    pub async fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await
    }
}

fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(RelgraphError::Database)?;
    conn.execute_batch(CONNECTION_PRAGMAS)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_db_connection() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Db::new(&db_path);

        let result = db.with_connection(|conn| {
            conn.execute("CREATE TABLE test (id INTEGER PRIMARY KEY)", [])
                .map_err(RelgraphError::Database)?;
            Ok(())
        }).await;

        assert!(result.is_ok());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_pragmas_set() {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("test.db"));

        db.with_connection(|conn| {
            let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            assert_eq!(journal_mode.to_uppercase(), "WAL");

            let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
            assert_eq!(foreign_keys, 1);

            Ok::<(), RelgraphError>(())
        }).await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("test.db"));
        db.with_connection(|conn| {
            conn.execute("CREATE TABLE items (id INTEGER PRIMARY KEY)", [])?;
            Ok(())
        }).await.unwrap();

        let result: Result<()> = db.with_transaction(|tx| {
            tx.execute("INSERT INTO items (id) VALUES (1)", [])?;
            Err(RelgraphError::InvalidInput("abort".into()))
        }).await;
        assert!(result.is_err());

        let count: i64 = db.with_connection(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?)
        }).await.unwrap();
        assert_eq!(count, 0);
    }
}
