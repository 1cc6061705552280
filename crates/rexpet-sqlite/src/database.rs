//! Connection lifecycle
//!
//! Every statement runs on tokio-rusqlite's single background thread, so
//! writes are serialized. Open one [`Database`] per file and share it.

use std::time::Duration;

use rexpet_core::{CoreError, Result};
use tokio_rusqlite::Connection;

use crate::error::{SqlError, map_tr_err};
use crate::migrations::run_migrations;
use crate::queue::SqliteJobQueue;
use crate::store::SqliteStore;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `f` on the connection thread and map its failure into a core error
pub(crate) async fn call<T, F>(conn: &Connection, f: F) -> Result<T>
where
    F: FnOnce(&mut rusqlite::Connection) -> std::result::Result<T, SqlError> + Send + 'static,
    T: Send + 'static,
{
    conn.call(f).await.map_err(map_tr_err)
}

/// Shared handle to one migrated SQLite database
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database file and bring its schema up to date
    pub async fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .await
            .map_err(|e| CoreError::Persistence(format!("open {path}: {e}")))?;
        let db = Self::init(conn).await?;
        tracing::info!(path, "SQLite database ready");
        Ok(db)
    }

    /// Private in-memory database, gone when the last handle drops
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| CoreError::Persistence(format!("open in-memory database: {e}")))?;
        Self::init(conn).await
    }

    /// Open from a `DATABASE_URL` value: `sqlite://path`, `sqlite::memory:` or a bare path
    pub async fn connect(url: &str) -> Result<Self> {
        match url {
            "sqlite::memory:" | ":memory:" => Self::open_in_memory().await,
            other => {
                let path = other
                    .strip_prefix("sqlite://")
                    .or_else(|| other.strip_prefix("sqlite:"))
                    .unwrap_or(other);
                if path.is_empty() {
                    return Err(CoreError::InvalidArgument(format!(
                        "DATABASE_URL has no path: {url}"
                    )));
                }
                Self::open(path).await
            }
        }
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| -> std::result::Result<(), SqlError> {
            // In-memory databases answer "memory"
            let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            tracing::debug!(journal_mode = %mode, "SQLite journal mode");
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            run_migrations(conn)?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn store(&self) -> SqliteStore {
        SqliteStore::new(self.conn.clone())
    }

    pub fn queue(&self) -> SqliteJobQueue {
        SqliteJobQueue::new(self.conn.clone())
    }

    /// Flush and close; other clones of the connection stop working
    pub async fn close(self) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|e| CoreError::Persistence(format!("close database: {e}")))
    }
}
