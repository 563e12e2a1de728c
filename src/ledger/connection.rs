/*!
 * Ledger connection management.
 *
 * Wraps a single SQLite connection behind `Arc<Mutex<_>>` and runs every
 * async access on tokio's blocking pool, so ledger writes from concurrent
 * work units are serialized without stalling the runtime.
 */

use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::Connection;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::schema;

const DEFAULT_DB_FILENAME: &str = "ledger.db";

const DEFAULT_DB_DIRNAME: &str = "novelwai";

const IN_MEMORY_PATH: &str = ":memory:";

/// Ledger connection wrapper with thread-safe access
#[derive(Clone)]
pub struct LedgerConnection {
    db_path: PathBuf,
    connection: Arc<Mutex<Connection>>,
}

impl fmt::Debug for LedgerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerConnection")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl LedgerConnection {
    /// Open the ledger at the default location
    pub fn open_default() -> Result<Self> {
        let db_path = Self::default_ledger_path()?;
        Self::open(&db_path)
    }

    /// Open (or create) the ledger at the given path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create ledger directory: {:?}", parent)
                })?;
            }
        }

        info!("Opening job ledger at: {:?}", db_path);

        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open ledger: {:?}", db_path))?;

        schema::configure_connection(&conn, true)?;
        schema::initialize_schema(&conn)?;

        Ok(Self {
            db_path,
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory ledger (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Creating in-memory job ledger");

        let conn = Connection::open_in_memory().context("Failed to create in-memory ledger")?;

        schema::configure_connection(&conn, false)?;
        schema::initialize_schema(&conn)?;

        Ok(Self {
            db_path: PathBuf::from(IN_MEMORY_PATH),
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// `<data_local_dir>/novelwai/ledger.db`
    pub fn default_ledger_path() -> Result<PathBuf> {
        let base_dir = dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

        Ok(base_dir.join(DEFAULT_DB_DIRNAME).join(DEFAULT_DB_FILENAME))
    }

    /// Path of the ledger file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Run a read or single-statement operation on the calling thread
    pub fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .connection
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to acquire ledger lock: {}", e))?;

        f(&conn)
    }

    /// Run an operation on the blocking pool
    pub async fn execute_async<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Failed to acquire ledger lock: {}", e))?;

            f(&conn)
        })
        .await
        .context("Ledger task panicked")?
    }

    /// Run an operation inside a transaction on the blocking pool.
    ///
    /// The transaction is rolled back if the closure returns an error.
    pub async fn transaction_async<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Failed to acquire ledger lock: {}", e))?;

            let tx = conn.transaction()?;
            let result = f(&tx)?;
            tx.commit()?;

            Ok(result)
        })
        .await
        .context("Ledger transaction task panicked")?
    }

    /// Row counts and file size
    pub fn stats(&self) -> Result<LedgerStats> {
        self.execute(|conn| {
            let count = |table: &str| -> Result<i64> {
                let sql = format!("SELECT COUNT(*) FROM {}", table);
                Ok(conn.query_row(&sql, [], |row| row.get(0))?)
            };

            let document_count = count("documents")?;
            let unit_count = count("work_units")?;
            let attempt_count = count("attempts")?;

            let file_size_bytes = if self.db_path.as_os_str() != IN_MEMORY_PATH {
                std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
            } else {
                0
            };

            Ok(LedgerStats {
                document_count,
                unit_count,
                attempt_count,
                file_size_bytes,
            })
        })
    }
}

/// Ledger statistics
#[derive(Debug, Clone)]
pub struct LedgerStats {
    pub document_count: i64,
    pub unit_count: i64,
    pub attempt_count: i64,
    pub file_size_bytes: u64,
}

impl std::fmt::Display for LedgerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Documents: {}, Work units: {}, Attempts: {}, Size: {} KB",
            self.document_count,
            self.unit_count,
            self.attempt_count,
            self.file_size_bytes / 1024
        )
    }
}
