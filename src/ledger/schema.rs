/*!
 * Ledger schema definitions and migrations.
 */

use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Per-connection pragmas. SQLite does not persist `foreign_keys`, so this runs
/// on every open, not only when the schema is created.
pub fn configure_connection(conn: &Connection, on_disk: bool) -> Result<()> {
    if on_disk {
        // WAL survives crashes mid-write without corrupting committed attempts
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
    }
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(())
}

/// Initialize or migrate the ledger schema
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Initializing ledger schema v{}", SCHEMA_VERSION);
        create_all_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!(
            "Migrating ledger schema from v{} to v{}",
            current_version, SCHEMA_VERSION
        );
        migrate_schema(conn, current_version)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(anyhow::anyhow!(
            "Ledger schema v{} is newer than this build supports (v{})",
            current_version,
            SCHEMA_VERSION
        ));
    } else {
        debug!("Ledger schema is up to date (v{})", current_version);
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )
        .context("Failed to check schema_version table existence")?;

    if !table_exists {
        return Ok(0);
    }

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version, updated_at) VALUES (1, ?1, datetime('now'))",
        [version],
    )?;
    Ok(())
}

fn create_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )?;

    // One row per document; state and phase_set are JSON
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            state TEXT NOT NULL,
            phase_set TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            source_language TEXT,
            target_language TEXT,
            output_dir TEXT
        );
        "#,
    )?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS chapters (
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            ordinal INTEGER NOT NULL,
            chapter_id TEXT NOT NULL,
            title TEXT,
            source_text TEXT NOT NULL,
            source_hash TEXT NOT NULL,
            PRIMARY KEY (document_id, chapter_id),
            UNIQUE (document_id, ordinal)
        );
        "#,
    )?;

    // Derived terminal status per (document, phase, unit)
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS work_units (
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            phase TEXT NOT NULL,
            unit_key TEXT NOT NULL,
            chapter_id TEXT NOT NULL,
            proof_check TEXT,
            ordinal INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            output TEXT,
            last_updated TEXT NOT NULL,
            PRIMARY KEY (document_id, phase, unit_key)
        );

        CREATE INDEX IF NOT EXISTS idx_work_units_status ON work_units(document_id, phase, status);
        "#,
    )?;

    // Append-only; the uuid primary key makes re-recording an attempt a no-op
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS attempts (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            phase TEXT NOT NULL,
            unit_key TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            provider TEXT NOT NULL,
            outcome TEXT NOT NULL,
            failure_kind TEXT,
            message TEXT,
            started_at TEXT NOT NULL,
            latency_ms INTEGER NOT NULL,
            prompt_tokens INTEGER,
            completion_tokens INTEGER,
            characters INTEGER,
            cost_usd REAL,
            FOREIGN KEY (document_id, phase, unit_key)
                REFERENCES work_units(document_id, phase, unit_key) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_attempts_unit ON attempts(document_id, phase, unit_key, sequence);
        CREATE INDEX IF NOT EXISTS idx_attempts_provider ON attempts(provider);
        "#,
    )?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS phases (
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            phase TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            PRIMARY KEY (document_id, phase)
        );
        "#,
    )?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS glossary_entries (
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            source_term TEXT NOT NULL,
            translation TEXT NOT NULL,
            category TEXT NOT NULL,
            first_seen_chapter TEXT NOT NULL,
            PRIMARY KEY (document_id, source_term)
        );
        "#,
    )?;

    debug!("All ledger tables created successfully");
    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<()> {
    let mut current = from_version;

    while current < SCHEMA_VERSION {
        match current {
            1 => {
                migrate_v1_to_v2(conn)?;
                current = 2;
            }
            _ => {
                return Err(anyhow::anyhow!(
                    "Unknown ledger schema version: {}. Cannot migrate.",
                    current
                ));
            }
        }
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    info!("Ledger schema migration completed to v{}", SCHEMA_VERSION);
    Ok(())
}

/// v2 records each document's run languages and output directory
fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        ALTER TABLE documents ADD COLUMN source_language TEXT;
        ALTER TABLE documents ADD COLUMN target_language TEXT;
        ALTER TABLE documents ADD COLUMN output_dir TEXT;
        "#,
    )?;
    debug!("Added run settings columns to documents");
    Ok(())
}
