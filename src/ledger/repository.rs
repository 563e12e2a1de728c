/*!
 * Job ledger operations.
 *
 * Attempts are append-only and keyed by their uuid, so recording the same
 * attempt twice is a no-op. Unit status is derived: it only ever moves
 * towards `succeeded`/`skipped`, and a succeeded unit's output is never
 * overwritten.
 */

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use super::connection::LedgerConnection;
use super::models::{
    Attempt, AttemptOutcome, ChapterRecord, CostSummary, DocumentRecord, ProviderUsage,
    UnitHistory, UnitRecord, UnitStatus,
};
use crate::providers::Usage;
use crate::translation::document::{GlossaryEntry, Phase, TermCategory, WorkUnit};
use crate::translation::pipeline::{PhaseSet, PipelineState};

/// Durable record of work unit status, attempts and cost
#[derive(Debug, Clone)]
pub struct JobLedger {
    db: LedgerConnection,
}

impl JobLedger {
    pub fn new(db: LedgerConnection) -> Self {
        Self { db }
    }

    /// Open the ledger file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(LedgerConnection::open(path)?))
    }

    /// Open the ledger at the default location
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(LedgerConnection::open_default()?))
    }

    /// In-memory ledger (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(LedgerConnection::open_in_memory()?))
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Register a document together with its chapter sources
    pub async fn register_document(
        &self,
        record: &DocumentRecord,
        chapters: Vec<ChapterRecord>,
    ) -> Result<()> {
        let record = record.clone();
        let state = serde_json::to_string(&record.state)?;
        let phase_set = serde_json::to_string(&record.phase_set)?;

        self.db
            .transaction_async(move |tx| {
                tx.execute(
                    r#"
                    INSERT INTO documents (
                        id, fingerprint, state, phase_set, created_at, updated_at,
                        source_language, target_language, output_dir
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                    params![
                        record.id,
                        record.fingerprint,
                        state,
                        phase_set,
                        record.created_at,
                        record.updated_at,
                        record.source_language,
                        record.target_language,
                        record.output_dir,
                    ],
                )
                .with_context(|| format!("Failed to register document '{}'", record.id))?;

                let mut stmt = tx.prepare(
                    r#"
                    INSERT INTO chapters (document_id, ordinal, chapter_id, title, source_text, source_hash)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                )?;
                for chapter in &chapters {
                    stmt.execute(params![
                        chapter.document_id,
                        chapter.ordinal as i64,
                        chapter.chapter_id,
                        chapter.title,
                        chapter.source_text,
                        chapter.source_hash,
                    ])?;
                }

                debug!(
                    "Registered document '{}' with {} chapters",
                    record.id,
                    chapters.len()
                );
                Ok(())
            })
            .await
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        let document_id = document_id.to_string();

        self.db
            .execute_async(move |conn| {
                let row = conn
                    .query_row(
                        r#"
                        SELECT id, fingerprint, state, phase_set, created_at, updated_at,
                               source_language, target_language, output_dir
                        FROM documents WHERE id = ?1
                        "#,
                        [&document_id],
                        raw_document,
                    )
                    .optional()?;

                row.map(RawDocument::into_record).transpose()
            })
            .await
    }

    /// All documents, most recently updated first
    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        self.db
            .execute_async(|conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, fingerprint, state, phase_set, created_at, updated_at,
                           source_language, target_language, output_dir
                    FROM documents ORDER BY updated_at DESC, id
                    "#,
                )?;
                let rows = stmt
                    .query_map([], raw_document)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                rows.into_iter().map(RawDocument::into_record).collect()
            })
            .await
    }

    /// Persist a state transition
    pub async fn update_state(&self, document_id: &str, state: &PipelineState) -> Result<()> {
        let document_id = document_id.to_string();
        let state = serde_json::to_string(state)?;
        let now = Utc::now().to_rfc3339();

        self.db
            .execute_async(move |conn| {
                let updated = conn.execute(
                    "UPDATE documents SET state = ?2, updated_at = ?3 WHERE id = ?1",
                    params![document_id, state, now],
                )?;
                if updated == 0 {
                    return Err(anyhow::anyhow!("Document '{}' is not registered", document_id));
                }
                Ok(())
            })
            .await
    }

    pub async fn update_phase_set(&self, document_id: &str, phase_set: &PhaseSet) -> Result<()> {
        let document_id = document_id.to_string();
        let phase_set = serde_json::to_string(phase_set)?;
        let now = Utc::now().to_rfc3339();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE documents SET phase_set = ?2, updated_at = ?3 WHERE id = ?1",
                    params![document_id, phase_set, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Record the languages and output directory of the latest start
    pub async fn update_run_settings(
        &self,
        document_id: &str,
        source_language: &str,
        target_language: &str,
        output_dir: Option<&str>,
    ) -> Result<()> {
        let document_id = document_id.to_string();
        let source_language = source_language.to_string();
        let target_language = target_language.to_string();
        let output_dir = output_dir.map(str::to_string);
        let now = Utc::now().to_rfc3339();

        self.db
            .execute_async(move |conn| {
                let updated = conn.execute(
                    r#"
                    UPDATE documents
                    SET source_language = ?2, target_language = ?3,
                        output_dir = COALESCE(?4, output_dir), updated_at = ?5
                    WHERE id = ?1
                    "#,
                    params![document_id, source_language, target_language, output_dir, now],
                )?;
                if updated == 0 {
                    return Err(anyhow::anyhow!("Document '{}' is not registered", document_id));
                }
                Ok(())
            })
            .await
    }

    /// Delete a document and, by cascade, all of its ledger rows
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let document_id = document_id.to_string();

        self.db
            .execute_async(move |conn| {
                let deleted = conn.execute("DELETE FROM documents WHERE id = ?1", [&document_id])?;
                Ok(deleted > 0)
            })
            .await
    }

    /// Chapter sources in document order
    pub async fn get_chapters(&self, document_id: &str) -> Result<Vec<ChapterRecord>> {
        let document_id = document_id.to_string();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT document_id, ordinal, chapter_id, title, source_text, source_hash
                    FROM chapters WHERE document_id = ?1 ORDER BY ordinal
                    "#,
                )?;
                let chapters = stmt
                    .query_map([&document_id], |row| {
                        Ok(ChapterRecord {
                            document_id: row.get(0)?,
                            ordinal: row.get::<_, i64>(1)? as usize,
                            chapter_id: row.get(2)?,
                            title: row.get(3)?,
                            source_text: row.get(4)?,
                            source_hash: row.get(5)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok(chapters)
            })
            .await
    }

    // =========================================================================
    // Work units
    // =========================================================================

    /// Register units for a phase; already-known units keep their status
    pub async fn register_units(&self, document_id: &str, units: &[WorkUnit]) -> Result<usize> {
        let document_id = document_id.to_string();
        let units = units.to_vec();
        let now = Utc::now().to_rfc3339();

        self.db
            .transaction_async(move |tx| {
                let mut stmt = tx.prepare(
                    r#"
                    INSERT OR IGNORE INTO work_units (
                        document_id, phase, unit_key, chapter_id, proof_check, ordinal, status, last_updated
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)
                    "#,
                )?;

                let mut inserted = 0;
                for unit in &units {
                    inserted += stmt.execute(params![
                        document_id,
                        unit.phase.as_str(),
                        unit.key.as_str(),
                        unit.chapter_id,
                        unit.check.map(|c| c.as_str()),
                        unit.ordinal as i64,
                        now,
                    ])?;
                }
                Ok(inserted)
            })
            .await
    }

    /// Units of a phase that still need dispatching, in document order
    pub async fn pending_units(&self, document_id: &str, phase: Phase) -> Result<Vec<UnitRecord>> {
        self.query_units(
            document_id,
            Some(phase),
            "AND status IN ('pending', 'exhausted')",
        )
        .await
    }

    /// All units of a phase, in document order
    pub async fn unit_records(&self, document_id: &str, phase: Phase) -> Result<Vec<UnitRecord>> {
        self.query_units(document_id, Some(phase), "").await
    }

    /// All units of a document across phases
    pub async fn all_unit_records(&self, document_id: &str) -> Result<Vec<UnitRecord>> {
        self.query_units(document_id, None, "").await
    }

    async fn query_units(
        &self,
        document_id: &str,
        phase: Option<Phase>,
        filter: &'static str,
    ) -> Result<Vec<UnitRecord>> {
        let document_id = document_id.to_string();
        let phase = phase.map(|p| p.as_str().to_string());

        self.db
            .execute_async(move |conn| {
                let sql = format!(
                    r#"
                    SELECT document_id, phase, unit_key, chapter_id, proof_check, ordinal,
                           status, output, last_updated
                    FROM work_units
                    WHERE document_id = ?1 AND (?2 IS NULL OR phase = ?2) {}
                    ORDER BY CASE phase WHEN 'glossary' THEN 0 WHEN 'translate' THEN 1 ELSE 2 END,
                             ordinal
                    "#,
                    filter
                );
                let mut stmt = conn.prepare(&sql)?;
                let units = stmt
                    .query_map(params![document_id, phase], unit_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(units)
            })
            .await
    }

    /// Status and attempt history of one unit
    pub async fn unit_history(
        &self,
        document_id: &str,
        phase: Phase,
        unit_key: &str,
    ) -> Result<Option<UnitHistory>> {
        let document_id = document_id.to_string();
        let unit_key = unit_key.to_string();

        self.db
            .execute_async(move |conn| {
                let record = conn
                    .query_row(
                        r#"
                        SELECT document_id, phase, unit_key, chapter_id, proof_check, ordinal,
                               status, output, last_updated
                        FROM work_units WHERE document_id = ?1 AND phase = ?2 AND unit_key = ?3
                        "#,
                        params![document_id, phase.as_str(), unit_key],
                        unit_from_row,
                    )
                    .optional()?;

                match record {
                    Some(record) => {
                        let attempts =
                            Self::attempts_sync(conn, &document_id, Some((phase, &unit_key)))?;
                        Ok(Some(UnitHistory { record, attempts }))
                    }
                    None => Ok(None),
                }
            })
            .await
    }

    /// Resolve a unit without a provider call
    pub async fn mark_unit_skipped(
        &self,
        document_id: &str,
        phase: Phase,
        unit_key: &str,
        output: &str,
    ) -> Result<()> {
        self.set_unit_status(document_id, phase, unit_key, UnitStatus::Skipped, Some(output))
            .await
    }

    /// Record that every candidate provider failed for a unit
    pub async fn mark_unit_exhausted(
        &self,
        document_id: &str,
        phase: Phase,
        unit_key: &str,
    ) -> Result<()> {
        self.set_unit_status(document_id, phase, unit_key, UnitStatus::Exhausted, None)
            .await
    }

    async fn set_unit_status(
        &self,
        document_id: &str,
        phase: Phase,
        unit_key: &str,
        status: UnitStatus,
        output: Option<&str>,
    ) -> Result<()> {
        let document_id = document_id.to_string();
        let unit_key = unit_key.to_string();
        let output = output.map(str::to_string);
        let now = Utc::now().to_rfc3339();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    UPDATE work_units
                    SET status = ?4, output = COALESCE(?5, output), last_updated = ?6
                    WHERE document_id = ?1 AND phase = ?2 AND unit_key = ?3
                      AND status IN ('pending', 'exhausted')
                    "#,
                    params![
                        document_id,
                        phase.as_str(),
                        unit_key,
                        status.to_string(),
                        output,
                        now
                    ],
                )?;
                Ok(())
            })
            .await
    }

    // =========================================================================
    // Attempts
    // =========================================================================

    /// Append a failed (or any) attempt. Returns false if it was already recorded.
    pub async fn record_attempt(&self, attempt: &Attempt) -> Result<bool> {
        let attempt = attempt.clone();

        self.db
            .transaction_async(move |tx| {
                let inserted = insert_attempt(tx, &attempt)?;
                touch_unit(tx, &attempt)?;
                Ok(inserted > 0)
            })
            .await
    }

    /// Append a successful attempt and resolve the unit with its payload, atomically
    pub async fn record_success(&self, attempt: &Attempt, output: &str) -> Result<()> {
        let attempt = attempt.clone();
        let output = output.to_string();

        self.db
            .transaction_async(move |tx| {
                insert_attempt(tx, &attempt)?;
                tx.execute(
                    r#"
                    UPDATE work_units
                    SET status = 'succeeded', output = ?4, last_updated = ?5
                    WHERE document_id = ?1 AND phase = ?2 AND unit_key = ?3
                      AND status != 'succeeded'
                    "#,
                    params![
                        attempt.document_id,
                        attempt.phase.as_str(),
                        attempt.unit_key,
                        output,
                        Utc::now().to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Number of attempts recorded for a unit
    pub async fn attempt_count(
        &self,
        document_id: &str,
        phase: Phase,
        unit_key: &str,
    ) -> Result<u32> {
        let document_id = document_id.to_string();
        let unit_key = unit_key.to_string();

        self.db
            .execute_async(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM attempts WHERE document_id = ?1 AND phase = ?2 AND unit_key = ?3",
                    params![document_id, phase.as_str(), unit_key],
                    |row| row.get(0),
                )?;
                Ok(count as u32)
            })
            .await
    }

    /// Attempts of one unit in recording order
    pub async fn attempts_for_unit(
        &self,
        document_id: &str,
        phase: Phase,
        unit_key: &str,
    ) -> Result<Vec<Attempt>> {
        let document_id = document_id.to_string();
        let unit_key = unit_key.to_string();

        self.db
            .execute_async(move |conn| {
                Self::attempts_sync(conn, &document_id, Some((phase, &unit_key)))
            })
            .await
    }

    /// Every attempt of a document in recording order
    pub async fn attempts_for_document(&self, document_id: &str) -> Result<Vec<Attempt>> {
        let document_id = document_id.to_string();

        self.db
            .execute_async(move |conn| Self::attempts_sync(conn, &document_id, None))
            .await
    }

    fn attempts_sync(
        conn: &Connection,
        document_id: &str,
        unit: Option<(Phase, &str)>,
    ) -> Result<Vec<Attempt>> {
        let (phase, unit_key) = match unit {
            Some((phase, key)) => (Some(phase.as_str()), Some(key)),
            None => (None, None),
        };

        let mut stmt = conn.prepare(
            r#"
            SELECT id, document_id, phase, unit_key, sequence, provider, outcome, failure_kind,
                   message, started_at, latency_ms, prompt_tokens, completion_tokens, characters,
                   cost_usd
            FROM attempts
            WHERE document_id = ?1 AND (?2 IS NULL OR phase = ?2) AND (?3 IS NULL OR unit_key = ?3)
            ORDER BY rowid
            "#,
        )?;

        let attempts = stmt
            .query_map(params![document_id, phase, unit_key], attempt_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(attempts)
    }

    // =========================================================================
    // Phases
    // =========================================================================

    pub async fn mark_phase_complete(&self, document_id: &str, phase: Phase) -> Result<()> {
        let document_id = document_id.to_string();
        let now = Utc::now().to_rfc3339();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO phases (document_id, phase, completed_at) VALUES (?1, ?2, ?3)",
                    params![document_id, phase.as_str(), now],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn is_phase_complete(&self, document_id: &str, phase: Phase) -> Result<bool> {
        let document_id = document_id.to_string();

        self.db
            .execute_async(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM phases WHERE document_id = ?1 AND phase = ?2",
                    params![document_id, phase.as_str()],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }

    // =========================================================================
    // Glossary
    // =========================================================================

    /// Replace the document's folded glossary
    pub async fn replace_glossary(
        &self,
        document_id: &str,
        entries: Vec<GlossaryEntry>,
    ) -> Result<()> {
        let document_id = document_id.to_string();

        self.db
            .transaction_async(move |tx| {
                tx.execute(
                    "DELETE FROM glossary_entries WHERE document_id = ?1",
                    [&document_id],
                )?;

                let mut stmt = tx.prepare(
                    r#"
                    INSERT OR REPLACE INTO glossary_entries
                        (document_id, source_term, translation, category, first_seen_chapter)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                )?;
                for entry in &entries {
                    stmt.execute(params![
                        document_id,
                        entry.source_term,
                        entry.translation,
                        entry.category.as_str(),
                        entry.first_seen_chapter,
                    ])?;
                }
                Ok(())
            })
            .await
    }

    /// Folded glossary ordered by source term
    pub async fn get_glossary(&self, document_id: &str) -> Result<Vec<GlossaryEntry>> {
        let document_id = document_id.to_string();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT source_term, translation, category, first_seen_chapter
                    FROM glossary_entries WHERE document_id = ?1 ORDER BY source_term
                    "#,
                )?;
                let entries = stmt
                    .query_map([&document_id], |row| {
                        Ok(GlossaryEntry {
                            source_term: row.get(0)?,
                            translation: row.get(1)?,
                            category: TermCategory::from_label(&row.get::<_, String>(2)?),
                            first_seen_chapter: row.get(3)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(entries)
            })
            .await
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    /// Usage and cost for one document, broken down per provider
    pub async fn cost_summary(&self, document_id: &str) -> Result<CostSummary> {
        let totals = self.usage_by_provider(Some(document_id)).await?;

        let mut summary = CostSummary::default();
        for (provider, usage) in totals {
            summary.add_provider(&provider, usage);
        }
        Ok(summary)
    }

    /// Usage per provider across all documents
    pub async fn provider_totals(&self) -> Result<BTreeMap<String, ProviderUsage>> {
        self.usage_by_provider(None).await
    }

    async fn usage_by_provider(
        &self,
        document_id: Option<&str>,
    ) -> Result<BTreeMap<String, ProviderUsage>> {
        let document_id = document_id.map(str::to_string);

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT provider,
                           COUNT(*),
                           SUM(CASE WHEN outcome = 'success' THEN 1 ELSE 0 END),
                           COALESCE(SUM(prompt_tokens), 0),
                           COALESCE(SUM(completion_tokens), 0),
                           COALESCE(SUM(characters), 0),
                           COALESCE(SUM(cost_usd), 0.0),
                           COALESCE(SUM(latency_ms), 0)
                    FROM attempts
                    WHERE ?1 IS NULL OR document_id = ?1
                    GROUP BY provider
                    ORDER BY provider
                    "#,
                )?;

                let rows = stmt.query_map([&document_id], |row| {
                    let attempts = row.get::<_, i64>(1)? as u64;
                    let successes = row.get::<_, i64>(2)? as u64;
                    Ok((
                        row.get::<_, String>(0)?,
                        ProviderUsage {
                            attempts,
                            successes,
                            failures: attempts.saturating_sub(successes),
                            prompt_tokens: row.get::<_, i64>(3)? as u64,
                            completion_tokens: row.get::<_, i64>(4)? as u64,
                            characters: row.get::<_, i64>(5)? as u64,
                            estimated_cost_usd: row.get(6)?,
                            total_latency_ms: row.get::<_, i64>(7)? as u64,
                        },
                    ))
                })?;

                let mut totals = BTreeMap::new();
                for row in rows {
                    let (provider, usage) = row?;
                    totals.insert(provider, usage);
                }
                Ok(totals)
            })
            .await
    }
}

struct RawDocument {
    id: String,
    fingerprint: String,
    state: String,
    phase_set: String,
    created_at: String,
    updated_at: String,
    source_language: Option<String>,
    target_language: Option<String>,
    output_dir: Option<String>,
}

impl RawDocument {
    fn into_record(self) -> Result<DocumentRecord> {
        Ok(DocumentRecord {
            state: serde_json::from_str(&self.state)
                .with_context(|| format!("Corrupt state for document '{}'", self.id))?,
            phase_set: serde_json::from_str(&self.phase_set)
                .with_context(|| format!("Corrupt phase set for document '{}'", self.id))?,
            id: self.id,
            fingerprint: self.fingerprint,
            created_at: self.created_at,
            updated_at: self.updated_at,
            source_language: self.source_language,
            target_language: self.target_language,
            output_dir: self.output_dir,
        })
    }
}

fn raw_document(row: &Row<'_>) -> rusqlite::Result<RawDocument> {
    Ok(RawDocument {
        id: row.get(0)?,
        fingerprint: row.get(1)?,
        state: row.get(2)?,
        phase_set: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        source_language: row.get(6)?,
        target_language: row.get(7)?,
        output_dir: row.get(8)?,
    })
}

fn parse_column<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    value.parse().map_err(|e: anyhow::Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn unit_from_row(row: &Row<'_>) -> rusqlite::Result<UnitRecord> {
    let check = row
        .get::<_, Option<String>>(4)?
        .map(|c| parse_column(4, &c))
        .transpose()?;

    Ok(UnitRecord {
        document_id: row.get(0)?,
        phase: parse_column(1, &row.get::<_, String>(1)?)?,
        unit_key: row.get(2)?,
        chapter_id: row.get(3)?,
        check,
        ordinal: row.get::<_, i64>(5)? as usize,
        status: parse_column(6, &row.get::<_, String>(6)?)?,
        output: row.get(7)?,
        last_updated: row.get(8)?,
    })
}

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<Attempt> {
    let conversion = |idx: usize, e: anyhow::Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    };

    let id = Uuid::parse_str(&row.get::<_, String>(0)?).map_err(|e| conversion(0, e.into()))?;
    let outcome = AttemptOutcome::from_columns(
        &row.get::<_, String>(6)?,
        row.get::<_, Option<String>>(7)?.as_deref(),
    )
    .map_err(|e| conversion(6, e))?;
    let started_at = DateTime::parse_from_rfc3339(&row.get::<_, String>(9)?)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion(9, e.into()))?;

    let prompt_tokens: Option<i64> = row.get(11)?;
    let completion_tokens: Option<i64> = row.get(12)?;
    let characters: Option<i64> = row.get(13)?;
    let cost: Option<f64> = row.get(14)?;
    let usage = characters.map(|characters| Usage {
        prompt_tokens: prompt_tokens.map(|t| t as u64),
        completion_tokens: completion_tokens.map(|t| t as u64),
        characters: characters as u64,
        estimated_cost_usd: cost,
    });

    Ok(Attempt {
        id,
        document_id: row.get(1)?,
        phase: parse_column(2, &row.get::<_, String>(2)?)?,
        unit_key: row.get(3)?,
        sequence: row.get::<_, i64>(4)? as u32,
        provider: row.get(5)?,
        outcome,
        message: row.get(8)?,
        started_at,
        latency_ms: row.get::<_, i64>(10)? as u64,
        usage,
    })
}

fn insert_attempt(conn: &Connection, attempt: &Attempt) -> Result<usize> {
    let usage = attempt.usage.as_ref();

    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO attempts (
            id, document_id, phase, unit_key, sequence, provider, outcome, failure_kind, message,
            started_at, latency_ms, prompt_tokens, completion_tokens, characters, cost_usd
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        params![
            attempt.id.to_string(),
            attempt.document_id,
            attempt.phase.as_str(),
            attempt.unit_key,
            attempt.sequence as i64,
            attempt.provider,
            attempt.outcome.label(),
            attempt.outcome.failure_kind().map(|k| k.as_str()),
            attempt.message,
            attempt.started_at.to_rfc3339(),
            attempt.latency_ms as i64,
            usage.and_then(|u| u.prompt_tokens).map(|t| t as i64),
            usage.and_then(|u| u.completion_tokens).map(|t| t as i64),
            usage.map(|u| u.characters as i64),
            usage.and_then(|u| u.estimated_cost_usd),
        ],
    )?;

    if inserted == 0 {
        debug!("Attempt {} already recorded, ignoring", attempt.id);
    }
    Ok(inserted)
}

fn touch_unit(conn: &Connection, attempt: &Attempt) -> Result<()> {
    conn.execute(
        "UPDATE work_units SET last_updated = ?4 WHERE document_id = ?1 AND phase = ?2 AND unit_key = ?3",
        params![
            attempt.document_id,
            attempt.phase.as_str(),
            attempt.unit_key,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}
