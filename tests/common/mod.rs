/*!
 * Common test utilities for the novelwai test suite
 */

use anyhow::Result;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use novelwai::app_config::{PipelineConfig, ProviderConfig, ProviderKind, RetrySettings};
use novelwai::ledger::{ChapterRecord, DocumentRecord, JobLedger};
use novelwai::providers::mock::{CallLog, ScriptedCall};
use novelwai::providers::{ProviderAdapter, ProviderRegistry, ScriptedProvider};
use novelwai::translation::{Chapter, Document, Phase, PhaseSet};

/// Route library logs through the test harness; RUST_LOG=debug shows policy decisions
pub fn init_test_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Three-chapter document used across scenarios
pub fn three_chapter_document() -> Document {
    Document::new(
        "novel",
        vec![
            Chapter::new("ch-1", "第一章 林明来到了青云宗。").with_title("Arrival"),
            Chapter::new("ch-2", "第二章 林明拜师学艺。").with_title("The Master"),
            Chapter::new("ch-3", "第三章 宗门大比开始了。").with_title("The Tournament"),
        ],
    )
}

/// Shared call log for several scripted providers
pub fn new_call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Calls of one phase, in the order they were made
pub fn calls_in_phase(log: &CallLog, phase: Phase) -> Vec<ScriptedCall> {
    log.lock()
        .iter()
        .filter(|call| call.phase == phase)
        .cloned()
        .collect()
}

/// Scripted provider config at a fallback position
pub fn scripted_config(name: &str, position: u32) -> ProviderConfig {
    ProviderConfig::new(ProviderKind::Scripted)
        .with_name(name)
        .at_position(position)
}

/// Registry of scripted providers; fallback order follows the vector order
pub fn scripted_registry(providers: Vec<(&str, ScriptedProvider)>) -> ProviderRegistry {
    ProviderRegistry::from_adapters(
        providers
            .into_iter()
            .enumerate()
            .map(|(position, (name, provider))| {
                (
                    scripted_config(name, position as u32),
                    ProviderAdapter::Scripted(provider),
                )
            })
            .collect(),
    )
}

/// Pipeline configuration naming the same providers, with no backoff delays
pub fn pipeline_config(names: &[&str], max_retries_per_provider: u32) -> PipelineConfig {
    PipelineConfig::new(
        names
            .iter()
            .enumerate()
            .map(|(position, name)| scripted_config(name, position as u32))
            .collect(),
    )
    .with_retry(RetrySettings::immediate(max_retries_per_provider))
}

/// In-memory ledger with `document` and the units of `phase` registered
pub async fn registered_ledger(document: &Document, phase: Phase) -> Result<JobLedger> {
    let ledger = JobLedger::open_in_memory()?;
    register(&ledger, document).await?;
    ledger
        .register_units(&document.id, &document.work_units(phase, &[]))
        .await?;
    Ok(ledger)
}

/// Register `document` and its chapters without running anything
pub async fn register(ledger: &JobLedger, document: &Document) -> Result<()> {
    let record = DocumentRecord::new(&document.id, &document.fingerprint(), PhaseSet::full());
    let chapters = document
        .chapters
        .iter()
        .enumerate()
        .map(|(ordinal, chapter)| ChapterRecord::from_chapter(&document.id, ordinal, chapter))
        .collect();
    ledger.register_document(&record, chapters).await
}
