/*!
 * Orchestration state machine.
 *
 * The orchestrator owns a document's pipeline state. It registers the
 * document in the ledger, moves it through the selected phases, persists
 * every transition, and rebuilds phase inputs (glossary, translations) from
 * the ledger so that a resumed run sees exactly what the interrupted one
 * had produced.
 */

use anyhow::Context;
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::control::RunControl;
use super::events::PipelineEvent;
use super::executor::{PhaseContext, PhaseExecutor, PhaseOutcome};
use super::state::{PhaseSet, PipelineState};
use crate::app_config::PipelineConfig;
use crate::errors::OrchestrationError;
use crate::ledger::{ChapterRecord, CostSummary, DocumentRecord, JobLedger, UnitStatus};
use crate::providers::{ProviderHandle, ProviderRegistry};
use crate::translation::document::{
    Chapter, Document, DocumentStatus, Finding, Glossary, GlossaryEntry, Phase,
};
use crate::translation::prompts::{PromptBuilder, TemplatePromptBuilder};

const EVENT_CAPACITY: usize = 256;

/// Progress of one chapter across phases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterProgress {
    pub chapter_id: String,
    pub title: Option<String>,
    pub glossary: Option<UnitStatus>,
    pub translate: Option<UnitStatus>,
    /// Proofing units done (succeeded or skipped)
    pub proof_done: usize,
    pub proof_total: usize,
    pub findings: usize,
}

/// Read-only view of a document for progress display
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub document_id: String,
    pub state: PipelineState,
    pub status: DocumentStatus,
    pub phase: Option<Phase>,
    pub phases: PhaseSet,
    pub chapters: Vec<ChapterProgress>,
    pub cost: CostSummary,
}

impl StatusSnapshot {
    /// (done, total) units registered for a phase
    pub fn phase_progress(&self, phase: Phase) -> (usize, usize) {
        let count = |status: Option<UnitStatus>| match status {
            Some(status) => (usize::from(status.is_done()), 1),
            None => (0, 0),
        };

        self.chapters.iter().fold((0, 0), |(done, total), chapter| {
            let (d, t) = match phase {
                Phase::Glossary => count(chapter.glossary),
                Phase::Translate => count(chapter.translate),
                Phase::Proof => (chapter.proof_done, chapter.proof_total),
            };
            (done + d, total + t)
        })
    }
}

#[derive(Debug, Clone)]
struct ActiveRun {
    document_id: String,
    control: RunControl,
}

/// Clears the active run when a run ends, however it ends
struct RunGuard {
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *self.active.lock() = None;
    }
}

/// Drives documents through glossary, translate and proof
#[derive(Clone)]
pub struct Orchestrator {
    ledger: JobLedger,
    prompt_builder: Option<Arc<dyn PromptBuilder>>,
    events: broadcast::Sender<PipelineEvent>,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl Orchestrator {
    pub fn new(ledger: JobLedger) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            ledger,
            prompt_builder: None,
            events,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Replace the template prompt builder
    pub fn with_prompt_builder(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        self.prompt_builder = Some(builder);
        self
    }

    pub fn ledger(&self) -> &JobLedger {
        &self.ledger
    }

    /// Receive state changes and unit resolutions as they happen
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Document of the run in progress, if any
    pub fn active_document(&self) -> Option<String> {
        self.active.lock().as_ref().map(|run| run.document_id.clone())
    }

    /// Stop dispatching new units; in-flight units finish. Returns false when idle.
    pub fn pause(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(run) => {
                info!("Pause requested for '{}'", run.document_id);
                run.control.pause();
                true
            }
            None => false,
        }
    }

    /// Like `pause`, and also cancel backoff sleeps and in-flight calls
    pub fn stop(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(run) => {
                info!("Stop requested for '{}'", run.document_id);
                run.control.stop();
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Start / resume
    // =========================================================================

    /// Run `document` through the selected phases with the configured providers
    pub async fn start(
        &self,
        document: Document,
        config: &PipelineConfig,
        phases: PhaseSet,
    ) -> Result<PipelineState, OrchestrationError> {
        let registry = ProviderRegistry::from_configs(&config.providers);
        self.start_with_providers(document, config, phases, &registry)
            .await
    }

    /// `start` with an already-built provider registry
    pub async fn start_with_providers(
        &self,
        document: Document,
        config: &PipelineConfig,
        phases: PhaseSet,
        registry: &ProviderRegistry,
    ) -> Result<PipelineState, OrchestrationError> {
        phases.validate()?;
        document
            .validate()
            .map_err(|e| OrchestrationError::InvalidDocument(e.to_string()))?;
        let candidates = registry.candidates(config.pinned_provider.as_deref())?;

        let (_guard, control) = self.begin_run(&document.id)?;
        info!(
            "Starting '{}' ({} chapters) with providers [{}]",
            document.id,
            document.chapters.len(),
            candidates
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let fingerprint = document.fingerprint();
        match self.ledger.get_document(&document.id).await? {
            Some(existing) if existing.fingerprint == fingerprint => {
                info!(
                    "Document '{}' is already in the ledger; reusing recorded progress",
                    document.id
                );
                self.ledger.update_phase_set(&document.id, &phases).await?;
                self.ledger
                    .update_run_settings(
                        &document.id,
                        &config.source_language,
                        &config.target_language,
                        output_dir_label(&document).as_deref(),
                    )
                    .await?;
                self.ledger
                    .update_state(&document.id, &PipelineState::Idle)
                    .await?;
            }
            Some(_) => {
                warn!(
                    "Source of document '{}' changed since it was registered; discarding previous progress",
                    document.id
                );
                self.ledger.delete_document(&document.id).await?;
                self.register(&document, &fingerprint, &phases, config).await?;
            }
            None => self.register(&document, &fingerprint, &phases, config).await?,
        }

        if let Some(glossary) = &phases.supplied_glossary {
            info!(
                "Using supplied glossary with {} term(s) for '{}'",
                glossary.len(),
                document.id
            );
            self.ledger
                .replace_glossary(&document.id, glossary.to_entries())
                .await?;
        }

        let mut state = PipelineState::Idle;
        self.transition(&document.id, &mut state, phases.entry_state(), &phases)
            .await?;

        self.drive(document, state, &phases, config, &candidates, &control)
            .await
    }

    /// Continue a paused or failed document with the configured providers
    pub async fn resume(
        &self,
        document_id: &str,
        config: &PipelineConfig,
    ) -> Result<PipelineState, OrchestrationError> {
        let registry = ProviderRegistry::from_configs(&config.providers);
        self.resume_with_providers(document_id, config, &registry)
            .await
    }

    /// `resume` with an already-built provider registry.
    ///
    /// Re-enters the interrupted phase; units already done are not dispatched
    /// again. On a failed document this is the operator retry of that phase.
    pub async fn resume_with_providers(
        &self,
        document_id: &str,
        config: &PipelineConfig,
        registry: &ProviderRegistry,
    ) -> Result<PipelineState, OrchestrationError> {
        let candidates = registry.candidates(config.pinned_provider.as_deref())?;
        let (_guard, control) = self.begin_run(document_id)?;

        let record = self
            .ledger
            .get_document(document_id)
            .await?
            .ok_or_else(|| OrchestrationError::DocumentNotFound(document_id.to_string()))?;

        if !record.state.is_resumable() {
            return Err(OrchestrationError::NotResumable {
                document_id: document_id.to_string(),
                state: record.state.label(),
            });
        }

        let mut state = record.state.clone();
        if let Some(phase) = state.running_phase() {
            warn!(
                "Document '{}' was left in {}; treating it as paused",
                document_id,
                state.label()
            );
            state = PipelineState::Paused { phase };
            self.ledger.update_state(document_id, &state).await?;
        }

        let Some(phase) = state.phase() else {
            return Err(OrchestrationError::NotResumable {
                document_id: document_id.to_string(),
                state: state.label(),
            });
        };

        let config = run_config(&record, config);
        info!(
            "Resuming '{}' in the {} phase ({} -> {})",
            document_id, phase, config.source_language, config.target_language
        );
        let document = self.load_document(document_id).await?;
        self.transition(
            document_id,
            &mut state,
            PipelineState::running(phase),
            &record.phase_set,
        )
        .await?;

        self.drive(
            document,
            state,
            &record.phase_set,
            &config,
            &candidates,
            &control,
        )
        .await
    }

    async fn register(
        &self,
        document: &Document,
        fingerprint: &str,
        phases: &PhaseSet,
        config: &PipelineConfig,
    ) -> Result<(), OrchestrationError> {
        let record = DocumentRecord::new(&document.id, fingerprint, phases.clone())
            .with_languages(&config.source_language, &config.target_language)
            .with_output_dir(output_dir_label(document));
        let chapters = document
            .chapters
            .iter()
            .enumerate()
            .map(|(ordinal, chapter)| ChapterRecord::from_chapter(&document.id, ordinal, chapter))
            .collect();

        self.ledger.register_document(&record, chapters).await?;
        Ok(())
    }

    fn begin_run(&self, document_id: &str) -> Result<(RunGuard, RunControl), OrchestrationError> {
        let mut active = self.active.lock();
        if let Some(run) = active.as_ref() {
            return Err(OrchestrationError::AlreadyRunning(run.document_id.clone()));
        }

        let control = RunControl::new();
        *active = Some(ActiveRun {
            document_id: document_id.to_string(),
            control: control.clone(),
        });

        Ok((
            RunGuard {
                active: self.active.clone(),
            },
            control,
        ))
    }

    // =========================================================================
    // State machine
    // =========================================================================

    async fn drive(
        &self,
        mut document: Document,
        mut state: PipelineState,
        phases: &PhaseSet,
        config: &PipelineConfig,
        candidates: &[ProviderHandle],
        control: &RunControl,
    ) -> Result<PipelineState, OrchestrationError> {
        let prompts = self
            .prompt_builder
            .clone()
            .unwrap_or_else(|| Arc::new(TemplatePromptBuilder::from_config(config)));
        let executor = PhaseExecutor::new(self.ledger.clone(), config, prompts, self.events.clone());
        let document_id = document.id.clone();

        loop {
            if let Some(phase) = state.running_phase() {
                let result = self
                    .run_phase(&executor, &mut document, phase, candidates, control)
                    .await;

                match result {
                    Ok(PhaseOutcome::Completed) => {
                        self.transition(&document_id, &mut state, phases.state_after(phase), phases)
                            .await?;
                    }
                    Ok(PhaseOutcome::Interrupted) => {
                        self.transition(&document_id, &mut state, PipelineState::Paused { phase }, phases)
                            .await?;
                        return Ok(state);
                    }
                    Ok(PhaseOutcome::Failed(failure)) => {
                        let failed = PipelineState::Failed {
                            phase,
                            message: failure.to_string(),
                            failure: Some(failure),
                        };
                        self.transition(&document_id, &mut state, failed, phases)
                            .await?;
                        return Ok(state);
                    }
                    Err(e) => {
                        let failed = PipelineState::Failed {
                            phase,
                            failure: None,
                            message: e.to_string(),
                        };
                        if let Err(record_error) =
                            self.transition(&document_id, &mut state, failed, phases).await
                        {
                            error!(
                                "Could not record failure of '{}': {}",
                                document_id, record_error
                            );
                        }
                        return Err(e);
                    }
                }
                continue;
            }

            match state.phase() {
                Some(phase) if state == PipelineState::pending(phase) => {
                    self.transition(&document_id, &mut state, PipelineState::running(phase), phases)
                        .await?;
                }
                _ => {
                    if state == PipelineState::Completed {
                        info!("Document '{}' completed", document_id);
                    }
                    return Ok(state);
                }
            }
        }
    }

    async fn run_phase(
        &self,
        executor: &PhaseExecutor,
        document: &mut Document,
        phase: Phase,
        candidates: &[ProviderHandle],
        control: &RunControl,
    ) -> Result<PhaseOutcome, OrchestrationError> {
        self.load_outputs(document).await?;

        let glossary = match phase {
            Phase::Glossary => Glossary::new(),
            Phase::Translate | Phase::Proof => {
                Glossary::from_entries(self.ledger.get_glossary(&document.id).await?)
            }
        };

        let outcome = executor
            .run(
                phase,
                PhaseContext {
                    document: &*document,
                    glossary: &glossary,
                    candidates,
                    control,
                },
            )
            .await?;

        if phase == Phase::Glossary && outcome == PhaseOutcome::Completed {
            self.fold_glossary(&document.id).await?;
        }

        Ok(outcome)
    }

    async fn transition(
        &self,
        document_id: &str,
        state: &mut PipelineState,
        next: PipelineState,
        phases: &PhaseSet,
    ) -> Result<(), OrchestrationError> {
        if !state.can_transition_to(&next, phases) {
            return Err(OrchestrationError::InvalidTransition {
                from: state.label(),
                to: next.label(),
            });
        }

        self.ledger.update_state(document_id, &next).await?;
        info!("Document '{}': {} -> {}", document_id, state.label(), next.label());
        *state = next;

        let _ = self.events.send(PipelineEvent::StateChanged {
            document_id: document_id.to_string(),
            state: state.clone(),
        });
        Ok(())
    }

    // =========================================================================
    // Ledger-derived views
    // =========================================================================

    /// Fold per-chapter glossary outputs, in chapter order, into the stored glossary
    async fn fold_glossary(&self, document_id: &str) -> Result<Glossary, OrchestrationError> {
        let mut glossary = Glossary::new();

        for record in self.ledger.unit_records(document_id, Phase::Glossary).await? {
            if !record.status.is_done() {
                continue;
            }
            if let Some(output) = &record.output {
                let entries: Vec<GlossaryEntry> = serde_json::from_str(output).with_context(|| {
                    format!("Stored glossary output of '{}' is not valid", record.unit_key)
                })?;
                glossary.fold_chapter(entries);
            }
        }

        self.ledger
            .replace_glossary(document_id, glossary.to_entries())
            .await?;
        info!("Glossary for '{}' has {} term(s)", document_id, glossary.len());
        Ok(glossary)
    }

    /// Copy recorded phase outputs onto the document's chapters
    async fn load_outputs(&self, document: &mut Document) -> Result<(), OrchestrationError> {
        for chapter in &mut document.chapters {
            chapter.translated_text = None;
            chapter.glossary_output = None;
            chapter.findings.clear();
        }

        for record in self.ledger.all_unit_records(&document.id).await? {
            if !record.status.is_done() {
                continue;
            }
            let (Some(output), Some(chapter)) =
                (record.output.as_deref(), document.chapter_mut(&record.chapter_id))
            else {
                continue;
            };

            match record.phase {
                Phase::Glossary => {
                    let entries: Vec<GlossaryEntry> = serde_json::from_str(output)
                        .with_context(|| format!("Invalid glossary output for '{}'", record.unit_key))?;
                    chapter.glossary_output = Some(entries);
                }
                Phase::Translate => chapter.translated_text = Some(output.to_string()),
                Phase::Proof => {
                    let findings: Vec<Finding> = serde_json::from_str(output)
                        .with_context(|| format!("Invalid findings for '{}'", record.unit_key))?;
                    chapter.findings.extend(findings);
                }
            }
        }

        Ok(())
    }

    /// Rebuild a registered document with everything recorded so far
    pub async fn load_document(&self, document_id: &str) -> Result<Document, OrchestrationError> {
        let records = self.ledger.get_chapters(document_id).await?;
        if records.is_empty() && self.ledger.get_document(document_id).await?.is_none() {
            return Err(OrchestrationError::DocumentNotFound(document_id.to_string()));
        }

        let chapters: Vec<Chapter> = records.into_iter().map(ChapterRecord::into_chapter).collect();
        let mut document = Document::new(document_id, chapters);
        if let Some(output_dir) = self
            .ledger
            .get_document(document_id)
            .await?
            .and_then(|record| record.output_dir)
        {
            document = document.with_output_dir(output_dir);
        }
        self.load_outputs(&mut document).await?;
        Ok(document)
    }

    /// Phase, per-chapter progress and cost of a document
    pub async fn status(&self, document_id: &str) -> Result<StatusSnapshot, OrchestrationError> {
        let record = self
            .ledger
            .get_document(document_id)
            .await?
            .ok_or_else(|| OrchestrationError::DocumentNotFound(document_id.to_string()))?;

        let mut chapters: Vec<ChapterProgress> = self
            .ledger
            .get_chapters(document_id)
            .await?
            .into_iter()
            .map(|c| ChapterProgress {
                chapter_id: c.chapter_id,
                title: c.title,
                glossary: None,
                translate: None,
                proof_done: 0,
                proof_total: 0,
                findings: 0,
            })
            .collect();

        for unit in self.ledger.all_unit_records(document_id).await? {
            let Some(progress) = chapters.iter_mut().find(|c| c.chapter_id == unit.chapter_id)
            else {
                continue;
            };

            match unit.phase {
                Phase::Glossary => progress.glossary = Some(unit.status),
                Phase::Translate => progress.translate = Some(unit.status),
                Phase::Proof => {
                    progress.proof_total += 1;
                    if unit.status.is_done() {
                        progress.proof_done += 1;
                        progress.findings += unit
                            .output
                            .as_deref()
                            .and_then(|o| serde_json::from_str::<Vec<Finding>>(o).ok())
                            .map_or(0, |f| f.len());
                    }
                }
            }
        }

        Ok(StatusSnapshot {
            document_id: record.id,
            status: record.state.status(),
            phase: record.state.phase(),
            state: record.state,
            phases: record.phase_set,
            chapters,
            cost: self.ledger.cost_summary(document_id).await?,
        })
    }
}

fn output_dir_label(document: &Document) -> Option<String> {
    document
        .output_dir
        .as_ref()
        .map(|dir| dir.to_string_lossy().into_owned())
}

/// The configuration a resumed run uses: the recorded languages win
fn run_config(record: &DocumentRecord, config: &PipelineConfig) -> PipelineConfig {
    let (Some(source), Some(target)) = (&record.source_language, &record.target_language) else {
        return config.clone();
    };
    if *source != config.source_language || *target != config.target_language {
        info!(
            "Document '{}' was started as {} -> {}; keeping those languages",
            record.id, source, target
        );
    }
    config.clone().with_languages(source, target)
}
