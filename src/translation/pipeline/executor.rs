/*!
 * Phase executor.
 *
 * Runs one phase over the units the ledger does not yet record as done.
 * Glossary and translate dispatch in bounded waves, in chapter order, and
 * stop at the first wave with an exhausted unit. Proofing units are
 * independent and run unordered up to the proofing concurrency.
 */

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use log::{debug, error, info};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::control::RunControl;
use super::events::PipelineEvent;
use crate::app_config::{ConcurrencySettings, PipelineConfig};
use crate::errors::{OrchestrationError, PhaseFailure, ProviderTrial};
use crate::ledger::JobLedger;
use crate::providers::ProviderHandle;
use crate::translation::document::{Document, Glossary, Phase, ProofCheck, WorkUnit};
use crate::translation::policy::{DispatchOutcome, RetryPolicy};
use crate::translation::prompts::{PromptBuilder, SizeTolerance, validate_response};

/// Everything a phase run reads
#[derive(Debug, Clone, Copy)]
pub struct PhaseContext<'a> {
    pub document: &'a Document,
    /// Accumulated glossary (empty during the glossary phase)
    pub glossary: &'a Glossary,
    /// Providers in fallback order
    pub candidates: &'a [ProviderHandle],
    pub control: &'a RunControl,
}

/// How a phase run ended
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    /// Every unit is done and the phase is marked complete in the ledger
    Completed,
    /// Pause or stop was observed; the phase is not marked complete
    Interrupted,
    /// At least one unit exhausted every provider
    Failed(PhaseFailure),
}

#[derive(Debug)]
enum UnitResult {
    Succeeded,
    Skipped,
    Exhausted(Vec<ProviderTrial>),
    /// Not dispatched, or abandoned on stop
    Unresolved,
}

/// Drives one phase of one document
#[derive(Clone)]
pub struct PhaseExecutor {
    ledger: JobLedger,
    policy: RetryPolicy,
    prompts: Arc<dyn PromptBuilder>,
    concurrency: ConcurrencySettings,
    checks: Vec<ProofCheck>,
    size_tolerance: SizeTolerance,
    events: broadcast::Sender<PipelineEvent>,
}

impl PhaseExecutor {
    pub fn new(
        ledger: JobLedger,
        config: &PipelineConfig,
        prompts: Arc<dyn PromptBuilder>,
        events: broadcast::Sender<PipelineEvent>,
    ) -> Self {
        Self {
            policy: RetryPolicy::new(ledger.clone(), &config.retry),
            ledger,
            prompts,
            concurrency: config.concurrency.clone(),
            checks: config.proofing.checks.clone(),
            size_tolerance: SizeTolerance::from_settings(&config.retry),
            events,
        }
    }

    /// Run `phase` over its unresolved units
    pub async fn run(
        &self,
        phase: Phase,
        ctx: PhaseContext<'_>,
    ) -> Result<PhaseOutcome, OrchestrationError> {
        let units = self.pending_units(ctx.document, phase).await?;
        info!(
            "Running {} phase for '{}': {} unit(s) to dispatch",
            phase,
            ctx.document.id,
            units.len()
        );

        let outcome = if phase.is_context_dependent() {
            self.run_waves(phase, &units, ctx).await?
        } else {
            self.run_unordered(phase, &units, ctx).await?
        };

        if outcome != PhaseOutcome::Completed {
            return Ok(outcome);
        }

        // A stop or pause that arrived during the last units still keeps
        // the phase open
        if ctx.control.is_halted() {
            return Ok(PhaseOutcome::Interrupted);
        }

        self.ledger.mark_phase_complete(&ctx.document.id, phase).await?;
        Ok(PhaseOutcome::Completed)
    }

    /// Units of `phase` not yet succeeded or skipped, in document order
    pub async fn pending_units(
        &self,
        document: &Document,
        phase: Phase,
    ) -> Result<Vec<WorkUnit>, OrchestrationError> {
        let units = document.work_units(phase, &self.checks);
        let added = self.ledger.register_units(&document.id, &units).await?;
        if added > 0 {
            debug!("Registered {} new {} unit(s) for '{}'", added, phase, document.id);
        }

        let pending: HashSet<String> = self
            .ledger
            .pending_units(&document.id, phase)
            .await?
            .into_iter()
            .map(|record| record.unit_key)
            .collect();

        Ok(units
            .into_iter()
            .filter(|unit| pending.contains(unit.key.as_str()))
            .collect())
    }

    /// Ordered, fail-fast dispatch in waves of `wave_size` units
    async fn run_waves(
        &self,
        phase: Phase,
        units: &[WorkUnit],
        ctx: PhaseContext<'_>,
    ) -> Result<PhaseOutcome, OrchestrationError> {
        for wave in units.chunks(self.concurrency.wave_size.max(1)) {
            if ctx.control.is_halted() {
                info!("{} phase for '{}' halted before unit '{}'", phase, ctx.document.id, wave[0].key);
                return Ok(PhaseOutcome::Interrupted);
            }

            let results = join_all(wave.iter().map(|unit| self.run_unit(unit, ctx))).await;

            let mut failure: Option<PhaseFailure> = None;
            let mut interrupted = false;
            for (unit, result) in wave.iter().zip(results) {
                match result? {
                    UnitResult::Exhausted(trials) => match failure.as_mut() {
                        Some(first) => first.failed_units += 1,
                        None => failure = Some(phase_failure(unit, trials)),
                    },
                    UnitResult::Unresolved => interrupted = true,
                    UnitResult::Succeeded | UnitResult::Skipped => {}
                }
            }

            if let Some(failure) = failure {
                error!("{}", failure);
                return Ok(PhaseOutcome::Failed(failure));
            }
            if interrupted {
                return Ok(PhaseOutcome::Interrupted);
            }
        }

        Ok(PhaseOutcome::Completed)
    }

    /// Independent dispatch: every unit is attempted, failures are collected
    async fn run_unordered(
        &self,
        phase: Phase,
        units: &[WorkUnit],
        ctx: PhaseContext<'_>,
    ) -> Result<PhaseOutcome, OrchestrationError> {
        let limit = self.concurrency.proofing_concurrency.max(1);

        let mut results = stream::iter(units.iter().enumerate())
            .map(|(index, unit)| async move { (index, self.run_unit(unit, ctx).await) })
            .buffer_unordered(limit)
            .collect::<Vec<_>>()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let mut failure: Option<PhaseFailure> = None;
        let mut interrupted = false;
        for (index, result) in results {
            match result? {
                UnitResult::Exhausted(trials) => match failure.as_mut() {
                    Some(first) => first.failed_units += 1,
                    None => failure = Some(phase_failure(&units[index], trials)),
                },
                UnitResult::Unresolved => interrupted = true,
                UnitResult::Succeeded | UnitResult::Skipped => {}
            }
        }

        match failure {
            Some(failure) => {
                error!("{}", failure);
                Ok(PhaseOutcome::Failed(failure))
            }
            None if interrupted => {
                info!("{} phase for '{}' interrupted", phase, ctx.document.id);
                Ok(PhaseOutcome::Interrupted)
            }
            None => Ok(PhaseOutcome::Completed),
        }
    }

    async fn run_unit(
        &self,
        unit: &WorkUnit,
        ctx: PhaseContext<'_>,
    ) -> Result<UnitResult, OrchestrationError> {
        if ctx.control.is_halted() {
            return Ok(UnitResult::Unresolved);
        }

        let document_id = ctx.document.id.as_str();
        let chapter = ctx.document.chapter(&unit.chapter_id).ok_or_else(|| {
            OrchestrationError::InvalidDocument(format!(
                "unit '{}' refers to unknown chapter '{}'",
                unit.key, unit.chapter_id
            ))
        })?;

        if !chapter.is_translatable() {
            let output = match unit.phase {
                Phase::Translate => chapter.source_text.clone(),
                Phase::Glossary | Phase::Proof => "[]".to_string(),
            };
            self.ledger
                .mark_unit_skipped(document_id, unit.phase, unit.key.as_str(), &output)
                .await?;
            debug!("Skipped unit '{}' ({}): nothing to translate", unit.key, unit.phase);
            self.emit(PipelineEvent::UnitSkipped {
                document_id: document_id.to_string(),
                phase: unit.phase,
                unit_key: unit.key.to_string(),
            });
            return Ok(UnitResult::Skipped);
        }

        let prompt = self
            .prompts
            .build_prompt(unit, chapter, ctx.glossary)
            .map_err(|e| OrchestrationError::Prompt {
                unit_key: unit.key.to_string(),
                message: e.to_string(),
            })?;

        let task = prompt.task;
        let tolerance = self.size_tolerance;
        let validate = |text: &str| {
            validate_response(task, &chapter.id, &chapter.source_text, text, &tolerance)
        };

        let outcome = self
            .policy
            .dispatch(
                document_id,
                unit,
                &prompt,
                ctx.candidates,
                validate,
                ctx.control.token(),
            )
            .await?;

        match outcome {
            DispatchOutcome::Succeeded {
                provider, attempts, ..
            } => {
                self.emit(PipelineEvent::UnitSucceeded {
                    document_id: document_id.to_string(),
                    phase: unit.phase,
                    unit_key: unit.key.to_string(),
                    provider,
                    attempts,
                });
                Ok(UnitResult::Succeeded)
            }
            DispatchOutcome::Exhausted { trials } => {
                self.ledger
                    .mark_unit_exhausted(document_id, unit.phase, unit.key.as_str())
                    .await?;
                self.emit(PipelineEvent::UnitExhausted {
                    document_id: document_id.to_string(),
                    phase: unit.phase,
                    unit_key: unit.key.to_string(),
                    trials: trials.clone(),
                });
                Ok(UnitResult::Exhausted(trials))
            }
            DispatchOutcome::Cancelled => Ok(UnitResult::Unresolved),
        }
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn phase_failure(unit: &WorkUnit, trials: Vec<ProviderTrial>) -> PhaseFailure {
    PhaseFailure {
        phase: unit.phase,
        unit_key: unit.key.to_string(),
        chapter_id: unit.chapter_id.clone(),
        trials,
        failed_units: 1,
    }
}
