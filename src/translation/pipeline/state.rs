/*!
 * Orchestration states and phase selection.
 *
 * `Paused` and `Failed` remember the phase they interrupted, so re-entry
 * goes straight back to the matching `*Running` state.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{OrchestrationError, PhaseFailure};
use crate::translation::document::{DocumentStatus, Glossary, Phase};

/// Position of a document in the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    GlossaryPending,
    GlossaryRunning,
    TranslatePending,
    TranslateRunning,
    ProofPending,
    ProofRunning,
    Paused {
        phase: Phase,
    },
    Failed {
        phase: Phase,
        /// Absent when the phase stopped on a ledger error rather than a unit
        failure: Option<PhaseFailure>,
        message: String,
    },
    Completed,
}

impl PipelineState {
    pub fn pending(phase: Phase) -> Self {
        match phase {
            Phase::Glossary => PipelineState::GlossaryPending,
            Phase::Translate => PipelineState::TranslatePending,
            Phase::Proof => PipelineState::ProofPending,
        }
    }

    pub fn running(phase: Phase) -> Self {
        match phase {
            Phase::Glossary => PipelineState::GlossaryRunning,
            Phase::Translate => PipelineState::TranslateRunning,
            Phase::Proof => PipelineState::ProofRunning,
        }
    }

    /// Phase the document is in, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            PipelineState::Idle | PipelineState::Completed => None,
            PipelineState::GlossaryPending | PipelineState::GlossaryRunning => Some(Phase::Glossary),
            PipelineState::TranslatePending | PipelineState::TranslateRunning => {
                Some(Phase::Translate)
            }
            PipelineState::ProofPending | PipelineState::ProofRunning => Some(Phase::Proof),
            PipelineState::Paused { phase } | PipelineState::Failed { phase, .. } => Some(*phase),
        }
    }

    /// Phase currently executing
    pub fn running_phase(&self) -> Option<Phase> {
        match self {
            PipelineState::GlossaryRunning => Some(Phase::Glossary),
            PipelineState::TranslateRunning => Some(Phase::Translate),
            PipelineState::ProofRunning => Some(Phase::Proof),
            _ => None,
        }
    }

    pub fn status(&self) -> DocumentStatus {
        match self {
            PipelineState::Idle => DocumentStatus::Idle,
            PipelineState::Paused { .. } => DocumentStatus::Paused,
            PipelineState::Failed { .. } => DocumentStatus::Failed,
            PipelineState::Completed => DocumentStatus::Completed,
            _ => DocumentStatus::Running,
        }
    }

    /// Whether `resume()` may pick this document up. A `*Running` state
    /// found at rest means the process died mid-phase.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            PipelineState::Paused { .. } | PipelineState::Failed { .. }
        ) || self.running_phase().is_some()
    }

    /// Validate a transition against the state graph and phase selection
    pub fn can_transition_to(&self, next: &PipelineState, phases: &PhaseSet) -> bool {
        use PipelineState::*;

        match (self, next) {
            (Idle, next) => *next == phases.entry_state(),
            (GlossaryPending, GlossaryRunning)
            | (TranslatePending, TranslateRunning)
            | (ProofPending, ProofRunning) => true,
            (Paused { phase: from }, next) | (Failed { phase: from, .. }, next) => {
                next.running_phase() == Some(*from)
            }
            (current, next) => match current.running_phase() {
                Some(phase) => match next {
                    Paused { phase: p } | Failed { phase: p, .. } => *p == phase,
                    _ => *next == phases.state_after(phase),
                },
                None => false,
            },
        }
    }

    /// Short label for logs and errors
    pub fn label(&self) -> String {
        match self {
            PipelineState::Idle => "Idle".to_string(),
            PipelineState::GlossaryPending => "GlossaryPending".to_string(),
            PipelineState::GlossaryRunning => "GlossaryRunning".to_string(),
            PipelineState::TranslatePending => "TranslatePending".to_string(),
            PipelineState::TranslateRunning => "TranslateRunning".to_string(),
            PipelineState::ProofPending => "ProofPending".to_string(),
            PipelineState::ProofRunning => "ProofRunning".to_string(),
            PipelineState::Paused { phase } => format!("Paused({})", phase),
            PipelineState::Failed { phase, .. } => format!("Failed({})", phase),
            PipelineState::Completed => "Completed".to_string(),
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Failed { message, .. } => write!(f, "{}: {}", self.label(), message),
            _ => f.write_str(&self.label()),
        }
    }
}

/// Which phases a run executes.
///
/// These are configuration-time restrictions on the state graph; they never
/// add states of their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSet {
    pub glossary: bool,
    pub translate: bool,
    pub proof: bool,
    /// Glossary used instead of a computed one when `glossary` is off
    #[serde(skip)]
    pub supplied_glossary: Option<Glossary>,
}

impl Default for PhaseSet {
    fn default() -> Self {
        Self::full()
    }
}

impl PhaseSet {
    /// Glossary, translate, proof
    pub fn full() -> Self {
        Self {
            glossary: true,
            translate: true,
            proof: true,
            supplied_glossary: None,
        }
    }

    /// Stop after the glossary phase
    pub fn glossary_only() -> Self {
        Self {
            glossary: true,
            translate: false,
            proof: false,
            supplied_glossary: None,
        }
    }

    /// Start at translate with a caller-supplied glossary
    pub fn skip_glossary(glossary: Glossary) -> Self {
        Self {
            glossary: false,
            translate: true,
            proof: true,
            supplied_glossary: Some(glossary),
        }
    }

    /// Stop after the translate phase
    pub fn without_proofing(mut self) -> Self {
        self.proof = false;
        self
    }

    pub fn contains(&self, phase: Phase) -> bool {
        match phase {
            Phase::Glossary => self.glossary,
            Phase::Translate => self.translate,
            Phase::Proof => self.proof,
        }
    }

    /// Selected phases in pipeline order
    pub fn phases(&self) -> Vec<Phase> {
        Phase::ALL.into_iter().filter(|p| self.contains(*p)).collect()
    }

    /// Reject selections that leave a gap or nothing to run
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        if !self.glossary && !self.translate {
            return Err(OrchestrationError::InvalidPhaseSet(
                "glossary-only and skip-glossary cannot be combined".to_string(),
            ));
        }
        if self.proof && !self.translate {
            return Err(OrchestrationError::InvalidPhaseSet(
                "proofing requires the translate phase".to_string(),
            ));
        }
        if self.supplied_glossary.is_some() && self.glossary {
            return Err(OrchestrationError::InvalidPhaseSet(
                "a supplied glossary replaces the glossary phase".to_string(),
            ));
        }
        Ok(())
    }

    /// First state after `Idle`
    pub fn entry_state(&self) -> PipelineState {
        self.phases()
            .first()
            .map(|p| PipelineState::pending(*p))
            .unwrap_or(PipelineState::Completed)
    }

    /// State that follows successful completion of `phase`
    pub fn state_after(&self, phase: Phase) -> PipelineState {
        self.phases()
            .into_iter()
            .find(|p| *p > phase)
            .map(PipelineState::pending)
            .unwrap_or(PipelineState::Completed)
    }
}
