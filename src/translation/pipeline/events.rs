/*!
 * Push notifications from a running pipeline.
 */

use super::state::PipelineState;
use crate::errors::ProviderTrial;
use crate::translation::document::Phase;

/// Event published on the orchestrator's broadcast channel
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StateChanged {
        document_id: String,
        state: PipelineState,
    },
    UnitSucceeded {
        document_id: String,
        phase: Phase,
        unit_key: String,
        provider: String,
        attempts: u32,
    },
    UnitSkipped {
        document_id: String,
        phase: Phase,
        unit_key: String,
    },
    UnitExhausted {
        document_id: String,
        phase: Phase,
        unit_key: String,
        trials: Vec<ProviderTrial>,
    },
}

impl PipelineEvent {
    pub fn document_id(&self) -> &str {
        match self {
            PipelineEvent::StateChanged { document_id, .. }
            | PipelineEvent::UnitSucceeded { document_id, .. }
            | PipelineEvent::UnitSkipped { document_id, .. }
            | PipelineEvent::UnitExhausted { document_id, .. } => document_id,
        }
    }

    /// Whether the event resolves a unit (for progress counting)
    pub fn is_unit_resolved(&self) -> bool {
        !matches!(self, PipelineEvent::StateChanged { .. })
    }
}
