/*!
 * Orchestration pipeline for chapter translation.
 *
 * A document moves through up to three phases:
 * 1. **Glossary**: extract terms per chapter and fold them into one mapping
 * 2. **Translate**: translate chapters in order with the accumulated glossary
 * 3. **Proof**: run independent checks on every translated chapter
 *
 * Progress lives in the job ledger, so any run can be resumed.
 */

pub mod control;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod state;

// Re-export types used externally
pub use control::RunControl;
pub use events::PipelineEvent;
pub use executor::{PhaseContext, PhaseExecutor, PhaseOutcome};
pub use orchestrator::{ChapterProgress, Orchestrator, StatusSnapshot};
pub use state::{PhaseSet, PipelineState};
