/*!
 * Translation orchestration for chapter-based documents.
 *
 * This module contains the engine that drives documents through AI
 * providers. It is split into several submodules:
 *
 * - `document`: Document model, work units and glossary
 * - `prompts`: Prompt construction and response parsing
 * - `policy`: Retry/fallback policy across providers
 * - `concurrency`: Per-backend concurrency defaults
 * - `pipeline`: Phase executor and orchestration state machine
 */

// Re-export main types for easier usage
pub use self::pipeline::{Orchestrator, PhaseSet, PipelineEvent, PipelineState, StatusSnapshot};
pub use self::policy::{Backoff, DispatchOutcome, RetryPolicy};

// Re-export document model types
pub use self::document::{
    Chapter, Document, DocumentStatus, Finding, FindingKind, Glossary, GlossaryEntry, Phase,
    ProofCheck, TermCategory, UnitKey, WorkUnit,
};

// Re-export prompt types
pub use self::prompts::{Prompt, PromptBuilder, PromptTask, TemplatePromptBuilder};

// Submodules
pub mod concurrency;
pub mod document;
pub mod pipeline;
pub mod policy;
pub mod prompts;
