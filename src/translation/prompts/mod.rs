/*!
 * Prompt construction for the pipeline phases.
 *
 * This module provides:
 * - The `PromptBuilder` seam the phase executor calls before every dispatch
 * - A template-based default builder
 * - Parsers that turn provider text into ledger payloads
 */

use crate::translation::document::{Chapter, Glossary, Phase, ProofCheck, WorkUnit};

pub mod responses;
pub mod templates;

// Re-export main types
pub use responses::{
    SizeTolerance, clean_translation, parse_findings_response, parse_glossary_response,
    restore_image_blocks, validate_response,
};
pub use templates::{PromptTemplate, TemplatePromptBuilder};

/// What a prompt asks the provider to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptTask {
    Glossary,
    Translate,
    Proof(ProofCheck),
}

impl PromptTask {
    pub fn for_unit(unit: &WorkUnit) -> Self {
        match (unit.phase, unit.check) {
            (Phase::Glossary, _) => PromptTask::Glossary,
            (Phase::Translate, _) => PromptTask::Translate,
            (Phase::Proof, Some(check)) => PromptTask::Proof(check),
            (Phase::Proof, None) => PromptTask::Proof(ProofCheck::StyleDrift),
        }
    }

    pub fn phase(self) -> Phase {
        match self {
            PromptTask::Glossary => Phase::Glossary,
            PromptTask::Translate => Phase::Translate,
            PromptTask::Proof(_) => Phase::Proof,
        }
    }
}

/// A provider-agnostic prompt
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub task: PromptTask,
    pub system: String,
    pub user: String,
    /// Key of the unit this prompt was built for
    pub unit_key: String,
    /// The chapter text the prompt is about (source, or translation when proofing)
    pub chapter_text: String,
}

impl Prompt {
    pub fn new(task: PromptTask, system: &str, user: &str) -> Self {
        Self {
            task,
            system: system.to_string(),
            user: user.to_string(),
            unit_key: String::new(),
            chapter_text: String::new(),
        }
    }

    pub fn for_unit(mut self, unit_key: &str) -> Self {
        self.unit_key = unit_key.to_string();
        self
    }

    pub fn with_chapter_text(mut self, text: &str) -> Self {
        self.chapter_text = text.to_string();
        self
    }

    /// Characters sent to the provider
    pub fn characters(&self) -> u64 {
        (self.system.chars().count() + self.user.chars().count()) as u64
    }
}

/// Builds the prompt for one work unit.
///
/// Implementations must be pure with respect to their inputs so that a
/// resumed run sends the same prompts as the original one.
pub trait PromptBuilder: Send + Sync {
    fn build_prompt(
        &self,
        unit: &WorkUnit,
        chapter: &Chapter,
        glossary: &Glossary,
    ) -> anyhow::Result<Prompt>;
}
