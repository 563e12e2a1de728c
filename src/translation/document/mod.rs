/*!
 * Document model for chapter translation.
 *
 * - Documents, chapters and their per-phase outputs
 * - Stable work unit keys for idempotent resumption
 * - Glossary folding and proofing findings
 */

pub mod model;

pub use model::{
    Chapter, Document, DocumentStatus, Finding, FindingKind, Glossary, GlossaryEntry, Phase,
    ProofCheck, TermCategory, UnitKey, WorkUnit, has_translatable_text, image_blocks,
};
