/*!
 * Core document model types for chapter translation.
 *
 * A `Document` is an ordered list of `Chapter`s. Each pipeline phase turns
 * the document into `WorkUnit`s whose keys are derived only from chapter ids
 * and proofing checks, so they stay stable across process restarts.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Glossary,
    Translate,
    Proof,
}

impl Phase {
    /// All phases in pipeline order
    pub const ALL: [Phase; 3] = [Phase::Glossary, Phase::Translate, Phase::Proof];

    /// Whether later units depend on earlier ones (fail-fast, ordered waves)
    pub fn is_context_dependent(self) -> bool {
        !matches!(self, Phase::Proof)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Glossary => "glossary",
            Phase::Translate => "translate",
            Phase::Proof => "proof",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "glossary" => Ok(Phase::Glossary),
            "translate" => Ok(Phase::Translate),
            "proof" => Ok(Phase::Proof),
            _ => Err(anyhow::anyhow!("Invalid phase: {}", s)),
        }
    }
}

/// Independent proofing check run on a translated chapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofCheck {
    /// Leftover source-language text
    UntranslatedText,
    /// Terms not rendered as the glossary says
    GlossaryConsistency,
    /// Pronouns and gendered forms contradicting earlier usage
    GenderConsistency,
    /// Register or tone drifting from the rest of the text
    StyleDrift,
}

impl ProofCheck {
    pub const ALL: [ProofCheck; 4] = [
        ProofCheck::UntranslatedText,
        ProofCheck::GlossaryConsistency,
        ProofCheck::GenderConsistency,
        ProofCheck::StyleDrift,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProofCheck::UntranslatedText => "untranslated_text",
            ProofCheck::GlossaryConsistency => "glossary_consistency",
            ProofCheck::GenderConsistency => "gender_consistency",
            ProofCheck::StyleDrift => "style_drift",
        }
    }

    /// Kind of finding this check produces
    pub fn finding_kind(self) -> FindingKind {
        match self {
            ProofCheck::UntranslatedText => FindingKind::UntranslatedText,
            ProofCheck::GlossaryConsistency => FindingKind::GlossaryMismatch,
            ProofCheck::GenderConsistency => FindingKind::GenderInconsistency,
            ProofCheck::StyleDrift => FindingKind::StyleDrift,
        }
    }
}

impl fmt::Display for ProofCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProofCheck {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "untranslated_text" | "untranslated" | "non_english" => {
                Ok(ProofCheck::UntranslatedText)
            }
            "glossary_consistency" | "glossary" => Ok(ProofCheck::GlossaryConsistency),
            "gender_consistency" | "gender" => Ok(ProofCheck::GenderConsistency),
            "style_drift" | "style" | "final" => Ok(ProofCheck::StyleDrift),
            _ => Err(anyhow::anyhow!("Invalid proofing check: {}", s)),
        }
    }
}

/// Kind of proofing issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    GenderInconsistency,
    GlossaryMismatch,
    StyleDrift,
    UntranslatedText,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FindingKind::GenderInconsistency => "gender_inconsistency",
            FindingKind::GlossaryMismatch => "glossary_mismatch",
            FindingKind::StyleDrift => "style_drift",
            FindingKind::UntranslatedText => "untranslated_text",
        };
        f.write_str(label)
    }
}

/// Proofing issue found in a translated chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub chapter_id: String,
    /// Free-form location within the chapter (paragraph, quoted excerpt)
    pub location: String,
    pub description: String,
}

/// Glossary term category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TermCategory {
    Name,
    Place,
    Title,
    #[default]
    Other,
}

impl TermCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            TermCategory::Name => "name",
            TermCategory::Place => "place",
            TermCategory::Title => "title",
            TermCategory::Other => "other",
        }
    }

    /// Lenient mapping from whatever label a model returned
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "name" | "character" | "person" | "people" => TermCategory::Name,
            "place" | "location" | "organization" => TermCategory::Place,
            "title" | "honorific" | "rank" => TermCategory::Title,
            _ => TermCategory::Other,
        }
    }
}

impl fmt::Display for TermCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One glossary term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub source_term: String,
    pub translation: String,
    #[serde(default)]
    pub category: TermCategory,
    pub first_seen_chapter: String,
}

impl GlossaryEntry {
    pub fn new(
        source_term: &str,
        translation: &str,
        category: TermCategory,
        first_seen_chapter: &str,
    ) -> Self {
        Self {
            source_term: source_term.trim().to_string(),
            translation: translation.trim().to_string(),
            category,
            first_seen_chapter: first_seen_chapter.to_string(),
        }
    }
}

/// Glossary keyed by source term.
///
/// Folding is last-writer-wins for translation and category, while
/// `first_seen_chapter` keeps the chapter the term was first met in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Glossary {
    entries: BTreeMap<String, GlossaryEntry>,
}

impl Glossary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a glossary by folding entries in the given order
    pub fn from_entries<I: IntoIterator<Item = GlossaryEntry>>(entries: I) -> Self {
        let mut glossary = Self::new();
        for entry in entries {
            glossary.insert(entry);
        }
        glossary
    }

    /// Insert an entry, overwriting translation and category of an existing term
    pub fn insert(&mut self, entry: GlossaryEntry) {
        if entry.source_term.is_empty() {
            return;
        }

        match self.entries.get_mut(&entry.source_term) {
            Some(existing) => {
                existing.translation = entry.translation;
                existing.category = entry.category;
            }
            None => {
                self.entries.insert(entry.source_term.clone(), entry);
            }
        }
    }

    /// Fold one chapter's extraction output into the mapping
    pub fn fold_chapter(&mut self, entries: Vec<GlossaryEntry>) {
        for entry in entries {
            self.insert(entry);
        }
    }

    pub fn get(&self, term: &str) -> Option<&GlossaryEntry> {
        self.entries.get(term)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by source term
    pub fn entries(&self) -> impl Iterator<Item = &GlossaryEntry> {
        self.entries.values()
    }

    pub fn to_entries(&self) -> Vec<GlossaryEntry> {
        self.entries.values().cloned().collect()
    }

    /// Entries whose source term occurs in `text`
    pub fn relevant_to<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a GlossaryEntry> {
        self.entries
            .values()
            .filter(move |e| text.contains(e.source_term.as_str()))
    }
}

static IMAGE_BLOCK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<<<IMAGE_START>>>.*?<<<IMAGE_END>>>").unwrap()
});

static IMAGE_TAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<(image|img)\b[^>]*/?>(\s*</(image|img)>)?"#).unwrap()
});

/// Whether `text` has anything left to translate once image embeds are removed
pub fn has_translatable_text(text: &str) -> bool {
    let without_blocks = IMAGE_BLOCK_REGEX.replace_all(text, "");
    let without_tags = IMAGE_TAG_REGEX.replace_all(&without_blocks, "");
    !without_tags.trim().is_empty()
}

/// `<<<IMAGE_START>>>...<<<IMAGE_END>>>` blocks in order of appearance
pub fn image_blocks(text: &str) -> Vec<&str> {
    IMAGE_BLOCK_REGEX.find_iter(text).map(|m| m.as_str()).collect()
}

/// One chapter of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub source_text: String,
    /// Present only once the translate phase succeeded or skipped this chapter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glossary_output: Option<Vec<GlossaryEntry>>,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

impl Chapter {
    pub fn new(id: &str, source_text: &str) -> Self {
        Self {
            id: id.to_string(),
            title: None,
            source_text: source_text.to_string(),
            translated_text: None,
            glossary_output: None,
            findings: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// False for blank chapters and chapters made only of image embeds
    pub fn is_translatable(&self) -> bool {
        has_translatable_text(&self.source_text)
    }

    /// SHA-256 of the source text
    pub fn source_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source_text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Overall document status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DocumentStatus::Idle => "idle",
            DocumentStatus::Running => "running",
            DocumentStatus::Paused => "paused",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Stable work unit key, unique within (document, phase)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitKey(String);

impl UnitKey {
    /// `<chapter_id>` or `<chapter_id>/<check>` for proofing units
    pub fn new(chapter_id: &str, check: Option<ProofCheck>) -> Self {
        match check {
            Some(check) => Self(format!("{}/{}", chapter_id, check)),
            None => Self(chapter_id.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Atomic item dispatched to a provider within a phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub key: UnitKey,
    pub phase: Phase,
    pub chapter_id: String,
    /// Position of the chapter in the document
    pub chapter_index: usize,
    pub check: Option<ProofCheck>,
    /// Dispatch order within the phase
    pub ordinal: usize,
}

/// A document made of ordered chapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub chapters: Vec<Chapter>,
    /// Where the caller writes translated chapters. Recorded with the
    /// document so a resumed run writes to the same place; not part of the
    /// fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl Document {
    pub fn new(id: &str, chapters: Vec<Chapter>) -> Self {
        Self {
            id: id.to_string(),
            chapters,
            output_dir: None,
        }
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(output_dir.into());
        self
    }

    /// Reject empty ids and duplicate chapter ids
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.trim().is_empty() {
            return Err(anyhow::anyhow!("document id must not be empty"));
        }

        let mut seen = HashSet::new();
        for chapter in &self.chapters {
            if chapter.id.trim().is_empty() {
                return Err(anyhow::anyhow!("chapter ids must not be empty"));
            }
            if chapter.id.contains('/') {
                return Err(anyhow::anyhow!(
                    "chapter id '{}' must not contain '/'",
                    chapter.id
                ));
            }
            if !seen.insert(chapter.id.as_str()) {
                return Err(anyhow::anyhow!("duplicate chapter id '{}'", chapter.id));
            }
        }

        Ok(())
    }

    /// SHA-256 over chapter ids and source text, in order
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for chapter in &self.chapters {
            hasher.update(chapter.id.as_bytes());
            hasher.update([0u8]);
            hasher.update(chapter.source_text.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn chapter(&self, chapter_id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == chapter_id)
    }

    pub fn chapter_mut(&mut self, chapter_id: &str) -> Option<&mut Chapter> {
        self.chapters.iter_mut().find(|c| c.id == chapter_id)
    }

    /// Work units for a phase in document order.
    ///
    /// Proofing fans out into one unit per (chapter, check).
    pub fn work_units(&self, phase: Phase, checks: &[ProofCheck]) -> Vec<WorkUnit> {
        let mut units = Vec::new();

        for (index, chapter) in self.chapters.iter().enumerate() {
            match phase {
                Phase::Glossary | Phase::Translate => units.push(WorkUnit {
                    key: UnitKey::new(&chapter.id, None),
                    phase,
                    chapter_id: chapter.id.clone(),
                    chapter_index: index,
                    check: None,
                    ordinal: units.len(),
                }),
                Phase::Proof => {
                    for check in checks {
                        units.push(WorkUnit {
                            key: UnitKey::new(&chapter.id, Some(*check)),
                            phase,
                            chapter_id: chapter.id.clone(),
                            chapter_index: index,
                            check: Some(*check),
                            ordinal: units.len(),
                        });
                    }
                }
            }
        }

        units
    }
}
