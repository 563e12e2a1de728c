/*!
 * Prompt templates for chapter translation.
 *
 * Glossary extraction and proofing ask for JSON arrays so that responses
 * can be validated before they are accepted; translation asks for plain
 * text with markup preserved.
 */

use anyhow::{Result, anyhow};
use std::fmt::Write;

use super::{Prompt, PromptBuilder, PromptTask};
use crate::app_config::PipelineConfig;
use crate::language_utils::display_language;
use crate::translation::document::{Chapter, Glossary, GlossaryEntry, ProofCheck, WorkUnit};

/// System prompt template with language placeholders.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    /// The template string with placeholders
    template: String,
}

impl PromptTemplate {
    pub const GLOSSARY_EXTRACTOR: &'static str = r#"You are building a translation glossary for a {source_language} novel that will be translated into {target_language}.

## Task
- List the proper nouns and recurring special terms in the chapter: character names, places, titles and ranks, techniques, organisations
- Give each one a single canonical {target_language} rendering
- Categorise each term as "name", "place", "title" or "other"

## Output Requirements
- Return ONLY a JSON array: [{"term": "...", "translation": "...", "category": "..."}]
- Return [] when the chapter has no such terms
- Do not include any text outside the JSON array"#;

    pub const NOVEL_TRANSLATOR: &'static str = r#"You are a professional literary translator working from {source_language} into {target_language} on web novels and light novels.

## Rules
- Translate narration and dialogue naturally while preserving meaning, tone and character voice
- Use the glossary renderings exactly for every listed term
- Keep honorifics that carry meaning in the original
- Preserve HTML tags and <<<IMAGE_START>>>...<<<IMAGE_END>>> blocks exactly as they are
- Do not explain, summarise or add notes

## Output
- Return only the translated chapter text"#;

    pub const PROOFREADER: &'static str = r#"You are proofreading a {target_language} translation of a {source_language} novel chapter.

## Check
{check_instructions}

## Output Requirements
- Return ONLY a JSON array: [{"location": "...", "description": "..."}]
- "location" quotes a short excerpt of the translation or names the paragraph
- Return [] when you find no issue
- Do not include any text outside the JSON array"#;

    /// Create a new prompt template.
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    /// Render the template with the given variables.
    pub fn render(&self, source_language: &str, target_language: &str) -> String {
        self.template
            .replace("{source_language}", source_language)
            .replace("{target_language}", target_language)
    }

    /// What a proofing check looks for
    pub fn check_instructions(check: ProofCheck) -> &'static str {
        match check {
            ProofCheck::UntranslatedText => {
                "Find passages left in the source language or in non-Latin script that should have been translated."
            }
            ProofCheck::GlossaryConsistency => {
                "Find glossary terms rendered differently from the glossary translation."
            }
            ProofCheck::GenderConsistency => {
                "Find pronouns or gendered forms that contradict how a character is referred to elsewhere in the chapter."
            }
            ProofCheck::StyleDrift => {
                "Find passages whose register, tense or tone drift from the rest of the translation."
            }
        }
    }
}

/// Default prompt builder backed by the templates above
#[derive(Debug, Clone)]
pub struct TemplatePromptBuilder {
    source_language: String,
    target_language: String,
}

impl TemplatePromptBuilder {
    /// Create a builder; language codes are shown by name when known.
    pub fn new(source_language: &str, target_language: &str) -> Self {
        Self {
            source_language: display_language(source_language),
            target_language: display_language(target_language),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.source_language, &config.target_language)
    }

    fn render(&self, template: &str) -> String {
        PromptTemplate::new(template).render(&self.source_language, &self.target_language)
    }

    fn glossary_section(entries: &[&GlossaryEntry]) -> String {
        let mut section = String::from("## Glossary\n");
        for entry in entries {
            let _ = writeln!(
                section,
                "- {} => {} ({})",
                entry.source_term, entry.translation, entry.category
            );
        }
        section
    }

    fn heading(chapter: &Chapter) -> String {
        match &chapter.title {
            Some(title) => format!("# Chapter {}: {}\n\n", chapter.id, title),
            None => format!("# Chapter {}\n\n", chapter.id),
        }
    }
}

impl PromptBuilder for TemplatePromptBuilder {
    fn build_prompt(&self, unit: &WorkUnit, chapter: &Chapter, glossary: &Glossary) -> Result<Prompt> {
        if unit.chapter_id != chapter.id {
            return Err(anyhow!(
                "unit '{}' belongs to chapter '{}', not '{}'",
                unit.key,
                unit.chapter_id,
                chapter.id
            ));
        }

        let task = PromptTask::for_unit(unit);
        let prompt = match task {
            PromptTask::Glossary => {
                let user = format!("{}{}", Self::heading(chapter), chapter.source_text);
                Prompt::new(task, &self.render(PromptTemplate::GLOSSARY_EXTRACTOR), &user)
                    .with_chapter_text(&chapter.source_text)
            }
            PromptTask::Translate => {
                let relevant: Vec<&GlossaryEntry> = glossary.relevant_to(&chapter.source_text).collect();
                let mut user = String::new();
                if !relevant.is_empty() {
                    user.push_str(&Self::glossary_section(&relevant));
                    user.push('\n');
                }
                user.push_str(&Self::heading(chapter));
                user.push_str(&chapter.source_text);

                Prompt::new(task, &self.render(PromptTemplate::NOVEL_TRANSLATOR), &user)
                    .with_chapter_text(&chapter.source_text)
            }
            PromptTask::Proof(check) => {
                let translation = chapter.translated_text.as_deref().ok_or_else(|| {
                    anyhow!("chapter '{}' has no translation to proofread", chapter.id)
                })?;

                let system = self
                    .render(PromptTemplate::PROOFREADER)
                    .replace("{check_instructions}", PromptTemplate::check_instructions(check));

                let mut user = String::new();
                if check == ProofCheck::GlossaryConsistency {
                    let all: Vec<&GlossaryEntry> = glossary.entries().collect();
                    user.push_str(&Self::glossary_section(&all));
                    user.push('\n');
                }
                user.push_str(&Self::heading(chapter));
                let _ = write!(
                    user,
                    "## Source\n{}\n\n## Translation\n{}",
                    chapter.source_text, translation
                );

                Prompt::new(task, &system, &user).with_chapter_text(translation)
            }
        };

        Ok(prompt.for_unit(unit.key.as_str()))
    }
}
