/*!
 * Parsing of provider responses into phase outputs.
 *
 * A response that cannot be parsed is a failed attempt: the validators
 * return `Err` with a short reason and the retry policy records it as a
 * retryable `unknown` failure.
 */

use log::debug;
use serde::Deserialize;

use super::PromptTask;
use crate::app_config::RetrySettings;
use crate::translation::document::{
    Finding, GlossaryEntry, ProofCheck, TermCategory, image_blocks,
};

#[derive(Debug, Deserialize)]
struct RawTerm {
    #[serde(alias = "source", alias = "source_term", alias = "original")]
    term: String,
    #[serde(alias = "target", alias = "translated")]
    translation: String,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default)]
    location: Option<String>,
    #[serde(alias = "issue", alias = "problem")]
    description: String,
}

/// Slice from the first `[` to the last `]`, tolerating code fences and chatter
fn json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a glossary extraction response
pub fn parse_glossary_response(text: &str, chapter_id: &str) -> Result<Vec<GlossaryEntry>, String> {
    let array = json_array(text).ok_or_else(|| "glossary response has no JSON array".to_string())?;
    let raw: Vec<RawTerm> =
        serde_json::from_str(array).map_err(|e| format!("malformed glossary JSON: {}", e))?;

    Ok(raw
        .into_iter()
        .filter(|t| !t.term.trim().is_empty() && !t.translation.trim().is_empty())
        .map(|t| {
            let category = t
                .category
                .as_deref()
                .map(TermCategory::from_label)
                .unwrap_or_default();
            GlossaryEntry::new(&t.term, &t.translation, category, chapter_id)
        })
        .collect())
}

/// Parse a proofing response into findings for one check
pub fn parse_findings_response(
    text: &str,
    chapter_id: &str,
    check: ProofCheck,
) -> Result<Vec<Finding>, String> {
    let array = json_array(text).ok_or_else(|| "proofing response has no JSON array".to_string())?;
    let raw: Vec<RawFinding> =
        serde_json::from_str(array).map_err(|e| format!("malformed findings JSON: {}", e))?;

    Ok(raw
        .into_iter()
        .filter(|f| !f.description.trim().is_empty())
        .map(|f| Finding {
            kind: check.finding_kind(),
            chapter_id: chapter_id.to_string(),
            location: f.location.unwrap_or_default().trim().to_string(),
            description: f.description.trim().to_string(),
        })
        .collect())
}

/// Strip code fences and surrounding whitespace from a translation
pub fn clean_translation(text: &str) -> Result<String, String> {
    let mut cleaned = text.trim();

    if let Some(rest) = cleaned.strip_prefix("```") {
        // Drop the fence line, which may carry a language tag
        cleaned = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        cleaned = cleaned.trim_end();
        cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();
    }

    if cleaned.is_empty() {
        return Err("empty translation".to_string());
    }

    Ok(cleaned.to_string())
}

/// Put back image blocks the model dropped.
///
/// A missing block goes after the output line that equals the source line
/// preceding it, or at the end when there is no such line.
pub fn restore_image_blocks(source: &str, output: &str) -> String {
    let missing: Vec<&str> = image_blocks(source)
        .into_iter()
        .filter(|block| !output.contains(*block))
        .collect();

    if missing.is_empty() {
        return output.to_string();
    }
    debug!("Restoring {} image block(s) missing from the translation", missing.len());

    let mut lines: Vec<String> = output.lines().map(str::to_string).collect();
    for block in missing {
        let anchor = source
            .find(block)
            .and_then(|pos| source[..pos].trim_end().lines().last())
            .map(str::trim)
            .filter(|line| !line.is_empty());

        let position = anchor.and_then(|anchor| lines.iter().position(|l| l.trim() == anchor));
        match position {
            Some(index) => lines.insert(index + 1, block.to_string()),
            None => lines.push(block.to_string()),
        }
    }

    lines.join("\n")
}

/// How far a translation's UTF-8 size may drift from its source's
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeTolerance {
    pub max_deviation_percent: f64,
    pub max_deviation_kb: f64,
}

impl SizeTolerance {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_deviation_percent: settings.max_size_deviation_percent,
            max_deviation_kb: settings.max_size_deviation_kb,
        }
    }

    /// Accept every size
    pub fn unbounded() -> Self {
        Self {
            max_deviation_percent: 0.0,
            max_deviation_kb: 0.0,
        }
    }

    /// Reject a translation that is truncated or padded beyond the limits
    pub fn check(&self, source: &str, translation: &str) -> Result<(), String> {
        let source_size = source.len() as f64;
        let translated_size = translation.len() as f64;
        let diff = translated_size - source_size;

        if self.max_deviation_percent > 0.0 && source_size > 0.0 {
            let percent = diff / source_size * 100.0;
            if percent.abs() > self.max_deviation_percent {
                return Err(format!(
                    "translation size differs from source by {:.1}% (limit {:.1}%)",
                    percent, self.max_deviation_percent
                ));
            }
        }

        let diff_kb = diff.abs() / 1024.0;
        if self.max_deviation_kb > 0.0 && diff_kb > self.max_deviation_kb {
            return Err(format!(
                "translation size differs from source by {:.2} KB (limit {:.2} KB)",
                diff_kb, self.max_deviation_kb
            ));
        }

        Ok(())
    }
}

/// Turn raw provider text into the payload stored for a unit.
///
/// Glossary and proofing payloads are serialized JSON; translation payloads
/// are the cleaned text, rejected when its size is outside `tolerance`.
pub fn validate_response(
    task: PromptTask,
    chapter_id: &str,
    source_text: &str,
    text: &str,
    tolerance: &SizeTolerance,
) -> Result<String, String> {
    match task {
        PromptTask::Glossary => {
            let entries = parse_glossary_response(text, chapter_id)?;
            serde_json::to_string(&entries).map_err(|e| e.to_string())
        }
        PromptTask::Translate => {
            let cleaned = clean_translation(text)?;
            let restored = restore_image_blocks(source_text, &cleaned);
            tolerance.check(source_text, &restored)?;
            Ok(restored)
        }
        PromptTask::Proof(check) => {
            let findings = parse_findings_response(text, chapter_id, check)?;
            serde_json::to_string(&findings).map_err(|e| e.to_string())
        }
    }
}
