/*!
 * Ledger record models.
 *
 * These structures map directly to ledger tables.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::errors::FailureKind;
use crate::providers::Usage;
use crate::translation::document::{Chapter, Phase, ProofCheck, WorkUnit};
use crate::translation::pipeline::{PhaseSet, PipelineState};

/// Terminal status of a work unit within a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Not yet resolved
    Pending,
    /// A provider produced an accepted payload
    Succeeded,
    /// Nothing to send; resolved without a provider call
    Skipped,
    /// Every candidate provider failed; re-dispatched on retry
    Exhausted,
}

impl UnitStatus {
    /// Whether the unit never needs dispatching again
    pub fn is_done(self) -> bool {
        matches!(self, UnitStatus::Succeeded | UnitStatus::Skipped)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Pending => write!(f, "pending"),
            UnitStatus::Succeeded => write!(f, "succeeded"),
            UnitStatus::Skipped => write!(f, "skipped"),
            UnitStatus::Exhausted => write!(f, "exhausted"),
        }
    }
}

impl std::str::FromStr for UnitStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(UnitStatus::Pending),
            "succeeded" => Ok(UnitStatus::Succeeded),
            "skipped" => Ok(UnitStatus::Skipped),
            "exhausted" => Ok(UnitStatus::Exhausted),
            _ => Err(anyhow::anyhow!("Invalid unit status: {}", s)),
        }
    }
}

/// Outcome of a single provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableFailure(FailureKind),
    FatalFailure(FailureKind),
}

impl AttemptOutcome {
    /// Classify a provider failure
    pub fn from_failure(kind: FailureKind) -> Self {
        if kind.is_retryable() {
            AttemptOutcome::RetryableFailure(kind)
        } else {
            AttemptOutcome::FatalFailure(kind)
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::RetryableFailure(_) => "retryable_failure",
            AttemptOutcome::FatalFailure(_) => "fatal_failure",
        }
    }

    pub fn failure_kind(self) -> Option<FailureKind> {
        match self {
            AttemptOutcome::Success => None,
            AttemptOutcome::RetryableFailure(kind) | AttemptOutcome::FatalFailure(kind) => {
                Some(kind)
            }
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }

    /// Rebuild from the two ledger columns
    pub fn from_columns(label: &str, kind: Option<&str>) -> anyhow::Result<Self> {
        let kind = || -> anyhow::Result<FailureKind> {
            kind.ok_or_else(|| anyhow::anyhow!("failure outcome without kind"))?
                .parse()
        };

        match label {
            "success" => Ok(AttemptOutcome::Success),
            "retryable_failure" => Ok(AttemptOutcome::RetryableFailure(kind()?)),
            "fatal_failure" => Ok(AttemptOutcome::FatalFailure(kind()?)),
            _ => Err(anyhow::anyhow!("Invalid attempt outcome: {}", label)),
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failure_kind() {
            Some(kind) => write!(f, "{}({})", self.label(), kind),
            None => f.write_str(self.label()),
        }
    }
}

/// One call to one provider for one work unit. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub document_id: String,
    pub phase: Phase,
    pub unit_key: String,
    /// 1-based position in the unit's attempt history
    pub sequence: u32,
    pub provider: String,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Attempt {
    pub fn new(
        document_id: &str,
        unit: &WorkUnit,
        sequence: u32,
        provider: &str,
        outcome: AttemptOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id: document_id.to_string(),
            phase: unit.phase,
            unit_key: unit.key.as_str().to_string(),
            sequence,
            provider: provider.to_string(),
            started_at: Utc::now(),
            outcome,
            message: None,
            latency_ms: 0,
            usage: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, latency_ms: u64) -> Self {
        self.started_at = started_at;
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Document registration
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    pub fingerprint: String,
    pub state: PipelineState,
    pub phase_set: PhaseSet,
    pub created_at: String,
    pub updated_at: String,
    /// Languages the run was started with; resume reuses them
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    /// Where finished translations are written
    pub output_dir: Option<String>,
}

impl DocumentRecord {
    pub fn new(id: &str, fingerprint: &str, phase_set: PhaseSet) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: id.to_string(),
            fingerprint: fingerprint.to_string(),
            state: PipelineState::Idle,
            phase_set,
            created_at: now.clone(),
            updated_at: now,
            source_language: None,
            target_language: None,
            output_dir: None,
        }
    }

    pub fn with_languages(mut self, source: &str, target: &str) -> Self {
        self.source_language = Some(source.to_string());
        self.target_language = Some(target.to_string());
        self
    }

    pub fn with_output_dir(mut self, output_dir: Option<String>) -> Self {
        self.output_dir = output_dir;
        self
    }
}

/// Persisted chapter source
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterRecord {
    pub document_id: String,
    pub ordinal: usize,
    pub chapter_id: String,
    pub title: Option<String>,
    pub source_text: String,
    pub source_hash: String,
}

impl ChapterRecord {
    pub fn from_chapter(document_id: &str, ordinal: usize, chapter: &Chapter) -> Self {
        Self {
            document_id: document_id.to_string(),
            ordinal,
            chapter_id: chapter.id.clone(),
            title: chapter.title.clone(),
            source_text: chapter.source_text.clone(),
            source_hash: chapter.source_hash(),
        }
    }

    pub fn into_chapter(self) -> Chapter {
        let mut chapter = Chapter::new(&self.chapter_id, &self.source_text);
        chapter.title = self.title;
        chapter
    }
}

/// Derived status of one work unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRecord {
    pub document_id: String,
    pub phase: Phase,
    pub unit_key: String,
    pub chapter_id: String,
    pub check: Option<ProofCheck>,
    pub ordinal: usize,
    pub status: UnitStatus,
    /// Accepted payload: translated text, or JSON for glossary and proofing
    pub output: Option<String>,
    pub last_updated: String,
}

/// Status plus full attempt history for one work unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitHistory {
    pub record: UnitRecord,
    pub attempts: Vec<Attempt>,
}

/// Aggregated usage for one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub characters: u64,
    pub estimated_cost_usd: f64,
    pub total_latency_ms: u64,
}

impl ProviderUsage {
    pub fn average_latency_ms(&self) -> u64 {
        if self.attempts == 0 {
            0
        } else {
            self.total_latency_ms / self.attempts
        }
    }
}

/// Cost and usage for a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub attempts: u64,
    pub successes: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub characters: u64,
    pub estimated_cost_usd: f64,
    pub per_provider: BTreeMap<String, ProviderUsage>,
}

impl CostSummary {
    /// Fold one provider's totals into the document totals
    pub fn add_provider(&mut self, provider: &str, usage: ProviderUsage) {
        self.attempts += usage.attempts;
        self.successes += usage.successes;
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.characters += usage.characters;
        self.estimated_cost_usd += usage.estimated_cost_usd;
        self.per_provider.insert(provider.to_string(), usage);
    }
}

impl fmt::Display for CostSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} attempts ({} succeeded), {} prompt + {} completion tokens, {} chars, ~${:.4}",
            self.attempts,
            self.successes,
            self.prompt_tokens,
            self.completion_tokens,
            self.characters,
            self.estimated_cost_usd
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unitStatus_fromStr_shouldRoundTrip() {
        for status in [
            UnitStatus::Pending,
            UnitStatus::Succeeded,
            UnitStatus::Skipped,
            UnitStatus::Exhausted,
        ] {
            assert_eq!(status.to_string().parse::<UnitStatus>().unwrap(), status);
        }
        assert!(UnitStatus::Skipped.is_done());
        assert!(!UnitStatus::Exhausted.is_done());
    }

    #[test]
    fn test_attemptOutcome_fromFailure_shouldClassify() {
        assert_eq!(
            AttemptOutcome::from_failure(FailureKind::Timeout),
            AttemptOutcome::RetryableFailure(FailureKind::Timeout)
        );
        assert_eq!(
            AttemptOutcome::from_failure(FailureKind::AuthFailed),
            AttemptOutcome::FatalFailure(FailureKind::AuthFailed)
        );
    }

    #[test]
    fn test_attemptOutcome_fromColumns_shouldRebuildOutcome() {
        let outcome = AttemptOutcome::RetryableFailure(FailureKind::RateLimited);
        let rebuilt = AttemptOutcome::from_columns(
            outcome.label(),
            outcome.failure_kind().map(|k| k.as_str()),
        )
        .unwrap();

        assert_eq!(rebuilt, outcome);
        assert!(AttemptOutcome::from_columns("fatal_failure", None).is_err());
        assert_eq!(
            AttemptOutcome::from_columns("success", None).unwrap(),
            AttemptOutcome::Success
        );
    }

    #[test]
    fn test_costSummary_addProvider_shouldAccumulate() {
        let mut summary = CostSummary::default();
        summary.add_provider(
            "p1",
            ProviderUsage {
                attempts: 3,
                successes: 1,
                failures: 2,
                prompt_tokens: 100,
                completion_tokens: 50,
                characters: 400,
                estimated_cost_usd: 0.01,
                total_latency_ms: 300,
            },
        );
        summary.add_provider(
            "p2",
            ProviderUsage {
                attempts: 1,
                successes: 1,
                ..Default::default()
            },
        );

        assert_eq!(summary.attempts, 4);
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.per_provider["p1"].average_latency_ms(), 100);
        assert_eq!(summary.per_provider.len(), 2);
    }
}
