/*!
 * Scripted provider for tests, benchmarks and dry runs.
 *
 * Without a script it answers every task with a well-formed default:
 * - glossary: an empty JSON array
 * - translate: the chapter text tagged with the provider name
 * - proof: an empty JSON array (no findings)
 *
 * Scripts attach queues of outcomes to a unit or to a text fragment; the
 * first matching rule with outcomes left wins, so a given configuration
 * and script always produce the same call sequence.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::{Generation, GenerationParams, Provider, Usage};
use crate::app_config::ProviderKind;
use crate::errors::{FailureKind, ProviderError};
use crate::translation::document::Phase;
use crate::translation::prompts::{Prompt, PromptTask};

/// What a scripted call does
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    /// Succeed with this text
    Reply(String),
    /// Fail with this classification
    Fail(FailureKind),
}

/// One observed call
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedCall {
    pub provider: String,
    pub phase: Phase,
    pub unit_key: String,
}

/// Call log that several scripted providers can share
pub type CallLog = Arc<Mutex<Vec<ScriptedCall>>>;

type CallHook = Arc<dyn Fn(&ScriptedCall) + Send + Sync>;

#[derive(Debug)]
struct Rule {
    phase: Option<Phase>,
    unit_key: Option<String>,
    needle: Option<String>,
    outcomes: VecDeque<ScriptedOutcome>,
    /// Keep answering with the last outcome once the queue is drained
    sticky: bool,
}

impl Rule {
    fn matches(&self, prompt: &Prompt) -> bool {
        self.phase.is_none_or(|p| p == prompt.task.phase())
            && self.unit_key.as_deref().is_none_or(|k| k == prompt.unit_key)
            && self
                .needle
                .as_deref()
                .is_none_or(|n| prompt.user.contains(n))
    }

    fn next(&mut self) -> Option<ScriptedOutcome> {
        if self.sticky && self.outcomes.len() == 1 {
            return self.outcomes.front().cloned();
        }
        self.outcomes.pop_front()
    }
}

/// Deterministic in-process backend
#[derive(Clone)]
pub struct ScriptedProvider {
    name: String,
    rules: Arc<Mutex<Vec<Rule>>>,
    calls: CallLog,
    hook: Option<CallHook>,
    delay: Option<Duration>,
    /// Custom response generator (optional)
    custom_response: Option<fn(&Prompt) -> String>,
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("name", &self.name)
            .field("rules", &self.rules.lock().len())
            .field("delay", &self.delay)
            .finish()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::named("scripted")
    }

    /// Provider whose default translations are tagged with `name`
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rules: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            hook: None,
            delay: None,
            custom_response: None,
        }
    }

    /// Script outcomes for one unit of one phase, consumed in order
    pub fn on_unit<I>(self, phase: Phase, unit_key: &str, outcomes: I) -> Self
    where
        I: IntoIterator<Item = ScriptedOutcome>,
    {
        self.push_rule(Rule {
            phase: Some(phase),
            unit_key: Some(unit_key.to_string()),
            needle: None,
            outcomes: outcomes.into_iter().collect(),
            sticky: false,
        })
    }

    /// Answer every call for one unit of one phase with `outcome`
    pub fn always_on_unit(self, phase: Phase, unit_key: &str, outcome: ScriptedOutcome) -> Self {
        self.push_rule(Rule {
            phase: Some(phase),
            unit_key: Some(unit_key.to_string()),
            needle: None,
            outcomes: VecDeque::from([outcome]),
            sticky: true,
        })
    }

    /// Script outcomes for any prompt containing `needle`
    pub fn on_text<I>(self, needle: &str, outcomes: I) -> Self
    where
        I: IntoIterator<Item = ScriptedOutcome>,
    {
        self.push_rule(Rule {
            phase: None,
            unit_key: None,
            needle: Some(needle.to_string()),
            outcomes: outcomes.into_iter().collect(),
            sticky: false,
        })
    }

    /// Fail every call with `kind`
    pub fn failing(self, kind: FailureKind) -> Self {
        self.push_rule(Rule {
            phase: None,
            unit_key: None,
            needle: None,
            outcomes: VecDeque::from([ScriptedOutcome::Fail(kind)]),
            sticky: true,
        })
    }

    /// Simulated latency before every answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set a custom response generator for unscripted calls
    pub fn with_custom_response(mut self, generator: fn(&Prompt) -> String) -> Self {
        self.custom_response = Some(generator);
        self
    }

    /// Record calls into a log shared with other providers
    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.calls = log;
        self
    }

    /// Run `hook` at the start of every call
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ScriptedCall) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Calls observed so far, in order
    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn push_rule(self, rule: Rule) -> Self {
        self.rules.lock().push(rule);
        self
    }

    fn scripted_outcome(&self, prompt: &Prompt) -> Option<ScriptedOutcome> {
        let mut rules = self.rules.lock();
        rules
            .iter_mut()
            .filter(|r| r.matches(prompt))
            .find_map(|r| r.next())
    }

    fn default_response(&self, prompt: &Prompt) -> String {
        if let Some(generator) = self.custom_response {
            return generator(prompt);
        }

        match prompt.task {
            PromptTask::Glossary | PromptTask::Proof(_) => "[]".to_string(),
            PromptTask::Translate => format!("[{}] {}", self.name, prompt.chapter_text),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Scripted
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<Generation, ProviderError> {
        let call = ScriptedCall {
            provider: self.name.clone(),
            phase: prompt.task.phase(),
            unit_key: prompt.unit_key.clone(),
        };
        self.calls.lock().push(call.clone());
        if let Some(hook) = &self.hook {
            hook(&call);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let text = match self.scripted_outcome(prompt) {
            Some(ScriptedOutcome::Fail(kind)) => {
                return Err(ProviderError::new(
                    kind,
                    format!("scripted {} failure from {}", kind, self.name),
                ));
            }
            Some(ScriptedOutcome::Reply(text)) => text,
            None => self.default_response(prompt),
        };

        let characters = prompt.characters();
        Ok(Generation {
            usage: Usage {
                prompt_tokens: Some(characters / 4),
                completion_tokens: Some(text.chars().count() as u64 / 4),
                characters,
                estimated_cost_usd: None,
            },
            text,
            model: params.model.clone(),
        })
    }
}
