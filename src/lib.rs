/*!
 * # NovelWAI - Novel translation With AI
 *
 * A Rust library that drives chapter-based documents through several
 * text-generation providers and survives pauses, stops and crashes.
 *
 * ## Features
 *
 * - Three phases per document: glossary extraction, translation, proofing
 * - Providers with ordered fallback:
 *   - Google Gemini
 *   - OpenAI API
 *   - Anthropic API
 *   - Scripted backend for tests and dry runs
 * - Exponential backoff with jitter, longer for rate limits
 * - Append-only SQLite job ledger; every run can be resumed
 * - ISO 639-1 and ISO 639-2 language code support
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `translation`: The orchestration engine:
 *   - `translation::document`: Document model, work units, glossary
 *   - `translation::prompts`: Prompt construction and response validation
 *   - `translation::policy`: Retry/fallback policy
 *   - `translation::pipeline`: Phase executor and state machine
 * - `ledger`: Persistent job ledger
 * - `providers`: Client implementations for the supported backends
 * - `file_utils`: Chapter input and translation output on disk
 * - `language_utils`: ISO language code utilities
 * - `errors`: Error and failure classification types
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod errors;
pub mod file_utils;
pub mod language_utils;
pub mod ledger;
pub mod providers;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::{Config, PipelineConfig, ProviderConfig, ProviderKind, RetrySettings};
pub use errors::{FailureKind, OrchestrationError, PhaseFailure, ProviderError, ProviderTrial};
pub use language_utils::{display_language, get_language_name, language_codes_match};
pub use ledger::JobLedger;
pub use providers::{ProviderAdapter, ProviderRegistry, ScriptedOutcome, ScriptedProvider};
pub use translation::{
    Chapter, Document, Glossary, Orchestrator, Phase, PhaseSet, PipelineEvent, PipelineState,
    StatusSnapshot,
};
