use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use url::Url;

use crate::translation::concurrency::ProviderProfile;
use crate::translation::document::ProofCheck;

/// Application configuration module
/// This module handles the configuration file model: loading defaults,
/// validation, and building the immutable `PipelineConfig` handed to the engine.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Source language code (ISO)
    pub source_language: String,

    /// Target language code (ISO)
    pub target_language: String,

    /// Configured providers; order in the file does not matter, `fallback_position` does
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    /// Retry and backoff settings
    #[serde(default)]
    pub retry: RetrySettings,

    /// Dispatch concurrency settings
    #[serde(default)]
    pub concurrency: ConcurrencySettings,

    /// Proofing subphase selection
    #[serde(default)]
    pub proofing: ProofingSettings,

    /// Ledger database file; defaults to the user data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_path: Option<PathBuf>,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Provider backend type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    // @provider: Google Gemini
    #[default]
    Gemini,
    // @provider: OpenAI
    OpenAI,
    // @provider: Anthropic
    Anthropic,
    // @provider: deterministic in-process backend
    Scripted,
}

impl ProviderKind {
    // @returns: Capitalized provider name
    pub fn display_name(&self) -> &str {
        match self {
            Self::Gemini => "Gemini",
            Self::OpenAI => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Scripted => "Scripted",
        }
    }

    // @returns: Lowercase provider identifier
    pub fn to_lowercase_string(&self) -> String {
        match self {
            Self::Gemini => "gemini".to_string(),
            Self::OpenAI => "openai".to_string(),
            Self::Anthropic => "anthropic".to_string(),
            Self::Scripted => "scripted".to_string(),
        }
    }

    /// Whether the backend needs an API key to be constructed
    pub fn requires_credentials(&self) -> bool {
        !matches!(self, Self::Scripted)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_lowercase_string())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            "scripted" => Ok(Self::Scripted),
            _ => Err(anyhow!("Invalid provider type: {}", s)),
        }
    }
}

/// Opaque credential handle. Never logged, never parsed by the engine.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(String);

impl Credentials {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Raw secret, for the HTTP client only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("Credentials(<empty>)")
        } else {
            f.write_str("Credentials(<redacted>)")
        }
    }
}

/// One configured backend
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProviderConfig {
    // @field: Unique name, used in the ledger and for pinning
    pub name: String,

    // @field: Backend type
    #[serde(rename = "type")]
    pub kind: ProviderKind,

    // @field: Model name
    #[serde(default = "String::new")]
    pub model: String,

    // @field: Service URL
    #[serde(default = "String::new")]
    pub endpoint: String,

    // @field: API key
    #[serde(default)]
    pub api_key: Credentials,

    // @field: Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    // @field: Output size cap
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    // @field: Disabled providers are ignored entirely
    #[serde(default = "default_true")]
    pub enabled: bool,

    // @field: Position in the fallback order, lowest first
    #[serde(default)]
    pub fallback_position: u32,

    // @field: Max in-flight calls to this provider
    #[serde(default)]
    pub concurrent_requests: Option<usize>,

    // @field: Timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    // @param kind: Provider enum
    // @returns: Provider config with defaults
    pub fn new(kind: ProviderKind) -> Self {
        let (model, endpoint) = match kind {
            ProviderKind::Gemini => (default_gemini_model(), default_gemini_endpoint()),
            ProviderKind::OpenAI => (default_openai_model(), default_openai_endpoint()),
            ProviderKind::Anthropic => (default_anthropic_model(), default_anthropic_endpoint()),
            ProviderKind::Scripted => ("scripted".to_string(), String::new()),
        };

        Self {
            name: kind.to_lowercase_string(),
            kind,
            model,
            endpoint,
            api_key: Credentials::default(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            enabled: true,
            fallback_position: 0,
            concurrent_requests: None,
            timeout_secs: ProviderProfile::for_provider(kind).timeout_secs,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Credentials::new(key);
        self
    }

    pub fn at_position(mut self, position: u32) -> Self {
        self.fallback_position = position;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// In-flight limit, falling back to the backend profile
    pub fn effective_concurrent_requests(&self) -> usize {
        ProviderProfile::for_provider(self.kind)
            .effective_concurrent_requests(self.concurrent_requests)
            .max(1)
    }
}

/// Retry/backoff tuning for the fallback policy
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RetrySettings {
    /// Calls per provider per work unit before falling through
    #[serde(default = "default_max_retries_per_provider")]
    pub max_retries_per_provider: u32,

    /// Base delay for ServiceUnavailable, Timeout and Unknown
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Base delay for RateLimited
    #[serde(default = "default_rate_limit_base_delay_ms")]
    pub rate_limit_base_delay_ms: u64,

    /// Growth factor per consecutive failure
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound on any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter as a fraction of the delay, in [0, 1]
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,

    /// Largest accepted size change of a translation against its source,
    /// in percent of the source's UTF-8 size; 0 disables the check
    #[serde(default = "default_max_size_deviation_percent")]
    pub max_size_deviation_percent: f64,

    /// Largest accepted absolute size change of a translation, in KB; 0 disables the check
    #[serde(default = "default_max_size_deviation_kb")]
    pub max_size_deviation_kb: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries_per_provider: default_max_retries_per_provider(),
            base_delay_ms: default_base_delay_ms(),
            rate_limit_base_delay_ms: default_rate_limit_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
            max_size_deviation_percent: default_max_size_deviation_percent(),
            max_size_deviation_kb: default_max_size_deviation_kb(),
        }
    }
}

impl RetrySettings {
    /// No delays at all; same retry budget and response checks
    pub fn immediate(max_retries_per_provider: u32) -> Self {
        Self {
            max_retries_per_provider,
            base_delay_ms: 0,
            rate_limit_base_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            jitter_ratio: 0.0,
            ..Self::default()
        }
    }
}

/// Dispatch concurrency within a phase
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConcurrencySettings {
    /// Chapters dispatched together in context-dependent phases
    #[serde(default = "default_wave_size")]
    pub wave_size: usize,

    /// Proofing units in flight at once
    #[serde(default = "default_proofing_concurrency")]
    pub proofing_concurrency: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            wave_size: default_wave_size(),
            proofing_concurrency: default_proofing_concurrency(),
        }
    }
}

/// Which proofing subphases run
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProofingSettings {
    #[serde(default = "default_proof_checks")]
    pub checks: Vec<ProofCheck>,
}

impl Default for ProofingSettings {
    fn default() -> Self {
        Self {
            checks: default_proof_checks(),
        }
    }
}

/// Fully-resolved, immutable configuration for one run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub providers: Vec<ProviderConfig>,
    /// Restrict every unit to this provider
    pub pinned_provider: Option<String>,
    pub retry: RetrySettings,
    pub concurrency: ConcurrencySettings,
    pub proofing: ProofingSettings,
    pub source_language: String,
    pub target_language: String,
}

impl PipelineConfig {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self {
            providers,
            pinned_provider: None,
            retry: RetrySettings::default(),
            concurrency: ConcurrencySettings::default(),
            proofing: ProofingSettings::default(),
            source_language: "zh".to_string(),
            target_language: "en".to_string(),
        }
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pinned_provider(mut self, name: impl Into<String>) -> Self {
        self.pinned_provider = Some(name.into());
        self
    }

    pub fn with_languages(mut self, source: &str, target: &str) -> Self {
        self.source_language = source.to_string();
        self.target_language = target.to_string();
        self
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new(ProviderKind::Gemini).at_position(0),
        ProviderConfig::new(ProviderKind::OpenAI).at_position(1).disabled(),
        ProviderConfig::new(ProviderKind::Anthropic).at_position(2).disabled(),
    ]
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_true() -> bool {
    true
}

fn default_max_retries_per_provider() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_rate_limit_base_delay_ms() -> u64 {
    6000 // throttling windows outlast transient outages
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_ratio() -> f64 {
    0.2
}

fn default_max_size_deviation_percent() -> f64 {
    115.0
}

fn default_max_size_deviation_kb() -> f64 {
    7.0
}

fn default_wave_size() -> usize {
    1
}

fn default_proofing_concurrency() -> usize {
    4
}

fn default_proof_checks() -> Vec<ProofCheck> {
    ProofCheck::ALL.to_vec()
}

fn default_gemini_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_openai_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_anthropic_endpoint() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}

impl Config {
    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        crate::language_utils::validate_language_code(&self.source_language)?;
        crate::language_utils::validate_language_code(&self.target_language)?;

        let mut names = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(anyhow!("Provider names must not be empty"));
            }
            if !names.insert(provider.name.as_str()) {
                return Err(anyhow!("Duplicate provider name: {}", provider.name));
            }
            if !provider.endpoint.is_empty() {
                Url::parse(&provider.endpoint).with_context(|| {
                    format!("Invalid endpoint for provider {}: {}", provider.name, provider.endpoint)
                })?;
            }
        }

        if !self.providers.iter().any(|p| p.enabled) {
            return Err(anyhow!("At least one provider must be enabled"));
        }

        if self.retry.multiplier < 1.0 {
            return Err(anyhow!("Retry multiplier must be at least 1.0"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(anyhow!("Retry jitter ratio must be between 0 and 1"));
        }
        if self.retry.max_size_deviation_percent < 0.0 || self.retry.max_size_deviation_kb < 0.0 {
            return Err(anyhow!("Translation size deviation limits must not be negative"));
        }
        if self.proofing.checks.is_empty() {
            return Err(anyhow!("At least one proofing check must be selected"));
        }

        Ok(())
    }

    /// Immutable per-run configuration
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            providers: self.providers.clone(),
            pinned_provider: None,
            retry: self.retry.clone(),
            concurrency: self.concurrency.clone(),
            proofing: self.proofing.clone(),
            source_language: self.source_language.clone(),
            target_language: self.target_language.clone(),
        }
    }

    /// Get a provider configuration by name
    pub fn get_provider_config(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Fill empty credentials from `<NAME>_API_KEY`, using `lookup` for the environment
    pub fn fill_credentials_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for provider in &mut self.providers {
            if provider.api_key.is_empty() && provider.kind.requires_credentials() {
                let var = format!("{}_API_KEY", provider.name.to_uppercase().replace('-', "_"));
                if let Some(value) = lookup(&var) {
                    provider.api_key = Credentials::new(value);
                }
            }
        }
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: "zh".to_string(),
            target_language: "en".to_string(),
            providers: default_providers(),
            retry: RetrySettings::default(),
            concurrency: ConcurrencySettings::default(),
            proofing: ProofingSettings::default(),
            ledger_path: None,
            log_level: LogLevel::default(),
        }
    }
}
