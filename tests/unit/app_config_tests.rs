/*!
 * Tests for application configuration functionality
 */

use novelwai::app_config::{
    Config, LogLevel, PipelineConfig, ProviderConfig, ProviderKind, RetrySettings,
};
use novelwai::translation::ProofCheck;

use crate::common::{create_temp_dir, create_test_file};

/// Test default configuration values
#[test]
fn test_defaultConfig_shouldHaveCorrectDefaults() {
    let config = Config::default();

    assert_eq!(config.source_language, "zh");
    assert_eq!(config.target_language, "en");
    assert_eq!(config.log_level, LogLevel::Info);
    assert_eq!(config.retry.max_retries_per_provider, 3);
    assert_eq!(config.concurrency.wave_size, 1);
    assert_eq!(config.proofing.checks, ProofCheck::ALL.to_vec());

    let enabled: Vec<ProviderKind> = config
        .providers
        .iter()
        .filter(|p| p.enabled)
        .map(|p| p.kind)
        .collect();
    assert_eq!(enabled, vec![ProviderKind::Gemini]);
}

#[test]
fn test_configFile_writtenAndReadBack_shouldMatch() {
    let dir = create_temp_dir().unwrap();
    let mut config = Config::default();
    config.providers[1].enabled = true;
    config.retry = RetrySettings::immediate(5);

    let json = serde_json::to_string_pretty(&config).unwrap();
    let path = create_test_file(dir.path(), "conf.json", &json).unwrap();

    let loaded: Config = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(loaded.providers, config.providers);
    assert_eq!(loaded.retry, config.retry);
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_configFile_shouldNotLeakCredentialsInDebug() {
    let mut config = Config::default();
    config.providers[0] = ProviderConfig::new(ProviderKind::Gemini).with_api_key("AIza-secret-key");

    let rendered = format!("{:?}", config);
    assert!(!rendered.contains("AIza-secret-key"));
}

#[test]
fn test_validate_withInvalidLanguage_shouldFail() {
    let mut config = Config::default();
    config.target_language = "xyz".to_string();
    assert!(config.validate().is_err());

    config.target_language = "fr".to_string();
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_withEmptyProofingChecks_shouldFail() {
    let mut config = Config::default();
    config.proofing.checks.clear();
    assert!(config.validate().is_err());
}

#[test]
fn test_pipelineConfig_shouldCarrySettingsWithoutPin() {
    let mut config = Config::default();
    config.source_language = "ja".to_string();
    config.concurrency.proofing_concurrency = 2;

    let pipeline = config.pipeline_config();

    assert_eq!(pipeline.source_language, "ja");
    assert_eq!(pipeline.concurrency.proofing_concurrency, 2);
    assert_eq!(pipeline.providers.len(), config.providers.len());
    assert!(pipeline.pinned_provider.is_none());

    let pinned = pipeline.with_pinned_provider("gemini");
    assert_eq!(pinned.pinned_provider.as_deref(), Some("gemini"));
}

#[test]
fn test_pipelineConfig_withLanguages_shouldOverrideBoth() {
    let pipeline = PipelineConfig::new(vec![ProviderConfig::new(ProviderKind::Scripted)])
        .with_languages("ko", "de");

    assert_eq!(pipeline.source_language, "ko");
    assert_eq!(pipeline.target_language, "de");
    assert_eq!(pipeline.retry, RetrySettings::default());
}

#[test]
fn test_fillCredentialsFrom_shouldSkipScriptedProviders() {
    let mut config = Config::default();
    config.providers.push(ProviderConfig::new(ProviderKind::Scripted).with_name("dry-run"));

    config.fill_credentials_from(|var| Some(var.to_string()));

    let scripted = config.get_provider_config("dry-run").unwrap();
    assert!(scripted.api_key.is_empty());
    let openai = config.get_provider_config("openai").unwrap();
    assert_eq!(openai.api_key.expose(), "OPENAI_API_KEY");
}
