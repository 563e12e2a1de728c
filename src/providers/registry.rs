/*!
 * Provider registry.
 *
 * Turns the configured provider list into the fallback order used by the
 * retry policy. Backends that cannot be constructed are recorded as
 * unavailable once, here, and never called.
 */

use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::{Generation, GenerationParams, Provider, ProviderAdapter};
use crate::app_config::ProviderConfig;
use crate::errors::{OrchestrationError, ProviderError};
use crate::translation::prompts::Prompt;

/// A configured backend that could not be constructed
#[derive(Debug, Clone, PartialEq)]
pub struct UnavailableProvider {
    pub name: String,
    pub reason: String,
}

/// A usable provider with its parameters and in-flight limit
#[derive(Debug, Clone)]
pub struct ProviderHandle {
    pub name: String,
    pub params: GenerationParams,
    adapter: Arc<ProviderAdapter>,
    limiter: Arc<Semaphore>,
}

impl ProviderHandle {
    pub fn new(config: &ProviderConfig, adapter: ProviderAdapter) -> Self {
        Self {
            name: config.name.clone(),
            params: GenerationParams::from_config(config),
            adapter: Arc::new(adapter),
            limiter: Arc::new(Semaphore::new(config.effective_concurrent_requests())),
        }
    }

    /// One call, waiting for a free slot first
    pub async fn generate(&self, prompt: &Prompt) -> Result<Generation, ProviderError> {
        let _permit = self.limiter.acquire().await.map_err(|_| {
            ProviderError::new(
                crate::errors::FailureKind::ServiceUnavailable,
                format!("provider '{}' is shut down", self.name),
            )
        })?;
        self.adapter.generate(prompt, &self.params).await
    }

    /// Slots currently free
    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }
}

/// Enabled providers in fallback order
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    available: Vec<ProviderHandle>,
    unavailable: Vec<UnavailableProvider>,
}

impl ProviderRegistry {
    /// Build adapters for every enabled provider
    pub fn from_configs(configs: &[ProviderConfig]) -> Self {
        let mut registry = Self::default();

        for config in Self::ordered(configs.iter()) {
            match ProviderAdapter::from_config(config) {
                Ok(adapter) => {
                    debug!(
                        "Provider '{}' ({}) available at position {}",
                        config.name, config.kind, config.fallback_position
                    );
                    registry.available.push(ProviderHandle::new(config, adapter));
                }
                Err(e) => {
                    warn!("Provider '{}' is unavailable: {}", config.name, e);
                    registry.unavailable.push(UnavailableProvider {
                        name: config.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        registry
    }

    /// Use pre-built adapters, e.g. scripted ones
    pub fn from_adapters(adapters: Vec<(ProviderConfig, ProviderAdapter)>) -> Self {
        let mut adapters: Vec<_> = adapters.into_iter().filter(|(c, _)| c.enabled).collect();
        adapters.sort_by_key(|(c, _)| c.fallback_position);

        Self {
            available: adapters
                .into_iter()
                .map(|(config, adapter)| ProviderHandle::new(&config, adapter))
                .collect(),
            unavailable: Vec::new(),
        }
    }

    /// Enabled configs, stably sorted by fallback position
    fn ordered<'a, I>(configs: I) -> Vec<&'a ProviderConfig>
    where
        I: Iterator<Item = &'a ProviderConfig>,
    {
        let mut enabled: Vec<&ProviderConfig> = configs.filter(|c| c.enabled).collect();
        enabled.sort_by_key(|c| c.fallback_position);
        enabled
    }

    /// Candidate sequence for a unit: the pinned provider alone, or the full order
    pub fn candidates(&self, pinned: Option<&str>) -> Result<Vec<ProviderHandle>, OrchestrationError> {
        if self.available.is_empty() {
            return Err(OrchestrationError::NoEnabledProviders {
                unavailable: self.unavailable.iter().map(|u| u.name.clone()).collect(),
            });
        }

        match pinned {
            Some(name) => self
                .get(name)
                .map(|handle| vec![handle.clone()])
                .ok_or_else(|| OrchestrationError::UnknownProvider(name.to_string())),
            None => Ok(self.available.clone()),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ProviderHandle> {
        self.available.iter().find(|h| h.name == name)
    }

    /// Names in fallback order
    pub fn fallback_order(&self) -> Vec<&str> {
        self.available.iter().map(|h| h.name.as_str()).collect()
    }

    pub fn unavailable(&self) -> &[UnavailableProvider] {
        &self.unavailable
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }
}
